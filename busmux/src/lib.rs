//! Busmux coordinates devices that share one physical management bus, and
//! exposes them through a text based control surface.
//!
//! Three groups of users contend for the bus:
//!
//! * a temperature sensor driver ([`hwmon::Mcp9902`]), which reads its
//!   registers through a time bounded [`hwmon::RegisterCache`],
//! * the switch tree of a distributed switch ([`dsa::SwitchTree`]), whose
//!   driver is reached for statistics, register dumps, tagging protocol
//!   changes and raw register access,
//! * an operator, who can toggle the bus clock mode.
//!
//! All of them go through a single [`arbiter::BusArbiter`], which serializes
//! bus transactions and enforces a settle delay after every release.
//!
//! # Control surface
//! Devices expose their knobs as [`attr::AttributeGroup`]s: named text
//! attributes that are read and written in the style of sysfs. The `hwmon`
//! group belongs to the sensor, the `dsa` group is attached to the master
//! device of a switch tree by [`dsa::MasterPortFacade`].
//!
//! Hosts supply the hardware: implementations of [`hwmon::SmbusDevice`],
//! [`dsa::SwitchOps`], [`dsa::NetDeviceOps`] and
//! [`dsa::ethtool::EthtoolOps`]. The `busmux-linux` crate provides an SMBus
//! backend on top of `/dev/i2c-*` and an emulated switch board.

pub mod arbiter;
pub mod attr;
pub mod config;
pub mod dsa;
mod error;
pub mod hwmon;
#[cfg(test)]
mod testing;

pub use error::{Error, Result};
