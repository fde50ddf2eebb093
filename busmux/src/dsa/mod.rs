//! Distributed switch architecture glue: the master network device that
//! carries the traffic of a switch tree, and the switch tree itself.
//!
//! * [`MasterPortFacade`] merges the introspection surface of the master
//!   device with that of the switch's CPU port.
//! * [`TagProtocolSwitch`] owns the tree wide tagging protocol and changes it
//!   atomically.
//! * [`DebugRegisterPort`] gives raw access to switch registers.
//! * [`DsaAttributes`] exposes all of the above as the `dsa` attribute group
//!   of the master device.
//!
//! Every access to switch hardware goes through
//! [`SwitchTree::on_bus`], which holds the shared bus arbiter for the
//! duration of the driver call.

mod attrs;
mod debug;
pub mod ethtool;
mod facade;
mod master;
mod switch;
mod tag;
mod tagging;

pub use attrs::{DsaAttributes, PvlanListing};
pub use debug::{DebugAddress, DebugRegisterPort, RegisterWidth};
pub use facade::MasterPortFacade;
pub use master::{
    DsaNetdevOps, HwTstampConfig, IoctlRequest, MasterDevice, NetDeviceOps, ETH_DATA_LEN,
};
pub use switch::{DsaPort, PortId, PortType, SwitchCapabilities, SwitchOps, SwitchTree};
pub use tag::{TagProtocol, TagProtocolId, TagRef, TagRegistry};
pub use tagging::{TagProtocolSwitch, IMP_PORT};
