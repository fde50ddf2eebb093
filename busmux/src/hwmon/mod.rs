//! Hardware monitoring devices on the register bus.
//!
//! Devices on this bus share their clock line with the switch management
//! bus, so every transaction is wrapped in the process wide
//! [`BusArbiter`](crate::arbiter::BusArbiter).

mod cache;
pub mod mcp9902;

pub use cache::{RegisterCache, RegisterSnapshot};
pub use mcp9902::{Mcp9902, TempIndex};

use crate::error::Result;

/// Byte oriented register access to a single device on an SMBus adapter.
///
/// This is the raw transaction layer. Implementations do not arbitrate; the
/// callers in this module do.
pub trait SmbusDevice: Send + Sync {
    /// Read the register addressed by `command`
    fn read_byte_data(&self, command: u8) -> Result<u8>;

    /// Write `value` to the register addressed by `command`
    fn write_byte_data(&self, command: u8, value: u8) -> Result<()>;

    /// Whether the adapter behind this device is runtime suspended
    fn is_suspended(&self) -> bool {
        false
    }
}

impl<T: SmbusDevice + ?Sized> SmbusDevice for std::sync::Arc<T> {
    fn read_byte_data(&self, command: u8) -> Result<u8> {
        (**self).read_byte_data(command)
    }

    fn write_byte_data(&self, command: u8, value: u8) -> Result<()> {
        (**self).write_byte_data(command, value)
    }

    fn is_suspended(&self) -> bool {
        (**self).is_suspended()
    }
}
