//! Raw access to switch registers for debugging.
//!
//! A read takes two steps: [`DebugRegisterPort::prepare`] latches an address,
//! [`DebugRegisterPort::read`] returns the value at the latched address.
//! Nothing stops another actor from latching a different address in between.

use std::sync::{Arc, Mutex, MutexGuard};

use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::switch::{PortId, SwitchTree};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum RegisterWidth {
    W8 = 1,
    W16 = 2,
    W32 = 4,
    W48 = 6,
    W64 = 8,
}

impl RegisterWidth {
    pub fn parse(bytes: u8) -> Result<Self> {
        Self::try_from(bytes)
            .map_err(|_| Error::invalid(format!("unsupported register width {bytes}")))
    }

    pub fn max_value(self) -> u64 {
        match self {
            RegisterWidth::W64 => u64::MAX,
            other => (1u64 << (8 * u8::from(other) as u32)) - 1,
        }
    }

    /// Zero padded hex rendering of a register value. 48 bit registers are
    /// shown with 16 digits.
    pub fn format(self, value: u64) -> String {
        match self {
            RegisterWidth::W8 => format!("{:02x}", value as u8),
            RegisterWidth::W16 => format!("{:04x}", value as u16),
            RegisterWidth::W32 => format!("{:08x}", value as u32),
            RegisterWidth::W48 | RegisterWidth::W64 => format!("{value:016x}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugAddress {
    pub page: u8,
    pub register: u8,
    pub width: RegisterWidth,
}

pub struct DebugRegisterPort {
    tree: Arc<SwitchTree>,
    port: PortId,
    pending: Mutex<Option<DebugAddress>>,
}

impl core::fmt::Debug for DebugRegisterPort {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DebugRegisterPort")
            .field("port", &self.port)
            .field("pending", &self.pending())
            .finish()
    }
}

fn rejected(e: Error) -> Error {
    match e {
        Error::Unsupported | Error::Io(_) => e,
        other => Error::Io(other.to_string()),
    }
}

impl DebugRegisterPort {
    pub fn new(tree: Arc<SwitchTree>, port: PortId) -> Self {
        Self {
            tree,
            port,
            pending: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<DebugAddress>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The address latched by the last successful [`prepare`](Self::prepare)
    pub fn pending(&self) -> Option<DebugAddress> {
        *self.lock()
    }

    fn check_access(&self) -> Result<()> {
        if self.tree.switch_ops(self.port).capabilities().register_access {
            Ok(())
        } else {
            Err(Error::Unsupported)
        }
    }

    /// Latch the register to read. A malformed width leaves the previous
    /// latch in place.
    pub fn prepare(&self, page: u8, register: u8, width: u8) -> Result<DebugAddress> {
        let address = DebugAddress {
            page,
            register,
            width: RegisterWidth::parse(width)?,
        };
        self.check_access()?;

        let mut pending = self.lock();
        let ops = self.tree.switch_ops(self.port);
        self.tree
            .on_bus(|| ops.setup_get_reg(address))
            .map_err(rejected)?;
        *pending = Some(address);
        Ok(address)
    }

    /// Value of the latched register
    pub fn read_value(&self) -> Result<(RegisterWidth, u64)> {
        self.check_access()?;
        let _pending = self.lock();
        let ops = self.tree.switch_ops(self.port);
        let (width, value) = self.tree.on_bus(|| ops.get_reg()).map_err(rejected)?;
        let width = RegisterWidth::try_from(width)
            .map_err(|_| Error::Io(format!("driver returned register width {width}")))?;
        Ok((width, value))
    }

    /// Hex rendering of the latched register
    pub fn read(&self) -> Result<String> {
        let (width, value) = self.read_value()?;
        Ok(width.format(value))
    }

    pub fn write(&self, page: u8, register: u8, width: u8, value: u64) -> Result<()> {
        let width = RegisterWidth::parse(width)?;
        if value > width.max_value() {
            return Err(Error::invalid(format!(
                "{value:#x} does not fit a {} byte register",
                u8::from(width)
            )));
        }
        self.check_access()?;

        let address = DebugAddress {
            page,
            register,
            width,
        };
        let _pending = self.lock();
        let ops = self.tree.switch_ops(self.port);
        self.tree
            .on_bus(|| ops.set_reg(address, value))
            .map_err(rejected)
    }
}
