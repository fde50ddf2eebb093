//! SMBus access through the Linux i2c character devices (`/dev/i2c-N`).

use std::{
    fs::{File, OpenOptions},
    os::fd::AsRawFd,
    path::{Path, PathBuf},
};

use busmux::hwmon::SmbusDevice;

const I2C_SLAVE: libc::c_ulong = 0x0703;
const I2C_SMBUS: libc::c_ulong = 0x0720;

const I2C_SMBUS_READ: u8 = 1;
const I2C_SMBUS_WRITE: u8 = 0;
const I2C_SMBUS_BYTE_DATA: u32 = 2;

const I2C_SMBUS_BLOCK_MAX: usize = 32;

#[repr(C)]
#[allow(dead_code)]
union SmbusData {
    byte: u8,
    block: [u8; I2C_SMBUS_BLOCK_MAX + 2],
}

#[repr(C)]
struct SmbusIoctlData {
    read_write: u8,
    command: u8,
    size: u32,
    data: *mut SmbusData,
}

/// One device on a Linux i2c adapter
#[derive(Debug)]
pub struct LinuxSmbus {
    file: File,
    address: u16,
    runtime_status: Option<PathBuf>,
}

impl LinuxSmbus {
    /// Open the adapter at `bus` and bind it to the device at `address`.
    pub fn open(bus: &Path, address: u16) -> std::io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(bus)?;

        // SAFETY: the fd is valid for the lifetime of `file`, I2C_SLAVE takes
        // the address by value.
        let res = unsafe {
            libc::ioctl(
                file.as_raw_fd(),
                I2C_SLAVE as _,
                address as libc::c_ulong,
            )
        };
        if res < 0 {
            return Err(std::io::Error::last_os_error());
        }

        Ok(Self {
            file,
            address,
            runtime_status: runtime_status_path(bus),
        })
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    fn transfer(&self, read_write: u8, command: u8, data: &mut SmbusData) -> std::io::Result<()> {
        let mut args = SmbusIoctlData {
            read_write,
            command,
            size: I2C_SMBUS_BYTE_DATA,
            data,
        };

        // SAFETY: `args` and the data it points to outlive the call.
        let res = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                I2C_SMBUS as _,
                &mut args as *mut SmbusIoctlData,
            )
        };
        if res < 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }
}

/// The runtime power management status file of the adapter behind `bus`
fn runtime_status_path(bus: &Path) -> Option<PathBuf> {
    let name = bus.file_name()?.to_str()?;
    if !name.starts_with("i2c-") {
        return None;
    }
    Some(
        Path::new("/sys/class/i2c-dev")
            .join(name)
            .join("device/power/runtime_status"),
    )
}

fn is_suspended_status(status: &str) -> bool {
    status.trim() == "suspended"
}

fn io_error(op: &str, command: u8, e: std::io::Error) -> busmux::Error {
    busmux::Error::Io(format!("smbus {op} of register {command:#04x}: {e}"))
}

impl SmbusDevice for LinuxSmbus {
    fn read_byte_data(&self, command: u8) -> busmux::Result<u8> {
        let mut data = SmbusData { byte: 0 };
        self.transfer(I2C_SMBUS_READ, command, &mut data)
            .map_err(|e| io_error("read", command, e))?;
        // SAFETY: byte data transfers fill in the `byte` member.
        Ok(unsafe { data.byte })
    }

    fn write_byte_data(&self, command: u8, value: u8) -> busmux::Result<()> {
        let mut data = SmbusData { byte: value };
        self.transfer(I2C_SMBUS_WRITE, command, &mut data)
            .map_err(|e| io_error("write", command, e))
    }

    fn is_suspended(&self) -> bool {
        match &self.runtime_status {
            Some(path) => std::fs::read_to_string(path)
                .map(|status| is_suspended_status(&status))
                .unwrap_or(false),
            None => false,
        }
    }
}
