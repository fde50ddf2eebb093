//! Introspection operations of a network device: register dumps, statistics
//! and their names.

use super::master::MasterDevice;
use crate::error::{Error, Result};

/// Width of every statistic name record
pub const ETH_GSTRING_LEN: usize = 32;
/// Size of the driver information record in a concatenated register dump
pub const DRVINFO_LEN: usize = 196;
/// Size of the register dump header that follows the driver information
pub const REGS_HEADER_LEN: usize = 12;

const DRVINFO_DRIVER_OFFSET: usize = 4;
const DRVINFO_DRIVER_LEN: usize = 32;
const REGS_HEADER_LEN_OFFSET: usize = 8;

/// Driver name recorded in the driver information record
pub const DSA_DRIVER_NAME: &str = "dsa";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StringSet {
    Test,
    Stats,
    PrivFlags,
    PhyStats,
}

/// A fixed width, NUL padded statistic name.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct StatName([u8; ETH_GSTRING_LEN]);

impl StatName {
    pub const EMPTY: StatName = StatName([0; ETH_GSTRING_LEN]);

    /// Build a record from `name`, truncated to the record width
    pub fn new(name: &str) -> Self {
        let mut out = [0u8; ETH_GSTRING_LEN];
        let len = name.len().min(ETH_GSTRING_LEN);
        out[..len].copy_from_slice(&name.as_bytes()[..len]);
        StatName(out)
    }

    pub fn as_bytes(&self) -> &[u8; ETH_GSTRING_LEN] {
        &self.0
    }

    /// Text up to the first NUL
    pub fn as_str(&self) -> std::borrow::Cow<'_, str> {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(ETH_GSTRING_LEN);
        String::from_utf8_lossy(&self.0[..end])
    }

    /// Prefix the name with `pNN_`, where `NN` is the two digit port index.
    /// The prefix is always four bytes; the record width does not change, so
    /// the tail of a long name is cut off.
    pub fn with_port_prefix(&self, port: u8) -> Self {
        let mut out = [0u8; ETH_GSTRING_LEN];
        let digits = format!("{port:02}");
        out[0] = b'p';
        out[1..3].copy_from_slice(&digits.as_bytes()[..2]);
        out[3] = b'_';
        out[4..].copy_from_slice(&self.0[..ETH_GSTRING_LEN - 4]);
        StatName(out)
    }
}

impl Default for StatName {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl core::fmt::Debug for StatName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "StatName({:?})", self.as_str())
    }
}

impl core::fmt::Display for StatName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.as_str())
    }
}

/// Which of the optional [`EthtoolOps`] a provider implements
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EthtoolCapabilities {
    pub regs: bool,
    pub sset_count: bool,
    pub strings: bool,
    pub stats: bool,
    pub phy_stats: bool,
}

impl EthtoolCapabilities {
    pub const ALL: EthtoolCapabilities = EthtoolCapabilities {
        regs: true,
        sset_count: true,
        strings: true,
        stats: true,
        phy_stats: true,
    };
}

/// Introspection operations installed on a [`MasterDevice`].
///
/// Every operation is optional. Providers advertise what they implement via
/// [`capabilities`](Self::capabilities); the defaults fail with
/// [`Error::Unsupported`].
pub trait EthtoolOps: Send + Sync {
    fn capabilities(&self) -> EthtoolCapabilities;

    fn regs_len(&self, _dev: &MasterDevice) -> Result<usize> {
        Err(Error::Unsupported)
    }

    /// Fill `buf`, which is exactly [`regs_len`](Self::regs_len) bytes
    fn regs(&self, _dev: &MasterDevice, _buf: &mut [u8]) -> Result<()> {
        Err(Error::Unsupported)
    }

    fn sset_count(&self, _dev: &MasterDevice, _set: StringSet) -> Result<usize> {
        Err(Error::Unsupported)
    }

    fn strings(&self, _dev: &MasterDevice, _set: StringSet, _out: &mut [StatName]) {}

    fn stats(&self, _dev: &MasterDevice, _out: &mut [u64]) {}

    fn phy_stats(&self, _dev: &MasterDevice, _out: &mut [u64]) {}
}

/// Statistics provided by the PHY attached to a device
pub trait PhyDevice: Send + Sync {
    fn stat_count(&self) -> Result<usize>;

    fn strings(&self, out: &mut [StatName]);

    fn stats(&self, out: &mut [u64]) -> Result<()>;
}

/// Write the driver information record and an empty register dump header
/// into `buf`, which must be at least `DRVINFO_LEN + REGS_HEADER_LEN` bytes.
pub(crate) fn write_dump_header(buf: &mut [u8]) {
    buf[..DRVINFO_LEN + REGS_HEADER_LEN].fill(0);
    let name = DSA_DRIVER_NAME.as_bytes();
    let len = name.len().min(DRVINFO_DRIVER_LEN - 1);
    buf[DRVINFO_DRIVER_OFFSET..DRVINFO_DRIVER_OFFSET + len].copy_from_slice(&name[..len]);
}

/// Record the length of the register dump that follows the header
pub(crate) fn set_dump_header_len(header: &mut [u8], len: u32) {
    header[REGS_HEADER_LEN_OFFSET..REGS_HEADER_LEN_OFFSET + 4].copy_from_slice(&len.to_ne_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_fixed_width() {
        let name = StatName::new("rx_packets");
        assert_eq!(name.as_str(), "rx_packets");
        assert_eq!(name.as_bytes()[10..], [0; 22]);

        let long = StatName::new("0123456789012345678901234567890123456789");
        assert_eq!(long.as_str(), "01234567890123456789012345678901");
    }

    #[test]
    fn port_prefix() {
        let name = StatName::new("in_good_octets").with_port_prefix(8);
        assert_eq!(name.as_str(), "p08_in_good_octets");

        let name = StatName::new("tx_packets").with_port_prefix(123);
        assert_eq!(&name.as_str()[..4], "p12_");

        let long = StatName::new("abcdefghijklmnopqrstuvwxyz012345").with_port_prefix(3);
        assert_eq!(long.as_str(), "p03_abcdefghijklmnopqrstuvwxyz01");
    }

    #[test]
    fn dump_header_layout() {
        let mut buf = [0xffu8; DRVINFO_LEN + REGS_HEADER_LEN];
        write_dump_header(&mut buf);
        assert_eq!(&buf[..4], &[0; 4]);
        assert_eq!(&buf[4..8], b"dsa\0");
        assert!(buf[8..].iter().all(|&b| b == 0));

        set_dump_header_len(&mut buf[DRVINFO_LEN..], 0x40);
        assert_eq!(
            &buf[DRVINFO_LEN + 8..DRVINFO_LEN + 12],
            &0x40u32.to_ne_bytes()
        );
    }
}
