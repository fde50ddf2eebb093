use std::sync::Arc;

use super::{
    debug::DebugAddress,
    ethtool::{StatName, StringSet},
    master::HwTstampConfig,
    tag::TagProtocolId,
    tagging::TagProtocolSwitch,
};
use crate::{
    arbiter::{BusArbiter, HolderId},
    error::{Error, Result},
};

/// Most CPU ports a single tree can have
pub const MAX_CPU_PORTS: usize = 8;

/// Which of the optional [`SwitchOps`] a switch driver implements
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwitchCapabilities {
    pub change_tag_protocol: bool,
    pub regs: bool,
    pub sset_count: bool,
    pub strings: bool,
    pub stats: bool,
    pub phy_stats: bool,
    pub get_pvlan: bool,
    pub change_pvlan: bool,
    pub register_access: bool,
}

/// Driver of one switch chip. Port arguments are switch local port indices.
///
/// Optional operations default to [`Error::Unsupported`]; drivers advertise
/// what they implement through [`capabilities`](Self::capabilities).
pub trait SwitchOps: Send + Sync {
    fn capabilities(&self) -> SwitchCapabilities;

    /// Protocol the switch currently uses on `port`
    fn get_tag_protocol(&self, port: u8, master: TagProtocolId) -> TagProtocolId;

    fn change_tag_protocol(&self, _port: u8, _protocol: TagProtocolId) -> Result<()> {
        Err(Error::Unsupported)
    }

    fn regs_len(&self, _port: u8) -> Result<usize> {
        Err(Error::Unsupported)
    }

    fn regs(&self, _port: u8, _buf: &mut [u8]) -> Result<()> {
        Err(Error::Unsupported)
    }

    fn sset_count(&self, _port: u8, _set: StringSet) -> Result<usize> {
        Err(Error::Unsupported)
    }

    fn strings(&self, _port: u8, _set: StringSet, _out: &mut [StatName]) {}

    fn stats(&self, _port: u8, _out: &mut [u64]) {}

    fn phy_stats(&self, _port: u8, _out: &mut [u64]) {}

    fn port_hwtstamp_get(&self, _port: u8) -> Result<HwTstampConfig> {
        Err(Error::Unsupported)
    }

    fn port_get_pvlan(&self, _port: u8) -> Result<u16> {
        Err(Error::Unsupported)
    }

    fn port_change_pvlan(&self, _port: u8, _members: u16) -> Result<()> {
        Err(Error::Unsupported)
    }

    /// Latch the register a following [`get_reg`](Self::get_reg) reads
    fn setup_get_reg(&self, _address: DebugAddress) -> Result<()> {
        Err(Error::Unsupported)
    }

    /// Read the latched register, as its width in bytes and its value
    fn get_reg(&self) -> Result<(u8, u64)> {
        Err(Error::Unsupported)
    }

    fn set_reg(&self, _address: DebugAddress, _value: u64) -> Result<()> {
        Err(Error::Unsupported)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortType {
    Unused,
    Cpu,
    Dsa,
    User,
}

/// Index of a port in its [`SwitchTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DsaPort {
    pub switch: usize,
    pub index: u8,
    pub kind: PortType,
}

/// One or more switches sharing a master device, and their ports.
///
/// The tree is the single bus client for switch hardware: every driver call
/// that touches registers is made through [`on_bus`](Self::on_bus).
pub struct SwitchTree {
    index: u32,
    switches: Vec<Arc<dyn SwitchOps>>,
    ports: Vec<DsaPort>,
    tagging: TagProtocolSwitch,
    arbiter: Arc<BusArbiter>,
    holder: HolderId,
}

impl core::fmt::Debug for SwitchTree {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SwitchTree")
            .field("index", &self.index)
            .field("switches", &self.switches.len())
            .field("ports", &self.ports)
            .field("tagging", &self.tagging)
            .finish()
    }
}

impl SwitchTree {
    pub fn new(index: u32, tagging: TagProtocolSwitch, arbiter: Arc<BusArbiter>) -> Self {
        let holder = arbiter.register_holder();
        Self {
            index,
            switches: Vec::new(),
            ports: Vec::new(),
            tagging,
            arbiter,
            holder,
        }
    }

    /// Add a switch, returning its index in the tree
    pub fn add_switch(&mut self, ops: Arc<dyn SwitchOps>) -> usize {
        self.switches.push(ops);
        self.switches.len() - 1
    }

    pub fn add_port(&mut self, switch: usize, index: u8, kind: PortType) -> Result<PortId> {
        if switch >= self.switches.len() {
            return Err(Error::NotFound(format!("switch {switch}")));
        }
        if kind == PortType::Cpu && self.cpu_ports().count() >= MAX_CPU_PORTS {
            return Err(Error::invalid(format!(
                "a tree supports at most {MAX_CPU_PORTS} cpu ports"
            )));
        }
        self.ports.push(DsaPort {
            switch,
            index,
            kind,
        });
        Ok(PortId(self.ports.len() - 1))
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn arbiter(&self) -> &Arc<BusArbiter> {
        &self.arbiter
    }

    pub fn tagging(&self) -> &TagProtocolSwitch {
        &self.tagging
    }

    pub fn port(&self, id: PortId) -> &DsaPort {
        &self.ports[id.0]
    }

    pub fn ports(&self) -> impl Iterator<Item = (PortId, &DsaPort)> {
        self.ports.iter().enumerate().map(|(i, p)| (PortId(i), p))
    }

    pub fn cpu_ports(&self) -> impl Iterator<Item = (PortId, &DsaPort)> {
        self.ports().filter(|(_, p)| p.kind == PortType::Cpu)
    }

    /// First port in use with switch local index `index`
    pub fn find_port(&self, index: u8) -> Option<PortId> {
        self.ports()
            .find(|(_, p)| p.index == index && p.kind != PortType::Unused)
            .map(|(id, _)| id)
    }

    pub fn switch_ops(&self, id: PortId) -> &Arc<dyn SwitchOps> {
        &self.switches[self.port(id).switch]
    }

    /// Run a driver call as one arbitrated bus transaction
    pub fn on_bus<T>(&self, f: impl FnOnce() -> T) -> T {
        let guard = self.arbiter.acquire(self.holder);
        let result = f();
        guard.release();
        result
    }

    /// Whether any port of the tree does hardware timestamping
    pub fn any_port_supports_hwtstamp(&self) -> bool {
        self.ports().any(|(id, port)| {
            let ops = self.switch_ops(id);
            !matches!(
                self.on_bus(|| ops.port_hwtstamp_get(port.index)),
                Err(Error::Unsupported)
            )
        })
    }
}
