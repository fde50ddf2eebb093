//! Fake bus devices and drivers shared by the unit tests.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use crate::{
    arbiter::BusArbiter,
    attr::{Attribute, AttributeGroup},
    config::ArbiterConfig,
    dsa::{
        ethtool::{EthtoolCapabilities, EthtoolOps, PhyDevice, StatName, StringSet},
        DebugAddress, HwTstampConfig, IoctlRequest, MasterDevice, NetDeviceOps, PortType,
        SwitchCapabilities, SwitchOps, SwitchTree, TagProtocolId, TagProtocolSwitch, TagRegistry,
    },
    error::{Error, Result},
    hwmon::SmbusDevice,
};

/// A 256 byte register file behind an SMBus
pub(crate) struct FakeSmbus {
    registers: Mutex<[u8; 256]>,
    reads: AtomicUsize,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl Default for FakeSmbus {
    fn default() -> Self {
        Self {
            registers: Mutex::new([0; 256]),
            reads: AtomicUsize::new(0),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }
}

impl FakeSmbus {
    pub fn set(&self, command: u8, value: u8) {
        self.registers.lock().unwrap()[command as usize] = value;
    }

    pub fn get(&self, command: u8) -> u8 {
        self.registers.lock().unwrap()[command as usize]
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl SmbusDevice for FakeSmbus {
    fn read_byte_data(&self, command: u8) -> Result<u8> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::Io(format!("read {command:#04x}")));
        }
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.get(command))
    }

    fn write_byte_data(&self, command: u8, value: u8) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Io(format!("write {command:#04x}")));
        }
        self.set(command, value);
        Ok(())
    }
}

/// Native driver of a master device
pub(crate) struct FakeNic {
    mtu: AtomicUsize,
    fail_mtu: AtomicBool,
    promiscuous: AtomicBool,
    ioctls: AtomicUsize,
    has_ioctl: AtomicBool,
}

impl Default for FakeNic {
    fn default() -> Self {
        Self {
            mtu: AtomicUsize::new(1500),
            fail_mtu: AtomicBool::new(false),
            promiscuous: AtomicBool::new(false),
            ioctls: AtomicUsize::new(0),
            has_ioctl: AtomicBool::new(true),
        }
    }
}

impl FakeNic {
    pub fn mtu(&self) -> usize {
        self.mtu.load(Ordering::SeqCst)
    }

    pub fn fail_mtu(&self, fail: bool) {
        self.fail_mtu.store(fail, Ordering::SeqCst);
    }

    pub fn promiscuous(&self) -> bool {
        self.promiscuous.load(Ordering::SeqCst)
    }

    pub fn ioctls(&self) -> usize {
        self.ioctls.load(Ordering::SeqCst)
    }

    pub fn without_ioctl(&self) {
        self.has_ioctl.store(false, Ordering::SeqCst);
    }
}

impl NetDeviceOps for FakeNic {
    fn change_mtu(&self, mtu: usize) -> Result<()> {
        if self.fail_mtu.load(Ordering::SeqCst) {
            return Err(Error::invalid(format!("mtu {mtu}")));
        }
        self.mtu.store(mtu, Ordering::SeqCst);
        Ok(())
    }

    fn set_promiscuous(&self, enabled: bool) {
        self.promiscuous.store(enabled, Ordering::SeqCst);
    }

    fn eth_ioctl(&self, _request: &mut IoctlRequest) -> Result<()> {
        if !self.has_ioctl.load(Ordering::SeqCst) {
            return Err(Error::Unsupported);
        }
        self.ioctls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Native introspection of a master device: four bytes of registers and two
/// statistics.
pub(crate) struct FakeEthtool {
    capabilities: EthtoolCapabilities,
}

impl Default for FakeEthtool {
    fn default() -> Self {
        Self::with_capabilities(EthtoolCapabilities {
            phy_stats: false,
            ..EthtoolCapabilities::ALL
        })
    }
}

impl FakeEthtool {
    pub fn with_capabilities(capabilities: EthtoolCapabilities) -> Self {
        Self { capabilities }
    }
}

impl EthtoolOps for FakeEthtool {
    fn capabilities(&self) -> EthtoolCapabilities {
        self.capabilities
    }

    fn regs_len(&self, _dev: &MasterDevice) -> Result<usize> {
        Ok(4)
    }

    fn regs(&self, _dev: &MasterDevice, buf: &mut [u8]) -> Result<()> {
        buf.fill(0xaa);
        Ok(())
    }

    fn sset_count(&self, _dev: &MasterDevice, set: StringSet) -> Result<usize> {
        Ok(match set {
            StringSet::Stats => 2,
            _ => 0,
        })
    }

    fn strings(&self, _dev: &MasterDevice, set: StringSet, out: &mut [StatName]) {
        if set == StringSet::Stats {
            fill_names(out, &["rx_packets", "tx_packets"]);
        }
    }

    fn stats(&self, _dev: &MasterDevice, out: &mut [u64]) {
        fill_values(out, &[100, 200]);
    }
}

pub(crate) struct FakePhy;

impl PhyDevice for FakePhy {
    fn stat_count(&self) -> Result<usize> {
        Ok(1)
    }

    fn strings(&self, out: &mut [StatName]) {
        fill_names(out, &["phy_rx_errors"]);
    }

    fn stats(&self, out: &mut [u64]) -> Result<()> {
        fill_values(out, &[7]);
        Ok(())
    }
}

/// A PHY that counts its statistics but fails to read them
pub(crate) struct FailingPhy;

impl PhyDevice for FailingPhy {
    fn stat_count(&self) -> Result<usize> {
        Ok(1)
    }

    fn strings(&self, out: &mut [StatName]) {
        fill_names(out, &["phy_rx_errors"]);
    }

    fn stats(&self, _out: &mut [u64]) -> Result<()> {
        Err(Error::Io("phy unreachable".into()))
    }
}

/// An empty attribute group
pub(crate) struct FakeGroup(pub &'static str);

impl AttributeGroup for FakeGroup {
    fn name(&self) -> &'static str {
        self.0
    }

    fn attributes(&self) -> &'static [Attribute] {
        &[]
    }

    fn show(&self, _attribute: &Attribute) -> Result<String> {
        Err(Error::PermissionDenied)
    }

    fn store(&self, _attribute: &Attribute, _input: &str) -> Result<usize> {
        Err(Error::PermissionDenied)
    }
}

fn fill_names(out: &mut [StatName], names: &[&str]) {
    for (slot, name) in out.iter_mut().zip(names) {
        *slot = StatName::new(name);
    }
}

fn fill_values(out: &mut [u64], values: &[u64]) {
    for (slot, value) in out.iter_mut().zip(values) {
        *slot = *value;
    }
}

#[derive(Default)]
struct SwitchState {
    tag_protocols: HashMap<u8, TagProtocolId>,
    tag_changes: usize,
    fail_tag_change_on: Option<u8>,
    fail_regs: bool,
    hwtstamp: bool,
    pvlan: HashMap<u8, u16>,
    registers: HashMap<(u8, u8), u64>,
    latched: Option<DebugAddress>,
}

/// A switch with eight bytes of port registers, three port statistics and one
/// PHY statistic.
pub(crate) struct FakeSwitch {
    capabilities: Mutex<SwitchCapabilities>,
    state: Mutex<SwitchState>,
}

impl Default for FakeSwitch {
    fn default() -> Self {
        Self {
            capabilities: Mutex::new(SwitchCapabilities {
                change_tag_protocol: true,
                regs: true,
                sset_count: true,
                strings: true,
                stats: true,
                phy_stats: true,
                get_pvlan: true,
                change_pvlan: true,
                register_access: true,
            }),
            state: Mutex::default(),
        }
    }
}

impl FakeSwitch {
    fn state(&self) -> std::sync::MutexGuard<'_, SwitchState> {
        self.state.lock().unwrap()
    }

    pub fn without_tag_change(&self) {
        self.capabilities.lock().unwrap().change_tag_protocol = false;
    }

    pub fn without_regs(&self) {
        self.capabilities.lock().unwrap().regs = false;
    }

    pub fn without_pvlan(&self) {
        let mut caps = self.capabilities.lock().unwrap();
        caps.get_pvlan = false;
        caps.change_pvlan = false;
    }

    pub fn without_register_access(&self) {
        self.capabilities.lock().unwrap().register_access = false;
    }

    pub fn fail_tag_change_on(&self, port: u8) {
        self.state().fail_tag_change_on = Some(port);
    }

    pub fn fail_regs(&self, fail: bool) {
        self.state().fail_regs = fail;
    }

    pub fn set_hwtstamp(&self, enabled: bool) {
        self.state().hwtstamp = enabled;
    }

    pub fn tag_protocol(&self, port: u8) -> Option<TagProtocolId> {
        self.state().tag_protocols.get(&port).copied()
    }

    pub fn tag_changes(&self) -> usize {
        self.state().tag_changes
    }

    pub fn set_pvlan(&self, port: u8, members: u16) {
        self.state().pvlan.insert(port, members);
    }

    pub fn pvlan(&self, port: u8) -> u16 {
        self.state().pvlan.get(&port).copied().unwrap_or(0x1ff)
    }

    pub fn set_register(&self, page: u8, register: u8, value: u64) {
        self.state().registers.insert((page, register), value);
    }

    pub fn register(&self, page: u8, register: u8) -> Option<u64> {
        self.state().registers.get(&(page, register)).copied()
    }
}

impl SwitchOps for FakeSwitch {
    fn capabilities(&self) -> SwitchCapabilities {
        *self.capabilities.lock().unwrap()
    }

    fn get_tag_protocol(&self, port: u8, _master: TagProtocolId) -> TagProtocolId {
        self.tag_protocol(port).unwrap_or(TagProtocolId::Brcm)
    }

    fn change_tag_protocol(&self, port: u8, protocol: TagProtocolId) -> Result<()> {
        let mut state = self.state();
        if state.fail_tag_change_on == Some(port) {
            return Err(Error::Io(format!("port {port}")));
        }
        state.tag_protocols.insert(port, protocol);
        state.tag_changes += 1;
        Ok(())
    }

    fn regs_len(&self, _port: u8) -> Result<usize> {
        if self.state().fail_regs {
            return Err(Error::Io("regs".into()));
        }
        Ok(8)
    }

    fn regs(&self, _port: u8, buf: &mut [u8]) -> Result<()> {
        if self.state().fail_regs {
            return Err(Error::Io("regs".into()));
        }
        buf.fill(0x55);
        Ok(())
    }

    fn sset_count(&self, _port: u8, set: StringSet) -> Result<usize> {
        Ok(match set {
            StringSet::Stats => 3,
            StringSet::PhyStats => 1,
            _ => 0,
        })
    }

    fn strings(&self, _port: u8, set: StringSet, out: &mut [StatName]) {
        match set {
            StringSet::Stats => fill_names(
                out,
                &[
                    "in_good_octets",
                    "out_good_octets",
                    "a_very_long_statistic_name_that_fills",
                ],
            ),
            StringSet::PhyStats => fill_names(out, &["phy_crc_errors"]),
            _ => {}
        }
    }

    fn stats(&self, _port: u8, out: &mut [u64]) {
        fill_values(out, &[10, 20, 30]);
    }

    fn phy_stats(&self, _port: u8, out: &mut [u64]) {
        fill_values(out, &[9]);
    }

    fn port_hwtstamp_get(&self, _port: u8) -> Result<HwTstampConfig> {
        if self.state().hwtstamp {
            Ok(HwTstampConfig::default())
        } else {
            Err(Error::Unsupported)
        }
    }

    fn port_get_pvlan(&self, port: u8) -> Result<u16> {
        Ok(self.pvlan(port))
    }

    fn port_change_pvlan(&self, port: u8, members: u16) -> Result<()> {
        self.set_pvlan(port, members);
        Ok(())
    }

    fn setup_get_reg(&self, address: DebugAddress) -> Result<()> {
        if address.page == 0xff {
            return Err(Error::Io(format!("no page {:#04x}", address.page)));
        }
        self.state().latched = Some(address);
        Ok(())
    }

    fn get_reg(&self) -> Result<(u8, u64)> {
        let state = self.state();
        let address = state
            .latched
            .ok_or_else(|| Error::Io("no register latched".into()))?;
        let value = state
            .registers
            .get(&(address.page, address.register))
            .copied()
            .unwrap_or(0);
        Ok((address.width.into(), value))
    }

    fn set_reg(&self, address: DebugAddress, value: u64) -> Result<()> {
        if address.page == 0xff {
            return Err(Error::Io(format!("no page {:#04x}", address.page)));
        }
        self.set_register(address.page, address.register, value);
        Ok(())
    }
}

/// A single switch tree on the `brcm` protocol: user ports 0 to 4, an unused
/// port 5 and the given CPU ports.
pub(crate) fn test_tree_with_cpu_ports(
    switch: FakeSwitch,
    cpu_ports: &[u8],
) -> (Arc<SwitchTree>, Arc<FakeSwitch>, Arc<TagRegistry>) {
    let registry = Arc::new(TagRegistry::new());
    let initial = registry.get(TagProtocolId::Brcm).unwrap();
    let arbiter = Arc::new(BusArbiter::new(ArbiterConfig::IMMEDIATE));
    let mut tree = SwitchTree::new(0, TagProtocolSwitch::new(registry.clone(), initial), arbiter);

    let switch = Arc::new(switch);
    let sw = tree.add_switch(switch.clone());
    for index in 0..5 {
        tree.add_port(sw, index, PortType::User).unwrap();
    }
    tree.add_port(sw, 5, PortType::Unused).unwrap();
    for &index in cpu_ports {
        tree.add_port(sw, index, PortType::Cpu).unwrap();
    }

    (Arc::new(tree), switch, registry)
}

pub(crate) fn test_tree(switch: FakeSwitch) -> (Arc<SwitchTree>, Arc<FakeSwitch>, Arc<TagRegistry>) {
    test_tree_with_cpu_ports(switch, &[8])
}

pub(crate) fn test_master_with(ethtool: FakeEthtool) -> (MasterDevice, Arc<FakeNic>) {
    let nic = Arc::new(FakeNic::default());
    let master = MasterDevice::new("eth0", nic.clone(), Arc::new(ethtool));
    (master, nic)
}

pub(crate) fn test_master() -> (MasterDevice, Arc<FakeNic>) {
    test_master_with(FakeEthtool::default())
}
