//! Assembly of the devices served by the daemon.
//!
//! The switch side is an in-memory emulation of a Broadcom style switch: a
//! paged register file holding the port VLAN masks and MIB counters, and a
//! tagging protocol slot per port. The master device is an emulated NIC with
//! the configured interface name.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
};

use busmux::{
    arbiter::BusArbiter,
    attr::AttributeGroup,
    dsa::{
        ethtool::{EthtoolCapabilities, EthtoolOps, StatName, StringSet},
        DebugAddress, HwTstampConfig, IoctlRequest, MasterDevice, MasterPortFacade,
        NetDeviceOps, PortType, RegisterWidth, SwitchCapabilities, SwitchOps, SwitchTree,
        TagProtocolId, TagProtocolSwitch, TagRegistry, IMP_PORT,
    },
    hwmon::Mcp9902,
};
use thiserror::Error;

use crate::{
    config::{Config, SensorConfig},
    smbus::LinuxSmbus,
};

/// Device name the sensor is served under
pub const SENSOR_DEVICE: &str = "mcp9902";

const PVLAN_PAGE: u8 = 0x31;
const MIB_PAGE_BASE: u8 = 0x20;
const PVLAN_ALL_PORTS: u64 = 0x1ff;
const MAX_MTU: usize = 9000;

const MIB_COUNTERS: [(&str, u8); 3] = [
    ("tx_octets", 0x00),
    ("rx_octets", 0x50),
    ("rx_discards", 0xc0),
];

#[derive(Default)]
struct EmulatedState {
    registers: HashMap<(u8, u8), u64>,
    latched: Option<DebugAddress>,
    protocols: HashMap<u8, TagProtocolId>,
}

/// Register level emulation of a switch chip
pub struct EmulatedSwitch {
    initial: TagProtocolId,
    hwtstamp_ports: HashSet<u8>,
    state: Mutex<EmulatedState>,
}

impl EmulatedSwitch {
    pub fn new(initial: TagProtocolId, hwtstamp_ports: HashSet<u8>) -> Self {
        Self {
            initial,
            hwtstamp_ports,
            state: Mutex::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, EmulatedState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn read(&self, page: u8, register: u8) -> u64 {
        let state = self.state();
        match state.registers.get(&(page, register)) {
            Some(value) => *value,
            None if page == PVLAN_PAGE => PVLAN_ALL_PORTS,
            None => 0,
        }
    }

    fn write(&self, page: u8, register: u8, value: u64) {
        self.state().registers.insert((page, register), value);
    }

    fn mib_page(port: u8) -> busmux::Result<u8> {
        MIB_PAGE_BASE
            .checked_add(port)
            .ok_or_else(|| busmux::Error::Io(format!("no mib page for port {port}")))
    }
}

fn mask(width: RegisterWidth, value: u64) -> u64 {
    value & width.max_value()
}

impl SwitchOps for EmulatedSwitch {
    fn capabilities(&self) -> SwitchCapabilities {
        SwitchCapabilities {
            change_tag_protocol: true,
            regs: true,
            sset_count: true,
            strings: true,
            stats: true,
            phy_stats: false,
            get_pvlan: true,
            change_pvlan: true,
            register_access: true,
        }
    }

    fn get_tag_protocol(&self, port: u8, _master: TagProtocolId) -> TagProtocolId {
        self.state()
            .protocols
            .get(&port)
            .copied()
            .unwrap_or(self.initial)
    }

    fn change_tag_protocol(&self, port: u8, protocol: TagProtocolId) -> busmux::Result<()> {
        log::debug!("emulated switch: port {port} tagging {protocol:?}");
        self.state().protocols.insert(port, protocol);
        Ok(())
    }

    fn regs_len(&self, _port: u8) -> busmux::Result<usize> {
        Ok(MIB_COUNTERS.len() * 8)
    }

    fn regs(&self, port: u8, buf: &mut [u8]) -> busmux::Result<()> {
        let page = Self::mib_page(port)?;
        for (chunk, (_, register)) in buf.chunks_exact_mut(8).zip(MIB_COUNTERS) {
            chunk.copy_from_slice(&self.read(page, register).to_ne_bytes());
        }
        Ok(())
    }

    fn sset_count(&self, _port: u8, set: StringSet) -> busmux::Result<usize> {
        Ok(match set {
            StringSet::Stats => MIB_COUNTERS.len(),
            _ => 0,
        })
    }

    fn strings(&self, _port: u8, set: StringSet, out: &mut [StatName]) {
        if set == StringSet::Stats {
            for (slot, (name, _)) in out.iter_mut().zip(MIB_COUNTERS) {
                *slot = StatName::new(name);
            }
        }
    }

    fn stats(&self, port: u8, out: &mut [u64]) {
        let Ok(page) = Self::mib_page(port) else {
            return;
        };
        for (slot, (_, register)) in out.iter_mut().zip(MIB_COUNTERS) {
            *slot = self.read(page, register);
        }
    }

    fn port_hwtstamp_get(&self, port: u8) -> busmux::Result<HwTstampConfig> {
        if self.hwtstamp_ports.contains(&port) {
            Ok(HwTstampConfig::default())
        } else {
            Err(busmux::Error::Unsupported)
        }
    }

    fn port_get_pvlan(&self, port: u8) -> busmux::Result<u16> {
        Ok(self.read(PVLAN_PAGE, port.wrapping_mul(2)) as u16)
    }

    fn port_change_pvlan(&self, port: u8, members: u16) -> busmux::Result<()> {
        self.write(PVLAN_PAGE, port.wrapping_mul(2), members as u64);
        Ok(())
    }

    fn setup_get_reg(&self, address: DebugAddress) -> busmux::Result<()> {
        self.state().latched = Some(address);
        Ok(())
    }

    fn get_reg(&self) -> busmux::Result<(u8, u64)> {
        let address = self
            .state()
            .latched
            .ok_or_else(|| busmux::Error::Io("no register latched".into()))?;
        let value = mask(address.width, self.read(address.page, address.register));
        Ok((address.width.into(), value))
    }

    fn set_reg(&self, address: DebugAddress, value: u64) -> busmux::Result<()> {
        self.write(address.page, address.register, mask(address.width, value));
        Ok(())
    }
}

/// Native driver of the emulated master device
#[derive(Default)]
pub struct EmulatedNic {
    hwtstamp: Mutex<HwTstampConfig>,
}

impl NetDeviceOps for EmulatedNic {
    fn change_mtu(&self, mtu: usize) -> busmux::Result<()> {
        if mtu > MAX_MTU {
            return Err(busmux::Error::InvalidArgument(format!(
                "mtu {mtu} exceeds {MAX_MTU}"
            )));
        }
        Ok(())
    }

    fn set_promiscuous(&self, enabled: bool) {
        log::debug!("emulated nic: promiscuous {enabled}");
    }

    fn eth_ioctl(&self, request: &mut IoctlRequest) -> busmux::Result<()> {
        let mut hwtstamp = self.hwtstamp.lock().unwrap_or_else(|e| e.into_inner());
        match request {
            IoctlRequest::GetHwTstamp(config) => *config = *hwtstamp,
            IoctlRequest::SetHwTstamp(config) => *hwtstamp = *config,
            IoctlRequest::Other(_) => return Err(busmux::Error::Unsupported),
        }
        Ok(())
    }
}

/// Native statistics of the emulated master device
pub struct EmulatedNicStats;

const NIC_COUNTERS: [&str; 2] = ["rx_packets", "tx_packets"];

impl EthtoolOps for EmulatedNicStats {
    fn capabilities(&self) -> EthtoolCapabilities {
        EthtoolCapabilities {
            sset_count: true,
            strings: true,
            stats: true,
            ..Default::default()
        }
    }

    fn sset_count(&self, _dev: &MasterDevice, set: StringSet) -> busmux::Result<usize> {
        Ok(match set {
            StringSet::Stats => NIC_COUNTERS.len(),
            _ => 0,
        })
    }

    fn strings(&self, _dev: &MasterDevice, set: StringSet, out: &mut [StatName]) {
        if set == StringSet::Stats {
            for (slot, name) in out.iter_mut().zip(NIC_COUNTERS) {
                *slot = StatName::new(name);
            }
        }
    }

    fn stats(&self, _dev: &MasterDevice, out: &mut [u64]) {
        out.fill(0);
    }
}

#[derive(Error, Debug)]
pub enum BoardError {
    #[error("unable to open sensor bus: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Bus(#[from] busmux::Error),
}

/// Everything the daemon serves
pub struct Board {
    arbiter: Arc<BusArbiter>,
    sensor: Option<Arc<dyn AttributeGroup>>,
    facade: MasterPortFacade,
}

impl Board {
    /// Build the board described by `config`, including the sensor on the
    /// configured i2c adapter.
    pub fn assemble(config: &Config) -> Result<Board, BoardError> {
        let arbiter = Arc::new(BusArbiter::new(config.arbiter.into()));
        let sensor = match &config.sensor {
            Some(sensor) => Some(open_sensor(sensor, arbiter.clone())?),
            None => None,
        };
        Board::new(config, arbiter, sensor)
    }

    /// Build the switch side of the board described by `config`, serving
    /// `sensor` next to it.
    pub fn new(
        config: &Config,
        arbiter: Arc<BusArbiter>,
        sensor: Option<Arc<dyn AttributeGroup>>,
    ) -> Result<Board, BoardError> {
        let switch_config = &config.switch;

        let registry = Arc::new(TagRegistry::new());
        for name in &switch_config.unavailable_protocols {
            let id = registry.find_by_name(name)?.id();
            registry.set_available(id, false);
        }
        let initial = registry.find_by_name(&switch_config.tag_protocol)?;
        let initial_id = initial.id();

        let hwtstamp_ports = switch_config
            .ports
            .iter()
            .filter(|p| p.hwtstamp)
            .map(|p| p.index)
            .collect();
        let switch = Arc::new(EmulatedSwitch::new(initial_id, hwtstamp_ports));

        let mut tree = SwitchTree::new(
            0,
            TagProtocolSwitch::new(registry.clone(), initial),
            arbiter.clone(),
        );
        let sw = tree.add_switch(switch);
        let mut cpu_port = None;
        for port in &switch_config.ports {
            let id = tree.add_port(sw, port.index, port.kind.into())?;
            if cpu_port.is_none() && PortType::from(port.kind) == PortType::Cpu {
                cpu_port = Some(id);
            }
        }
        let cpu_port =
            cpu_port.ok_or_else(|| busmux::Error::NotFound("cpu port".to_owned()))?;

        let master = Arc::new(MasterDevice::new(
            switch_config.master.clone(),
            Arc::new(EmulatedNic::default()),
            Arc::new(EmulatedNicStats),
        ));

        let facade = MasterPortFacade::setup_with(
            master,
            Arc::new(tree),
            cpu_port,
            switch_config.pvlan_listing.into(),
        )?;

        log::info!(
            "serving {} on {} (imp port {IMP_PORT})",
            protocol_name(&registry, initial_id),
            switch_config.master
        );

        Ok(Board {
            arbiter,
            sensor,
            facade,
        })
    }

    pub fn arbiter(&self) -> &Arc<BusArbiter> {
        &self.arbiter
    }

    pub fn master(&self) -> &Arc<MasterDevice> {
        self.facade.master()
    }

    pub fn facade(&self) -> &MasterPortFacade {
        &self.facade
    }

    /// Names of all devices with attribute groups
    pub fn devices(&self) -> Vec<String> {
        let mut devices = vec![self.master().name().to_owned()];
        if self.sensor.is_some() {
            devices.push(SENSOR_DEVICE.to_owned());
        }
        devices
    }

    /// Resolve the attribute group `group` of `device`
    pub fn group(&self, device: &str, group: &str) -> busmux::Result<Arc<dyn AttributeGroup>> {
        let found = if device == self.master().name() {
            self.master().group(group)
        } else if device == SENSOR_DEVICE {
            self.sensor.clone().filter(|s| s.name() == group)
        } else {
            return Err(busmux::Error::NotFound(format!("device {device}")));
        };
        found.ok_or_else(|| busmux::Error::NotFound(format!("group {device}/{group}")))
    }

    /// Tear down the switch side
    pub fn shutdown(self) {
        self.facade.teardown();
    }
}

fn protocol_name(registry: &TagRegistry, id: TagProtocolId) -> &'static str {
    registry.protocol(id).map(|p| p.name).unwrap_or("?")
}

fn open_sensor(
    config: &SensorConfig,
    arbiter: Arc<BusArbiter>,
) -> Result<Arc<dyn AttributeGroup>, BoardError> {
    let device = LinuxSmbus::open(&config.bus, config.address)?;
    let sensor = Mcp9902::new(device, arbiter, config.cache_config());
    sensor.detect()?;
    sensor.init()?;
    log::info!(
        "found mcp9902 at {:#04x} on {}",
        config.address,
        config.bus.display()
    );
    Ok(Arc::new(sensor))
}

#[cfg(test)]
mod tests {
    use busmux::dsa::ETH_DATA_LEN;

    use super::*;

    pub(crate) const CONFIG: &str = r#"
[arbiter]
settle-jitter-min = 0
settle-jitter-max = 0
settle-fixed = 0

[switch]
master = "eth0"
unavailable-protocols = ["edsa"]
ports = [
    { index = 0, kind = "user" },
    { index = 1, kind = "user", hwtstamp = true },
    { index = 5, kind = "unused" },
    { index = 8, kind = "cpu" },
]
"#;

    fn board() -> Board {
        let config: Config = toml::from_str(CONFIG).unwrap();
        let arbiter = Arc::new(BusArbiter::new(config.arbiter.into()));
        Board::new(&config, arbiter, None).unwrap()
    }

    #[test]
    fn assembled_board() {
        let board = board();
        assert_eq!(board.devices(), vec!["eth0".to_owned()]);
        assert_eq!(board.master().mtu(), ETH_DATA_LEN + 4);
        let dsa = board.group("eth0", "dsa").unwrap();
        assert_eq!(dsa.read("tagging_cpu").unwrap(), "brcm\n");
        assert_eq!(dsa.read("tagging_imp").unwrap(), "brcm\n");

        assert!(matches!(
            board.group("eth1", "dsa"),
            Err(busmux::Error::NotFound(_))
        ));
        assert!(matches!(
            board.group(SENSOR_DEVICE, "hwmon"),
            Err(busmux::Error::NotFound(_))
        ));
    }

    #[test]
    fn unavailable_protocol() {
        let board = board();
        let dsa = board.group("eth0", "dsa").unwrap();
        assert!(matches!(
            dsa.write("tagging_cpu", "edsa\n"),
            Err(busmux::Error::NotFound(_))
        ));
        dsa.write("tagging_cpu", "brcm-legacy\n").unwrap();
        assert_eq!(dsa.read("tagging_cpu").unwrap(), "brcm-legacy\n");
        assert_eq!(board.master().mtu(), ETH_DATA_LEN + 6);
    }

    #[test]
    fn emulated_registers() {
        let board = board();
        let dsa = board.group("eth0", "dsa").unwrap();

        assert_eq!(dsa.read("pvlan").unwrap(), "0:1ff 1:1ff 8:1ff \n");
        dsa.write("pvlan", "1:003\n").unwrap();
        dsa.write("rdreg", "31:2:2\n").unwrap();
        assert_eq!(dsa.read("rdreg").unwrap(), "0003\n");

        dsa.write("wrreg", "28:0:8:1000\n").unwrap();
        let mut values = vec![0; 5];
        board
            .facade()
            .get_stats(StringSet::Stats, &mut values)
            .unwrap();
        assert_eq!(values, [0, 0, 0x1000, 0, 0]);
    }

    #[test]
    fn hwtstamp_ports_block_master_timestamping() {
        let board = board();
        let mut request = IoctlRequest::GetHwTstamp(HwTstampConfig::default());
        assert_eq!(
            board.master().eth_ioctl(&mut request),
            Err(busmux::Error::Busy)
        );
    }

    #[test]
    fn shutdown_restores_master() {
        let board = board();
        let master = board.master().clone();
        board.shutdown();
        assert_eq!(master.mtu(), ETH_DATA_LEN);
        assert!(master.group("dsa").is_none());
    }
}
