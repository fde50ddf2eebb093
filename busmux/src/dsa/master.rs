use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use super::ethtool::{EthtoolOps, PhyDevice, StatName, StringSet};
use crate::{
    attr::AttributeGroup,
    error::{Error, Result},
};

/// Payload size of a standard ethernet frame
pub const ETH_DATA_LEN: usize = 1500;

/// Hardware timestamping configuration carried by the timestamping requests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HwTstampConfig {
    pub tx_type: u32,
    pub rx_filter: u32,
}

/// Device control request addressed to a master device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoctlRequest {
    /// Read the timestamping configuration into the payload
    GetHwTstamp(HwTstampConfig),
    /// Apply the timestamping configuration in the payload
    SetHwTstamp(HwTstampConfig),
    Other(u32),
}

impl IoctlRequest {
    pub fn is_hwtstamp(&self) -> bool {
        matches!(
            self,
            IoctlRequest::GetHwTstamp(_) | IoctlRequest::SetHwTstamp(_)
        )
    }
}

/// Native operations of the driver behind a master device
pub trait NetDeviceOps: Send + Sync {
    fn change_mtu(&self, mtu: usize) -> Result<()>;

    /// Called when the device enters or leaves promiscuous mode
    fn set_promiscuous(&self, _enabled: bool) {}

    fn eth_ioctl(&self, _request: &mut IoctlRequest) -> Result<()> {
        Err(Error::Unsupported)
    }
}

/// Hook a switch tree installs on its master device to see device control
/// requests before the native driver does.
pub trait DsaNetdevOps: Send + Sync {
    fn eth_ioctl(&self, dev: &MasterDevice, request: &mut IoctlRequest) -> Result<()>;
}

struct MasterState {
    mtu: usize,
    up: bool,
    promiscuity: u32,
    ethtool_ops: Arc<dyn EthtoolOps>,
    dsa_ops: Option<Arc<dyn DsaNetdevOps>>,
    groups: Vec<Arc<dyn AttributeGroup>>,
}

/// The network device whose traffic carries the tagged frames of a switch
/// tree.
pub struct MasterDevice {
    name: String,
    driver: Arc<dyn NetDeviceOps>,
    phy: RwLock<Option<Arc<dyn PhyDevice>>>,
    state: Mutex<MasterState>,
}

impl core::fmt::Debug for MasterDevice {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.state();
        f.debug_struct("MasterDevice")
            .field("name", &self.name)
            .field("mtu", &state.mtu)
            .field("up", &state.up)
            .field("promiscuity", &state.promiscuity)
            .finish_non_exhaustive()
    }
}

impl MasterDevice {
    pub fn new(
        name: impl Into<String>,
        driver: Arc<dyn NetDeviceOps>,
        ethtool_ops: Arc<dyn EthtoolOps>,
    ) -> Self {
        Self {
            name: name.into(),
            driver,
            phy: RwLock::new(None),
            state: Mutex::new(MasterState {
                mtu: ETH_DATA_LEN,
                up: false,
                promiscuity: 0,
                ethtool_ops,
                dsa_ops: None,
                groups: Vec::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MasterState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn driver(&self) -> &Arc<dyn NetDeviceOps> {
        &self.driver
    }

    pub fn mtu(&self) -> usize {
        self.state().mtu
    }

    pub fn set_mtu(&self, mtu: usize) -> Result<()> {
        let mut state = self.state();
        self.driver.change_mtu(mtu)?;
        state.mtu = mtu;
        Ok(())
    }

    pub fn is_up(&self) -> bool {
        self.state().up
    }

    pub fn set_up(&self, up: bool) {
        self.state().up = up;
    }

    pub fn promiscuity(&self) -> u32 {
        self.state().promiscuity
    }

    /// Adjust the promiscuity counter by `delta`. The driver is told when the
    /// counter moves between zero and non-zero.
    pub fn set_promiscuity(&self, delta: i32) {
        let mut state = self.state();
        let old = state.promiscuity;
        let new = old.saturating_add_signed(delta);
        state.promiscuity = new;
        if (old == 0) != (new == 0) {
            log::debug!("{}: promiscuous mode {}", self.name, new != 0);
            self.driver.set_promiscuous(new != 0);
        }
    }

    pub fn phy(&self) -> Option<Arc<dyn PhyDevice>> {
        self.phy.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_phy(&self, phy: Option<Arc<dyn PhyDevice>>) {
        *self.phy.write().unwrap_or_else(|e| e.into_inner()) = phy;
    }

    /// The introspection operations currently installed
    pub fn ethtool_ops(&self) -> Arc<dyn EthtoolOps> {
        self.state().ethtool_ops.clone()
    }

    /// Install new introspection operations, returning the previous ones
    pub fn replace_ethtool_ops(&self, ops: Arc<dyn EthtoolOps>) -> Arc<dyn EthtoolOps> {
        std::mem::replace(&mut self.state().ethtool_ops, ops)
    }

    pub fn set_dsa_ops(&self, ops: Option<Arc<dyn DsaNetdevOps>>) {
        self.state().dsa_ops = ops;
    }

    pub fn has_dsa_ops(&self) -> bool {
        self.state().dsa_ops.is_some()
    }

    /// Dispatch a device control request, through the switch tree hook when
    /// one is installed.
    pub fn eth_ioctl(&self, request: &mut IoctlRequest) -> Result<()> {
        let hook = self.state().dsa_ops.clone();
        match hook {
            Some(hook) => hook.eth_ioctl(self, request),
            None => self.driver.eth_ioctl(request),
        }
    }

    /// Attach an attribute group. Fails with [`Error::Busy`] if a group with
    /// the same name is attached already.
    pub fn create_group(&self, group: Arc<dyn AttributeGroup>) -> Result<()> {
        let mut state = self.state();
        if state.groups.iter().any(|g| g.name() == group.name()) {
            return Err(Error::Busy);
        }
        state.groups.push(group);
        Ok(())
    }

    /// Detach the attribute group called `name`, if attached
    pub fn remove_group(&self, name: &str) {
        self.state().groups.retain(|g| g.name() != name);
    }

    pub fn group(&self, name: &str) -> Option<Arc<dyn AttributeGroup>> {
        self.state()
            .groups
            .iter()
            .find(|g| g.name() == name)
            .cloned()
    }

    pub fn group_names(&self) -> Vec<&'static str> {
        self.state().groups.iter().map(|g| g.name()).collect()
    }

    /// Length of the register dump of the installed operations
    pub fn regs_len(&self) -> Result<usize> {
        let ops = self.ethtool_ops();
        if !ops.capabilities().regs {
            return Err(Error::Unsupported);
        }
        ops.regs_len(self)
    }

    /// Register dump of the installed operations
    pub fn regs(&self) -> Result<Vec<u8>> {
        let ops = self.ethtool_ops();
        if !ops.capabilities().regs {
            return Err(Error::Unsupported);
        }
        let mut buf = vec![0; ops.regs_len(self)?];
        ops.regs(self, &mut buf)?;
        Ok(buf)
    }

    pub fn sset_count(&self, set: StringSet) -> Result<usize> {
        let ops = self.ethtool_ops();
        if !ops.capabilities().sset_count {
            return Err(Error::Unsupported);
        }
        ops.sset_count(self, set)
    }

    pub fn strings(&self, set: StringSet) -> Result<Vec<StatName>> {
        let ops = self.ethtool_ops();
        if !ops.capabilities().strings {
            return Err(Error::Unsupported);
        }
        let mut names = vec![StatName::EMPTY; self.sset_count(set)?];
        ops.strings(self, set, &mut names);
        Ok(names)
    }

    pub fn stats(&self, set: StringSet) -> Result<Vec<u64>> {
        let ops = self.ethtool_ops();
        let caps = ops.capabilities();
        let mut values = vec![0; self.sset_count(set)?];
        match set {
            StringSet::Stats if caps.stats => ops.stats(self, &mut values),
            StringSet::PhyStats if caps.phy_stats => ops.phy_stats(self, &mut values),
            _ => return Err(Error::Unsupported),
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeEthtool, FakeNic};

    fn master() -> (MasterDevice, Arc<FakeNic>) {
        let nic = Arc::new(FakeNic::default());
        let master = MasterDevice::new("eth0", nic.clone(), Arc::new(FakeEthtool::default()));
        (master, nic)
    }

    #[test]
    fn mtu_goes_through_driver() {
        let (master, nic) = master();
        assert_eq!(master.mtu(), ETH_DATA_LEN);

        master.set_mtu(1504).unwrap();
        assert_eq!(master.mtu(), 1504);
        assert_eq!(nic.mtu(), 1504);

        nic.fail_mtu(true);
        assert!(master.set_mtu(9000).is_err());
        assert_eq!(master.mtu(), 1504);
    }

    #[test]
    fn promiscuity_counts() {
        let (master, nic) = master();
        master.set_promiscuity(1);
        master.set_promiscuity(1);
        assert_eq!(master.promiscuity(), 2);
        assert!(nic.promiscuous());

        master.set_promiscuity(-1);
        assert!(nic.promiscuous());
        master.set_promiscuity(-1);
        assert!(!nic.promiscuous());
        assert_eq!(master.promiscuity(), 0);
    }

    #[test]
    fn ioctl_without_hook_goes_to_driver() {
        let (master, nic) = master();
        let mut request = IoctlRequest::Other(0x89a0);
        master.eth_ioctl(&mut request).unwrap();
        assert_eq!(nic.ioctls(), 1);
    }

    #[test]
    fn groups_are_unique() {
        let (master, _) = master();
        let group: Arc<dyn AttributeGroup> = Arc::new(crate::testing::FakeGroup("dsa"));
        master.create_group(group.clone()).unwrap();
        assert_eq!(master.create_group(group), Err(Error::Busy));
        assert_eq!(master.group_names(), vec!["dsa"]);

        master.remove_group("dsa");
        master.remove_group("dsa");
        assert!(master.group("dsa").is_none());
    }

    #[test]
    fn native_introspection() {
        let (master, _) = master();
        assert_eq!(master.sset_count(StringSet::Stats).unwrap(), 2);
        let names = master.strings(StringSet::Stats).unwrap();
        assert_eq!(names[0].as_str(), "rx_packets");
        assert_eq!(master.stats(StringSet::Stats).unwrap(), vec![100, 200]);
        assert_eq!(master.regs().unwrap(), vec![0xaa; 4]);
    }
}
