//! Merged introspection surface of a master device and the switch CPU port
//! behind it.
//!
//! Setting up the facade replaces the master's introspection operations with
//! ones that append the switch's data to the master's own, installs a device
//! control hook, and attaches the `dsa` attribute group. Teardown undoes all
//! of it in reverse order.

use std::sync::Arc;

use super::{
    attrs::{DsaAttributes, PvlanListing},
    ethtool::{
        set_dump_header_len, write_dump_header, EthtoolCapabilities, EthtoolOps, PhyDevice,
        StatName, StringSet, DRVINFO_LEN, REGS_HEADER_LEN,
    },
    master::{DsaNetdevOps, IoctlRequest, MasterDevice, ETH_DATA_LEN},
    switch::{PortId, PortType, SwitchOps, SwitchTree},
};
use crate::{
    attr::AttributeGroup,
    error::{Error, Result},
};

struct FacadeOps {
    orig: Arc<dyn EthtoolOps>,
    tree: Arc<SwitchTree>,
    cpu_port: PortId,
}

impl FacadeOps {
    fn switch(&self) -> &Arc<dyn SwitchOps> {
        self.tree.switch_ops(self.cpu_port)
    }

    fn port_index(&self) -> u8 {
        self.tree.port(self.cpu_port).index
    }

    /// The PHY answers for the master's PHY statistics when the master's own
    /// operations do not.
    fn phy_source(&self, dev: &MasterDevice) -> Option<Arc<dyn PhyDevice>> {
        if self.orig.capabilities().phy_stats {
            None
        } else {
            dev.phy()
        }
    }

    /// Number of entries the master contributes to `set`. Failures count as
    /// zero.
    fn master_count(&self, dev: &MasterDevice, set: StringSet) -> usize {
        if set == StringSet::PhyStats {
            if let Some(phy) = self.phy_source(dev) {
                return phy.stat_count().unwrap_or(0);
            }
        }
        if self.orig.capabilities().sset_count {
            self.orig.sset_count(dev, set).unwrap_or(0)
        } else {
            0
        }
    }

    fn switch_count(&self, set: StringSet) -> usize {
        let switch = self.switch();
        if !switch.capabilities().sset_count {
            return 0;
        }
        self.tree
            .on_bus(|| switch.sset_count(self.port_index(), set))
            .unwrap_or(0)
    }
}

impl EthtoolOps for FacadeOps {
    fn capabilities(&self) -> EthtoolCapabilities {
        EthtoolCapabilities::ALL
    }

    fn regs_len(&self, dev: &MasterDevice) -> Result<usize> {
        let mut len = DRVINFO_LEN + REGS_HEADER_LEN;

        if self.orig.capabilities().regs {
            len += self.orig.regs_len(dev)?;
        }

        let switch = self.switch();
        if switch.capabilities().regs {
            len += self.tree.on_bus(|| switch.regs_len(self.port_index()))?;
        }

        Ok(len)
    }

    fn regs(&self, dev: &MasterDevice, buf: &mut [u8]) -> Result<()> {
        get_diagnostic_dump(self, dev, buf);
        Ok(())
    }

    fn sset_count(&self, dev: &MasterDevice, set: StringSet) -> Result<usize> {
        Ok(self.master_count(dev, set) + self.switch_count(set))
    }

    fn strings(&self, dev: &MasterDevice, set: StringSet, out: &mut [StatName]) {
        let mut count = 0;
        let phy = match set {
            StringSet::PhyStats => self.phy_source(dev),
            _ => None,
        };
        if let Some(phy) = phy {
            if let Ok(n) = phy.stat_count() {
                count = n.min(out.len());
                phy.strings(&mut out[..count]);
            }
        } else if self.orig.capabilities().sset_count && self.orig.capabilities().strings {
            count = self.orig.sset_count(dev, set).unwrap_or(0).min(out.len());
            self.orig.strings(dev, set, &mut out[..count]);
        }

        let switch = self.switch();
        let caps = switch.capabilities();
        if !caps.strings {
            return;
        }
        let port = self.port_index();
        let tail = &mut out[count..];
        self.tree.on_bus(|| switch.strings(port, set, &mut *tail));

        if !caps.sset_count {
            return;
        }
        let Ok(switch_count) = self.tree.on_bus(|| switch.sset_count(port, set)) else {
            return;
        };
        for name in tail.iter_mut().take(switch_count) {
            *name = name.with_port_prefix(port);
        }
    }

    fn stats(&self, dev: &MasterDevice, out: &mut [u64]) {
        let mut count = 0;
        let caps = self.orig.capabilities();
        if caps.sset_count && caps.stats {
            count = self
                .orig
                .sset_count(dev, StringSet::Stats)
                .unwrap_or(0)
                .min(out.len());
            self.orig.stats(dev, &mut out[..count]);
        }

        let switch = self.switch();
        if switch.capabilities().stats {
            let port = self.port_index();
            let tail = &mut out[count..];
            self.tree.on_bus(|| switch.stats(port, &mut *tail));
        }
    }

    fn phy_stats(&self, dev: &MasterDevice, out: &mut [u64]) {
        let mut count = 0;
        if let Some(phy) = self.phy_source(dev) {
            if let Ok(n) = phy.stat_count() {
                count = n.min(out.len());
                // the slots stay reserved so the switch entries keep their
                // offset
                if let Err(e) = phy.stats(&mut out[..count]) {
                    log::debug!("{}: phy statistics failed: {e}", dev.name());
                    out[..count].fill(0);
                }
            }
        } else {
            let caps = self.orig.capabilities();
            if caps.sset_count && caps.phy_stats {
                count = self
                    .orig
                    .sset_count(dev, StringSet::PhyStats)
                    .unwrap_or(0)
                    .min(out.len());
                self.orig.phy_stats(dev, &mut out[..count]);
            }
        }

        let switch = self.switch();
        if switch.capabilities().phy_stats {
            let port = self.port_index();
            let tail = &mut out[count..];
            self.tree.on_bus(|| switch.phy_stats(port, &mut *tail));
        }
    }
}

impl DsaNetdevOps for FacadeOps {
    fn eth_ioctl(&self, dev: &MasterDevice, request: &mut IoctlRequest) -> Result<()> {
        // Timestamps taken by the master would be wrong once the switch
        // timestamps too.
        if request.is_hwtstamp() && self.tree.any_port_supports_hwtstamp() {
            return Err(Error::Busy);
        }
        dev.driver().eth_ioctl(request)
    }
}

/// Fill `buf` with the master's register dump, the driver information
/// record, the register dump header and the switch port's register dump, in
/// that order. Returns how many bytes of `buf` are valid: a failing provider
/// ends the dump early.
fn get_diagnostic_dump(ops: &FacadeOps, dev: &MasterDevice, buf: &mut [u8]) -> usize {
    let mut offset = 0;

    if ops.orig.capabilities().regs {
        let Ok(len) = ops.orig.regs_len(dev) else {
            return offset;
        };
        let Some(segment) = buf.get_mut(..len) else {
            return offset;
        };
        if let Err(e) = ops.orig.regs(dev, segment) {
            log::debug!("{}: register dump failed: {e}", dev.name());
            return offset;
        }
        offset = len;
    }

    let Some(header) = buf.get_mut(offset..offset + DRVINFO_LEN + REGS_HEADER_LEN) else {
        return offset;
    };
    write_dump_header(header);
    let header_at = offset + DRVINFO_LEN;
    offset += DRVINFO_LEN + REGS_HEADER_LEN;

    let switch = ops.switch();
    if switch.capabilities().regs {
        let port = ops.port_index();
        let Ok(len) = ops.tree.on_bus(|| switch.regs_len(port)) else {
            return offset;
        };
        set_dump_header_len(&mut buf[header_at..], len as u32);
        let Some(segment) = buf.get_mut(offset..offset + len) else {
            return offset;
        };
        if let Err(e) = ops.tree.on_bus(|| switch.regs(port, segment)) {
            log::debug!("port {port}: register dump failed: {e}");
            return offset;
        }
        offset += len;
    }

    offset
}

/// The introspection facade installed on a master device.
///
/// Dropping the facade tears it down.
pub struct MasterPortFacade {
    master: Arc<MasterDevice>,
    tree: Arc<SwitchTree>,
    ops: Arc<FacadeOps>,
    group: &'static str,
    promisc_applied: bool,
    torn_down: bool,
}

impl core::fmt::Debug for MasterPortFacade {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MasterPortFacade")
            .field("master", &self.master.name())
            .field("cpu_port", &self.ops.cpu_port)
            .field("promisc_applied", &self.promisc_applied)
            .finish()
    }
}

impl MasterPortFacade {
    /// Install the facade on `master` for the CPU port `cpu_port` of `tree`.
    pub fn setup(
        master: Arc<MasterDevice>,
        tree: Arc<SwitchTree>,
        cpu_port: PortId,
    ) -> Result<Self> {
        Self::setup_with(master, tree, cpu_port, PvlanListing::default())
    }

    pub fn setup_with(
        master: Arc<MasterDevice>,
        tree: Arc<SwitchTree>,
        cpu_port: PortId,
        pvlan_listing: PvlanListing,
    ) -> Result<Self> {
        if tree.port(cpu_port).kind != PortType::Cpu {
            return Err(Error::invalid(format!(
                "port {} is not a cpu port",
                tree.port(cpu_port).index
            )));
        }

        let protocol = tree.tagging().active();
        let mtu = ETH_DATA_LEN + protocol.overhead;
        if let Err(e) = master.set_mtu(mtu) {
            log::warn!("unable to set mtu {mtu} on {}: {e}", master.name());
        }

        let promisc_applied = protocol.promisc_on_master;
        if promisc_applied {
            master.set_promiscuity(1);
        }

        let ops = Arc::new(FacadeOps {
            orig: master.ethtool_ops(),
            tree: tree.clone(),
            cpu_port,
        });
        master.replace_ethtool_ops(ops.clone());
        master.set_dsa_ops(Some(ops.clone()));

        let attrs = Arc::new(
            DsaAttributes::new(&master, tree.clone(), cpu_port).with_pvlan_listing(pvlan_listing),
        );
        let group = attrs.name();
        if let Err(e) = master.create_group(attrs) {
            master.set_dsa_ops(None);
            master.replace_ethtool_ops(ops.orig.clone());
            if promisc_applied {
                master.set_promiscuity(-1);
            }
            if let Err(e) = master.set_mtu(ETH_DATA_LEN) {
                log::debug!("unable to reset mtu on {}: {e}", master.name());
            }
            return Err(e);
        }

        log::info!(
            "{}: tracking cpu port {} of switch tree {}",
            master.name(),
            tree.port(cpu_port).index,
            tree.index()
        );

        Ok(Self {
            master,
            tree,
            ops,
            group,
            promisc_applied,
            torn_down: false,
        })
    }

    pub fn master(&self) -> &Arc<MasterDevice> {
        &self.master
    }

    pub fn tree(&self) -> &Arc<SwitchTree> {
        &self.tree
    }

    pub fn cpu_port(&self) -> PortId {
        self.ops.cpu_port
    }

    /// Remove the facade, restoring the master device to its native state
    pub fn teardown(mut self) {
        self.undo();
    }

    fn undo(&mut self) {
        if std::mem::replace(&mut self.torn_down, true) {
            return;
        }
        self.master.remove_group(self.group);
        self.master.set_dsa_ops(None);
        self.master.replace_ethtool_ops(self.ops.orig.clone());
        if self.promisc_applied {
            self.master.set_promiscuity(-1);
        }
        if let Err(e) = self.master.set_mtu(ETH_DATA_LEN) {
            log::debug!("unable to reset mtu on {}: {e}", self.master.name());
        }
        log::info!("{}: released cpu port", self.master.name());
    }

    /// Forward a promiscuity change of a user port, if the tagging protocol
    /// needs the master in promiscuous mode.
    pub fn set_promiscuity(&self, delta: i32) {
        if self.tree.tagging().active().promisc_on_master {
            self.master.set_promiscuity(delta);
        }
    }

    pub fn get_diagnostic_dump_length(&self) -> Result<usize> {
        self.ops.regs_len(&self.master)
    }

    /// See [`EthtoolOps::regs`]. Returns the number of valid bytes.
    pub fn get_diagnostic_dump(&self, buf: &mut [u8]) -> usize {
        get_diagnostic_dump(&self.ops, &self.master, buf)
    }

    pub fn get_stat_count(&self, set: StringSet) -> usize {
        self.ops.master_count(&self.master, set) + self.ops.switch_count(set)
    }

    pub fn get_stats(&self, set: StringSet, out: &mut [u64]) -> Result<()> {
        match set {
            StringSet::Stats => self.ops.stats(&self.master, out),
            StringSet::PhyStats => self.ops.phy_stats(&self.master, out),
            _ => return Err(Error::Unsupported),
        }
        Ok(())
    }

    pub fn get_strings(&self, set: StringSet, out: &mut [StatName]) {
        self.ops.strings(&self.master, set, out)
    }

    pub fn ioctl(&self, request: &mut IoctlRequest) -> Result<()> {
        self.ops.eth_ioctl(&self.master, request)
    }
}

impl Drop for MasterPortFacade {
    fn drop(&mut self) {
        self.undo();
    }
}
