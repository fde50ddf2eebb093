use std::sync::{Arc, Mutex, MutexGuard};

use arrayvec::ArrayVec;

use super::{
    master::{MasterDevice, ETH_DATA_LEN},
    switch::{PortId, SwitchTree, MAX_CPU_PORTS},
    tag::{TagProtocol, TagRef, TagRegistry},
};
use crate::error::{Error, Result};

/// Switch local index of the internal management port, which carries the
/// CPU traffic of Broadcom style switches.
pub const IMP_PORT: u8 = 8;

/// Owner of the tagging protocol a tree uses on its CPU ports.
///
/// Exactly one protocol is active at any time, and the tree holds exactly one
/// reference to it. A change either succeeds on every CPU port or leaves the
/// tree on the old protocol.
pub struct TagProtocolSwitch {
    registry: Arc<TagRegistry>,
    active: Mutex<TagRef>,
}

impl core::fmt::Debug for TagProtocolSwitch {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TagProtocolSwitch")
            .field("active", &self.active().name)
            .finish()
    }
}

impl TagProtocolSwitch {
    pub fn new(registry: Arc<TagRegistry>, initial: TagRef) -> Self {
        Self {
            registry,
            active: Mutex::new(initial),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TagRef> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn registry(&self) -> &Arc<TagRegistry> {
        &self.registry
    }

    /// The active protocol
    pub fn active(&self) -> TagProtocol {
        *self.lock().protocol()
    }

    /// Switch to the protocol called `name`.
    ///
    /// `apply` programs the hardware, given the new and the old protocol. It
    /// must either succeed completely or undo its own partial work. Selecting
    /// the active protocol again is a no-op and never calls `apply`.
    pub fn change(
        &self,
        name: &str,
        apply: impl FnOnce(&TagProtocol, &TagProtocol) -> Result<()>,
    ) -> Result<()> {
        let new = self.registry.find_by_name(name)?;
        let mut active = self.lock();
        if new.id() == active.id() {
            return Ok(());
        }

        apply(new.protocol(), active.protocol())?;

        log::info!(
            "tagging protocol changed from {} to {}",
            active.protocol().name,
            new.protocol().name
        );
        let _old = std::mem::replace(&mut *active, new);
        Ok(())
    }
}

impl SwitchTree {
    /// Change the tagging protocol of every CPU port of the tree.
    ///
    /// Refused with [`Error::Busy`] while `master` is up. When a port
    /// rejects the new protocol, the ports already changed are put back on
    /// the old one. On success the MTU of `master` is adapted to the tag
    /// overhead of the new protocol.
    pub fn change_tag_protocol(&self, name: &str, master: &MasterDevice) -> Result<()> {
        self.tagging()
            .change(name, |new, old| self.apply_tag_protocol(master, new, old))
    }

    fn apply_tag_protocol(
        &self,
        master: &MasterDevice,
        new: &TagProtocol,
        old: &TagProtocol,
    ) -> Result<()> {
        if master.is_up() {
            return Err(Error::Busy);
        }

        let mut changed: ArrayVec<PortId, MAX_CPU_PORTS> = ArrayVec::new();
        let cpu_ports: ArrayVec<PortId, MAX_CPU_PORTS> =
            self.cpu_ports().map(|(id, _)| id).collect();

        for id in cpu_ports {
            let port = self.port(id);
            let ops = self.switch_ops(id);
            let result = if ops.capabilities().change_tag_protocol {
                self.on_bus(|| ops.change_tag_protocol(port.index, new.id))
            } else {
                Err(Error::Unsupported)
            };

            if let Err(e) = result {
                log::warn!(
                    "port {} refused tagging protocol {}: {e}",
                    port.index,
                    new.name
                );
                self.restore_tag_protocol(&changed, old);
                return Err(e);
            }
            changed.push(id);
        }

        let mtu = ETH_DATA_LEN + new.overhead;
        if let Err(e) = master.set_mtu(mtu) {
            log::warn!("unable to set mtu {mtu} on {}: {e}", master.name());
        }

        Ok(())
    }

    fn restore_tag_protocol(&self, changed: &[PortId], old: &TagProtocol) {
        for &id in changed.iter().rev() {
            let port = self.port(id);
            let ops = self.switch_ops(id);
            if let Err(e) = self.on_bus(|| ops.change_tag_protocol(port.index, old.id)) {
                log::error!(
                    "unable to restore tagging protocol {} on port {}: {e}",
                    old.name,
                    port.index
                );
            }
        }
    }

    /// Protocol the switch of `cpu_port` runs on its management port
    pub fn cpu_port_protocol(&self, cpu_port: PortId) -> Result<TagProtocol> {
        let ops = self.switch_ops(cpu_port);
        let master_protocol = self.tagging().active().id;
        let id = self.on_bus(|| ops.get_tag_protocol(IMP_PORT, master_protocol));
        self.tagging()
            .registry()
            .protocol(id)
            .ok_or_else(|| Error::NotFound(format!("tag protocol {id:?}")))
    }

    /// Program the management port of the switch of `cpu_port` directly,
    /// bypassing the tree wide state.
    pub fn force_cpu_port_protocol(&self, cpu_port: PortId, name: &str) -> Result<()> {
        let protocol = *self.tagging().registry().find_by_name(name)?.protocol();
        let ops = self.switch_ops(cpu_port);
        if !ops.capabilities().change_tag_protocol {
            return Err(Error::Unsupported);
        }
        self.on_bus(|| ops.change_tag_protocol(IMP_PORT, protocol.id))
    }
}
