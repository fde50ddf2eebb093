use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Instant,
};

use getset::CopyGetters;

use super::SmbusDevice;
use crate::{
    arbiter::{BusArbiter, HolderId},
    config::CacheConfig,
    error::{Error, Result},
};

/// Cached raw register values of one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct RegisterSnapshot<const N: usize> {
    /// Raw register values, indexed by logical register slot
    values: [u8; N],
    /// Raw status (alarm) register
    alarms: u8,
    /// When the last successful refresh completed
    last_refreshed: Option<Instant>,
    /// False until the first successful refresh
    valid: bool,
}

impl<const N: usize> RegisterSnapshot<N> {
    fn empty() -> Self {
        Self {
            values: [0; N],
            alarms: 0,
            last_refreshed: None,
            valid: false,
        }
    }

    /// Raw value of a logical register slot, `None` past the register map
    pub fn value(&self, slot: usize) -> Option<u8> {
        self.values.get(slot).copied()
    }

    fn is_fresh(&self, now: Instant, config: &CacheConfig) -> bool {
        match self.last_refreshed {
            Some(at) if self.valid => now.saturating_duration_since(at) < config.refresh_interval,
            _ => false,
        }
    }
}

/// Time bounded cache over a fixed register map of one device.
///
/// The mutex around the snapshot doubles as the per-device update lock. It
/// is always taken before the bus arbiter and held for the complete refresh
/// or write, so concurrent readers never trigger duplicate refreshes and never
/// observe half-updated values.
#[derive(Debug)]
pub struct RegisterCache<D, const N: usize> {
    device: D,
    arbiter: Arc<BusArbiter>,
    holder: HolderId,
    config: CacheConfig,
    read_map: [u8; N],
    status_register: u8,
    snapshot: Mutex<RegisterSnapshot<N>>,
}

impl<D: SmbusDevice, const N: usize> RegisterCache<D, N> {
    /// Create an empty cache. `read_map` holds the register address of every
    /// logical slot, `status_register` the address of the alarm register.
    pub fn new(
        device: D,
        arbiter: Arc<BusArbiter>,
        config: CacheConfig,
        read_map: [u8; N],
        status_register: u8,
    ) -> Self {
        let holder = arbiter.register_holder();
        Self {
            device,
            arbiter,
            holder,
            config,
            read_map,
            status_register,
            snapshot: Mutex::new(RegisterSnapshot::empty()),
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn update_lock(&self) -> MutexGuard<'_, RegisterSnapshot<N>> {
        // A snapshot is only ever replaced as a whole, so it stays consistent
        // even if a holder panicked.
        self.snapshot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` as a single arbitrated bus transaction. The caller must hold
    /// the update lock.
    fn on_bus<T>(&self, f: impl FnOnce(&D) -> Result<T>) -> Result<T> {
        let mut guard = self.arbiter.acquire(self.holder);
        let result = f(&self.device);
        guard.set_suspended(self.device.is_suspended());
        guard.release();
        result
    }

    /// Run `f` as a single arbitrated transaction outside of the cached
    /// register set, e.g. for identification or initialisation.
    pub fn transaction<T>(&self, f: impl FnOnce(&D) -> Result<T>) -> Result<T> {
        let _update = self.update_lock();
        self.on_bus(f)
    }

    /// The current snapshot, without refreshing it
    pub fn snapshot(&self) -> RegisterSnapshot<N> {
        *self.update_lock()
    }

    /// Bring the cache up to date if it is stale or was never populated, and
    /// return the resulting snapshot.
    ///
    /// On a bus error the previous snapshot is kept and the error returned.
    pub fn refresh(&self) -> Result<RegisterSnapshot<N>> {
        let mut snapshot = self.update_lock();
        if snapshot.is_fresh(Instant::now(), &self.config) {
            return Ok(*snapshot);
        }

        log::debug!("updating register cache of {}", self.holder);

        let mut values = [0u8; N];
        let mut alarms = 0u8;
        for _ in 0..self.config.read_bursts.max(1) {
            self.on_bus(|device| {
                for (value, command) in values.iter_mut().zip(self.read_map) {
                    *value = device.read_byte_data(command)?;
                }
                alarms = device.read_byte_data(self.status_register)?;
                Ok(())
            })?;
        }

        *snapshot = RegisterSnapshot {
            values,
            alarms,
            last_refreshed: Some(Instant::now()),
            valid: true,
        };

        Ok(*snapshot)
    }

    /// Write `value` to register `command` and record it as the cached value
    /// of `slot`. There is no read-back; on a bus error the cache is left
    /// untouched.
    pub fn write(&self, slot: usize, command: u8, value: u8) -> Result<()> {
        if slot >= N {
            return Err(Error::InvalidArgument(format!(
                "register slot {slot} outside a map of {N}"
            )));
        }
        let mut snapshot = self.update_lock();
        self.on_bus(|device| device.write_byte_data(command, value))?;
        snapshot.values[slot] = value;
        Ok(())
    }
}
