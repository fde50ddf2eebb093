//! Arbitration of the clock lines shared between the register bus and the
//! switch bus.
//!
//! On the boards this library targets, the clock line of the sensor bus and
//! the clock line of the switch management bus are shorted together. Only one
//! of the two buses may run a transaction at any time, and after every
//! transaction the line needs a short while to settle before the other bus
//! may drive it. A single [`BusArbiter`] per process serializes every access
//! to either bus.
//!
//! ```
//! use std::sync::Arc;
//! use busmux::arbiter::BusArbiter;
//! use busmux::config::ArbiterConfig;
//!
//! let arbiter = Arc::new(BusArbiter::new(ArbiterConfig::IMMEDIATE));
//! let holder = arbiter.register_holder();
//!
//! let guard = arbiter.acquire(holder);
//! // ... run bus transactions ...
//! guard.release();
//! assert!(!arbiter.is_held());
//! ```

use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Condvar, Mutex, MutexGuard,
};

use rand::Rng;

use crate::config::ArbiterConfig;

/// Opaque identity of a bus client, used for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HolderId(u32);

impl core::fmt::Display for HolderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "holder#{}", self.0)
    }
}

/// Capability required for the privileged paths of the arbiter.
///
/// Only the operator control channel can construct one, so bus clients have
/// no way of skipping the settle time.
#[derive(Debug)]
pub struct OperatorToken {
    _private: (),
}

impl OperatorToken {
    pub(crate) fn new() -> Self {
        Self { _private: () }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Holding {
    holder: HolderId,
    ticket: u64,
}

#[derive(Debug, Default)]
struct ArbiterState {
    current: Option<Holding>,
    next_ticket: u64,
}

/// Process wide mutual exclusion over the shared clock lines.
///
/// Acquisition blocks without a timeout. Every release sleeps the configured
/// settle time before the next holder is let through; only
/// [`force_release`](Self::force_release) skips it.
#[derive(Debug)]
pub struct BusArbiter {
    config: ArbiterConfig,
    state: Mutex<ArbiterState>,
    released: Condvar,
    short_mode: AtomicBool,
    next_holder: AtomicU32,
}

impl BusArbiter {
    pub fn new(config: ArbiterConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ArbiterState::default()),
            released: Condvar::new(),
            short_mode: AtomicBool::new(false),
            next_holder: AtomicU32::new(0),
        }
    }

    pub fn config(&self) -> &ArbiterConfig {
        &self.config
    }

    /// Hand out a fresh identity for a bus client
    pub fn register_holder(&self) -> HolderId {
        HolderId(self.next_holder.fetch_add(1, Ordering::Relaxed))
    }

    fn lock_state(&self) -> MutexGuard<'_, ArbiterState> {
        // The state is a plain value that is never left half-updated, so a
        // panicking holder does not invalidate it.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Block until `holder` is the sole user of the shared lines.
    pub fn acquire(&self, holder: HolderId) -> BusGuard<'_> {
        let mut state = self.lock_state();
        while state.current.is_some() {
            state = self
                .released
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }

        let ticket = state.next_ticket;
        state.next_ticket = state.next_ticket.wrapping_add(1);
        state.current = Some(Holding { holder, ticket });
        drop(state);

        log::trace!("{holder} acquired the shared bus");

        BusGuard {
            arbiter: self,
            holding: Holding { holder, ticket },
            suspended: false,
            done: false,
        }
    }

    /// Whether anyone currently holds the shared lines
    pub fn is_held(&self) -> bool {
        self.lock_state().current.is_some()
    }

    /// Identity of the current holder, if any
    pub fn holder(&self) -> Option<HolderId> {
        self.lock_state().current.map(|h| h.holder)
    }

    fn release(&self, holding: Holding, suspended: bool) {
        if !suspended {
            let jitter = self.sample_jitter();
            if !jitter.is_zero() {
                std::thread::sleep(jitter);
            }
        }
        if !self.config.settle_fixed.is_zero() {
            std::thread::sleep(self.config.settle_fixed);
        }

        let mut state = self.lock_state();
        if state.current == Some(holding) {
            state.current = None;
            drop(state);
            self.released.notify_one();
            log::trace!("{} released the shared bus", holding.holder);
        } else {
            // The holding was torn down by a forced release in the meantime
            log::warn!(
                "{} released the shared bus after it was forcibly released",
                holding.holder
            );
        }
    }

    fn sample_jitter(&self) -> core::time::Duration {
        let min = self.config.settle_jitter_min;
        let max = self.config.settle_jitter_max;
        if max > min {
            rand::thread_rng().gen_range(min..=max)
        } else {
            min
        }
    }

    /// Clear holdership immediately, without any settle time.
    ///
    /// This is the stuck-bus escape hatch of the operator channel. A
    /// transaction of a legitimate holder that is still in flight may be
    /// corrupted.
    pub fn force_release(&self, _token: &OperatorToken) {
        let mut state = self.lock_state();
        if let Some(holding) = state.current.take() {
            drop(state);
            self.released.notify_one();
            log::warn!("shared bus forcibly released from {}", holding.holder);
        }
    }

    /// Whether the operator declared the clock lines to be shorted. This is a
    /// declaration only: acquisition and the settle delay apply regardless.
    pub fn short_mode(&self) -> bool {
        self.short_mode.load(Ordering::Acquire)
    }

    /// Change the clock-short declaration.
    ///
    /// The flag is flipped while holding the bus, so no client transaction
    /// overlaps the change, and the bus is then handed back through the
    /// forced release path.
    pub fn set_short_mode(&self, holder: HolderId, enabled: bool, token: &OperatorToken) {
        let guard = self.acquire(holder);
        self.short_mode.store(enabled, Ordering::Release);
        log::info!("clock-short mode {}", if enabled { "enabled" } else { "disabled" });
        guard.force_release(token);
    }
}

/// Proof of holdership of the shared lines. Dropping it releases the bus,
/// including the settle time.
#[derive(Debug)]
#[must_use = "the bus is released as soon as the guard is dropped"]
pub struct BusGuard<'a> {
    arbiter: &'a BusArbiter,
    holding: Holding,
    suspended: bool,
    done: bool,
}

impl<'a> BusGuard<'a> {
    pub fn holder(&self) -> HolderId {
        self.holding.holder
    }

    /// Report the runtime power state of the bus the holder used. The random
    /// part of the settle time is skipped for suspended buses.
    pub fn set_suspended(&mut self, suspended: bool) {
        self.suspended = suspended;
    }

    /// Release the bus, observing the settle time
    pub fn release(self) {
        drop(self)
    }

    /// Release the bus without settle time
    pub fn force_release(mut self, _token: &OperatorToken) {
        self.done = true;
        let mut state = self.arbiter.lock_state();
        if state.current == Some(self.holding) {
            state.current = None;
            drop(state);
            self.arbiter.released.notify_one();
            log::debug!(
                "{} handed back the shared bus without settle time",
                self.holding.holder
            );
        }
    }
}

impl<'a> Drop for BusGuard<'a> {
    fn drop(&mut self) {
        if !self.done {
            self.done = true;
            self.arbiter.release(self.holding, self.suspended);
        }
    }
}
