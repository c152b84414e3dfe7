//! Multi-bit wait/wake signal shared by the client and the write thread
//!
//! The flag word is an atomic bitmask. `wake` ORs bits in and notifies every
//! waiter; `wait` blocks until any requested bit is set, then clears exactly
//! the bits it reports. Bits nobody waits for stay set until a matching wait
//! consumes them, so a wake that arrives before the waiter parks is never lost.
//!
//! ```text
//!  client                         write thread
//!  ──────                         ────────────
//!  wake(NOT_EMPTY) ────────────►  wait(NOT_EMPTY | STAND_BY_REQUEST | EXIT_REQUEST)
//!  wait(NOT_FULL)  ◄────────────  wake(NOT_FULL)
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Data (or a command) is available for the write thread
pub const NOT_EMPTY: u32 = 1 << 0;
/// The write thread consumed a command and posted a status reply
pub const NOT_FULL: u32 = 1 << 1;
/// Release the sink and enter standby
pub const STAND_BY_REQUEST: u32 = 1 << 20;
/// Terminate the write thread
pub const EXIT_REQUEST: u32 = 1 << 21;

/// Bits the write thread waits on
pub const WORKER_WAIT_MASK: u32 = NOT_EMPTY | STAND_BY_REQUEST | EXIT_REQUEST;

/// Shared event flag word with blocking waits
#[derive(Debug, Default)]
pub struct EventFlag {
    word: AtomicU32,
    /// Parking lot for waiters; the word itself is never read under it alone
    lock: Mutex<()>,
    cond: Condvar,
}

impl EventFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `mask` and wake all waiters. Never blocks beyond the parking lock.
    pub fn wake(&self, mask: u32) {
        if mask == 0 {
            return;
        }
        self.word.fetch_or(mask, Ordering::AcqRel);
        // Taking the lock orders this notify after any waiter that already
        // checked the word and is about to park.
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.cond.notify_all();
    }

    /// Block until a bit in `mask` is set; returns and clears the set subset
    pub fn wait(&self, mask: u32) -> u32 {
        if mask == 0 {
            return 0;
        }
        let mut guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            let triggered = self.consume(mask);
            if triggered != 0 {
                return triggered;
            }
            guard = self
                .cond
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`, returning 0
    pub fn wait_timeout(&self, mask: u32, timeout: Duration) -> u32 {
        if mask == 0 {
            return 0;
        }
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            let triggered = self.consume(mask);
            if triggered != 0 {
                return triggered;
            }
            let now = Instant::now();
            if now >= deadline {
                return 0;
            }
            guard = self
                .cond
                .wait_timeout(guard, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }

    /// Snapshot of the pending bits
    #[cfg(test)]
    pub(crate) fn pending(&self) -> u32 {
        self.word.load(Ordering::Acquire)
    }

    fn consume(&self, mask: u32) -> u32 {
        self.word.fetch_and(!mask, Ordering::AcqRel) & mask
    }
}
