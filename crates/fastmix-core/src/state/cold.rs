//! Cold-idle gate
//!
//! When the controller knows the mixer will be quiet for a while, hot idling
//! (waking every millisecond) wastes power. The cold gate lets the worker
//! surrender the CPU entirely: the controller arms the gate and publishes
//! `COLD_IDLE`; the worker decrements the gate's counter once for that epoch
//! and, if the controller has not already released it, parks until woken.
//!
//! The protocol is the futex one-shot, expressed with a counter plus
//! wait/notify: the wait side decrements and sleeps only if the result went
//! negative, the wake side sets the counter positive and signals. The worker
//! parks at most once per cold epoch no matter how many `COLD_IDLE`
//! snapshots it observes.

use std::sync::atomic::{AtomicI32, Ordering};

use parking_lot::{Condvar, Mutex};

/// One-shot decrement-and-wait primitive backing cold idle
///
/// This is the only place the worker is allowed to block.
pub struct ColdGate {
    /// The futex word: 0 = armed, negative = a waiter went to sleep,
    /// positive = released
    value: AtomicI32,
    lock: Mutex<()>,
    cond: Condvar,
}

impl ColdGate {
    /// Create a gate in the released state
    pub fn new() -> Self {
        Self {
            value: AtomicI32::new(1),
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    /// Arm the gate for a new cold epoch (controller side)
    ///
    /// Call before publishing a `COLD_IDLE` snapshot with a new `cold_gen`.
    pub fn arm(&self) {
        self.value.store(0, Ordering::Release);
    }

    /// Decrement once and park if the gate was not already released
    /// (worker side)
    ///
    /// Must be called exactly once per cold epoch; the command state machine
    /// guarantees this by keying on `cold_gen`.
    pub fn wait(&self) {
        let old = self.value.fetch_sub(1, Ordering::AcqRel);
        if old <= 0 {
            let mut guard = self.lock.lock();
            while self.value.load(Ordering::Acquire) < 0 {
                self.cond.wait(&mut guard);
            }
        }
    }

    /// Release the gate and wake a parked worker (controller side)
    ///
    /// Idempotent; safe to call whether or not the worker is parked.
    pub fn open(&self) {
        self.value.store(1, Ordering::Release);
        // Take the lock so the store cannot slip between the waiter's
        // predicate check and its sleep
        let _guard = self.lock.lock();
        self.cond.notify_all();
    }

    /// Current value of the gate word (diagnostic)
    pub fn value(&self) -> i32 {
        self.value.load(Ordering::Acquire)
    }
}

impl Default for ColdGate {
    fn default() -> Self {
        Self::new()
    }
}
