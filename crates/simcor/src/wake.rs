// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Interruptible poll interval.
//!
//! Engine loops sleep one poll interval between iterations. A stop request
//! wakes the sleeper instead of waiting for the interval to run out.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Wake notification for a polling loop.
#[derive(Debug, Default)]
pub struct PollTimer {
    /// Set by `wake()`, consumed by the next wait
    woken: AtomicBool,
    lock: Mutex<()>,
    condvar: Condvar,
}

impl PollTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interrupt the current (or next) wait.
    pub fn wake(&self) {
        let _guard = self.lock.lock();
        self.woken.store(true, Ordering::Release);
        self.condvar.notify_all();
    }

    /// Sleep for `interval` or until woken.
    ///
    /// Returns `true` if woken, `false` on timeout.
    pub fn wait(&self, interval: Duration) -> bool {
        if self.woken.swap(false, Ordering::Acquire) {
            return true;
        }

        let mut guard = self.lock.lock();
        // Double-check under the lock; wake() sets the flag while holding it
        if self.woken.swap(false, Ordering::Acquire) {
            return true;
        }
        let _ = self.condvar.wait_for(&mut guard, interval);
        self.woken.swap(false, Ordering::Acquire)
    }
}
