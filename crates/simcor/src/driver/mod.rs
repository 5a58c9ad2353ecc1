// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Engine drivers.
//!
//! A driver owns one processor and its state tables on a dedicated thread:
//! execute the current state once, sleep one poll interval, repeat. When a
//! transaction reaches TRANSACTION_DONE the driver archives it, starts a fresh
//! one and carries on until stopped.

//!
//! Finished transactions are kept for the handle in a bounded backlog of
//! [`FINISHED_BACKLOG`] entries; once full, the oldest one is dropped.

mod broadcast;
mod session;

pub use broadcast::{BroadcastDriver, BroadcastHandle};
pub use session::{SessionDriver, SessionHandle, SessionRole};

use crossbeam::channel::{Receiver, Sender, TrySendError};
use tracing::trace;

/// Finished transactions retained until the handle takes them.
pub const FINISHED_BACKLOG: usize = 64;

/// Queue `item`, dropping the oldest entry when the backlog is full.
fn publish<T>(tx: &Sender<T>, rx: &Receiver<T>, mut item: T) {
    loop {
        match tx.try_send(item) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => return,
            Err(TrySendError::Full(back)) => {
                if rx.try_recv().is_ok() {
                    trace!("Finished backlog full, dropped the oldest entry");
                }
                item = back;
            }
        }
    }
}
