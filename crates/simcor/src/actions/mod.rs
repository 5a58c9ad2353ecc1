// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Action processors.
//!
//! A processor owns the collaborators one role needs and exposes them through
//! capability traits. State operations are free functions generic over the
//! capability they require, so a table for a processor without broadcast
//! capability cannot contain a broadcast operation.
//!
//! | Processor                 | Capabilities                              |
//! |---------------------------|-------------------------------------------|
//! | [`BaseActions`]           | base (connector-based sessions)           |
//! | [`ListenerActions`]       | base + listener                           |
//! | [`ListenerMachineActions`]| base + listener machine                   |
//! | [`BroadcastActions`]      | base + listener machine + broadcast       |
//!
//! Every operation has the same three outcomes:
//! - pending: `state` and `error` untouched, call again later
//! - success: `error = NONE`, `state = transition.next`
//! - failure: `error` set (and saved), `state = transition.on_error`

pub mod base;
pub mod broadcast;
pub mod listener;
pub mod listener_machine;

pub use base::BaseActions;
pub use broadcast::BroadcastActions;
pub use listener::ListenerActions;
pub use listener_machine::ListenerMachineActions;

use crate::listener_machine::ListenerStateMachine;
use crate::machine::StateTable;
use crate::net::Listener;
use crate::registry::BroadcastClientRegistry;
use crate::transaction::{Direction, SimpleTransaction, TransactionStateName};
use std::time::Instant;

/// Successor states of one registered state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub next: TransactionStateName,
    pub on_error: TransactionStateName,
}

impl Transition {
    pub const fn new(next: TransactionStateName, on_error: TransactionStateName) -> Self {
        Self { next, on_error }
    }

    /// Error routes to CLOSING_CONNECTION.
    pub const fn or_close(next: TransactionStateName) -> Self {
        Self::new(next, TransactionStateName::ClosingConnection)
    }
}

/// Connection, factory, archive and saved-error access.
pub trait BaseCapability {
    fn base(&mut self) -> &mut BaseActions;
}

/// A TCP listener owned by the processor.
pub trait ListenerCapability: BaseCapability {
    fn listener(&mut self) -> &mut dyn Listener;
}

/// A background listener state machine owned by the processor.
pub trait ListenerMachineCapability: BaseCapability {
    fn machine(&mut self) -> &mut ListenerStateMachine;
}

/// Fan-out/fan-in over the broadcast client registry.
pub trait BroadcastCapability: ListenerMachineCapability {
    fn registry(&self) -> &BroadcastClientRegistry;

    /// Deadline for DELAY_FOR_CLOSE_COMMANDS, armed on entry.
    fn close_deadline(&mut self) -> &mut Option<Instant>;

    fn close_delay(&self) -> std::time::Duration;
}

/// How a point-to-point processor obtains its connection.
///
/// Implemented by every processor a [`crate::driver::SessionDriver`] can run.
pub trait SessionSource: BaseCapability + Send + 'static {
    /// Open-phase table for the given open-session role.
    fn open_table(open: Direction) -> StateTable<Self, SimpleTransaction>
    where
        Self: Sized;

    /// First state of the open phase.
    fn open_start() -> TransactionStateName;

    /// Release the connection source. Returns `true` once fully released.
    fn release(&mut self) -> bool;
}
