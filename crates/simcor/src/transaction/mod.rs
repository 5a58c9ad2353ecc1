// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transactions driven by the state machine.
//!
//! Two shapes share a [`TransactionCore`]:
//! - [`SimpleTransaction`]: one command, one response (point-to-point)
//! - [`BroadcastTransaction`]: one command sent to every client, one response
//!   collected per client that answered
//!
//! `state` is the only control field; it moves along the table registered
//! for the acting state, or to an error state when `error` is set.

mod factory;
mod state;

pub use factory::{FactoryConfig, TransactionFactory};
pub use state::TransactionStateName;

use crate::error::TcpError;
use crate::message::{SimCorMsg, TransactionIdentity};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Role this engine instance plays in a transaction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    /// Placeholder transaction, never archived
    #[default]
    None,
    /// Originates commands, awaits responses
    SendCommand,
    /// Awaits commands, originates responses
    ReceiveCommand,
}

/// Fields common to every transaction shape.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransactionCore {
    pub identity: TransactionIdentity,
    pub direction: Direction,
    pub timeout: Duration,
    pub state: TransactionStateName,
    pub error: TcpError,
}

impl TransactionCore {
    pub fn new(identity: TransactionIdentity, direction: Direction, timeout: Duration) -> Self {
        Self {
            identity,
            direction,
            timeout,
            state: TransactionStateName::Ready,
            error: TcpError::none(),
        }
    }
}

/// Behaviour shared by both transaction shapes.
pub trait Transaction: std::fmt::Debug + Send + 'static {
    fn core(&self) -> &TransactionCore;

    fn core_mut(&mut self) -> &mut TransactionCore;

    /// Snapshot handed to the archive.
    fn record(&self) -> TransactionRecord;

    fn state(&self) -> TransactionStateName {
        self.core().state
    }

    fn set_state(&mut self, state: TransactionStateName) {
        self.core_mut().state = state;
    }

    fn error(&self) -> &TcpError {
        &self.core().error
    }

    fn set_error(&mut self, error: TcpError) {
        self.core_mut().error = error;
    }

    fn direction(&self) -> Direction {
        self.core().direction
    }

    fn timeout(&self) -> Duration {
        self.core().timeout
    }

    fn identity(&self) -> &TransactionIdentity {
        &self.core().identity
    }
}

/// Point-to-point transaction.
///
/// `posted` and `picked_up` hand the command/response across to an in-process
/// consumer without blocking the state machine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimpleTransaction {
    #[serde(flatten)]
    pub core: TransactionCore,
    pub command: SimCorMsg,
    pub response: SimCorMsg,
    #[serde(skip)]
    pub posted: bool,
    #[serde(skip)]
    pub picked_up: bool,
}

impl SimpleTransaction {
    pub fn new(core: TransactionCore) -> Self {
        Self {
            core,
            command: SimCorMsg::null(),
            response: SimCorMsg::null(),
            posted: false,
            picked_up: false,
        }
    }
}

impl Transaction for SimpleTransaction {
    fn core(&self) -> &TransactionCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TransactionCore {
        &mut self.core
    }

    fn record(&self) -> TransactionRecord {
        TransactionRecord::Simple(self.clone())
    }
}

/// Broadcast transaction: one trigger command for every client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BroadcastTransaction {
    #[serde(flatten)]
    pub core: TransactionCore,
    pub command: SimCorMsg,
    /// One entry per client that answered, in completion order
    pub responses: Vec<SimCorMsg>,
    /// Group membership news ("client X joined")
    pub broadcast_msg: String,
    /// Round outcome news ("lost contact with client Y")
    pub response_msg: String,
}

impl BroadcastTransaction {
    pub fn new(core: TransactionCore, command: SimCorMsg) -> Self {
        Self {
            core,
            command,
            responses: Vec::new(),
            broadcast_msg: String::new(),
            response_msg: String::new(),
        }
    }

    /// True when this transaction tears the broadcast group down.
    pub fn is_close(&self) -> bool {
        self.command.is_close_session()
    }
}

impl Transaction for BroadcastTransaction {
    fn core(&self) -> &TransactionCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TransactionCore {
        &mut self.core
    }

    fn record(&self) -> TransactionRecord {
        TransactionRecord::Broadcast(self.clone())
    }
}

/// Archived form of a finished transaction.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum TransactionRecord {
    Simple(SimpleTransaction),
    Broadcast(BroadcastTransaction),
}

impl TransactionRecord {
    pub fn core(&self) -> &TransactionCore {
        match self {
            TransactionRecord::Simple(tx) => &tx.core,
            TransactionRecord::Broadcast(tx) => &tx.core,
        }
    }
}
