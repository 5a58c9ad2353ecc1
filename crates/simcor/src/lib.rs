// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # SimCor - transaction protocol engine
//!
//! Polling state machine that runs SimCor command/response transactions
//! between the participants of a distributed hybrid simulation: one
//! coordinator driving a set of clients, or two peers exchanging commands over
//! a single session.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use simcor::{node, SimCorConfig, TransactionIdentity};
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SimCorConfig::default();
//! let archive = node::open_archive(&config)?;
//! let coordinator = node::coordinator(&config, archive)?.spawn()?;
//!
//! coordinator.trigger(TransactionIdentity::new(1, 0, 0), "execute", Some("disp 0.01".into()));
//! if let Some(round) = coordinator.next_round(Duration::from_secs(30)) {
//!     println!("{} response(s), {}", round.responses.len(), round.core.error);
//! }
//! coordinator.stop();
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |  Drivers        SessionDriver (point-to-point)   BroadcastDriver     |
//! +---------------------------------------------------------------------+
//! |  Engine         StateTable per role/phase: state -> operation        |
//! +---------------------------------------------------------------------+
//! |  Processors     Base | Listener | ListenerMachine | Broadcast        |
//! +---------------------------------------------------------------------+
//! |  Collaborators  Connection | Listener | Connector | Archive          |
//! +---------------------------------------------------------------------+
//! ```
//!
//! Every operation is non-blocking: it either advances the transaction,
//! routes it to its error state, or leaves it untouched to be polled again.
//!
//! ## Modules Overview
//!
//! - [`transaction`] - transactions, states and the factory
//! - [`machine`] - state tables and the execute loop primitive
//! - [`actions`] - processors and state operations
//! - [`driver`] - threads that run an engine
//! - [`net`] - TCP connection, listener and connector
//! - [`registry`] - broadcast client bookkeeping

pub mod actions;
pub mod archive;
pub mod config;
pub mod driver;
pub mod error;
pub mod listener_machine;
pub mod machine;
pub mod message;
pub mod net;
pub mod node;
pub mod registry;
pub mod transaction;
mod wake;

#[cfg(test)]
mod mock;

pub use archive::{Archive, JsonLinesArchive, NoArchive};
pub use config::{ConfigError, SimCorConfig};
pub use driver::{BroadcastDriver, BroadcastHandle, SessionDriver, SessionHandle, SessionRole};
pub use error::{EngineError, TcpError, TcpErrorKind};
pub use message::{Address, MsgType, SimCorMsg, TransactionIdentity};
pub use transaction::{
    BroadcastTransaction, Direction, SimpleTransaction, Transaction, TransactionFactory, TransactionRecord,
    TransactionStateName,
};
