// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection and listener collaborators.
//!
//! The engine never blocks on a socket. It requests an action with
//! [`Connection::set_to_remote_msg`], then polls [`Connection::is_busy`] on
//! later iterations and collects the outcome with
//! [`Connection::from_remote_msg`]. Timeouts are enforced here, not in the
//! state machine.
//!
//! - [`TcpConnection`] - worker-thread backed implementation
//! - [`TcpAcceptor`] - non-blocking accept thread implementing [`Listener`]
//! - [`TcpConnector`] - outbound connections implementing [`Connector`]

pub mod codec;
mod connection;
mod listener;

pub use connection::{TcpConnection, TcpConnector};
pub use listener::TcpAcceptor;

use crate::error::TcpError;
use crate::message::{SimCorMsg, TransactionIdentity};
use std::time::Duration;

/// Request kinds accepted by a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionAction {
    Read,
    Write,
    Close,
}

/// Connection status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    Open,
    /// Connecting, or an action is in flight
    #[default]
    Busy,
    Closed,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionStatus::Open => "OPEN",
            ConnectionStatus::Busy => "BUSY",
            ConnectionStatus::Closed => "CLOSED",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of the last completed action.
///
/// After a write `msg` is NULL; `error` reports whether the write failed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RemoteMessage {
    pub msg: SimCorMsg,
    pub identity: Option<TransactionIdentity>,
    pub error: TcpError,
}

impl RemoteMessage {
    pub fn failed(error: TcpError) -> Self {
        Self {
            error,
            ..Default::default()
        }
    }
}

/// A connection that performs socket work on behalf of the engine.
pub trait Connection: Send {
    /// True while a requested action has not completed.
    fn is_busy(&self) -> bool;

    /// Result of the last completed action.
    fn from_remote_msg(&self) -> RemoteMessage;

    /// Request a READ, WRITE (of `msg`) or CLOSE. Returns immediately.
    fn set_to_remote_msg(
        &mut self,
        action: ConnectionAction,
        msg: Option<SimCorMsg>,
        identity: Option<TransactionIdentity>,
    );

    /// Timeout applied to subsequent actions.
    fn set_timeout(&mut self, timeout: Duration);

    fn status(&self) -> ConnectionStatus;

    /// True until the connection's worker has exited.
    fn is_alive(&self) -> bool;

    fn remote_host(&self) -> String;
}

/// Accepts inbound connections.
pub trait Listener: Send {
    /// Begin accepting. `false` means the cause is in [`Listener::check_for_errors`].
    fn start_listener(&mut self) -> bool;

    /// Request a stop. Returns `true` once fully stopped; call until it does.
    fn stop_listener(&mut self) -> bool;

    /// A newly accepted connection, if any.
    fn check_for_listener_connection(&mut self) -> Option<Box<dyn Connection>>;

    /// Listener-level error, `None` kind when healthy.
    fn check_for_errors(&self) -> TcpError;

    fn is_listening(&self) -> bool;
}

/// Opens outbound connections.
pub trait Connector: Send {
    /// Start connecting. The connection reports `Busy` until it is `Open` or `Closed`.
    fn connect(&mut self) -> Box<dyn Connection>;
}
