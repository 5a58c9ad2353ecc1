// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error taxonomy shared by the protocol engine and its collaborators.
//!
//! [`TcpError`] is a value, not a failure path: every transaction carries one,
//! and `TcpErrorKind::None` means "healthy". Collaborators report it through
//! polls, state actions copy it onto the transaction.

use serde::{Deserialize, Serialize};
use std::io;

/// Classification of a protocol-visible error.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TcpErrorKind {
    /// No error.
    #[default]
    None,
    /// Socket-level I/O failure.
    Io,
    /// The collaborator gave up waiting for the remote side.
    Timeout,
    /// The remote side closed the connection (EOF / reset).
    ConnectionClosed,
    /// The listener could not bind or accept.
    ListenerFailure,
    /// A message arrived that does not fit the session protocol.
    Protocol,
    /// Informational: clients joined the broadcast group.
    BroadcastClientsAdded,
    /// Partial failure: clients were dropped from the broadcast group.
    BroadcastClientsLost,
}

impl std::fmt::Display for TcpErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::None => "NONE",
            Self::Io => "IO_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::ConnectionClosed => "CONNECTION_CLOSED",
            Self::ListenerFailure => "LISTENER_FAILURE",
            Self::Protocol => "PROTOCOL_ERROR",
            Self::BroadcastClientsAdded => "BROADCAST_CLIENTS_ADDED",
            Self::BroadcastClientsLost => "BROADCAST_CLIENTS_LOST",
        };
        write!(f, "{}", s)
    }
}

/// Error value carried by transactions and reported by collaborators.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpError {
    /// Error classification
    pub kind: TcpErrorKind,
    /// Human-readable detail (empty for `None`)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
}

impl TcpError {
    /// The healthy value.
    pub fn none() -> Self {
        Self::default()
    }

    /// Create an error of the given kind.
    pub fn new(kind: TcpErrorKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    pub fn io(text: impl Into<String>) -> Self {
        Self::new(TcpErrorKind::Io, text)
    }

    pub fn timeout(text: impl Into<String>) -> Self {
        Self::new(TcpErrorKind::Timeout, text)
    }

    pub fn closed(text: impl Into<String>) -> Self {
        Self::new(TcpErrorKind::ConnectionClosed, text)
    }

    pub fn listener(text: impl Into<String>) -> Self {
        Self::new(TcpErrorKind::ListenerFailure, text)
    }

    pub fn protocol(text: impl Into<String>) -> Self {
        Self::new(TcpErrorKind::Protocol, text)
    }

    /// True when no error is recorded.
    pub fn is_none(&self) -> bool {
        self.kind == TcpErrorKind::None
    }

    /// True when an error is recorded.
    pub fn is_err(&self) -> bool {
        !self.is_none()
    }
}

impl std::fmt::Display for TcpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.text.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.text)
        }
    }
}

impl std::error::Error for TcpError {}

impl From<io::Error> for TcpError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::timeout(e.to_string()),
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Self::closed(e.to_string()),
            _ => Self::io(e.to_string()),
        }
    }
}

/// Engine-level failures that are not part of the protocol taxonomy.
#[derive(Debug)]
pub enum EngineError {
    /// A transaction reached a state the active table has no entry for.
    UnknownState(String),
    /// The driver or listener machine was started twice.
    AlreadyRunning,
    /// The worker thread could not be spawned.
    Spawn(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownState(s) => write!(f, "No state registered for {}", s),
            Self::AlreadyRunning => write!(f, "Already running"),
            Self::Spawn(s) => write!(f, "Thread spawn failed: {}", s),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<io::Error> for EngineError {
    fn from(e: io::Error) -> Self {
        Self::Spawn(e.to_string())
    }
}
