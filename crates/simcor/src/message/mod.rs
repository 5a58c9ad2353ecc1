// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SimCor protocol messages.
//!
//! A [`SimCorMsg`] is one addressed command or response. Its [`MsgType`]
//! distinguishes "no message yet" (`Null`) from an empty response, so a
//! transaction can tell whether the receive side has completed a read.

mod identity;

pub use identity::TransactionIdentity;

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Opcode that opens a session. Its content is the sender's system description.
pub const OPEN_SESSION: &str = "open-session";

/// Opcode that closes a session.
pub const CLOSE_SESSION: &str = "close-session";

/// Default opcode for broadcast trigger rounds.
pub const TRIGGER: &str = "execute";

/// Routing address of a model/substructure participant.
///
/// Equality is by `(model, suffix)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    /// Model / substructure name
    pub model: String,
    /// Optional sub-component (e.g. coordinate-process identifier)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
}

impl Address {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            suffix: None,
        }
    }

    /// Same model, addressed to a sub-component.
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.suffix {
            Some(suffix) => write!(f, "{}:{}", self.model, suffix),
            None => write!(f, "{}", self.model),
        }
    }
}

/// Message type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MsgType {
    Command,
    OkResponse,
    NotOkResponse,
    /// Absent / unset
    #[default]
    Null,
}

impl MsgType {
    pub fn is_response(&self) -> bool {
        matches!(self, MsgType::OkResponse | MsgType::NotOkResponse)
    }
}

impl std::fmt::Display for MsgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MsgType::Command => "COMMAND",
            MsgType::OkResponse => "OK_RESPONSE",
            MsgType::NotOkResponse => "NOT_OK_RESPONSE",
            MsgType::Null => "NULL",
        };
        write!(f, "{}", s)
    }
}

/// One protocol message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimCorMsg {
    #[serde(default)]
    pub address: Option<Address>,
    #[serde(default)]
    pub command: String,
    /// Opaque payload (may encode lists of numbers)
    #[serde(default)]
    pub content: Option<String>,
    #[serde(rename = "type", default)]
    pub msg_type: MsgType,
    pub timestamp: SystemTime,
}

impl SimCorMsg {
    /// The "absent" message.
    pub fn null() -> Self {
        Self {
            address: None,
            command: String::new(),
            content: None,
            msg_type: MsgType::Null,
            timestamp: SystemTime::UNIX_EPOCH,
        }
    }

    /// Create a message stamped with the current time.
    pub fn new(
        msg_type: MsgType,
        address: Option<Address>,
        command: impl Into<String>,
        content: Option<String>,
    ) -> Self {
        Self {
            address,
            command: command.into(),
            content,
            msg_type,
            timestamp: SystemTime::now(),
        }
    }

    pub fn is_null(&self) -> bool {
        self.msg_type == MsgType::Null
    }

    pub fn is_open_session(&self) -> bool {
        self.msg_type == MsgType::Command && self.command == OPEN_SESSION
    }

    pub fn is_close_session(&self) -> bool {
        self.msg_type == MsgType::Command && self.command == CLOSE_SESSION
    }

    /// Payload as text, empty when absent.
    pub fn content_str(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

impl Default for SimCorMsg {
    fn default() -> Self {
        Self::null()
    }
}

impl std::fmt::Display for SimCorMsg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_null() {
            return write!(f, "NULL");
        }
        write!(f, "{} {}", self.msg_type, self.command)?;
        if let Some(address) = &self.address {
            write!(f, " @{}", address)?;
        }
        if let Some(content) = &self.content {
            write!(f, " [{}]", content)?;
        }
        Ok(())
    }
}
