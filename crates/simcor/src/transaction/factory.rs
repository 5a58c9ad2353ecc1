// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Builds well-formed messages and transactions.
//!
//! No other component assembles a [`SimCorMsg`] by hand; addressing, session
//! content and default timeouts all come from the [`FactoryConfig`] passed in
//! at construction.

use super::{BroadcastTransaction, Direction, SimpleTransaction, TransactionCore, TransactionStateName};
use crate::message::{Address, MsgType, SimCorMsg, TransactionIdentity, CLOSE_SESSION, OPEN_SESSION};
use std::time::Duration;

/// Defaults applied to everything the factory builds.
#[derive(Debug, Clone, PartialEq)]
pub struct FactoryConfig {
    /// Local model address stamped on outgoing messages
    pub address: Address,
    /// Content of session-open/close commands
    pub system_description: String,
    /// Timeout for transactions created without an explicit one
    pub default_timeout: Duration,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            address: Address::new("MDL-00"),
            system_description: "SimCor node".to_string(),
            default_timeout: Duration::from_secs(3000),
        }
    }
}

/// Transaction factory.
#[derive(Debug, Clone)]
pub struct TransactionFactory {
    config: FactoryConfig,
}

impl TransactionFactory {
    pub fn new(config: FactoryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FactoryConfig {
        &self.config
    }

    /// Identity from `(step, sub_step, correction_step)`, 0 = not present.
    pub fn create_identity(&self, step: u32, sub_step: u32, correction_step: u32) -> TransactionIdentity {
        TransactionIdentity::new(step, sub_step, correction_step)
    }

    /// Command addressed from the local model.
    pub fn create_command(&self, command: &str, content: Option<String>) -> SimCorMsg {
        self.create_command_for(self.config.address.clone(), command, content)
    }

    /// Command addressed to/from a specific participant.
    pub fn create_command_for(&self, address: Address, command: &str, content: Option<String>) -> SimCorMsg {
        SimCorMsg::new(MsgType::Command, Some(address), command, content)
    }

    /// Response to `command`. `ok = false` builds a NOT_OK response.
    pub fn create_response(&self, command: &str, content: Option<String>, ok: bool) -> SimCorMsg {
        let msg_type = if ok { MsgType::OkResponse } else { MsgType::NotOkResponse };
        SimCorMsg::new(msg_type, Some(self.config.address.clone()), command, content)
    }

    /// Session open (`open = true`) or close command carrying the system description.
    pub fn create_session_command(&self, open: bool) -> SimCorMsg {
        let command = if open { OPEN_SESSION } else { CLOSE_SESSION };
        self.create_command(command, Some(self.config.system_description.clone()))
    }

    /// Positive answer to a session-open command.
    pub fn create_session_response(&self) -> SimCorMsg {
        self.create_response(OPEN_SESSION, Some(self.config.system_description.clone()), true)
    }

    /// Point-to-point transaction for either role.
    ///
    /// `timeout = None` uses the configured default.
    pub fn create_simple_transaction(
        &self,
        direction: Direction,
        identity: TransactionIdentity,
        timeout: Option<Duration>,
    ) -> SimpleTransaction {
        let timeout = timeout.unwrap_or(self.config.default_timeout);
        SimpleTransaction::new(TransactionCore::new(identity, direction, timeout))
    }

    /// Transaction that will carry `command` to the remote side.
    pub fn create_send_command_transaction(
        &self,
        command: SimCorMsg,
        identity: TransactionIdentity,
        timeout: Option<Duration>,
    ) -> SimpleTransaction {
        let mut tx = self.create_simple_transaction(Direction::SendCommand, identity, timeout);
        tx.command = command;
        tx
    }

    /// Transaction that will wait for a command from the remote side.
    pub fn create_receive_command_transaction(&self, timeout: Option<Duration>) -> SimpleTransaction {
        self.create_simple_transaction(Direction::ReceiveCommand, TransactionIdentity::default(), timeout)
    }

    /// Placeholder transaction that is never archived.
    pub fn create_placeholder_transaction(&self) -> SimpleTransaction {
        self.create_simple_transaction(Direction::None, TransactionIdentity::default(), None)
    }

    /// Trigger round for every broadcast client.
    pub fn create_broadcast_transaction(
        &self,
        identity: TransactionIdentity,
        command: &str,
        content: Option<String>,
        timeout: Option<Duration>,
    ) -> BroadcastTransaction {
        let timeout = timeout.unwrap_or(self.config.default_timeout);
        let msg = self.create_command(command, content);
        let mut tx = BroadcastTransaction::new(
            TransactionCore::new(identity, Direction::SendCommand, timeout),
            msg,
        );
        tx.core.state = TransactionStateName::AssembleTriggerCommands;
        tx
    }

    /// Session-close round for every broadcast client.
    pub fn create_broadcast_close_transaction(&self, timeout: Option<Duration>) -> BroadcastTransaction {
        let timeout = timeout.unwrap_or(self.config.default_timeout);
        let mut tx = BroadcastTransaction::new(
            TransactionCore::new(TransactionIdentity::default(), Direction::SendCommand, timeout),
            self.create_session_command(false),
        );
        tx.core.state = TransactionStateName::AssembleCloseTriggerCommands;
        tx
    }

    /// Broadcast placeholder used to run setup/shutdown states.
    pub fn create_broadcast_placeholder(&self, state: TransactionStateName) -> BroadcastTransaction {
        let mut tx = BroadcastTransaction::new(
            TransactionCore::new(
                TransactionIdentity::default(),
                Direction::None,
                self.config.default_timeout,
            ),
            SimCorMsg::null(),
        );
        tx.core.state = state;
        tx
    }
}

impl Default for TransactionFactory {
    fn default() -> Self {
        Self::new(FactoryConfig::default())
    }
}
