// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transaction state names.

use serde::{Deserialize, Serialize};

/// Every state a transaction can be in.
///
/// Which states are reachable depends on the table the engine was assembled
/// with (see [`crate::machine::tables`]).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStateName {
    /// Freshly built, not yet placed on a cycle
    #[default]
    Ready,

    // Connection establishment
    StartListener,
    ListenForConnections,
    StopListener,
    OpeningConnection,
    CheckOpenConnection,
    StartListenerMachine,
    PickupClient,
    StopListenerMachine,

    // Session open, receiver side
    SetupReadCommand,
    WaitForOpenCommand,
    AssembleOpenResponse,
    SendingResponse,

    // Session open, sender side
    AssembleOpenCommand,
    SendingCommand,
    SetupReadResponse,
    WaitForOpenResponse,

    // Steady cycle, receiver side
    WaitForCommand,
    CommandAvailable,
    WaitForResponsePosting,
    AssembleResponse,

    // Steady cycle, sender side
    WaitForCommandPosting,
    AssembleCommand,
    WaitForResponse,
    ResponseAvailable,

    // Session close, sender side
    AssembleCloseCommand,
    SendingCloseCommand,

    // Broadcast trigger round
    AssembleTriggerCommands,
    BroadcastCommand,
    SetupTriggerReadResponses,
    WaitForTriggerResponses,

    // Broadcast teardown
    AssembleCloseTriggerCommands,
    BroadcastCloseCommand,
    DelayForCloseCommands,
    CloseTriggerConnections,

    ClosingConnection,
    TransactionDone,
}

impl TransactionStateName {
    pub fn as_str(&self) -> &'static str {
        use TransactionStateName::*;
        match self {
            Ready => "READY",
            StartListener => "START_LISTENER",
            ListenForConnections => "LISTEN_FOR_CONNECTIONS",
            StopListener => "STOP_LISTENER",
            OpeningConnection => "OPENING_CONNECTION",
            CheckOpenConnection => "CHECK_OPEN_CONNECTION",
            StartListenerMachine => "START_LISTENER_MACHINE",
            PickupClient => "PICKUP_CLIENT",
            StopListenerMachine => "STOP_LISTENER_MACHINE",
            SetupReadCommand => "SETUP_READ_COMMAND",
            WaitForOpenCommand => "WAIT_FOR_OPEN_COMMAND",
            AssembleOpenResponse => "ASSEMBLE_OPEN_RESPONSE",
            SendingResponse => "SENDING_RESPONSE",
            AssembleOpenCommand => "ASSEMBLE_OPEN_COMMAND",
            SendingCommand => "SENDING_COMMAND",
            SetupReadResponse => "SETUP_READ_RESPONSE",
            WaitForOpenResponse => "WAIT_FOR_OPEN_RESPONSE",
            WaitForCommand => "WAIT_FOR_COMMAND",
            CommandAvailable => "COMMAND_AVAILABLE",
            WaitForResponsePosting => "WAIT_FOR_RESPONSE_POSTING",
            AssembleResponse => "ASSEMBLE_RESPONSE",
            WaitForCommandPosting => "WAIT_FOR_COMMAND_POSTING",
            AssembleCommand => "ASSEMBLE_COMMAND",
            WaitForResponse => "WAIT_FOR_RESPONSE",
            ResponseAvailable => "RESPONSE_AVAILABLE",
            AssembleCloseCommand => "ASSEMBLE_CLOSE_COMMAND",
            SendingCloseCommand => "SENDING_CLOSE_COMMAND",
            AssembleTriggerCommands => "ASSEMBLE_TRIGGER_COMMANDS",
            BroadcastCommand => "BROADCAST_COMMAND",
            SetupTriggerReadResponses => "SETUP_TRIGGER_READ_RESPONSES",
            WaitForTriggerResponses => "WAIT_FOR_TRIGGER_RESPONSES",
            AssembleCloseTriggerCommands => "ASSEMBLE_CLOSE_TRIGGER_COMMANDS",
            BroadcastCloseCommand => "BROADCAST_CLOSE_COMMAND",
            DelayForCloseCommands => "DELAY_FOR_CLOSE_COMMANDS",
            CloseTriggerConnections => "CLOSE_TRIGGER_CONNECTIONS",
            ClosingConnection => "CLOSING_CONNECTION",
            TransactionDone => "TRANSACTION_DONE",
        }
    }

    /// True for the terminal state of every cycle.
    pub fn is_done(&self) -> bool {
        matches!(self, TransactionStateName::TransactionDone)
    }
}

impl std::fmt::Display for TransactionStateName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
