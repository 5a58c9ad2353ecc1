// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! State tables per role and phase.
//!
//! A point-to-point session moves through three phases, each with its own
//! table because the same state (e.g. SETUP_READ_COMMAND) has different
//! successors in different phases:
//!
//! ```text
//! open (receiver):  [connection source] -> SETUP_READ_COMMAND -> WAIT_FOR_OPEN_COMMAND
//!                   -> ASSEMBLE_OPEN_RESPONSE -> SENDING_RESPONSE -> TRANSACTION_DONE
//! open (sender):    [connection source] -> ASSEMBLE_OPEN_COMMAND -> SENDING_COMMAND
//!                   -> SETUP_READ_RESPONSE -> WAIT_FOR_OPEN_RESPONSE -> TRANSACTION_DONE
//! steady (receiver): SETUP_READ_COMMAND -> WAIT_FOR_COMMAND -> COMMAND_AVAILABLE
//!                   -> WAIT_FOR_RESPONSE_POSTING -> ASSEMBLE_RESPONSE -> SENDING_RESPONSE
//!                   -> TRANSACTION_DONE
//! steady (sender):  WAIT_FOR_COMMAND_POSTING -> ASSEMBLE_COMMAND -> SENDING_COMMAND
//!                   -> SETUP_READ_RESPONSE -> WAIT_FOR_RESPONSE -> RESPONSE_AVAILABLE
//!                   -> TRANSACTION_DONE
//! close:            ASSEMBLE_CLOSE_COMMAND -> SENDING_CLOSE_COMMAND -> CLOSING_CONNECTION
//!                   -> TRANSACTION_DONE
//! ```
//!
//! Connection sources: START_LISTENER -> LISTEN_FOR_CONNECTIONS (listener),
//! OPENING_CONNECTION -> CHECK_OPEN_CONNECTION (connector), or
//! START_LISTENER_MACHINE -> PICKUP_CLIENT (listener state machine, which
//! performs the open handshake itself).
//!
//! Every table routes errors to CLOSING_CONNECTION, which always leads to
//! TRANSACTION_DONE.

use super::StateTable;
use crate::actions::{
    base, broadcast, listener, listener_machine, BaseCapability, BroadcastCapability, ListenerCapability,
    ListenerMachineCapability,
};
use crate::transaction::{BroadcastTransaction, Direction, SimpleTransaction, TransactionStateName as S};

type Simple<P> = StateTable<P, SimpleTransaction>;

const CLOSE: S = S::ClosingConnection;
const DONE: S = S::TransactionDone;

fn add_finish<P: BaseCapability>(table: &mut Simple<P>) {
    table
        .register(CLOSE, base::close_connection::<P, SimpleTransaction>, DONE, DONE)
        .register(DONE, base::record_transaction::<P, SimpleTransaction>, DONE, DONE);
}

/// Register the open-session handshake; returns its first state.
fn add_open_handshake<P: BaseCapability>(table: &mut Simple<P>, open: Direction) -> S {
    match open {
        Direction::ReceiveCommand => {
            table
                .register(S::SetupReadCommand, base::setup_read::<P, SimpleTransaction>, S::WaitForOpenCommand, CLOSE)
                .register(S::WaitForOpenCommand, base::wait_for_open_command::<P>, S::AssembleOpenResponse, CLOSE)
                .register(S::AssembleOpenResponse, base::assemble_open_response::<P>, S::SendingResponse, CLOSE)
                .register(S::SendingResponse, base::wait_for_send::<P, SimpleTransaction>, DONE, CLOSE);
            S::SetupReadCommand
        }
        Direction::SendCommand => {
            table
                .register(S::AssembleOpenCommand, base::assemble_open_command::<P>, S::SendingCommand, CLOSE)
                .register(S::SendingCommand, base::wait_for_send::<P, SimpleTransaction>, S::SetupReadResponse, CLOSE)
                .register(S::SetupReadResponse, base::setup_read::<P, SimpleTransaction>, S::WaitForOpenResponse, CLOSE)
                .register(S::WaitForOpenResponse, base::wait_for_open_response::<P>, DONE, CLOSE);
            S::AssembleOpenCommand
        }
        Direction::None => DONE,
    }
}

/// Open phase for a processor that accepts its own connections.
pub fn listener_open_table<P: ListenerCapability>(open: Direction) -> Simple<P> {
    let mut table = StateTable::new();
    let first = add_open_handshake(&mut table, open);
    table
        .register(S::StartListener, listener::start_listener::<P, SimpleTransaction>, S::ListenForConnections, CLOSE)
        .register(S::ListenForConnections, listener::listen_for_connection::<P, SimpleTransaction>, first, CLOSE)
        .register(S::StopListener, listener::stop_listener::<P, SimpleTransaction>, DONE, DONE);
    add_finish(&mut table);
    table
}

/// Open phase for a processor that connects out.
pub fn connector_open_table<P: BaseCapability>(open: Direction) -> Simple<P> {
    let mut table = StateTable::new();
    let first = add_open_handshake(&mut table, open);
    table
        .register(S::OpeningConnection, base::open_connection::<P, SimpleTransaction>, S::CheckOpenConnection, CLOSE)
        .register(S::CheckOpenConnection, base::check_open_connection::<P, SimpleTransaction>, first, CLOSE);
    add_finish(&mut table);
    table
}

/// Open phase for a processor fed by a listener state machine.
pub fn machine_open_table<P: ListenerMachineCapability>() -> Simple<P> {
    let mut table = StateTable::new();
    table
        .register(
            S::StartListenerMachine,
            listener_machine::start_listener_machine::<P, SimpleTransaction>,
            S::PickupClient,
            CLOSE,
        )
        .register(S::PickupClient, listener_machine::pickup_client::<P>, DONE, CLOSE)
        .register(
            S::StopListenerMachine,
            listener_machine::stop_listener_machine::<P, SimpleTransaction>,
            DONE,
            DONE,
        );
    add_finish(&mut table);
    table
}

/// First state of a steady-phase transaction.
///
/// A `None` steady role runs the receiver cycle.
pub fn steady_start(steady: Direction) -> S {
    match steady {
        Direction::SendCommand => S::WaitForCommandPosting,
        Direction::ReceiveCommand | Direction::None => S::SetupReadCommand,
    }
}

/// Steady command/response phase.
pub fn steady_table<P: BaseCapability>(steady: Direction) -> Simple<P> {
    let mut table = StateTable::new();
    match steady {
        Direction::SendCommand => {
            table
                .register(S::WaitForCommandPosting, base::wait_for_posting::<P>, S::AssembleCommand, CLOSE)
                .register(S::AssembleCommand, base::assemble_command::<P>, S::SendingCommand, CLOSE)
                .register(S::SendingCommand, base::wait_for_send::<P, SimpleTransaction>, S::SetupReadResponse, CLOSE)
                .register(S::SetupReadResponse, base::setup_read::<P, SimpleTransaction>, S::WaitForResponse, CLOSE)
                .register(S::WaitForResponse, base::wait_for_response::<P>, S::ResponseAvailable, CLOSE)
                .register(S::ResponseAvailable, base::wait_for_pickup::<P>, DONE, CLOSE);
        }
        Direction::ReceiveCommand | Direction::None => {
            table
                .register(S::SetupReadCommand, base::setup_read::<P, SimpleTransaction>, S::WaitForCommand, CLOSE)
                .register(S::WaitForCommand, base::wait_for_command::<P>, S::CommandAvailable, CLOSE)
                .register(S::CommandAvailable, base::wait_for_pickup::<P>, S::WaitForResponsePosting, CLOSE)
                .register(S::WaitForResponsePosting, base::wait_for_posting::<P>, S::AssembleResponse, CLOSE)
                .register(S::AssembleResponse, base::assemble_response::<P>, S::SendingResponse, CLOSE)
                .register(S::SendingResponse, base::wait_for_send::<P, SimpleTransaction>, DONE, CLOSE);
        }
    }
    add_finish(&mut table);
    table
}

pub const CLOSE_START: S = S::AssembleCloseCommand;

/// Session close initiated locally.
pub fn close_table<P: BaseCapability>() -> Simple<P> {
    let mut table = StateTable::new();
    table
        .register(S::AssembleCloseCommand, base::assemble_close_command::<P>, S::SendingCloseCommand, CLOSE)
        .register(S::SendingCloseCommand, base::wait_for_send::<P, SimpleTransaction>, CLOSE, CLOSE);
    add_finish(&mut table);
    table
}

/// Broadcast session: listener machine control, trigger rounds and teardown.
pub fn broadcast_table<P: BroadcastCapability>() -> StateTable<P, BroadcastTransaction> {
    type B = BroadcastTransaction;
    let mut table = StateTable::new();
    table
        .register(
            S::StartListenerMachine,
            listener_machine::start_listener_machine::<P, B>,
            DONE,
            CLOSE,
        )
        .register(
            S::StopListenerMachine,
            listener_machine::stop_listener_machine::<P, B>,
            DONE,
            DONE,
        )
        // Trigger round
        .register(S::AssembleTriggerCommands, broadcast::assemble_trigger_commands::<P>, S::BroadcastCommand, CLOSE)
        .register(S::BroadcastCommand, broadcast::broadcast_command::<P>, S::SetupTriggerReadResponses, CLOSE)
        .register(
            S::SetupTriggerReadResponses,
            broadcast::setup_trigger_read_responses::<P>,
            S::WaitForTriggerResponses,
            CLOSE,
        )
        .register(S::WaitForTriggerResponses, broadcast::wait_for_trigger_responses::<P>, DONE, CLOSE)
        // Teardown
        .register(
            S::AssembleCloseTriggerCommands,
            broadcast::assemble_close_trigger_commands::<P>,
            S::BroadcastCloseCommand,
            CLOSE,
        )
        .register(S::BroadcastCloseCommand, broadcast::broadcast_command::<P>, S::DelayForCloseCommands, CLOSE)
        .register(
            S::DelayForCloseCommands,
            broadcast::delay_for_close_commands::<P>,
            S::CloseTriggerConnections,
            CLOSE,
        )
        .register(S::CloseTriggerConnections, broadcast::close_trigger_connections::<P>, DONE, CLOSE)
        .register(CLOSE, broadcast::close_all_clients::<P>, DONE, DONE)
        .register(DONE, base::record_transaction::<P, B>, DONE, DONE);
    table
}
