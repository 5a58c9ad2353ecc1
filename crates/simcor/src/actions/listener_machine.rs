// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Listener-state-machine layer: sessions handed over by a background acceptor.

use super::{BaseActions, BaseCapability, ListenerMachineCapability, SessionSource, Transition};
use crate::error::{EngineError, TcpError};
use crate::listener_machine::ListenerStateMachine;
use crate::machine::{tables, StateTable};
use crate::transaction::{Direction, SimpleTransaction, Transaction, TransactionStateName};
use tracing::{debug, info};

/// Base processor plus a [`ListenerStateMachine`].
pub struct ListenerMachineActions {
    base: BaseActions,
    machine: ListenerStateMachine,
}

impl ListenerMachineActions {
    pub fn new(base: BaseActions, machine: ListenerStateMachine) -> Self {
        Self { base, machine }
    }
}

impl BaseCapability for ListenerMachineActions {
    fn base(&mut self) -> &mut BaseActions {
        &mut self.base
    }
}

impl ListenerMachineCapability for ListenerMachineActions {
    fn machine(&mut self) -> &mut ListenerStateMachine {
        &mut self.machine
    }
}

impl SessionSource for ListenerMachineActions {
    /// The machine completes the open handshake itself; `open` is not used.
    fn open_table(_open: Direction) -> StateTable<Self, SimpleTransaction> {
        tables::machine_open_table()
    }

    fn open_start() -> TransactionStateName {
        TransactionStateName::StartListenerMachine
    }

    fn release(&mut self) -> bool {
        self.machine.stop();
        !self.machine.is_alive()
    }
}

/// START_LISTENER_MACHINE: start the acceptor unless it already runs.
pub fn start_listener_machine<P: ListenerMachineCapability, T: Transaction>(p: &mut P, tx: &mut T, t: Transition) {
    match p.machine().start() {
        Ok(()) | Err(EngineError::AlreadyRunning) => BaseActions::succeed(tx, t.next),
        Err(e) => {
            let error = TcpError::listener(e.to_string());
            p.base().fail(tx, t.on_error, error);
        }
    }
}

/// PICKUP_CLIENT: attach the next client handed off by the acceptor.
pub fn pickup_client<P: ListenerMachineCapability>(p: &mut P, tx: &mut SimpleTransaction, t: Transition) {
    let machine = p.machine();
    if let Some(client) = machine.pickup_one_client() {
        info!("Picked up client {}", client);
        p.base().attach(client.connection);
        BaseActions::succeed(tx, t.next);
        return;
    }
    if let Some(error) = machine_failure(machine) {
        p.base().fail(tx, t.on_error, error);
    }
}

/// Error of an acceptor that is no longer running, if it stopped.
///
/// `start` only spawns the thread; a bind failure shows up here afterwards.
pub fn machine_failure(machine: &ListenerStateMachine) -> Option<TcpError> {
    if machine.is_running() {
        return None;
    }
    let error = machine.error();
    if error.is_none() {
        Some(TcpError::listener("listener state machine is not running"))
    } else {
        Some(error)
    }
}

/// STOP_LISTENER_MACHINE: stop the acceptor and wait for its thread to exit.
pub fn stop_listener_machine<P: ListenerMachineCapability, T: Transaction>(p: &mut P, tx: &mut T, t: Transition) {
    let machine = p.machine();
    machine.stop();
    if !machine.is_alive() {
        debug!("Listener state machine has exited");
        BaseActions::succeed(tx, t.next);
    }
}
