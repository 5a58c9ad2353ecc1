// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Broadcast layer: fan-out/fan-in over the client registry.
//!
//! Broadcast operations never fail a round. Lost clients are reported through
//! a `BroadcastClientsLost` error, which later advances keep; joined clients
//! are reported through `BroadcastClientsAdded`, which the next advance clears.

use super::listener_machine::machine_failure;
use super::{BaseActions, BaseCapability, BroadcastCapability, ListenerMachineCapability, Transition};
use crate::error::{TcpError, TcpErrorKind};
use crate::listener_machine::ListenerStateMachine;
use crate::registry::BroadcastClientRegistry;
use crate::transaction::{BroadcastTransaction, Transaction, TransactionStateName};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Base processor plus listener machine and client registry.
pub struct BroadcastActions {
    base: BaseActions,
    machine: ListenerStateMachine,
    registry: Arc<BroadcastClientRegistry>,
    close_delay: Duration,
    close_deadline: Option<Instant>,
}

impl BroadcastActions {
    /// `machine` must hand its clients to `registry`.
    pub fn new(
        base: BaseActions,
        machine: ListenerStateMachine,
        registry: Arc<BroadcastClientRegistry>,
        close_delay: Duration,
    ) -> Self {
        Self {
            base,
            machine,
            registry,
            close_delay,
            close_deadline: None,
        }
    }

    pub fn registry_handle(&self) -> Arc<BroadcastClientRegistry> {
        Arc::clone(&self.registry)
    }
}

impl BaseCapability for BroadcastActions {
    fn base(&mut self) -> &mut BaseActions {
        &mut self.base
    }
}

impl ListenerMachineCapability for BroadcastActions {
    fn machine(&mut self) -> &mut ListenerStateMachine {
        &mut self.machine
    }
}

impl BroadcastCapability for BroadcastActions {
    fn registry(&self) -> &BroadcastClientRegistry {
        &self.registry
    }

    fn close_deadline(&mut self) -> &mut Option<Instant> {
        &mut self.close_deadline
    }

    fn close_delay(&self) -> Duration {
        self.close_delay
    }
}

/// Advance, keeping a lost-clients report.
fn advance(tx: &mut BroadcastTransaction, next: TransactionStateName) {
    if tx.error().kind != TcpErrorKind::BroadcastClientsLost {
        tx.set_error(TcpError::none());
    }
    tx.set_state(next);
}

/// ASSEMBLE_TRIGGER_COMMANDS: merge new clients and send the trigger.
///
/// Fails with the acceptor's error once the listener machine has stopped.
pub fn assemble_trigger_commands<P: BroadcastCapability>(p: &mut P, tx: &mut BroadcastTransaction, t: Transition) {
    if let Some(error) = machine_failure(p.machine()) {
        p.base().fail(tx, t.on_error, error);
        return;
    }
    tx.set_error(TcpError::none());
    p.registry().assemble_trigger_messages(tx);
    // Joined clients stay reported until the next advance
    tx.set_state(t.next);
}

/// BROADCAST_COMMAND / BROADCAST_CLOSE_COMMAND: wait until every write completed.
pub fn broadcast_command<P: BroadcastCapability>(p: &mut P, tx: &mut BroadcastTransaction, t: Transition) {
    if p.registry().wait_for_broadcast_finished(tx) {
        advance(tx, t.next);
    }
}

/// SETUP_TRIGGER_READ_RESPONSES: read one response from every live client.
pub fn setup_trigger_read_responses<P: BroadcastCapability>(p: &mut P, tx: &mut BroadcastTransaction, t: Transition) {
    p.registry().setup_responses_check(tx);
    advance(tx, t.next);
}

/// WAIT_FOR_TRIGGER_RESPONSES: wait until every client answered or was lost.
pub fn wait_for_trigger_responses<P: BroadcastCapability>(p: &mut P, tx: &mut BroadcastTransaction, t: Transition) {
    if p.registry().wait_for_responses_finished(tx) {
        debug!("Round {} complete: {} response(s)", tx.identity(), tx.responses.len());
        advance(tx, t.next);
    }
}

/// ASSEMBLE_CLOSE_TRIGGER_COMMANDS: send session-close to every client.
pub fn assemble_close_trigger_commands<P: BroadcastCapability>(
    p: &mut P,
    tx: &mut BroadcastTransaction,
    t: Transition,
) {
    p.registry().assemble_close_messages(tx);
    *p.close_deadline() = None;
    advance(tx, t.next);
}

/// DELAY_FOR_CLOSE_COMMANDS: give clients time to act on session-close.
pub fn delay_for_close_commands<P: BroadcastCapability>(p: &mut P, tx: &mut BroadcastTransaction, t: Transition) {
    let delay = p.close_delay();
    let deadline = *p.close_deadline().get_or_insert_with(|| Instant::now() + delay);
    if Instant::now() >= deadline {
        *p.close_deadline() = None;
        advance(tx, t.next);
    }
}

/// CLOSE_TRIGGER_CONNECTIONS: close every client connection.
pub fn close_trigger_connections<P: BroadcastCapability>(p: &mut P, tx: &mut BroadcastTransaction, t: Transition) {
    if p.registry().close_client_connections() {
        info!("Broadcast session closed");
        advance(tx, t.next);
    }
}

/// CLOSING_CONNECTION (broadcast): drop every client, keeping the error.
pub fn close_all_clients<P: BroadcastCapability>(p: &mut P, tx: &mut BroadcastTransaction, t: Transition) {
    if p.registry().close_client_connections() {
        if tx.error().is_none() {
            let saved = p.base().saved_error();
            tx.set_error(saved);
        }
        tx.set_state(t.next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ListenerActions;
    use crate::listener_machine::{ClientSink, ListenerRole};
    use crate::mock::{ConnControl, ListenerControl, MemoryArchive, MockConnection, MockListener};
    use crate::net::ConnectionAction;
    use crate::registry::ClientId;
    use crate::transaction::TransactionFactory;
    use TransactionStateName as S;

    /// Processor whose listener machine is already started.
    fn actions(close_delay: Duration) -> BroadcastActions {
        started(close_delay, |_| {})
    }

    fn started(close_delay: Duration, script: impl FnOnce(&ListenerControl)) -> BroadcastActions {
        let registry = Arc::new(BroadcastClientRegistry::new());
        let (listener, control) = MockListener::new();
        script(&control);
        let archive = Arc::new(MemoryArchive::default());
        let inner = ListenerActions::new(BaseActions::new(TransactionFactory::default(), archive.clone()), listener);
        let mut machine = ListenerStateMachine::new(
            inner,
            ListenerRole::OpenSession,
            ClientSink::Broadcast(registry.clone()),
            Duration::from_millis(2),
        );
        machine.start().unwrap();
        BroadcastActions::new(
            BaseActions::new(TransactionFactory::default(), archive),
            machine,
            registry,
            close_delay,
        )
    }

    fn add(p: &BroadcastActions, system: &str) -> ConnControl {
        let (conn, control) = MockConnection::open("10.2.0.1");
        p.registry().add_client(ClientId::new(conn, system));
        control
    }

    fn trigger() -> BroadcastTransaction {
        let f = TransactionFactory::default();
        f.create_broadcast_transaction(f.create_identity(1, 0, 0), "execute", None, None)
    }

    #[test]
    fn test_clients_added_cleared_by_next_advance() {
        let mut p = actions(Duration::ZERO);
        let _a = add(&p, "MDL-01");
        let mut tx = trigger();

        assemble_trigger_commands(&mut p, &mut tx, Transition::or_close(S::BroadcastCommand));
        assert_eq!(tx.state(), S::BroadcastCommand);
        assert_eq!(tx.error().kind, TcpErrorKind::BroadcastClientsAdded);

        broadcast_command(&mut p, &mut tx, Transition::or_close(S::SetupTriggerReadResponses));
        assert_eq!(tx.state(), S::SetupTriggerReadResponses);
        assert!(tx.error().is_none());
    }

    #[test]
    fn test_lost_clients_survive_advances() {
        let mut p = actions(Duration::ZERO);
        let a = add(&p, "MDL-01");
        let _b = add(&p, "MDL-02");
        a.fail_writes(TcpError::io("broken pipe"));
        let mut tx = trigger();

        assemble_trigger_commands(&mut p, &mut tx, Transition::or_close(S::BroadcastCommand));
        broadcast_command(&mut p, &mut tx, Transition::or_close(S::SetupTriggerReadResponses));
        assert_eq!(tx.error().kind, TcpErrorKind::BroadcastClientsLost);

        setup_trigger_read_responses(&mut p, &mut tx, Transition::or_close(S::WaitForTriggerResponses));
        assert_eq!(tx.state(), S::WaitForTriggerResponses);
        assert_eq!(tx.error().kind, TcpErrorKind::BroadcastClientsLost);
    }

    #[test]
    fn test_close_delay_waits() {
        let mut p = actions(Duration::from_millis(40));
        let mut tx = TransactionFactory::default().create_broadcast_close_transaction(None);
        let t = Transition::or_close(S::CloseTriggerConnections);

        assemble_close_trigger_commands(&mut p, &mut tx, Transition::or_close(S::BroadcastCloseCommand));
        tx.set_state(S::DelayForCloseCommands);

        let start = Instant::now();
        delay_for_close_commands(&mut p, &mut tx, t);
        assert_eq!(tx.state(), S::DelayForCloseCommands);

        while tx.state() == S::DelayForCloseCommands {
            std::thread::sleep(Duration::from_millis(5));
            delay_for_close_commands(&mut p, &mut tx, t);
        }
        assert!(start.elapsed() >= Duration::from_millis(40));
        assert_eq!(tx.state(), S::CloseTriggerConnections);
    }

    #[test]
    fn test_close_all_clients_keeps_error() {
        let mut p = actions(Duration::ZERO);
        let a = add(&p, "MDL-01");
        let mut tx = trigger();
        assemble_trigger_commands(&mut p, &mut tx, Transition::or_close(S::BroadcastCommand));

        tx.set_error(TcpError::listener("accept failed"));
        tx.set_state(S::ClosingConnection);
        close_all_clients(&mut p, &mut tx, Transition::new(S::TransactionDone, S::TransactionDone));

        assert_eq!(tx.state(), S::TransactionDone);
        assert_eq!(tx.error().kind, TcpErrorKind::ListenerFailure);
        assert!(a.is_closed());
        assert_eq!(p.registry().live_count(), 0);
    }

    #[test]
    fn test_trigger_fails_once_listener_machine_stopped() {
        let mut p = started(Duration::ZERO, |l| l.refuse_start(TcpError::listener("address in use")));
        let deadline = Instant::now() + Duration::from_secs(5);
        while p.machine().is_running() {
            assert!(Instant::now() < deadline, "listener machine still running");
            std::thread::sleep(Duration::from_millis(2));
        }

        let a = add(&p, "MDL-01");
        let mut tx = trigger();
        assemble_trigger_commands(&mut p, &mut tx, Transition::or_close(S::BroadcastCommand));

        assert_eq!(tx.state(), S::ClosingConnection);
        assert_eq!(tx.error().kind, TcpErrorKind::ListenerFailure);
        assert_eq!(p.base().saved_error().kind, TcpErrorKind::ListenerFailure);
        assert_eq!(a.count(ConnectionAction::Write), 0);
        assert_eq!(p.registry().staged_count(), 1);
    }
}
