// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Listener-connection layer: sessions whose connection is accepted directly.

use super::{BaseActions, BaseCapability, ListenerCapability, SessionSource, Transition};
use crate::error::TcpError;
use crate::machine::{tables, StateTable};
use crate::net::Listener;
use crate::transaction::{Direction, SimpleTransaction, Transaction, TransactionStateName};
use tracing::{debug, info};

/// Base processor plus an owned [`Listener`].
pub struct ListenerActions {
    base: BaseActions,
    listener: Box<dyn Listener>,
}

impl ListenerActions {
    pub fn new(base: BaseActions, listener: Box<dyn Listener>) -> Self {
        Self { base, listener }
    }

    pub fn base_actions(&self) -> &BaseActions {
        &self.base
    }
}

impl BaseCapability for ListenerActions {
    fn base(&mut self) -> &mut BaseActions {
        &mut self.base
    }
}

impl ListenerCapability for ListenerActions {
    fn listener(&mut self) -> &mut dyn Listener {
        self.listener.as_mut()
    }
}

impl SessionSource for ListenerActions {
    fn open_table(open: Direction) -> StateTable<Self, SimpleTransaction> {
        tables::listener_open_table(open)
    }

    fn open_start() -> TransactionStateName {
        TransactionStateName::StartListener
    }

    fn release(&mut self) -> bool {
        self.listener.stop_listener()
    }
}

/// START_LISTENER: start accepting, or continue if already listening.
pub fn start_listener<P: ListenerCapability, T: Transaction>(p: &mut P, tx: &mut T, t: Transition) {
    let listener = p.listener();
    if listener.is_listening() || listener.start_listener() {
        BaseActions::succeed(tx, t.next);
        return;
    }
    let mut error = listener.check_for_errors();
    if error.is_none() {
        error = TcpError::listener("listener failed to start");
    }
    p.base().fail(tx, t.on_error, error);
}

/// LISTEN_FOR_CONNECTIONS: attach the next accepted connection.
pub fn listen_for_connection<P: ListenerCapability, T: Transaction>(p: &mut P, tx: &mut T, t: Transition) {
    let listener = p.listener();
    if let Some(connection) = listener.check_for_listener_connection() {
        info!("Accepted connection from {}", connection.remote_host());
        p.base().attach(connection);
        BaseActions::succeed(tx, t.next);
        return;
    }
    let error = listener.check_for_errors();
    if error.is_err() {
        p.base().fail(tx, t.on_error, error);
    }
}

/// STOP_LISTENER: wait for the listener to stop.
pub fn stop_listener<P: ListenerCapability, T: Transaction>(p: &mut P, tx: &mut T, t: Transition) {
    if p.listener().stop_listener() {
        debug!("Listener stopped");
        BaseActions::succeed(tx, t.next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TcpErrorKind;
    use crate::mock::{MemoryArchive, MockConnection, MockListener};
    use crate::transaction::TransactionFactory;
    use std::sync::Arc;
    use TransactionStateName as S;

    fn actions() -> (ListenerActions, crate::mock::ListenerControl) {
        let (listener, control) = MockListener::new();
        let base = BaseActions::new(TransactionFactory::default(), Arc::new(MemoryArchive::default()));
        (ListenerActions::new(base, listener), control)
    }

    fn tx(state: S) -> SimpleTransaction {
        let mut tx = TransactionFactory::default().create_receive_command_transaction(None);
        tx.set_state(state);
        tx
    }

    #[test]
    fn test_start_listener_once() {
        let (mut p, control) = actions();
        let mut tx = tx(S::StartListener);
        start_listener(&mut p, &mut tx, Transition::or_close(S::ListenForConnections));
        assert_eq!(tx.state(), S::ListenForConnections);

        let mut again = self::tx(S::StartListener);
        start_listener(&mut p, &mut again, Transition::or_close(S::ListenForConnections));
        assert_eq!(again.state(), S::ListenForConnections);
        assert_eq!(control.starts(), 1);
    }

    #[test]
    fn test_start_failure_is_listener_error() {
        let (mut p, control) = actions();
        control.refuse_start(TcpError::listener("address in use"));
        let mut tx = tx(S::StartListener);
        start_listener(&mut p, &mut tx, Transition::or_close(S::ListenForConnections));
        assert_eq!(tx.state(), S::ClosingConnection);
        assert_eq!(tx.error().kind, TcpErrorKind::ListenerFailure);
    }

    #[test]
    fn test_listen_pending_until_connection() {
        let (mut p, control) = actions();
        let mut tx = tx(S::StartListener);
        start_listener(&mut p, &mut tx, Transition::or_close(S::ListenForConnections));

        for _ in 0..10 {
            listen_for_connection(&mut p, &mut tx, Transition::or_close(S::SetupReadCommand));
            assert_eq!(tx.state(), S::ListenForConnections);
        }

        let (conn, _c) = MockConnection::open("192.168.1.20");
        control.push_connection(conn);
        listen_for_connection(&mut p, &mut tx, Transition::or_close(S::SetupReadCommand));
        assert_eq!(tx.state(), S::SetupReadCommand);
        assert_eq!(p.base().connection().map(|c| c.remote_host()), Some("192.168.1.20".to_string()));
    }

    #[test]
    fn test_listener_error_while_listening() {
        let (mut p, control) = actions();
        let mut tx = tx(S::ListenForConnections);
        control.set_error(TcpError::listener("accept failed"));
        listen_for_connection(&mut p, &mut tx, Transition::or_close(S::SetupReadCommand));
        assert_eq!(tx.state(), S::ClosingConnection);
        assert_eq!(tx.error().kind, TcpErrorKind::ListenerFailure);
    }

    #[test]
    fn test_stop_listener_polls_until_stopped() {
        let (mut p, control) = actions();
        control.slow_stop(2);
        let mut tx = tx(S::StopListener);
        let t = Transition::new(S::TransactionDone, S::TransactionDone);
        stop_listener(&mut p, &mut tx, t);
        stop_listener(&mut p, &mut tx, t);
        assert_eq!(tx.state(), S::StopListener);
        stop_listener(&mut p, &mut tx, t);
        assert_eq!(tx.state(), S::TransactionDone);
    }
}
