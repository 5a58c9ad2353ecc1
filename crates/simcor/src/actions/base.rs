// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Base processor and the connection-level state operations.

use super::{BaseCapability, SessionSource, Transition};
use crate::archive::Archive;
use crate::error::{TcpError, TcpErrorKind};
use crate::machine::{tables, StateTable};
use crate::message::MsgType;
use crate::net::{Connection, ConnectionAction, ConnectionStatus, Connector};
use crate::transaction::{Direction, SimpleTransaction, Transaction, TransactionFactory, TransactionStateName};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Connection, factory and archive for one engine instance.
pub struct BaseActions {
    connection: Option<Box<dyn Connection>>,
    connector: Option<Box<dyn Connector>>,
    factory: TransactionFactory,
    archive: Arc<dyn Archive>,
    /// Error that caused the pending close, reported if the close itself is clean
    saved_error: Mutex<TcpError>,
    close_requested: bool,
}

impl BaseActions {
    pub fn new(factory: TransactionFactory, archive: Arc<dyn Archive>) -> Self {
        Self {
            connection: None,
            connector: None,
            factory,
            archive,
            saved_error: Mutex::new(TcpError::none()),
            close_requested: false,
        }
    }

    /// Sessions opened with OPENING_CONNECTION use this connector.
    pub fn with_connector(mut self, connector: Box<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn factory(&self) -> &TransactionFactory {
        &self.factory
    }

    pub fn archive(&self) -> &Arc<dyn Archive> {
        &self.archive
    }

    pub fn has_connection(&self) -> bool {
        self.connection.is_some()
    }

    pub fn connection(&self) -> Option<&dyn Connection> {
        self.connection.as_deref()
    }

    /// Attach an already-open connection.
    pub fn attach(&mut self, connection: Box<dyn Connection>) {
        if self.connection.is_some() {
            warn!("Replacing an attached connection");
        }
        self.close_requested = false;
        self.connection = Some(connection);
    }

    /// Detach the connection without closing it.
    pub fn take_connection(&mut self) -> Option<Box<dyn Connection>> {
        self.close_requested = false;
        self.connection.take()
    }

    pub fn saved_error(&self) -> TcpError {
        self.saved_error.lock().clone()
    }

    pub fn save_error(&self, error: TcpError) {
        *self.saved_error.lock() = error;
    }

    pub fn reset_error(&self) {
        *self.saved_error.lock() = TcpError::none();
    }

    /// Success outcome: clear the error and advance.
    pub fn succeed<T: Transaction>(tx: &mut T, next: TransactionStateName) {
        tx.set_error(TcpError::none());
        tx.set_state(next);
    }

    /// Failure outcome: save and report `error`, route to the error state.
    pub fn fail<T: Transaction>(&self, tx: &mut T, on_error: TransactionStateName, error: TcpError) {
        debug!("{} failed in {}: {}", tx.identity(), tx.state(), error);
        self.save_error(error.clone());
        tx.set_error(error);
        tx.set_state(on_error);
    }

    fn no_connection<T: Transaction>(&self, tx: &mut T, t: Transition) {
        self.fail(tx, t.on_error, TcpError::closed("no connection attached"));
    }

    /// Outcome of the last action if the connection is idle.
    ///
    /// `None` while pending or without a connection; `Some(Err)` on failure.
    fn poll_idle(&self) -> Option<Result<crate::net::RemoteMessage, TcpError>> {
        let conn = self.connection.as_ref()?;
        if conn.is_busy() {
            return None;
        }
        let outcome = conn.from_remote_msg();
        if outcome.error.is_err() {
            Some(Err(outcome.error))
        } else {
            Some(Ok(outcome))
        }
    }

    fn write<T: Transaction>(&mut self, tx: &mut T, msg: crate::message::SimCorMsg, t: Transition) {
        let identity = tx.identity().clone();
        let timeout = tx.timeout();
        match self.connection.as_mut() {
            Some(conn) => {
                conn.set_timeout(timeout);
                conn.set_to_remote_msg(ConnectionAction::Write, Some(msg), Some(identity));
                Self::succeed(tx, t.next);
            }
            None => self.no_connection(tx, t),
        }
    }
}

impl BaseCapability for BaseActions {
    fn base(&mut self) -> &mut BaseActions {
        self
    }
}

impl SessionSource for BaseActions {
    fn open_table(open: Direction) -> StateTable<Self, SimpleTransaction> {
        tables::connector_open_table(open)
    }

    fn open_start() -> TransactionStateName {
        TransactionStateName::OpeningConnection
    }

    fn release(&mut self) -> bool {
        true
    }
}

/// OPENING_CONNECTION: start an outbound connection.
pub fn open_connection<P: BaseCapability, T: Transaction>(p: &mut P, tx: &mut T, t: Transition) {
    let base = p.base();
    if base.connection.is_some() {
        BaseActions::succeed(tx, t.next);
        return;
    }
    let Some(connector) = base.connector.as_mut() else {
        base.fail(tx, t.on_error, TcpError::io("no connector configured"));
        return;
    };
    let connection = connector.connect();
    debug!("Connecting to {}", connection.remote_host());
    base.close_requested = false;
    base.connection = Some(connection);
    BaseActions::succeed(tx, t.next);
}

/// CHECK_OPEN_CONNECTION: wait until the outbound connection is open.
pub fn check_open_connection<P: BaseCapability, T: Transaction>(p: &mut P, tx: &mut T, t: Transition) {
    let base = p.base();
    let Some(conn) = base.connection.as_ref() else {
        base.no_connection(tx, t);
        return;
    };
    if conn.is_busy() {
        return;
    }
    match conn.status() {
        ConnectionStatus::Open => {
            info!("Connected to {}", conn.remote_host());
            BaseActions::succeed(tx, t.next);
        }
        ConnectionStatus::Busy => {}
        ConnectionStatus::Closed => {
            let mut error = conn.from_remote_msg().error;
            if error.is_none() {
                error = TcpError::closed(format!("connection to {} refused", conn.remote_host()));
            }
            base.fail(tx, t.on_error, error);
        }
    }
}

/// SETUP_READ_COMMAND / SETUP_READ_RESPONSE: request a read.
pub fn setup_read<P: BaseCapability, T: Transaction>(p: &mut P, tx: &mut T, t: Transition) {
    let base = p.base();
    let timeout = tx.timeout();
    match base.connection.as_mut() {
        Some(conn) if conn.is_busy() => {}
        Some(conn) => {
            conn.set_timeout(timeout);
            conn.set_to_remote_msg(ConnectionAction::Read, None, None);
            BaseActions::succeed(tx, t.next);
        }
        None => base.no_connection(tx, t),
    }
}

/// SENDING_COMMAND / SENDING_RESPONSE / SENDING_CLOSE_COMMAND: wait for the write.
pub fn wait_for_send<P: BaseCapability, T: Transaction>(p: &mut P, tx: &mut T, t: Transition) {
    let base = p.base();
    if base.connection.is_none() {
        base.no_connection(tx, t);
        return;
    }
    match base.poll_idle() {
        None => {}
        Some(Ok(_)) => BaseActions::succeed(tx, t.next),
        Some(Err(e)) => base.fail(tx, t.on_error, e),
    }
}

/// WAIT_FOR_OPEN_COMMAND: read must be a session-open command.
pub fn wait_for_open_command<P: BaseCapability>(p: &mut P, tx: &mut SimpleTransaction, t: Transition) {
    let base = p.base();
    if base.connection.is_none() {
        base.no_connection(tx, t);
        return;
    }
    match base.poll_idle() {
        None => {}
        Some(Err(e)) => base.fail(tx, t.on_error, e),
        Some(Ok(remote)) => {
            if !remote.msg.is_open_session() {
                let error = TcpError::protocol(format!("expected open-session command, got {}", remote.msg));
                base.fail(tx, t.on_error, error);
                return;
            }
            debug!("Open-session from {}", remote.msg.content_str());
            if let Some(identity) = remote.identity {
                tx.core.identity = identity;
            }
            tx.command = remote.msg;
            BaseActions::succeed(tx, t.next);
        }
    }
}

/// ASSEMBLE_OPEN_RESPONSE: answer the session-open command.
pub fn assemble_open_response<P: BaseCapability>(p: &mut P, tx: &mut SimpleTransaction, t: Transition) {
    let base = p.base();
    tx.response = base.factory.create_session_response();
    let response = tx.response.clone();
    base.write(tx, response, t);
}

/// ASSEMBLE_OPEN_COMMAND: send the session-open command.
pub fn assemble_open_command<P: BaseCapability>(p: &mut P, tx: &mut SimpleTransaction, t: Transition) {
    let base = p.base();
    tx.command = base.factory.create_session_command(true);
    let command = tx.command.clone();
    base.write(tx, command, t);
}

/// WAIT_FOR_OPEN_RESPONSE: read must be an OK answer to session-open.
pub fn wait_for_open_response<P: BaseCapability>(p: &mut P, tx: &mut SimpleTransaction, t: Transition) {
    let base = p.base();
    if base.connection.is_none() {
        base.no_connection(tx, t);
        return;
    }
    match base.poll_idle() {
        None => {}
        Some(Err(e)) => base.fail(tx, t.on_error, e),
        Some(Ok(remote)) => {
            tx.response = remote.msg;
            match tx.response.msg_type {
                MsgType::OkResponse => {
                    info!("Session opened with {}", tx.response.content_str());
                    BaseActions::succeed(tx, t.next);
                }
                MsgType::NotOkResponse => {
                    let error = TcpError::protocol(format!("open-session refused: {}", tx.response.content_str()));
                    base.fail(tx, t.on_error, error);
                }
                _ => {
                    let error = TcpError::protocol(format!("expected open-session response, got {}", tx.response));
                    base.fail(tx, t.on_error, error);
                }
            }
        }
    }
}

/// WAIT_FOR_COMMAND: take the next command.
///
/// A session-close command routes to `t.on_error` with no error set.
pub fn wait_for_command<P: BaseCapability>(p: &mut P, tx: &mut SimpleTransaction, t: Transition) {
    let base = p.base();
    if base.connection.is_none() {
        base.no_connection(tx, t);
        return;
    }
    match base.poll_idle() {
        None => {}
        Some(Err(e)) => base.fail(tx, t.on_error, e),
        Some(Ok(remote)) => {
            if remote.msg.msg_type != MsgType::Command {
                let error = TcpError::protocol(format!("expected command, got {}", remote.msg));
                base.fail(tx, t.on_error, error);
                return;
            }
            if let Some(identity) = remote.identity {
                tx.core.identity = identity;
            }
            let closing = remote.msg.is_close_session();
            tx.command = remote.msg;
            if closing {
                info!("Session close requested by remote");
                tx.set_error(TcpError::none());
                tx.set_state(t.on_error);
            } else {
                trace!("Command {} received", tx.identity());
                BaseActions::succeed(tx, t.next);
            }
        }
    }
}

/// COMMAND_AVAILABLE / RESPONSE_AVAILABLE: wait for the consumer to pick up.
pub fn wait_for_pickup<P: BaseCapability>(_p: &mut P, tx: &mut SimpleTransaction, t: Transition) {
    if tx.picked_up {
        BaseActions::succeed(tx, t.next);
    }
}

/// WAIT_FOR_RESPONSE_POSTING / WAIT_FOR_COMMAND_POSTING: wait for the consumer to post.
pub fn wait_for_posting<P: BaseCapability>(_p: &mut P, tx: &mut SimpleTransaction, t: Transition) {
    if tx.posted {
        BaseActions::succeed(tx, t.next);
    }
}

/// ASSEMBLE_RESPONSE: send the posted response.
pub fn assemble_response<P: BaseCapability>(p: &mut P, tx: &mut SimpleTransaction, t: Transition) {
    let response = tx.response.clone();
    if response.is_null() {
        let base = p.base();
        base.fail(tx, t.on_error, TcpError::protocol("no response posted"));
        return;
    }
    p.base().write(tx, response, t);
}

/// ASSEMBLE_COMMAND: send the posted command.
pub fn assemble_command<P: BaseCapability>(p: &mut P, tx: &mut SimpleTransaction, t: Transition) {
    let command = tx.command.clone();
    if command.is_null() {
        let base = p.base();
        base.fail(tx, t.on_error, TcpError::protocol("no command posted"));
        return;
    }
    p.base().write(tx, command, t);
}

/// WAIT_FOR_RESPONSE: take the response to the command just sent.
pub fn wait_for_response<P: BaseCapability>(p: &mut P, tx: &mut SimpleTransaction, t: Transition) {
    let base = p.base();
    if base.connection.is_none() {
        base.no_connection(tx, t);
        return;
    }
    match base.poll_idle() {
        None => {}
        Some(Err(e)) => base.fail(tx, t.on_error, e),
        Some(Ok(remote)) => {
            if !remote.msg.msg_type.is_response() {
                let error = TcpError::protocol(format!("expected response, got {}", remote.msg));
                base.fail(tx, t.on_error, error);
                return;
            }
            if let Some(identity) = &remote.identity {
                if identity != tx.identity() {
                    let error = TcpError::protocol(format!(
                        "response for {} while waiting on {}",
                        identity,
                        tx.identity()
                    ));
                    base.fail(tx, t.on_error, error);
                    return;
                }
            }
            tx.response = remote.msg;
            BaseActions::succeed(tx, t.next);
        }
    }
}

/// ASSEMBLE_CLOSE_COMMAND: send the session-close command.
pub fn assemble_close_command<P: BaseCapability>(p: &mut P, tx: &mut SimpleTransaction, t: Transition) {
    let base = p.base();
    tx.command = base.factory.create_session_command(false);
    let command = tx.command.clone();
    base.write(tx, command, t);
}

/// CLOSING_CONNECTION: close and drop the connection.
///
/// The transaction ends with the saved error if one exists, otherwise with
/// whatever the close itself reported.
pub fn close_connection<P: BaseCapability, T: Transaction>(p: &mut P, tx: &mut T, t: Transition) {
    let base = p.base();
    let Some(conn) = base.connection.as_mut() else {
        let saved = base.saved_error();
        tx.set_error(saved);
        tx.set_state(t.next);
        return;
    };

    if !base.close_requested {
        conn.set_to_remote_msg(ConnectionAction::Close, None, None);
        base.close_requested = true;
    }

    if conn.status() != ConnectionStatus::Closed || conn.is_alive() {
        return;
    }

    let close_error = conn.from_remote_msg().error;
    debug!("Connection to {} closed", conn.remote_host());
    base.connection = None;
    base.close_requested = false;

    let saved = base.saved_error();
    tx.set_error(if saved.is_err() { saved } else { close_error });
    tx.set_state(t.next);
}

/// TRANSACTION_DONE: archive and reset the saved error.
pub fn record_transaction<P: BaseCapability, T: Transaction>(p: &mut P, tx: &mut T, t: Transition) {
    let base = p.base();
    if base.archive.is_archiving_enabled() && tx.direction() != Direction::None {
        base.archive.log_transaction(tx.record());
    }
    if tx.error().kind != TcpErrorKind::None {
        debug!("{} finished with {}", tx.identity(), tx.error());
    }
    base.reset_error();
    tx.set_state(t.next);
}
