// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Scripted collaborators for unit tests.
//!
//! Each double is split into the boxed collaborator handed to the engine and a
//! cloneable control the test keeps to drive it afterwards.

use crate::archive::Archive;
use crate::error::TcpError;
use crate::message::{SimCorMsg, TransactionIdentity};
use crate::net::{Connection, ConnectionAction, ConnectionStatus, Connector, Listener, RemoteMessage};
use crate::transaction::TransactionRecord;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// One request seen by a [`MockConnection`].
#[derive(Clone, Debug)]
pub(crate) struct Request {
    pub action: ConnectionAction,
    pub msg: Option<SimCorMsg>,
    pub identity: Option<TransactionIdentity>,
}

#[derive(Debug)]
struct ConnState {
    busy: bool,
    status: ConnectionStatus,
    alive: bool,
    last: RemoteMessage,
    /// Request waiting for a scripted outcome
    in_flight: Option<ConnectionAction>,
    reads: VecDeque<RemoteMessage>,
    write_error: Option<TcpError>,
    hold_writes: bool,
    always_busy: bool,
    stuck_close: bool,
    requests: Vec<Request>,
    timeout: Option<Duration>,
    remote_host: String,
}

impl ConnState {
    fn complete(&mut self, outcome: RemoteMessage) {
        self.last = outcome;
        self.busy = false;
        self.in_flight = None;
    }

    fn try_complete_read(&mut self) {
        if self.in_flight == Some(ConnectionAction::Read) && !self.always_busy {
            if let Some(outcome) = self.reads.pop_front() {
                self.complete(outcome);
            }
        }
    }
}

/// Test-side handle of a [`MockConnection`].
#[derive(Clone)]
pub(crate) struct ConnControl(Arc<Mutex<ConnState>>);

impl ConnControl {
    /// Queue a successful read outcome.
    pub fn push_read(&self, msg: SimCorMsg, identity: Option<TransactionIdentity>) {
        let mut s = self.0.lock();
        s.reads.push_back(RemoteMessage {
            msg,
            identity,
            error: TcpError::none(),
        });
        s.try_complete_read();
    }

    /// Queue a failed read outcome.
    pub fn push_read_error(&self, error: TcpError) {
        let mut s = self.0.lock();
        s.reads.push_back(RemoteMessage::failed(error));
        s.try_complete_read();
    }

    /// Fail every subsequent write.
    pub fn fail_writes(&self, error: TcpError) {
        self.0.lock().write_error = Some(error);
    }

    /// Leave writes busy until [`ConnControl::release_write`].
    pub fn hold_writes(&self, hold: bool) {
        self.0.lock().hold_writes = hold;
    }

    pub fn release_write(&self) {
        let mut s = self.0.lock();
        if s.in_flight == Some(ConnectionAction::Write) {
            s.complete(RemoteMessage::default());
        }
    }

    /// Never complete anything, including close.
    pub fn always_busy(&self) {
        let mut s = self.0.lock();
        s.always_busy = true;
        s.busy = true;
    }

    /// CLOSE leaves the connection alive until [`ConnControl::finish_close`].
    pub fn stuck_close(&self, stuck: bool) {
        self.0.lock().stuck_close = stuck;
    }

    pub fn finish_close(&self) {
        let mut s = self.0.lock();
        s.status = ConnectionStatus::Closed;
        s.alive = false;
        s.busy = false;
        s.in_flight = None;
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        self.0.lock().status = status;
    }

    /// Connect attempt outcome for a connection created as connecting.
    pub fn finish_connect(&self, error: TcpError) {
        let mut s = self.0.lock();
        if error.is_none() {
            s.status = ConnectionStatus::Open;
        } else {
            s.status = ConnectionStatus::Closed;
            s.alive = false;
        }
        s.complete(RemoteMessage::failed(error));
    }

    pub fn requests(&self) -> Vec<Request> {
        self.0.lock().requests.clone()
    }

    pub fn last_request(&self) -> Option<Request> {
        self.0.lock().requests.last().cloned()
    }

    /// Messages written so far.
    pub fn written(&self) -> Vec<SimCorMsg> {
        self.0
            .lock()
            .requests
            .iter()
            .filter(|r| r.action == ConnectionAction::Write)
            .filter_map(|r| r.msg.clone())
            .collect()
    }

    pub fn count(&self, action: ConnectionAction) -> usize {
        self.0.lock().requests.iter().filter(|r| r.action == action).count()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.0.lock().timeout
    }

    pub fn is_closed(&self) -> bool {
        let s = self.0.lock();
        s.status == ConnectionStatus::Closed && !s.alive
    }
}

/// Scripted [`Connection`].
pub(crate) struct MockConnection(Arc<Mutex<ConnState>>);

impl MockConnection {
    /// An open, idle connection.
    pub fn open(remote_host: &str) -> (Box<dyn Connection>, ConnControl) {
        Self::with_status(remote_host, ConnectionStatus::Open, false)
    }

    /// A connection still connecting (busy until `finish_connect`).
    pub fn connecting(remote_host: &str) -> (Box<dyn Connection>, ConnControl) {
        Self::with_status(remote_host, ConnectionStatus::Busy, true)
    }

    fn with_status(remote_host: &str, status: ConnectionStatus, busy: bool) -> (Box<dyn Connection>, ConnControl) {
        let state = Arc::new(Mutex::new(ConnState {
            busy,
            status,
            alive: true,
            last: RemoteMessage::default(),
            in_flight: None,
            reads: VecDeque::new(),
            write_error: None,
            hold_writes: false,
            always_busy: false,
            stuck_close: false,
            requests: Vec::new(),
            timeout: None,
            remote_host: remote_host.to_string(),
        }));
        (Box::new(MockConnection(Arc::clone(&state))), ConnControl(state))
    }
}

impl Connection for MockConnection {
    fn is_busy(&self) -> bool {
        let s = self.0.lock();
        s.busy || s.always_busy
    }

    fn from_remote_msg(&self) -> RemoteMessage {
        self.0.lock().last.clone()
    }

    fn set_to_remote_msg(
        &mut self,
        action: ConnectionAction,
        msg: Option<SimCorMsg>,
        identity: Option<TransactionIdentity>,
    ) {
        let mut s = self.0.lock();
        s.requests.push(Request { action, msg, identity });
        s.busy = true;
        s.in_flight = Some(action);
        if s.always_busy {
            return;
        }
        match action {
            ConnectionAction::Read => s.try_complete_read(),
            ConnectionAction::Write => {
                if let Some(error) = s.write_error.clone() {
                    s.complete(RemoteMessage::failed(error));
                } else if !s.hold_writes {
                    s.complete(RemoteMessage::default());
                }
            }
            ConnectionAction::Close => {
                if !s.stuck_close {
                    s.status = ConnectionStatus::Closed;
                    s.alive = false;
                    s.busy = false;
                    s.in_flight = None;
                }
            }
        }
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.0.lock().timeout = Some(timeout);
    }

    fn status(&self) -> ConnectionStatus {
        self.0.lock().status
    }

    fn is_alive(&self) -> bool {
        self.0.lock().alive
    }

    fn remote_host(&self) -> String {
        self.0.lock().remote_host.clone()
    }
}

#[derive(Default)]
struct ListenerState {
    listening: bool,
    refuse_start: Option<TcpError>,
    error: TcpError,
    pending: VecDeque<Box<dyn Connection>>,
    starts: usize,
    stop_polls_left: usize,
}

/// Test-side handle of a [`MockListener`].
#[derive(Clone)]
pub(crate) struct ListenerControl(Arc<Mutex<ListenerState>>);

impl ListenerControl {
    pub fn push_connection(&self, conn: Box<dyn Connection>) {
        self.0.lock().pending.push_back(conn);
    }

    pub fn set_error(&self, error: TcpError) {
        self.0.lock().error = error;
    }

    pub fn refuse_start(&self, error: TcpError) {
        self.0.lock().refuse_start = Some(error);
    }

    /// Number of `stop_listener` calls returning `false` before stopping.
    pub fn slow_stop(&self, polls: usize) {
        self.0.lock().stop_polls_left = polls;
    }

    pub fn starts(&self) -> usize {
        self.0.lock().starts
    }

    pub fn is_listening(&self) -> bool {
        self.0.lock().listening
    }

    pub fn pending(&self) -> usize {
        self.0.lock().pending.len()
    }
}

/// Scripted [`Listener`].
pub(crate) struct MockListener(Arc<Mutex<ListenerState>>);

impl MockListener {
    pub fn new() -> (Box<dyn Listener>, ListenerControl) {
        let state = Arc::new(Mutex::new(ListenerState::default()));
        (Box::new(MockListener(Arc::clone(&state))), ListenerControl(state))
    }
}

impl Listener for MockListener {
    fn start_listener(&mut self) -> bool {
        let mut s = self.0.lock();
        s.starts += 1;
        if let Some(error) = s.refuse_start.clone() {
            s.error = error;
            return false;
        }
        s.listening = true;
        true
    }

    fn stop_listener(&mut self) -> bool {
        let mut s = self.0.lock();
        if s.stop_polls_left > 0 {
            s.stop_polls_left -= 1;
            return false;
        }
        s.listening = false;
        true
    }

    fn check_for_listener_connection(&mut self) -> Option<Box<dyn Connection>> {
        let mut s = self.0.lock();
        if !s.listening {
            return None;
        }
        s.pending.pop_front()
    }

    fn check_for_errors(&self) -> TcpError {
        self.0.lock().error.clone()
    }

    fn is_listening(&self) -> bool {
        self.0.lock().listening
    }
}

/// [`Connector`] handing out pre-built connections.
pub(crate) struct MockConnector {
    queue: Arc<Mutex<VecDeque<Box<dyn Connection>>>>,
}

#[derive(Clone)]
pub(crate) struct ConnectorControl(Arc<Mutex<VecDeque<Box<dyn Connection>>>>);

impl ConnectorControl {
    pub fn push(&self, conn: Box<dyn Connection>) {
        self.0.lock().push_back(conn);
    }
}

impl MockConnector {
    pub fn new() -> (Box<dyn Connector>, ConnectorControl) {
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        (
            Box::new(MockConnector {
                queue: Arc::clone(&queue),
            }),
            ConnectorControl(queue),
        )
    }
}

impl Connector for MockConnector {
    fn connect(&mut self) -> Box<dyn Connection> {
        match self.queue.lock().pop_front() {
            Some(conn) => conn,
            None => {
                let (conn, control) = MockConnection::connecting("0.0.0.0");
                control.finish_connect(TcpError::closed("no scripted connection"));
                conn
            }
        }
    }
}

/// Archive that keeps records in memory.
#[derive(Default)]
pub(crate) struct MemoryArchive {
    records: Mutex<Vec<TransactionRecord>>,
}

impl MemoryArchive {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn records(&self) -> Vec<TransactionRecord> {
        self.records.lock().clone()
    }
}

impl Archive for MemoryArchive {
    fn is_archiving_enabled(&self) -> bool {
        true
    }

    fn log_transaction(&self, record: TransactionRecord) {
        self.records.lock().push(record);
    }
}
