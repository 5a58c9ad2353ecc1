// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Background state machine that accepts connections.
//!
//! Runs the listener open-phase table on its own thread, independently of the
//! engine that owns it, and hands every completed session off to either the
//! broadcast registry or a single-slot channel.
//!
//! ```text
//!   START_LISTENER -> LISTEN_FOR_CONNECTIONS -> [open-session handshake] -> TRANSACTION_DONE
//!                           ^                                                   |
//!                           +------------------ handoff -----------------------+
//! ```

use crate::actions::{BaseCapability, ListenerActions, SessionSource};
use crate::error::{EngineError, TcpError, TcpErrorKind};
use crate::net::Connection;
use crate::registry::{BroadcastClientRegistry, ClientId};
use crate::transaction::{Direction, SimpleTransaction, Transaction, TransactionStateName};
use crate::wake::PollTimer;
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What the listener does with a new connection before handing it off.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenerRole {
    /// Complete the session-open handshake as the receiving side
    OpenSession,
    /// Hand the connection off as soon as it is accepted
    Plain,
}

impl ListenerRole {
    fn open_direction(self) -> Direction {
        match self {
            ListenerRole::OpenSession => Direction::ReceiveCommand,
            ListenerRole::Plain => Direction::None,
        }
    }
}

/// Where completed sessions go.
#[derive(Clone)]
pub enum ClientSink {
    /// Staged into the registry for the next broadcast round
    Broadcast(Arc<BroadcastClientRegistry>),
    /// One at a time, consumed by [`ListenerStateMachine::pickup_one_client`]
    Single,
}

struct Shared {
    running: AtomicBool,
    timer: PollTimer,
    error: Mutex<TcpError>,
}

/// Accepting state machine with its own thread.
pub struct ListenerStateMachine {
    shared: Arc<Shared>,
    role: ListenerRole,
    sink: ClientSink,
    poll_interval: Duration,
    handoff_tx: Sender<ClientId>,
    handoff_rx: Receiver<ClientId>,
    /// Processor, while the thread is not running
    actions: Option<ListenerActions>,
    handle: Option<JoinHandle<ListenerActions>>,
}

impl ListenerStateMachine {
    pub fn new(actions: ListenerActions, role: ListenerRole, sink: ClientSink, poll_interval: Duration) -> Self {
        let (handoff_tx, handoff_rx) = channel::bounded(1);
        Self {
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                timer: PollTimer::new(),
                error: Mutex::new(TcpError::none()),
            }),
            role,
            sink,
            poll_interval,
            handoff_tx,
            handoff_rx,
            actions: Some(actions),
            handle: None,
        }
    }

    /// Start the accept thread.
    pub fn start(&mut self) -> Result<(), EngineError> {
        // Also refused while a stop is still in progress
        if self.is_alive() {
            return Err(EngineError::AlreadyRunning);
        }
        self.reclaim();

        let actions = self
            .actions
            .take()
            .ok_or_else(|| EngineError::Spawn("listener processor lost".into()))?;

        *self.shared.error.lock() = TcpError::none();
        self.shared.running.store(true, Ordering::Release);

        let worker = Worker {
            shared: Arc::clone(&self.shared),
            role: self.role,
            sink: self.sink.clone(),
            poll_interval: self.poll_interval,
            handoff: self.handoff_tx.clone(),
        };

        let handle = std::thread::Builder::new()
            .name("simcor-listener".to_string())
            .spawn(move || worker.run(actions))
            .map_err(|e| {
                self.shared.running.store(false, Ordering::Release);
                EngineError::Spawn(e.to_string())
            })?;

        info!("Listener state machine started ({:?})", self.role);
        self.handle = Some(handle);
        Ok(())
    }

    /// Request a stop; poll [`ListenerStateMachine::is_alive`] for completion.
    pub fn stop(&self) {
        if self.shared.running.swap(false, Ordering::AcqRel) {
            debug!("Listener state machine stop requested");
        }
        self.shared.timer.wake();
    }

    /// Keep-running flag; false after `stop` or a fatal listener error.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// True until the thread has exited.
    pub fn is_alive(&self) -> bool {
        self.handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    pub fn is_client_available(&self) -> bool {
        !self.handoff_rx.is_empty()
    }

    /// Take the waiting client, if any.
    pub fn pickup_one_client(&self) -> Option<ClientId> {
        self.handoff_rx.try_recv().ok()
    }

    /// Last error seen by the accept cycle.
    pub fn error(&self) -> TcpError {
        self.shared.error.lock().clone()
    }

    /// Recover the processor from a finished thread.
    fn reclaim(&mut self) {
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(actions) => self.actions = Some(actions),
                Err(_) => error!("Listener thread panicked"),
            }
        }
    }
}

impl Drop for ListenerStateMachine {
    fn drop(&mut self) {
        self.stop();
        self.reclaim();
    }
}

struct Worker {
    shared: Arc<Shared>,
    role: ListenerRole,
    sink: ClientSink,
    poll_interval: Duration,
    handoff: Sender<ClientId>,
}

impl Worker {
    fn run(self, mut actions: ListenerActions) -> ListenerActions {
        let table = ListenerActions::open_table(self.role.open_direction());
        let mut tx = self.new_transaction(&actions, TransactionStateName::StartListener);
        let mut pending: Option<ClientId> = None;

        while self.shared.running.load(Ordering::Acquire) {
            if let Some(client) = pending.take() {
                pending = self.offer(client);
                if pending.is_some() {
                    self.shared.timer.wait(self.poll_interval);
                    continue;
                }
            }

            let executed = tx.state();
            if let Err(e) = table.execute(&mut actions, &mut tx) {
                error!("Listener state machine: {}", e);
                *self.shared.error.lock() = TcpError::listener(e.to_string());
                break;
            }

            if executed == TransactionStateName::TransactionDone {
                let error = tx.error().clone();
                if error.is_none() {
                    pending = self.handoff_client(&mut actions, &tx);
                } else if error.kind == TcpErrorKind::ListenerFailure {
                    error!("Listener failed: {}", error);
                    *self.shared.error.lock() = error;
                    break;
                } else {
                    warn!("Session setup failed: {}", error);
                    *self.shared.error.lock() = error;
                }
                tx = self.new_transaction(&actions, TransactionStateName::ListenForConnections);
                continue;
            }

            self.shared.timer.wait(self.poll_interval);
        }

        self.shared.running.store(false, Ordering::Release);
        drop(pending);
        let mut polls = 0;
        while !actions.release() && polls < 100 {
            polls += 1;
            std::thread::sleep(Duration::from_millis(10));
        }
        info!("Listener state machine stopped");
        actions
    }

    fn new_transaction(&self, actions: &ListenerActions, state: TransactionStateName) -> SimpleTransaction {
        let factory = actions.base_actions().factory();
        let mut tx = factory.create_simple_transaction(self.role.open_direction(), Default::default(), None);
        tx.set_state(state);
        tx
    }

    fn handoff_client(&self, actions: &mut ListenerActions, tx: &SimpleTransaction) -> Option<ClientId> {
        let connection: Box<dyn Connection> = actions.base().take_connection()?;
        let system = match self.role {
            ListenerRole::OpenSession => tx.command.content_str().to_string(),
            ListenerRole::Plain => connection.remote_host(),
        };
        let client = ClientId::new(connection, system);
        match &self.sink {
            ClientSink::Broadcast(registry) => {
                registry.add_client(client);
                None
            }
            ClientSink::Single => self.offer(client),
        }
    }

    /// Try the single slot; gives the client back if it is still occupied.
    fn offer(&self, client: ClientId) -> Option<ClientId> {
        match self.handoff.try_send(client) {
            Ok(()) => None,
            Err(TrySendError::Full(client)) => Some(client),
            Err(TrySendError::Disconnected(_)) => None,
        }
    }
}
