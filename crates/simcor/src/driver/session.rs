// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Point-to-point session driver.

use super::{publish, FINISHED_BACKLOG};
use crate::actions::SessionSource;
use crate::error::{EngineError, TcpError};
use crate::machine::{tables, StateTable};
use crate::message::{SimCorMsg, TransactionIdentity};
use crate::net::ConnectionAction;
use crate::transaction::{Direction, SimpleTransaction, Transaction, TransactionFactory, TransactionStateName};
use crate::wake::PollTimer;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Roles played during session open and afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionRole {
    /// `SendCommand` sends open-session, `ReceiveCommand` answers it, `None` skips it
    pub open: Direction,
    /// `SendCommand` originates commands; otherwise commands are received
    pub steady: Direction,
}

impl SessionRole {
    /// Opens the session and sends commands.
    pub const INITIATOR: Self = Self::new(Direction::SendCommand, Direction::SendCommand);
    /// Accepts the session and answers commands.
    pub const RESPONDER: Self = Self::new(Direction::ReceiveCommand, Direction::ReceiveCommand);
    /// Opens the session, then answers commands (broadcast client).
    pub const CLIENT: Self = Self::new(Direction::SendCommand, Direction::ReceiveCommand);

    pub const fn new(open: Direction, steady: Direction) -> Self {
        Self { open, steady }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Open,
    Steady,
    Close,
}

struct Shared {
    current: Mutex<SimpleTransaction>,
    running: AtomicBool,
    close_requested: AtomicBool,
    timer: PollTimer,
    engine_error: Mutex<Option<EngineError>>,
    finished_tx: Sender<SimpleTransaction>,
    finished_rx: Receiver<SimpleTransaction>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// Runs one point-to-point engine.
///
/// Use [`SessionDriver::spawn`] to run it on its own thread, or
/// [`SessionDriver::step`] to drive it by hand.
pub struct SessionDriver<P: SessionSource> {
    actions: P,
    role: SessionRole,
    factory: TransactionFactory,
    poll_interval: Duration,
    phase: Phase,
    open: StateTable<P, SimpleTransaction>,
    steady: StateTable<P, SimpleTransaction>,
    close: StateTable<P, SimpleTransaction>,
    shared: Arc<Shared>,
}

impl<P: SessionSource> SessionDriver<P> {
    pub fn new(mut actions: P, role: SessionRole, poll_interval: Duration) -> Self {
        let factory = actions.base().factory().clone();
        let first = new_transaction(&factory, role, Phase::Open, P::open_start());
        let (finished_tx, finished_rx) = channel::bounded(FINISHED_BACKLOG);

        Self {
            open: P::open_table(role.open),
            steady: tables::steady_table(role.steady),
            close: tables::close_table(),
            actions,
            role,
            factory,
            poll_interval,
            phase: Phase::Open,
            shared: Arc::new(Shared {
                current: Mutex::new(first),
                running: AtomicBool::new(false),
                close_requested: AtomicBool::new(false),
                timer: PollTimer::new(),
                engine_error: Mutex::new(None),
                finished_tx,
                finished_rx,
                thread: Mutex::new(None),
            }),
        }
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn processor(&mut self) -> &mut P {
        &mut self.actions
    }

    /// Execute the current state once.
    ///
    /// Returns the transaction that just finished, if this step ran
    /// TRANSACTION_DONE.
    pub fn step(&mut self) -> Result<Option<SimpleTransaction>, EngineError> {
        let mut tx = self.shared.current.lock();
        let close_requested = self.shared.close_requested.load(Ordering::Acquire);

        // Nothing posted yet: a close request replaces the idle command slot
        if close_requested
            && self.phase == Phase::Steady
            && tx.state() == TransactionStateName::WaitForCommandPosting
            && !tx.posted
        {
            debug!("Close requested while idle");
            self.phase = Phase::Close;
            *tx = new_transaction(&self.factory, self.role, Phase::Close, tables::CLOSE_START);
        }

        let executed = tx.state();
        let table = match self.phase {
            Phase::Open => &self.open,
            Phase::Steady => &self.steady,
            Phase::Close => &self.close,
        };
        table.execute(&mut self.actions, &mut *tx)?;

        if executed != TransactionStateName::TransactionDone {
            return Ok(None);
        }

        let finished = tx.clone();
        if finished.error().is_err() {
            warn!("Transaction {} ended with {}", finished.identity(), finished.error());
        }

        let connected = self.actions.base().has_connection();
        let (phase, start) = match (self.phase, connected) {
            (Phase::Close, _) => {
                info!("Session closed");
                self.shared.running.store(false, Ordering::Release);
                self.shared.close_requested.store(false, Ordering::Release);
                (Phase::Open, P::open_start())
            }
            (_, false) if close_requested => {
                info!("Session closed");
                self.shared.running.store(false, Ordering::Release);
                self.shared.close_requested.store(false, Ordering::Release);
                (Phase::Open, P::open_start())
            }
            (_, false) => {
                if self.phase != Phase::Open {
                    info!("Connection lost, reopening session");
                }
                (Phase::Open, P::open_start())
            }
            (_, true) if close_requested => (Phase::Close, tables::CLOSE_START),
            (Phase::Open, true) => {
                info!("Session open");
                (Phase::Steady, tables::steady_start(self.role.steady))
            }
            (Phase::Steady, true) => (Phase::Steady, tables::steady_start(self.role.steady)),
        };
        self.phase = phase;
        *tx = new_transaction(&self.factory, self.role, phase, start);
        drop(tx);

        publish(&self.shared.finished_tx, &self.shared.finished_rx, finished.clone());
        Ok(Some(finished))
    }

    /// Run on a dedicated thread until stopped.
    pub fn spawn(mut self) -> Result<SessionHandle, EngineError> {
        let handle = self.handle();
        self.shared.running.store(true, Ordering::Release);

        let join = std::thread::Builder::new()
            .name("simcor-session".to_string())
            .spawn(move || self.run())
            .map_err(|e| {
                handle.shared.running.store(false, Ordering::Release);
                EngineError::Spawn(e.to_string())
            })?;

        *handle.shared.thread.lock() = Some(join);
        Ok(handle)
    }

    fn run(mut self) {
        debug!("Session driver started ({:?})", self.role);
        while self.shared.running.load(Ordering::Acquire) {
            if let Err(e) = self.step() {
                error!("Session engine stopped: {}", e);
                *self.shared.engine_error.lock() = Some(e);
                break;
            }
            self.shared.timer.wait(self.poll_interval);
        }
        self.shared.running.store(false, Ordering::Release);

        if let Some(mut conn) = self.actions.base().take_connection() {
            conn.set_to_remote_msg(ConnectionAction::Close, None, None);
        }
        let mut polls = 0;
        while !self.actions.release() && polls < 100 {
            polls += 1;
            std::thread::sleep(Duration::from_millis(10));
        }
        debug!("Session driver exited");
    }
}

fn new_transaction(
    factory: &TransactionFactory,
    role: SessionRole,
    phase: Phase,
    start: TransactionStateName,
) -> SimpleTransaction {
    let direction = match phase {
        Phase::Open => role.open,
        Phase::Steady => match role.steady {
            Direction::SendCommand => Direction::SendCommand,
            _ => Direction::ReceiveCommand,
        },
        Phase::Close => Direction::SendCommand,
    };
    let mut tx = factory.create_simple_transaction(direction, TransactionIdentity::default(), None);
    tx.set_state(start);
    tx
}

/// Consumer-side access to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    /// Take the received command once it is available.
    pub fn pickup_command(&self) -> Option<(TransactionIdentity, SimCorMsg)> {
        let mut tx = self.shared.current.lock();
        if tx.state() != TransactionStateName::CommandAvailable || tx.picked_up {
            return None;
        }
        tx.picked_up = true;
        Some((tx.identity().clone(), tx.command.clone()))
    }

    /// Post the response to a picked-up command.
    pub fn post_response(&self, response: SimCorMsg) -> bool {
        let mut tx = self.shared.current.lock();
        let waiting = matches!(
            tx.state(),
            TransactionStateName::CommandAvailable | TransactionStateName::WaitForResponsePosting
        );
        if !waiting || !tx.picked_up || tx.posted {
            return false;
        }
        tx.response = response;
        tx.posted = true;
        true
    }

    /// Post the next command to send.
    pub fn post_command(&self, identity: TransactionIdentity, command: SimCorMsg) -> bool {
        let mut tx = self.shared.current.lock();
        if tx.state() != TransactionStateName::WaitForCommandPosting || tx.posted {
            return false;
        }
        tx.core.identity = identity;
        tx.command = command;
        tx.posted = true;
        true
    }

    /// Take the response to the last command once it is available.
    pub fn pickup_response(&self) -> Option<SimCorMsg> {
        let mut tx = self.shared.current.lock();
        if tx.state() != TransactionStateName::ResponseAvailable || tx.picked_up {
            return None;
        }
        tx.picked_up = true;
        Some(tx.response.clone())
    }

    pub fn current_state(&self) -> TransactionStateName {
        self.shared.current.lock().state()
    }

    /// Error of the current transaction.
    pub fn error(&self) -> TcpError {
        self.shared.current.lock().error().clone()
    }

    /// Error that stopped the engine, if any.
    pub fn engine_error(&self) -> Option<String> {
        self.shared.engine_error.lock().as_ref().map(|e| e.to_string())
    }

    /// Next finished transaction, waiting up to `timeout`.
    ///
    /// Only the last [`super::FINISHED_BACKLOG`] transactions are kept.
    pub fn next_finished(&self, timeout: Duration) -> Option<SimpleTransaction> {
        self.shared.finished_rx.recv_timeout(timeout).ok()
    }

    /// Close the session at the next idle point, then stop.
    pub fn request_close(&self) {
        self.shared.close_requested.store(true, Ordering::Release);
        self.shared.timer.wake();
    }

    /// Stop without closing the session.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.timer.wake();
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// True until the driver thread has exited.
    pub fn is_alive(&self) -> bool {
        self.shared
            .thread
            .lock()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}
