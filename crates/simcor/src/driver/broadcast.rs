// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Broadcast coordinator driver.

use super::{publish, FINISHED_BACKLOG};
use crate::actions::listener_machine::machine_failure;
use crate::actions::{BaseCapability, BroadcastActions, BroadcastCapability, ListenerMachineCapability};
use crate::error::{EngineError, TcpError};
use crate::machine::{tables, StateTable};
use crate::message::TransactionIdentity;
use crate::registry::{BroadcastClientRegistry, RegistryStats};
use crate::transaction::{BroadcastTransaction, Direction, Transaction, TransactionFactory, TransactionStateName};
use crate::wake::PollTimer;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Polls allowed for listener shutdown and client teardown on exit.
const RELEASE_POLLS: usize = 200;

enum Request {
    Trigger {
        identity: TransactionIdentity,
        command: String,
        content: Option<String>,
        timeout: Option<Duration>,
    },
    Close,
}

struct Shared {
    status: Mutex<(TransactionStateName, TcpError)>,
    running: AtomicBool,
    timer: PollTimer,
    requests_tx: Sender<Request>,
    requests_rx: Receiver<Request>,
    rounds_tx: Sender<BroadcastTransaction>,
    rounds_rx: Receiver<BroadcastTransaction>,
    registry: Arc<BroadcastClientRegistry>,
    engine_error: Mutex<Option<EngineError>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// Runs the broadcast engine: one trigger round or teardown at a time.
pub struct BroadcastDriver {
    actions: BroadcastActions,
    table: StateTable<BroadcastActions, BroadcastTransaction>,
    factory: TransactionFactory,
    poll_interval: Duration,
    current: Option<BroadcastTransaction>,
    /// Acceptor failure already logged
    listener_down: bool,
    shared: Arc<Shared>,
}

impl BroadcastDriver {
    /// The first steps start the listener state machine.
    pub fn new(mut actions: BroadcastActions, poll_interval: Duration) -> Self {
        let factory = actions.base().factory().clone();
        let (requests_tx, requests_rx) = channel::unbounded();
        let (rounds_tx, rounds_rx) = channel::bounded(FINISHED_BACKLOG);
        let registry = actions.registry_handle();
        let first = factory.create_broadcast_placeholder(TransactionStateName::StartListenerMachine);

        Self {
            actions,
            table: tables::broadcast_table(),
            factory,
            poll_interval,
            shared: Arc::new(Shared {
                status: Mutex::new((first.state(), TcpError::none())),
                running: AtomicBool::new(false),
                timer: PollTimer::new(),
                requests_tx,
                requests_rx,
                rounds_tx,
                rounds_rx,
                registry,
                engine_error: Mutex::new(None),
                thread: Mutex::new(None),
            }),
            current: Some(first),
            listener_down: false,
        }
    }

    pub fn handle(&self) -> BroadcastHandle {
        BroadcastHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    fn next_request(&self) -> Option<BroadcastTransaction> {
        let request = self.shared.requests_rx.try_recv().ok()?;
        let tx = match request {
            Request::Trigger {
                identity,
                command,
                content,
                timeout,
            } => self
                .factory
                .create_broadcast_transaction(identity, &command, content, timeout),
            Request::Close => self.factory.create_broadcast_close_transaction(None),
        };
        debug!("Broadcast round {} ({}) started", tx.identity(), tx.command.command);
        Some(tx)
    }

    /// Execute the current state once, taking the next request when idle.
    ///
    /// Returns the transaction that just finished, if any.
    pub fn step(&mut self) -> Result<Option<BroadcastTransaction>, EngineError> {
        if self.current.is_none() {
            self.current = self.next_request();
        }
        let Some(tx) = self.current.as_mut() else {
            self.check_listener();
            return Ok(None);
        };

        let executed = tx.state();
        self.table.execute(&mut self.actions, tx)?;
        *self.shared.status.lock() = (tx.state(), tx.error().clone());

        if executed != TransactionStateName::TransactionDone {
            return Ok(None);
        }

        let Some(finished) = self.current.take() else {
            return Ok(None);
        };
        *self.shared.status.lock() = (TransactionStateName::Ready, TcpError::none());

        if finished.direction() == Direction::None {
            if finished.error().is_err() {
                warn!("Broadcast setup failed: {}", finished.error());
            }
        } else {
            info!(
                "Broadcast round {} done: {} response(s), {} client(s), {}",
                finished.identity(),
                finished.responses.len(),
                self.shared.registry.live_count(),
                finished.error()
            );
            publish(&self.shared.rounds_tx, &self.shared.rounds_rx, finished.clone());
        }
        Ok(Some(finished))
    }

    /// Publish a stopped acceptor as the idle error.
    fn check_listener(&mut self) {
        let failure = machine_failure(self.actions.machine());
        match failure {
            Some(error) => {
                if !self.listener_down {
                    error!("Listener state machine stopped: {}", error);
                    self.listener_down = true;
                }
                *self.shared.status.lock() = (TransactionStateName::Ready, error);
            }
            None => self.listener_down = false,
        }
    }

    /// Run on a dedicated thread until stopped.
    pub fn spawn(mut self) -> Result<BroadcastHandle, EngineError> {
        let handle = self.handle();
        self.shared.running.store(true, Ordering::Release);

        let join = std::thread::Builder::new()
            .name("simcor-broadcast".to_string())
            .spawn(move || self.run())
            .map_err(|e| {
                handle.shared.running.store(false, Ordering::Release);
                EngineError::Spawn(e.to_string())
            })?;

        *handle.shared.thread.lock() = Some(join);
        Ok(handle)
    }

    fn run(mut self) {
        debug!("Broadcast driver started");
        while self.shared.running.load(Ordering::Acquire) {
            if let Err(e) = self.step() {
                error!("Broadcast engine stopped: {}", e);
                *self.shared.engine_error.lock() = Some(e);
                break;
            }
            self.shared.timer.wait(self.poll_interval);
        }
        self.shared.running.store(false, Ordering::Release);
        self.shutdown();
        debug!("Broadcast driver exited");
    }

    /// Stop the listener state machine, then close every client.
    fn shutdown(&mut self) {
        if let Some(tx) = &self.current {
            if tx.direction() != Direction::None {
                warn!("Broadcast round {} abandoned in {}", tx.identity(), tx.state());
            }
        }
        self.current = Some(
            self.factory
                .create_broadcast_placeholder(TransactionStateName::StopListenerMachine),
        );

        let mut polls = 0;
        while self.current.is_some() && polls < RELEASE_POLLS {
            if self.step().is_err() {
                break;
            }
            polls += 1;
            std::thread::sleep(Duration::from_millis(5));
        }

        polls = 0;
        while !self.actions.registry().close_client_connections() && polls < RELEASE_POLLS {
            polls += 1;
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

/// Control side of a broadcast driver.
#[derive(Clone)]
pub struct BroadcastHandle {
    shared: Arc<Shared>,
}

impl BroadcastHandle {
    /// Queue a trigger round for every client.
    pub fn trigger(&self, identity: TransactionIdentity, command: &str, content: Option<String>) {
        self.trigger_with_timeout(identity, command, content, None);
    }

    /// Queue a trigger round; `timeout = None` uses the configured default.
    pub fn trigger_with_timeout(
        &self,
        identity: TransactionIdentity,
        command: &str,
        content: Option<String>,
        timeout: Option<Duration>,
    ) {
        let _ = self.shared.requests_tx.send(Request::Trigger {
            identity,
            command: command.to_string(),
            content,
            timeout,
        });
        self.shared.timer.wake();
    }

    /// Queue the session-close round for every client.
    pub fn close_all(&self) {
        let _ = self.shared.requests_tx.send(Request::Close);
        self.shared.timer.wake();
    }

    /// Next finished round, waiting up to `timeout`.
    ///
    /// Only the last [`super::FINISHED_BACKLOG`] rounds are kept.
    pub fn next_round(&self, timeout: Duration) -> Option<BroadcastTransaction> {
        self.shared.rounds_rx.recv_timeout(timeout).ok()
    }

    /// State of the running transaction; `Ready` while idle.
    ///
    /// While idle, [`BroadcastHandle::current_error`] reports a stopped
    /// listener state machine as `ListenerFailure`.
    pub fn current_state(&self) -> TransactionStateName {
        self.shared.status.lock().0
    }

    pub fn current_error(&self) -> TcpError {
        self.shared.status.lock().1.clone()
    }

    /// Live plus staged clients.
    pub fn client_count(&self) -> usize {
        self.shared.registry.live_count() + self.shared.registry.staged_count()
    }

    pub fn clients(&self) -> Vec<String> {
        self.shared.registry.live_clients()
    }

    pub fn stats(&self) -> RegistryStats {
        self.shared.registry.stats()
    }

    pub fn engine_error(&self) -> Option<String> {
        self.shared.engine_error.lock().as_ref().map(|e| e.to_string())
    }

    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.timer.wake();
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn is_alive(&self) -> bool {
        self.shared
            .thread
            .lock()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{BaseActions, ListenerActions};
    use crate::error::TcpErrorKind;
    use crate::listener_machine::{ClientSink, ListenerRole, ListenerStateMachine};
    use crate::mock::{ConnControl, ListenerControl, MemoryArchive, MockConnection, MockListener};
    use crate::net::ConnectionAction;
    use crate::registry::ClientId;
    use TransactionStateName as S;

    const POLL: Duration = Duration::from_millis(1);

    struct Fixture {
        driver: BroadcastDriver,
        handle: BroadcastHandle,
        registry: Arc<BroadcastClientRegistry>,
        archive: Arc<MemoryArchive>,
    }

    fn fixture() -> Fixture {
        fixture_with(|_| {})
    }

    fn fixture_with(script: impl FnOnce(&ListenerControl)) -> Fixture {
        let registry = Arc::new(BroadcastClientRegistry::new());
        let archive = MemoryArchive::shared();
        let (listener, control) = MockListener::new();
        script(&control);
        let inner = ListenerActions::new(BaseActions::new(TransactionFactory::default(), archive.clone()), listener);
        let machine = ListenerStateMachine::new(
            inner,
            ListenerRole::OpenSession,
            ClientSink::Broadcast(registry.clone()),
            POLL,
        );
        let actions = BroadcastActions::new(
            BaseActions::new(TransactionFactory::default(), archive.clone()),
            machine,
            registry.clone(),
            Duration::ZERO,
        );
        let mut driver = BroadcastDriver::new(actions, POLL);
        let handle = driver.handle();

        // START_LISTENER_MACHINE placeholder
        let setup = driver.step().unwrap();
        assert!(setup.is_none());
        let setup = driver.step().unwrap().unwrap();
        assert!(setup.error().is_none());
        assert_eq!(handle.current_state(), S::Ready);

        Fixture {
            driver,
            handle,
            registry,
            archive,
        }
    }

    fn add(f: &Fixture, system: &str, host: &str) -> ConnControl {
        let (conn, control) = MockConnection::open(host);
        f.registry.add_client(ClientId::new(conn, system));
        control
    }

    fn answer(control: &ConnControl, content: &str) {
        let msg = TransactionFactory::default().create_response("execute", Some(content.into()), true);
        control.push_read(msg, None);
    }

    fn run_round(f: &mut Fixture) -> BroadcastTransaction {
        for _ in 0..50 {
            if let Some(done) = f.driver.step().unwrap() {
                return done;
            }
        }
        panic!("round did not finish");
    }

    #[test]
    fn test_round_collects_every_response() {
        let mut f = fixture();
        let a = add(&f, "MDL-01", "10.4.0.1");
        let b = add(&f, "MDL-02", "10.4.0.2");
        answer(&a, "a");
        answer(&b, "b");

        f.handle.trigger(TransactionIdentity::new(1, 0, 0), "execute", Some("disp 0.1".into()));
        let round = run_round(&mut f);

        assert!(round.error().is_none());
        assert_eq!(round.responses.len(), 2);
        assert!(round.broadcast_msg.contains("client MDL-01@10.4.0.1 joined"));
        assert!(round.broadcast_msg.contains("client MDL-02@10.4.0.2 joined"));
        assert_eq!(a.written()[0].content_str(), "disp 0.1");
        assert_eq!(f.handle.client_count(), 2);

        let published = f.handle.next_round(Duration::ZERO).unwrap();
        assert_eq!(published.identity(), &TransactionIdentity::new(1, 0, 0));
        assert_eq!(f.archive.records().len(), 1);
    }

    #[test]
    fn test_lost_client_reported_after_round_completes() {
        let mut f = fixture();
        let a = add(&f, "MDL-01", "10.4.0.1");
        let b = add(&f, "MDL-02", "10.4.0.2");
        b.push_read_error(TcpError::io("connection reset"));

        f.handle.trigger(TransactionIdentity::new(2, 0, 0), "execute", None);
        for _ in 0..10 {
            f.driver.step().unwrap();
            if f.handle.current_state() == S::WaitForTriggerResponses {
                break;
            }
        }
        assert_eq!(f.handle.current_state(), S::WaitForTriggerResponses);

        // Still waiting on MDL-01: nothing observable changes
        for _ in 0..50 {
            assert!(f.driver.step().unwrap().is_none());
            assert_eq!(f.handle.current_state(), S::WaitForTriggerResponses);
            assert!(f.handle.current_error().is_none());
        }
        assert!(b.is_closed());

        answer(&a, "a");
        let round = run_round(&mut f);
        assert_eq!(round.error().kind, TcpErrorKind::BroadcastClientsLost);
        assert_eq!(round.responses.len(), 1);
        assert_eq!(round.responses[0].content_str(), "a");
        assert!(round.response_msg.contains("lost contact with MDL-02@10.4.0.2"));
        assert_eq!(f.registry.live_count(), 1);
        assert_eq!(f.handle.stats().clients_lost, 1);
    }

    #[test]
    fn test_client_joining_mid_round_waits_for_next() {
        let mut f = fixture();
        let a = add(&f, "MDL-01", "10.4.0.1");
        f.handle.trigger(TransactionIdentity::new(3, 0, 0), "execute", None);
        f.driver.step().unwrap();
        assert_eq!(f.handle.current_state(), S::BroadcastCommand);

        let late = add(&f, "MDL-03", "10.4.0.3");
        answer(&a, "a");
        let round = run_round(&mut f);
        assert_eq!(round.responses.len(), 1);
        assert_eq!(late.count(ConnectionAction::Write), 0);
        assert_eq!(f.registry.staged_count(), 1);

        answer(&a, "a");
        answer(&late, "late");
        f.handle.trigger(TransactionIdentity::new(4, 0, 0), "execute", None);
        let round = run_round(&mut f);
        assert_eq!(round.responses.len(), 2);
        assert!(round.broadcast_msg.contains("MDL-03"));
    }

    #[test]
    fn test_close_all_tears_down_clients() {
        let mut f = fixture();
        let a = add(&f, "MDL-01", "10.4.0.1");
        let b = add(&f, "MDL-02", "10.4.0.2");

        f.handle.close_all();
        let round = run_round(&mut f);

        assert!(round.is_close());
        assert!(round.error().is_none());
        for control in [&a, &b] {
            assert!(control.written()[0].is_close_session());
            assert!(control.is_closed());
        }
        assert_eq!(f.registry.live_count(), 0);
    }

    #[test]
    fn test_idle_driver_does_nothing() {
        let mut f = fixture();
        for _ in 0..100 {
            assert!(f.driver.step().unwrap().is_none());
        }
        assert_eq!(f.handle.current_state(), S::Ready);
        assert!(f.handle.next_round(Duration::ZERO).is_none());
    }

    #[test]
    fn test_spawned_driver_runs_rounds_and_stops() {
        let f = fixture();
        let a = add(&f, "MDL-01", "10.4.0.1");
        answer(&a, "a");

        let handle = f.driver.spawn().unwrap();
        handle.trigger(TransactionIdentity::new(5, 0, 0), "execute", None);
        let round = handle.next_round(Duration::from_secs(5)).unwrap();
        assert_eq!(round.responses.len(), 1);

        handle.stop();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while handle.is_alive() {
            assert!(std::time::Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(a.is_closed());
        assert_eq!(handle.client_count(), 0);
    }

    #[test]
    fn test_listener_failure_reported_idle_and_on_trigger() {
        let mut f = fixture_with(|l| l.refuse_start(TcpError::listener("address in use")));

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while f.handle.current_error().is_none() {
            assert!(std::time::Instant::now() < deadline, "listener failure never reported");
            assert!(f.driver.step().unwrap().is_none());
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(f.handle.current_state(), S::Ready);
        assert_eq!(f.handle.current_error().kind, TcpErrorKind::ListenerFailure);

        let a = add(&f, "MDL-01", "10.4.0.1");
        f.handle.trigger(TransactionIdentity::new(6, 0, 0), "execute", None);
        let round = run_round(&mut f);
        assert_eq!(round.error().kind, TcpErrorKind::ListenerFailure);
        assert!(round.responses.is_empty());
        assert_eq!(a.count(ConnectionAction::Write), 0);
        assert!(a.is_closed());
        assert_eq!(f.handle.next_round(Duration::ZERO).unwrap().identity(), &TransactionIdentity::new(6, 0, 0));

        // Still reported once idle again
        f.driver.step().unwrap();
        assert_eq!(f.handle.current_error().kind, TcpErrorKind::ListenerFailure);
    }

    #[test]
    fn test_stop_closes_staged_clients() {
        let f = fixture();
        let staged = add(&f, "MDL-07", "10.4.0.7");

        let handle = f.driver.spawn().unwrap();
        handle.stop();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while handle.is_alive() {
            assert!(std::time::Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(5));
        }

        assert!(staged.is_closed());
        assert_eq!(staged.count(ConnectionAction::Write), 0);
        assert_eq!(handle.client_count(), 0);
    }

    #[test]
    fn test_round_backlog_keeps_latest() {
        let mut f = fixture();
        let rounds = FINISHED_BACKLOG as u32 + 36;
        for step in 1..=rounds {
            f.handle.trigger(TransactionIdentity::new(step, 0, 0), "execute", None);
            run_round(&mut f);
        }

        let mut kept = Vec::new();
        while let Some(round) = f.handle.next_round(Duration::ZERO) {
            kept.push(round.identity().step());
        }
        assert_eq!(kept.len(), FINISHED_BACKLOG);
        assert_eq!(kept.first(), Some(&37));
        assert_eq!(kept.last(), Some(&rounds));
    }
}
