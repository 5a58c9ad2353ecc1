// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Broadcast client registry.
//!
//! Tracks the clients attached to a broadcast session and correlates one
//! trigger round against all of them.
//!
//! # Round lifecycle
//!
//! 1. `add_client` stages a client (listener thread, any time)
//! 2. `assemble_trigger_messages` merges staged clients and writes the command
//! 3. `wait_for_broadcast_finished` until every write completed
//! 4. `setup_responses_check` reads from every live client
//! 5. `wait_for_responses_finished` until every client answered or was lost
//!
//! Clients staged during a round only take part from the next merge on. A
//! client whose connection errors, or who answers with anything but a
//! response, is removed from the live set, reported in the transaction's
//! `response_msg`, and the round carries on without it.
//!
//! All state sits behind a single lock; every operation is a short
//! non-blocking critical section.

use crate::error::{TcpError, TcpErrorKind};
use crate::net::{Connection, ConnectionAction, ConnectionStatus};
use crate::transaction::{BroadcastTransaction, Transaction};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// A broadcast participant.
pub struct ClientId {
    pub connection: Box<dyn Connection>,
    /// System description given at session open
    pub system: String,
    pub remote_host: String,
}

impl ClientId {
    pub fn new(connection: Box<dyn Connection>, system: impl Into<String>) -> Self {
        let remote_host = connection.remote_host();
        Self {
            connection,
            system: system.into(),
            remote_host,
        }
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.system, self.remote_host)
    }
}

impl std::fmt::Debug for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientId")
            .field("system", &self.system)
            .field("remote_host", &self.remote_host)
            .finish()
    }
}

/// Registry statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    /// Trigger rounds assembled
    pub rounds: u64,
    /// Clients merged into the live set
    pub clients_joined: u64,
    /// Clients dropped after an error
    pub clients_lost: u64,
}

impl std::fmt::Display for RegistryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "rounds={}, joined={}, lost={}",
            self.rounds, self.clients_joined, self.clients_lost
        )
    }
}

struct Client {
    key: u64,
    id: ClientId,
    /// CLOSE already requested
    closing: bool,
}

impl Client {
    fn close(&mut self) {
        if !self.closing {
            self.id.connection.set_to_remote_msg(ConnectionAction::Close, None, None);
            self.closing = true;
        }
    }

    fn is_closed(&self) -> bool {
        self.id.connection.status() == ConnectionStatus::Closed && !self.id.connection.is_alive()
    }
}

#[derive(Default)]
struct Inner {
    next_key: u64,
    live: Vec<Client>,
    staged: Vec<Client>,
    /// Live clients whose write of this round has not completed
    sending: Vec<u64>,
    /// Live clients whose response of this round has not arrived
    awaiting: Vec<u64>,
    /// Clients lost during the current round
    round_lost: usize,
    stats: RegistryStats,
}

/// Poll outcome of one client.
enum Outcome {
    Done(crate::net::RemoteMessage),
    Lost(TcpError),
}

impl Inner {
    /// Move staged clients into the live set; returns how many joined.
    fn merge(&mut self, tx: &mut BroadcastTransaction) -> usize {
        let joined = self.staged.len();
        for client in self.staged.drain(..) {
            info!("Broadcast client {} joined", client.id);
            append_line(&mut tx.broadcast_msg, format!("client {} joined", client.id));
            self.live.push(client);
        }
        self.stats.clients_joined += joined as u64;
        joined
    }

    fn write_all(&mut self, tx: &BroadcastTransaction) {
        self.sending.clear();
        for client in &mut self.live {
            let conn = &mut client.id.connection;
            conn.set_timeout(tx.timeout());
            conn.set_to_remote_msg(
                ConnectionAction::Write,
                Some(tx.command.clone()),
                Some(tx.identity().clone()),
            );
            self.sending.push(client.key);
        }
    }

    /// Poll every client in `pending`; returns true once none is left.
    ///
    /// Collects completed and lost clients first, then removes them, so the
    /// live set is never mutated while it is being walked.
    fn poll(&mut self, pending: Pending, tx: &mut BroadcastTransaction) -> bool {
        let keys = match pending {
            Pending::Sending => &self.sending,
            Pending::Awaiting => &self.awaiting,
        };

        let mut finished: Vec<(u64, Outcome)> = Vec::new();
        for key in keys {
            let Some(client) = self.live.iter().find(|c| c.key == *key) else {
                continue;
            };
            let conn = &client.id.connection;
            if conn.is_busy() {
                continue;
            }
            let outcome = conn.from_remote_msg();
            if outcome.error.is_err() {
                finished.push((*key, Outcome::Lost(outcome.error)));
            } else if pending == Pending::Awaiting && !outcome.msg.msg_type.is_response() {
                let error = TcpError::protocol(format!("expected a response, got {}", outcome.msg));
                finished.push((*key, Outcome::Lost(error)));
            } else {
                finished.push((*key, Outcome::Done(outcome)));
            }
        }

        let mut lost_keys = Vec::new();
        for (key, outcome) in finished {
            match outcome {
                Outcome::Done(remote) => {
                    if pending == Pending::Awaiting {
                        tx.responses.push(remote.msg);
                    }
                }
                Outcome::Lost(error) => {
                    lost_keys.push((key, error));
                }
            }
            match pending {
                Pending::Sending => self.sending.retain(|k| *k != key),
                Pending::Awaiting => self.awaiting.retain(|k| *k != key),
            }
        }

        for (key, error) in lost_keys {
            self.drop_lost(key, &error, tx);
        }

        // Keys of clients no longer live (lost in an earlier phase) count as done
        let live: Vec<u64> = self.live.iter().map(|c| c.key).collect();
        let remaining = match pending {
            Pending::Sending => &mut self.sending,
            Pending::Awaiting => &mut self.awaiting,
        };
        remaining.retain(|k| live.contains(k));

        if !remaining.is_empty() {
            return false;
        }
        if self.round_lost > 0 {
            tx.set_error(TcpError::new(
                TcpErrorKind::BroadcastClientsLost,
                format!("{} client(s) lost", self.round_lost),
            ));
        }
        true
    }

    fn drop_lost(&mut self, key: u64, error: &TcpError, tx: &mut BroadcastTransaction) {
        let Some(pos) = self.live.iter().position(|c| c.key == key) else {
            return;
        };
        let mut client = self.live.remove(pos);
        warn!("Lost contact with broadcast client {}: {}", client.id, error);
        append_line(&mut tx.response_msg, format!("lost contact with {}", client.id));
        self.round_lost += 1;
        self.stats.clients_lost += 1;
        self.sending.retain(|k| *k != key);
        self.awaiting.retain(|k| *k != key);
        // Best effort; the worker also exits when the connection is dropped
        client.id.connection.set_to_remote_msg(ConnectionAction::Close, None, None);
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Pending {
    Sending,
    Awaiting,
}

fn append_line(buf: &mut String, line: String) {
    if !buf.is_empty() {
        buf.push('\n');
    }
    buf.push_str(&line);
}

/// Registry of broadcast clients.
#[derive(Default)]
pub struct BroadcastClientRegistry {
    inner: Mutex<Inner>,
}

impl BroadcastClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a client for the next merge.
    pub fn add_client(&self, id: ClientId) {
        let mut inner = self.inner.lock();
        let key = inner.next_key;
        inner.next_key += 1;
        debug!("Broadcast client {} staged", id);
        inner.staged.push(Client { key, id, closing: false });
    }

    pub fn live_count(&self) -> usize {
        self.inner.lock().live.len()
    }

    pub fn staged_count(&self) -> usize {
        self.inner.lock().staged.len()
    }

    pub fn awaiting_count(&self) -> usize {
        self.inner.lock().awaiting.len()
    }

    /// `system@host` of every live client.
    pub fn live_clients(&self) -> Vec<String> {
        self.inner.lock().live.iter().map(|c| c.id.to_string()).collect()
    }

    pub fn stats(&self) -> RegistryStats {
        self.inner.lock().stats.clone()
    }

    /// Merge staged clients and write the trigger command to every live client.
    ///
    /// Sets a `BroadcastClientsAdded` error on the transaction when clients
    /// joined; it is informational only.
    pub fn assemble_trigger_messages(&self, tx: &mut BroadcastTransaction) {
        let mut inner = self.inner.lock();
        inner.round_lost = 0;
        inner.stats.rounds += 1;
        let joined = inner.merge(tx);
        inner.write_all(tx);
        if joined > 0 {
            tx.set_error(TcpError::new(
                TcpErrorKind::BroadcastClientsAdded,
                format!("{} client(s) joined", joined),
            ));
        }
        debug!("Round {} sent to {} client(s)", tx.identity(), inner.live.len());
    }

    /// Merge staged clients and write the session-close command to everyone.
    pub fn assemble_close_messages(&self, tx: &mut BroadcastTransaction) {
        let mut inner = self.inner.lock();
        inner.round_lost = 0;
        inner.merge(tx);
        inner.write_all(tx);
    }

    /// True once every write of this round completed; failed clients are dropped.
    pub fn wait_for_broadcast_finished(&self, tx: &mut BroadcastTransaction) -> bool {
        self.inner.lock().poll(Pending::Sending, tx)
    }

    /// Read from every live client and clear the round's responses.
    pub fn setup_responses_check(&self, tx: &mut BroadcastTransaction) {
        let mut inner = self.inner.lock();
        inner.awaiting.clear();
        let mut keys = Vec::with_capacity(inner.live.len());
        for client in &mut inner.live {
            let conn = &mut client.id.connection;
            conn.set_timeout(tx.timeout());
            conn.set_to_remote_msg(ConnectionAction::Read, None, None);
            keys.push(client.key);
        }
        inner.awaiting = keys;
        tx.responses.clear();
    }

    /// True once every client live at setup answered or was lost.
    pub fn wait_for_responses_finished(&self, tx: &mut BroadcastTransaction) -> bool {
        self.inner.lock().poll(Pending::Awaiting, tx)
    }

    /// Close every client, staged ones included; true once all are closed.
    ///
    /// Clients staged while a close is in progress are closed as well.
    pub fn close_client_connections(&self) -> bool {
        let mut inner = self.inner.lock();
        let Inner { live, staged, .. } = &mut *inner;
        for client in live.iter_mut().chain(staged.iter_mut()) {
            client.close();
        }

        if !inner.live.iter().chain(inner.staged.iter()).all(Client::is_closed) {
            return false;
        }

        let closed = inner.live.len() + inner.staged.len();
        inner.live.clear();
        inner.staged.clear();
        inner.sending.clear();
        inner.awaiting.clear();
        if closed > 0 {
            info!("Closed {} broadcast client(s)", closed);
        }
        true
    }
}
