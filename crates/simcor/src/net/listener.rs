// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Non-blocking TCP accept thread.

use super::{Connection, Listener, TcpConnection};
use crate::error::TcpError;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info};

/// Sleep between accept attempts when nothing is pending.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(20);

/// Accepts inbound connections on a background thread.
///
/// Accepted sockets are queued on a channel and wrapped into a
/// [`TcpConnection`] when the engine collects them.
pub struct TcpAcceptor {
    bind_addr: SocketAddr,
    max_message_size: usize,
    running: Arc<AtomicBool>,
    error: Arc<Mutex<TcpError>>,
    local_addr: Option<SocketAddr>,
    accepted: Option<Receiver<(TcpStream, SocketAddr)>>,
    handle: Option<JoinHandle<()>>,
}

impl TcpAcceptor {
    pub fn new(bind_addr: SocketAddr, max_message_size: usize) -> Self {
        Self {
            bind_addr,
            max_message_size,
            running: Arc::new(AtomicBool::new(false)),
            error: Arc::new(Mutex::new(TcpError::none())),
            local_addr: None,
            accepted: None,
            handle: None,
        }
    }

    /// Bound address, available once started (resolves port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn accept_loop(
        listener: TcpListener,
        running: Arc<AtomicBool>,
        error: Arc<Mutex<TcpError>>,
        tx: Sender<(TcpStream, SocketAddr)>,
    ) {
        while running.load(Ordering::Relaxed) {
            match listener.accept() {
                Ok((stream, peer)) => {
                    debug!("Accepted connection from {}", peer);
                    if let Err(e) = stream.set_nonblocking(false) {
                        debug!("Dropping {}: {}", peer, e);
                        continue;
                    }
                    if tx.send((stream, peer)).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(ACCEPT_BACKOFF);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    error!("Accept failed: {}", e);
                    *error.lock() = TcpError::listener(format!("accept failed: {}", e));
                    break;
                }
            }
        }
        running.store(false, Ordering::Relaxed);
        debug!("Accept thread exiting");
    }
}

impl Listener for TcpAcceptor {
    fn start_listener(&mut self) -> bool {
        if self.is_listening() {
            return true;
        }

        let listener = match TcpListener::bind(self.bind_addr) {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind {}: {}", self.bind_addr, e);
                *self.error.lock() = TcpError::listener(format!("bind {} failed: {}", self.bind_addr, e));
                return false;
            }
        };
        if let Err(e) = listener.set_nonblocking(true) {
            *self.error.lock() = TcpError::listener(format!("set_nonblocking failed: {}", e));
            return false;
        }
        self.local_addr = listener.local_addr().ok();

        let (tx, rx) = channel::unbounded();
        *self.error.lock() = TcpError::none();
        self.running.store(true, Ordering::Relaxed);

        let running = Arc::clone(&self.running);
        let error = Arc::clone(&self.error);
        let spawned = std::thread::Builder::new()
            .name("simcor-accept".to_string())
            .spawn(move || Self::accept_loop(listener, running, error, tx));

        match spawned {
            Ok(handle) => {
                info!("Listening on {}", self.local_addr.unwrap_or(self.bind_addr));
                self.accepted = Some(rx);
                self.handle = Some(handle);
                true
            }
            Err(e) => {
                self.running.store(false, Ordering::Relaxed);
                *self.error.lock() = TcpError::listener(format!("spawn failed: {}", e));
                false
            }
        }
    }

    fn stop_listener(&mut self) -> bool {
        self.running.store(false, Ordering::Relaxed);
        match &self.handle {
            Some(handle) if !handle.is_finished() => false,
            _ => {
                if let Some(handle) = self.handle.take() {
                    let _ = handle.join();
                    info!("Stopped listening on {}", self.local_addr.unwrap_or(self.bind_addr));
                }
                self.accepted = None;
                true
            }
        }
    }

    fn check_for_listener_connection(&mut self) -> Option<Box<dyn Connection>> {
        let (stream, peer) = self.accepted.as_ref()?.try_recv().ok()?;
        Some(Box::new(TcpConnection::from_stream(stream, peer, self.max_message_size)))
    }

    fn check_for_errors(&self) -> TcpError {
        self.error.lock().clone()
    }

    fn is_listening(&self) -> bool {
        self.running.load(Ordering::Relaxed)
            && self.handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }
}

impl Drop for TcpAcceptor {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
