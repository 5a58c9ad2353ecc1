// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Worker-thread backed TCP connection.
//!
//! # Architecture
//!
//! ```text
//!  engine thread                      worker thread ("simcor-conn")
//!  -------------                      -----------------------------
//!  set_to_remote_msg(WRITE) --req-->  write_frame()  --+
//!  is_busy() == true                                   |
//!  ...                                                 v
//!  is_busy() == false      <--------  last = result, busy = false
//!  from_remote_msg()
//! ```
//!
//! One request is in flight at a time; the engine only issues a new one after
//! observing `is_busy() == false`.

use super::codec::{read_frame, write_frame, Frame};
use super::{Connection, ConnectionAction, ConnectionStatus, Connector, RemoteMessage};
use crate::error::TcpError;
use crate::message::{SimCorMsg, TransactionIdentity};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Shortest timeout handed to the socket (zero means "block forever" there).
const MIN_SOCKET_TIMEOUT: Duration = Duration::from_millis(1);

enum Request {
    Read { timeout: Duration },
    Write { frame: Frame, timeout: Duration },
    Close,
}

/// State shared between the connection handle and its worker.
struct Shared {
    busy: AtomicBool,
    status: Mutex<ConnectionStatus>,
    last: Mutex<RemoteMessage>,
    /// Clone of the socket, used to unblock the worker on close
    socket: Mutex<Option<TcpStream>>,
}

impl Shared {
    fn new(status: ConnectionStatus) -> Arc<Self> {
        Arc::new(Self {
            busy: AtomicBool::new(false),
            status: Mutex::new(status),
            last: Mutex::new(RemoteMessage::default()),
            socket: Mutex::new(None),
        })
    }

    fn finish(&self, outcome: RemoteMessage) {
        *self.last.lock() = outcome;
        self.busy.store(false, Ordering::Release);
    }
}

/// A TCP connection serviced by a dedicated worker thread.
pub struct TcpConnection {
    shared: Arc<Shared>,
    requests: Sender<Request>,
    worker: Option<JoinHandle<()>>,
    remote: SocketAddr,
    timeout: Duration,
}

impl TcpConnection {
    /// Wrap an accepted stream.
    pub fn from_stream(stream: TcpStream, remote: SocketAddr, max_message_size: usize) -> Self {
        stream.set_nodelay(true).ok();
        let shared = Shared::new(ConnectionStatus::Open);
        Self::spawn(shared, Some(stream), None, remote, max_message_size)
    }

    /// Connect in the background. Status is `Busy` until connected or failed.
    pub fn connect(remote: SocketAddr, connect_timeout: Duration, max_message_size: usize) -> Self {
        let shared = Shared::new(ConnectionStatus::Busy);
        shared.busy.store(true, Ordering::Release);
        Self::spawn(shared, None, Some(connect_timeout), remote, max_message_size)
    }

    fn spawn(
        shared: Arc<Shared>,
        stream: Option<TcpStream>,
        connect_timeout: Option<Duration>,
        remote: SocketAddr,
        max_message_size: usize,
    ) -> Self {
        let (tx, rx) = channel::unbounded();
        let worker_shared = Arc::clone(&shared);

        let worker = std::thread::Builder::new()
            .name("simcor-conn".to_string())
            .spawn(move || {
                run_worker(worker_shared, rx, stream, connect_timeout, remote, max_message_size);
            });

        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Failed to spawn connection worker for {}: {}", remote, e);
                *shared.status.lock() = ConnectionStatus::Closed;
                shared.finish(RemoteMessage::failed(TcpError::io(e.to_string())));
                None
            }
        };

        Self {
            shared,
            requests: tx,
            worker,
            remote,
            timeout: Duration::from_secs(3000),
        }
    }

    /// Peer socket address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }
}

impl Connection for TcpConnection {
    fn is_busy(&self) -> bool {
        self.shared.busy.load(Ordering::Acquire)
    }

    fn from_remote_msg(&self) -> RemoteMessage {
        self.shared.last.lock().clone()
    }

    fn set_to_remote_msg(
        &mut self,
        action: ConnectionAction,
        msg: Option<SimCorMsg>,
        identity: Option<TransactionIdentity>,
    ) {
        let request = match action {
            ConnectionAction::Read => Request::Read {
                timeout: self.timeout,
            },
            ConnectionAction::Write => Request::Write {
                frame: Frame {
                    identity,
                    message: msg.unwrap_or_default(),
                },
                timeout: self.timeout,
            },
            ConnectionAction::Close => Request::Close,
        };

        self.shared.busy.store(true, Ordering::Release);
        if action == ConnectionAction::Close {
            if let Some(socket) = self.shared.socket.lock().take() {
                socket.shutdown(Shutdown::Both).ok();
            }
        }
        if self.requests.send(request).is_err() {
            // Worker already gone
            *self.shared.status.lock() = ConnectionStatus::Closed;
            let outcome = if action == ConnectionAction::Close {
                RemoteMessage::default()
            } else {
                RemoteMessage::failed(TcpError::closed(format!("connection to {} is closed", self.remote)))
            };
            self.shared.finish(outcome);
        }
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn status(&self) -> ConnectionStatus {
        let status = *self.shared.status.lock();
        if status == ConnectionStatus::Open && self.is_busy() {
            ConnectionStatus::Busy
        } else {
            status
        }
    }

    fn is_alive(&self) -> bool {
        self.worker.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    fn remote_host(&self) -> String {
        self.remote.ip().to_string()
    }
}

fn run_worker(
    shared: Arc<Shared>,
    requests: Receiver<Request>,
    stream: Option<TcpStream>,
    connect_timeout: Option<Duration>,
    remote: SocketAddr,
    max_message_size: usize,
) {
    let mut stream = match stream {
        Some(stream) => stream,
        None => {
            let timeout = connect_timeout.unwrap_or(Duration::from_secs(5)).max(MIN_SOCKET_TIMEOUT);
            match TcpStream::connect_timeout(&remote, timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true).ok();
                    debug!("Connected to {}", remote);
                    *shared.status.lock() = ConnectionStatus::Open;
                    shared.finish(RemoteMessage::default());
                    stream
                }
                Err(e) => {
                    debug!("Connect to {} failed: {}", remote, e);
                    *shared.status.lock() = ConnectionStatus::Closed;
                    shared.finish(RemoteMessage::failed(e.into()));
                    return;
                }
            }
        }
    };

    *shared.socket.lock() = stream.try_clone().ok();

    while let Ok(request) = requests.recv() {
        match request {
            Request::Read { timeout } => {
                let outcome = stream
                    .set_read_timeout(Some(timeout.max(MIN_SOCKET_TIMEOUT)))
                    .map_err(TcpError::from)
                    .and_then(|()| read_frame(&mut stream, max_message_size).map_err(TcpError::from));

                let outcome = match outcome {
                    Ok(Some(frame)) => {
                        trace!("Read from {}: {}", remote, frame.message);
                        RemoteMessage {
                            msg: frame.message,
                            identity: frame.identity,
                            error: TcpError::none(),
                        }
                    }
                    Ok(None) => RemoteMessage::failed(TcpError::closed(format!("{} closed the connection", remote))),
                    Err(e) => RemoteMessage::failed(e),
                };
                shared.finish(outcome);
            }
            Request::Write { frame, timeout } => {
                let outcome = stream
                    .set_write_timeout(Some(timeout.max(MIN_SOCKET_TIMEOUT)))
                    .map_err(TcpError::from)
                    .and_then(|()| write_frame(&mut stream, &frame, max_message_size).map_err(TcpError::from));

                match outcome {
                    Ok(()) => {
                        trace!("Wrote to {}: {}", remote, frame.message);
                        shared.finish(RemoteMessage::default());
                    }
                    Err(e) => shared.finish(RemoteMessage::failed(e)),
                }
            }
            Request::Close => break,
        }
    }

    stream.shutdown(Shutdown::Both).ok();
    *shared.status.lock() = ConnectionStatus::Closed;
    shared.busy.store(false, Ordering::Release);
    debug!("Connection to {} closed", remote);
}

/// Opens [`TcpConnection`]s to a fixed remote address.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    remote: SocketAddr,
    connect_timeout: Duration,
    max_message_size: usize,
}

impl TcpConnector {
    pub fn new(remote: SocketAddr, connect_timeout: Duration, max_message_size: usize) -> Self {
        Self {
            remote,
            connect_timeout,
            max_message_size,
        }
    }
}

impl Connector for TcpConnector {
    fn connect(&mut self) -> Box<dyn Connection> {
        Box::new(TcpConnection::connect(
            self.remote,
            self.connect_timeout,
            self.max_message_size,
        ))
    }
}
