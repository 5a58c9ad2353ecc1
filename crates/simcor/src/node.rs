// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Processor and driver wiring from a [`SimCorConfig`].

use crate::actions::{BaseActions, BroadcastActions, ListenerActions, ListenerMachineActions};
use crate::archive::{Archive, JsonLinesArchive, NoArchive};
use crate::config::{ConfigError, SimCorConfig};
use crate::driver::{BroadcastDriver, SessionDriver, SessionRole};
use crate::listener_machine::{ClientSink, ListenerRole, ListenerStateMachine};
use crate::net::{TcpAcceptor, TcpConnector};
use crate::registry::BroadcastClientRegistry;
use crate::transaction::TransactionFactory;
use std::sync::Arc;
use tracing::info;

/// Archive named by `archive_path`, or none.
pub fn open_archive(config: &SimCorConfig) -> Result<Arc<dyn Archive>, ConfigError> {
    match &config.archive_path {
        Some(path) => {
            let archive = JsonLinesArchive::open(path)
                .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;
            info!("Archiving transactions to {}", path.display());
            Ok(Arc::new(archive))
        }
        None => Ok(Arc::new(NoArchive)),
    }
}

fn base(config: &SimCorConfig, archive: Arc<dyn Archive>) -> BaseActions {
    BaseActions::new(TransactionFactory::new(config.factory_config()), archive)
}

fn listener(config: &SimCorConfig, archive: Arc<dyn Archive>) -> ListenerActions {
    let acceptor = TcpAcceptor::new(config.bind_socket_addr(), config.max_message_size);
    ListenerActions::new(base(config, archive), Box::new(acceptor))
}

/// Session that accepts one connection at a time and answers commands.
pub fn responder(
    config: &SimCorConfig,
    archive: Arc<dyn Archive>,
) -> Result<SessionDriver<ListenerActions>, ConfigError> {
    config.validate_listening()?;
    Ok(SessionDriver::new(
        listener(config, archive),
        SessionRole::RESPONDER,
        config.poll_interval(),
    ))
}

/// Responder whose connections are accepted and opened in the background.
pub fn session_server(
    config: &SimCorConfig,
    archive: Arc<dyn Archive>,
) -> Result<SessionDriver<ListenerMachineActions>, ConfigError> {
    config.validate_listening()?;
    let machine = ListenerStateMachine::new(
        listener(config, Arc::clone(&archive)),
        ListenerRole::OpenSession,
        ClientSink::Single,
        config.poll_interval(),
    );
    Ok(SessionDriver::new(
        ListenerMachineActions::new(base(config, archive), machine),
        SessionRole::RESPONDER,
        config.poll_interval(),
    ))
}

/// Session that connects to `remote_address`.
pub fn connecting_session(
    config: &SimCorConfig,
    role: SessionRole,
    archive: Arc<dyn Archive>,
) -> Result<SessionDriver<BaseActions>, ConfigError> {
    config.validate()?;
    let remote = config
        .remote_address
        .ok_or_else(|| ConfigError::InvalidValue("remote_address is required".into()))?;
    let connector = TcpConnector::new(remote, config.connect_timeout(), config.max_message_size);
    Ok(SessionDriver::new(
        base(config, archive).with_connector(Box::new(connector)),
        role,
        config.poll_interval(),
    ))
}

/// Broadcast coordinator accepting clients on the configured port.
pub fn coordinator(config: &SimCorConfig, archive: Arc<dyn Archive>) -> Result<BroadcastDriver, ConfigError> {
    config.validate_listening()?;
    let registry = Arc::new(BroadcastClientRegistry::new());
    let machine = ListenerStateMachine::new(
        listener(config, Arc::clone(&archive)),
        ListenerRole::OpenSession,
        ClientSink::Broadcast(Arc::clone(&registry)),
        config.poll_interval(),
    );
    let actions = BroadcastActions::new(base(config, archive), machine, registry, config.close_delay());
    Ok(BroadcastDriver::new(actions, config.poll_interval()))
}
