// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Loopback integration tests
//!
//! Runs complete nodes over real TCP sockets on 127.0.0.1: a broadcast
//! coordinator with two clients, and an initiator/responder pair.

use simcor::{
    node, MsgType, NoArchive, SessionHandle, SessionRole, SimCorConfig, SimCorMsg, TcpErrorKind, Transaction,
    TransactionFactory, TransactionIdentity, TransactionStateName,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::{Duration, Instant};

const DEADLINE: Duration = Duration::from_secs(10);

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}

fn config(model: &str, port: u16) -> SimCorConfig {
    SimCorConfig {
        bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port,
        remote_address: Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)),
        model: model.to_string(),
        system_description: format!("{} test node", model),
        default_timeout_ms: 10_000,
        poll_interval_ms: 2,
        close_delay_ms: 20,
        connect_timeout_ms: 1000,
        ..Default::default()
    }
}

fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    let start = Instant::now();
    while !cond() {
        assert!(start.elapsed() < DEADLINE, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Answer a pending command, if any.
fn serve(handle: &SessionHandle, model: &str) -> bool {
    let Some((_, command)) = handle.pickup_command() else {
        return false;
    };
    let content = format!("{} did {}", model, command.content_str());
    let response = SimCorMsg::new(MsgType::OkResponse, None, command.command.as_str(), Some(content));
    assert!(handle.post_response(response));
    true
}

/// Send one command from `initiator` and let `responder` answer it.
fn exchange(
    factory: &TransactionFactory,
    initiator: &SessionHandle,
    responder: &SessionHandle,
    model: &str,
    step: u32,
) -> SimCorMsg {
    let identity = factory.create_identity(step, 0, 0);
    let command = factory.create_command("propose", Some(format!("step {}", step)));
    assert!(initiator.post_command(identity, command));

    let start = Instant::now();
    let response = loop {
        serve(responder, model);
        if let Some(response) = initiator.pickup_response() {
            break response;
        }
        assert!(start.elapsed() < DEADLINE, "no response for step {}", step);
        std::thread::sleep(Duration::from_millis(1));
    };

    wait_for("next command slot", || {
        initiator.current_state() == TransactionStateName::WaitForCommandPosting
    });
    response
}

fn wait_for_close_session(handle: &SessionHandle) {
    let start = Instant::now();
    loop {
        if handle
            .next_finished(Duration::from_millis(50))
            .is_some_and(|tx| tx.command.is_close_session())
        {
            return;
        }
        assert!(start.elapsed() < DEADLINE, "close-session never finished");
    }
}

#[test]
fn test_broadcast_round_with_two_clients() {
    let port = free_port();
    let coordinator = node::coordinator(&config("MDL-00", port), Arc::new(NoArchive))
        .unwrap()
        .spawn()
        .unwrap();

    let clients: Vec<(SessionHandle, &str)> = ["MDL-01", "MDL-02"]
        .into_iter()
        .map(|model| {
            let driver =
                node::connecting_session(&config(model, port), SessionRole::CLIENT, Arc::new(NoArchive)).unwrap();
            (driver.spawn().unwrap(), model)
        })
        .collect();

    wait_for("both clients", || coordinator.client_count() == 2);

    coordinator.trigger(TransactionIdentity::new(1, 0, 0), "execute", Some("disp 0.5".into()));
    let start = Instant::now();
    let round = loop {
        for (handle, model) in &clients {
            serve(handle, model);
        }
        if let Some(round) = coordinator.next_round(Duration::from_millis(5)) {
            break round;
        }
        assert!(start.elapsed() < DEADLINE, "round did not complete");
    };

    assert!(round.error().is_none(), "unexpected {}", round.error());
    assert_eq!(round.responses.len(), 2);
    let mut contents: Vec<&str> = round.responses.iter().map(|r| r.content_str()).collect();
    contents.sort_unstable();
    assert_eq!(contents, ["MDL-01 did disp 0.5", "MDL-02 did disp 0.5"]);
    assert_eq!(coordinator.stats().rounds, 1);

    // Tear the group down: each client sees close-session and drops its connection
    coordinator.close_all();
    let close = coordinator.next_round(DEADLINE).unwrap();
    assert!(close.is_close());
    for (handle, _) in &clients {
        let start = Instant::now();
        loop {
            let done = handle.next_finished(Duration::from_millis(50));
            if done.is_some_and(|tx| tx.command.is_close_session()) {
                break;
            }
            assert!(start.elapsed() < DEADLINE, "client never saw close-session");
        }
    }

    for (handle, _) in &clients {
        handle.stop();
    }
    coordinator.stop();
    wait_for("coordinator exit", || !coordinator.is_alive());
    for (handle, _) in &clients {
        wait_for("client exit", || !handle.is_alive());
    }
}

#[test]
fn test_lost_client_does_not_fail_round() {
    let port = free_port();
    let coordinator = node::coordinator(&config("MDL-00", port), Arc::new(NoArchive))
        .unwrap()
        .spawn()
        .unwrap();

    let steady = node::connecting_session(&config("MDL-01", port), SessionRole::CLIENT, Arc::new(NoArchive))
        .unwrap()
        .spawn()
        .unwrap();
    let flaky = node::connecting_session(&config("MDL-02", port), SessionRole::CLIENT, Arc::new(NoArchive))
        .unwrap()
        .spawn()
        .unwrap();
    wait_for("both clients", || coordinator.client_count() == 2);

    // First round merges both clients
    coordinator.trigger(TransactionIdentity::new(1, 0, 0), "execute", None);
    let start = Instant::now();
    loop {
        serve(&steady, "MDL-01");
        serve(&flaky, "MDL-02");
        if coordinator.next_round(Duration::from_millis(5)).is_some() {
            break;
        }
        assert!(start.elapsed() < DEADLINE);
    }

    // Stopping the client closes its socket
    flaky.stop();
    wait_for("flaky exit", || !flaky.is_alive());

    coordinator.trigger(TransactionIdentity::new(2, 0, 0), "execute", None);
    let start = Instant::now();
    let round = loop {
        serve(&steady, "MDL-01");
        if let Some(round) = coordinator.next_round(Duration::from_millis(5)) {
            break round;
        }
        assert!(start.elapsed() < DEADLINE);
    };

    assert_eq!(round.error().kind, TcpErrorKind::BroadcastClientsLost);
    assert_eq!(round.responses.len(), 1);
    assert!(round.response_msg.contains("lost contact with"));
    assert_eq!(coordinator.clients().len(), 1);

    steady.stop();
    coordinator.stop();
    wait_for("coordinator exit", || !coordinator.is_alive());
}

#[test]
fn test_initiator_and_responder_exchange_commands() {
    let port = free_port();
    let responder = node::responder(&config("MDL-10", port), Arc::new(NoArchive))
        .unwrap()
        .spawn()
        .unwrap();
    let initiator_config = config("MDL-11", port);
    let initiator = node::connecting_session(&initiator_config, SessionRole::INITIATOR, Arc::new(NoArchive))
        .unwrap()
        .spawn()
        .unwrap();

    wait_for("open session", || {
        initiator.current_state() == TransactionStateName::WaitForCommandPosting
    });

    let factory = TransactionFactory::new(initiator_config.factory_config());
    for step in 1..=3 {
        let response = exchange(&factory, &initiator, &responder, "MDL-10", step);
        assert_eq!(response.msg_type, MsgType::OkResponse);
        assert_eq!(response.content_str(), format!("MDL-10 did step {}", step));
    }

    initiator.request_close();
    wait_for("initiator exit", || !initiator.is_alive());

    wait_for_close_session(&responder);
    wait_for("responder listening again", || {
        responder.current_state() == TransactionStateName::ListenForConnections
    });

    responder.stop();
    wait_for("responder exit", || !responder.is_alive());
}

#[test]
fn test_session_server_accepts_successive_initiators() {
    let port = free_port();
    let server = node::session_server(&config("MDL-20", port), Arc::new(NoArchive))
        .unwrap()
        .spawn()
        .unwrap();

    for (round, model) in ["MDL-21", "MDL-22"].into_iter().enumerate() {
        let initiator_config = config(model, port);
        let initiator = node::connecting_session(&initiator_config, SessionRole::INITIATOR, Arc::new(NoArchive))
            .unwrap()
            .spawn()
            .unwrap();
        wait_for("open session", || {
            initiator.current_state() == TransactionStateName::WaitForCommandPosting
        });

        let factory = TransactionFactory::new(initiator_config.factory_config());
        for step in 1..=2 {
            let response = exchange(&factory, &initiator, &server, "MDL-20", step);
            assert_eq!(response.msg_type, MsgType::OkResponse);
            assert_eq!(response.content_str(), format!("MDL-20 did step {}", step));
        }

        initiator.request_close();
        wait_for("initiator exit", || !initiator.is_alive());
        wait_for_close_session(&server);
        assert!(server.is_running(), "server stopped after session {}", round + 1);
        assert!(server.engine_error().is_none());
    }

    server.stop();
    wait_for("server exit", || !server.is_alive());
}
