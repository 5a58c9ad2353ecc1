// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Role runners.
//!
//! The engines run on their own threads; these loops only feed commands in,
//! answer what comes out and watch for the shutdown signal.

use simcor::message::TRIGGER;
use simcor::{
    node, BroadcastHandle, BroadcastTransaction, SessionHandle, SessionRole, SimCorConfig, TcpErrorKind, Transaction,
    TransactionFactory,
};
use std::error::Error;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Upper bound for the close round and driver shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug)]
pub struct StepPlan {
    /// 0 = until interrupted
    pub steps: u32,
    pub interval: Duration,
}

impl StepPlan {
    fn finished(&self, done: u32) -> bool {
        self.steps != 0 && done >= self.steps
    }
}

fn report_round(round: &BroadcastTransaction) {
    if round.error().is_err() {
        warn!(
            "Round {}: {} response(s), {}",
            round.identity(),
            round.responses.len(),
            round.error()
        );
    } else {
        info!("Round {}: {} response(s)", round.identity(), round.responses.len());
    }
    for line in round.broadcast_msg.lines().chain(round.response_msg.lines()) {
        info!("  {}", line);
    }
    for response in &round.responses {
        debug!("  {}", response);
    }
}

async fn wait_exit(alive: impl Fn() -> bool) {
    let deadline = Instant::now() + SHUTDOWN_TIMEOUT;
    while alive() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    if alive() {
        warn!("Engine thread still running after {:?}", SHUTDOWN_TIMEOUT);
    }
}

/// Broadcast one trigger per step to every connected client.
pub async fn run_coordinator(config: &SimCorConfig, plan: StepPlan) -> Result<(), Box<dyn Error>> {
    let archive = node::open_archive(config)?;
    let handle = node::coordinator(config, archive)?.spawn()?;
    let factory = TransactionFactory::new(config.factory_config());

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(plan.interval);
    let mut step = 0u32;
    let mut in_flight = false;
    let mut failure = None;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received, closing clients...");
                break;
            }
            _ = ticker.tick() => {
                while let Some(round) = handle.next_round(Duration::ZERO) {
                    report_round(&round);
                    in_flight = false;
                }
                if in_flight {
                    continue;
                }
                let error = handle.current_error();
                if error.kind == TcpErrorKind::ListenerFailure {
                    error!("Cannot accept clients: {}", error);
                    failure = Some(error);
                    break;
                }
                if plan.finished(step) {
                    info!("All {} step(s) done", step);
                    break;
                }
                if handle.client_count() == 0 {
                    debug!("Waiting for clients");
                    continue;
                }
                step += 1;
                handle.trigger(factory.create_identity(step, 0, 0), TRIGGER, Some(format!("step {}", step)));
                in_flight = true;
            }
        }
    }

    close_group(&handle).await;
    handle.stop();
    wait_exit(|| handle.is_alive()).await;
    info!("Coordinator stats: {}", handle.stats());
    match failure {
        Some(error) => Err(error.into()),
        None => Ok(()),
    }
}

async fn close_group(handle: &BroadcastHandle) {
    handle.close_all();
    let deadline = Instant::now() + SHUTDOWN_TIMEOUT;
    while Instant::now() < deadline && handle.is_running() {
        if let Some(round) = handle.next_round(Duration::ZERO) {
            if round.is_close() {
                info!("Broadcast group closed");
                return;
            }
            report_round(&round);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    warn!("Close round did not finish");
}

/// Answer every received command with an OK response echoing its content.
async fn answer_commands(config: &SimCorConfig, handle: SessionHandle) {
    let factory = TransactionFactory::new(config.factory_config());
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(config.poll_interval());

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                if let Some((identity, command)) = handle.pickup_command() {
                    info!("{} {}: {}", identity, command.command, command.content_str());
                    let content = format!("{} done", command.content_str());
                    let response = factory.create_response(&command.command, Some(content), true);
                    if !handle.post_response(response) {
                        warn!("Response to {} was not accepted", identity);
                    }
                }
                while let Some(tx) = handle.next_finished(Duration::ZERO) {
                    if tx.error().is_err() {
                        warn!("Transaction {} ended with {}", tx.identity(), tx.error());
                    } else if tx.command.is_close_session() {
                        info!("Session closed by remote");
                    }
                }
                if !handle.is_running() {
                    break;
                }
            }
        }
    }

    handle.stop();
    wait_exit(|| handle.is_alive()).await;
}

pub async fn run_client(config: &SimCorConfig) -> Result<(), Box<dyn Error>> {
    let archive = node::open_archive(config)?;
    let handle = node::connecting_session(config, SessionRole::CLIENT, archive)?.spawn()?;
    answer_commands(config, handle).await;
    Ok(())
}

pub async fn run_responder(config: &SimCorConfig) -> Result<(), Box<dyn Error>> {
    let archive = node::open_archive(config)?;
    let handle = node::responder(config, archive)?.spawn()?;
    answer_commands(config, handle).await;
    Ok(())
}

/// Send one command per step, then close the session.
pub async fn run_initiator(config: &SimCorConfig, plan: StepPlan) -> Result<(), Box<dyn Error>> {
    let archive = node::open_archive(config)?;
    let handle = node::connecting_session(config, SessionRole::INITIATOR, archive)?.spawn()?;
    let factory = TransactionFactory::new(config.factory_config());

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(plan.interval);
    let mut step = 0u32;
    let mut in_flight = false;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received, closing session...");
                break;
            }
            _ = ticker.tick() => {
                if let Some(response) = handle.pickup_response() {
                    info!("Step {}: {} {}", step, response.msg_type, response.content_str());
                    in_flight = false;
                }
                while let Some(tx) = handle.next_finished(Duration::ZERO) {
                    if tx.error().is_err() {
                        warn!("Transaction {} ended with {}", tx.identity(), tx.error());
                        in_flight = false;
                    }
                }
                if in_flight {
                    continue;
                }
                if plan.finished(step) {
                    info!("All {} step(s) done", step);
                    break;
                }
                let identity = factory.create_identity(step + 1, 0, 0);
                let command = factory.create_command("propose", Some(format!("step {}", step + 1)));
                if handle.post_command(identity, command) {
                    step += 1;
                    in_flight = true;
                }
            }
        }
    }

    handle.request_close();
    wait_exit(|| handle.is_alive()).await;
    if handle.is_alive() {
        handle.stop();
    }
    Ok(())
}
