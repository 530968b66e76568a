//! Courier: bridges a Telegram chat to a local agent CLI worker.
//!
//! Startup order matters: the supervisor spawns the worker first so it
//! can bootstrap while the update loop comes up; the health endpoint
//! serves alongside; SIGINT/SIGTERM stop the loop and kill the worker
//! without a respawn.

mod config;
mod health;
mod poller;
mod telegram;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use courier_bridge::bridge::Bridge;
use courier_bridge::status::StatusTracker;
use courier_worker::supervisor::WorkerSupervisor;

use crate::config::Config;
use crate::health::HealthState;
use crate::poller::Poller;
use crate::telegram::TelegramApi;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().context("invalid configuration")?;

    let api = Arc::new(TelegramApi::new(&config.bot_token));
    let status = Arc::new(StatusTracker::new(api.clone(), config.status.clone()));
    let supervisor = Arc::new(WorkerSupervisor::new(config.worker.clone()));
    let bridge = Arc::new(Bridge::new(
        api.clone(),
        supervisor.clone(),
        status,
        config.bridge.clone(),
    ));

    supervisor.start(bridge.clone());

    let health_state = HealthState {
        bridge: bridge.clone(),
        started_at: Utc::now(),
    };
    let bind_addr = config.bind_addr;
    tokio::spawn(async move {
        if let Err(err) = health::serve(bind_addr, health_state).await {
            tracing::error!(error = %err, "health endpoint failed");
        }
    });

    let poller = Poller::new(api, bridge, config.allowed_user_id);
    tokio::select! {
        () = poller.run() => {
            tracing::error!("update loop stopped unexpectedly");
        }
        () = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    supervisor.shutdown().await;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut terminate =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(err) => {
                    tracing::error!(error = %err, "failed to install SIGTERM handler");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
