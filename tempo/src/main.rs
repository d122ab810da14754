//! Tempo - the global pomodoro timer daemon.
//!
//! Owns the one authoritative countdown for the whole app, ticks it on a
//! fixed cadence, and serves clients over a Unix domain socket.

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod alerts;
mod config;
mod controller;
mod ipc;

use controller::TimerService;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "tempo=info".into()),
        )
        .init();

    let config = config::load_config()?;
    info!(
        pomodoro_min = config.pomodoro_minutes,
        break_min = config.break_minutes,
        "starting tempo daemon"
    );

    let service = TimerService::new(
        config.pomodoro_ms(),
        config.break_ms(),
        config.tick_interval(),
    );

    // Completion notifications ride the same event channel as IPC
    // subscribers.
    tokio::spawn(alerts::run(service.subscribe()));

    let socket_path = config.socket_path.clone();
    tokio::select! {
        res = ipc::server::run(service, &socket_path) => res?,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }
    let _ = std::fs::remove_file(&socket_path);

    Ok(())
}
