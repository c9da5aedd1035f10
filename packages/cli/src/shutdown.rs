use std::future::Future;

use anyhow::{Context, Result};
use tokio::signal::unix::{SignalKind, signal};

/// Install SIGTERM and SIGINT handlers.
///
/// The returned future resolves with the name of the first signal received.
/// Handlers are live from the moment this returns, so install them before
/// starting any work.
pub(crate) fn install_shutdown_handler() -> Result<impl Future<Output = &'static str>> {
    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;

    Ok(async move {
        let name = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        };
        tracing::info!(signal = name, "received shutdown signal");
        name
    })
}
