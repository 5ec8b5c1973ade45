//! Termination signals mapped onto a cancellation token.

use tokio_util::sync::CancellationToken;
use tracing::info;

/// Cancel `token` on the first SIGINT or SIGTERM.
#[cfg(unix)]
pub(crate) fn cancel_on_shutdown(token: CancellationToken) -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
        info!("shutdown requested: finishing the current job");
        token.cancel();
    });
    Ok(())
}

/// Cancel `token` on Ctrl+C (the only signal available off unix).
#[cfg(not(unix))]
pub(crate) fn cancel_on_shutdown(token: CancellationToken) -> anyhow::Result<()> {
    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            info!("received Ctrl+C");
            token.cancel();
        }
    });
    Ok(())
}
