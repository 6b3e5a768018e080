//! Process lifecycle helpers.

use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

/// Returns a token which is cancelled once SIGINT, SIGTERM or SIGHUP is received.
///
/// Long running jobs check the token at safe points (e.g. between pages of a scan) and the
/// HTTP server uses it to drive its graceful shutdown.
pub fn install_termination_listener() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        let mut sig_term = signal(SignalKind::terminate()).ok();
        let mut sig_int = signal(SignalKind::interrupt()).ok();
        let mut sig_hup = signal(SignalKind::hangup()).ok();

        tokio::select! {
            Some(_) = async { sig_int.as_mut()?.recv().await } => {
                tracing::info!("Received SIGINT. Shutting down...");
            },
            Some(_) = async { sig_term.as_mut()?.recv().await } => {
                tracing::info!("Received SIGTERM. Shutting down...");
            },
            Some(_) = async { sig_hup.as_mut()?.recv().await } => {
                tracing::info!("Received SIGHUP. Shutting down...");
            },
        }

        trigger.cancel();
    });

    token
}
