//! Stopping `fieldctl serve` from the terminal or a service manager

use std::fmt;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Signal that ended a serve run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::Interrupt => write!(f, "SIGINT (Ctrl+C)"),
            ShutdownSignal::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Wait for the first of Ctrl+C or, on Unix, SIGTERM
///
/// If a handler cannot be installed its signal is never reported.
pub async fn wait_for_signal() -> ShutdownSignal {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Ctrl+C handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            },
            Err(e) => {
                warn!("SIGTERM handler unavailable: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => ShutdownSignal::Interrupt,
        () = terminate => ShutdownSignal::Terminate,
    }
}

/// Cancel `token` when a shutdown signal arrives
///
/// Returns the signal, or `None` when the token was cancelled some other way
/// first.
pub async fn cancel_on_signal(token: CancellationToken) -> Option<ShutdownSignal> {
    tokio::select! {
        () = token.cancelled() => None,
        signal = wait_for_signal() => {
            info!("{} received, stopping listeners", signal);
            token.cancel();
            Some(signal)
        },
    }
}
