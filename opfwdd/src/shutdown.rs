// ABOUTME: turns SIGINT and SIGTERM into cancellation of the accept loop.
// ABOUTME: a second signal stops waiting for in-flight connections.

use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Resolves when the process receives SIGINT or SIGTERM.
pub async fn termination_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(?err, "failed to install ctrl-c handler");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(?err, "failed to install sigterm handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => info!(signal = "SIGINT", "shutdown signal received"),
        _ = terminate => info!(signal = "SIGTERM", "shutdown signal received"),
    }
}

/// The first termination signal cancels `graceful`, which stops the accept
/// loop and starts the drain. A second one cancels `immediate`.
pub fn spawn_signal_watcher(
    graceful: CancellationToken,
    immediate: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(watch(termination_signal, graceful, immediate))
}

async fn watch<S, F>(mut next_signal: S, graceful: CancellationToken, immediate: CancellationToken)
where
    S: FnMut() -> F,
    F: Future<Output = ()>,
{
    tokio::select! {
        _ = next_signal() => {
            info!("shutting down server");
            graceful.cancel();
        }
        _ = graceful.cancelled() => {}
    }

    tokio::select! {
        _ = next_signal() => {
            warn!("second shutdown signal received, not waiting for in-flight connections");
            immediate.cancel();
        }
        _ = immediate.cancelled() => {}
    }
}
