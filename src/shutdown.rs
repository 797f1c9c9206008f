use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Installs a two-stage shutdown handler for a drover invocation.
///
/// The first SIGTERM/SIGINT cancels the returned token: the fan-out stops
/// granting permits, in-flight hosts observe the cancellation through their
/// child tokens, and their slots come back as cancellation results, so a
/// partial run still prints a coherent grouping. A second signal skips the
/// wind-down and aborts the process with the conventional interrupt code.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let fanout = token.clone();

    tokio::spawn(async move {
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        let caught = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        };
        tracing::warn!(
            signal = caught,
            "winding down; unfinished hosts will report cancellation"
        );
        fanout.cancel();

        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
        tracing::error!("second signal received, aborting without waiting for stragglers");
        std::process::exit(130);
    });

    token
}
