//! Process shutdown signal

/// Resolves on Ctrl+C, or SIGTERM on Unix
///
/// A failed SIGTERM registration is logged and leaves Ctrl+C as the only
/// trigger.
pub async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            },
            Err(e) => {
                tracing::warn!("SIGTERM handler not installed: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            },
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
