//! Process-wide shutdown signal

use tokio::sync::watch;

/// Create the shutdown pair. Send `true` to request shutdown.
pub fn channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Resolves once shutdown has been requested. Never resolves if the sender is
/// dropped without requesting it.
pub async fn requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
