//! Process-wide shutdown signal.
//!
//! Shutdown is a `watch::channel(false)` flipped to `true` once; every loop
//! holds a receiver and selects on [`shutdown_requested`].

use tokio::sync::watch;

/// Resolves once shutdown is requested or the sender is gone.
pub async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolves_on_signal() {
        let (tx, mut rx) = watch::channel(false);

        let waiter = tokio::spawn(async move { shutdown_requested(&mut rx).await });
        tx.send(true).unwrap();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_resolves_when_already_set() {
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();

        shutdown_requested(&mut rx).await;
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn test_resolves_when_sender_dropped() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);

        shutdown_requested(&mut rx).await;
    }
}
