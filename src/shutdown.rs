// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Process-wide shutdown flag shared by every control loop.

use tokio::sync::watch;
use tracing::{info, warn};

pub type ShutdownTx = watch::Sender<bool>;
pub type ShutdownRx = watch::Receiver<bool>;

pub fn channel() -> (ShutdownTx, ShutdownRx) {
    watch::channel(false)
}

/// Resolves once shutdown was requested or the sender is gone.
pub async fn requested(mut rx: ShutdownRx) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Flip the flag on Ctrl-C or SIGTERM.
pub async fn forward_signals(tx: ShutdownTx) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => warn!("Received SIGINT"),
                    _ = sigterm.recv() => warn!("Received SIGTERM"),
                }
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                warn!("Received SIGINT");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        warn!("Received SIGINT");
    }

    info!("Shutting down");
    let _ = tx.send(true);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_requested_resolves_after_send() {
        let (tx, rx) = channel();
        let waiter = tokio::spawn(requested(rx));
        tx.send(true).unwrap();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_requested_resolves_when_sender_dropped() {
        let (tx, rx) = channel();
        drop(tx);
        requested(rx).await;
    }
}
