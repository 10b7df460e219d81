//! Graceful shutdown token.
//!
//! A cloneable token shared by every long-lived task; requesting shutdown
//! wakes all waiters and stays latched.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{info, warn};

#[derive(Clone, Default)]
pub struct ShutdownToken {
    requested: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl std::fmt::Debug for ShutdownToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownToken")
            .field("requested", &self.requested.load(Ordering::SeqCst))
            .finish()
    }
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests shutdown; idempotent.
    pub fn request_shutdown(&self) {
        if !self.requested.swap(true, Ordering::SeqCst) {
            info!("shutdown requested");
            self.notify.notify_waiters();
        }
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Resolves once shutdown has been requested.
    pub async fn cancelled(&self) {
        while !self.is_requested() {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register interest before re-checking the flag.
            notified.as_mut().enable();
            if self.is_requested() {
                return;
            }
            notified.await;
        }
    }

    /// Spawns a task that latches the token on SIGINT or SIGTERM.
    pub fn install_signal_handlers(&self) -> tokio::task::JoinHandle<()> {
        let token = self.clone();

        tokio::spawn(async move {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};

                let Ok(mut sigint) = signal(SignalKind::interrupt()) else {
                    warn!("failed to install SIGINT handler");
                    return;
                };
                let Ok(mut sigterm) = signal(SignalKind::terminate()) else {
                    warn!("failed to install SIGTERM handler");
                    return;
                };

                tokio::select! {
                    _ = sigint.recv() => {
                        warn!("received SIGINT, initiating graceful shutdown");
                        token.request_shutdown();
                    }
                    _ = sigterm.recv() => {
                        warn!("received SIGTERM, initiating graceful shutdown");
                        token.request_shutdown();
                    }
                }
            }

            #[cfg(not(unix))]
            {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("received Ctrl+C, initiating graceful shutdown");
                    token.request_shutdown();
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancelled_resolves_after_request() {
        let token = ShutdownToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };

        token.request_shutdown();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should resolve")
            .unwrap();
    }

    #[tokio::test]
    async fn cancelled_resolves_immediately_when_already_requested() {
        let token = ShutdownToken::new();
        token.request_shutdown();
        assert!(token.is_requested());
        token.cancelled().await;
    }

    #[test]
    fn request_is_idempotent() {
        let token = ShutdownToken::new();
        token.request_shutdown();
        token.request_shutdown();
        assert!(token.is_requested());
    }
}
