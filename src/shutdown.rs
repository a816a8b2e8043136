//! Stop requests for the polling loops.
//!
//! A request made while a cycle is running is remembered and honoured at the
//! next check, so a Ctrl-C during a fetch is never lost.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Listens for Ctrl-C from now on. Must be called inside a runtime.
    pub fn on_ctrl_c() -> Self {
        let (tx, shutdown) = Self::channel();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Interrupted, stopping after the current cycle");
                    let _ = tx.send(true);
                }
                Err(e) => warn!(error = %e, "Cannot listen for Ctrl-C"),
            }
        });
        shutdown
    }

    /// A handle whose stop is requested by sending `true`.
    pub fn channel() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx })
    }

    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleeps for `period` unless a stop is requested first.
    ///
    /// Returns whether a stop was requested, also one made before the call.
    pub async fn sleep(&mut self, period: Duration) -> bool {
        if self.is_requested() {
            return true;
        }
        let rx = &mut self.rx;
        let stop = async move {
            // Without a sender no stop can come; wait out the period.
            if rx.wait_for(|stop| *stop).await.is_err() {
                std::future::pending::<()>().await;
            }
        };
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = stop => {}
        }
        self.is_requested()
    }
}
