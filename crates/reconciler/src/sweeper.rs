//! Background task that reclaims stock from abandoned carts.

use std::time::Duration;

use cart_store::CartStore;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::engine::CartEngine;

/// Timing for the expiration sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweeperConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// Carts untouched for longer than this are released.
    pub ttl: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            ttl: Duration::from_secs(30 * 60),
        }
    }
}

/// Periodically runs [`CartEngine::run_expiration_sweep`].
///
/// A failed sweep is logged and left for the next tick; it never stops the
/// task.
pub struct ExpirationSweeper<S: CartStore> {
    engine: CartEngine<S>,
    config: SweeperConfig,
}

impl<S: CartStore> ExpirationSweeper<S> {
    /// Creates a sweeper over the given engine.
    pub fn new(engine: CartEngine<S>, config: SweeperConfig) -> Self {
        Self { engine, config }
    }

    /// Starts sweeping on a background task.
    pub fn spawn(self) -> SweeperHandle {
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(self.run(stop_rx));
        SweeperHandle {
            stop: stop_tx,
            task,
        }
    }

    /// Sweeps on every tick until `stop` resolves.
    ///
    /// The first sweep happens one interval after start. A sweep in progress
    /// always finishes before the stop signal is observed.
    pub async fn run(self, mut stop: oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            ttl_secs = self.config.ttl.as_secs(),
            "cart sweeper started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep_once().await,
                _ = &mut stop => break,
            }
        }

        tracing::info!("cart sweeper stopped");
    }

    async fn sweep_once(&self) {
        tracing::debug!("sweeping expired carts");

        match self.engine.run_expiration_sweep(self.config.ttl).await {
            Ok(report) if report.carts_released > 0 || report.carts_skipped > 0 => {
                tracing::info!(
                    carts_released = report.carts_released,
                    units_released = report.units_released,
                    carts_skipped = report.carts_skipped,
                    "expired carts swept"
                );
            }
            Ok(_) => {}
            Err(err) => {
                metrics::counter!("cart_sweep_failures_total").increment(1);
                tracing::error!(error = %err, "expired cart sweep failed, retrying next tick");
            }
        }
    }
}

/// Handle to a running sweeper task.
pub struct SweeperHandle {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signals the sweeper to stop and waits for it to exit.
    pub async fn shutdown(self) {
        // The task may already be gone; either way it is stopping.
        let _ = self.stop.send(());
        if let Err(err) = self.task.await {
            tracing::error!(error = %err, "cart sweeper task failed");
        }
    }
}
