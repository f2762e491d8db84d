//! Supervisor: keeps one connector service alive.
//!
//! A connector update asks for a restart: the running engine is stopped and
//! a fresh one is loaded from the current registry record. Deleting the
//! connector, or an external shutdown request, stops it for good.

use std::future::Future;
use std::sync::Arc;

use devicehub_app::connector::{ConnectorError, DispatchEngine, DrainOutcome};
use devicehub_app::loader::PluginRegistry;
use devicehub_app::ports::Registry;
use devicehub_app::queue::Queue;
use devicehub_domain::id::ConnectorId;

/// Why the supervisor returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    /// The shutdown signal fired.
    Shutdown,
    /// The connector record was deleted.
    Terminated,
    /// Restart was requested more often than allowed.
    RestartLimitReached,
    /// A queued item could not be handled.
    Fatal,
}

impl SupervisorExit {
    /// Whether the process should exit with a success code.
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, Self::Shutdown | Self::Terminated)
    }
}

/// Loads, runs and reloads the dispatch engine of one connector.
pub struct Supervisor<R> {
    plugins: PluginRegistry,
    registry: Arc<R>,
    queue: Arc<Queue>,
    connector_id: ConnectorId,
    max_restarts: u32,
}

impl<R: Registry> Supervisor<R> {
    /// A supervisor that never restarts; see
    /// [`with_max_restarts`](Self::with_max_restarts).
    #[must_use]
    pub fn new(
        plugins: PluginRegistry,
        registry: Arc<R>,
        queue: Arc<Queue>,
        connector_id: ConnectorId,
    ) -> Self {
        Self {
            plugins,
            registry,
            queue,
            connector_id,
            max_restarts: 0,
        }
    }

    #[must_use]
    pub fn with_max_restarts(mut self, max_restarts: u32) -> Self {
        self.max_restarts = max_restarts;
        self
    }

    /// Run the connector until `shutdown` resolves or the service ends.
    ///
    /// On shutdown the engine is stopped and the items still queued are
    /// drained before returning; a failure among them is reported as
    /// [`SupervisorExit::Fatal`].
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError`] when the connector cannot be loaded,
    /// started or stopped.
    #[tracing::instrument(skip_all, fields(connector_id = %self.connector_id))]
    pub async fn run(
        self,
        shutdown: impl Future<Output = ()>,
    ) -> Result<SupervisorExit, ConnectorError> {
        tokio::pin!(shutdown);
        let mut restarts = 0;

        loop {
            let mut engine = DispatchEngine::load(
                &self.plugins,
                Arc::clone(&self.registry),
                Arc::clone(&self.queue),
                self.connector_id,
            )
            .await?;
            // A failed start leaves the engine stopped with nothing drained.
            engine.start().await?;

            let outcome = tokio::select! {
                outcome = engine.join() => Some(outcome),
                () = &mut shutdown => None,
            };

            let Some(outcome) = outcome else {
                tracing::info!("shutdown requested");
                engine.stop().await?;
                return Ok(match engine.join().await {
                    DrainOutcome::Fatal(err) => {
                        tracing::error!(%err, "connector failed while draining for shutdown");
                        SupervisorExit::Fatal
                    }
                    DrainOutcome::Terminate => SupervisorExit::Terminated,
                    DrainOutcome::Stopped | DrainOutcome::Restart => SupervisorExit::Shutdown,
                });
            };

            match outcome {
                DrainOutcome::Restart if restarts < self.max_restarts => {
                    restarts += 1;
                    engine.stop().await?;
                    tracing::info!(restarts, "restarting connector");
                }
                DrainOutcome::Restart => {
                    tracing::error!(max_restarts = self.max_restarts, "restart limit reached");
                    engine.stop().await?;
                    return Ok(SupervisorExit::RestartLimitReached);
                }
                DrainOutcome::Terminate => {
                    tracing::info!("connector removed, terminating");
                    engine.stop().await?;
                    return Ok(SupervisorExit::Terminated);
                }
                DrainOutcome::Fatal(err) => {
                    tracing::error!(%err, "connector failed");
                    if let Err(stop_err) = engine.stop().await {
                        tracing::warn!(%stop_err, "connector did not stop cleanly after failure");
                    }
                    return Ok(SupervisorExit::Fatal);
                }
                DrainOutcome::Stopped => {
                    engine.stop().await?;
                    return Ok(SupervisorExit::Shutdown);
                }
            }
        }
    }
}
