//! Dispatch engine: drives one loaded connector.
//!
//! The engine owns the plugin instance, drains the shared [`Queue`] one
//! item at a time on a background task, and publishes the connection
//! state around its lifecycle:
//!
//! ```text
//! NotStarted ──start()──▶ Running ──stop()──▶ Stopping ──▶ Stopped
//! ```
//!
//! The drain loop ends with a [`DrainOutcome`] that the process supervisor
//! inspects through [`DispatchEngine::join`]: a clean stop, a request to
//! reload (`Restart`), a permanent shutdown (`Terminate`) or a fatal error.

mod handlers;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use devicehub_domain::connector::{ConnectionState, Connector};
use devicehub_domain::error::{DeviceHubError, PluginError};
use devicehub_domain::id::ConnectorId;

use crate::loader::{LoadError, LoadedConnector, PluginRegistry};
use crate::ports::{ConnectorPlugin, Registry};
use crate::queue::Queue;
use crate::state::ConnectionStatePublisher;
use handlers::{Dispatcher, Flow};

/// Upper bound on how long `stop()` waits for the plugin's in-flight work.
pub const SHUTDOWN_WAITING_DELAY: Duration = Duration::from_secs(3);

const UNFINISHED_TASKS_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lifecycle phase of a [`DispatchEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    NotStarted,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for EnginePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotStarted => "not started",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        })
    }
}

/// How the drain loop ended.
#[derive(Debug)]
#[must_use]
pub enum DrainOutcome {
    /// `stop()` was requested and the queue ran empty.
    Stopped,
    /// The loaded connector's registry record was updated.
    Restart,
    /// The loaded connector's registry record was deleted.
    Terminate,
    /// A handler failed unexpectedly.
    Fatal(DispatchError),
}

/// Unexpected failure while handling a queue item.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("registry lookup failed")]
    Registry(#[from] DeviceHubError),

    #[error("plugin `{operation}` failed")]
    Plugin {
        operation: &'static str,
        #[source]
        source: PluginError,
    },

    #[error("drain task did not complete")]
    Join(#[source] tokio::task::JoinError),
}

/// Cause of a failed start or stop.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("connection state could not be recorded")]
    Registry(#[from] DeviceHubError),

    #[error("plugin failed")]
    Plugin(#[from] PluginError),
}

/// Failure of the connector service as a whole, surfaced to the supervisor.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("connector could not be loaded")]
    Load(#[from] LoadError),

    #[error("connector could not be started")]
    Start(#[source] LifecycleError),

    #[error("connector could not be stopped")]
    Stop(#[source] LifecycleError),

    #[error("cannot {operation} a connector that is {phase}")]
    InvalidPhase {
        operation: &'static str,
        phase: EnginePhase,
    },
}

/// Drives one loaded connector: owns its plugin and the background task
/// draining the shared queue into it.
pub struct DispatchEngine<R> {
    dispatcher: Arc<Dispatcher<R>>,
    state: ConnectionStatePublisher<R>,
    queue: Arc<Queue>,
    phase: EnginePhase,
    shutdown: watch::Sender<bool>,
    drain: Option<JoinHandle<DrainOutcome>>,
}

impl<R: Registry> DispatchEngine<R> {
    /// Load `connector_id` through `plugins` and wrap it in an engine.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Load`] for any loading failure.
    pub async fn load(
        plugins: &PluginRegistry,
        registry: Arc<R>,
        queue: Arc<Queue>,
        connector_id: ConnectorId,
    ) -> Result<Self, ConnectorError> {
        match plugins.load(registry.as_ref(), connector_id).await {
            Ok(loaded) => Ok(Self::new(loaded, registry, queue)),
            Err(err) => {
                tracing::error!(%err, %connector_id, "connector could not be loaded");
                Err(err.into())
            }
        }
    }

    /// Wrap an already loaded connector. The engine starts in
    /// [`EnginePhase::NotStarted`].
    #[must_use]
    pub fn new(loaded: LoadedConnector, registry: Arc<R>, queue: Arc<Queue>) -> Self {
        let state = ConnectionStatePublisher::new(Arc::clone(&registry), loaded.connector().id);
        let (shutdown, _) = watch::channel(false);
        Self {
            dispatcher: Arc::new(Dispatcher::new(registry, loaded)),
            state,
            queue,
            phase: EnginePhase::NotStarted,
            shutdown,
            drain: None,
        }
    }

    /// The registry record this engine was loaded from.
    #[must_use]
    pub fn connector(&self) -> &Connector {
        self.dispatcher.loaded().connector()
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> EnginePhase {
        self.phase
    }

    /// Publish `Running`, start the plugin, then spawn the drain loop.
    ///
    /// Queued items are only handed to a plugin that started successfully.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::InvalidPhase`] unless the engine was never
    /// started, and [`ConnectorError::Start`] when the state cannot be
    /// recorded or the plugin fails to start. After a failed plugin start
    /// the engine is [`EnginePhase::Stopped`], `Stopped` is published on a
    /// best-effort basis and no item has left the queue.
    #[tracing::instrument(skip(self), fields(connector_id = %self.connector().id))]
    pub async fn start(&mut self) -> Result<(), ConnectorError> {
        if self.phase != EnginePhase::NotStarted {
            return Err(ConnectorError::InvalidPhase {
                operation: "start",
                phase: self.phase,
            });
        }

        if let Err(err) = self.state.set_state(ConnectionState::Running).await {
            tracing::error!(%err, "connector could not be started");
            return Err(ConnectorError::Start(err.into()));
        }
        self.phase = EnginePhase::Running;

        if let Err(err) = self.dispatcher.plugin().start().await {
            tracing::error!(%err, "connector could not be started");
            self.phase = EnginePhase::Stopped;
            if let Err(state_err) = self.state.set_state(ConnectionState::Stopped).await {
                tracing::warn!(%state_err, "stopped state could not be recorded");
            }
            return Err(ConnectorError::Start(err.into()));
        }

        self.drain = Some(tokio::spawn(drain(
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.queue),
            self.shutdown.subscribe(),
        )));
        tracing::info!("connector started");
        Ok(())
    }

    /// Stop the plugin and publish `Stopped`.
    ///
    /// The drain loop keeps handling queued items until the queue is
    /// empty. Waiting for the plugin's unfinished tasks is bounded by
    /// [`SHUTDOWN_WAITING_DELAY`]; `Stopped` is published either way.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Stop`] when the plugin fails to stop or the
    /// state cannot be recorded.
    #[tracing::instrument(skip(self), fields(connector_id = %self.connector().id))]
    pub async fn stop(&mut self) -> Result<(), ConnectorError> {
        if self.phase == EnginePhase::Stopped {
            return Ok(());
        }
        self.phase = EnginePhase::Stopping;
        self.shutdown.send_replace(true);

        let plugin = self.dispatcher.plugin();
        let stopped = plugin.stop();
        if let Err(err) = &stopped {
            tracing::error!(%err, "plugin failed to stop");
        }
        wait_for_unfinished_tasks(plugin).await;

        let published = self.state.set_state(ConnectionState::Stopped).await;
        self.phase = EnginePhase::Stopped;

        stopped.map_err(|err| ConnectorError::Stop(err.into()))?;
        if let Err(err) = published {
            tracing::error!(%err, "stopped state could not be recorded");
            return Err(ConnectorError::Stop(err.into()));
        }
        tracing::info!("connector stopped");
        Ok(())
    }

    /// Wait for the drain loop to end.
    ///
    /// Safe to use in `select!`: when cancelled, a later call resumes
    /// waiting. Returns [`DrainOutcome::Stopped`] once the outcome has been
    /// taken or when the engine was never started.
    pub async fn join(&mut self) -> DrainOutcome {
        let Some(handle) = self.drain.as_mut() else {
            return DrainOutcome::Stopped;
        };
        let outcome = handle
            .await
            .unwrap_or_else(|err| DrainOutcome::Fatal(DispatchError::Join(err)));
        self.drain = None;
        outcome
    }
}

/// Poll the plugin until it reports no unfinished work, up to the ceiling.
async fn wait_for_unfinished_tasks(plugin: &dyn ConnectorPlugin) {
    let drained = tokio::time::timeout(SHUTDOWN_WAITING_DELAY, async {
        while plugin.has_unfinished_tasks() {
            tokio::time::sleep(UNFINISHED_TASKS_POLL_INTERVAL).await;
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            ceiling = ?SHUTDOWN_WAITING_DELAY,
            "plugin still has unfinished tasks, giving up waiting"
        );
    }
}

async fn drain<R: Registry>(
    dispatcher: Arc<Dispatcher<R>>,
    queue: Arc<Queue>,
    mut stopping: watch::Receiver<bool>,
) -> DrainOutcome {
    while let Some(item) = queue.next(&mut stopping).await {
        match dispatcher.dispatch(&item).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Restart) => return DrainOutcome::Restart,
            Ok(Flow::Terminate) => return DrainOutcome::Terminate,
            Err(err) => {
                tracing::error!(
                    %err,
                    routing_key = %item.envelope().routing_key(),
                    "unexpected failure while dispatching, stopping drain loop"
                );
                return DrainOutcome::Fatal(err);
            }
        }
    }
    tracing::debug!("queue drained after stop request");
    DrainOutcome::Stopped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{Envelope, QueueItem};
    use crate::testing::{Call, InMemoryRegistry, SpyPlugin};
    use devicehub_domain::device::Device;
    use devicehub_domain::property::{Property, PropertyOwner};
    use devicehub_domain::routing::{EntityEvent, EntityKind, MessageSource, RoutingKey};

    struct Harness {
        registry: Arc<InMemoryRegistry>,
        plugin: Arc<SpyPlugin>,
        queue: Arc<Queue>,
        connector_id: ConnectorId,
    }

    impl Harness {
        fn new() -> Self {
            let registry = Arc::new(InMemoryRegistry::default());
            let connector = Connector::builder()
                .identifier("bench")
                .connector_type("virtual")
                .build()
                .unwrap();
            let connector_id = connector.id;
            registry.insert_connector(connector);
            Self {
                registry,
                plugin: Arc::new(SpyPlugin::new("virtual")),
                queue: Arc::new(Queue::default()),
                connector_id,
            }
        }

        fn plugins(&self) -> PluginRegistry {
            let plugin = Arc::clone(&self.plugin);
            PluginRegistry::new().with("virtual", move |_: &Connector, _| {
                Ok(Arc::clone(&plugin) as Arc<dyn ConnectorPlugin>)
            })
        }

        async fn engine(&self) -> DispatchEngine<InMemoryRegistry> {
            DispatchEngine::load(
                &self.plugins(),
                Arc::clone(&self.registry),
                Arc::clone(&self.queue),
                self.connector_id,
            )
            .await
            .unwrap()
        }

        fn push(&self, key: RoutingKey, data: serde_json::Value) {
            let serde_json::Value::Object(data) = data else {
                panic!("payload fixtures must be objects");
            };
            let envelope = Envelope::new(MessageSource::Registry, key, data);
            self.queue.append(match key {
                RoutingKey::Entity(..) => QueueItem::EntityEvent(envelope),
                RoutingKey::DevicePropertyAction | RoutingKey::ChannelPropertyAction => {
                    QueueItem::PropertyAction(envelope)
                }
                _ => QueueItem::ControlAction(envelope),
            });
        }

        fn recorded_state(&self) -> Option<serde_json::Value> {
            self.registry
                .states()
                .into_iter()
                .next()
                .and_then(|state| state.actual_value)
        }
    }

    #[tokio::test]
    async fn should_fail_to_load_unknown_connector() {
        let harness = Harness::new();

        let result = DispatchEngine::load(
            &harness.plugins(),
            Arc::clone(&harness.registry),
            Arc::clone(&harness.queue),
            ConnectorId::new(),
        )
        .await;

        assert!(matches!(
            result,
            Err(ConnectorError::Load(LoadError::ConnectorNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn should_publish_running_and_start_plugin() {
        let harness = Harness::new();
        let mut engine = harness.engine().await;

        engine.start().await.unwrap();

        assert_eq!(engine.phase(), EnginePhase::Running);
        assert_eq!(harness.recorded_state(), Some(serde_json::json!("running")));
        assert_eq!(
            harness.plugin.calls(),
            [Call::Initialize(harness.connector_id), Call::Start]
        );
    }

    #[tokio::test]
    async fn should_hand_registered_devices_to_plugin_when_loaded() {
        let harness = Harness::new();
        let device = Device::builder()
            .identifier("lamp")
            .connector_id(harness.connector_id)
            .build()
            .unwrap();
        harness.registry.insert_device(device.clone());

        let _engine = harness.engine().await;

        assert_eq!(
            harness.plugin.calls(),
            [
                Call::Initialize(harness.connector_id),
                Call::InitializeDevice(device.id)
            ]
        );
    }

    #[tokio::test]
    async fn should_reject_second_start() {
        let harness = Harness::new();
        let mut engine = harness.engine().await;
        engine.start().await.unwrap();

        let result = engine.start().await;

        assert!(matches!(
            result,
            Err(ConnectorError::InvalidPhase {
                operation: "start",
                phase: EnginePhase::Running
            })
        ));
    }

    #[tokio::test]
    async fn should_wrap_plugin_start_failure() {
        let harness = Harness::new();
        harness.plugin.fail_on("start");
        let mut engine = harness.engine().await;
        harness.push(
            RoutingKey::CONNECTOR_ENTITY_UPDATED,
            serde_json::json!({ "id": harness.connector_id.to_string() }),
        );

        let result = engine.start().await;

        assert!(matches!(
            result,
            Err(ConnectorError::Start(LifecycleError::Plugin(_)))
        ));
        assert_eq!(engine.phase(), EnginePhase::Stopped);
        assert_eq!(harness.recorded_state(), Some(serde_json::json!("stopped")));
        assert!(matches!(engine.join().await, DrainOutcome::Stopped));
        assert_eq!(harness.queue.len(), 1);
        engine.stop().await.unwrap();
        assert!(!harness.plugin.calls().contains(&Call::Stop));
    }

    #[tokio::test]
    async fn should_wrap_state_failure_on_start() {
        let harness = Harness::new();
        let mut engine = harness.engine().await;
        harness.registry.fail_lookups();

        let result = engine.start().await;

        assert!(matches!(
            result,
            Err(ConnectorError::Start(LifecycleError::Registry(_)))
        ));
        assert_eq!(engine.phase(), EnginePhase::NotStarted);
    }

    #[tokio::test]
    async fn should_publish_stopped_after_stop() {
        let harness = Harness::new();
        let mut engine = harness.engine().await;
        engine.start().await.unwrap();

        engine.stop().await.unwrap();

        assert_eq!(engine.phase(), EnginePhase::Stopped);
        assert_eq!(harness.recorded_state(), Some(serde_json::json!("stopped")));
        assert_eq!(harness.registry.states().len(), 1);
        assert!(harness.plugin.calls().contains(&Call::Stop));
        assert!(matches!(engine.join().await, DrainOutcome::Stopped));
    }

    #[tokio::test]
    async fn should_treat_second_stop_as_no_op() {
        let harness = Harness::new();
        let mut engine = harness.engine().await;
        engine.start().await.unwrap();
        engine.stop().await.unwrap();

        engine.stop().await.unwrap();

        let stops = harness
            .plugin
            .calls()
            .into_iter()
            .filter(|call| *call == Call::Stop)
            .count();
        assert_eq!(stops, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn should_bound_stop_when_plugin_never_finishes() {
        let harness = Harness::new();
        harness.plugin.set_unfinished(true);
        let mut engine = harness.engine().await;
        engine.start().await.unwrap();

        let started = tokio::time::Instant::now();
        engine.stop().await.unwrap();
        let elapsed = started.elapsed();

        assert!(elapsed >= SHUTDOWN_WAITING_DELAY);
        assert!(elapsed < SHUTDOWN_WAITING_DELAY + Duration::from_millis(200));
        assert_eq!(harness.recorded_state(), Some(serde_json::json!("stopped")));
    }

    #[tokio::test(start_paused = true)]
    async fn should_return_early_once_plugin_finishes() {
        let harness = Harness::new();
        harness.plugin.set_unfinished(true);
        let mut engine = harness.engine().await;
        engine.start().await.unwrap();

        let plugin = Arc::clone(&harness.plugin);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            plugin.set_unfinished(false);
        });

        let started = tokio::time::Instant::now();
        engine.stop().await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn should_report_stop_failure_after_publishing_stopped() {
        let harness = Harness::new();
        harness.plugin.fail_on("stop");
        let mut engine = harness.engine().await;
        engine.start().await.unwrap();

        let result = engine.stop().await;

        assert!(matches!(
            result,
            Err(ConnectorError::Stop(LifecycleError::Plugin(_)))
        ));
        assert_eq!(engine.phase(), EnginePhase::Stopped);
        assert_eq!(harness.recorded_state(), Some(serde_json::json!("stopped")));
    }

    #[tokio::test]
    async fn should_drain_queued_items_before_stopping() {
        let harness = Harness::new();
        let mut engine = harness.engine().await;
        let device = Device::builder()
            .identifier("lamp")
            .connector_id(harness.connector_id)
            .build()
            .unwrap();
        harness.registry.insert_device(device.clone());
        engine.start().await.unwrap();

        for _ in 0..3 {
            harness.push(
                RoutingKey::Entity(EntityEvent::Updated, EntityKind::Device),
                serde_json::json!({ "id": device.id.to_string() }),
            );
        }
        engine.stop().await.unwrap();

        assert!(matches!(engine.join().await, DrainOutcome::Stopped));
        let initialized = harness
            .plugin
            .calls()
            .into_iter()
            .filter(|call| *call == Call::InitializeDevice(device.id))
            .count();
        assert_eq!(initialized, 3);
        assert!(harness.queue.is_empty());
    }

    #[tokio::test]
    async fn should_end_drain_with_restart_when_connector_updated() {
        let harness = Harness::new();
        let mut engine = harness.engine().await;
        engine.start().await.unwrap();

        harness.push(
            RoutingKey::CONNECTOR_ENTITY_UPDATED,
            serde_json::json!({ "id": harness.connector_id.to_string() }),
        );

        assert!(matches!(engine.join().await, DrainOutcome::Restart));
    }

    #[tokio::test]
    async fn should_end_drain_with_terminate_when_connector_deleted() {
        let harness = Harness::new();
        let mut engine = harness.engine().await;
        engine.start().await.unwrap();

        harness.push(
            RoutingKey::CONNECTOR_ENTITY_DELETED,
            serde_json::json!({ "id": harness.connector_id.to_string() }),
        );
        harness.push(
            RoutingKey::CONNECTOR_ENTITY_UPDATED,
            serde_json::json!({ "id": harness.connector_id.to_string() }),
        );

        assert!(matches!(engine.join().await, DrainOutcome::Terminate));
        assert_eq!(harness.queue.len(), 1);
    }

    #[tokio::test]
    async fn should_end_drain_with_fatal_when_plugin_fails() {
        let harness = Harness::new();
        let device = Device::builder()
            .identifier("lamp")
            .connector_id(harness.connector_id)
            .build()
            .unwrap();
        let property = Property::builder()
            .identifier("power")
            .owner(PropertyOwner::Device(device.id))
            .build()
            .unwrap();
        harness.registry.insert_device(device);
        harness.registry.insert_property(property.clone());
        harness.plugin.fail_on("write_property");
        let mut engine = harness.engine().await;
        engine.start().await.unwrap();

        harness.push(
            RoutingKey::DevicePropertyAction,
            serde_json::json!({ "property": property.id.to_string() }),
        );

        assert!(matches!(
            engine.join().await,
            DrainOutcome::Fatal(DispatchError::Plugin {
                operation: "write_property",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn should_process_items_in_submission_order() {
        let harness = Harness::new();
        let mut engine = harness.engine().await;
        let first = Device::builder()
            .identifier("first")
            .connector_id(harness.connector_id)
            .build()
            .unwrap();
        let second = Device::builder()
            .identifier("second")
            .connector_id(harness.connector_id)
            .build()
            .unwrap();
        harness.registry.insert_device(first.clone());
        harness.registry.insert_device(second.clone());

        harness.push(
            RoutingKey::Entity(EntityEvent::Created, EntityKind::Device),
            serde_json::json!({ "id": second.id.to_string() }),
        );
        harness.push(
            RoutingKey::Entity(EntityEvent::Created, EntityKind::Device),
            serde_json::json!({ "id": first.id.to_string() }),
        );

        engine.start().await.unwrap();
        engine.stop().await.unwrap();
        assert!(matches!(engine.join().await, DrainOutcome::Stopped));

        let devices: Vec<Call> = harness
            .plugin
            .calls()
            .into_iter()
            .filter(|call| matches!(call, Call::InitializeDevice(_)))
            .collect();
        assert_eq!(
            devices,
            [
                Call::InitializeDevice(second.id),
                Call::InitializeDevice(first.id)
            ]
        );
    }
}
