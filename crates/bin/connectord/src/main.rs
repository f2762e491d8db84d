//! # connectord, the connector daemon
//!
//! ## Responsibilities
//! - Load configuration (`connectord.toml`, env vars)
//! - Install the tracing subscriber
//! - Wire the in-process bus, in-memory registry, consumer proxy and queue
//! - Register the available plugins
//! - Seed the connector record (and demo hardware for the virtual type)
//! - Supervise the connector service until Ctrl-C or termination

use std::process::ExitCode;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use devicehub_adapter_registry_memory::MemoryRegistry;
use devicehub_app::bus::InProcessBus;
use devicehub_app::consumer::{ConsumerProxy, MessageConsumer};
use devicehub_app::loader::{PluginRegistry, normalize_type};
use devicehub_app::queue::Queue;
use devicehub_connectord::config::Config;
use devicehub_connectord::seed;
use devicehub_connectord::supervisor::{Supervisor, SupervisorExit};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("connectord: {err}");
            return ExitCode::FAILURE;
        }
    };

    let filter = EnvFilter::try_new(&config.logging.filter).unwrap_or_else(|err| {
        eprintln!("connectord: invalid log filter ({err}), falling back to info");
        EnvFilter::new("info")
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(config).await {
        Ok(exit) if exit.is_success() => {
            tracing::info!(?exit, "connectord exiting");
            ExitCode::SUCCESS
        }
        Ok(exit) => {
            tracing::error!(?exit, "connector service ended abnormally");
            ExitCode::FAILURE
        }
        Err(err) => {
            tracing::error!(error = %err, "connector service failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<SupervisorExit, Box<dyn std::error::Error>> {
    // Bus & registry
    let bus = InProcessBus::new(config.bus.capacity);
    let registry = Arc::new(MemoryRegistry::new(bus.clone()));

    // Queue & consumer
    let queue = Arc::new(Queue::new(config.queue.capacity));
    let proxy = ConsumerProxy::new();
    Arc::new(MessageConsumer::new(queue.producer())).register(&proxy);
    let _pump = proxy.spawn(bus.subscribe());

    // Plugins
    let mut plugins = PluginRegistry::new();
    devicehub_adapter_virtual::register(&mut plugins);
    tracing::info!(types = ?plugins.types(), "plugins registered");

    // Registry records
    let connector = seed::ensure_connector(&registry, &config.connector).await?;
    if normalize_type(&connector.connector_type) == devicehub_adapter_virtual::CONNECTOR_TYPE {
        let demo = seed::seed_demo_device(&registry, connector.id).await?;
        tracing::info!(device_id = %demo.device.id, "demo device seeded");
    }

    let supervisor = Supervisor::new(plugins, registry, queue, connector.id)
        .with_max_restarts(config.supervisor.max_restarts);
    Ok(supervisor.run(shutdown_signal()).await?)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(%err, "cannot listen for ctrl-c, running until terminated");
        std::future::pending::<()>().await;
    }
}
