use anyhow::Context;
use std::sync::Arc;
use tracing::{error, info};
use vigil::{
    Collaborators, Config, MemoryAlarmLog, MemoryHistoryStore, MemoryTriggerStore,
    MemoryVariableStore, Runtime, StaticAliasResolver,
};

#[cfg(feature = "mqtt")]
use vigil::{MqttPublisher, PublishSink};

#[cfg(feature = "email")]
use vigil::{EmailService, SmtpEmailService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("vigil=info".parse().unwrap()),
        )
        .init();

    info!("vigil v{} starting", vigil::VERSION);

    let config_path = std::env::args().nth(1).unwrap_or_else(|| {
        error!(
            "Usage: {} <config.yaml>",
            std::env::args().next().unwrap_or_else(|| "vigil".into())
        );
        std::process::exit(1);
    });

    let config = Config::from_file(&config_path)
        .with_context(|| format!("loading config from {}", config_path))?;
    info!("loaded {} points", config.points.len());

    #[cfg(feature = "mqtt")]
    let publish: Option<Arc<dyn PublishSink>> = match &config.mqtt {
        Some(mqtt_config) => Some(MqttPublisher::connect(mqtt_config)?),
        None => None,
    };
    #[cfg(not(feature = "mqtt"))]
    let publish = None;

    #[cfg(feature = "email")]
    let email: Option<Arc<dyn EmailService>> = match &config.smtp {
        Some(smtp_config) => Some(Arc::new(SmtpEmailService::new(smtp_config)?)),
        None => None,
    };
    #[cfg(not(feature = "email"))]
    let email = None;

    let runtime = Runtime::new(
        &config,
        Collaborators {
            variables: Arc::new(MemoryVariableStore::new()),
            triggers: Arc::new(MemoryTriggerStore::new()),
            alarms: Arc::new(MemoryAlarmLog::new()),
            history: Arc::new(MemoryHistoryStore::new()),
            aliases: Arc::new(StaticAliasResolver::new()),
            publish,
            email,
        },
    )?;

    let loaded = runtime.triggers().load().await?;
    info!("ready with {} trigger rules, waiting for device producers", loaded);

    tokio::signal::ctrl_c().await?;
    info!("received shutdown signal");
    runtime.shutdown().await;

    let stats = runtime.stats();
    info!(
        "final stats: {} updates, {} unchanged, {} firings",
        stats.updates_processed, stats.updates_unchanged, stats.triggers_fired
    );

    Ok(())
}
