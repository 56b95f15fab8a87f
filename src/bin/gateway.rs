use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use notification_dispatch::{
    api::{AppState, run_api_server},
    clients::{
        database::DatabaseProbe,
        health::{HealthChecker, HealthProbe, StoreProbe},
        rbmq::RabbitMqClient,
        redis::RedisStore,
        store::NotificationStore,
    },
    config::Config,
    gateway::{Gateway, GatewaySettings},
    models::notification::NotificationType,
    telemetry::{init_tracing, shutdown_signal},
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Error> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    let config = Config::load()?;
    init_tracing(&config.log_format);

    let database_url = Config::require(&config.database_url, "DATABASE_URL")?;

    let store: Arc<dyn NotificationStore> = Arc::new(RedisStore::connect(&config.redis_url).await?);
    let broker = Arc::new(RabbitMqClient::connect(&config, &NotificationType::ALL).await?);

    let gateway = Gateway::new(
        store.clone(),
        broker.clone(),
        GatewaySettings::from_config(&config),
    );

    let probes: Vec<Arc<dyn HealthProbe>> = vec![
        Arc::new(DatabaseProbe::new(database_url)),
        Arc::new(StoreProbe::new(store)),
        broker.clone(),
    ];

    let state = Arc::new(AppState {
        gateway,
        health_checker: HealthChecker::new(probes),
    });

    run_api_server(state, config.server_port, shutdown_signal())
        .await
        .map_err(|e| anyhow!("Gateway server failed: {}", e))?;

    if let Err(e) = broker.close().await {
        warn!(error = %e, "Broker connection did not close cleanly");
    }

    info!("Gateway shut down");

    Ok(())
}
