use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use notification_dispatch::{
    clients::{
        collaborators::DeliveryProvider, email::EmailClient, fcm::FcmClient, rbmq::RabbitMqClient,
        redis::RedisStore, template::TemplateServiceClient, user::UserServiceClient,
    },
    config::Config,
    models::notification::NotificationType,
    telemetry::{init_tracing, shutdown_signal},
    worker::{DeliveryWorker, WorkerSettings},
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Error> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    let config = Config::load()?;
    init_tracing(&config.log_format);

    let notification_type = config.worker_notification_type;
    let timeout = config.http_timeout();

    let users = UserServiceClient::new(
        Config::require(&config.user_service_url, "USER_SERVICE_URL")?,
        timeout,
    )?;
    let templates = TemplateServiceClient::new(
        Config::require(&config.template_service_url, "TEMPLATE_SERVICE_URL")?,
        timeout,
    )?;
    let provider = build_provider(&config, notification_type)?;

    let store = RedisStore::connect(&config.redis_url).await?;
    let broker = RabbitMqClient::connect(&config, &[notification_type]).await?;

    let worker = DeliveryWorker::new(
        notification_type,
        Arc::new(users),
        Arc::new(templates),
        provider,
        Arc::new(store),
        WorkerSettings::from_config(&config),
    );

    info!(
        notification_type = %worker.notification_type(),
        "Worker dependencies ready"
    );

    let result = worker.run(&broker, shutdown_signal()).await;

    if let Err(e) = broker.close().await {
        warn!(error = %e, "Broker connection did not close cleanly");
    }

    result?;
    info!(notification_type = %worker.notification_type(), "Worker shut down");

    Ok(())
}

fn build_provider(
    config: &Config,
    notification_type: NotificationType,
) -> Result<Arc<dyn DeliveryProvider>, Error> {
    let timeout = config.http_timeout();

    match notification_type {
        NotificationType::Email => Ok(Arc::new(EmailClient::new(
            Config::require(&config.email_api_url, "EMAIL_API_URL")?,
            Config::require(&config.email_api_key, "EMAIL_API_KEY")?,
            Config::require(&config.email_from_address, "EMAIL_FROM_ADDRESS")?,
            timeout,
        )?)),
        NotificationType::Push => Ok(Arc::new(FcmClient::new(
            &config.fcm_base_url,
            Config::require(&config.fcm_project_id, "FCM_PROJECT_ID")?,
            timeout,
        )?)),
    }
}
