use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::{
    clients::store::NotificationStore,
    models::health::{HealthReport, HealthStatus, ServiceHealth},
};

#[async_trait]
pub trait HealthProbe: Send + Sync {
    fn name(&self) -> &str;

    async fn check(&self) -> Result<(), Error>;
}

/// Reports the key-value store as reachable when it answers a ping.
pub struct StoreProbe {
    store: Arc<dyn NotificationStore>,
}

impl StoreProbe {
    pub fn new(store: Arc<dyn NotificationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl HealthProbe for StoreProbe {
    fn name(&self) -> &str {
        "redis"
    }

    async fn check(&self) -> Result<(), Error> {
        self.store.ping().await?;
        Ok(())
    }
}

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct HealthChecker {
    probes: Vec<Arc<dyn HealthProbe>>,
    probe_timeout: Duration,
}

impl HealthChecker {
    pub fn new(probes: Vec<Arc<dyn HealthProbe>>) -> Self {
        Self {
            probes,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// A probe that has not answered within `probe_timeout` is reported unhealthy.
    pub fn with_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    pub async fn check_all(&self) -> HealthReport {
        let mut checks = BTreeMap::new();

        for probe in &self.probes {
            let start = Instant::now();

            let health = match timeout(self.probe_timeout, probe.check()).await {
                Ok(Ok(())) => {
                    let elapsed = start.elapsed().as_millis() as u64;
                    debug!(check = probe.name(), response_time_ms = elapsed, "Health check passed");
                    ServiceHealth::healthy(elapsed)
                }
                Ok(Err(e)) => {
                    warn!(check = probe.name(), error = %e, "Health check failed");
                    ServiceHealth::unhealthy(e.to_string())
                }
                Err(_) => {
                    warn!(
                        check = probe.name(),
                        timeout_ms = self.probe_timeout.as_millis() as u64,
                        "Health check timed out"
                    );
                    ServiceHealth::unhealthy(format!(
                        "No response within {}ms",
                        self.probe_timeout.as_millis()
                    ))
                }
            };

            checks.insert(probe.name().to_string(), health);
        }

        let status = if checks
            .values()
            .all(|health| health.status == HealthStatus::Healthy)
        {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };

        HealthReport {
            status,
            timestamp: Utc::now(),
            checks,
        }
    }
}
