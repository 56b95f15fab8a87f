use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use tokio_postgres::NoTls;
use tracing::warn;

use crate::clients::health::HealthProbe;

/// Reachability probe for the primary data store.
pub struct DatabaseProbe {
    database_url: String,
}

impl DatabaseProbe {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }
}

#[async_trait]
impl HealthProbe for DatabaseProbe {
    fn name(&self) -> &str {
        "database"
    }

    async fn check(&self) -> Result<(), Error> {
        let (client, connection) = tokio_postgres::connect(&self.database_url, NoTls)
            .await
            .map_err(|e| anyhow!("Connection failed: {}", e))?;

        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "Database connection closed with error");
            }
        });

        let result = client
            .simple_query("SELECT 1")
            .await
            .map(|_| ())
            .map_err(|e| anyhow!("Health check query failed: {}", e));

        drop(client);
        let _ = driver.await;

        result
    }
}
