use anyhow::Context;
use reqwest::Client;
use sqlx::PgPool;

use crate::{
    config::Config,
    database::create_postgres_pool,
    fingerprint::FingerprintClient,
    icy::IcyMetadataReader,
    prediction::Predictor,
    resolver::StreamResolver,
    scan::ScanOrchestrator,
    stations::PlayStorage,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub postgres: PgPool,
    pub storage: PlayStorage,
    pub http_client: Client,
}

impl AppState {
    pub async fn initialize(config: Config) -> anyhow::Result<Self> {
        let postgres = create_postgres_pool(&config.postgres)
            .await
            .context("failed to connect to postgres")?;
        let storage = PlayStorage::new(postgres.clone());
        let http_client = Client::builder()
            .user_agent(config.scan.user_agent.clone())
            .build()
            .context("failed to build http client")?;

        Ok(Self {
            config,
            postgres,
            storage,
            http_client,
        })
    }

    /// All pipeline stages share the one pooled HTTP client.
    pub fn orchestrator(&self) -> ScanOrchestrator {
        ScanOrchestrator::new(
            self.config.scan.clone(),
            self.config.prediction.clone(),
            self.config.fingerprint.enabled,
            self.storage.clone(),
            StreamResolver::new(self.config.resolver.clone(), self.http_client.clone()),
            IcyMetadataReader::new(self.config.metadata.clone(), self.http_client.clone()),
            FingerprintClient::new(self.config.fingerprint.clone(), self.http_client.clone()),
            Predictor::new(self.config.prediction.clone()),
        )
    }

    pub async fn ping_postgres(&self) -> anyhow::Result<()> {
        sqlx::query("SELECT 1").execute(&self.postgres).await?;
        Ok(())
    }
}
