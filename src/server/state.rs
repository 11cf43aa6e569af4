use crate::application::Orchestrator;
use crate::infrastructure::{
    AppConfig, ChallengeHub, ExchangeClient, PostgresAccountStore, SessionBrokerClient,
    TokenSealer,
};
use anyhow::Context;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

pub type SwarmOrchestrator =
    Orchestrator<PostgresAccountStore, SessionBrokerClient, ExchangeClient>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub orchestrator: Arc<SwarmOrchestrator>,
    pub exchange: Arc<ExchangeClient>,
    pub challenges: Arc<ChallengeHub>,
}

/// Build full state from config + an existing pool.
///
/// Intended for embedding into a larger service that already manages a `PgPool`.
pub async fn build_state_with_pool(
    config: AppConfig,
    pool: PgPool,
    run_migrations: bool,
) -> anyhow::Result<AppState> {
    if run_migrations {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("run migrations")?;
    }

    let sealer = Arc::new(TokenSealer::new(&config.encryption_key).context("init token sealer")?);
    let challenges = Arc::new(ChallengeHub::default());

    let store = Arc::new(PostgresAccountStore::new(pool.clone(), sealer));
    let identity = Arc::new(
        SessionBrokerClient::new(
            config.session_broker_url.clone(),
            challenges.clone(),
            Duration::from_secs(config.challenge_timeout_secs),
        )
        .context("init session broker client")?,
    );
    let exchange = Arc::new(
        ExchangeClient::new(
            config.exchange_api_url.clone(),
            config.exchange_api_token.clone(),
        )
        .context("init exchange client")?,
    );

    let orchestrator = Arc::new(Orchestrator::new(store, identity, exchange.clone()));

    Ok(AppState {
        pool,
        orchestrator,
        exchange,
        challenges,
    })
}

/// Build state for the standalone server.
///
/// Creates the `PgPool`, runs migrations, and wires clients and the core.
pub async fn build_state_from_env(config: AppConfig) -> anyhow::Result<AppState> {
    let pool = PgPool::connect(&config.database_url)
        .await
        .context("connect database")?;
    build_state_with_pool(config, pool, true).await
}
