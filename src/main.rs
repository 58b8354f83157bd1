use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{routing::get, Extension, Router};
use axum_prometheus::PrometheusMetricLayer;
use reader_broker::config::{self, StoreBackend};
use reader_broker::routes::{api_routes, root};
use reader_broker::{BrokerServices, MemoryBrokerStore, PgBrokerStore, ResolverConfig};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let resolver_config = ResolverConfig::from_env();
    let services = match *config::BROKER_STORE {
        StoreBackend::Memory => {
            tracing::warn!("using in-memory store; state is lost on restart");
            BrokerServices::new(Arc::new(MemoryBrokerStore::new()), resolver_config)
        }
        StoreBackend::Postgres => {
            let pool = PgPoolOptions::new()
                .max_connections(*config::DATABASE_MAX_CONNECTIONS)
                .connect(config::DATABASE_URL.as_str())
                .await
                .context("failed to connect to Postgres")?;

            if let Err(error) = sqlx::migrate!().run(&pool).await {
                if *config::ALLOW_MIGRATION_FAILURE {
                    tracing::warn!(
                        ?error,
                        "Database migrations failed but continuing due to ALLOW_MIGRATION_FAILURE"
                    );
                } else {
                    return Err(error).context("database migrations failed");
                }
            }
            BrokerServices::new(Arc::new(PgBrokerStore::new(pool)), resolver_config)
        }
    };
    tracing::info!(
        store = config::BROKER_STORE.as_str(),
        platform_default_reader_id = resolver_config.platform_default_reader_id,
        "reader broker configured"
    );

    let (prometheus_layer, metrics_handle) = PrometheusMetricLayer::pair();
    let app = Router::new()
        .route("/", get(root))
        .route(
            "/metrics",
            get(move || async move { metrics_handle.render() }),
        )
        .merge(api_routes())
        .layer(prometheus_layer)
        .layer(Extension(services));

    let addr: SocketAddr = format!("{}:{}", config::BIND_ADDRESS.as_str(), *config::BIND_PORT)
        .parse()
        .context("invalid bind address")?;
    tracing::info!(%addr, "Listening for incoming connections");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
