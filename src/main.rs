mod app_state;
mod authorization;
mod card;
mod config;
mod db;
mod error;
mod handlers;
mod issuer;
mod lifecycle;
mod store;
mod sweep;
mod users;

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use app_state::AppState;
use config::{Config, IssuerKind};
use db::init_pool;
use issuer::{CardIssuer, MockIssuer, StripeIssuer};
use store::{CardStore, SqliteCardStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ghostcard_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse configuration
    let config = Arc::new(Config::parse());

    // Initialize database
    let pool = init_pool(&config.database_url, config.db_max_connections).await?;
    let store: Arc<dyn CardStore> = Arc::new(SqliteCardStore::new(pool));

    // Select the card-issuing backend
    let issuer: Arc<dyn CardIssuer> = match config.issuer {
        IssuerKind::Mock => Arc::new(MockIssuer::new()),
        IssuerKind::Stripe => {
            let secret_key = config
                .stripe_secret_key
                .as_deref()
                .context("STRIPE_SECRET_KEY is required when ISSUER=stripe")?;
            Arc::new(StripeIssuer::new(
                secret_key,
                &config.stripe_api_base,
                config.issuer_timeout(),
            )?)
        }
    };

    if let Some(every) = config.sweep_interval() {
        tracing::info!("Expiry sweep every {:?}", every);
        sweep::spawn(store.clone(), issuer.clone(), every);
    }

    // Create shared state
    let state = AppState {
        store,
        issuer: issuer.clone(),
        config: config.clone(),
    };

    let app = handlers::router(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.socket_addr()).await?;

    tracing::info!("Server running on {}", config.socket_addr());
    tracing::info!("Card issuer: {}", issuer.name());
    tracing::info!("Database: {}", config.database_url);

    axum::serve(listener, app).await?;

    Ok(())
}
