//! # The `epa serve` Command
//!
//! Wires the configured store, gateways, and publisher into a
//! [`WorkflowService`] and serves the Axum application. Every integration
//! degrades by configuration, not by flag: missing endpoint variables
//! select the mock adapters, a missing database URL selects the in-memory
//! store, and a missing metrics address disables the exporter.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use metrics_exporter_prometheus::PrometheusBuilder;
use sqlx::postgres::PgPoolOptions;

use epa_api::state::AppState;
use epa_gateway::{
    HttpInsuranceGateway, HttpPharmacyGateway, InsuranceApiConfig, InsuranceGateway,
    MockInsuranceGateway, MockPharmacyGateway, PharmacyApiConfig, PharmacyGateway,
};
use epa_resilience::PolicyRegistry;
use epa_workflow::{
    AuthorizationStore, BroadcastPublisher, InMemoryAuthorizationStore, PgAuthorizationStore,
    WorkflowService,
};

use crate::config::ServeConfig;

/// Arguments for `epa serve`.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Listen address, overriding EPA_BIND_ADDR.
    #[arg(long)]
    pub bind: Option<SocketAddr>,
}

/// Run the HTTP server until shutdown.
pub async fn run_serve(args: &ServeArgs) -> anyhow::Result<()> {
    let config = ServeConfig::from_env()?;
    let bind_addr = args.bind.unwrap_or(config.bind_addr);

    if let Some(addr) = config.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("install the Prometheus exporter")?;
        tracing::info!(%addr, "Prometheus exporter listening");
    }

    let store = build_store(&config).await?;
    let registry = PolicyRegistry::new();
    let insurance = build_insurance_gateway(&config, &registry)?;
    let pharmacy = build_pharmacy_gateway(&config, &registry)?;

    let publisher = BroadcastPublisher::default();
    let service = WorkflowService::new(store, insurance, pharmacy, Arc::new(publisher.clone()));
    let app = epa_api::app(AppState::new(service, publisher));

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("bind {bind_addr}"))?;
    tracing::info!(addr = %bind_addr, "ePA API listening");
    axum::serve(listener, app).await.context("serve HTTP")?;
    Ok(())
}

async fn build_store(config: &ServeConfig) -> anyhow::Result<Arc<dyn AuthorizationStore>> {
    match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url.expose())
                .await
                .context("connect to Postgres")?;
            epa_workflow::pg::run_migrations(&pool)
                .await
                .context("run database migrations")?;
            tracing::info!("authorization store: Postgres");
            Ok(Arc::new(PgAuthorizationStore::new(pool)))
        }
        None => {
            tracing::warn!("EPA_DATABASE_URL not set; records live in process memory only");
            Ok(Arc::new(InMemoryAuthorizationStore::new()))
        }
    }
}

fn build_insurance_gateway(
    config: &ServeConfig,
    registry: &PolicyRegistry,
) -> anyhow::Result<Arc<dyn InsuranceGateway>> {
    match &config.insurance {
        Some(upstream) => {
            let gateway = HttpInsuranceGateway::new(
                InsuranceApiConfig::new(&upstream.base_url, upstream.api_key.expose()),
                registry,
            )
            .context("configure the insurance gateway")?;
            tracing::info!(endpoint = %upstream.base_url, "insurance gateway: live HTTP adapter");
            Ok(Arc::new(gateway))
        }
        None => {
            tracing::warn!("insurance endpoint not configured; using the mock adapter");
            Ok(Arc::new(MockInsuranceGateway::new()))
        }
    }
}

fn build_pharmacy_gateway(
    config: &ServeConfig,
    registry: &PolicyRegistry,
) -> anyhow::Result<Arc<dyn PharmacyGateway>> {
    match &config.pharmacy {
        Some(upstream) => {
            let mut gateway_config =
                PharmacyApiConfig::new(&upstream.base_url, upstream.api_key.expose());
            gateway_config.field_key_hex = config
                .field_key_hex
                .as_ref()
                .map(|key| key.expose().to_string());
            if gateway_config.field_key_hex.is_none() {
                tracing::warn!(
                    "EPA_FIELD_KEY_HEX not set; PA submissions will fail until it is configured"
                );
            }
            let gateway = HttpPharmacyGateway::new(gateway_config, registry)
                .context("configure the pharmacy gateway")?;
            tracing::info!(endpoint = %upstream.base_url, "pharmacy gateway: live HTTP adapter");
            Ok(Arc::new(gateway))
        }
        None => {
            tracing::warn!("pharmacy endpoint not configured; using the mock adapter");
            Ok(Arc::new(MockPharmacyGateway::new()))
        }
    }
}
