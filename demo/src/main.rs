//! XSTS Demo - a game service endpoint protected by XSTS token validation
//!
//! Loads the relying-party and business-partner certificates, bootstraps the
//! trust layer and serves `/api/getclaims` behind the XSTS middleware.
//!
//! ```text
//! xsts-demo --rp-cert rp.pem --rp-key rp.key --bp-cert bp.pem --bp-key bp.key
//! curl -H "Authorization: XBL3.0 x=<uhs>;<token>" http://127.0.0.1:8080/api/getclaims
//! ```

mod handlers;
mod settings;

use std::sync::Arc;

use anyhow::Context as _;
use axum::Router;
use axum::routing::get;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use xsts_auth::{MemoryCertificateStore, XstsServices};

use settings::Args;

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,xsts_auth=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn router(services: &XstsServices) -> Router {
    Router::new()
        .route("/api/getclaims", get(handlers::get_claims))
        .route("/health", get(handlers::health))
        .layer(services.layer().bypass("/health"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let mut config = settings::load(args.config.as_ref()).context("Failed to load configuration")?;

    let mut store = MemoryCertificateStore::new();
    let relying_party = store
        .load_pem_files(&args.rp_cert, &args.rp_key)
        .context("Failed to load relying-party certificate")?;
    let business_partner = store
        .load_pem_files(&args.bp_cert, &args.bp_key)
        .context("Failed to load business-partner certificate")?;
    config
        .relying_party_thumbprint
        .get_or_insert_with(|| relying_party.as_str().to_string());
    config
        .business_partner_thumbprint
        .get_or_insert_with(|| business_partner.as_str().to_string());

    let services = XstsServices::bootstrap(config, Arc::new(store))
        .await
        .context("XSTS trust layer failed to start")?;

    let listener = tokio::net::TcpListener::bind(args.listen.as_str())
        .await
        .with_context(|| format!("Failed to bind {}", args.listen))?;
    info!(address = %args.listen, service = %services.config.service_name, "Listening");

    axum::serve(listener, router(&services)).await?;
    Ok(())
}
