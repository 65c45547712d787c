mod auth;
mod azure;
mod config;
mod error;
mod monitor;
mod routes;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use log::info;

use crate::auth::TokenProvider;
use crate::azure::{AzureComputeClient, AzureMetricsClient};
use crate::config::Config;
use crate::monitor::VmMonitor;
use crate::routes::{build_routes, AppContext};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let config = Config::from_env().context("invalid configuration")?;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(120))
        .build()
        .context("failed to build HTTP client")?;

    let auth = Arc::new(TokenProvider::new(
        http.clone(),
        &config.tenant_id,
        config.client_id.clone(),
        config.client_secret.clone(),
    ));

    let resource_id = config.vm_resource_id();
    let compute = AzureComputeClient::new(http.clone(), Arc::clone(&auth), &resource_id);
    let metrics = AzureMetricsClient::new(http, auth, &resource_id);

    let ctx = Arc::new(AppContext {
        vm_name: config.vm_name.clone(),
        hourly_cost_eur: config.hourly_cost_eur,
        monitor: VmMonitor::new(compute, metrics),
    });

    info!("dashboard for {} listening on {}", config.vm_name, config.bind_addr);
    warp::serve(build_routes(ctx)).run(config.bind_addr).await;
    Ok(())
}
