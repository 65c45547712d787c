use std::convert::Infallible;
use std::sync::Arc;

use chrono::Utc;
use log::error;
use serde::Serialize;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::azure::{ComputeApi, MetricsApi};
use crate::error::ProviderError;
use crate::monitor::VmMonitor;

const INDEX_HTML: &str = include_str!("../static/index.html");

/// Per-process context handed to every handler: immutable config values plus
/// the monitor over the provider clients.
pub struct AppContext<C, M> {
    pub vm_name: String,
    pub hourly_cost_eur: f64,
    pub monitor: VmMonitor<C, M>,
}

#[derive(Serialize)]
struct StatusReply {
    status: &'static str,
    #[serde(rename = "powerState")]
    power_state: String,
    #[serde(rename = "vmName")]
    vm_name: String,
}

#[derive(Serialize)]
struct ActionReply {
    status: &'static str,
    message: &'static str,
}

#[derive(Serialize)]
struct ErrorReply {
    status: &'static str,
    message: String,
}

/// A number, or the literal string "unknown" when the data is absent.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Reading {
    Value(f64),
    Unknown(&'static str),
}

impl From<Option<f64>> for Reading {
    fn from(value: Option<f64>) -> Self {
        match value {
            Some(v) => Reading::Value(v),
            None => Reading::Unknown("unknown"),
        }
    }
}

#[derive(Serialize)]
struct UsageReply {
    status: &'static str,
    month: String,
    #[serde(rename = "runningHours")]
    running_hours: Reading,
    #[serde(rename = "estimatedCost")]
    estimated_cost: Reading,
    #[serde(rename = "hourlyCost")]
    hourly_cost: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DetailsReply {
    status: &'static str,
    current_state: String,
    is_running: bool,
    monthly_runtime_hours: Reading,
    monthly_runtime_days: Reading,
    timestamp: String,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

type JsonReply = warp::reply::WithStatus<warp::reply::Json>;

fn reply_ok<T: Serialize>(body: &T) -> JsonReply {
    warp::reply::with_status(warp::reply::json(body), StatusCode::OK)
}

// Every hard provider failure surfaces the same flat envelope; the taxonomy
// lives in the error type and the logs, not the HTTP surface.
fn reply_error(err: &ProviderError) -> JsonReply {
    warp::reply::with_status(
        warp::reply::json(&ErrorReply {
            status: "error",
            message: err.to_string(),
        }),
        StatusCode::INTERNAL_SERVER_ERROR,
    )
}

pub fn build_routes<C, M>(
    ctx: Arc<AppContext<C, M>>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone
where
    C: ComputeApi + 'static,
    M: MetricsApi + 'static,
{
    let with_ctx = warp::any().map(move || Arc::clone(&ctx));

    let index = warp::path::end()
        .and(warp::get())
        .map(|| warp::reply::html(INDEX_HTML));

    let status = warp::path!("api" / "vm" / "status")
        .and(warp::get())
        .and(with_ctx.clone())
        .and_then(vm_status::<C, M>);

    let start = warp::path!("api" / "vm" / "start")
        .and(warp::post())
        .and(with_ctx.clone())
        .and_then(vm_start::<C, M>);

    let stop = warp::path!("api" / "vm" / "stop")
        .and(warp::post())
        .and(with_ctx.clone())
        .and_then(vm_stop::<C, M>);

    let usage = warp::path!("api" / "vm" / "usage")
        .and(warp::get())
        .and(with_ctx.clone())
        .and_then(vm_usage::<C, M>);

    let details = warp::path!("api" / "vm" / "details")
        .and(warp::get())
        .and(with_ctx)
        .and_then(vm_details::<C, M>);

    index.or(status).or(start).or(stop).or(usage).or(details)
}

async fn vm_status<C: ComputeApi, M: MetricsApi>(
    ctx: Arc<AppContext<C, M>>,
) -> Result<JsonReply, Infallible> {
    match ctx.monitor.power_state().await {
        Ok(power_state) => Ok(reply_ok(&StatusReply {
            status: "success",
            power_state,
            vm_name: ctx.vm_name.clone(),
        })),
        Err(err) => {
            error!("error getting VM status: {err}");
            Ok(reply_error(&err))
        }
    }
}

async fn vm_start<C: ComputeApi, M: MetricsApi>(
    ctx: Arc<AppContext<C, M>>,
) -> Result<JsonReply, Infallible> {
    match ctx.monitor.start().await {
        Ok(()) => Ok(reply_ok(&ActionReply {
            status: "success",
            message: "VM start initiated",
        })),
        Err(err) => {
            error!("error starting VM: {err}");
            Ok(reply_error(&err))
        }
    }
}

async fn vm_stop<C: ComputeApi, M: MetricsApi>(
    ctx: Arc<AppContext<C, M>>,
) -> Result<JsonReply, Infallible> {
    match ctx.monitor.deallocate().await {
        Ok(()) => Ok(reply_ok(&ActionReply {
            status: "success",
            message: "VM stop initiated",
        })),
        Err(err) => {
            error!("error stopping VM: {err}");
            Ok(reply_error(&err))
        }
    }
}

async fn vm_usage<C: ComputeApi, M: MetricsApi>(
    ctx: Arc<AppContext<C, M>>,
) -> Result<JsonReply, Infallible> {
    match ctx.monitor.monthly_runtime_hours().await {
        Ok(hours) => {
            let estimated_cost = hours.map(|h| round2(h * ctx.hourly_cost_eur));
            Ok(reply_ok(&UsageReply {
                status: "success",
                month: Utc::now().format("%B %Y").to_string(),
                running_hours: hours.map(round2).into(),
                estimated_cost: estimated_cost.into(),
                hourly_cost: ctx.hourly_cost_eur,
            }))
        }
        Err(err) => {
            error!("error getting VM usage: {err}");
            Ok(reply_error(&err))
        }
    }
}

async fn vm_details<C: ComputeApi, M: MetricsApi>(
    ctx: Arc<AppContext<C, M>>,
) -> Result<JsonReply, Infallible> {
    let details = ctx.monitor.runtime_details().await;
    Ok(reply_ok(&DetailsReply {
        status: "success",
        is_running: details.is_running,
        current_state: details.current_state,
        monthly_runtime_hours: details.monthly_hours.map(round2).into(),
        monthly_runtime_days: details.monthly_hours.map(|h| round2(h / 24.0)).into(),
        timestamp: details.timestamp.to_rfc3339(),
    }))
}
