use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use log::debug;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;

use crate::auth::TokenProvider;
use crate::error::{ProviderError, Result};

const MANAGEMENT_BASE: &str = "https://management.azure.com";
const COMPUTE_API_VERSION: &str = "2024-07-01";
const METRICS_API_VERSION: &str = "2018-01-01";
const POWER_STATE_PREFIX: &str = "PowerState/";

pub const AVAILABILITY_METRIC: &str = "VmAvailabilityMetric";

/// Compute control plane for the one VM this process manages.
pub trait ComputeApi: Send + Sync {
    fn power_state(&self) -> impl Future<Output = Result<String>> + Send;
    fn start(&self) -> impl Future<Output = Result<()>> + Send;
    fn deallocate(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Metrics plane: per-hour availability averages over a window.
pub trait MetricsApi: Send + Sync {
    fn availability_averages(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<f64>>> + Send;
}

// Instance-view payload, trimmed to the fields we consume.
#[derive(Debug, Deserialize)]
pub struct InstanceView {
    #[serde(default)]
    pub statuses: Vec<InstanceViewStatus>,
}

#[derive(Debug, Deserialize)]
pub struct InstanceViewStatus {
    pub code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MetricsResponse {
    #[serde(default)]
    pub value: Vec<Metric>,
}

#[derive(Debug, Deserialize)]
pub struct Metric {
    pub name: MetricName,
    #[serde(default)]
    pub timeseries: Vec<TimeSeries>,
}

#[derive(Debug, Deserialize)]
pub struct MetricName {
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct TimeSeries {
    #[serde(default)]
    pub data: Vec<MetricSample>,
}

#[derive(Debug, Deserialize)]
pub struct MetricSample {
    pub average: Option<f64>,
}

/// The instance view carries provisioning and power statuses side by side;
/// the power state is the lower-cased suffix of the `PowerState/` code.
pub fn power_state_from_statuses(statuses: &[InstanceViewStatus]) -> Option<String> {
    statuses
        .iter()
        .filter_map(|status| status.code.as_deref())
        .find_map(|code| code.strip_prefix(POWER_STATE_PREFIX))
        .map(|state| state.to_ascii_lowercase())
}

/// Flattens every time series of the availability metric into one sample
/// list. Multiple series, if Azure ever returns them, all contribute.
pub fn availability_samples(body: &MetricsResponse) -> Vec<f64> {
    body.value
        .iter()
        .filter(|metric| metric.name.value == AVAILABILITY_METRIC)
        .flat_map(|metric| &metric.timeseries)
        .flat_map(|series| &series.data)
        .filter_map(|sample| sample.average)
        .collect()
}

async fn check_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let code = status.as_u16();
    let message = resp.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Auth(message),
        StatusCode::NOT_FOUND => ProviderError::NotFound(message),
        s if s == StatusCode::TOO_MANY_REQUESTS || s.is_server_error() => {
            ProviderError::Transient { status: code, message }
        }
        _ => ProviderError::Unknown { status: code, message },
    })
}

pub struct AzureComputeClient {
    http: Client,
    auth: Arc<TokenProvider>,
    // https://management.azure.com/subscriptions/.../virtualMachines/<vm>
    vm_url: String,
}

impl AzureComputeClient {
    pub fn new(http: Client, auth: Arc<TokenProvider>, vm_resource_id: &str) -> Self {
        Self {
            http,
            auth,
            vm_url: format!("{MANAGEMENT_BASE}{vm_resource_id}"),
        }
    }

    async fn instance_view(&self) -> Result<InstanceView> {
        let url = format!("{}/instanceView?api-version={COMPUTE_API_VERSION}", self.vm_url);
        let token = self.auth.bearer_token().await?;
        let resp = self.http.get(url).bearer_auth(token).send().await?;
        let resp = check_status(resp).await?;
        Ok(resp.json().await?)
    }

    // Succeeds on acceptance (200/202); the long-running operation is not
    // polled, callers only learn that Azure took the request.
    async fn post_operation(&self, operation: &str) -> Result<()> {
        let url = format!("{}/{operation}?api-version={COMPUTE_API_VERSION}", self.vm_url);
        let token = self.auth.bearer_token().await?;
        let resp = self.http.post(url).bearer_auth(token).send().await?;
        check_status(resp).await?;
        debug!("{operation} accepted by provider");
        Ok(())
    }
}

impl ComputeApi for AzureComputeClient {
    async fn power_state(&self) -> Result<String> {
        let view = self.instance_view().await?;
        Ok(power_state_from_statuses(&view.statuses)
            .unwrap_or_else(|| "unknown".to_string()))
    }

    async fn start(&self) -> Result<()> {
        self.post_operation("start").await
    }

    async fn deallocate(&self) -> Result<()> {
        self.post_operation("deallocate").await
    }
}

pub struct AzureMetricsClient {
    http: Client,
    auth: Arc<TokenProvider>,
    metrics_url: String,
}

impl AzureMetricsClient {
    pub fn new(http: Client, auth: Arc<TokenProvider>, vm_resource_id: &str) -> Self {
        Self {
            http,
            auth,
            metrics_url: format!(
                "{MANAGEMENT_BASE}{vm_resource_id}/providers/Microsoft.Insights/metrics"
            ),
        }
    }
}

impl MetricsApi for AzureMetricsClient {
    async fn availability_averages(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<f64>> {
        let timespan = format!(
            "{}/{}",
            from.to_rfc3339_opts(SecondsFormat::Secs, true),
            to.to_rfc3339_opts(SecondsFormat::Secs, true)
        );

        let token = self.auth.bearer_token().await?;
        let resp = self
            .http
            .get(&self.metrics_url)
            .query(&[
                ("api-version", METRICS_API_VERSION),
                ("metricnames", AVAILABILITY_METRIC),
                ("timespan", timespan.as_str()),
                ("interval", "PT1H"),
                ("aggregation", "Average"),
            ])
            .bearer_auth(token)
            .send()
            .await?;

        let resp = check_status(resp).await?;
        let body: MetricsResponse = resp.json().await?;
        Ok(availability_samples(&body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_state_is_the_lowercased_suffix() {
        let view: InstanceView = serde_json::from_str(
            r#"{
                "statuses": [
                    {"code": "ProvisioningState/succeeded"},
                    {"code": "PowerState/Running"}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(
            power_state_from_statuses(&view.statuses).as_deref(),
            Some("running")
        );
    }

    #[test]
    fn no_power_status_means_none() {
        let view: InstanceView = serde_json::from_str(
            r#"{"statuses": [{"code": "ProvisioningState/updating"}, {}]}"#,
        )
        .unwrap();
        assert_eq!(power_state_from_statuses(&view.statuses), None);

        let empty: InstanceView = serde_json::from_str("{}").unwrap();
        assert_eq!(power_state_from_statuses(&empty.statuses), None);
    }

    #[test]
    fn samples_flatten_all_series_of_the_availability_metric() {
        let body: MetricsResponse = serde_json::from_str(
            r#"{
                "value": [
                    {
                        "name": {"value": "VmAvailabilityMetric"},
                        "timeseries": [
                            {"data": [{"average": 1.0}, {"average": 0.0}, {"average": null}]},
                            {"data": [{"average": 0.5}]}
                        ]
                    },
                    {
                        "name": {"value": "Percentage CPU"},
                        "timeseries": [{"data": [{"average": 42.0}]}]
                    }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(availability_samples(&body), vec![1.0, 0.0, 0.5]);
    }

    #[test]
    fn empty_body_yields_no_samples() {
        let body: MetricsResponse = serde_json::from_str(r#"{"value": []}"#).unwrap();
        assert!(availability_samples(&body).is_empty());
    }
}
