use chrono::{DateTime, Datelike, TimeZone, Utc};
use log::{error, info};

use crate::azure::{ComputeApi, MetricsApi};
use crate::error::Result;

pub const UNKNOWN_STATE: &str = "unknown";

/// Answers the two questions the dashboard asks: what state is the VM in,
/// and how long has it run this calendar month. Generic over the provider
/// traits so tests substitute fakes.
pub struct VmMonitor<C, M> {
    compute: C,
    metrics: M,
}

/// Composite runtime snapshot. Fields degrade to unknown individually
/// instead of failing the whole query.
#[derive(Debug)]
pub struct RuntimeDetails {
    pub current_state: String,
    pub is_running: bool,
    pub monthly_hours: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl<C: ComputeApi, M: MetricsApi> VmMonitor<C, M> {
    pub fn new(compute: C, metrics: M) -> Self {
        Self { compute, metrics }
    }

    pub async fn power_state(&self) -> Result<String> {
        self.compute.power_state().await
    }

    pub async fn start(&self) -> Result<()> {
        self.compute.start().await
    }

    /// Deallocates rather than merely powering off, so reserved capacity
    /// stops billing.
    pub async fn deallocate(&self) -> Result<()> {
        self.compute.deallocate().await
    }

    /// Total hours the VM ran this month, `None` when the metric carries no
    /// data. A sum of exactly zero is indistinguishable from missing data
    /// upstream and is reported as `None` too.
    pub async fn monthly_runtime_hours(&self) -> Result<Option<f64>> {
        let now = Utc::now();
        let samples = self
            .metrics
            .availability_averages(month_start(now), now)
            .await?;
        let hours = sum_running_hours(&samples);
        match hours {
            Some(h) => info!("monthly runtime: {h:.2} hours"),
            None => info!("monthly runtime: no availability data"),
        }
        Ok(hours)
    }

    pub async fn runtime_details(&self) -> RuntimeDetails {
        let current_state = match self.compute.power_state().await {
            Ok(state) => state,
            Err(err) => {
                error!("error getting VM power state: {err}");
                UNKNOWN_STATE.to_string()
            }
        };

        let monthly_hours = match self.monthly_runtime_hours().await {
            Ok(hours) => hours,
            Err(err) => {
                error!("error querying VM metrics: {err}");
                None
            }
        };

        RuntimeDetails {
            is_running: current_state == "running",
            current_state,
            monthly_hours,
            timestamp: Utc::now(),
        }
    }
}

/// 00:00 UTC on the first of the current month.
pub fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    // day 1 of a known year/month always resolves
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0).unwrap()
}

/// Sums every positive hourly average into a running-hour count. Zero total
/// means unknown, not "ran zero hours".
pub fn sum_running_hours(samples: &[f64]) -> Option<f64> {
    let total: f64 = samples.iter().copied().filter(|avg| *avg > 0.0).sum();
    if total == 0.0 {
        None
    } else {
        Some(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_start_is_first_of_month_utc() {
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();
        let start = month_start(now);
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn positive_averages_sum_to_hours() {
        let mut samples = vec![1.0; 200];
        samples.extend(vec![0.0; 148]);
        assert_eq!(sum_running_hours(&samples), Some(200.0));
    }

    #[test]
    fn partial_availability_counts_fractionally() {
        assert_eq!(sum_running_hours(&[1.0, 0.5, 0.0]), Some(1.5));
    }

    #[test]
    fn zero_total_is_unknown_not_zero() {
        assert_eq!(sum_running_hours(&[0.0, 0.0, 0.0]), None);
        assert_eq!(sum_running_hours(&[]), None);
    }
}
