use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Health limits used to classify stages and size the recommendation.
///
/// A stage is healthy when both its error rate and its p95 latency are strictly below the
/// healthy limits, degraded when both are strictly below the degraded limits, failed otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CapacityThresholds {
    pub healthy_error_pct: f64,
    pub healthy_latency_ms: f64,
    pub degraded_error_pct: f64,
    pub degraded_latency_ms: f64,
    /// Fraction of the largest healthy concurrency recommended for production.
    pub safety_factor: f64,
    /// Any stage whose p99 exceeds this raises a latency action item.
    pub p99_alert_ms: f64,
}

impl Default for CapacityThresholds {
    fn default() -> Self {
        Self {
            healthy_error_pct: 1.0,
            healthy_latency_ms: 30_000.0,
            degraded_error_pct: 10.0,
            degraded_latency_ms: 60_000.0,
            safety_factor: 0.7,
            p99_alert_ms: 60_000.0,
        }
    }
}

impl CapacityThresholds {
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("healthy_error_pct", self.healthy_error_pct),
            ("healthy_latency_ms", self.healthy_latency_ms),
            ("degraded_error_pct", self.degraded_error_pct),
            ("degraded_latency_ms", self.degraded_latency_ms),
            ("safety_factor", self.safety_factor),
            ("p99_alert_ms", self.p99_alert_ms),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::InvalidThresholds(format!(
                    "`{name}` must be a finite non-negative number, got {value}"
                )));
            }
        }

        if !(self.safety_factor > 0.0 && self.safety_factor <= 1.0) {
            return Err(Error::InvalidThresholds(format!(
                "`safety_factor` must be in (0, 1], got {}",
                self.safety_factor
            )));
        }
        if self.degraded_error_pct < self.healthy_error_pct {
            return Err(Error::InvalidThresholds(format!(
                "`degraded_error_pct` ({}) is tighter than `healthy_error_pct` ({})",
                self.degraded_error_pct, self.healthy_error_pct
            )));
        }
        if self.degraded_latency_ms < self.healthy_latency_ms {
            return Err(Error::InvalidThresholds(format!(
                "`degraded_latency_ms` ({}) is tighter than `healthy_latency_ms` ({})",
                self.degraded_latency_ms, self.healthy_latency_ms
            )));
        }
        Ok(())
    }
}
