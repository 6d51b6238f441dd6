use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clients::queue::QueueAttributes;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub checks: BTreeMap<String, ServiceHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub status: HealthStatus,

    /// Dependencies the service cannot run without.
    #[serde(skip)]
    pub critical: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<QueueAttributes>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServiceHealth {
    pub fn healthy(response_time_ms: u64) -> Self {
        Self {
            status: HealthStatus::Healthy,
            critical: false,
            response_time_ms: Some(response_time_ms),
            circuit_breaker: None,
            queue: None,
            error: None,
        }
    }

    pub fn unhealthy(error: String) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            critical: false,
            response_time_ms: None,
            circuit_breaker: None,
            queue: None,
            error: Some(error),
        }
    }

    pub fn degraded(circuit_state: String, error: Option<String>) -> Self {
        Self {
            status: HealthStatus::Degraded,
            critical: false,
            response_time_ms: None,
            circuit_breaker: Some(circuit_state),
            queue: None,
            error,
        }
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    pub fn with_circuit_breaker(mut self, state: String) -> Self {
        self.circuit_breaker = Some(state);
        self
    }

    pub fn with_queue(mut self, attributes: QueueAttributes) -> Self {
        self.queue = Some(attributes);
        self
    }
}

impl HealthCheckResponse {
    pub fn from_checks(checks: BTreeMap<String, ServiceHealth>) -> Self {
        let status = if checks
            .values()
            .any(|health| health.status == HealthStatus::Unhealthy && health.critical)
        {
            HealthStatus::Unhealthy
        } else if checks
            .values()
            .any(|health| health.status != HealthStatus::Healthy)
        {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        Self {
            status,
            timestamp: Utc::now(),
            checks,
        }
    }
}
