use std::{collections::BTreeMap, sync::Arc, time::Instant};

use tracing::{debug, warn};

use crate::{
    clients::{email::EmailTransport, queue::QueueSet, store::RecordStore},
    models::{
        circuit_breaker::CircuitState,
        health::{HealthCheckResponse, ServiceHealth},
        message::QueueKind,
    },
};

/// Probes the long-lived handles the worker already holds.
pub struct HealthChecker {
    store: Arc<dyn RecordStore>,
    queues: QueueSet,
    email: Arc<dyn EmailTransport>,
}

impl HealthChecker {
    pub fn new(store: Arc<dyn RecordStore>, queues: QueueSet, email: Arc<dyn EmailTransport>) -> Self {
        Self {
            store,
            queues,
            email,
        }
    }

    pub async fn check_all(&self) -> HealthCheckResponse {
        let mut checks = BTreeMap::new();

        checks.insert("record_store".to_string(), self.check_store().await);

        for kind in QueueKind::ALL {
            checks.insert(format!("{}_queue", kind), self.check_queue(kind).await);
        }

        checks.insert("email".to_string(), self.check_email().await);

        HealthCheckResponse::from_checks(checks)
    }

    async fn check_store(&self) -> ServiceHealth {
        let start = Instant::now();

        match self.store.health_check().await {
            Ok(()) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(response_time_ms = elapsed, "Record store health check passed");
                ServiceHealth::healthy(elapsed).critical()
            }
            Err(e) => {
                warn!(error = %e, "Record store health check failed");
                ServiceHealth::unhealthy(e.to_string()).critical()
            }
        }
    }

    async fn check_queue(&self, kind: QueueKind) -> ServiceHealth {
        let start = Instant::now();

        match self.queues.get(kind).attributes().await {
            Ok(attributes) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(queue = %kind, response_time_ms = elapsed, "Queue health check passed");
                ServiceHealth::healthy(elapsed)
                    .with_queue(attributes)
                    .critical()
            }
            Err(e) => {
                warn!(queue = %kind, error = %e, "Queue health check failed");
                ServiceHealth::unhealthy(format!("Cannot inspect queue: {}", e)).critical()
            }
        }
    }

    async fn check_email(&self) -> ServiceHealth {
        match self.email.circuit_state().await {
            None => ServiceHealth::healthy(0),
            Some(Ok(state)) => {
                debug!(
                    transport = self.email.name(),
                    circuit_state = %state,
                    "Circuit breaker state checked"
                );

                match state {
                    CircuitState::Closed => {
                        ServiceHealth::healthy(0).with_circuit_breaker(state.to_string())
                    }
                    CircuitState::HalfOpen => ServiceHealth::degraded(
                        state.to_string(),
                        Some("Circuit breaker in recovery mode".to_string()),
                    ),
                    CircuitState::Open => ServiceHealth::degraded(
                        state.to_string(),
                        Some("Circuit breaker open, email sends are rejected".to_string()),
                    ),
                }
            }
            Some(Err(e)) => {
                warn!(transport = self.email.name(), error = %e, "Failed to check circuit breaker state");
                ServiceHealth::unhealthy(format!("Cannot check circuit breaker: {}", e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clients::memory::{InMemoryQueue, InMemoryRecordStore, MockEmailTransport},
        models::health::HealthStatus,
    };

    fn queues() -> QueueSet {
        QueueSet::new(
            Arc::new(InMemoryQueue::new("events")),
            Arc::new(InMemoryQueue::new("reservations")),
            Arc::new(InMemoryQueue::new("reminders")),
        )
    }

    #[tokio::test]
    async fn reports_every_dependency() {
        let checker = HealthChecker::new(
            Arc::new(InMemoryRecordStore::new()),
            queues(),
            Arc::new(MockEmailTransport::new()),
        );

        let report = checker.check_all().await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.checks.contains_key("record_store"));
        assert!(report.checks.contains_key("events_queue"));
        assert!(report.checks.contains_key("reservations_queue"));
        assert!(report.checks.contains_key("reminders_queue"));
        assert!(report.checks.contains_key("email"));
    }

    #[tokio::test]
    async fn unreachable_store_is_unhealthy() {
        let store = Arc::new(InMemoryRecordStore::new());
        store.set_unavailable(true).await;

        let checker = HealthChecker::new(store, queues(), Arc::new(MockEmailTransport::new()));

        let report = checker.check_all().await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(report.checks["record_store"].error.is_some());
    }
}
