use anyhow::{Error, Result, anyhow};
use chrono::Utc;
use redis::{AsyncCommands, aio::MultiplexedConnection};
use tracing::{debug, info, warn};

use crate::models::circuit_breaker::{CircuitBreakerConfig, CircuitState};

/// Circuit breaker whose counters live in Redis so every worker process sees
/// the same state for a given downstream service.
#[derive(Clone)]
pub struct CircuitBreaker {
    service_name: String,
    connection: MultiplexedConnection,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub async fn connect(
        redis_url: &str,
        service_name: impl Into<String>,
        config: CircuitBreakerConfig,
    ) -> Result<Self, Error> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| anyhow!("Failed to create redis client: {}", e))?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| anyhow!("Failed to connect to redis: {}", e))?;

        Ok(Self::new(service_name.into(), connection, config))
    }

    pub fn new(
        service_name: String,
        connection: MultiplexedConnection,
        config: CircuitBreakerConfig,
    ) -> Self {
        info!(service = %service_name, "Circuit breaker initialized");

        Self {
            service_name,
            connection,
            config,
        }
    }

    fn key(&self, suffix: &str) -> String {
        format!("notifications:circuit:{}:{}", self.service_name, suffix)
    }

    pub async fn call<F, Fut, T>(&mut self, operation: F) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, Error>>,
    {
        match self.state().await? {
            CircuitState::Open => {
                if self.should_attempt_reset().await? {
                    info!(service = %self.service_name, "Circuit breaker attempting reset");
                    self.set_state(CircuitState::HalfOpen).await?;
                    return self.try_operation(operation).await;
                }
                warn!(service = %self.service_name, "Circuit breaker is open, rejecting request");
                Err(anyhow!("Circuit breaker is open for {}", self.service_name))
            }
            CircuitState::HalfOpen => {
                debug!(service = %self.service_name, "Circuit breaker in half-open state");
                self.try_operation(operation).await
            }
            CircuitState::Closed => self.try_operation(operation).await,
        }
    }

    pub async fn state(&mut self) -> Result<CircuitState, Error> {
        let value: Option<String> = self.connection.get(self.key("state")).await?;

        Ok(value
            .map(|s| CircuitState::parse(&s))
            .unwrap_or(CircuitState::Closed))
    }

    async fn try_operation<F, Fut, T>(&mut self, operation: F) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, Error>>,
    {
        match operation().await {
            Ok(result) => {
                self.record_success().await?;
                Ok(result)
            }
            Err(e) => {
                self.record_failure().await?;
                Err(e)
            }
        }
    }

    async fn record_success(&mut self) -> Result<(), Error> {
        match self.state().await? {
            CircuitState::HalfOpen => {
                let successes: u32 = self.connection.incr(self.key("successes"), 1).await?;
                debug!(
                    service = %self.service_name,
                    successes,
                    threshold = self.config.success_threshold,
                    "Circuit breaker success recorded"
                );

                if successes >= self.config.success_threshold {
                    self.set_state(CircuitState::Closed).await?;
                    self.reset_counters().await?;
                    info!(service = %self.service_name, "Circuit breaker closed after recovery");
                }
            }
            CircuitState::Closed => {
                self.connection.del::<_, ()>(self.key("failures")).await?;
            }
            CircuitState::Open => {}
        }

        Ok(())
    }

    async fn record_failure(&mut self) -> Result<(), Error> {
        if self.state().await? == CircuitState::HalfOpen {
            self.open().await?;
            warn!(service = %self.service_name, "Circuit breaker reopened after failed recovery attempt");
            return Ok(());
        }

        let failures_key = self.key("failures");
        let failures: u32 = self.connection.incr(&failures_key, 1).await?;
        self.connection
            .expire::<_, ()>(&failures_key, self.config.timeout_seconds as i64)
            .await?;

        debug!(
            service = %self.service_name,
            failures,
            threshold = self.config.failure_threshold,
            "Circuit breaker failure recorded"
        );

        if failures >= self.config.failure_threshold {
            self.open().await?;
            warn!(
                service = %self.service_name,
                failures,
                "Circuit breaker opened due to consecutive failures"
            );
        }

        Ok(())
    }

    async fn set_state(&mut self, state: CircuitState) -> Result<(), Error> {
        self.connection
            .set::<_, _, ()>(self.key("state"), state.as_str())
            .await?;
        Ok(())
    }

    async fn open(&mut self) -> Result<(), Error> {
        self.set_state(CircuitState::Open).await?;
        self.connection
            .set::<_, _, ()>(self.key("opened_at"), Utc::now().timestamp())
            .await?;
        Ok(())
    }

    async fn reset_counters(&mut self) -> Result<(), Error> {
        let keys = [self.key("failures"), self.key("successes"), self.key("opened_at")];
        self.connection.del::<_, ()>(&keys[..]).await?;
        Ok(())
    }

    async fn should_attempt_reset(&mut self) -> Result<bool, Error> {
        let opened_at: Option<i64> = self.connection.get(self.key("opened_at")).await?;

        Ok(match opened_at {
            Some(opened_at) => {
                let elapsed = Utc::now().timestamp().saturating_sub(opened_at);
                elapsed >= self.config.timeout_seconds as i64
            }
            None => false,
        })
    }
}
