use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::{
    models::{circuit_breaker::CircuitBreakerConfig, retry::RetryConfig},
    services::processor::ProcessorConfig,
};

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub rabbitmq_url: String,
    #[serde(default = "default_events_queue")]
    pub events_queue_name: String,
    #[serde(default = "default_reservations_queue")]
    pub reservations_queue_name: String,
    #[serde(default = "default_reminders_queue")]
    pub reminders_queue_name: String,
    /// Quarantine is enabled only when both this and `dead_letter_after` are set.
    #[serde(default)]
    pub dead_letter_queue_name: Option<String>,

    pub database_url: String,
    #[serde(default)]
    pub store_auto_migrate: bool,

    /// Without Redis the email transport runs unguarded.
    #[serde(default)]
    pub redis_url: Option<String>,

    pub email_api_url: String,
    pub email_api_key: String,
    #[serde(default = "default_email_from")]
    pub email_from: String,
    #[serde(default = "default_email_timeout_seconds")]
    pub email_timeout_seconds: u64,

    #[serde(default = "default_failure_threshold")]
    pub circuit_breaker_failure_threshold: u32,
    #[serde(default = "default_breaker_timeout_seconds")]
    pub circuit_breaker_timeout_seconds: u64,
    #[serde(default = "default_success_threshold")]
    pub circuit_breaker_success_threshold: u32,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_retry_backoff_multiplier")]
    pub retry_backoff_multiplier: u64,

    #[serde(default = "default_receive_batch_size")]
    pub receive_batch_size: usize,
    #[serde(default = "default_receive_wait_seconds")]
    pub receive_wait_seconds: u64,
    #[serde(default)]
    pub dead_letter_after: Option<u32>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_bulk_concurrency")]
    pub bulk_concurrency: usize,

    #[serde(default = "default_server_port")]
    pub server_port: u16,
}

fn default_events_queue() -> String {
    "events".to_string()
}

fn default_reservations_queue() -> String {
    "reservations".to_string()
}

fn default_reminders_queue() -> String {
    "reminders".to_string()
}

fn default_email_from() -> String {
    "notifications@ticket-system.com".to_string()
}

fn default_email_timeout_seconds() -> u64 {
    10
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_breaker_timeout_seconds() -> u64 {
    60
}

fn default_success_threshold() -> u32 {
    2
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_initial_retry_delay_ms() -> u64 {
    200
}

fn default_max_retry_delay_ms() -> u64 {
    2_000
}

fn default_retry_backoff_multiplier() -> u64 {
    2
}

fn default_receive_batch_size() -> usize {
    10
}

fn default_receive_wait_seconds() -> u64 {
    10
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_bulk_concurrency() -> usize {
    1
}

fn default_server_port() -> u16 {
    8080
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;
        Ok(config)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retry_attempts.max(1),
            initial_delay_ms: self.initial_retry_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
            backoff_multiplier: self.retry_backoff_multiplier,
        }
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_breaker_failure_threshold,
            timeout_seconds: self.circuit_breaker_timeout_seconds,
            success_threshold: self.circuit_breaker_success_threshold,
        }
    }

    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            batch_size: self.receive_batch_size.max(1),
            wait: Duration::from_secs(self.receive_wait_seconds),
            dead_letter_after: self
                .dead_letter_queue_name
                .as_ref()
                .and(self.dead_letter_after),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
