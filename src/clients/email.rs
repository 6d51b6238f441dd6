use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use thiserror::Error as ThisError;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    clients::circuit_breaker::CircuitBreaker,
    config::Config,
    models::{
        circuit_breaker::CircuitState,
        email::{MailApiRequest, OutboundEmail},
        retry::RetryConfig,
    },
    utils::retry_with_backoff_if,
};

/// A 4xx answer other than 429: the request itself is wrong (bad address,
/// bad credentials) and sending it again cannot succeed.
#[derive(Debug, ThisError)]
#[error("Mail API rejected the email with {status}: {body}")]
pub struct MailApiRejected {
    pub status: StatusCode,
    pub body: String,
}

fn is_retryable(error: &Error) -> bool {
    error.downcast_ref::<MailApiRejected>().is_none()
}

#[async_trait]
pub trait EmailTransport: Send + Sync {
    /// Submits one email and returns the provider's message id.
    async fn send(&self, email: &OutboundEmail) -> Result<String, Error>;

    /// Breaker state guarding the transport, when one is configured.
    async fn circuit_state(&self) -> Option<Result<CircuitState, Error>> {
        None
    }

    fn name(&self) -> &'static str;
}

/// Mail API client speaking the SendGrid-style `/v3/mail/send` JSON payload.
pub struct HttpEmailTransport {
    http_client: Client,
    api_url: String,
    api_key: String,
    retry_config: RetryConfig,
    circuit_breaker: Option<CircuitBreaker>,
}

impl HttpEmailTransport {
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        retry_config: RetryConfig,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        let api_url = api_url.into();
        info!(api_url = %api_url, "Email transport initialized");

        Ok(Self {
            http_client,
            api_url,
            api_key: api_key.into(),
            retry_config,
            circuit_breaker: None,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, Error> {
        Self::new(
            config.email_api_url.clone(),
            config.email_api_key.clone(),
            config.retry_config(),
            Duration::from_secs(config.email_timeout_seconds),
        )
    }

    pub fn with_circuit_breaker(mut self, circuit_breaker: CircuitBreaker) -> Self {
        self.circuit_breaker = Some(circuit_breaker);
        self
    }

    async fn send_with_retry_static(
        http_client: Client,
        url: String,
        api_key: String,
        retry_config: RetryConfig,
        request: MailApiRequest,
    ) -> Result<String, Error> {
        retry_with_backoff_if(
            &retry_config,
            || Self::send_once_static(http_client.clone(), url.clone(), api_key.clone(), &request),
            is_retryable,
        )
        .await
    }

    async fn send_once_static(
        http_client: Client,
        url: String,
        api_key: String,
        request: &MailApiRequest,
    ) -> Result<String, Error> {
        let response = http_client
            .post(&url)
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();

        if status.is_success() {
            let message_id = response
                .headers()
                .get("x-message-id")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .unwrap_or_else(|| Uuid::new_v4().to_string());

            Ok(message_id)
        } else {
            let error_text = response.text().await.unwrap_or_default();
            if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
                return Err(MailApiRejected {
                    status,
                    body: error_text,
                }
                .into());
            }
            Err(anyhow!("Mail API returned {}: {}", status, error_text))
        }
    }
}

#[async_trait]
impl EmailTransport for HttpEmailTransport {
    async fn send(&self, email: &OutboundEmail) -> Result<String, Error> {
        debug!(to = %email.to, subject = %email.subject, "Sending email");

        let request = MailApiRequest::from(email);
        let url = format!("{}/v3/mail/send", self.api_url.trim_end_matches('/'));

        let http_client = self.http_client.clone();
        let api_key = self.api_key.clone();
        let retry_config = self.retry_config.clone();

        match &self.circuit_breaker {
            Some(breaker) => {
                // Breaker state lives in Redis, so each send works on its own handle.
                let mut breaker = breaker.clone();
                breaker
                    .call(|| {
                        Self::send_with_retry_static(
                            http_client.clone(),
                            url.clone(),
                            api_key.clone(),
                            retry_config.clone(),
                            request.clone(),
                        )
                    })
                    .await
            }
            None => {
                Self::send_with_retry_static(http_client, url, api_key, retry_config, request)
                    .await
            }
        }
    }

    async fn circuit_state(&self) -> Option<Result<CircuitState, Error>> {
        match &self.circuit_breaker {
            Some(breaker) => Some(breaker.clone().state().await),
            None => None,
        }
    }

    fn name(&self) -> &'static str {
        "http_mail_api"
    }
}
