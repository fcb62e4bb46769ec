//! Client for the remote chat-completion API.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::{
    config::{Timeouts, UpstreamConfig},
    error::{ServiceError, snippet},
    model::{ChatMessage, ChatPayload, DEFAULT_MODEL},
};

/// Statuses worth another attempt.
pub const RETRIABLE_STATUSES: [u16; 4] = [408, 502, 503, 504];

const PROBE_BODY_CHARS: usize = 200;

/// Seam between the generation pipeline and the HTTP client.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Sends one chat completion and returns the decoded response body.
    async fn complete(&self, payload: &ChatPayload) -> Result<serde_json::Value, ServiceError>;

    /// Single unretried round trip used as a connectivity check.
    async fn probe(&self) -> ProbeReport;
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProbeReport {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            status: None,
            headers: None,
            body: None,
            error: Some(error.into()),
        }
    }
}

pub struct ReqwestChatClient {
    client: reqwest::Client,
    config: UpstreamConfig,
    connections: Arc<Semaphore>,
}

/// Raw upstream answer before interpretation.
struct Reply {
    status: u16,
    headers: BTreeMap<String, String>,
    body: String,
}

enum Attempt {
    Done(Result<serde_json::Value, ServiceError>),
    Retry(ServiceError),
}

impl ReqwestChatClient {
    pub fn new(config: UpstreamConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.generation_timeouts.connect)
            .pool_max_idle_per_host(config.max_idle_connections)
            .build()
            .map_err(|e| ServiceError::Configuration(format!("http client: {e}")))?;

        Ok(Self {
            client,
            connections: Arc::new(Semaphore::new(config.max_connections.max(1))),
            config,
        })
    }

    fn api_key(&self) -> Result<&str, ServiceError> {
        self.config
            .api_key
            .as_deref()
            .ok_or_else(|| ServiceError::Configuration("OLLAMA_API_KEY is not set".into()))
    }

    async fn send_once(
        &self,
        api_key: &str,
        payload: &ChatPayload,
        timeouts: Timeouts,
    ) -> Result<Reply, String> {
        // Callers beyond the connection ceiling wait here, up to the pool timeout.
        let _permit = tokio::time::timeout(timeouts.pool, self.connections.acquire())
            .await
            .map_err(|_| "timed out waiting for a free upstream connection".to_string())?
            .map_err(|e| e.to_string())?;

        let response = self
            .client
            .post(self.config.completions_url())
            .bearer_auth(api_key)
            .header(reqwest::header::CONNECTION, "keep-alive")
            .timeout(timeouts.request_budget())
            .json(payload)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.text().await.map_err(|e| e.to_string())?;
        Ok(Reply {
            status,
            headers,
            body,
        })
    }

    async fn attempt(&self, api_key: &str, payload: &ChatPayload, last: bool) -> Attempt {
        match self
            .send_once(api_key, payload, self.config.generation_timeouts)
            .await
        {
            Ok(reply) if RETRIABLE_STATUSES.contains(&reply.status) && !last => {
                Attempt::Retry(ServiceError::upstream(reply.status, &reply.body))
            }
            Ok(reply) if reply.status >= 400 => {
                Attempt::Done(Err(ServiceError::upstream(reply.status, &reply.body)))
            }
            Ok(reply) => Attempt::Done(serde_json::from_str(&reply.body).map_err(|e| {
                ServiceError::upstream(reply.status, &format!("invalid JSON from upstream: {e}"))
            })),
            Err(err) if !last => Attempt::Retry(ServiceError::Network(err)),
            Err(err) => Attempt::Done(Err(ServiceError::Network(err))),
        }
    }
}

#[async_trait]
impl ChatBackend for ReqwestChatClient {
    async fn complete(&self, payload: &ChatPayload) -> Result<serde_json::Value, ServiceError> {
        let api_key = self.api_key()?;
        let attempts = self.config.max_attempts.max(1);
        let delays = backoff_schedule(self.config.backoff_base, attempts);

        for attempt in 1..=attempts {
            debug!(attempt, model = %payload.model, "calling upstream");
            match self.attempt(api_key, payload, attempt == attempts).await {
                Attempt::Done(result) => {
                    if let Err(err) = &result {
                        warn!(attempt, error = %err, "upstream call failed");
                    }
                    return result;
                }
                Attempt::Retry(reason) => {
                    let delay = delays
                        .get(attempt as usize - 1)
                        .copied()
                        .unwrap_or(self.config.backoff_base);
                    warn!(
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %reason,
                        "retrying upstream call"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(ServiceError::Network("retry budget exhausted".into()))
    }

    async fn probe(&self) -> ProbeReport {
        let api_key = match self.api_key() {
            Ok(key) => key,
            Err(err) => return ProbeReport::failed(err.to_string()),
        };
        let payload = ChatPayload {
            model: DEFAULT_MODEL.to_string(),
            messages: vec![ChatMessage::user("ping")],
            temperature: 0.0,
            max_tokens: 8,
            stream: false,
        };

        match self
            .send_once(api_key, &payload, self.config.probe_timeouts)
            .await
        {
            Ok(reply) => ProbeReport {
                ok: reply.status < 400,
                status: Some(reply.status),
                headers: Some(reply.headers),
                body: Some(snippet(&reply.body, PROBE_BODY_CHARS)),
                error: None,
            },
            Err(err) => ProbeReport::failed(err),
        }
    }
}

/// Delay before each retry, in order.
pub fn backoff_schedule(base: Duration, max_attempts: u32) -> Vec<Duration> {
    (0..max_attempts.saturating_sub(1))
        .map(|i| base.saturating_mul(2u32.saturating_pow(i)))
        .collect()
}
