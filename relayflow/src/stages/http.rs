//! A stage that delivers payloads over HTTP POST.

use super::{Done, Stage, StageWorker};
use crate::message::Message;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

/// Option key that routes a message to an endpoint under the base URL.
pub const HTTP_ENDPOINT_OPTION: &str = "http_endpoint";

/// Transport-level failure code (connection refused, timeout, etc.).
/// HTTP failures report the response status code instead.
pub const TRANSPORT_ERROR_CODE: i32 = 1;

/// Tuning for the HTTP delivery stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Base URL every payload is posted to.
    pub url: String,
}

impl HttpConfig {
    /// Creates a config posting to the given base URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// Posts each payload to the configured URL.
///
/// Messages carrying an `http_endpoint` option are posted to
/// `{url}/{endpoint}` instead. A non-2xx response resolves with the
/// response status code, so the engine retries according to its
/// backoff config.
#[derive(Debug, Clone)]
pub struct HttpSender {
    config: HttpConfig,
    workers: usize,
    client: Option<reqwest::Client>,
}

impl HttpSender {
    /// Creates a single-worker sender with a fresh client per worker.
    #[must_use]
    pub fn new(config: HttpConfig) -> Self {
        Self {
            config,
            workers: 1,
            client: None,
        }
    }

    /// Sets the worker count.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Shares a pre-built client across workers, e.g. one with custom
    /// timeouts or TLS settings.
    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }
}

impl Stage for HttpSender {
    fn name(&self) -> &str {
        "http"
    }

    fn workers(&self) -> usize {
        self.workers
    }

    fn spawn(&self, _worker_id: usize) -> Box<dyn StageWorker> {
        Box::new(HttpWorker {
            client: self.client.clone().unwrap_or_default(),
            url: self.config.url.clone(),
        })
    }
}

struct HttpWorker {
    client: reqwest::Client,
    url: String,
}

impl HttpWorker {
    fn target(&self, message: &Message) -> String {
        match message.option(HTTP_ENDPOINT_OPTION).and_then(Value::as_str) {
            Some(endpoint) => format!("{}/{}", self.url.trim_end_matches('/'), endpoint),
            None => self.url.clone(),
        }
    }
}

#[async_trait]
impl StageWorker for HttpWorker {
    async fn process(&mut self, message: Message, done: Done) {
        let url = self.target(&message);
        trace!(seq = message.sequence(), url = %url, "posting payload");

        let result = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .body(message.payload().to_vec())
            .send()
            .await;

        match result {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    done.resolve(message, 0, status.to_string());
                } else {
                    done.resolve(message, i32::from(status.as_u16()), status.to_string());
                }
            }
            Err(err) => done.resolve(message, TRANSPORT_ERROR_CODE, err.to_string()),
        }
    }
}
