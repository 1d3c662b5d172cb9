//! JSON-over-HTTP transport shared by the judge and tracker clients.

use std::time::Duration;

use anyhow::Context;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info_span, Instrument};

pub const CRATE_NAME: &str = "leetnote-http";

pub const DEFAULT_USER_AGENT: &str = "leetnote/0.1";

/// Longest error body kept on an `HttpStatus` error.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            user_agent: Some(DEFAULT_USER_AGENT.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url}: {body}")]
    HttpStatus {
        status: u16,
        url: String,
        body: String,
    },
    #[error("malformed response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl HttpError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::HttpStatus { status, .. } => StatusCode::from_u16(*status).ok(),
            Self::Request { source, .. } => source.status(),
            Self::Decode { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JsonClient {
    client: reqwest::Client,
}

impl JsonClient {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    /// Send `body` as JSON and decode the JSON response into `T`.
    pub async fn send_json<B, T>(
        &self,
        method: Method,
        url: &str,
        headers: &HeaderMap,
        body: &B,
    ) -> Result<T, HttpError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let bytes = self.send(method, url, headers, body).await?;
        serde_json::from_slice(&bytes).map_err(|source| HttpError::Decode {
            url: url.to_string(),
            source,
        })
    }

    /// Send `body` as JSON and return the raw response body of a 2xx reply.
    pub async fn send<B>(
        &self,
        method: Method,
        url: &str,
        headers: &HeaderMap,
        body: &B,
    ) -> Result<Vec<u8>, HttpError>
    where
        B: Serialize + ?Sized,
    {
        let span = info_span!("http_call", %method, url);
        async {
            let request_error = |source| HttpError::Request {
                url: url.to_string(),
                source,
            };

            let resp = self
                .client
                .request(method.clone(), url)
                .headers(headers.clone())
                .json(body)
                .send()
                .await
                .map_err(request_error)?;

            let status = resp.status();
            let final_url = resp.url().to_string();
            debug!(status = status.as_u16(), "response received");

            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                return Err(HttpError::HttpStatus {
                    status: status.as_u16(),
                    url: final_url,
                    body: truncate(&text, MAX_ERROR_BODY),
                });
            }

            let bytes = resp.bytes().await.map_err(request_error)?;
            Ok(bytes.to_vec())
        }
        .instrument(span)
        .await
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
