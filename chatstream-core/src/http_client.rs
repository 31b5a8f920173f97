use std::time::Duration;

use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use http::header::{ACCEPT, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, StatusCode};
use secrecy::ExposeSecret;

use crate::config::HttpCfg;
use crate::error::{CoreResult, StreamError};
use crate::transport::{ByteStream, StreamRequest, Transport};

const DEFAULT_USER_AGENT: &str = "chatstream/0.1";

/// Thin wrapper around reqwest::Client with defaults for event-stream requests.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    user_agent: String,
}

impl HttpClient {
    pub fn new_default() -> CoreResult<Self> {
        Self::from_cfg(&HttpCfg::default(), None)
    }

    pub fn from_cfg(cfg: &HttpCfg, user_agent: Option<&str>) -> CoreResult<Self> {
        let mut builder =
            Client::builder().connect_timeout(Duration::from_millis(cfg.connect_timeout_ms));
        if let Some(ms) = cfg.request_timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        if let Some(n) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(n);
        }
        let inner = builder
            .build()
            .map_err(|e| StreamError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            user_agent: user_agent.unwrap_or(DEFAULT_USER_AGENT).to_string(),
        })
    }
}

#[async_trait]
impl Transport for HttpClient {
    /// POST the request body and hand back the raw event-stream body.
    async fn open(&self, req: &StreamRequest) -> CoreResult<ByteStream> {
        let mut builder = self
            .inner
            .post(&req.url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .header(USER_AGENT, &self.user_agent);

        if let Some(secret) = &req.credential {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", secret.expose_secret()));
        }
        if let Some(rid) = &req.request_id {
            builder = builder.header("X-Request-Id", rid);
        }
        if let Some(body) = &req.body {
            let bytes = serde_json::to_vec(body).map_err(|e| StreamError::Other(e.into()))?;
            builder = builder.body(bytes);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| StreamError::Transport(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(map_http_error(status, &text));
        }
        if status == StatusCode::NO_CONTENT || resp.content_length() == Some(0) {
            return Err(StreamError::MissingBody {
                status: status.as_u16(),
            });
        }
        if let Some(server_rid) = extract_request_id(resp.headers()) {
            tracing::debug!(server_request_id = %server_rid, "event stream opened");
        }

        let body = resp
            .bytes_stream()
            .map_err(|e| StreamError::Transport(format!("body read failed: {e}")));
        Ok(body.boxed())
    }
}

fn extract_request_id(headers: &reqwest::header::HeaderMap) -> Option<String> {
    static CANDIDATES: [&str; 3] = ["x-request-id", "request-id", "x-amzn-requestid"];
    for k in CANDIDATES {
        if let Some(v) = headers.get(k)
            && let Ok(s) = v.to_str()
        {
            return Some(s.to_string());
        }
    }
    None
}

fn map_http_error(status: StatusCode, body: &str) -> StreamError {
    let message = match body.trim() {
        "" => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
        b => truncate(b, 300),
    };
    StreamError::Status {
        status: status.as_u16(),
        message,
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        let mut t = s[..end].to_string();
        t.push_str("...");
        t
    } else {
        s.to_string()
    }
}
