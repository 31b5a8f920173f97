use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, Stream, StreamExt};
use secrecy::SecretString;

use crate::error::{CoreResult, StreamError};

/// Raw body chunks in arrival order. Chunks need not align with frame or line boundaries.
pub type ByteStream = Pin<Box<dyn Stream<Item = CoreResult<Bytes>> + Send>>;

/// Everything needed to open one streaming request.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub url: String,
    pub credential: Option<SecretString>,
    pub body: Option<serde_json::Value>,
    pub request_id: Option<String>,
}

impl StreamRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            credential: None,
            body: None,
            request_id: None,
        }
    }

    pub fn credential(mut self, credential: Option<SecretString>) -> Self {
        self.credential = credential;
        self
    }

    pub fn body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn request_id(mut self, rid: impl Into<String>) -> Self {
        self.request_id = Some(rid.into());
        self
    }
}

/// Opens a streaming request. Setup failures (bad status, no body) are
/// returned from `open`; mid-stream failures arrive as `Err` items.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, req: &StreamRequest) -> CoreResult<ByteStream>;
}

/// One scripted step of a [`ScriptedTransport`] body.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Chunk(Bytes),
    Fail(String),
    /// Never yields again; only cancellation ends the session.
    Stall,
}

impl ScriptStep {
    pub fn text(s: &str) -> Self {
        Self::Chunk(Bytes::copy_from_slice(s.as_bytes()))
    }
}

/// In-memory transport that replays a fixed body.
/// Useful for tests and offline replay of captured streams.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    steps: Vec<ScriptStep>,
    reject: Option<(u16, String)>,
    hang_on_open: bool,
    opened: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps,
            ..Default::default()
        }
    }

    /// Body made of the given text chunks.
    pub fn from_chunks(chunks: &[&str]) -> Self {
        Self::new(chunks.iter().map(|c| ScriptStep::text(c)).collect())
    }

    /// `open` fails with a non-success status.
    pub fn rejecting(status: u16, body: impl Into<String>) -> Self {
        Self {
            reject: Some((status, body.into())),
            ..Default::default()
        }
    }

    /// `open` never resolves.
    pub fn hanging() -> Self {
        Self {
            hang_on_open: true,
            ..Default::default()
        }
    }

    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self, _req: &StreamRequest) -> CoreResult<ByteStream> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        if self.hang_on_open {
            futures::future::pending::<()>().await;
        }
        if let Some((status, message)) = &self.reject {
            return Err(StreamError::Status {
                status: *status,
                message: message.clone(),
            });
        }

        let mut items = Vec::new();
        let mut stall = false;
        for step in &self.steps {
            match step {
                ScriptStep::Chunk(b) => items.push(Ok(b.clone())),
                ScriptStep::Fail(m) => items.push(Err(StreamError::Transport(m.clone()))),
                ScriptStep::Stall => {
                    stall = true;
                    break;
                }
            }
        }
        let body = stream::iter(items);
        if stall {
            Ok(body.chain(stream::pending()).boxed())
        } else {
            Ok(body.boxed())
        }
    }
}
