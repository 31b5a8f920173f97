use serde::{Deserialize, Serialize};

/// One record per finished stream session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SessionTrace {
    /// Endpoint the session streamed from.
    pub url: Option<String>,

    /// Caller-supplied correlation id, sent as `X-Request-Id`.
    pub request_id: Option<String>,

    /// `completed`, `cancelled` or `failed`.
    pub outcome: Option<String>,

    pub records: u64,
    pub bytes: u64,
    pub latency_ms: Option<u64>,

    pub error_kind: Option<String>,
    pub error_message: Option<String>,
}

impl SessionTrace {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn url(mut self, url: &str) -> Self {
        self.url = Some(url.to_string());
        self
    }
    pub fn request_id_opt(mut self, rid: Option<&str>) -> Self {
        self.request_id = rid.map(|s| s.to_string());
        self
    }
    pub fn outcome(mut self, outcome: &str) -> Self {
        self.outcome = Some(outcome.to_string());
        self
    }
    pub fn counts(mut self, records: u64, bytes: u64) -> Self {
        self.records = records;
        self.bytes = bytes;
        self
    }
    pub fn latency_ms(mut self, ms: u64) -> Self {
        self.latency_ms = Some(ms);
        self
    }
    pub fn error(mut self, kind: &str, message: &str) -> Self {
        self.error_kind = Some(kind.to_string());
        self.error_message = Some(message.to_string());
        self
    }
}
