use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{CoreResult, StreamError};

static RESOURCE_ID: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").ok());

/// `{base}/chats/{conversation_id}/messages/stream`.
///
/// The id is interpolated into the path, so it is restricted to URL-safe
/// characters rather than escaped.
pub fn message_stream_url(base: &str, conversation_id: &str) -> CoreResult<String> {
    let valid = RESOURCE_ID
        .as_ref()
        .is_some_and(|re| re.is_match(conversation_id));
    if !valid {
        return Err(StreamError::Validation(format!(
            "invalid conversation id '{conversation_id}'"
        )));
    }
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        return Err(StreamError::Validation("base url is empty".into()));
    }
    Ok(format!("{base}/chats/{conversation_id}/messages/stream"))
}
