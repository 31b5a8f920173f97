//! Chat vocabulary on top of decoded event records.
//!
//! Records are classified as `token`, `done` or `error`. The named `event`
//! field wins; without one, a JSON payload is probed for a `type`
//! discriminator or a `done`/`error` flag; anything else is a raw token.
//! Malformed payloads are never an error, they degrade to raw text.

use std::sync::Arc;

use secrecy::SecretString;
use serde_json::{Map, Value};
use tokio::sync::mpsc::UnboundedSender;

use crate::config::ClientCfg;
use crate::endpoint::message_stream_url;
use crate::error::{CoreResult, StreamError};
use crate::http_client::HttpClient;
use crate::normalizer::normalize_message;
use crate::session::{SessionHandle, SessionHandler, StreamSession};
use crate::sse::EventRecord;
use crate::stream::ChatUpdate;
use crate::transport::{StreamRequest, Transport};

/// Used when an `error` event carries no readable message.
pub const GENERIC_STREAM_ERROR: &str = "Streaming error";

/// Candidate payload fields, tried in order; the first non-empty one wins.
struct FieldProbe {
    token: &'static [&'static str],
    message_id: &'static [&'static str],
    error: &'static [&'static str],
}

const PROBE: FieldProbe = FieldProbe {
    token: &["token", "content", "text"],
    message_id: &["messageId", "id"],
    error: &["message", "error"],
};

/// Caller-facing callbacks for one chat exchange.
pub trait ChatCallbacks: Send + 'static {
    /// One incremental token.
    fn on_token(&mut self, token: &str);

    /// Full accumulated text and the server-assigned id, if any.
    fn on_complete(&mut self, text: String, server_id: Option<String>);

    fn on_error(&mut self, err: StreamError);
}

/// Queues updates instead of running UI code on the read loop.
impl ChatCallbacks for UnboundedSender<ChatUpdate> {
    fn on_token(&mut self, token: &str) {
        let _ = self.send(ChatUpdate::Token(token.to_string()));
    }

    fn on_complete(&mut self, text: String, server_id: Option<String>) {
        let _ = self.send(ChatUpdate::Complete { text, server_id });
    }

    fn on_error(&mut self, err: StreamError) {
        let _ = self.send(ChatUpdate::Error(err));
    }
}

/// Callbacks built from three closures.
pub struct FnCallbacks<T, C, E> {
    pub on_token: T,
    pub on_complete: C,
    pub on_error: E,
}

impl<T, C, E> ChatCallbacks for FnCallbacks<T, C, E>
where
    T: FnMut(&str) + Send + 'static,
    C: FnMut(String, Option<String>) + Send + 'static,
    E: FnMut(StreamError) + Send + 'static,
{
    fn on_token(&mut self, token: &str) {
        (self.on_token)(token)
    }

    fn on_complete(&mut self, text: String, server_id: Option<String>) {
        (self.on_complete)(text, server_id)
    }

    fn on_error(&mut self, err: StreamError) {
        (self.on_error)(err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatState {
    Streaming,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChatEventKind {
    Token,
    Done,
    Error,
}

impl ChatEventKind {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "token" => Some(Self::Token),
            "done" => Some(Self::Done),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

fn classify(record: &EventRecord, payload: Option<&Map<String, Value>>) -> ChatEventKind {
    if let Some(kind) = record.event.as_deref().and_then(ChatEventKind::from_name) {
        return kind;
    }
    let Some(obj) = payload else {
        return ChatEventKind::Token;
    };
    if let Some(kind) = obj
        .get("type")
        .and_then(Value::as_str)
        .and_then(ChatEventKind::from_name)
    {
        return kind;
    }
    if obj.get("done").and_then(Value::as_bool) == Some(true) {
        return ChatEventKind::Done;
    }
    if obj.get("error").is_some_and(|v| !v.is_null() && v != &Value::Bool(false)) {
        return ChatEventKind::Error;
    }
    ChatEventKind::Token
}

fn first_text<'a>(obj: &'a Map<String, Value>, fields: &[&str]) -> Option<&'a str> {
    fields
        .iter()
        .filter_map(|f| obj.get(*f).and_then(Value::as_str))
        .find(|s| !s.is_empty())
}

/// Like [`first_text`] but also accepts numeric ids.
fn first_id(obj: &Map<String, Value>, fields: &[&str]) -> Option<String> {
    fields.iter().find_map(|f| match obj.get(*f) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Only JSON objects count as structured payloads.
fn parse_payload(data: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(data) {
        Ok(Value::Object(obj)) => Some(obj),
        _ => None,
    }
}

/// Accumulates one chat reply and forwards it to [`ChatCallbacks`].
pub struct ChatStreamAdapter<C> {
    callbacks: C,
    text: String,
    server_id: Option<String>,
    state: ChatState,
}

impl<C: ChatCallbacks> ChatStreamAdapter<C> {
    pub fn new(callbacks: C) -> Self {
        Self {
            callbacks,
            text: String::new(),
            server_id: None,
            state: ChatState::Streaming,
        }
    }

    pub fn state(&self) -> ChatState {
        self.state
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn server_id(&self) -> Option<&str> {
        self.server_id.as_deref()
    }

    fn handle_token(&mut self, record: &EventRecord, payload: Option<&Map<String, Value>>) {
        let token = match payload {
            Some(obj) => first_text(obj, PROBE.token),
            None => Some(record.data.as_str()),
        };
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            self.text.push_str(token);
            self.callbacks.on_token(token);
        }
    }

    fn handle_done(&mut self, payload: Option<&Map<String, Value>>) {
        if self.server_id.is_some() {
            return;
        }
        self.server_id = payload.and_then(|obj| first_id(obj, PROBE.message_id));
    }
}

impl<C: ChatCallbacks> SessionHandler for ChatStreamAdapter<C> {
    fn on_event(&mut self, record: EventRecord) -> CoreResult<()> {
        if self.state != ChatState::Streaming {
            return Ok(());
        }
        let payload = parse_payload(&record.data);
        match classify(&record, payload.as_ref()) {
            ChatEventKind::Token => self.handle_token(&record, payload.as_ref()),
            ChatEventKind::Done => self.handle_done(payload.as_ref()),
            ChatEventKind::Error => {
                let message = payload
                    .as_ref()
                    .and_then(|obj| first_text(obj, PROBE.error))
                    .unwrap_or(GENERIC_STREAM_ERROR);
                // Ends the session; the error reaches `on_error` below.
                return Err(StreamError::Server(message.to_string()));
            }
        }
        Ok(())
    }

    fn on_complete(&mut self) {
        if self.state != ChatState::Streaming {
            return;
        }
        self.state = ChatState::Completed;
        self.callbacks
            .on_complete(self.text.clone(), self.server_id.clone());
    }

    fn on_error(&mut self, err: StreamError) {
        if self.state != ChatState::Streaming {
            return;
        }
        self.state = ChatState::Failed;
        self.callbacks.on_error(err);
    }
}

/// Sends chat messages and streams the replies.
#[derive(Clone)]
pub struct ChatClient {
    transport: Arc<dyn Transport>,
    base_url: String,
    credential: Option<SecretString>,
}

impl ChatClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        base_url: impl Into<String>,
        credential: Option<SecretString>,
    ) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
            credential,
        }
    }

    /// Build an HTTP-backed client from config, resolving the credential from the environment.
    pub fn from_cfg(cfg: &ClientCfg) -> CoreResult<Self> {
        let http = HttpClient::from_cfg(&cfg.http, cfg.user_agent.as_deref())?;
        Ok(Self::new(Arc::new(http), cfg.base_url.clone(), cfg.credential()?))
    }

    /// Start streaming the reply to `content` in conversation `conversation_id`.
    /// Returns as soon as the request is spawned; fails only on invalid input.
    pub fn send_message<C: ChatCallbacks>(
        &self,
        conversation_id: &str,
        content: &str,
        callbacks: C,
    ) -> CoreResult<SessionHandle> {
        let url = message_stream_url(&self.base_url, conversation_id)?;
        let content = normalize_message(content)?;
        let req = StreamRequest::new(url)
            .credential(self.credential.clone())
            .body(serde_json::json!({ "content": content }));
        Ok(StreamSession::start(
            self.transport.clone(),
            req,
            ChatStreamAdapter::new(callbacks),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionOutcome, run_session};
    use crate::transport::{ScriptStep, ScriptedTransport};
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Token(String),
        Complete(String, Option<String>),
        Error(String),
    }

    #[derive(Clone, Default)]
    struct Calls(Arc<Mutex<Vec<Call>>>);

    impl Calls {
        fn get(&self) -> Vec<Call> {
            self.0.lock().unwrap().clone()
        }
    }

    impl ChatCallbacks for Calls {
        fn on_token(&mut self, token: &str) {
            self.0.lock().unwrap().push(Call::Token(token.into()));
        }
        fn on_complete(&mut self, text: String, server_id: Option<String>) {
            self.0.lock().unwrap().push(Call::Complete(text, server_id));
        }
        fn on_error(&mut self, err: StreamError) {
            self.0.lock().unwrap().push(Call::Error(err.to_string()));
        }
    }

    async fn stream_chat(chunks: &[&str]) -> (Vec<Call>, SessionOutcome) {
        let calls = Calls::default();
        let mut adapter = ChatStreamAdapter::new(calls.clone());
        let t = ScriptedTransport::from_chunks(chunks);
        let outcome = run_session(
            &t,
            &StreamRequest::new("mem://chat"),
            &mut adapter,
            &CancellationToken::new(),
        )
        .await;
        (calls.get(), outcome)
    }

    fn tok(s: &str) -> Call {
        Call::Token(s.into())
    }

    #[tokio::test]
    async fn tokens_then_done_complete_with_text_and_id() {
        let (calls, outcome) = stream_chat(&[
            "event: token\ndata: Hel\n\n",
            "event: token\ndata: lo\n\n",
            "event: done\ndata: {\"messageId\":\"m1\"}\n\n",
        ])
        .await;
        assert_eq!(outcome, SessionOutcome::Completed);
        assert_eq!(
            calls,
            vec![
                tok("Hel"),
                tok("lo"),
                Call::Complete("Hello".into(), Some("m1".into()))
            ]
        );
    }

    #[tokio::test]
    async fn error_payload_fails_without_completing() {
        let (calls, outcome) = stream_chat(&[
            "event: token\ndata: partial\n\n",
            "data: {\"type\":\"error\",\"message\":\"boom\"}\n\n",
            "event: token\ndata: ignored\n\n",
        ])
        .await;
        assert_eq!(outcome, SessionOutcome::Failed);
        assert_eq!(calls, vec![tok("partial"), Call::Error("boom".into())]);
    }

    #[tokio::test]
    async fn error_without_message_uses_generic_text() {
        let (calls, _) = stream_chat(&["event: error\ndata: {}\n\n"]).await;
        assert_eq!(calls, vec![Call::Error(GENERIC_STREAM_ERROR.into())]);

        let (calls, _) = stream_chat(&["event: error\ndata: not json\n\n"]).await;
        assert_eq!(calls, vec![Call::Error(GENERIC_STREAM_ERROR.into())]);
    }

    #[tokio::test]
    async fn error_field_is_used_when_message_is_absent() {
        let (calls, _) = stream_chat(&["data: {\"error\":\"quota exceeded\"}\n\n"]).await;
        assert_eq!(calls, vec![Call::Error("quota exceeded".into())]);
    }

    #[tokio::test]
    async fn payload_type_classifies_unnamed_records() {
        let (calls, _) = stream_chat(&[
            "data: {\"type\":\"token\",\"content\":\"A\"}\n\n",
            "data: {\"text\":\"B\"}\n\n",
            "data: {\"type\":\"done\",\"id\":\"srv-2\"}\n\n",
        ])
        .await;
        assert_eq!(
            calls,
            vec![tok("A"), tok("B"), Call::Complete("AB".into(), Some("srv-2".into()))]
        );
    }

    #[tokio::test]
    async fn done_flag_and_numeric_id() {
        let (calls, _) = stream_chat(&["data: x\n\n", "data: {\"done\":true,\"id\":42}\n\n"]).await;
        assert_eq!(calls, vec![tok("x"), Call::Complete("x".into(), Some("42".into()))]);
    }

    #[tokio::test]
    async fn token_field_probe_order() {
        let (calls, _) = stream_chat(&[
            "event: token\ndata: {\"token\":\"t\",\"content\":\"c\",\"text\":\"x\"}\n\n",
            "event: token\ndata: {\"token\":\"\",\"content\":\"c\"}\n\n",
        ])
        .await;
        assert_eq!(calls[..2], [tok("t"), tok("c")]);
    }

    #[tokio::test]
    async fn raw_and_malformed_payloads_are_tokens() {
        let (calls, _) = stream_chat(&[
            "data: plain text\n\n",
            "data: {not json\n\n",
            "data: 42\n\n",
            "event: ping\ndata: tail\n\n",
        ])
        .await;
        assert_eq!(
            calls,
            vec![
                tok("plain text"),
                tok("{not json"),
                tok("42"),
                tok("tail"),
                Call::Complete("plain text{not json42tail".into(), None)
            ]
        );
    }

    #[tokio::test]
    async fn structured_token_without_text_is_skipped() {
        let (calls, _) = stream_chat(&["event: token\ndata: {\"usage\":3}\n\n"]).await;
        assert_eq!(calls, vec![Call::Complete(String::new(), None)]);
    }

    #[tokio::test]
    async fn first_done_id_is_kept() {
        let (calls, _) = stream_chat(&[
            "event: done\ndata: {\"messageId\":\"first\"}\n\n",
            "event: done\ndata: {\"messageId\":\"second\"}\n\n",
        ])
        .await;
        assert_eq!(calls, vec![Call::Complete(String::new(), Some("first".into()))]);
    }

    #[tokio::test]
    async fn no_done_event_completes_without_id() {
        let (calls, _) = stream_chat(&["event: token\ndata: hi"]).await;
        assert_eq!(calls, vec![tok("hi"), Call::Complete("hi".into(), None)]);
    }

    #[tokio::test]
    async fn transport_failure_reaches_on_error_once() {
        let calls = Calls::default();
        let mut adapter = ChatStreamAdapter::new(calls.clone());
        let t = ScriptedTransport::new(vec![
            ScriptStep::text("event: token\ndata: a\n\n"),
            ScriptStep::text("event: done\ndata: {\"messageId\":\"m9\"}\n\n"),
            ScriptStep::Fail("reset".into()),
        ]);
        run_session(&t, &StreamRequest::new("mem://chat"), &mut adapter, &CancellationToken::new())
            .await;
        assert_eq!(calls.get(), vec![tok("a"), Call::Error("transport error: reset".into())]);
        assert_eq!(adapter.state(), ChatState::Failed);
        assert_eq!(adapter.text(), "a");
        assert_eq!(adapter.server_id(), Some("m9"));

        // terminal state is inert
        adapter.on_complete();
        assert_eq!(calls.get().len(), 2);
    }

    #[tokio::test]
    async fn cancel_keeps_partial_text() {
        let calls = Calls::default();
        let t = Arc::new(ScriptedTransport::new(vec![
            ScriptStep::text("event: token\ndata: par\n\n"),
            ScriptStep::Stall,
        ]));
        let handle = StreamSession::start(
            t,
            StreamRequest::new("mem://chat"),
            ChatStreamAdapter::new(calls.clone()),
        );
        while calls.get().is_empty() {
            tokio::task::yield_now().await;
        }
        handle.cancel();
        assert_eq!(handle.wait().await, SessionOutcome::Cancelled);
        assert_eq!(calls.get(), vec![tok("par"), Call::Complete("par".into(), None)]);
    }

    #[tokio::test]
    async fn cancel_before_any_chunk_completes_empty() {
        let calls = Calls::default();
        let client = ChatClient::new(Arc::new(ScriptedTransport::hanging()), "mem://api", None);
        let handle = client.send_message("c1", "hello", calls.clone()).unwrap();
        handle.cancel();
        handle.cancel();
        handle.wait().await;
        assert_eq!(calls.get(), vec![Call::Complete(String::new(), None)]);
    }

    #[tokio::test]
    async fn channel_callbacks_queue_updates() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = ChatClient::new(
            Arc::new(ScriptedTransport::from_chunks(&[
                "event: token\ndata: a\n\nevent: token\ndata: b\n\nevent: done\ndata: {\"messageId\":\"m9\"}\n\n",
            ])),
            "mem://api",
            None,
        );
        client.send_message("c1", "hi", tx).unwrap().wait().await;

        let mut tokens = Vec::new();
        while let Some(update) = rx.recv().await {
            let terminal = update.is_terminal();
            match update {
                ChatUpdate::Token(t) => tokens.push(t),
                ChatUpdate::Complete { text, server_id } => {
                    assert_eq!(text, "ab");
                    assert_eq!(server_id.as_deref(), Some("m9"));
                }
                other => panic!("unexpected update: {other:?}"),
            }
            if terminal {
                break;
            }
        }
        assert_eq!(tokens, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn fn_callbacks_forward_to_closures() {
        let tokens = Arc::new(Mutex::new(String::new()));
        let done = Arc::new(Mutex::new(None));
        let errors = Arc::new(Mutex::new(Vec::new()));
        let (t2, d2, e2) = (tokens.clone(), done.clone(), errors.clone());
        let callbacks = FnCallbacks {
            on_token: move |t: &str| t2.lock().unwrap().push_str(t),
            on_complete: move |text: String, id: Option<String>| {
                *d2.lock().unwrap() = Some((text, id));
            },
            on_error: move |e: StreamError| e2.lock().unwrap().push(e.to_string()),
        };
        let client = ChatClient::new(
            Arc::new(ScriptedTransport::from_chunks(&["data: {\"type\":\"token\",\"token\":\"ok\"}\n\n"])),
            "mem://api",
            None,
        );
        client.send_message("c1", "hi", callbacks).unwrap().wait().await;
        assert_eq!(*tokens.lock().unwrap(), "ok");
        assert_eq!(*done.lock().unwrap(), Some(("ok".to_string(), None)));
        assert!(errors.lock().unwrap().is_empty());
    }

    #[test]
    fn invalid_input_is_rejected_before_spawning() {
        let t = Arc::new(ScriptedTransport::default());
        let client = ChatClient::new(t.clone(), "mem://api", None);
        assert!(matches!(
            client.send_message("bad/id", "hi", Calls::default()),
            Err(StreamError::Validation(_))
        ));
        assert!(matches!(
            client.send_message("c1", "   ", Calls::default()),
            Err(StreamError::Validation(_))
        ));
        assert_eq!(t.open_count(), 0);
    }

    mod over_http {
        use super::*;
        use httpmock::Method::POST;
        use httpmock::MockServer;
        use secrecy::SecretString;
        use serde_json::json;

        #[tokio::test]
        async fn end_to_end_over_http() {
            let server = MockServer::start();
            let m = server.mock(|when, then| {
                when.method(POST)
                    .path("/api/chats/conv-1/messages/stream")
                    .header("authorization", "Bearer sk-e2e")
                    .header("accept", "text/event-stream")
                    .json_body(json!({"content": "Say hello"}));
                then.status(200)
                    .header("content-type", "text/event-stream")
                    .body(
                        "event: token\ndata: Hel\n\n\
                         event: token\ndata: lo\n\n\
                         event: done\ndata: {\"messageId\":\"m1\"}\n\n",
                    );
            });

            let client = ChatClient::new(
                Arc::new(HttpClient::new_default().unwrap()),
                server.url("/api/"),
                Some(SecretString::from("sk-e2e".to_string())),
            );
            let calls = Calls::default();
            let outcome = client
                .send_message("conv-1", "  Say hello\r\n", calls.clone())
                .unwrap()
                .wait()
                .await;
            assert_eq!(outcome, SessionOutcome::Completed);
            assert_eq!(
                calls.get(),
                vec![tok("Hel"), tok("lo"), Call::Complete("Hello".into(), Some("m1".into()))]
            );
            m.assert();
        }

        #[tokio::test]
        async fn rejected_request_reports_status() {
            let server = MockServer::start();
            let _m = server.mock(|when, then| {
                when.method(POST).path("/chats/c1/messages/stream");
                then.status(403).body("forbidden chat");
            });
            let client = ChatClient::new(
                Arc::new(HttpClient::new_default().unwrap()),
                server.base_url(),
                None,
            );
            let calls = Calls::default();
            let outcome = client
                .send_message("c1", "hi", calls.clone())
                .unwrap()
                .wait()
                .await;
            assert_eq!(outcome, SessionOutcome::Failed);
            assert_eq!(
                calls.get(),
                vec![Call::Error(
                    "stream request failed with status 403: forbidden chat".into()
                )]
            );
        }
    }
}
