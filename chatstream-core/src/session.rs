//! One streaming request from transport open to terminal callback.
//!
//! Termination contract:
//! - Exactly one of `on_complete` / `on_error` fires, exactly once.
//! - End of body: flush the decoder, forward any final record, then `on_complete`.
//! - Caller cancellation (before or during streaming) is a normal completion.
//! - Setup failures, mid-stream I/O failures and errors returned by
//!   `on_event` go to `on_error`; `on_complete` never follows.

use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, field, info_span, warn};
use tracing_futures::Instrument;

use crate::error::{CoreResult, StreamError};
use crate::sse::{EventRecord, FrameDecoder};
use crate::telemetry::{self, OUTCOME_CANCELLED, OUTCOME_COMPLETED, OUTCOME_FAILED, SessionTrace};
use crate::transport::{StreamRequest, Transport};

/// Receives decoded records and the single terminal notification of a session.
pub trait SessionHandler: Send + 'static {
    /// Called once per record, in stream order. Returning an error ends the
    /// session and routes that error to `on_error`.
    fn on_event(&mut self, record: EventRecord) -> CoreResult<()>;

    fn on_complete(&mut self);

    fn on_error(&mut self, err: StreamError);
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed,
    Cancelled,
    Failed,
}

impl SessionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => OUTCOME_COMPLETED,
            Self::Cancelled => OUTCOME_CANCELLED,
            Self::Failed => OUTCOME_FAILED,
        }
    }
}

/// Cloneable cancel function for UI layers. Idempotent; a no-op once the
/// session has finished.
#[derive(Debug, Clone)]
pub struct CancelHandle(CancellationToken);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }
}

/// Returned synchronously by [`StreamSession::start`].
#[derive(Debug)]
pub struct SessionHandle {
    cancel: CancellationToken,
    task: JoinHandle<SessionOutcome>,
}

impl SessionHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.cancel.clone())
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait until the terminal callback has run.
    pub async fn wait(self) -> SessionOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "stream session task did not finish");
                SessionOutcome::Failed
            }
        }
    }
}

pub struct StreamSession;

impl StreamSession {
    /// Spawn the session on the ambient tokio runtime and return immediately.
    /// The caller may cancel before the first byte arrives.
    pub fn start<T, H>(transport: Arc<T>, req: StreamRequest, mut handler: H) -> SessionHandle
    where
        T: Transport + ?Sized + 'static,
        H: SessionHandler,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            run_session(transport.as_ref(), &req, &mut handler, &token).await
        });
        SessionHandle { cancel, task }
    }
}

/// Counters for one session, reported in the span and telemetry.
#[derive(Default)]
struct Progress {
    records: u64,
    bytes: u64,
}

enum End {
    Eof,
    Cancelled,
}

/// Drive one session to its terminal callback on the current task.
pub async fn run_session<T, H>(
    transport: &T,
    req: &StreamRequest,
    handler: &mut H,
    cancel: &CancellationToken,
) -> SessionOutcome
where
    T: Transport + ?Sized,
    H: SessionHandler + ?Sized,
{
    let span = info_span!(
        "stream_session",
        url = %req.url,
        request_id = req.request_id.as_deref().unwrap_or(""),
        records = field::Empty,
        bytes = field::Empty,
        outcome = field::Empty,
    );
    let started = Instant::now();
    let mut progress = Progress::default();

    let result = pump(transport, req, handler, cancel, &mut progress)
        .instrument(span.clone())
        .await;

    let outcome = match &result {
        Ok(End::Eof) => SessionOutcome::Completed,
        Ok(End::Cancelled) => SessionOutcome::Cancelled,
        Err(_) => SessionOutcome::Failed,
    };
    span.record("records", progress.records);
    span.record("bytes", progress.bytes);
    span.record("outcome", outcome.as_str());

    let trace = SessionTrace::new()
        .url(&req.url)
        .request_id_opt(req.request_id.as_deref())
        .outcome(outcome.as_str())
        .counts(progress.records, progress.bytes)
        .latency_ms(started.elapsed().as_millis() as u64);

    span.in_scope(|| match result {
        Ok(_) => {
            debug!(records = progress.records, outcome = outcome.as_str(), "stream session finished");
            telemetry::emit(trace);
            handler.on_complete();
        }
        Err(err) => {
            warn!(error = %err, kind = err.kind(), "stream session failed");
            telemetry::emit(trace.error(err.kind(), &err.to_string()));
            handler.on_error(err);
        }
    });
    outcome
}

async fn pump<T, H>(
    transport: &T,
    req: &StreamRequest,
    handler: &mut H,
    cancel: &CancellationToken,
    progress: &mut Progress,
) -> CoreResult<End>
where
    T: Transport + ?Sized,
    H: SessionHandler + ?Sized,
{
    let mut body = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(End::Cancelled),
        opened = transport.open(req) => opened?,
    };

    let mut decoder = FrameDecoder::new();
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(End::Cancelled),
            next = body.next() => next,
        };

        match next {
            Some(Ok(chunk)) => {
                progress.bytes += chunk.len() as u64;
                for record in decoder.feed_bytes(&chunk) {
                    progress.records += 1;
                    debug!(event = record.event.as_deref(), len = record.data.len(), "record");
                    handler.on_event(record)?;
                }
            }
            Some(Err(err)) => {
                // An aborted read after cancel is the caller stopping, not a failure.
                if cancel.is_cancelled() {
                    return Ok(End::Cancelled);
                }
                return Err(err);
            }
            None => {
                if let Some(record) = decoder.flush() {
                    progress.records += 1;
                    handler.on_event(record)?;
                }
                return Ok(End::Eof);
            }
        }
    }
}
