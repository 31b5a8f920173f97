pub mod chat;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod http_client;
pub mod normalizer;
pub mod session;
pub mod sse;
pub mod stream;
pub mod telemetry;
pub mod transport;

pub use chat::{ChatCallbacks, ChatClient, ChatStreamAdapter, FnCallbacks};
pub use error::{CoreResult, StreamError};
pub use session::{CancelHandle, SessionHandle, SessionHandler, SessionOutcome, StreamSession};
pub use sse::{EventRecord, FrameDecoder};
pub use stream::ChatUpdate;
