//! Stream transport
//!
//! One outbound request per turn attempt, decoded into generation-tagged
//! [`TurnEvent`]s on a shared sink. The session owns the receiving end.

pub mod hydration;
pub mod http;

pub use http::HttpStreamTransport;

use crate::util::errors::TurnwiseResult;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use turnwise_agent_stream::TurnEvent;
use turnwise_core_types::ChatMessage;

/// What a stream is opened for.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnRequest {
    NewTurn {
        conversation_id: String,
        messages: Vec<ChatMessage>,
    },
    ApprovalContinuation {
        conversation_id: String,
        call_id: String,
        approve: bool,
        reason: Option<String>,
    },
}

impl TurnRequest {
    pub fn conversation_id(&self) -> &str {
        match self {
            Self::NewTurn {
                conversation_id, ..
            }
            | Self::ApprovalContinuation {
                conversation_id, ..
            } => conversation_id,
        }
    }
}

/// A decoded event stamped with the turn generation that opened its stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEnvelope {
    pub generation: u64,
    pub event: TurnEvent,
}

pub type EventSink = mpsc::UnboundedSender<StreamEnvelope>;

/// Handle to one open stream.
///
/// Cancelling is idempotent and a no-op once the stream has finished.
#[derive(Debug, Clone)]
pub struct EventHandle {
    generation: u64,
    cancel_token: CancellationToken,
}

impl EventHandle {
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }
}

pub trait StreamTransport: Send + Sync {
    /// Open a stream for `request`; every event it yields is sent to `sink`
    /// tagged with `generation`. Establishment and mid-read failures surface as
    /// exactly one `TurnEvent::Error`.
    fn open(&self, request: TurnRequest, generation: u64, sink: EventSink) -> EventHandle;

    /// Ask the server to stop `run_id`. Fire-and-forget.
    fn request_stop(&self, conversation_id: &str, run_id: &str);
}

/// One-shot read of a stored conversation.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn fetch_conversation(&self, conversation_id: &str) -> TurnwiseResult<Vec<ChatMessage>>;
}
