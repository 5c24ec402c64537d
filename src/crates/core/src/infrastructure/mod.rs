//! Infrastructure layer - configuration and the agent server transport

pub mod config;
pub mod transport;

pub use config::ClientConfig;
pub use transport::{
    ConversationStore, EventHandle, EventSink, HttpStreamTransport, StreamEnvelope,
    StreamTransport, TurnRequest,
};
