// Turnwise Core Library - client-side turn orchestration for a conversational agent
// Three-layer architecture: Util -> Infrastructure -> Agentic

pub mod agentic; // Agentic layer - session state machine, transcript, approvals, input queue
pub mod infrastructure; // Infrastructure layer - config, SSE transport, hydration
pub mod util; // Utility layer - errors, ids, clock

// Export main types
pub use util::errors::*;

pub use agentic::{
    spawn_http_session, SessionController, SessionHandle, SessionRuntime, SessionSnapshot,
    SessionState, SessionUpdate, SubmitOutcome, TurnOutcome,
};
pub use infrastructure::{ClientConfig, HttpStreamTransport, StreamTransport};

// Re-export the shared DTOs and wire events so callers need only this crate
pub use turnwise_agent_stream::{ToolEventKind, TurnEvent};
pub use turnwise_core_types as types;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const CORE_NAME: &str = "Turnwise Core";
