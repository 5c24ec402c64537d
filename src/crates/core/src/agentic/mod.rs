//! Agentic layer - turn orchestration
//!
//! Leaf-first: usage, transcript, approval, queue, then the session that wires them together.

pub mod approval;
pub mod queue;
pub mod session;
pub mod transcript;
pub mod usage;

pub use approval::{collect_approvable, ApprovalCoordinator, BulkStep};
pub use queue::InputQueue;
pub use session::{
    spawn_http_session, SessionController, SessionHandle, SessionRuntime, SessionSnapshot,
    SessionState, SessionUpdate, SubmitOutcome, TurnKind, TurnOutcome,
};
pub use transcript::TranscriptStore;
