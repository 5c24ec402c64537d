//! Turnwise shared DTOs
//!
//! Plain serializable data shared by the wire decoder and the session core.
//! No I/O and no behavior beyond field-level merging lives here.

pub mod message;
pub mod queue;
pub mod tool;
pub mod usage;

pub use message::{ChatMessage, MessageRole, MessageSegment};
pub use queue::{ApprovalDecision, ApprovalProgress, QueuedMessage};
pub use tool::{ToolExecution, ToolExecutionUpdate, ToolStatus};
pub use usage::{TokenUsage, UsageSource};
