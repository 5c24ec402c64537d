//! Session layer
//!
//! The turn state machine and the task that drives it.

pub mod controller;
pub mod runtime;
pub mod state;

pub use controller::SessionController;
pub use runtime::{spawn_http_session, SessionHandle, SessionRuntime};
pub use state::{
    SessionSnapshot, SessionState, SessionUpdate, SubmitOutcome, TurnKind, TurnOutcome,
};
