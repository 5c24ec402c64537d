//! Agent turn wire protocol
//!
//! The agent server answers every turn request with a `text/event-stream` body of
//! named events. This crate turns those bytes into [`TurnEvent`]s:
//! - `types` holds the typed events and the per-event payload decoding
//! - `stream_handler` pumps a byte stream through the SSE parser and forwards events

pub mod stream_handler;
pub mod types;

pub use stream_handler::handle_turn_stream;
pub use types::event::{decode_turn_event, ToolEventKind, TurnEvent};
