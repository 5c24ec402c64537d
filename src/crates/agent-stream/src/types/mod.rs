pub mod event;
pub mod payload;
