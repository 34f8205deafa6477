//! Persistence adapter with actor pattern
//!
//! StateManager owns the byte-level store and processes messages via
//! channels, providing serialized access to the durable timer state.

mod manager;
mod messages;

pub use manager::{StateConfig, StateManager, keys};
pub use messages::{StateCommand, StateError, StateResponse};
