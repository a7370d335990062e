//! CPU state model primitives.

/// Register file storage and the entry/exit register conventions.
pub mod registers;
/// Sticky execution-state machine.
pub mod run_state;

pub use registers::{RegisterFile, RETURN_VALUE_REGISTER, TERMINATION_SENTINEL};
pub use run_state::RunState;
