//! Front ends that feed user turns into the agent loop.
//!
//! The terminal channel lives in [`cli`]; the WebSocket front end is the
//! gateway module.

pub mod cli;

pub use cli::{classify_input, execute_file_command, parse_file_command, FileCommand, InputAction, Mode};
