//! Filesystem confinement for tool execution.
//!
//! [`PathSandbox`] resolves user- and model-supplied path strings against a
//! single root directory and rejects anything that escapes it, including
//! escapes through symlinks.

pub mod sandbox;

pub use sandbox::{normalize_lexical, sanitize_path, PathSandbox, SandboxError};
