//! Sandboxed file tools the model can call.
//!
//! [`FileManager`] performs the six file operations inside a
//! [`crate::security::PathSandbox`], [`execute_tool_call`] routes an extracted
//! call to the matching operation, and [`ToolOutcome`] carries the result
//! until it is rendered with its `[SUCCESS]`/`[ERROR]`/... marker.

pub mod dispatch;
pub mod file_ops;
pub mod result;

pub use dispatch::{
    execute_tool_call, format_tool_result, tool_feedback_message, FileTool, UnknownTool,
};
pub use file_ops::FileManager;
pub use result::{OutcomeKind, ToolOutcome};
