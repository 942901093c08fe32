pub mod history;
pub mod loop_;
pub mod prompt;

pub use history::{append_conversation_log, ConversationHistory, DEFAULT_CONTEXT_WINDOW};
pub use loop_::{
    extract_tool_calls, run_turn, ToolCall, ToolExecution, TurnEvent, TurnOptions, TurnOutcome,
    MAX_TOOL_ITERATIONS,
};
pub use prompt::build_tool_instructions;
