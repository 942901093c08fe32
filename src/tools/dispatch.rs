use super::file_ops::FileManager;
use super::result::ToolOutcome;
use crate::agent::ToolCall;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// The fixed set of file tools the model may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileTool {
    ReadFile,
    WriteFile,
    AppendFile,
    DeleteFile,
    ListFiles,
    CreateDir,
}

impl FileTool {
    pub const ALL: [FileTool; 6] = [
        Self::ReadFile,
        Self::WriteFile,
        Self::AppendFile,
        Self::DeleteFile,
        Self::ListFiles,
        Self::CreateDir,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadFile => "READ_FILE",
            Self::WriteFile => "WRITE_FILE",
            Self::AppendFile => "APPEND_FILE",
            Self::DeleteFile => "DELETE_FILE",
            Self::ListFiles => "LIST_FILES",
            Self::CreateDir => "CREATE_DIR",
        }
    }
}

impl fmt::Display for FileTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown tool: {0}")]
pub struct UnknownTool(pub String);

impl FromStr for FileTool {
    type Err = UnknownTool;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tool| tool.as_str() == s)
            .ok_or_else(|| UnknownTool(s.to_string()))
    }
}

fn param<'a>(params: &'a BTreeMap<String, String>, key: &str) -> &'a str {
    params.get(key).map_or("", String::as_str)
}

fn flag(params: &BTreeMap<String, String>, key: &str) -> bool {
    params.get(key).is_some_and(|value| {
        matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "yes"
        )
    })
}

/// Run one extracted tool call against the session's file manager.
///
/// Unknown tools become an error outcome so the model can correct itself.
pub fn execute_tool_call(call: &ToolCall, files: &FileManager) -> ToolOutcome {
    let tool = match call.tool.parse::<FileTool>() {
        Ok(tool) => tool,
        Err(err) => {
            tracing::warn!(tool = %call.tool, "Model requested an unknown tool");
            return ToolOutcome::error(err.to_string());
        }
    };

    let params = &call.params;
    let encoding = params.get("encoding").map_or("utf-8", String::as_str);
    let path = param(params, "path");

    tracing::debug!(%tool, path, "Executing tool call");
    match tool {
        FileTool::ReadFile => files.read(path, encoding),
        FileTool::WriteFile => files.write(path, param(params, "content"), encoding),
        FileTool::AppendFile => files.append(path, param(params, "content"), encoding),
        FileTool::DeleteFile => files.delete(path),
        FileTool::ListFiles => {
            let path = params.get("path").map_or(".", String::as_str);
            files.list(path, flag(params, "show_hidden"), flag(params, "recursive"))
        }
        FileTool::CreateDir => files.create_dir(path),
    }
}

/// `[TOOL_RESULT] NAME: outcome`, the line shown to the user.
pub fn format_tool_result(tool: &str, outcome: &ToolOutcome) -> String {
    format!("[TOOL_RESULT] {tool}: {outcome}")
}

/// History entry that carries a tool result back to the model.
pub fn tool_feedback_message(tool: &str, outcome: &ToolOutcome) -> String {
    format!("[TOOL_RESULT_FEEDBACK] {}", format_tool_result(tool, outcome))
}
