use crate::tools::FileTool;
use std::fmt::Write;
use std::path::Path;

fn tool_usage(tool: FileTool) -> &'static str {
    match tool {
        FileTool::ReadFile => r#"path="file"                     read a text file"#,
        FileTool::WriteFile => r#"path="file" content="text"      create or overwrite a file"#,
        FileTool::AppendFile => r#"path="file" content="text"      append to an existing file"#,
        FileTool::DeleteFile => r#"path="file"                     delete a file"#,
        FileTool::ListFiles => r#"path="dir" (optional)           list a directory"#,
        FileTool::CreateDir => r#"path="dir"                      create a directory"#,
    }
}

/// System message that teaches the model the tool-call protocol.
pub fn build_tool_instructions(working_dir: &Path) -> String {
    let mut instructions = String::new();
    instructions.push_str("You can operate on files inside the working directory ");
    let _ = writeln!(instructions, "`{}`.", working_dir.display());
    instructions.push_str(
        "To use a tool, write one line per call in exactly this format and then stop:\n\n",
    );
    instructions.push_str("[TOOL_CALL] TOOL_NAME param=\"value\" param2=\"value\"\n\n");
    instructions.push_str("Available tools:\n");
    for tool in FileTool::ALL {
        let _ = writeln!(instructions, "- {tool:<12} {}", tool_usage(tool));
    }
    instructions.push_str(
        "\nEscape newlines in values as \\n and quotes as \\\". \
         For long content you may instead write\n\
         [TOOL_CALL] {\"command\": \"WRITE_FILE\", \"parameters\": {\"path\": \"file\", \"content\": \"text\"}}\n\
         or a fenced block tagged ```tool:TOOL_NAME with one param=\"value\" per line.\n\n",
    );
    instructions.push_str(
        "Each result comes back as [TOOL_RESULT] TOOL_NAME: followed by [SUCCESS], [ERROR], \
         [FILE_CONTENT] or [DIR_LIST]. Read it before continuing. \
         Paths outside the working directory are refused. \
         When no file operation is needed, answer normally without [TOOL_CALL].",
    );
    instructions
}
