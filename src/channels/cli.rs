use crate::agent::{append_conversation_log, run_turn, ConversationHistory, TurnEvent, TurnOptions};
use crate::providers::Provider;
use crate::tools::FileManager;
use anyhow::Result;
use std::io::Write;
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::mpsc;

const EVENT_BUFFER: usize = 64;

pub const FILE_MODE_HELP: &str = "\
[File commands]
=========================================
  pwd                     show the current directory
  cd <dir>                change directory
  ls [-a] [-r] [dir]      list a directory (-a hidden files, -r recursive)
  mkdir <dir>             create a directory
  read <file> [-g <enc>]  print a file (optionally with an encoding)
  write <file>            create or overwrite a file (multiline input)
  append <file>           append to a file (multiline input)
  delete <file>           delete a file
  help | ?                show this help

Leave file mode with q, exit, quit or an empty line.
=========================================";

/// Which loop the terminal is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Chat,
    Files,
}

/// What a block of terminal input asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputAction {
    Exit,
    EnterFileMode,
    LeaveFileMode,
    Empty,
    FileCommand(String),
    Chat(String),
}

pub fn classify_input(input: &str, mode: Mode) -> InputAction {
    let trimmed = input.trim();
    let lowered = trimmed.to_lowercase();

    match (mode, lowered.as_str()) {
        (Mode::Files, "exit" | "quit" | "q" | "") => InputAction::LeaveFileMode,
        (Mode::Chat, "exit" | "quit") => InputAction::Exit,
        (_, "file" | "files" | "fs") => InputAction::EnterFileMode,
        (Mode::Chat, "") => InputAction::Empty,
        (Mode::Files, _) => InputAction::FileCommand(trimmed.to_string()),
        (Mode::Chat, _) => InputAction::Chat(input.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileCommand {
    Help,
    Pwd,
    Cd(String),
    Ls {
        dir: String,
        show_hidden: bool,
        recursive: bool,
    },
    Mkdir(String),
    Read { path: String, encoding: String },
    Write(String),
    Append(String),
    Delete(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("Unknown option: {0}")]
    UnknownOption(String),
    #[error("Missing path for `{0}`")]
    MissingPath(&'static str),
    #[error("Unknown command: {0} (type 'help' for usage)")]
    UnknownCommand(String),
}

fn required_path(name: &'static str, rest: &str) -> Result<String, CommandError> {
    let path = rest.trim();
    if path.is_empty() {
        return Err(CommandError::MissingPath(name));
    }
    Ok(path.to_string())
}

pub fn parse_file_command(line: &str) -> Result<FileCommand, CommandError> {
    let line = line.trim();
    let (name, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));

    match name {
        "help" | "?" => Ok(FileCommand::Help),
        "pwd" => Ok(FileCommand::Pwd),
        "cd" => required_path("cd", rest).map(FileCommand::Cd),
        "ls" => {
            let mut dir = ".".to_string();
            let mut show_hidden = false;
            let mut recursive = false;
            for part in rest.split_whitespace() {
                match part {
                    "-a" => show_hidden = true,
                    "-r" => recursive = true,
                    "-ar" | "-ra" => {
                        show_hidden = true;
                        recursive = true;
                    }
                    opt if opt.starts_with('-') => {
                        return Err(CommandError::UnknownOption(opt.to_string()))
                    }
                    other => dir = other.to_string(),
                }
            }
            Ok(FileCommand::Ls {
                dir,
                show_hidden,
                recursive,
            })
        }
        "mkdir" => required_path("mkdir", rest).map(FileCommand::Mkdir),
        "read" => {
            let (path, encoding) = match rest.trim_end().rsplit_once(" -g ") {
                Some((path, encoding)) => (path, encoding.trim()),
                None => (rest, "utf-8"),
            };
            Ok(FileCommand::Read {
                path: required_path("read", path)?,
                encoding: encoding.to_string(),
            })
        }
        "write" => required_path("write", rest).map(FileCommand::Write),
        "append" => required_path("append", rest).map(FileCommand::Append),
        "delete" => required_path("delete", rest).map(FileCommand::Delete),
        _ => Err(CommandError::UnknownCommand(line.to_string())),
    }
}

/// Run a parsed command; `content` is only used by `write` and `append`.
pub fn execute_file_command(command: &FileCommand, files: &mut FileManager, content: &str) -> String {
    match command {
        FileCommand::Help => FILE_MODE_HELP.to_string(),
        FileCommand::Pwd => files.current_dir().display().to_string(),
        FileCommand::Cd(dir) => files.change_dir(dir).to_string(),
        FileCommand::Ls {
            dir,
            show_hidden,
            recursive,
        } => files.list(dir, *show_hidden, *recursive).to_string(),
        FileCommand::Mkdir(dir) => files.create_dir(dir).to_string(),
        FileCommand::Read { path, encoding } => files.read(path, encoding).to_string(),
        FileCommand::Write(path) => files.write(path, content, "utf-8").to_string(),
        FileCommand::Append(path) => files.append(path, content, "utf-8").to_string(),
        FileCommand::Delete(path) => files.delete(path).to_string(),
    }
}

/// Read lines until a blank line or `/end`. `None` once input is exhausted.
pub async fn read_block<R>(lines: &mut Lines<R>) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut collected: Vec<String> = Vec::new();
    loop {
        match lines.next_line().await? {
            Some(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() || trimmed == "/end" {
                    return Ok(Some(collected.join("\n")));
                }
                collected.push(line);
            }
            None if collected.is_empty() => return Ok(None),
            None => return Ok(Some(collected.join("\n"))),
        }
    }
}

/// Terminal rendering of a turn event.
pub fn event_text(event: &TurnEvent) -> Option<String> {
    match event {
        TurnEvent::Fragment(text) => Some(text.clone()),
        TurnEvent::ToolResult { display, .. } => Some(format!("\n{display}\n")),
        TurnEvent::IterationCapReached { pending_calls } => Some(format!(
            "\n[WARNING] Tool iteration limit reached; {pending_calls} pending tool call(s) skipped\n"
        )),
        TurnEvent::Error(_) => None,
    }
}

fn prompt(text: &str) {
    print!("{text}");
    let _ = std::io::stdout().flush();
}

async fn chat_turn(
    provider: &dyn Provider,
    history: &mut ConversationHistory,
    files: &FileManager,
    options: &TurnOptions,
    log_path: &Path,
) {
    println!(
        "\n[{}] [session {}] history: {} messages",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        history.session_id,
        history.len()
    );

    let (tx, mut rx) = mpsc::channel::<TurnEvent>(EVENT_BUFFER);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Some(text) = event_text(&event) {
                print!("{text}");
                let _ = std::io::stdout().flush();
            }
        }
    });

    let result = run_turn(provider, history, Some(files), options, Some(&tx)).await;
    drop(tx);
    let _ = printer.await;

    match result {
        Ok(_) => {
            println!();
            if let Err(e) = append_conversation_log(log_path, history).await {
                tracing::warn!("Failed to write conversation log: {e:#}");
            }
        }
        Err(e) => eprintln!("\nError: {e}\n"),
    }
}

/// Interactive terminal chat with file commands.
pub async fn run(
    provider: &dyn Provider,
    mut files: FileManager,
    options: TurnOptions,
    log_path: &Path,
) -> Result<()> {
    let mut history = ConversationHistory::new();
    tracing::info!(session = %history.session_id, root = %files.root().display(), "Terminal session started");
    println!("New session: {}", history.session_id);
    println!(
        "Interactive mode (end input with an empty line or /end, 'exit' to quit, 'file' for file commands)"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut mode = Mode::Chat;

    loop {
        prompt(match mode {
            Mode::Chat => "> ",
            Mode::Files => "[files] ",
        });
        let Some(input) = read_block(&mut lines).await? else {
            break;
        };

        match classify_input(&input, mode) {
            InputAction::Exit => break,
            InputAction::EnterFileMode => {
                mode = Mode::Files;
                println!("{FILE_MODE_HELP}");
            }
            InputAction::LeaveFileMode => {
                mode = Mode::Chat;
                println!("Left file mode");
            }
            InputAction::Empty => println!("Input cannot be empty"),
            InputAction::FileCommand(line) => {
                let command = match parse_file_command(&line) {
                    Ok(command) => command,
                    Err(e) => {
                        println!("[ERROR] {e}");
                        continue;
                    }
                };
                let content = match &command {
                    FileCommand::Write(path) | FileCommand::Append(path) => {
                        println!("Content for {path} (end with an empty line or /end):");
                        read_block(&mut lines).await?.unwrap_or_default()
                    }
                    _ => String::new(),
                };
                println!("{}", execute_file_command(&command, &mut files, &content));
            }
            InputAction::Chat(text) => {
                history.add_user_message(text);
                chat_turn(provider, &mut history, &files, &options, log_path).await;
            }
        }
    }

    println!("Goodbye");
    Ok(())
}
