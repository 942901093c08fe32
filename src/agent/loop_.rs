use crate::agent::history::{ConversationHistory, DEFAULT_CONTEXT_WINDOW};
use crate::agent::prompt::build_tool_instructions;
use crate::config::Config;
use crate::providers::{self, ChatMessage, Provider};
use crate::tools::{execute_tool_call, format_tool_result, tool_feedback_message, FileManager, ToolOutcome};
use anyhow::Result;
use futures_util::StreamExt;
use tokio::sync::mpsc;

pub mod parsing;

pub use parsing::{extract_tool_calls, ToolCall};

/// Maximum model invocations per user turn to prevent runaway loops.
pub const MAX_TOOL_ITERATIONS: usize = 10;

/// Progress of a turn, delivered in order to whoever renders it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    /// A piece of model output, forwarded as soon as it arrives.
    Fragment(String),
    /// One executed tool call, rendered as `[TOOL_RESULT] NAME: ...`.
    ToolResult { tool: String, display: String },
    /// The invocation cap was hit while the model still requested tools.
    IterationCapReached { pending_calls: usize },
    /// The completion endpoint failed; the turn ends without a reply.
    Error(String),
}

#[derive(Debug, Clone)]
pub struct TurnOptions {
    pub streaming: bool,
    pub max_iterations: usize,
    pub context_window: usize,
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self {
            streaming: true,
            max_iterations: MAX_TOOL_ITERATIONS,
            context_window: DEFAULT_CONTEXT_WINDOW,
        }
    }
}

impl TurnOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            streaming: config.streaming,
            max_iterations: config.effective_max_tool_iterations(),
            context_window: config.agent.context_window,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolExecution {
    pub call: ToolCall,
    pub outcome: ToolOutcome,
}

/// What a finished turn produced.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Final model reply, also appended to history as the assistant message.
    pub response: String,
    /// Every fragment and tool-result line, in the order they were emitted.
    pub transcript: String,
    pub tool_results: Vec<ToolExecution>,
    pub invocations: usize,
    pub cap_reached: bool,
}

async fn emit(events: Option<&mpsc::Sender<TurnEvent>>, event: TurnEvent) {
    if let Some(tx) = events {
        if tx.send(event).await.is_err() {
            tracing::debug!("Turn event receiver dropped");
        }
    }
}

fn build_context(
    history: &ConversationHistory,
    instructions: Option<&str>,
    window: usize,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(window + 1);
    if let Some(text) = instructions {
        messages.push(ChatMessage::system(text));
    }
    messages.extend_from_slice(history.context(window));
    messages
}

/// Stream one model invocation, forwarding fragments and collecting the reply.
async fn stream_response(
    provider: &dyn Provider,
    messages: &[ChatMessage],
    streaming: bool,
    events: Option<&mpsc::Sender<TurnEvent>>,
    transcript: &mut String,
) -> Result<String, providers::StreamError> {
    let mut full_response = String::new();
    let mut fragments = providers::complete(provider, messages, streaming);

    while let Some(fragment) = fragments.next().await {
        let fragment = fragment?;
        full_response.push_str(&fragment);
        transcript.push_str(&fragment);
        emit(events, TurnEvent::Fragment(fragment)).await;
    }

    Ok(full_response)
}

/// Run one user turn to completion.
///
/// The user message must already be in `history`. The model is invoked,
/// tool calls in its reply are executed against `files` and fed back as
/// system messages, and the model is invoked again until it stops calling
/// tools or `max_iterations` invocations have happened. Without `files` the
/// reply is never scanned for tool calls.
pub async fn run_turn(
    provider: &dyn Provider,
    history: &mut ConversationHistory,
    files: Option<&FileManager>,
    options: &TurnOptions,
    events: Option<&mpsc::Sender<TurnEvent>>,
) -> Result<TurnOutcome> {
    let max_iterations = options.max_iterations.max(1);
    let instructions = files.map(|f| build_tool_instructions(f.current_dir()));

    let mut transcript = String::new();
    let mut tool_results = Vec::new();
    let mut invocations = 0;
    let mut cap_reached = false;

    let response = loop {
        let messages = build_context(history, instructions.as_deref(), options.context_window);
        invocations += 1;
        tracing::debug!(
            session = %history.session_id,
            iteration = invocations,
            messages = messages.len(),
            "Invoking model"
        );

        let full_response = match stream_response(
            provider,
            &messages,
            options.streaming,
            events,
            &mut transcript,
        )
        .await
        {
            Ok(text) => text,
            Err(err) => {
                let description = err.to_string();
                tracing::warn!(provider = provider.name(), "Completion failed: {description}");
                emit(events, TurnEvent::Error(description.clone())).await;
                anyhow::bail!("{} completion failed: {description}", provider.name());
            }
        };

        let Some(files) = files else {
            break full_response;
        };
        let calls = extract_tool_calls(&full_response);
        if calls.is_empty() {
            break full_response;
        }
        if invocations >= max_iterations {
            tracing::warn!(
                max_iterations,
                pending = calls.len(),
                "Tool iteration cap reached; pending tool calls not executed"
            );
            cap_reached = true;
            emit(
                events,
                TurnEvent::IterationCapReached {
                    pending_calls: calls.len(),
                },
            )
            .await;
            break full_response;
        }

        for call in calls {
            let outcome = execute_tool_call(&call, files);
            let display = format_tool_result(&call.tool, &outcome);
            transcript.push('\n');
            transcript.push_str(&display);
            transcript.push('\n');
            emit(
                events,
                TurnEvent::ToolResult {
                    tool: call.tool.clone(),
                    display,
                },
            )
            .await;
            history.add_system_message(tool_feedback_message(&call.tool, &outcome));
            tool_results.push(ToolExecution { call, outcome });
        }
    };

    history.add_assistant_message(response.clone());

    Ok(TurnOutcome {
        response,
        transcript,
        tool_results,
        invocations,
        cap_reached,
    })
}
