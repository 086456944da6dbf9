//! The bounded reasoning loop.
//!
//! One [`LoopController::reason`] call renders prior conversation context,
//! optionally attaches a git diff and file contents, then alternates engine
//! calls and tool dispatch until the engine answers with text and no tool
//! calls, or the iteration cap is reached. The finished exchange is appended
//! to the conversation store.

use std::path::Path;
use std::sync::Arc;

use conversation_store::{
    new_conversation_id, render_context, ConversationStore, ConversationStoreError,
    DEFAULT_CONTEXT_ENTRIES,
};
use futures_util::future::join_all;
use reasoning_engine::{
    EngineError, EngineRequest, InputItem, Level, OutputItem, ReasoningEngine, ToolChoice,
    ToolDefinition,
};
use serde_json::Value;
use thiserror::Error;
use tracing::Instrument;

use crate::config::DEFAULT_MAX_ITERATIONS;
use crate::diff::{DiffBuilder, DiffError, DiffRequest};
use crate::dispatch::{tool_definitions, Dispatcher};
use crate::normalize::ToolResult;

pub const EXHAUSTION_FALLBACK: &str =
    "I was unable to produce a final answer within the allowed number of reasoning steps.";

pub const DEFAULT_INSTRUCTIONS: &str = "You are a careful senior engineer helping another coding agent. \
Work through the task step by step and use the available tools to inspect files, search code, and run commands when that helps. \
The write and bash tools only run when their confirm argument is exactly \"yes\"; use them only when the task clearly asks for changes or command execution. \
File paths passed to tools should be absolute. \
When you have enough information, reply with a complete, self-contained answer and no further tool calls.";

const TRACE_SNIPPET_CHARS: usize = 120;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("prompt must not be empty")]
    EmptyPrompt,
    #[error(transparent)]
    Diff(#[from] DiffError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("failed to persist conversation: {0}")]
    Store(#[from] ConversationStoreError),
}

/// One caller task for the loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReasonRequest {
    pub prompt: String,
    /// Absolute paths whose contents are attached to the first request.
    pub files: Vec<String>,
    /// Falls back to the session default when absent or blank.
    pub conversation_id: Option<String>,
    pub diff: Option<DiffRequest>,
}

/// Summary of one dispatched tool call, rendered in the final trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolTraceEntry {
    pub tool: String,
    pub arguments: String,
    pub is_error: bool,
    pub first_line: String,
}

impl ToolTraceEntry {
    fn new(tool: &str, arguments: &str, result: &ToolResult) -> Self {
        let output = result.joined_text();
        Self {
            tool: tool.to_string(),
            arguments: truncate_chars(arguments, TRACE_SNIPPET_CHARS),
            is_error: result.is_error,
            first_line: truncate_chars(output.lines().next().unwrap_or_default(), TRACE_SNIPPET_CHARS),
        }
    }

    #[must_use]
    pub fn render(&self) -> String {
        let status = if self.is_error { "error" } else { "ok" };
        format!(
            "- {}({}) → {status}: {}",
            self.tool, self.arguments, self.first_line
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasonOutcome {
    /// Final answer followed by the tool-usage section, as persisted.
    pub text: String,
    pub conversation_id: String,
    /// Engine calls made.
    pub iterations: usize,
    pub tool_calls: Vec<ToolTraceEntry>,
    /// True when the cap was reached and the fallback text was used.
    pub exhausted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingCall {
    name: String,
    call_id: String,
    arguments: String,
}

pub struct LoopController {
    engine: Arc<dyn ReasoningEngine>,
    dispatcher: Dispatcher,
    store: Arc<ConversationStore>,
    diff_builder: DiffBuilder,
    tools: Vec<ToolDefinition>,
    instructions: String,
    max_iterations: usize,
    context_entries: usize,
    reasoning_effort: Level,
    search_context_size: Level,
    session_conversation_id: String,
}

impl LoopController {
    /// Creates a controller with a fresh session conversation id.
    #[must_use]
    pub fn new(
        engine: Arc<dyn ReasoningEngine>,
        dispatcher: Dispatcher,
        store: Arc<ConversationStore>,
    ) -> Self {
        Self {
            engine,
            dispatcher,
            store,
            diff_builder: DiffBuilder::new("."),
            tools: tool_definitions(),
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            context_entries: DEFAULT_CONTEXT_ENTRIES,
            reasoning_effort: Level::default(),
            search_context_size: Level::default(),
            session_conversation_id: new_conversation_id(),
        }
    }

    /// Caps engine calls per task. Values below 1 are raised to 1.
    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    #[must_use]
    pub fn with_context_entries(mut self, context_entries: usize) -> Self {
        self.context_entries = context_entries;
        self
    }

    #[must_use]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    #[must_use]
    pub fn with_reasoning_effort(mut self, level: Level) -> Self {
        self.reasoning_effort = level;
        self
    }

    #[must_use]
    pub fn with_search_context_size(mut self, level: Level) -> Self {
        self.search_context_size = level;
        self
    }

    #[must_use]
    pub fn with_diff_builder(mut self, diff_builder: DiffBuilder) -> Self {
        self.diff_builder = diff_builder;
        self
    }

    #[must_use]
    pub fn with_session_conversation_id(mut self, conversation_id: impl Into<String>) -> Self {
        self.session_conversation_id = conversation_id.into();
        self
    }

    #[must_use]
    pub fn session_conversation_id(&self) -> &str {
        &self.session_conversation_id
    }

    #[must_use]
    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    #[must_use]
    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Forgets a conversation. Unknown ids are a no-op.
    pub fn reset_conversation(&self, conversation_id: &str) -> Result<(), RelayError> {
        self.store.reset(conversation_id)?;
        Ok(())
    }

    /// Runs one task to completion and records it.
    ///
    /// Diff and engine failures abort the task and nothing is persisted.
    /// Tool failures and unreadable files are reported in-band.
    pub async fn reason(&self, request: ReasonRequest) -> Result<ReasonOutcome, RelayError> {
        if request.prompt.trim().is_empty() {
            return Err(RelayError::EmptyPrompt);
        }

        let conversation_id = request
            .conversation_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .unwrap_or(&self.session_conversation_id)
            .to_string();
        let span = tracing::info_span!("reason", conversation_id = %conversation_id);
        self.reason_in_conversation(request, conversation_id)
            .instrument(span)
            .await
    }

    async fn reason_in_conversation(
        &self,
        request: ReasonRequest,
        conversation_id: String,
    ) -> Result<ReasonOutcome, RelayError> {
        let context = self
            .store
            .get(&conversation_id)
            .map(|conversation| render_context(&conversation, self.context_entries))
            .unwrap_or_default();

        let mut input = Vec::new();
        input.push(InputItem::user(if context.is_empty() {
            request.prompt.clone()
        } else {
            format!("{context}\n\nCurrent request:\n{}", request.prompt)
        }));

        if let Some(diff_request) = &request.diff {
            let diff = self.diff_builder.build(diff_request).await?;
            tracing::debug!(
                files = diff.summary.files_changed,
                lines = diff.line_count,
                "attached git diff"
            );
            input.push(InputItem::system(diff.render()));
        }

        for block in read_files(&request.files).await {
            input.push(InputItem::system(block));
        }

        let outcome = self.run_loop(input).await?;

        let mut text = outcome.answer;
        if !outcome.trace.is_empty() {
            text.push_str("\n\nTools used:\n");
            text.push_str(
                &outcome
                    .trace
                    .iter()
                    .map(ToolTraceEntry::render)
                    .collect::<Vec<_>>()
                    .join("\n"),
            );
        }

        let file_paths = (!request.files.is_empty()).then(|| request.files.clone());
        self.store
            .append(&conversation_id, request.prompt, text.clone(), file_paths)?;

        tracing::info!(
            iterations = outcome.iterations,
            tool_calls = outcome.trace.len(),
            exhausted = outcome.exhausted,
            "task finished"
        );

        Ok(ReasonOutcome {
            text,
            conversation_id,
            iterations: outcome.iterations,
            tool_calls: outcome.trace,
            exhausted: outcome.exhausted,
        })
    }

    async fn run_loop(&self, mut input: Vec<InputItem>) -> Result<LoopOutcome, EngineError> {
        let mut previous_response_id: Option<String> = None;
        let mut trace = Vec::new();

        for iteration in 0..self.max_iterations {
            tracing::debug!(iteration, items = input.len(), "calling reasoning engine");

            let response = self
                .engine
                .respond(EngineRequest {
                    instructions: self.instructions.clone(),
                    input: input.clone(),
                    tools: self.tools.clone(),
                    tool_choice: ToolChoice::Auto,
                    previous_response_id: previous_response_id.clone(),
                    reasoning_effort: self.reasoning_effort,
                    search_context_size: self.search_context_size,
                })
                .await?;

            let calls = pending_calls(&response.output);
            let text = response.message_text();

            if calls.is_empty() {
                if !text.trim().is_empty() {
                    return Ok(LoopOutcome {
                        answer: text,
                        trace,
                        iterations: iteration + 1,
                        exhausted: false,
                    });
                }
                tracing::warn!(iteration, "engine returned neither tool calls nor text");
                continue;
            }

            tracing::debug!(iteration, count = calls.len(), "dispatching tool calls");
            let results = join_all(calls.iter().map(|call| self.run_call(call))).await;
            for (call, result) in calls.iter().zip(results) {
                trace.push(ToolTraceEntry::new(&call.name, &call.arguments, &result));
                input.push(InputItem::function_call_output(
                    call.call_id.clone(),
                    tool_output_text(&result),
                ));
            }

            if response.id.is_some() {
                previous_response_id = response.id;
            }
        }

        tracing::warn!(max_iterations = self.max_iterations, "iteration cap reached");
        Ok(LoopOutcome {
            answer: EXHAUSTION_FALLBACK.to_string(),
            trace,
            iterations: self.max_iterations,
            exhausted: true,
        })
    }

    async fn run_call(&self, call: &PendingCall) -> ToolResult {
        let arguments = if call.arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str::<Value>(&call.arguments) {
                Ok(arguments) => arguments,
                Err(error) => {
                    return ToolResult::error(format!(
                        "invalid JSON arguments for {}: {error}",
                        call.name
                    ));
                }
            }
        };
        self.dispatcher.dispatch(&call.name, &arguments).await
    }
}

struct LoopOutcome {
    answer: String,
    trace: Vec<ToolTraceEntry>,
    iterations: usize,
    exhausted: bool,
}

fn pending_calls(output: &[OutputItem]) -> Vec<PendingCall> {
    output
        .iter()
        .filter_map(|item| match item {
            OutputItem::FunctionCall {
                name,
                call_id,
                arguments,
            } => Some(PendingCall {
                name: name.clone(),
                call_id: call_id
                    .clone()
                    .filter(|id| !id.trim().is_empty())
                    .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple())),
                arguments: arguments.clone(),
            }),
            _ => None,
        })
        .collect()
}

fn tool_output_text(result: &ToolResult) -> String {
    let text = result.joined_text();
    if result.is_error {
        format!("Error: {text}")
    } else {
        text
    }
}

/// Reads each path into a context block. Failures become inline notes.
async fn read_files(paths: &[String]) -> Vec<String> {
    let mut blocks = Vec::with_capacity(paths.len());
    for path in paths {
        if !Path::new(path).is_absolute() {
            blocks.push(format!(
                "File: {path}\n[could not read file: path must be absolute]"
            ));
            continue;
        }
        match tokio::fs::read_to_string(path).await {
            Ok(content) => blocks.push(format!("File: {path}\n```\n{content}\n```")),
            Err(error) => {
                tracing::debug!(path, %error, "attached file unreadable");
                blocks.push(format!("File: {path}\n[could not read file: {error}]"));
            }
        }
    }
    blocks
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cutoff, _)) => format!("{}…", &text[..cutoff]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn trace_entry_renders_first_line_and_status() {
        let entry = ToolTraceEntry::new(
            "view",
            r#"{"file_path":"/tmp/a"}"#,
            &ToolResult::text("1\tfirst\n2\tsecond"),
        );
        assert_eq!(
            entry.render(),
            "- view({\"file_path\":\"/tmp/a\"}) → ok: 1\tfirst"
        );

        let failed = ToolTraceEntry::new("bash", "{}", &ToolResult::error("bash requires confirmation"));
        assert_eq!(failed.render(), "- bash({}) → error: bash requires confirmation");
    }

    #[test]
    fn trace_snippets_are_truncated() {
        let long = "x".repeat(300);
        let entry = ToolTraceEntry::new("grep", &long, &ToolResult::text(long.clone()));
        assert_eq!(entry.arguments.chars().count(), TRACE_SNIPPET_CHARS + 1);
        assert!(entry.first_line.ends_with('…'));
    }

    #[test]
    fn missing_call_ids_are_generated() {
        let calls = pending_calls(&[
            OutputItem::Message {
                segments: vec!["thinking".to_string()],
            },
            OutputItem::FunctionCall {
                name: "list".to_string(),
                call_id: None,
                arguments: "{}".to_string(),
            },
            OutputItem::FunctionCall {
                name: "view".to_string(),
                call_id: Some("call_a".to_string()),
                arguments: "{}".to_string(),
            },
        ]);

        assert_eq!(calls.len(), 2);
        assert!(calls[0].call_id.starts_with("call_"));
        assert!(calls[0].call_id.len() > "call_".len());
        assert_eq!(calls[1].call_id, "call_a");
    }

    #[test]
    fn error_results_are_marked_for_the_engine() {
        assert_eq!(tool_output_text(&ToolResult::text("ok")), "ok");
        assert_eq!(tool_output_text(&ToolResult::error("boom")), "Error: boom");
    }

    #[tokio::test]
    async fn relative_and_missing_files_become_notes() {
        let blocks = read_files(&[
            "relative.txt".to_string(),
            "/definitely/missing/lrm-relay.txt".to_string(),
        ])
        .await;

        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].contains("path must be absolute"), "{}", blocks[0]);
        assert!(blocks[1].starts_with("File: /definitely/missing/lrm-relay.txt\n[could not read file:"));
    }
}
