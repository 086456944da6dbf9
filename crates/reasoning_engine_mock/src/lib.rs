//! Deterministic scripted implementation of the shared `reasoning_engine` contract.
//!
//! This crate contains no transport/protocol logic and is intended for local
//! development and loop-level integration testing. Each call to
//! [`ScriptedEngine::respond`] pops the next scripted step; once the script
//! is exhausted the engine answers with its fallback step.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use reasoning_engine::{
    EngineError, EngineProfile, EngineRequest, EngineResponse, InputItem, OutputItem,
    ReasoningEngine, Role,
};
use serde_json::Value;

/// Stable engine identifier used for explicit startup selection.
pub const MOCK_ENGINE_ID: &str = "mock";

/// One scripted engine reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    /// Respond with these output items.
    Respond(Vec<OutputItem>),
    /// Fail the exchange.
    Fail(EngineError),
    /// Respond with a single message echoing the newest user text.
    Echo,
}

impl ScriptStep {
    /// A reply holding one message with `text`.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Respond(vec![OutputItem::Message {
            segments: vec![text.into()],
        }])
    }

    /// A reply holding one function call.
    #[must_use]
    pub fn tool_call(name: impl Into<String>, call_id: impl Into<String>, arguments: Value) -> Self {
        Self::Respond(vec![OutputItem::FunctionCall {
            name: name.into(),
            call_id: Some(call_id.into()),
            arguments: arguments.to_string(),
        }])
    }

    /// A reply with no output items at all.
    #[must_use]
    pub fn empty() -> Self {
        Self::Respond(Vec::new())
    }
}

#[derive(Debug)]
struct ScriptState {
    steps: VecDeque<ScriptStep>,
    requests: Vec<EngineRequest>,
    next_response: u64,
}

/// Deterministic engine used by loop tests and `LRM_RELAY_ENGINE=mock` runs.
#[derive(Debug)]
pub struct ScriptedEngine {
    model_id: String,
    fallback: ScriptStep,
    state: Mutex<ScriptState>,
}

impl ScriptedEngine {
    /// Creates an engine replaying `steps` in order, then echoing.
    #[must_use]
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self::with_fallback(steps, ScriptStep::Echo)
    }

    /// Creates an engine replaying `steps`, then repeating `fallback` forever.
    #[must_use]
    pub fn with_fallback(steps: Vec<ScriptStep>, fallback: ScriptStep) -> Self {
        Self {
            model_id: "mock".to_string(),
            fallback,
            state: Mutex::new(ScriptState {
                steps: steps.into(),
                requests: Vec::new(),
                next_response: 1,
            }),
        }
    }

    /// Returns every request received so far, oldest first.
    #[must_use]
    pub fn requests(&self) -> Vec<EngineRequest> {
        lock_unpoisoned(&self.state).requests.clone()
    }

    /// Returns how many exchanges were served.
    #[must_use]
    pub fn call_count(&self) -> usize {
        lock_unpoisoned(&self.state).requests.len()
    }
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl ReasoningEngine for ScriptedEngine {
    fn profile(&self) -> EngineProfile {
        EngineProfile {
            engine_id: MOCK_ENGINE_ID.to_string(),
            model_id: self.model_id.clone(),
        }
    }

    async fn respond(&self, request: EngineRequest) -> Result<EngineResponse, EngineError> {
        let mut state = lock_unpoisoned(&self.state);
        let step = state
            .steps
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        let response_id = format!("mock_resp_{}", state.next_response);
        state.next_response += 1;

        let output = match step {
            ScriptStep::Respond(output) => output,
            ScriptStep::Fail(error) => {
                state.requests.push(request);
                return Err(error);
            }
            ScriptStep::Echo => vec![OutputItem::Message {
                segments: vec![echo_text(&request.input)],
            }],
        };
        state.requests.push(request);

        Ok(EngineResponse {
            id: Some(response_id),
            output,
        })
    }
}

fn echo_text(input: &[InputItem]) -> String {
    input
        .iter()
        .rev()
        .find_map(|item| match item {
            InputItem::Message {
                role: Role::User,
                text,
            } => Some(format!("[mock] {text}")),
            _ => None,
        })
        .unwrap_or_else(|| "[mock] no user input".to_string())
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use reasoning_engine::{Level, ToolChoice};
    use serde_json::json;

    use super::*;

    fn request(text: &str) -> EngineRequest {
        EngineRequest {
            instructions: String::new(),
            input: vec![InputItem::user(text)],
            tools: Vec::new(),
            tool_choice: ToolChoice::Auto,
            previous_response_id: None,
            reasoning_effort: Level::Medium,
            search_context_size: Level::Medium,
        }
    }

    #[tokio::test]
    async fn steps_replay_in_order_then_fall_back_to_echo() {
        let engine = ScriptedEngine::new(vec![
            ScriptStep::tool_call("view", "c1", json!({"file_path": "/tmp/x"})),
            ScriptStep::text("final"),
        ]);

        let first = engine.respond(request("task")).await.expect("first");
        assert!(matches!(first.output[0], OutputItem::FunctionCall { .. }));
        assert_eq!(first.id.as_deref(), Some("mock_resp_1"));

        let second = engine.respond(request("task")).await.expect("second");
        assert_eq!(second.message_text(), "final");

        let third = engine.respond(request("again")).await.expect("third");
        assert_eq!(third.message_text(), "[mock] again");
        assert_eq!(engine.call_count(), 3);
    }

    #[tokio::test]
    async fn fail_step_returns_error_and_records_request() {
        let engine = ScriptedEngine::new(vec![ScriptStep::Fail(EngineError::Transport(
            "offline".to_string(),
        ))]);

        let error = engine.respond(request("x")).await.expect_err("must fail");
        assert_eq!(error, EngineError::Transport("offline".to_string()));
        assert_eq!(engine.requests().len(), 1);
    }

    #[test]
    fn profile_exposes_mock_identity() {
        let profile = ScriptedEngine::default().profile();
        assert_eq!(profile.engine_id, MOCK_ENGINE_ID);
        assert_eq!(profile.model_id, "mock");
    }
}
