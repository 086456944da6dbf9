#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use conversation_store::ConversationStore;
use lrm_relay::{BackendError, Dispatcher, LoopController, ToolBackend};
use reasoning_engine_mock::{ScriptStep, ScriptedEngine};
use serde_json::{json, Value};

type Responder = Box<dyn Fn(&str, &Value) -> Result<Value, BackendError> + Send + Sync>;

/// In-memory tool backend that records every call it receives.
pub struct FakeBackend {
    calls: Mutex<Vec<(String, Value)>>,
    responder: Responder,
}

impl FakeBackend {
    /// Answers every call with `"<tool> ok"` as a single text item.
    pub fn new() -> Arc<Self> {
        Self::with_responder(|name, _| {
            Ok(json!({ "content": [{ "type": "text", "text": format!("{name} ok") }] }))
        })
    }

    pub fn with_responder<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&str, &Value) -> Result<Value, BackendError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            responder: Box::new(responder),
        })
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        lock_unpoisoned(&self.calls).clone()
    }

    pub fn call_names(&self) -> Vec<String> {
        self.calls().into_iter().map(|(name, _)| name).collect()
    }
}

#[async_trait]
impl ToolBackend for FakeBackend {
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, BackendError> {
        lock_unpoisoned(&self.calls).push((name.to_string(), arguments.clone()));
        (self.responder)(name, &arguments)
    }
}

pub struct Harness {
    pub engine: Arc<ScriptedEngine>,
    pub backend: Arc<FakeBackend>,
    pub store: Arc<ConversationStore>,
    pub controller: LoopController,
}

impl Harness {
    pub fn new(dir: &Path, steps: Vec<ScriptStep>) -> Self {
        Self::with_backend(dir, ScriptedEngine::new(steps), FakeBackend::new())
    }

    pub fn with_backend(dir: &Path, engine: ScriptedEngine, backend: Arc<FakeBackend>) -> Self {
        let engine = Arc::new(engine);
        let store = Arc::new(ConversationStore::open(dir).expect("open store"));
        let controller = LoopController::new(
            engine.clone(),
            Dispatcher::new(backend.clone()),
            Arc::clone(&store),
        )
        .with_session_conversation_id("session");
        Self {
            engine,
            backend,
            store,
            controller,
        }
    }
}

pub fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
