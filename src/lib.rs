//! Tool-augmented reasoning relay.
//!
//! A calling agent hands a task to [`LoopController::reason`]. The controller
//! sends it to a reasoning engine together with a fixed tool schema, runs any
//! requested tools through the [`Dispatcher`], feeds results back, and stops
//! once the engine answers in plain text or the iteration cap is reached.
//! Finished exchanges are kept per conversation id and replayed as context on
//! later tasks.
//!
//! ## Surfaces
//!
//! - [`server::RelayServer`] answers line-delimited JSON-RPC on stdio and
//!   exposes `reason`, `reset_conversation`, and direct tool pass-through.
//! - [`backend::ChildProcessBackend`] drives the `lrm-tool-server` child that
//!   actually reads, edits, and searches files.
//!
//! ## Gated tools
//!
//! `write` and `bash` only run when their arguments carry `confirm: "yes"`.
//! Anything else is refused before the backend is contacted.

pub mod backend;
pub mod config;
pub mod controller;
pub mod diff;
pub mod dispatch;
pub mod logging;
pub mod normalize;
pub mod server;

pub use backend::{BackendError, ChildProcessBackend, ChildProcessConfig, ToolBackend};
pub use config::{ConfigError, EngineKind, RelayConfig};
pub use controller::{
    LoopController, ReasonOutcome, ReasonRequest, RelayError, ToolTraceEntry, EXHAUSTION_FALLBACK,
};
pub use diff::{DiffBuilder, DiffError, DiffRequest, DiffResult, DiffSummary};
pub use dispatch::{tool_definitions, Dispatcher, ToolName};
pub use normalize::{normalize_result, ToolResult};
pub use server::RelayServer;
