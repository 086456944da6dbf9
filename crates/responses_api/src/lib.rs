//! Transport-only client primitives for a Responses-style reasoning endpoint.
//!
//! This crate owns request building, header construction, and SSE stream
//! parsing for the `/responses` endpoint only. It contains no loop control,
//! no tool execution, and no retry policy: every call is a single attempt.
//!
//! Output items are surfaced as raw JSON through
//! [`ResponsesStreamEvent::OutputItemDone`] so adapters decide how to map
//! message and function-call items.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod headers;
pub mod payload;
pub mod sse;
pub mod url;

pub use client::ResponsesApiClient;
pub use client::StreamResult;
pub use config::ResponsesApiConfig;
pub use error::ResponsesApiError;
pub use events::{ResponseStatus, ResponsesStreamEvent};
pub use payload::ResponsesRequest;
pub use sse::SseStreamParser;
pub use url::normalize_responses_url;
