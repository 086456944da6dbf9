//! Environment configuration.

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use reasoning_engine::Level;
use thiserror::Error;

use crate::backend::{DEFAULT_HEALTH_CHECK_INTERVAL, DEFAULT_TOOL_SERVER_COMMAND};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "o3";
pub const DEFAULT_MAX_ITERATIONS: usize = 30;

pub const ENV_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_ORGANIZATION: &str = "OPENAI_ORGANIZATION";
pub const ENV_PROJECT: &str = "OPENAI_PROJECT";
pub const ENV_BASE_URL: &str = "LRM_RELAY_BASE_URL";
pub const ENV_MODEL: &str = "LRM_RELAY_MODEL";
pub const ENV_REASONING_EFFORT: &str = "LRM_RELAY_REASONING_EFFORT";
pub const ENV_SEARCH_CONTEXT_SIZE: &str = "LRM_RELAY_SEARCH_CONTEXT_SIZE";
pub const ENV_MAX_ITERATIONS: &str = "LRM_RELAY_MAX_ITERATIONS";
pub const ENV_CONTEXT_ENTRIES: &str = "LRM_RELAY_CONTEXT_ENTRIES";
pub const ENV_CONVERSATION_DIR: &str = "LRM_RELAY_CONVERSATION_DIR";
pub const ENV_TOOL_SERVER: &str = "LRM_RELAY_TOOL_SERVER";
pub const ENV_HEALTH_CHECK_SECS: &str = "LRM_RELAY_HEALTH_CHECK_SECS";
pub const ENV_ENGINE: &str = "LRM_RELAY_ENGINE";
pub const ENV_INSTRUCTIONS: &str = "LRM_RELAY_INSTRUCTIONS";
pub const ENV_TIMEOUT_SECS: &str = "LRM_RELAY_TIMEOUT_SECS";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid {key}={value:?}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("{ENV_API_KEY} must be set when using the responses engine")]
    MissingApiKey,
    #[error("no conversation directory: set {ENV_CONVERSATION_DIR}")]
    NoConversationDir,
}

/// Which reasoning engine implementation to start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EngineKind {
    #[default]
    Responses,
    Mock,
}

impl EngineKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Responses => "responses",
            Self::Mock => "mock",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "responses" => Ok(Self::Responses),
            "mock" => Ok(Self::Mock),
            other => Err(format!("unknown engine '{other}'; expected responses or mock")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub engine: EngineKind,
    pub api_key: Option<String>,
    pub organization: Option<String>,
    pub project: Option<String>,
    pub base_url: String,
    pub model: String,
    pub reasoning_effort: Level,
    pub search_context_size: Level,
    pub max_iterations: usize,
    pub context_entries: usize,
    pub conversation_dir: PathBuf,
    pub tool_server_command: String,
    pub health_check_interval: Duration,
    pub instructions: Option<String>,
    pub timeout: Option<Duration>,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_string_opt)
    }

    /// Builds the config from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let conversation_dir = match get(ENV_CONVERSATION_DIR) {
            Some(dir) => PathBuf::from(dir),
            None => conversation_store::default_store_dir(),
        };
        if conversation_dir.as_os_str().is_empty() {
            return Err(ConfigError::NoConversationDir);
        }

        Ok(Self {
            engine: parse_or(ENV_ENGINE, get(ENV_ENGINE), EngineKind::default())?,
            api_key: get(ENV_API_KEY),
            organization: get(ENV_ORGANIZATION),
            project: get(ENV_PROJECT),
            base_url: get(ENV_BASE_URL).unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: get(ENV_MODEL).unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            reasoning_effort: parse_or(
                ENV_REASONING_EFFORT,
                get(ENV_REASONING_EFFORT),
                Level::default(),
            )?,
            search_context_size: parse_or(
                ENV_SEARCH_CONTEXT_SIZE,
                get(ENV_SEARCH_CONTEXT_SIZE),
                Level::default(),
            )?,
            max_iterations: positive(
                ENV_MAX_ITERATIONS,
                get(ENV_MAX_ITERATIONS),
                DEFAULT_MAX_ITERATIONS,
            )?,
            context_entries: parse_or(
                ENV_CONTEXT_ENTRIES,
                get(ENV_CONTEXT_ENTRIES),
                conversation_store::DEFAULT_CONTEXT_ENTRIES,
            )?,
            conversation_dir,
            tool_server_command: get(ENV_TOOL_SERVER)
                .unwrap_or_else(|| DEFAULT_TOOL_SERVER_COMMAND.to_string()),
            health_check_interval: match get(ENV_HEALTH_CHECK_SECS) {
                Some(value) => Duration::from_secs(positive(
                    ENV_HEALTH_CHECK_SECS,
                    Some(value),
                    1,
                )?),
                None => DEFAULT_HEALTH_CHECK_INTERVAL,
            },
            instructions: get(ENV_INSTRUCTIONS),
            timeout: get(ENV_TIMEOUT_SECS)
                .map(|value| positive(ENV_TIMEOUT_SECS, Some(value), 1))
                .transpose()?
                .map(Duration::from_secs),
        })
    }

    /// Checks settings that only matter for the selected engine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine == EngineKind::Responses && self.api_key.is_none() {
            return Err(ConfigError::MissingApiKey);
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::InvalidValue {
                key: ENV_MAX_ITERATIONS,
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_or<T>(key: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match value {
        None => Ok(default),
        Some(value) => match value.trim().parse() {
            Ok(parsed) => Ok(parsed),
            Err(error) => Err(ConfigError::InvalidValue {
                key,
                reason: error.to_string(),
                value,
            }),
        },
    }
}

fn positive<T>(key: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default + Copy,
    T::Err: fmt::Display,
{
    let parsed = parse_or(key, value.clone(), default)?;
    if parsed <= T::default() {
        return Err(ConfigError::InvalidValue {
            key,
            value: value.unwrap_or_default(),
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(parsed)
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        if value.trim().is_empty() {
            None
        } else {
            Some(value)
        }
    })
}
