use serde::{Deserialize, Serialize};

pub const RECORD_VERSION: u32 = 1;

/// Durable record of one conversation. Entries are append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Conversation {
    pub version: u32,
    pub id: String,
    pub created_at: String,
    pub updated_at: String,
    pub entries: Vec<ConversationEntry>,
}

impl Conversation {
    #[must_use]
    pub fn new(id: impl Into<String>, created_at: impl Into<String>) -> Self {
        let created_at = created_at.into();
        Self {
            version: RECORD_VERSION,
            id: id.into(),
            updated_at: created_at.clone(),
            created_at,
            entries: Vec::new(),
        }
    }
}

/// One request/response round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConversationEntry {
    pub timestamp: String,
    pub input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_paths: Option<Vec<String>>,
    pub response: String,
}
