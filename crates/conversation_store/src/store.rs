use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::ConversationStoreError;
use crate::paths::conversation_file_name;
use crate::schema::{Conversation, ConversationEntry, RECORD_VERSION};

type SharedConversation = Arc<Mutex<Conversation>>;

/// Durable per-id conversation index.
///
/// Records are loaded eagerly by [`ConversationStore::open`]. Every append
/// rewrites the whole record for that id while holding the id's lock, so
/// append-then-persist is atomic per conversation.
pub struct ConversationStore {
    dir: PathBuf,
    conversations: Mutex<HashMap<String, SharedConversation>>,
}

impl ConversationStore {
    /// Opens (creating if needed) `dir` and loads every record in it.
    ///
    /// A record that cannot be read or parsed is logged and skipped.
    pub fn open(dir: &Path) -> Result<Self, ConversationStoreError> {
        fs::create_dir_all(dir)
            .map_err(|source| ConversationStoreError::io("creating store directory", dir, source))?;
        let read_dir = fs::read_dir(dir)
            .map_err(|source| ConversationStoreError::io("listing store directory", dir, source))?;

        let mut conversations = HashMap::new();
        for dir_entry in read_dir {
            let path = match dir_entry {
                Ok(dir_entry) => dir_entry.path(),
                Err(error) => {
                    tracing::warn!(dir = %dir.display(), %error, "skipping unreadable store entry");
                    continue;
                }
            };
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            match load_record(&path) {
                Ok(conversation) => {
                    conversations.insert(
                        conversation.id.clone(),
                        Arc::new(Mutex::new(conversation)),
                    );
                }
                Err(error) => {
                    tracing::warn!(path = %path.display(), %error, "skipping conversation record");
                }
            }
        }

        tracing::debug!(
            dir = %dir.display(),
            count = conversations.len(),
            "loaded conversation records"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            conversations: Mutex::new(conversations),
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn record_path(&self, conversation_id: &str) -> PathBuf {
        self.dir.join(conversation_file_name(conversation_id))
    }

    /// Returns a snapshot of the conversation, if known.
    #[must_use]
    pub fn get(&self, conversation_id: &str) -> Option<Conversation> {
        let shared = lock_unpoisoned(&self.conversations)
            .get(conversation_id)
            .cloned()?;
        let snapshot = lock_unpoisoned(&shared).clone();
        Some(snapshot)
    }

    /// Returns known conversation ids in sorted order.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock_unpoisoned(&self.conversations)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Appends one entry, creating the conversation on first write.
    pub fn append(
        &self,
        conversation_id: &str,
        input: impl Into<String>,
        response: impl Into<String>,
        file_paths: Option<Vec<String>>,
    ) -> Result<(), ConversationStoreError> {
        if conversation_id.trim().is_empty() {
            return Err(ConversationStoreError::EmptyConversationId);
        }

        let timestamp = now_rfc3339()?;
        let shared = {
            let mut conversations = lock_unpoisoned(&self.conversations);
            Arc::clone(
                conversations
                    .entry(conversation_id.to_string())
                    .or_insert_with(|| {
                        Arc::new(Mutex::new(Conversation::new(conversation_id, &timestamp)))
                    }),
            )
        };

        let mut conversation = lock_unpoisoned(&shared);
        let mut updated = conversation.clone();
        updated.entries.push(ConversationEntry {
            timestamp: timestamp.clone(),
            input: input.into(),
            file_paths: file_paths.filter(|paths| !paths.is_empty()),
            response: response.into(),
        });
        updated.updated_at = timestamp;

        self.persist(&updated)?;
        *conversation = updated;
        Ok(())
    }

    /// Forgets a conversation and removes its record. Unknown ids are a no-op.
    pub fn reset(&self, conversation_id: &str) -> Result<(), ConversationStoreError> {
        let removed = lock_unpoisoned(&self.conversations).remove(conversation_id);
        let _guard = removed.as_ref().map(|shared| lock_unpoisoned(shared));

        let path = self.record_path(conversation_id);
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(conversation_id, "conversation reset");
                Ok(())
            }
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ConversationStoreError::io(
                "removing conversation record",
                path,
                source,
            )),
        }
    }

    fn persist(&self, conversation: &Conversation) -> Result<(), ConversationStoreError> {
        let path = self.record_path(&conversation.id);
        let serialized = serde_json::to_vec_pretty(conversation)
            .map_err(|source| ConversationStoreError::json_serialize(&path, source))?;

        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, serialized).map_err(|source| {
            ConversationStoreError::io("writing conversation record", &temp_path, source)
        })?;
        fs::rename(&temp_path, &path).map_err(|source| {
            ConversationStoreError::io("replacing conversation record", &path, source)
        })
    }
}

/// Generates a fresh opaque conversation id.
#[must_use]
pub fn new_conversation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn now_rfc3339() -> Result<String, ConversationStoreError> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(ConversationStoreError::ClockFormat)
}

fn load_record(path: &Path) -> Result<Conversation, ConversationStoreError> {
    let bytes = fs::read(path)
        .map_err(|source| ConversationStoreError::io("reading conversation record", path, source))?;
    let conversation: Conversation = serde_json::from_slice(&bytes)
        .map_err(|source| ConversationStoreError::json_parse(path, source))?;

    if conversation.version != RECORD_VERSION {
        return Err(ConversationStoreError::UnsupportedVersion {
            path: path.to_path_buf(),
            found: conversation.version,
        });
    }

    validate_rfc3339(path, "created_at", &conversation.created_at)?;
    validate_rfc3339(path, "updated_at", &conversation.updated_at)?;
    for entry in &conversation.entries {
        validate_rfc3339(path, "timestamp", &entry.timestamp)?;
    }

    Ok(conversation)
}

fn validate_rfc3339(
    path: &Path,
    field: &'static str,
    value: &str,
) -> Result<(), ConversationStoreError> {
    if OffsetDateTime::parse(value, &Rfc3339).is_err() {
        return Err(ConversationStoreError::InvalidTimestamp {
            path: path.to_path_buf(),
            field,
            value: value.to_string(),
        });
    }

    Ok(())
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
