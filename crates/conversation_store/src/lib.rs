mod error;
mod paths;
mod render;
mod schema;
mod store;

pub use error::ConversationStoreError;
pub use paths::{conversation_file_name, default_store_dir, STORE_DIR};
pub use render::{render_context, DEFAULT_CONTEXT_ENTRIES};
pub use schema::{Conversation, ConversationEntry, RECORD_VERSION};
pub use store::{new_conversation_id, now_rfc3339, ConversationStore};
