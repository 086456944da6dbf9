use std::fmt::Write as _;
use std::path::PathBuf;

pub const STORE_DIR: [&str; 2] = ["lrm-relay", "conversations"];

/// Per-user default directory for conversation records.
///
/// Falls back to the current directory when the platform exposes no data dir.
#[must_use]
pub fn default_store_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(STORE_DIR[0])
        .join(STORE_DIR[1])
}

/// Encodes an id into a file stem that is unique per id.
///
/// ASCII alphanumerics and `-` pass through; every other byte, including the
/// `_` escape character itself, becomes `_XX` (uppercase hex).
#[must_use]
pub fn encode_id_for_filename(id: &str) -> String {
    let mut encoded = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            encoded.push(char::from(byte));
        } else {
            let _ = write!(encoded, "_{byte:02X}");
        }
    }
    encoded
}

#[must_use]
pub fn conversation_file_name(conversation_id: &str) -> String {
    format!("{}.json", encode_id_for_filename(conversation_id))
}
