use std::fmt::Write as _;

use crate::schema::Conversation;

/// Number of prior entries re-injected into a new request by default.
pub const DEFAULT_CONTEXT_ENTRIES: usize = 10;

/// Renders the most recent `max_entries` entries as a chronological transcript.
///
/// Returns an empty string when there is nothing to render.
#[must_use]
pub fn render_context(conversation: &Conversation, max_entries: usize) -> String {
    if conversation.entries.is_empty() || max_entries == 0 {
        return String::new();
    }

    let total = conversation.entries.len();
    let skip = total.saturating_sub(max_entries);
    let shown = total - skip;

    let mut out = String::new();
    let _ = writeln!(
        out,
        "Previous conversation ({shown} of {total} exchanges, oldest first):"
    );

    for (index, entry) in conversation.entries.iter().enumerate().skip(skip) {
        let _ = writeln!(out);
        let _ = writeln!(out, "[{}] {}", index + 1, entry.timestamp);
        let _ = writeln!(out, "User: {}", entry.input.trim());
        if let Some(paths) = entry.file_paths.as_ref().filter(|paths| !paths.is_empty()) {
            let _ = writeln!(out, "Files: {}", paths.join(", "));
        }
        let _ = writeln!(out, "Assistant: {}", entry.response.trim());
    }

    out
}
