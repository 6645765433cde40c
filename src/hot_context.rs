/// Builds the small, cache-stable "situational" preamble injected as a
/// system message just before the newest user message on every turn.
///
/// The one constraint that matters more than any other here: the model
/// server's attention cache is keyed on the prompt prefix being byte-
/// identical to a prior request. Any change — a re-sorted file list, a
/// "3 minutes ago" string, a per-turn counter — invalidates the cache and
/// costs real wall-clock time on the next call. So: no wall-clock text, no
/// recency sort, and section headers that never change shape.
use crate::context_tracker::ContextTracker;
use crate::message_store::Message;

/// How many of the most recent messages to scan for file-path mentions when
/// deciding whether a tracked file is "relevant" to the current turn.
const RECENT_MESSAGE_LOOKBACK: usize = 5;
/// How many recent modifications to list.
const MAX_RECENT_MODIFICATIONS: usize = 10;

pub fn generate(tracker: &ContextTracker, recent_messages: &[Message]) -> Option<String> {
    let mut sections: Vec<String> = Vec::new();

    if let Some(files_section) = relevant_files_section(tracker, recent_messages) {
        sections.push(files_section);
    }
    if let Some(mods_section) = recent_modifications_section(tracker) {
        sections.push(mods_section);
    }
    if let Some(todo_section) = active_todo_section(tracker) {
        sections.push(todo_section);
    }

    if sections.is_empty() {
        return None;
    }

    Some(format!("# Situational context\n\n{}\n", sections.join("\n\n")))
}

fn relevant_files_section(tracker: &ContextTracker, recent_messages: &[Message]) -> Option<String> {
    let touched = tracker.files_touched_for_active_todo();
    let lookback: Vec<&str> = recent_messages
        .iter()
        .rev()
        .take(RECENT_MESSAGE_LOOKBACK)
        .map(|m| m.content.as_str())
        .collect();

    let mut lines: Vec<String> = Vec::new();
    // files_by_path() is already lexicographically sorted — never by recency.
    for record in tracker.files_by_path() {
        let path_str = record.path.to_string_lossy();
        let relevant = touched.contains(&record.path)
            || lookback.iter().any(|msg| msg.contains(path_str.as_ref()));
        if !relevant {
            continue;
        }
        let note = match &record.curated_result {
            Some(c) => format!(" — {}", truncate(&c.summary, 160)),
            None => String::new(),
        };
        lines.push(format!("- {path_str}{note}"));
    }

    if lines.is_empty() {
        return None;
    }
    Some(format!("## Relevant files\n{}", lines.join("\n")))
}

fn recent_modifications_section(tracker: &ContextTracker) -> Option<String> {
    let mods = tracker.recent_modifications(MAX_RECENT_MODIFICATIONS);
    if mods.is_empty() {
        return None;
    }
    let mut lines = Vec::new();
    for m in mods.iter().rev() {
        let kind = match m.kind {
            crate::context_tracker::ModificationKind::Created => "created",
            crate::context_tracker::ModificationKind::Modified => "modified",
            crate::context_tracker::ModificationKind::Deleted => "deleted",
        };
        let path_str = m.path.to_string_lossy();
        let summary = m.summary.as_deref().map(|s| format!(" — {s}")).unwrap_or_default();
        lines.push(format!("- {kind} {path_str}{summary}"));
    }
    Some(format!("## Recent modifications\n{}", lines.join("\n")))
}

fn active_todo_section(tracker: &ContextTracker) -> Option<String> {
    let todo = tracker.active_todo()?;
    let files = tracker.files_touched_for_active_todo();
    let files_line = if files.is_empty() {
        String::new()
    } else {
        let list = files.iter().map(|p| p.to_string_lossy().to_string()).collect::<Vec<_>>().join(", ");
        format!("\nFiles touched: {list}")
    };
    Some(format!("## Active task\n{} ({}){files_line}", todo.content, todo.id))
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let truncated: String = s.chars().take(max_chars).collect();
    format!("{truncated}…")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context_tracker::{ContextTracker, ModificationKind, ReadMode, TodoRecord, TodoStatus};

    #[test]
    fn test_empty_tracker_yields_no_injection() {
        let tracker = ContextTracker::new();
        assert!(generate(&tracker, &[]).is_none());
    }

    #[test]
    fn test_unrelated_file_is_not_listed() {
        let mut tracker = ContextTracker::new();
        tracker.track_file_read("/tmp/unrelated.rs", "content", ReadMode::Full, None);
        let out = generate(&tracker, &[]);
        assert!(out.is_none());
    }

    #[test]
    fn test_mentioned_file_is_listed() {
        let mut tracker = ContextTracker::new();
        tracker.track_file_read("/tmp/auth.rs", "content", ReadMode::Full, None);
        let msgs = vec![Message::user("fix the bug in /tmp/auth.rs", 0)];
        let out = generate(&tracker, &msgs).unwrap();
        assert!(out.contains("/tmp/auth.rs"));
    }

    #[test]
    fn test_output_is_stable_across_identical_calls() {
        let mut tracker = ContextTracker::new();
        tracker.set_active_todo("task_1");
        tracker.set_todos(vec![TodoRecord { id: "task_1".into(), content: "ship it".into(), status: TodoStatus::InProgress }]);
        tracker.track_modification("/tmp/a.rs", ModificationKind::Modified, None, None);
        let first = generate(&tracker, &[]);
        let second = generate(&tracker, &[]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_file_order_is_lexicographic_not_recency() {
        let mut tracker = ContextTracker::new();
        tracker.set_active_todo("t");
        tracker.set_todos(vec![TodoRecord { id: "t".into(), content: "x".into(), status: TodoStatus::InProgress }]);
        tracker.track_file_read("/tmp/z.rs", "z", ReadMode::Full, None);
        tracker.track_file_read("/tmp/a.rs", "a", ReadMode::Full, None);
        let out = generate(&tracker, &[]).unwrap();
        let a_pos = out.find("/tmp/a.rs").unwrap();
        let z_pos = out.find("/tmp/z.rs").unwrap();
        assert!(a_pos < z_pos);
    }
}
