/// Keeps the conversation inside its token budget.
///
/// Two compression strategies, applied in priority order until the target
/// is reached or there's nothing left to compress:
///
/// 1. Metadata rewrite for `tool` messages — free, no model call. Driven by
///    what the context tracker already knows about the file/modification a
///    tool result refers to.
/// 2. LLM summarization for `user`/`assistant` messages — a real model call
///    with a tight token budget, run through the same four-tool bounded
///    driver loop the rest of the agent uses for tool-calling, so it can be
///    interrupted, retried, or bail out to the deterministic fallback below
///    without special-casing this one caller.
///
/// The last `protected_count` user/assistant messages are never touched.
use anyhow::Result;
use serde_json::{json, Value};

use crate::client::{Client, Tool};
use crate::context_tracker::ContextTracker;
use crate::message_store::{MessageStore, Role};
use crate::token_tracker::TokenTracker;

#[derive(Debug, Clone)]
pub struct CompressionConfig {
    /// Fraction of `max_context` above which compression fires.
    pub trigger_fraction: f64,
    /// Fraction of `max_context` compression aims to leave behind.
    pub target_fraction: f64,
    /// Newest user/assistant messages exempt from compression.
    pub protected_count: usize,
    /// Inner-loop round budget for the LLM-driven driver before falling
    /// back to the deterministic algorithm.
    pub driver_max_rounds: usize,
    /// Characters kept per estimated token when the LLM fallback truncates
    /// instead of summarizing (used when the model call itself fails).
    pub truncation_chars_per_token: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            trigger_fraction: 0.70,
            target_fraction: 0.40,
            protected_count: 5,
            driver_max_rounds: 15,
            truncation_chars_per_token: 4,
        }
    }
}

/// Checkpoint entry point: called from the main loop after a tool-executor
/// iteration settles or after a model turn with no further tool calls.
/// Synchronous from the caller's perspective — a turn in compression
/// produces no assistant output until it returns.
pub async fn checkpoint(
    store: &mut MessageStore,
    tracker: &ContextTracker,
    tokens: &mut TokenTracker,
    client: &Client,
    max_context: usize,
    cfg: &CompressionConfig,
) -> Result<bool> {
    if !tokens.should_compress(max_context, cfg.trigger_fraction) {
        return Ok(false);
    }
    let target = tokens.target(max_context, cfg.target_fraction);
    compress(store, tracker, tokens, client, target, cfg).await?;
    Ok(true)
}

/// Indices of the `protected_count` newest user/assistant messages —
/// copied verbatim, never rewritten.
fn protected_indices(store: &MessageStore, protected_count: usize) -> std::collections::HashSet<usize> {
    let mut protected = std::collections::HashSet::new();
    let mut found = 0;
    for (i, m) in store.iter().enumerate().rev() {
        if found >= protected_count {
            break;
        }
        if matches!(m.role, Role::User | Role::Assistant) {
            protected.insert(i);
            found += 1;
        }
    }
    protected
}

pub async fn compress(
    store: &mut MessageStore,
    tracker: &ContextTracker,
    tokens: &mut TokenTracker,
    client: &Client,
    target: usize,
    cfg: &CompressionConfig,
) -> Result<()> {
    let protected = protected_indices(store, cfg.protected_count);

    // Pass 1: metadata rewrites for tool messages — free, always tried first.
    compress_tool_messages(store, tracker, &protected);
    tokens.retrack_all(store.iter());
    if tokens.total() <= target {
        return Ok(());
    }

    // Pass 2: LLM-driven summarization of dialogue, via the bounded driver.
    let driver_result = run_driver(store, tracker, &protected, tokens, client, target, cfg).await;
    tokens.retrack_all(store.iter());
    if tokens.total() <= target || driver_result.is_err() {
        if driver_result.is_err() {
            fallback_trim(store, &protected, tokens, target, cfg);
            tokens.retrack_all(store.iter());
        }
        return Ok(());
    }

    // Driver made progress but didn't reach target within its round budget —
    // finish with the deterministic fallback rather than spending more model
    // calls on it.
    fallback_trim(store, &protected, tokens, target, cfg);
    tokens.retrack_all(store.iter());
    if tokens.total() > target {
        crate::debug::context_log(format!(
            "compression did not reach target: total={} target={} (best achievable with current protected tail)",
            tokens.total(),
            target,
        ));
    }
    Ok(())
}

// ── Pass 1: tool-result metadata rewrite ───────────────────────────────────────

fn compress_tool_messages(store: &mut MessageStore, tracker: &ContextTracker, protected: &std::collections::HashSet<usize>) {
    let len = store.len();
    for i in 0..len {
        if protected.contains(&i) {
            continue;
        }
        let Some(m) = store.get(i) else { continue };
        if m.role != Role::Tool {
            continue;
        }
        if is_already_compressed(&m.content) {
            continue;
        }
        let rewritten = rewrite_tool_result(&m.content, tracker);
        store.replace_content_at(i, rewritten, None);
    }
}

fn is_already_compressed(content: &str) -> bool {
    content.starts_with("📄 [Compressed]") || content.starts_with("✏️ [Compressed]") || content.starts_with("🔧 [Compressed]")
}

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Detect the tool-result subtype from its serialized content and produce
/// the corresponding compressed marker string.
fn rewrite_tool_result(content: &str, tracker: &ContextTracker) -> String {
    if let Some(path) = extract_tool_path(content) {
        if let Some(record) = tracker.file_read_record(&path) {
            let lines = content.lines().count();
            if let Some(curated) = &record.curated_result {
                let summary = truncate_chars(&curated.summary, 200);
                return format!(
                    "📄 [Compressed] Read {path} ({lines} lines, hash:{:016x}) • {summary} • Full content cached",
                    record.original_hash
                );
            }
            return format!("📄 [Compressed] Read {path} ({lines} lines)");
        }
        if let Some(modif) = tracker.latest_modification_for(&path) {
            let verb = match modif.kind {
                crate::context_tracker::ModificationKind::Created => "Created",
                crate::context_tracker::ModificationKind::Modified => "Modified",
                crate::context_tracker::ModificationKind::Deleted => "Deleted",
            };
            let elapsed_minutes = (now_secs() - modif.timestamp).max(0) / 60;
            let todo_note = modif
                .related_todo
                .as_ref()
                .map(|t| format!("\n• Related to todo: '{t}'"))
                .unwrap_or_default();
            return format!("✏️ [Compressed] {verb} {path} ({elapsed_minutes} min ago){todo_note}");
        }
    }
    "🔧 [Compressed] Tool executed successfully".to_string()
}

/// Pull the file path out of a tool result. Covers both shapes the tools in
/// this agent produce: `read_file`'s leading `[path ...]`/`[path — ...]`
/// header, and `write_file`/`edit_file`'s `"✓ Wrote/Edited/Appended ... path
/// (...)"` one-liner.
fn extract_tool_path(content: &str) -> Option<String> {
    if let Some(rest) = content.strip_prefix('[') {
        let end = rest.find([' ', ']'])?;
        let path = &rest[..end];
        if !path.is_empty() {
            return Some(path.to_string());
        }
    }

    let first_line = content.lines().next()?;
    let rest = first_line.strip_prefix("✓ ")?;
    let mut words = rest.split_whitespace();
    let verb = words.next()?;
    match verb {
        "Wrote" | "Edited" => words.next().map(|p| p.trim_end_matches(['.', ':']).to_string()),
        "Appended" => {
            // "✓ Appended {n} lines to {path}" — path is the word after "to".
            let mut iter = words.peekable();
            while let Some(w) = iter.next() {
                if w == "to" {
                    return iter.next().map(|p| p.trim_end_matches(['.', ':']).to_string());
                }
            }
            None
        }
        _ => None,
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    s.chars().take(max).collect()
}

// ── Pass 2: bounded tool-calling driver for dialogue summarization ────────────

fn compression_tool_defs() -> Vec<Tool> {
    vec![
        Tool {
            name: "get_compression_metadata".to_string(),
            description: "Return the current total estimated tokens, the target, and the list of compressible (non-protected) message indices with their role and approximate size.".to_string(),
            parameters: json!({"type": "object", "properties": {}}),
        },
        Tool {
            name: "compress_tool_result".to_string(),
            description: "Rewrite a single tool-result message to its compressed metadata form, using the context tracker's file-read/modification records.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "index": {"type": "integer"},
                    "strategy": {
                        "type": "string",
                        "enum": ["use_curator_cache", "use_modification_metadata", "generic"],
                        "description": "Which metadata source to render from; the engine falls back automatically if the chosen source isn't available for this message."
                    }
                },
                "required": ["index"]
            }),
        },
        Tool {
            name: "compress_conversation_segment".to_string(),
            description: "Replace a contiguous range of non-protected user/assistant messages with a single summarized system message.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "start": {"type": "integer"},
                    "end": {"type": "integer"},
                    "summary": {"type": "string", "description": "1-2 sentence summary preserving intent and technical detail"}
                },
                "required": ["start", "end", "summary"]
            }),
        },
        Tool {
            name: "verify_compression_target".to_string(),
            description: "Check whether the store is now at or below target. Call this after making changes.".to_string(),
            parameters: json!({"type": "object", "properties": {}}),
        },
    ]
}

const DRIVER_SYSTEM_PROMPT: &str = "You are the context compression driver for a coding assistant. \
Your only job is to reduce the conversation below its token target using the four tools provided. \
Never touch protected message indices. Prefer compress_conversation_segment for old user/assistant \
exchanges, oldest first. Call verify_compression_target after each change, and stop calling tools \
once it reports success.";

async fn run_driver(
    store: &mut MessageStore,
    tracker: &ContextTracker,
    protected: &std::collections::HashSet<usize>,
    tokens: &mut TokenTracker,
    client: &Client,
    target: usize,
    cfg: &CompressionConfig,
) -> Result<()> {
    let tool_defs = compression_tool_defs();

    for _round in 0..cfg.driver_max_rounds {
        tokens.retrack_all(store.iter());
        if tokens.total() <= target {
            return Ok(());
        }

        let status = driver_status_message(store, protected, tokens, target);
        let request = vec![crate::client::Message {
            role: "user".to_string(),
            content: crate::client::MessageContent::Text(status),
            tool_calls: Vec::new(),
        }];

        let response = client.chat(DRIVER_SYSTEM_PROMPT, &request, &tool_defs, |_| {}).await?;
        if response.tool_calls.is_empty() {
            // The driver gave up or thinks it's done; let the caller decide
            // whether the fallback is still needed.
            return Ok(());
        }

        for call in &response.tool_calls {
            let args: Value = serde_json::from_str(&call.arguments).unwrap_or(json!({}));
            let _ = apply_driver_tool(store, tracker, protected, &call.name, &args, target);
        }
    }

    Ok(())
}

fn driver_status_message(
    store: &MessageStore,
    protected: &std::collections::HashSet<usize>,
    tokens: &TokenTracker,
    target: usize,
) -> String {
    let mut compressible = Vec::new();
    for (i, m) in store.iter().enumerate() {
        if protected.contains(&i) || m.role == Role::DisplayOnly || m.role == Role::System {
            continue;
        }
        compressible.push(format!("{i}:{:?}({} chars)", m.role, m.content.len()));
    }
    format!(
        "total_tokens={} target={} compressible=[{}]",
        tokens.total(),
        target,
        compressible.join(", ")
    )
}

fn apply_driver_tool(
    store: &mut MessageStore,
    tracker: &ContextTracker,
    protected: &std::collections::HashSet<usize>,
    name: &str,
    args: &Value,
    _target: usize,
) -> Result<String> {
    match name {
        "get_compression_metadata" => Ok("ok".to_string()),
        "compress_tool_result" => {
            let index = args["index"].as_u64().ok_or_else(|| anyhow::anyhow!("missing index"))? as usize;
            if protected.contains(&index) {
                return Err(anyhow::anyhow!("index {index} is protected"));
            }
            // `strategy` is advisory — rewrite_tool_result already picks the
            // richest form the context tracker actually has data for (curator
            // cache > modification metadata > generic), so an unavailable
            // requested strategy degrades gracefully rather than erroring.
            if let Some(m) = store.get(index) {
                if m.role == Role::Tool && !is_already_compressed(&m.content) {
                    let rewritten = rewrite_tool_result(&m.content, tracker);
                    store.replace_content_at(index, rewritten, None);
                }
            }
            Ok("compressed".to_string())
        }
        "compress_conversation_segment" => {
            let start = args["start"].as_u64().ok_or_else(|| anyhow::anyhow!("missing start"))? as usize;
            let end = args["end"].as_u64().ok_or_else(|| anyhow::anyhow!("missing end"))? as usize;
            let summary = args["summary"].as_str().unwrap_or("").to_string();
            if (start..=end).any(|i| protected.contains(&i)) {
                return Err(anyhow::anyhow!("range overlaps protected messages"));
            }
            store.replace_content_at(start, format!("💭 [Compressed Segment: messages {start}-{end}] {summary}"), Some(Role::System));
            if end > start {
                store.remove_range(start + 1, end);
            }
            Ok("compressed".to_string())
        }
        "verify_compression_target" => Ok("checked".to_string()),
        other => Err(anyhow::anyhow!("unknown compression tool: {other}")),
    }
}

// ── Deterministic fallback (no model call) ─────────────────────────────────────

/// Zero-model-call compression, used when the driver errors out or doesn't
/// reach target within its round budget. Compresses in strict priority
/// order: largest non-protected tool messages first, then oldest
/// non-protected assistant messages, then oldest non-protected user
/// messages — stopping as soon as the target is met.
fn fallback_trim(
    store: &mut MessageStore,
    protected: &std::collections::HashSet<usize>,
    tokens: &mut TokenTracker,
    target: usize,
    cfg: &CompressionConfig,
) {
    // Tool messages, largest first.
    let mut tool_indices: Vec<usize> = (0..store.len())
        .filter(|i| !protected.contains(i) && store.get(*i).map(|m| m.role == Role::Tool).unwrap_or(false))
        .collect();
    tool_indices.sort_by_key(|i| std::cmp::Reverse(store.get(*i).map(|m| m.content.len()).unwrap_or(0)));
    for i in tool_indices {
        if current_total(store, tokens) <= target {
            return;
        }
        if let Some(m) = store.get(i) {
            if !m.content.starts_with("🔧 [Compressed]") {
                store.replace_content_at(i, "🔧 [Compressed] Tool executed successfully".to_string(), None);
            }
        }
    }

    // Assistant messages, oldest first.
    truncate_role_oldest_first(store, protected, Role::Assistant, tokens, target, cfg);
    // User messages, oldest first.
    truncate_role_oldest_first(store, protected, Role::User, tokens, target, cfg);
}

fn truncate_role_oldest_first(
    store: &mut MessageStore,
    protected: &std::collections::HashSet<usize>,
    role: Role,
    tokens: &mut TokenTracker,
    target: usize,
    cfg: &CompressionConfig,
) {
    let indices: Vec<usize> = (0..store.len())
        .filter(|i| !protected.contains(i) && store.get(*i).map(|m| m.role == role).unwrap_or(false))
        .collect();
    for i in indices {
        if current_total(store, tokens) <= target {
            return;
        }
        if let Some(m) = store.get(i) {
            if m.content.starts_with("💬 [Compressed") {
                continue;
            }
            // Keep roughly 100 tokens' worth of the original text.
            let budget_chars = 100 * cfg.truncation_chars_per_token;
            let truncated = truncate_chars(&m.content, budget_chars);
            store.replace_content_at(i, format!("💬 [Compressed/Truncated] {truncated}"), None);
        }
    }
}

fn current_total(store: &MessageStore, tokens: &mut TokenTracker) -> usize {
    tokens.retrack_all(store.iter());
    tokens.total()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context_tracker::{ContextTracker, ReadMode};
    use crate::message_store::{Message, ToolCallRef};

    fn make_store_with_turns(n: usize) -> MessageStore {
        let mut store = MessageStore::new();
        for t in 0..n {
            store.append(Message::user(format!("user turn {t}"), 0));
            store.append(Message::assistant(format!("assistant reply {t}"), Vec::new(), 0));
        }
        store
    }

    #[test]
    fn test_protected_indices_are_last_n_dialogue_messages() {
        let store = make_store_with_turns(10);
        let protected = protected_indices(&store, 5);
        assert_eq!(protected.len(), 5);
        assert!(protected.contains(&(store.len() - 1)));
        assert!(!protected.contains(&0));
    }

    #[test]
    fn test_tool_rewrite_uses_context_tracker_curated_summary() {
        let mut store = MessageStore::new();
        store.append(Message::user("read it", 0));
        store.append(Message::assistant(
            "",
            vec![ToolCallRef { id: "c1".into(), name: "read_file".into(), arguments: "{}".into() }],
            0,
        ));
        store.append(Message::tool_result("c1", "[/tmp/x.rs]\n\n   1 | fn main() {}\n", 0));

        let mut tracker = ContextTracker::new();
        tracker.track_file_read("/tmp/x.rs", "fn main() {}", ReadMode::Full, None);
        tracker.attach_curator_cache("/tmp/x.rs", "entry point, does nothing yet".into(), 1);

        let protected: std::collections::HashSet<usize> = std::collections::HashSet::new();
        compress_tool_messages(&mut store, &tracker, &protected);

        let content = &store.get(2).unwrap().content;
        assert!(content.starts_with("📄 [Compressed] Read /tmp/x.rs"));
        assert!(content.contains("entry point"));
    }

    #[test]
    fn test_tool_rewrite_detects_edit_result_path() {
        let mut store = MessageStore::new();
        store.append(Message::user("fix it", 0));
        store.append(Message::assistant(
            "",
            vec![ToolCallRef { id: "c1".into(), name: "edit_file".into(), arguments: "{}".into() }],
            0,
        ));
        store.append(Message::tool_result("c1", "✓ Edited /tmp/auth.rs (1 replacement)", 0));

        let mut tracker = ContextTracker::new();
        tracker.track_modification("/tmp/auth.rs", crate::context_tracker::ModificationKind::Modified, None, Some("task_2".into()));

        let protected: std::collections::HashSet<usize> = std::collections::HashSet::new();
        compress_tool_messages(&mut store, &tracker, &protected);

        let content = &store.get(2).unwrap().content;
        assert!(content.starts_with("✏️ [Compressed] Modified /tmp/auth.rs"));
        assert!(content.contains("task_2"));
    }

    #[test]
    fn test_driver_compress_tool_result_uses_curator_cache() {
        // S2: the driver's `compress_tool_result` tool — not just the pass-1
        // batch rewrite — must also reach the context tracker for the
        // curated-summary form.
        let mut store = MessageStore::new();
        store.append(Message::tool_result("c1", "[app.src]\n\n".to_string() + &"   1 | line\n".repeat(1200), 0));

        let mut tracker = ContextTracker::new();
        tracker.track_file_read("app.src", "content", ReadMode::Full, None);
        tracker.attach_curator_cache("app.src", "Main loop with streaming…".into(), 42);

        let protected: std::collections::HashSet<usize> = std::collections::HashSet::new();
        let result = apply_driver_tool(&mut store, &tracker, &protected, "compress_tool_result", &json!({"index": 0, "strategy": "use_curator_cache"}), 0);
        assert!(result.is_ok());

        let content = &store.get(0).unwrap().content;
        assert!(content.starts_with("📄 [Compressed] Read app.src (1201 lines, hash:"));
        assert!(content.contains("Main loop with streaming…"));
        assert_eq!(store.get(0).unwrap().role, Role::Tool);
        assert_eq!(store.get(0).unwrap().tool_call_id.as_deref(), Some("c1"));
    }

    #[test]
    fn test_driver_compress_tool_result_rejects_protected_index() {
        let mut store = MessageStore::new();
        store.append(Message::tool_result("c1", "anything", 0));
        let tracker = ContextTracker::new();
        let mut protected = std::collections::HashSet::new();
        protected.insert(0);
        let result = apply_driver_tool(&mut store, &tracker, &protected, "compress_tool_result", &json!({"index": 0}), 0);
        assert!(result.is_err());
    }

    #[test]
    fn test_modification_rewrite_matches_s3_exact_format() {
        let mut store = MessageStore::new();
        store.append(Message::tool_result("c1", "✓ Edited auth.src (1 replacement)", 0));

        let mut tracker = ContextTracker::new();
        tracker.track_modification("auth.src", crate::context_tracker::ModificationKind::Modified, None, Some("task_2".into()));
        // Backdate the record by 2 minutes so the rendered elapsed time is deterministic.
        tracker.backdate_latest_modification("auth.src", 120);

        let protected: std::collections::HashSet<usize> = std::collections::HashSet::new();
        compress_tool_messages(&mut store, &tracker, &protected);

        assert_eq!(
            store.get(0).unwrap().content,
            "✏️ [Compressed] Modified auth.src (2 min ago)\n• Related to todo: 'task_2'"
        );
    }

    #[test]
    fn test_fallback_trim_never_touches_protected() {
        let mut store = make_store_with_turns(8);
        let protected = protected_indices(&store, 5);
        let protected_content_before: Vec<String> = protected.iter().map(|&i| store.get(i).unwrap().content.clone()).collect();

        let mut tokens = TokenTracker::new();
        tokens.retrack_all(store.iter());
        let cfg = CompressionConfig::default();
        fallback_trim(&mut store, &protected, &mut tokens, 1, &cfg);

        for (idx, &i) in protected.iter().enumerate() {
            assert_eq!(&store.get(i).unwrap().content, &protected_content_before[idx]);
        }
    }
}
