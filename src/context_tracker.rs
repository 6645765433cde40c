/// Tracks what the agent has read, changed, and is currently working on this
/// session. The hot-context injector queries this to build its situational
/// preamble; the compression engine queries it to decide whether a
/// `read_file` tool result can be safely rewritten to a one-liner.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::tools::read::file_hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    Full,
    Curated,
    Lines,
}

#[derive(Debug, Clone)]
pub struct CuratedResult {
    /// Hash of the conversational context the curator summarized against,
    /// so a summary produced for a different turn is never reused blindly.
    pub conversation_hash: u64,
    pub summary: String,
}

#[derive(Debug, Clone)]
pub struct FileReadRecord {
    pub path: PathBuf,
    pub original_hash: u64,
    pub last_read_turn: usize,
    pub mode: ReadMode,
    pub line_range: Option<(usize, usize)>,
    pub curated_result: Option<CuratedResult>,
    _read_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModificationKind {
    Created,
    Modified,
    Deleted,
}

#[derive(Debug, Clone)]
pub struct ModificationRecord {
    pub path: PathBuf,
    pub kind: ModificationKind,
    /// Unix seconds — needed (unlike `FileReadRecord`'s turn counter) because
    /// the compressed tool-result form renders a `{Δt in minutes}` elapsed
    /// string (§4.E / S3), not a turn count.
    pub timestamp: i64,
    pub summary: Option<String>,
    pub related_todo: Option<String>,
}

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone)]
pub struct TodoRecord {
    pub id: String,
    pub content: String,
    pub status: TodoStatus,
}

/// Bounded ring of modification records — old entries drop silently once
/// full, matching the context tracker's contract that it never fails a
/// request for lack of space.
const MODIFICATION_RING_CAP: usize = 200;

#[derive(Debug, Default)]
pub struct ContextTracker {
    files: HashMap<PathBuf, FileReadRecord>,
    modifications: Vec<ModificationRecord>,
    todos: Vec<TodoRecord>,
    active_todo: Option<String>,
    /// path -> set of todo ids that touched it, keyed off the active todo at
    /// the time of the read/write.
    files_touched_for_todo: HashMap<String, Vec<PathBuf>>,
    current_turn: usize,
}

impl ContextTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_turn(&mut self) {
        self.current_turn += 1;
    }

    pub fn current_turn(&self) -> usize {
        self.current_turn
    }

    fn canonical(path: &str) -> PathBuf {
        Path::new(path)
            .canonicalize()
            .unwrap_or_else(|_| PathBuf::from(path))
    }

    pub fn track_file_read(&mut self, path: &str, content: &str, mode: ReadMode, line_range: Option<(usize, usize)>) {
        let key = Self::canonical(path);
        let hash = file_hash(content);
        let keep_curated = self
            .files
            .get(&key)
            .and_then(|r| if r.original_hash == hash { r.curated_result.clone() } else { None });

        self.files.insert(
            key.clone(),
            FileReadRecord {
                path: key.clone(),
                original_hash: hash,
                last_read_turn: self.current_turn,
                mode,
                line_range,
                curated_result: keep_curated,
                _read_at: Instant::now(),
            },
        );

        if let Some(todo_id) = self.active_todo.clone() {
            let list = self.files_touched_for_todo.entry(todo_id).or_default();
            if !list.contains(&key) {
                list.push(key);
            }
        }
    }

    pub fn attach_curator_cache(&mut self, path: &str, summary: String, conversation_hash: u64) {
        let key = Self::canonical(path);
        if let Some(record) = self.files.get_mut(&key) {
            record.curated_result = Some(CuratedResult { conversation_hash, summary });
        }
    }

    pub fn file_read_record(&self, path: &str) -> Option<&FileReadRecord> {
        self.files.get(&Self::canonical(path))
    }

    pub fn track_modification(&mut self, path: &str, kind: ModificationKind, summary: Option<String>, related_todo: Option<String>) {
        let key = Self::canonical(path);
        self.modifications.push(ModificationRecord {
            path: key.clone(),
            kind,
            timestamp: now_secs(),
            summary,
            related_todo: related_todo.or_else(|| self.active_todo.clone()),
        });
        if self.modifications.len() > MODIFICATION_RING_CAP {
            self.modifications.remove(0);
        }
        if let Some(todo_id) = self.active_todo.clone() {
            let list = self.files_touched_for_todo.entry(todo_id).or_default();
            if !list.contains(&key) {
                list.push(key);
            }
        }
    }

    /// Test-only hook for making elapsed-time assertions deterministic
    /// instead of racing the wall clock.
    #[cfg(test)]
    pub fn backdate_latest_modification(&mut self, path: &str, seconds_ago: i64) {
        let key = Self::canonical(path);
        if let Some(m) = self.modifications.iter_mut().rev().find(|m| m.path == key) {
            m.timestamp -= seconds_ago;
        }
    }

    pub fn latest_modification_for(&self, path: &str) -> Option<&ModificationRecord> {
        let key = Self::canonical(path);
        self.modifications.iter().rev().find(|m| m.path == key)
    }

    pub fn recent_modifications(&self, n: usize) -> Vec<&ModificationRecord> {
        self.modifications.iter().rev().take(n).collect()
    }

    pub fn set_todos(&mut self, todos: Vec<TodoRecord>) {
        self.todos = todos;
    }

    pub fn set_active_todo(&mut self, id: impl Into<String>) {
        let id = id.into();
        self.active_todo = Some(id.clone());
        self.files_touched_for_todo.entry(id).or_default();
    }

    pub fn clear_active_todo(&mut self) {
        self.active_todo = None;
    }

    pub fn active_todo(&self) -> Option<&TodoRecord> {
        let id = self.active_todo.as_ref()?;
        self.todos.iter().find(|t| &t.id == id)
    }

    pub fn files_touched_for_active_todo(&self) -> &[PathBuf] {
        match &self.active_todo {
            Some(id) => self.files_touched_for_todo.get(id).map(|v| v.as_slice()).unwrap_or(&[]),
            None => &[],
        }
    }

    /// All tracked file records, ordered by path — never by read time. See
    /// the hot-context injector for why this ordering is load-bearing.
    pub fn files_by_path(&self) -> Vec<&FileReadRecord> {
        let mut out: Vec<&FileReadRecord> = self.files.values().collect();
        out.sort_by(|a, b| a.path.cmp(&b.path));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_file_read_then_lookup() {
        let mut t = ContextTracker::new();
        t.track_file_read("/tmp/does_not_exist_abc.rs", "fn main() {}", ReadMode::Full, None);
        let rec = t.file_read_record("/tmp/does_not_exist_abc.rs").unwrap();
        assert_eq!(rec.original_hash, file_hash("fn main() {}"));
        assert_eq!(rec.mode, ReadMode::Full);
    }

    #[test]
    fn test_curated_cache_invalidated_on_hash_change() {
        let mut t = ContextTracker::new();
        t.track_file_read("/tmp/f.rs", "v1", ReadMode::Full, None);
        t.attach_curator_cache("/tmp/f.rs", "summary of v1".into(), 42);
        assert!(t.file_read_record("/tmp/f.rs").unwrap().curated_result.is_some());

        // Re-read with different content — cache must be dropped.
        t.track_file_read("/tmp/f.rs", "v2", ReadMode::Full, None);
        assert!(t.file_read_record("/tmp/f.rs").unwrap().curated_result.is_none());
    }

    #[test]
    fn test_curated_cache_survives_identical_reread() {
        let mut t = ContextTracker::new();
        t.track_file_read("/tmp/g.rs", "same", ReadMode::Full, None);
        t.attach_curator_cache("/tmp/g.rs", "summary".into(), 1);
        t.next_turn();
        t.track_file_read("/tmp/g.rs", "same", ReadMode::Full, None);
        assert!(t.file_read_record("/tmp/g.rs").unwrap().curated_result.is_some());
    }

    #[test]
    fn test_active_todo_tracks_touched_files() {
        let mut t = ContextTracker::new();
        t.set_active_todo("task_1");
        t.track_file_read("/tmp/a.rs", "content", ReadMode::Full, None);
        t.track_modification("/tmp/b.rs", ModificationKind::Modified, None, None);
        assert_eq!(t.files_touched_for_active_todo().len(), 2);
        t.clear_active_todo();
        assert!(t.active_todo().is_none());
    }

    #[test]
    fn test_modification_ring_is_bounded() {
        let mut t = ContextTracker::new();
        for i in 0..(MODIFICATION_RING_CAP + 10) {
            t.track_modification(&format!("/tmp/f{i}.rs"), ModificationKind::Modified, None, None);
        }
        assert_eq!(t.modifications.len(), MODIFICATION_RING_CAP);
    }

    #[test]
    fn test_modification_timestamp_is_recent_and_backdatable() {
        let mut t = ContextTracker::new();
        t.track_modification("/tmp/auth.rs", ModificationKind::Modified, None, None);
        let before = t.latest_modification_for("/tmp/auth.rs").unwrap().timestamp;
        assert!(now_secs() - before < 5);

        t.backdate_latest_modification("/tmp/auth.rs", 120);
        let after = t.latest_modification_for("/tmp/auth.rs").unwrap().timestamp;
        assert_eq!(before - after, 120);
    }

    #[test]
    fn test_files_by_path_is_sorted_lexicographically() {
        let mut t = ContextTracker::new();
        t.track_file_read("/tmp/zeta.rs", "z", ReadMode::Full, None);
        t.track_file_read("/tmp/alpha.rs", "a", ReadMode::Full, None);
        let paths: Vec<_> = t.files_by_path().iter().map(|r| r.path.clone()).collect();
        assert!(paths[0] <= paths[1]);
    }
}
