/// Doom-loop detection for the tool-calling agent loop.
///
/// Proactive token budgeting itself lives in `token_tracker` and
/// `compression` now — this module keeps only the piece that has no
/// counterpart there: guarding against a model that keeps reissuing the
/// same tool call with the same arguments.
#[derive(Default)]
pub struct LoopDetector {
    recent: Vec<(String, String)>, // (tool_name, args_fingerprint)
}

impl LoopDetector {
    /// Record a tool call. Returns true if a loop is detected.
    pub fn record(&mut self, tool_name: &str, args: &str) -> bool {
        // Fingerprint: tool name + first 200 chars of args (cheap, good enough)
        let fp = format!("{tool_name}::{}", &args[..args.len().min(200)]);

        // Keep last 5
        self.recent.push((tool_name.to_string(), fp.clone()));
        if self.recent.len() > 5 {
            self.recent.remove(0);
        }

        // Loop = same fingerprint appears twice in recent history
        let count = self.recent.iter().filter(|(_, f)| f == &fp).count();
        count >= 2
    }

    pub fn clear(&mut self) {
        self.recent.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_detector_fires_on_second_identical_call() {
        let mut d = LoopDetector::default();
        assert!(!d.record("read_file", r#"{"path":"a.rs"}"#));
        assert!(d.record("read_file", r#"{"path":"a.rs"}"#));
    }

    #[test]
    fn test_loop_detector_ignores_distinct_calls() {
        let mut d = LoopDetector::default();
        assert!(!d.record("read_file", r#"{"path":"a.rs"}"#));
        assert!(!d.record("read_file", r#"{"path":"b.rs"}"#));
    }

    #[test]
    fn test_clear_resets_history() {
        let mut d = LoopDetector::default();
        d.record("bash", "ls");
        d.clear();
        assert!(!d.record("bash", "ls"));
    }
}
