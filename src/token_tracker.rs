/// Cheap, fast token accounting. Not a real tokenizer — a documented
/// chars-over-four heuristic, the same one the rest of the agent has always
/// used for proactive budget enforcement. The tracker's only job is to say
/// "are we over the trigger fraction" and "how far below target are we" —
/// it never decides what to compress.
use crate::message_store::{Message, Role};

/// One message's contribution to the running total, recorded as it's
/// appended so `total()` never has to re-walk the whole store.
#[derive(Debug, Clone, Copy)]
pub struct TokenSample {
    pub message_index: usize,
    pub estimated_tokens: usize,
    pub role_is_tool: bool,
}

/// Estimate the token cost of a string: one token per four characters,
/// rounded up (counted over `chars()`, not bytes, so wide UTF-8 text isn't
/// overestimated). This is the pure `⌈len(content)/4⌉` heuristic the spec
/// pins down — per-message wrapper overhead is added separately by
/// `TokenTracker::track`, not folded in here.
pub fn estimate(content: &str) -> usize {
    content.chars().count().div_ceil(4)
}

/// Small fixed overhead per message for role/formatting wrapper tokens,
/// added on top of `estimate()` when a message is tracked.
const MESSAGE_OVERHEAD_TOKENS: usize = 10;

#[derive(Debug, Default)]
pub struct TokenTracker {
    samples: Vec<TokenSample>,
    total: usize,
}

impl TokenTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one message's estimated cost. Safe to call more than once for
    /// the same index if the caller re-tracks after a mutation — callers
    /// should `reset()` first in that case to avoid double counting.
    pub fn track(&mut self, message_index: usize, content: &str, role: &Role) {
        let tokens = estimate(content) + MESSAGE_OVERHEAD_TOKENS;
        self.samples.push(TokenSample {
            message_index,
            estimated_tokens: tokens,
            role_is_tool: *role == Role::Tool,
        });
        self.total += tokens;
    }

    /// Re-sample every message currently in the store. Called after the
    /// compression engine mutates it, since indices and contents may have
    /// shifted.
    pub fn retrack_all<'a>(&mut self, messages: impl Iterator<Item = &'a Message>) {
        self.reset();
        for (i, m) in messages.enumerate() {
            if m.role == Role::DisplayOnly {
                continue;
            }
            self.track(i, &m.content, &m.role);
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn samples(&self) -> &[TokenSample] {
        &self.samples
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.total = 0;
    }

    /// True once the running total exceeds `max_context * trigger_fraction`.
    pub fn should_compress(&self, max_context: usize, trigger_fraction: f64) -> bool {
        self.total as f64 > max_context as f64 * trigger_fraction
    }

    /// Absolute token count the compression engine should aim to leave
    /// behind.
    pub fn target(&self, max_context: usize, target_fraction: f64) -> usize {
        (max_context as f64 * target_fraction) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_is_pure_chars_over_four_ceiling() {
        assert_eq!(estimate(""), 0);
        assert_eq!(estimate("abcd"), 1);
        assert_eq!(estimate("abcde"), 2);
    }

    #[test]
    fn test_track_adds_message_overhead_on_top_of_estimate() {
        let mut t = TokenTracker::new();
        t.track(0, "abcd", &Role::User);
        assert_eq!(t.total(), estimate("abcd") + MESSAGE_OVERHEAD_TOKENS);
    }

    #[test]
    fn test_should_compress_at_trigger_fraction() {
        let mut t = TokenTracker::new();
        t.track(0, &"x".repeat(400), &Role::User); // ~110 tokens
        assert!(!t.should_compress(200, 0.70)); // trigger at 140
        t.track(1, &"y".repeat(4000), &Role::Assistant); // ~1010 more
        assert!(t.should_compress(200, 0.70));
    }

    #[test]
    fn test_reset_clears_samples_and_total() {
        let mut t = TokenTracker::new();
        t.track(0, "hello world", &Role::User);
        assert!(t.total() > 0);
        t.reset();
        assert_eq!(t.total(), 0);
        assert!(t.samples().is_empty());
    }

    #[test]
    fn test_target_is_fraction_of_max_context() {
        let t = TokenTracker::new();
        assert_eq!(t.target(100_000, 0.40), 40_000);
    }
}
