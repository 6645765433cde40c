/// Env-gated verbose tracing. `DEBUG_CONTEXT` covers the context-management
/// core (tracker, compression, hot-context, the raw model stream); the
/// sibling `DEBUG_GRAPHRAG` / `DEBUG_WEB_TOOLS` flags are recognized for
/// consistency with the rest of the agent but gate subsystems this binary
/// doesn't carry. No other environment input is read.
use std::sync::OnceLock;

fn flag_set(var: &str) -> bool {
    std::env::var(var).map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false)
}

pub fn context_enabled() -> bool {
    static FLAG: OnceLock<bool> = OnceLock::new();
    *FLAG.get_or_init(|| flag_set("DEBUG_CONTEXT"))
}

/// Write one line to stderr, only when `DEBUG_CONTEXT=1`.
pub fn context_log(msg: impl std::fmt::Display) {
    if context_enabled() {
        eprintln!("[context] {msg}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_log_silent_by_default() {
        // Doesn't panic or write when the env var is unset; nothing to
        // assert on stderr, just that it doesn't blow up.
        context_log("probe");
    }
}
