use anyhow::{Context, Result};
use serde_json::Value;
use std::fs;

/// Default max lines returned without an explicit range.
const DEFAULT_MAX_LINES: usize = 150;
/// How many lines of preamble (imports/declarations) to always include.
const PREAMBLE_LINES: usize = 50;
/// How many tail lines to always include.
const TAIL_LINES: usize = 20;

pub fn definition() -> Value {
    serde_json::json!({
        "name": "read_file",
        "description": "Read a file with line numbers and anchor hashes. Returns up to 150 lines by default; pass line_range for a specific section; pass symbols=true to get a function/class index instead of content. Each line is shown as 'N [hash] | content' — pass the 4-char hash to edit_file's anchor field to guard against stale edits.",
        "parameters": {
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path to read"
                },
                "line_range": {
                    "type": "array",
                    "items": { "type": "integer" },
                    "description": "Optional [start, end] (1-indexed, inclusive)"
                },
                "symbols": {
                    "type": "boolean",
                    "description": "Return a symbol index (functions, classes, structs) instead of file content. Useful for navigating large files before requesting a specific line_range."
                }
            },
            "required": ["path"]
        }
    })
}

pub fn execute(args: &Value) -> Result<String> {
    let path = args["path"]
        .as_str()
        .context("read_file: missing 'path'")?;

    let content = fs::read_to_string(path)
        .with_context(|| format!("read_file: cannot read '{path}'"))?;

    let lines: Vec<&str> = content.lines().collect();
    let total = lines.len();

    // Symbol index mode — return function/class/struct definitions with line numbers
    if args["symbols"].as_bool().unwrap_or(false) {
        return Ok(build_symbol_index(&lines, path, total));
    }

    // Explicit range requested
    if let Some(range) = args["line_range"].as_array() {
        let start = range
            .first()
            .and_then(|v| v.as_u64())
            .map(|n| (n as usize).saturating_sub(1))
            .unwrap_or(0)
            .min(total.saturating_sub(1));
        let end = range
            .get(1)
            .and_then(|v| v.as_u64())
            .map(|n| (n as usize).min(total))
            .unwrap_or(total);

        return Ok(format_excerpt(&lines, start, end, total, path));
    }

    // No range — smart excerpt: full file if small enough, else preamble + tail
    if total <= DEFAULT_MAX_LINES {
        return Ok(format_full(&lines, path));
    }

    // Large file: preamble (imports/declarations) + tail, with omission marker
    let preamble_end = PREAMBLE_LINES.min(total);
    let tail_start = total.saturating_sub(TAIL_LINES).max(preamble_end);

    let mut out = String::new();
    out.push_str(&format!(
        "[{path} — {total} lines total, hash:{}. Showing preamble (1-{preamble_end}) and tail ({}-{total}). Use symbols=true to find definitions, or line_range=[start,end] to read a section.]\n\n",
        file_hash_hex(&content),
        tail_start + 1
    ));
    for (i, line) in lines[..preamble_end].iter().enumerate() {
        out.push_str(&format_line(i + 1, line));
    }
    if tail_start > preamble_end {
        out.push_str(&format!("\n     ... ({} lines omitted) ...\n\n", tail_start - preamble_end));
    }
    for (i, line) in lines[tail_start..].iter().enumerate() {
        out.push_str(&format_line(tail_start + i + 1, line));
    }

    Ok(out)
}

/// Scan the file for top-level symbol definitions and return them with line numbers.
/// Covers Rust, TypeScript/JavaScript, Python, Go, and C/C++ patterns.
fn build_symbol_index(lines: &[&str], path: &str, total: usize) -> String {
    // Patterns: (label, prefix to match after trimming)
    // We do simple prefix/contains matching — no regex dep needed.
    let mut symbols: Vec<(usize, String)> = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim();
        if let Some(label) = classify_symbol(trimmed) {
            symbols.push((i + 1, label));
        }
    }

    if symbols.is_empty() {
        return format!(
            "[{path} — {total} lines. No top-level symbols found. Use line_range to read sections.]\n"
        );
    }

    let mut out = format!("[{path} — {total} lines. Symbol index:]\n\n");
    for (line_no, label) in &symbols {
        out.push_str(&format!("{line_no:4} | {label}\n"));
    }
    out.push_str("\nUse line_range=[start,end] to read any section.\n");
    out
}

/// Classify a trimmed line as a named symbol, returning a short label, or None.
fn classify_symbol(line: &str) -> Option<String> {
    // Skip blank lines and comment lines
    if line.is_empty() || line.starts_with("//") || line.starts_with('#')
        || line.starts_with('*') || line.starts_with("/*")
    {
        return None;
    }

    // Rust: fn, pub fn, async fn, pub async fn, struct, enum, impl, trait, mod, const, type
    for prefix in &["pub async fn ", "pub fn ", "async fn ", "fn ",
                    "pub struct ", "struct ",
                    "pub enum ", "enum ",
                    "impl ", "pub trait ", "trait ",
                    "pub mod ", "mod ",
                    "pub const ", "const ",
                    "pub type ", "type "] {
        if line.starts_with(prefix) {
            let rest = &line[prefix.len()..];
            let name = rest.split(|c: char| !c.is_alphanumeric() && c != '_').next().unwrap_or(rest);
            if !name.is_empty() {
                return Some(format!("{} {name}", prefix.trim_end()));
            }
        }
    }

    // TypeScript/JavaScript: function, class, interface, type, const/let/var (arrow fns), export
    for prefix in &["export default function ", "export function ", "export class ",
                    "export interface ", "export type ", "export enum ",
                    "export const ", "export async function ",
                    "function ", "class ", "interface ", "async function "] {
        if line.starts_with(prefix) {
            let rest = &line[prefix.len()..];
            let name = rest.split(|c: char| c == '(' || c == '<' || c == ' ' || c == ':').next().unwrap_or(rest);
            if !name.is_empty() {
                return Some(format!("{}{name}", prefix.trim_end()));
            }
        }
    }

    // Python: def, class, async def
    for prefix in &["async def ", "def ", "class "] {
        if line.starts_with(prefix) {
            let rest = &line[prefix.len()..];
            let name = rest.split(|c: char| c == '(' || c == ':').next().unwrap_or(rest);
            if !name.is_empty() {
                return Some(format!("{prefix}{name}"));
            }
        }
    }

    // Go: func
    if line.starts_with("func ") {
        let rest = &line[5..];
        let name = rest.split(|c: char| c == '(' || c == ' ').next().unwrap_or(rest);
        if !name.is_empty() {
            return Some(format!("func {name}"));
        }
    }

    // C/C++: very rough — skip for now (too noisy without a real parser)

    None
}

fn format_full(lines: &[&str], path: &str) -> String {
    let mut out = format!("[{path} — hash:{}]\n\n", file_hash_hex(&lines.join("\n")));
    for (i, line) in lines.iter().enumerate() {
        out.push_str(&format_line(i + 1, line));
    }
    out
}

fn format_excerpt(lines: &[&str], start: usize, end: usize, total: usize, path: &str) -> String {
    let end = end.min(total);
    let mut out = format!(
        "[{path} — lines {}-{} of {}]\n\n",
        start + 1,
        end,
        total
    );
    for (i, line) in lines[start..end].iter().enumerate() {
        out.push_str(&format_line(start + i + 1, line));
    }
    out
}

/// Render a single line with its 1-indexed line number and anchor hash:
/// `"  42 [a3f2] | fn foo() {"`. This is the only format `edit_file`'s anchor
/// field validates against (see `line_hash`).
pub fn format_line(line_no: usize, line: &str) -> String {
    format!("{:4} [{}] | {}\n", line_no, line_hash(line), line)
}

/// 4 hex-char anchor hash for a single line's exact content (whitespace-sensitive).
/// Not a security hash — collisions are acceptable, the anchor only needs to
/// detect "this file changed since I read it" with high probability.
pub fn line_hash(line: &str) -> String {
    let mut h: u32 = 2166136261; // FNV-1a offset basis
    for b in line.as_bytes() {
        h ^= *b as u32;
        h = h.wrapping_mul(16777619);
    }
    format!("{:04x}", h & 0xffff)
}

/// 64-bit content hash for a whole file, used by the context tracker to detect
/// whether a previously-read file changed on disk.
pub fn file_hash(content: &str) -> u64 {
    let mut h: u64 = 14695981039346656037; // FNV-1a 64-bit offset basis
    for b in content.as_bytes() {
        h ^= *b as u64;
        h = h.wrapping_mul(1099511628211);
    }
    h
}

fn file_hash_hex(content: &str) -> String {
    format!("{:016x}", file_hash(content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_hash_stable() {
        assert_eq!(line_hash("fn foo() {"), line_hash("fn foo() {"));
        assert_ne!(line_hash("fn foo() {"), line_hash("fn bar() {"));
    }

    #[test]
    fn test_line_hash_is_four_hex_chars() {
        let h = line_hash("let x = 1;");
        assert_eq!(h.len(), 4);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_file_hash_changes_with_content() {
        let a = file_hash("hello\nworld\n");
        let b = file_hash("hello\nworld!\n");
        assert_ne!(a, b);
        assert_eq!(a, file_hash("hello\nworld\n"));
    }

    #[test]
    fn test_rust_symbols_basic() {
        assert!(classify_symbol("pub fn foo() {").is_some());
        assert!(classify_symbol("// not a symbol").is_none());
    }
}
