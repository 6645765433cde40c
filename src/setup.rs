/// First-run setup wizard and self-update plumbing.
///
/// Runs once, before the config file exists, to collect the minimum needed
/// to make the first model call (endpoint, model, optional API key) and
/// write it as the `local` profile. Everything else — hooks, MCP servers,
/// compression tuning — keeps its built-in default and is edited later via
/// the config file or `--init`.
use std::io::{self, Write};

use anyhow::Result;

use crate::config::{ConfigFile, Profile};

/// Returns `Ok(true)` if a config file was written, `Ok(false)` if the user
/// skipped the wizard (Ctrl-D / empty input on the first prompt).
pub async fn run_setup_wizard() -> Result<bool> {
    println!("  ▲ parecode — first run");
    println!();
    println!("  No config file found. Let's set up a profile.");
    println!("  (Press Enter to accept the default shown in [brackets], or Ctrl-D to skip.)");
    println!();

    let Some(endpoint) = prompt("  Endpoint", Some("http://localhost:11434"))? else {
        return Ok(false);
    };
    let model = prompt("  Model", Some("qwen3:14b"))?.unwrap_or_else(|| "qwen3:14b".to_string());
    let context = prompt("  Context window (tokens)", Some("32768"))?
        .unwrap_or_else(|| "32768".to_string())
        .parse::<u32>()
        .unwrap_or(32_768);
    let api_key = prompt("  API key (blank for none)", Some(""))?.filter(|s| !s.is_empty());

    let profile = Profile {
        endpoint,
        model,
        context_tokens: context,
        api_key,
        ..Profile::default()
    };

    let mut file = ConfigFile::load().unwrap_or_default();
    file.default_profile = "local".to_string();
    file.profiles.insert("local".to_string(), profile);

    let path = crate::config::config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, toml::to_string_pretty(&file)?)?;

    println!();
    println!("  ✓ wrote {}", path.display());
    Ok(true)
}

/// Prompt on stdout, read a line from stdin. Returns `None` on EOF (Ctrl-D)
/// so the caller can treat that as "skip the wizard" rather than "empty
/// answer".
fn prompt(label: &str, default: Option<&str>) -> Result<Option<String>> {
    match default {
        Some(d) if !d.is_empty() => print!("{label} [{d}]: "),
        _ => print!("{label}: "),
    }
    io::stdout().flush()?;

    let mut line = String::new();
    let read = io::stdin().read_line(&mut line)?;
    if read == 0 {
        return Ok(None);
    }
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(Some(default.unwrap_or("").to_string()));
    }
    Ok(Some(trimmed.to_string()))
}

/// One-time hint about shell completions, shown after the wizard writes a
/// config for the first time. `None` if the current shell can't be guessed.
pub fn shell_completion_hint() -> Option<String> {
    let shell_path = std::env::var("SHELL").ok()?;
    let shell = shell_path.rsplit('/').next().unwrap_or(&shell_path);
    let (rc_file, line) = match shell {
        "zsh" => ("~/.zshrc", "parecode --completions zsh > ~/.zfunc/_parecode"),
        "bash" => ("~/.bashrc", "parecode --completions bash >> ~/.bashrc"),
        "fish" => ("~/.config/fish/completions/parecode.fish", "parecode --completions fish > ~/.config/fish/completions/parecode.fish"),
        _ => return None,
    };
    Some(format!("  tip: enable shell completions ({rc_file}):\n    {line}"))
}

// ── Self-update check (background, non-blocking) ────────────────────────────

/// Queried once at TUI startup on a background task; the result is shown as
/// a system message once it lands, never blocking the first prompt.
pub async fn check_for_update() -> Option<String> {
    let current = env!("CARGO_PKG_VERSION");
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()
        .ok()?;

    let resp = client
        .get("https://api.github.com/repos/PartTimer1996/parecode/releases/latest")
        .header("User-Agent", format!("parecode/{current}"))
        .header("Accept", "application/vnd.github+json")
        .send()
        .await
        .ok()?;
    if !resp.status().is_success() {
        return None;
    }
    let body: serde_json::Value = resp.json().await.ok()?;
    let tag = body["tag_name"].as_str()?;
    let latest = tag.trim_start_matches('v');

    if version_newer(latest, current) {
        Some(format!("⬆ parecode {latest} available (current {current}) — run `parecode --update`"))
    } else {
        None
    }
}

/// Simple dotted-numeric version comparison: `latest > current`.
/// Non-numeric components sort as zero, so "1.2.0-rc1" and "1.2" compare
/// equal, which is the conservative choice for this checker — it never
/// nags about a prerelease component it can't parse.
pub fn version_newer(latest: &str, current: &str) -> bool {
    let parse = |s: &str| -> Vec<u64> {
        s.split('.')
            .map(|p| p.chars().take_while(|c| c.is_ascii_digit()).collect::<String>())
            .map(|p| p.parse::<u64>().unwrap_or(0))
            .collect()
    };
    let l = parse(latest);
    let c = parse(current);
    for i in 0..l.len().max(c.len()) {
        let lv = l.get(i).copied().unwrap_or(0);
        let cv = c.get(i).copied().unwrap_or(0);
        if lv != cv {
            return lv > cv;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_newer_detects_patch_bump() {
        assert!(version_newer("0.1.2", "0.1.1"));
        assert!(!version_newer("0.1.1", "0.1.1"));
        assert!(!version_newer("0.1.0", "0.1.1"));
    }

    #[test]
    fn test_version_newer_handles_prerelease_suffix() {
        assert!(!version_newer("0.2.0-rc1", "0.2.0"));
        assert!(version_newer("0.3.0", "0.2.0-rc1"));
    }
}
