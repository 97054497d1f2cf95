//! Read-only scanning for residual references (used by both the scanner
//! proper and the verifier, which re-scans the same token groups).

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use super::{TokenGroup, TokenPair};
use crate::path::PathSpec;
use crate::vcs::run_checked;

/// A single textual hit for a token.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Hit {
    pub file: PathSpec,
    pub line: usize,
    pub token_group: TokenGroup,
    pub token: String,
    pub snippet: String,
}

/// Read-only scan report: every hit found for the given token groups,
/// bounded by `max_hits` overall and per token.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FollowupScanReport {
    pub tokens_total: usize,
    pub hits: Vec<Hit>,
    pub truncated: bool,
}

/// Scan the repository for every token in `tokens`, preferring `rg` and
/// falling back to `grep`. Hits are capped at `max_hits` per token and
/// `max_hits * tokens.len()` overall.
#[must_use]
pub fn scan(repo_root: &Utf8Path, tokens: &[TokenPair], max_hits: usize) -> FollowupScanReport {
    let mut hits = Vec::new();
    let mut truncated = false;
    let use_rg = command_exists(repo_root, "rg");

    for token in tokens {
        let output = if use_rg {
            run_rg(repo_root, &token.old)
        } else {
            run_grep(repo_root, &token.old)
        };
        let Some(text) = output else { continue };
        let mut count = 0;
        for line in text.lines() {
            if count >= max_hits {
                truncated = true;
                break;
            }
            if let Some(hit) = parse_hit_line(line, token) {
                hits.push(hit);
                count += 1;
            }
        }
    }

    FollowupScanReport {
        tokens_total: tokens.len(),
        hits,
        truncated,
    }
}

fn command_exists(cwd: &Utf8Path, program: &str) -> bool {
    std::process::Command::new(program)
        .arg("--version")
        .current_dir(cwd)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn run_rg(repo_root: &Utf8Path, needle: &str) -> Option<String> {
    run_checked(
        "rg",
        &[
            "--vimgrep".to_owned(),
            "-F".to_owned(),
            "-I".to_owned(),
            "--color".to_owned(),
            "never".to_owned(),
            "--hidden".to_owned(),
            "--no-messages".to_owned(),
            needle.to_owned(),
        ],
        repo_root,
    )
    .ok()
}

fn run_grep(repo_root: &Utf8Path, needle: &str) -> Option<String> {
    run_checked(
        "grep",
        &[
            "-R".to_owned(),
            "-H".to_owned(),
            "-n".to_owned(),
            "-F".to_owned(),
            needle.to_owned(),
            ".".to_owned(),
        ],
        repo_root,
    )
    .ok()
}

/// Parse a `path:line:col:snippet` or `path:line:snippet` hit line.
fn parse_hit_line(line: &str, token: &TokenPair) -> Option<Hit> {
    let mut parts = line.splitn(4, ':');
    let file = parts.next()?;
    let line_no: usize = parts.next()?.parse().ok()?;
    let rest = parts.next()?;
    let snippet = if rest.parse::<usize>().is_ok() {
        parts.next().unwrap_or("").to_owned()
    } else {
        rest.to_owned()
    };
    if super::is_excluded(file) {
        return None;
    }
    Some(Hit {
        file: PathSpec::parse(file).ok()?,
        line: line_no,
        token_group: token.group,
        token: token.old.clone(),
        snippet,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(old: &str) -> TokenPair {
        TokenPair {
            group: TokenGroup::ExactPaths,
            old: old.to_owned(),
            new: "new".to_owned(),
        }
    }

    #[test]
    fn parse_hit_line_with_column() {
        let hit = parse_hit_line("src/a.rs:10:3:some old text", &token("old")).unwrap();
        assert_eq!(hit.file.as_str(), "src/a.rs");
        assert_eq!(hit.line, 10);
        assert_eq!(hit.snippet, "some old text");
    }

    #[test]
    fn parse_hit_line_without_column() {
        let hit = parse_hit_line("src/a.rs:10:some old text", &token("old")).unwrap();
        assert_eq!(hit.line, 10);
        assert_eq!(hit.snippet, "some old text");
    }

    #[test]
    fn parse_hit_line_rejects_malformed() {
        assert!(parse_hit_line("not-a-hit-line", &token("old")).is_none());
    }

    #[test]
    fn parse_hit_line_skips_excluded_paths() {
        assert!(parse_hit_line("node_modules/pkg/index.js:1:old", &token("old")).is_none());
    }
}
