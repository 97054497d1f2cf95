//! Version-control collaborators.
//!
//! `git` and `svn` are invoked as external processes to enumerate the
//! current change set; this module only parses their line-oriented
//! output, never their exit status semantics beyond success/failure.

use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::GateError;
use crate::path::PathSpec;

/// Which VCS (if any) produced the change set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vcs {
    Git,
    Svn,
    Synthetic,
    None,
}

impl std::fmt::Display for Vcs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Git => "git",
            Self::Svn => "svn",
            Self::Synthetic => "synthetic",
            Self::None => "none",
        };
        write!(f, "{s}")
    }
}

/// The discovered change set plus which collaborator produced it.
pub struct ChangeSet {
    pub vcs: Vcs,
    pub changed_files: Vec<PathSpec>,
    /// Set when no VCS metadata was available and the change set is
    /// empty as a result.
    pub unsupported_vcs_warning: bool,
}

/// Discover the current change set.
///
/// Precedence: `injected` (e.g. from an environment variable) > git
/// diff between `base`/`head` > git diff since last commit > git
/// working-copy status > svn status > empty with a warning.
#[must_use]
pub fn detect_changed_files(
    repo_root: &camino::Utf8Path,
    injected: Option<&[String]>,
    base: Option<&str>,
    head: Option<&str>,
) -> ChangeSet {
    if let Some(list) = injected {
        return ChangeSet {
            vcs: Vcs::Synthetic,
            changed_files: list.iter().filter_map(|p| PathSpec::parse(p).ok()).collect(),
            unsupported_vcs_warning: false,
        };
    }

    if command_exists("git") && repo_root.join(".git").exists() {
        if let Some(files) = git_changed_files(repo_root, base, head) {
            return ChangeSet {
                vcs: Vcs::Git,
                changed_files: files,
                unsupported_vcs_warning: false,
            };
        }
    }

    if command_exists("svn") && repo_root.join(".svn").exists() {
        if let Some(files) = svn_changed_files(repo_root) {
            return ChangeSet {
                vcs: Vcs::Svn,
                changed_files: files,
                unsupported_vcs_warning: false,
            };
        }
    }

    ChangeSet {
        vcs: Vcs::None,
        changed_files: Vec::new(),
        unsupported_vcs_warning: true,
    }
}

fn command_exists(program: &str) -> bool {
    Command::new(program)
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn git_changed_files(repo_root: &camino::Utf8Path, base: Option<&str>, head: Option<&str>) -> Option<Vec<PathSpec>> {
    let args: Vec<String> = match (base, head) {
        (Some(b), Some(h)) => vec!["diff".to_owned(), "--name-only".to_owned(), b.to_owned(), h.to_owned()],
        _ => vec!["diff".to_owned(), "--name-only".to_owned(), "HEAD".to_owned()],
    };
    let output = run_capture("git", &args, repo_root)?;
    let mut files = parse_lines_as_paths(&output);
    if files.is_empty() {
        let status = run_capture("git", &["status".to_owned(), "--porcelain".to_owned()], repo_root)?;
        files = parse_git_porcelain(&status);
    }
    Some(files)
}

fn svn_changed_files(repo_root: &camino::Utf8Path) -> Option<Vec<PathSpec>> {
    let output = run_capture("svn", &["status".to_owned()], repo_root)?;
    let files = output
        .lines()
        .filter_map(|line| {
            let mut chars = line.chars();
            let status_char = chars.next()?;
            if status_char == '?' || status_char == '!' {
                return None;
            }
            let rest = line.get(1..)?.trim_start();
            PathSpec::parse(rest).ok()
        })
        .collect();
    Some(files)
}

fn run_capture(program: &str, args: &[String], cwd: &camino::Utf8Path) -> Option<String> {
    debug!(program, ?args, "running vcs collaborator");
    let output = Command::new(program).args(args).current_dir(cwd).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout).ok()
}

fn parse_lines_as_paths(text: &str) -> Vec<PathSpec> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter_map(|l| PathSpec::parse(l).ok())
        .collect()
}

fn parse_git_porcelain(text: &str) -> Vec<PathSpec> {
    text.lines()
        .filter_map(|line| {
            let rest = line.get(3..)?;
            let path = rest.split(" -> ").last().unwrap_or(rest).trim();
            PathSpec::parse(path).ok()
        })
        .collect()
}

/// Split a synthetic change list (comma- or newline-separated) the way
/// an injected environment variable would be parsed.
#[must_use]
pub fn parse_injected_list(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c == '\n')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// A generic "run this and return a structured error on failure"
/// wrapper shared by the follow-up scanner and the move script runner.
///
/// # Errors
/// Returns [`GateError::SubprocessFailure`] if the process fails to
/// spawn or exits non-zero.
pub fn run_checked(program: &str, args: &[String], cwd: &camino::Utf8Path) -> Result<String, GateError> {
    let output = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .output()
        .map_err(|e| GateError::SubprocessFailure {
            command: format!("{program} {}", args.join(" ")),
            exit_code: None,
            stderr: e.to_string(),
        })?;
    if !output.status.success() {
        return Err(GateError::SubprocessFailure {
            command: format!("{program} {}", args.join(" ")),
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
