//! Path & scope primitives.
//!
//! Normalizes repository-relative paths, confines generated artifacts to
//! the configured tools subtree, resolves the effective module boundary
//! for a command, and matches paths against semantic glob patterns where
//! `**/X/**` denotes "any path containing segment X".

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::GateError;

/// A repository-relative, forward-slash, normalized path.
///
/// Invariants: never absolute in serialized form; never escapes the
/// repository root (no unresolved `..` segments).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathSpec(Utf8PathBuf);

impl PathSpec {
    /// Normalize `raw` into a `PathSpec`.
    ///
    /// # Errors
    /// Returns [`GateError::PathEscapesRepo`] if `raw` contains more `..`
    /// segments than it has leading components to cancel.
    pub fn parse(raw: &str) -> Result<Self, GateError> {
        normalize(raw).map(Self)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    #[must_use]
    pub fn as_path(&self) -> &Utf8Path {
        &self.0
    }
}

impl fmt::Display for PathSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Source of a resolved module path, per the precedence in
/// `resolve_module_path`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModulePathSource {
    Cli,
    Pipeline,
    Derived,
    Report,
    #[serde(rename = "none")]
    Unset,
}

impl fmt::Display for ModulePathSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Cli => "cli",
            Self::Pipeline => "pipeline",
            Self::Derived => "derived",
            Self::Report => "report",
            Self::Unset => "none",
        };
        write!(f, "{s}")
    }
}

/// Convert `raw` to forward slashes, strip a leading `./`, and resolve
/// `..` segments; fails if resolution would escape the repository root.
///
/// `.` alone normalizes to the empty path, which callers treat as
/// denoting the repository root (see DESIGN.md, Open Question 1).
pub fn normalize(raw: &str) -> Result<Utf8PathBuf, GateError> {
    let slashified = raw.replace('\\', "/");
    let trimmed = slashified.strip_prefix("./").unwrap_or(&slashified);
    let mut stack: Vec<&str> = Vec::new();
    for segment in trimmed.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if stack.pop().is_none() {
                    return Err(GateError::PathEscapesRepo {
                        path: Utf8PathBuf::from(raw),
                    });
                }
            }
            other => stack.push(other),
        }
    }
    Ok(Utf8PathBuf::from(stack.join("/")))
}

/// Confine a candidate output path under `tools_root`, normalizing it
/// first. Used for every report/plan destination before it is written.
///
/// # Errors
/// Returns [`GateError::OutsideToolsRoot`] if the normalized candidate
/// does not lie under `tools_root`.
pub fn confine_under(tools_root: &Utf8Path, candidate: &str) -> Result<Utf8PathBuf, GateError> {
    let normalized = normalize(candidate)?;
    let tools_root_norm = normalize(tools_root.as_str())?;
    if normalized == tools_root_norm || normalized.starts_with(&tools_root_norm) {
        Ok(normalized)
    } else {
        Err(GateError::OutsideToolsRoot {
            tools_root: tools_root_norm,
            attempted: normalized,
        })
    }
}

/// Resolve the effective module path and its provenance.
///
/// Precedence: `cli` > `pipeline_module` > a directory derived from the
/// common prefix of `step_module_paths` (only when that prefix is
/// non-empty, exists, and is not the repository root) > absent.
///
/// # Errors
/// Returns [`GateError::ModulePathNotFound`] if a `cli` or
/// `pipeline_module` value is given but does not exist under
/// `repo_root`.
pub fn resolve_module_path(
    cli: Option<&str>,
    pipeline_module: Option<&str>,
    step_module_paths: &[String],
    repo_root: &Utf8Path,
) -> Result<(Option<Utf8PathBuf>, ModulePathSource), GateError> {
    if let Some(raw) = cli {
        let normalized = normalize(raw)?;
        ensure_module_path_exists(repo_root, &normalized)?;
        return Ok((Some(normalized), ModulePathSource::Cli));
    }
    if let Some(raw) = pipeline_module {
        let normalized = normalize(raw)?;
        ensure_module_path_exists(repo_root, &normalized)?;
        return Ok((Some(normalized), ModulePathSource::Pipeline));
    }
    if let Some(prefix) = common_directory_prefix(step_module_paths)
        && !prefix.as_str().is_empty()
        && ensure_module_path_exists(repo_root, &prefix).is_ok()
    {
        return Ok((Some(prefix), ModulePathSource::Derived));
    }
    Ok((None, ModulePathSource::Unset))
}

fn ensure_module_path_exists(repo_root: &Utf8Path, module_path: &Utf8Path) -> Result<(), GateError> {
    let full = repo_root.join(module_path);
    if full.is_dir() {
        Ok(())
    } else {
        Err(GateError::ModulePathNotFound {
            module_path: module_path.to_path_buf(),
        })
    }
}

fn common_directory_prefix(paths: &[String]) -> Option<Utf8PathBuf> {
    let mut segments: Option<Vec<String>> = None;
    for raw in paths {
        let normalized = normalize(raw).ok()?;
        let parts: Vec<String> = normalized
            .as_str()
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect();
        segments = Some(match segments {
            None => parts,
            Some(prev) => prev
                .into_iter()
                .zip(parts)
                .take_while(|(a, b)| a == b)
                .map(|(a, _)| a)
                .collect(),
        });
    }
    let segs = segments?;
    if segs.is_empty() {
        None
    } else {
        Some(Utf8PathBuf::from(segs.join("/")))
    }
}

/// Match `path` against any of `patterns`, honoring the `**/X/**`
/// "contains segment X" special case and falling back to
/// filename-suffix glob matching (the original's use of
/// `PurePosixPath.match`: a relative pattern matches the trailing
/// components of the path).
#[must_use]
pub fn match_patterns(path: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| pattern_matches(path, pattern))
}

fn pattern_matches(path: &str, pattern: &str) -> bool {
    if let Some(segment) = contains_segment_pattern(pattern) {
        return path.split('/').any(|s| s == segment);
    }
    suffix_glob_match(path, pattern)
}

/// Recognize the `**/X/**` shape where `X` has no further wildcards.
fn contains_segment_pattern(pattern: &str) -> Option<&str> {
    let rest = pattern.strip_prefix("**/")?;
    let segment = rest.strip_suffix("/**")?;
    if segment.is_empty() || segment.contains('/') || segment.contains('*') {
        None
    } else {
        Some(segment)
    }
}

fn suffix_glob_match(path: &str, pattern: &str) -> bool {
    let path_parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let pattern_parts: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    if pattern_parts.is_empty() {
        return false;
    }
    let rooted = pattern.starts_with('/');
    if rooted {
        if pattern_parts.len() != path_parts.len() {
            return false;
        }
        return pattern_parts
            .iter()
            .zip(path_parts.iter())
            .all(|(p, s)| glob_component_match(p, s));
    }
    if pattern_parts.len() > path_parts.len() {
        return false;
    }
    let offset = path_parts.len() - pattern_parts.len();
    pattern_parts
        .iter()
        .zip(&path_parts[offset..])
        .all(|(p, s)| glob_component_match(p, s))
}

fn glob_component_match(pattern_component: &str, value: &str) -> bool {
    if pattern_component == "**" {
        return true;
    }
    glob::Pattern::new(pattern_component)
        .map(|p| p.matches(value))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_leading_dot_slash() {
        assert_eq!(normalize("./a/b").unwrap().as_str(), "a/b");
    }

    #[test]
    fn normalize_converts_backslashes() {
        assert_eq!(normalize("a\\b").unwrap().as_str(), "a/b");
    }

    #[test]
    fn normalize_resolves_internal_dotdot() {
        assert_eq!(normalize("a/b/../c").unwrap().as_str(), "a/c");
    }

    #[test]
    fn normalize_root_dot_is_empty() {
        assert_eq!(normalize(".").unwrap().as_str(), "");
    }

    #[test]
    fn normalize_rejects_escaping_dotdot() {
        let err = normalize("../outside").unwrap_err();
        assert!(matches!(err, GateError::PathEscapesRepo { .. }));
    }

    #[test]
    fn confine_under_accepts_nested_path() {
        let root = Utf8Path::new("prompt-dsl-system/tools");
        let out = confine_under(root, "prompt-dsl-system/tools/guard_report.json").unwrap();
        assert_eq!(out.as_str(), "prompt-dsl-system/tools/guard_report.json");
    }

    #[test]
    fn confine_under_rejects_escaping_path() {
        let root = Utf8Path::new("prompt-dsl-system/tools");
        let err = confine_under(root, "src/other.json").unwrap_err();
        assert!(matches!(err, GateError::OutsideToolsRoot { .. }));
    }

    #[test]
    fn match_patterns_contains_segment() {
        let patterns = vec!["**/sys/**".to_owned()];
        assert!(match_patterns("a/sys/b.rs", &patterns));
        assert!(!match_patterns("a/system/b.rs", &patterns));
    }

    #[test]
    fn match_patterns_suffix_glob() {
        let patterns = vec!["*.lock".to_owned()];
        assert!(match_patterns("deep/nested/Cargo.lock", &patterns));
        assert!(!match_patterns("deep/nested/Cargo.toml", &patterns));
    }

    #[test]
    fn resolve_module_path_prefers_cli() {
        let dir = tempfile::tempdir().unwrap();
        let repo_root = Utf8Path::from_path(dir.path()).unwrap();
        std::fs::create_dir_all(dir.path().join("mod")).unwrap();
        let (path, source) =
            resolve_module_path(Some("mod"), Some("other"), &[], repo_root).unwrap();
        assert_eq!(path.unwrap().as_str(), "mod");
        assert_eq!(source, ModulePathSource::Cli);
    }

    #[test]
    fn resolve_module_path_derives_common_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let repo_root = Utf8Path::from_path(dir.path()).unwrap();
        std::fs::create_dir_all(dir.path().join("mod/sub")).unwrap();
        let steps = vec!["mod/sub/a".to_owned(), "mod/sub/b".to_owned()];
        let (path, source) = resolve_module_path(None, None, &steps, repo_root).unwrap();
        assert_eq!(path.unwrap().as_str(), "mod/sub");
        assert_eq!(source, ModulePathSource::Derived);
    }

    #[test]
    fn resolve_module_path_none_when_nothing_given() {
        let dir = tempfile::tempdir().unwrap();
        let repo_root = Utf8Path::from_path(dir.path()).unwrap();
        let (path, source) = resolve_module_path(None, None, &[], repo_root).unwrap();
        assert!(path.is_none());
        assert_eq!(source, ModulePathSource::Unset);
    }

    #[test]
    fn path_spec_roundtrips_through_serde() {
        let spec = PathSpec::parse("a/b.rs").unwrap();
        let json = serde_json::to_string(&spec).unwrap();
        let back: PathSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(spec, back);
    }
}
