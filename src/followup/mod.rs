//! Follow-up Scanner & Patcher (C6).
//!
//! Scans the repository for residual references to old tokens after a
//! move, and plans conservative textual replacements bounded by rule
//! A/B/C context requirements.

pub mod patch;
pub mod scan;

use serde::{Deserialize, Serialize};

use crate::moveplan::Mapping;

/// A token group derived from a set of move mappings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenGroup {
    ExactPaths,
    OldDirs,
    FqcnHints,
}

impl std::fmt::Display for TokenGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ExactPaths => "exact_paths",
            Self::OldDirs => "old_dirs",
            Self::FqcnHints => "fqcn_hints",
        };
        write!(f, "{s}")
    }
}

/// One `(old, new)` token pair plus the group it belongs to.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenPair {
    pub group: TokenGroup,
    pub old: String,
    pub new: String,
}

/// Front-end file extensions eligible for Rule B.
pub const FRONTEND_EXTS: &[&str] = &["html", "xhtml", "jsp", "js", "ts", "vue"];
/// Java/XML file extensions eligible for Rule C.
pub const JAVA_XML_EXTS: &[&str] = &["java", "xml"];

const DEFAULT_EXCLUDE_PATHS: &[&str] = &[
    ".git/", "/target/", ".idea/", ".vscode/", "node_modules/", "/dist/", "/build/", "/out/", "/logs/",
];

pub(crate) fn is_excluded(path: &str) -> bool {
    DEFAULT_EXCLUDE_PATHS.iter().any(|p| path.contains(p))
}

/// Derive the three token groups (`exact_paths`, `old_dirs`, `fqcn_hints`)
/// from a set of move mappings.
#[must_use]
pub fn derive_tokens(mappings: &[Mapping]) -> Vec<TokenPair> {
    let mut tokens = Vec::new();
    for mapping in mappings {
        let old = mapping.src.as_str();
        let new = mapping.dst.as_str();
        tokens.push(TokenPair {
            group: TokenGroup::ExactPaths,
            old: old.to_owned(),
            new: new.to_owned(),
        });
        if let (Some(old_dir), Some(new_dir)) = (leading_dir(old), leading_dir(new)) {
            tokens.push(TokenPair {
                group: TokenGroup::OldDirs,
                old: old_dir,
                new: new_dir,
            });
        }
        if let (Some(old_fqcn), Some(new_fqcn)) = (java_fqcn(old), java_fqcn(new)) {
            tokens.push(TokenPair {
                group: TokenGroup::FqcnHints,
                old: old_fqcn,
                new: new_fqcn,
            });
        }
    }
    tokens
}

fn leading_dir(path: &str) -> Option<String> {
    path.rsplit_once('/').map(|(dir, _)| dir.to_owned())
}

/// Derive a dotted FQCN for a path under `src/main/java/` or
/// `src/test/java/`, stripping the `.java` extension.
fn java_fqcn(path: &str) -> Option<String> {
    for marker in ["src/main/java/", "src/test/java/"] {
        if let Some(idx) = path.find(marker) {
            let rest = &path[idx + marker.len()..];
            let without_ext = rest.strip_suffix(".java")?;
            return Some(without_ext.replace('/', "."));
        }
    }
    None
}
