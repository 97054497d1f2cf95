//! Verifier (C7).
//!
//! Re-scans the repository for residual references to the tokens that a
//! move or patch touched, and classifies the result.

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::followup::scan::{scan, FollowupScanReport, Hit};
use crate::followup::{TokenGroup, TokenPair};

const SENSITIVE_MARKERS: &[&str] = &["src/main/java/", "src/test/java/", "/pages/"];
const FAIL_HIT_THRESHOLD: usize = 20;

/// Verification outcome, ranked `Pass < Warn < Fail` with `Missing`
/// standing apart (it never triggers a gate by itself).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyStatus {
    Pass,
    Warn,
    Fail,
    Missing,
}

impl std::fmt::Display for VerifyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pass => "pass",
            Self::Warn => "warn",
            Self::Fail => "fail",
            Self::Missing => "missing",
        };
        write!(f, "{s}")
    }
}

impl VerifyStatus {
    /// Rank used when combining several verify outcomes: `max` by rank.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Pass => 0,
            Self::Warn => 1,
            Self::Fail => 2,
            Self::Missing => 3,
        }
    }

    #[must_use]
    pub fn max(self, other: Self) -> Self {
        if self.rank() >= other.rank() {
            self
        } else {
            other
        }
    }
}

/// The follow-up verification report.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerifyReport {
    pub status: VerifyStatus,
    pub hits_total: usize,
    pub sensitive_hits: usize,
    pub scan: FollowupScanReport,
    pub reason: String,
}

/// Re-scan for `tokens` and classify the result.
///
/// - zero hits -> `Pass`
/// - no tokens to check -> `Missing`
/// - more than 20 hits, or any `exact_paths`/`fqcn_hints` hit landing in
///   a sensitive path (`src/main/java/`, `src/test/java/`, `/pages/`)
///   -> `Fail`
/// - otherwise -> `Warn`
#[must_use]
pub fn verify(repo_root: &Utf8Path, tokens: &[TokenPair], max_hits: usize) -> VerifyReport {
    if tokens.is_empty() {
        return VerifyReport {
            status: VerifyStatus::Missing,
            hits_total: 0,
            sensitive_hits: 0,
            scan: FollowupScanReport {
                tokens_total: 0,
                hits: Vec::new(),
                truncated: false,
            },
            reason: "no tokens derivable from move mappings".to_owned(),
        };
    }

    let report = scan(repo_root, tokens, max_hits);
    let sensitive_hits = report.hits.iter().filter(|h| is_sensitive(h)).count();

    let (status, reason) = if report.hits.is_empty() {
        (VerifyStatus::Pass, "no residual references found".to_owned())
    } else if report.hits.len() > FAIL_HIT_THRESHOLD || sensitive_hits > 0 {
        (
            VerifyStatus::Fail,
            format!(
                "{} residual references found ({} in sensitive paths)",
                report.hits.len(),
                sensitive_hits
            ),
        )
    } else {
        (
            VerifyStatus::Warn,
            format!("{} residual references found", report.hits.len()),
        )
    };

    VerifyReport {
        status,
        hits_total: report.hits.len(),
        sensitive_hits,
        scan: report,
        reason,
    }
}

fn is_sensitive(hit: &Hit) -> bool {
    if !matches!(hit.token_group, TokenGroup::ExactPaths | TokenGroup::FqcnHints) {
        return false;
    }
    let path = hit.file.as_str();
    SENSITIVE_MARKERS.iter().any(|m| path.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::PathSpec;

    fn hit(file: &str, group: TokenGroup) -> Hit {
        Hit {
            file: PathSpec::parse(file).unwrap(),
            line: 1,
            token_group: group,
            token: "old".to_owned(),
            snippet: "old thing".to_owned(),
        }
    }

    #[test]
    fn verify_status_display_and_rank() {
        assert_eq!(VerifyStatus::Pass.to_string(), "pass");
        assert_eq!(VerifyStatus::Fail.to_string(), "fail");
        assert!(VerifyStatus::Fail.rank() > VerifyStatus::Warn.rank());
        assert_eq!(VerifyStatus::Pass.max(VerifyStatus::Warn), VerifyStatus::Warn);
    }

    #[test]
    fn missing_when_no_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let root = camino::Utf8Path::from_path(dir.path()).unwrap();
        let report = verify(root, &[], 10);
        assert_eq!(report.status, VerifyStatus::Missing);
    }

    #[test]
    fn is_sensitive_flags_java_paths() {
        assert!(is_sensitive(&hit("src/main/java/com/a/Foo.java", TokenGroup::FqcnHints)));
        assert!(!is_sensitive(&hit("docs/readme.md", TokenGroup::ExactPaths)));
        assert!(!is_sensitive(&hit("src/main/java/com/a/Foo.java", TokenGroup::OldDirs)));
    }
}
