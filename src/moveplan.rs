//! Move Planner (C4).
//!
//! Derives a per-file move plan from guard violations: a destination
//! strategy (structural preserve or imports-bucket), conflict/risk
//! flags, and a shell script performing the moves.

use std::fmt::Write as _;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::guard::{Violation, ViolationType};
use crate::path::PathSpec;

const PRESERVE_SEGMENTS: &[&str] = &[
    "src/main/java/",
    "src/main/resources/",
    "src/main/webapp/",
    "src/test/java/",
    "src/test/resources/",
    "sql/",
    "pages/",
];

const SANITIZE_MAX_LEN: usize = 160;

/// Why a file cannot be moved, if applicable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFlag {
    DstExists,
    PathTokenTruncated,
    NoModulePath,
    DstOutsideModule,
    SrcMissing,
    NeedsRefUpdate,
    ForbiddenZoneRelocation,
}

/// Which strategy produced a destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DstStrategy {
    Preserve,
    Imports,
    None,
}

/// A single planned move.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MoveItem {
    pub src: PathSpec,
    pub dst: Option<PathSpec>,
    /// The destination the chosen strategy computed, whether or not the
    /// move can actually proceed. Used by the conflict resolver to derive
    /// alternative destinations even when `dst` is `None`.
    pub attempted_dst: Option<PathSpec>,
    pub violation_type: ViolationType,
    pub can_move: bool,
    pub deny_reason: Option<String>,
    pub risk_flags: Vec<RiskFlag>,
    pub needs_followup: Vec<String>,
    pub dst_strategy: DstStrategy,
}

/// Aggregate counts over a [`MovePlan`].
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct MovePlanSummary {
    pub total: usize,
    pub movable: usize,
    pub non_movable: usize,
    pub high_risk: usize,
}

/// A mapping entry surfaced to downstream components (conflict resolver,
/// follow-up scanner).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Mapping {
    pub src: PathSpec,
    pub dst: PathSpec,
    pub reason: String,
    pub violation_type: ViolationType,
    pub needs_followup: Vec<String>,
}

/// The full move plan for a module path.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MovePlan {
    pub generated: bool,
    pub generated_reason: String,
    pub module_path: Option<Utf8PathBuf>,
    pub items: Vec<MoveItem>,
    pub mappings: Vec<Mapping>,
    pub skipped: Vec<PathSpec>,
    pub summary: MovePlanSummary,
    pub blockers: Vec<String>,
}

/// Sanitize a source path into a filesystem-safe token for the imports
/// bucket strategy: strip leading `../`, replace `/` with `__`, and if
/// the result exceeds 160 characters, truncate while preserving the
/// extension and appending an 8-hex-char hash of the original.
#[must_use]
pub fn sanitize(src: &str) -> String {
    let mut stripped = src;
    while let Some(rest) = stripped.strip_prefix("../") {
        stripped = rest;
    }
    let token = stripped.replace('/', "__");
    if token.len() <= SANITIZE_MAX_LEN {
        return token;
    }
    let ext = Utf8Path::new(&token)
        .extension()
        .map(|e| format!(".{e}"))
        .unwrap_or_default();
    let hash = short_hash(src);
    let budget = SANITIZE_MAX_LEN.saturating_sub(ext.len() + 1 + hash.len());
    let truncated: String = token.chars().take(budget).collect();
    format!("{truncated}-{hash}{ext}")
}

fn short_hash(src: &str) -> String {
    let digest = Sha1::digest(src.as_bytes());
    let mut out = String::with_capacity(8);
    for byte in digest.iter().take(4) {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Compute a preserve-strategy destination, if `src` contains one of the
/// recognized structural segments.
fn preserve_destination(module: &str, src: &str) -> Option<String> {
    PRESERVE_SEGMENTS.iter().find_map(|segment| {
        src.find(segment)
            .map(|idx| format!("{module}/{}", &src[idx..]))
    })
}

fn imports_destination(module: &str, src: &str) -> String {
    format!("{module}/_imports/{}", sanitize(src))
}

/// Plan moves for every `outside_module`/`forbidden` violation.
///
/// `dst_exists` is a predicate (typically checking the filesystem or a
/// synthetic existence set in tests) used to flag conflicts.
#[must_use]
pub fn plan(
    module_path: Option<&Utf8Path>,
    violations: &[Violation],
    src_exists: impl Fn(&str) -> bool,
    dst_exists: impl Fn(&str) -> bool,
) -> MovePlan {
    let Some(module) = module_path else {
        return MovePlan {
            generated: false,
            generated_reason: "no module path resolved".to_owned(),
            module_path: None,
            items: Vec::new(),
            mappings: Vec::new(),
            skipped: violations.iter().map(|v| v.file.clone()).collect(),
            summary: MovePlanSummary::default(),
            blockers: vec!["module path is required to plan moves".to_owned()],
        };
    };

    let mut items = Vec::new();
    let mut mappings = Vec::new();
    let mut summary = MovePlanSummary::default();

    for violation in violations {
        if !matches!(violation.violation_type, ViolationType::OutsideModule | ViolationType::Forbidden) {
            continue;
        }
        summary.total += 1;
        let src = violation.file.as_str();
        let mut risk_flags = Vec::new();

        if !src_exists(src) {
            risk_flags.push(RiskFlag::SrcMissing);
        }
        if matches!(violation.violation_type, ViolationType::Forbidden) {
            risk_flags.push(RiskFlag::ForbiddenZoneRelocation);
        }

        let (dst_raw, strategy) = match preserve_destination(module.as_str(), src) {
            Some(d) => (d, DstStrategy::Preserve),
            None => (imports_destination(module.as_str(), src), DstStrategy::Imports),
        };

        if sanitize(src).len() >= SANITIZE_MAX_LEN {
            risk_flags.push(RiskFlag::PathTokenTruncated);
        }

        let dst_conflict = dst_exists(&dst_raw);
        if dst_conflict {
            risk_flags.push(RiskFlag::DstExists);
        }

        let can_move = !risk_flags.iter().any(|f| {
            matches!(f, RiskFlag::SrcMissing | RiskFlag::DstExists)
        });

        let dst_spec = PathSpec::parse(&dst_raw).ok();
        let deny_reason = if can_move {
            None
        } else if risk_flags.contains(&RiskFlag::SrcMissing) {
            Some("source file does not exist".to_owned())
        } else {
            Some("destination already exists".to_owned())
        };

        if can_move {
            summary.movable += 1;
        } else {
            summary.non_movable += 1;
        }
        if matches!(violation.violation_type, ViolationType::Forbidden) || dst_conflict {
            summary.high_risk += 1;
        }

        let needs_followup = vec!["exact_paths".to_owned(), "old_dirs".to_owned()];

        if can_move {
            if let Some(dst) = &dst_spec {
                mappings.push(Mapping {
                    src: violation.file.clone(),
                    dst: dst.clone(),
                    reason: violation.reason.clone(),
                    violation_type: violation.violation_type,
                    needs_followup: needs_followup.clone(),
                });
            }
        }

        items.push(MoveItem {
            src: violation.file.clone(),
            dst: if can_move { dst_spec.clone() } else { None },
            attempted_dst: dst_spec,
            violation_type: violation.violation_type,
            can_move,
            deny_reason,
            risk_flags,
            needs_followup,
            dst_strategy: strategy,
        });
    }

    MovePlan {
        generated: true,
        generated_reason: format!("{} violation(s) considered", summary.total),
        module_path: Some(module.to_path_buf()),
        items,
        mappings,
        skipped: Vec::new(),
        summary,
        blockers: Vec::new(),
    }
}

/// Render the per-pair move shell script (`git mv` / `svn mv` / `mv`),
/// with explicit preconditions: source exists, parent directory created,
/// destination does not already exist.
#[must_use]
pub fn render_move_script(plan: &MovePlan, vcs: crate::vcs::Vcs) -> String {
    let mv_cmd = match vcs {
        crate::vcs::Vcs::Git => "git mv",
        crate::vcs::Vcs::Svn => "svn mv",
        _ => "mv",
    };
    let mut script = String::from("#!/usr/bin/env bash\nset -euo pipefail\n\n");
    for mapping in &plan.mappings {
        let _ = write!(
            script,
            "if [ ! -e {src:?} ]; then echo \"missing source: {src}\" >&2; exit 1; fi\n\
             if [ -e {dst:?} ]; then echo \"destination exists: {dst}\" >&2; exit 1; fi\n\
             mkdir -p \"$(dirname {dst:?})\"\n\
             {mv_cmd} {src:?} {dst:?}\n\n",
            src = mapping.src.as_str(),
            dst = mapping.dst.as_str(),
        );
    }
    script
}

#[cfg(test)]
mod tests {
    use super::*;

    fn violation(file: &str, kind: ViolationType) -> Violation {
        Violation {
            file: PathSpec::parse(file).unwrap(),
            rule: "r".to_owned(),
            violation_type: kind,
            reason: "reason".to_owned(),
            suggestion: "suggestion".to_owned(),
        }
    }

    #[test]
    fn preserve_strategy_matches_structural_segment() {
        let violations = vec![violation("src/main/java/com/a/Foo.java", ViolationType::OutsideModule)];
        let plan = plan(Some(Utf8Path::new("src/main/java/com/b")), &violations, |_| true, |_| false);
        assert_eq!(plan.items[0].dst.as_ref().unwrap().as_str(), "src/main/java/com/b/src/main/java/com/a/Foo.java");
        assert_eq!(plan.items[0].dst_strategy, DstStrategy::Preserve);
    }

    #[test]
    fn imports_fallback_when_no_structural_segment() {
        let violations = vec![violation("random/thing.txt", ViolationType::OutsideModule)];
        let plan = plan(Some(Utf8Path::new("mod")), &violations, |_| true, |_| false);
        assert_eq!(plan.items[0].dst_strategy, DstStrategy::Imports);
        assert!(plan.items[0].dst.as_ref().unwrap().as_str().starts_with("mod/_imports/"));
    }

    #[test]
    fn dst_exists_marks_non_movable_with_conflict_flag() {
        let violations = vec![violation("random/thing.txt", ViolationType::OutsideModule)];
        let plan = plan(Some(Utf8Path::new("mod")), &violations, |_| true, |_| true);
        assert!(!plan.items[0].can_move);
        assert!(plan.items[0].risk_flags.contains(&RiskFlag::DstExists));
        assert_eq!(plan.summary.non_movable, 1);
    }

    #[test]
    fn src_missing_marks_non_movable() {
        let violations = vec![violation("random/thing.txt", ViolationType::OutsideModule)];
        let plan = plan(Some(Utf8Path::new("mod")), &violations, |_| false, |_| false);
        assert!(!plan.items[0].can_move);
        assert_eq!(plan.items[0].deny_reason.as_deref(), Some("source file does not exist"));
    }

    #[test]
    fn no_module_path_yields_ungenerated_plan() {
        let violations = vec![violation("a.txt", ViolationType::OutsideModule)];
        let plan = plan(None, &violations, |_| true, |_| false);
        assert!(!plan.generated);
        assert_eq!(plan.skipped.len(), 1);
    }

    #[test]
    fn sanitize_strips_leading_dotdot_and_replaces_slashes() {
        assert_eq!(sanitize("../pkg/foo.json"), "pkg__foo.json");
    }

    #[test]
    fn sanitize_truncates_long_tokens_with_hash_suffix() {
        let long_src = format!("a/{}.java", "x".repeat(300));
        let token = sanitize(&long_src);
        assert!(token.len() <= SANITIZE_MAX_LEN);
        assert!(token.ends_with(".java"));
    }

    #[test]
    fn sanitize_is_injective_under_truncation() {
        let a = format!("a/{}-one.java", "x".repeat(300));
        let b = format!("a/{}-two.java", "x".repeat(300));
        assert_ne!(sanitize(&a), sanitize(&b));
    }

    #[test]
    fn render_move_script_uses_git_mv() {
        let violations = vec![violation("random/thing.txt", ViolationType::OutsideModule)];
        let plan = plan(Some(Utf8Path::new("mod")), &violations, |_| true, |_| false);
        let script = render_move_script(&plan, crate::vcs::Vcs::Git);
        assert!(script.contains("git mv"));
        assert!(script.contains("mkdir -p"));
    }
}
