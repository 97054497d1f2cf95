//! Path-Diff Guard (C3).
//!
//! Classifies every file in a change set as allowed, ignored, forbidden,
//! outside the module boundary, or missing a module path, and produces
//! an immutable [`GuardReport`].

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::path::{self, ModulePathSource, PathSpec};
use crate::policy::Guardrails;
use crate::vcs::{ChangeSet, Vcs};

/// The mode a command is running the guard in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GuardMode {
    Validate,
    Run,
    DebugGuard,
}

/// Classification of a single violating file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    Forbidden,
    OutsideModule,
    MissingModulePath,
}

impl std::fmt::Display for ViolationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Forbidden => "forbidden",
            Self::OutsideModule => "outside_module",
            Self::MissingModulePath => "missing_module_path",
        };
        write!(f, "{s}")
    }
}

/// A single guard violation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Violation {
    pub file: PathSpec,
    pub rule: String,
    #[serde(rename = "type")]
    pub violation_type: ViolationType,
    pub reason: String,
    pub suggestion: String,
}

/// Final pass/fail decision of a guard evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardDecision {
    Pass,
    Fail,
}

impl std::fmt::Display for GuardDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", if matches!(self, Self::Pass) { "pass" } else { "fail" })
    }
}

/// Immutable guard report, the output of one evaluation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GuardReport {
    pub timestamp: DateTime<Utc>,
    pub repo_root: Utf8PathBuf,
    pub mode: GuardMode,
    pub advisory: bool,
    pub vcs: Vcs,
    pub module_path: Option<Utf8PathBuf>,
    pub module_path_source: ModulePathSource,
    pub effective_allowlist_prefixes: Vec<String>,
    pub changed_files: Vec<PathSpec>,
    pub ignored_files: Vec<PathSpec>,
    pub violations: Vec<Violation>,
    pub decision: GuardDecision,
    pub decision_reason: String,
    pub suggestions: Vec<String>,
    pub exit_code: i32,
    pub unsupported_vcs: bool,
}

/// Evaluate a change set against the guardrails and module boundary.
///
/// # Errors
/// Never fails directly; path normalization failures in the change set
/// are skipped rather than propagated, since a malformed VCS line should
/// not abort the whole guard run.
#[instrument(skip(change_set, guardrails), fields(mode = ?mode))]
#[must_use]
pub fn evaluate(
    repo_root: &camino::Utf8Path,
    mode: GuardMode,
    module_path: Option<&camino::Utf8Path>,
    module_path_source: ModulePathSource,
    change_set: &ChangeSet,
    guardrails: &Guardrails,
    strict_vcs: bool,
    now: DateTime<Utc>,
) -> GuardReport {
    let advisory = guardrails.advisory;
    let mut allowlist_prefixes = Vec::new();
    if guardrails.allow_tools_dir {
        allowlist_prefixes.push("prompt-dsl-system/tools".to_owned());
    }
    if let Some(module) = module_path {
        allowlist_prefixes.push(module.as_str().to_owned());
    }

    let mut filtered_changed = Vec::new();
    let mut ignored = Vec::new();
    let mut violations = Vec::new();

    for file in &change_set.changed_files {
        if path::match_patterns(file.as_str(), &guardrails.ignore_path_patterns) {
            ignored.push(file.clone());
            continue;
        }
        filtered_changed.push(file.clone());
        if path::match_patterns(file.as_str(), &guardrails.forbidden_path_patterns) {
            violations.push(Violation {
                file: file.clone(),
                rule: "forbidden_path_patterns".to_owned(),
                violation_type: ViolationType::Forbidden,
                reason: "path matches a forbidden pattern".to_owned(),
                suggestion: "revert this change or route it through an approved location".to_owned(),
            });
            continue;
        }
        if is_allowed_by_prefix(file.as_str(), &allowlist_prefixes) {
            continue;
        }
        if module_path.is_none() && guardrails.require_module_path_for_project_changes {
            violations.push(Violation {
                file: file.clone(),
                rule: "require_module_path_for_project_changes".to_owned(),
                violation_type: ViolationType::MissingModulePath,
                reason: "no module path is set for this command".to_owned(),
                suggestion: "pass --module-path pointing at the directory this change belongs to".to_owned(),
            });
        } else {
            violations.push(Violation {
                file: file.clone(),
                rule: "module_boundary".to_owned(),
                violation_type: ViolationType::OutsideModule,
                reason: "path lies outside the resolved module boundary".to_owned(),
                suggestion: "move this file under the module path, or widen the module boundary".to_owned(),
            });
        }
    }

    let unsupported_vcs = change_set.unsupported_vcs_warning;
    let mut decision = if violations.is_empty() { GuardDecision::Pass } else { GuardDecision::Fail };
    if advisory {
        decision = GuardDecision::Pass;
    }
    if unsupported_vcs && strict_vcs {
        decision = GuardDecision::Fail;
    }

    let decision_reason = if unsupported_vcs && strict_vcs {
        "no VCS metadata available and strict mode is enabled".to_owned()
    } else if violations.is_empty() {
        "no violations found".to_owned()
    } else {
        format!("{} violation(s) found", violations.len())
    };

    let suggestions = violations.iter().map(|v| v.suggestion.clone()).collect::<std::collections::BTreeSet<_>>().into_iter().collect();

    let exit_code = if matches!(decision, GuardDecision::Fail) { 2 } else { 0 };

    GuardReport {
        timestamp: now,
        repo_root: repo_root.to_path_buf(),
        mode,
        advisory,
        vcs: change_set.vcs,
        module_path: module_path.map(camino::Utf8Path::to_path_buf),
        module_path_source,
        effective_allowlist_prefixes: allowlist_prefixes,
        changed_files: filtered_changed,
        ignored_files: ignored,
        violations,
        decision,
        decision_reason,
        suggestions,
        exit_code,
        unsupported_vcs,
    }
}

/// `.` denotes the repository root and always allows, matching the
/// original `is_allowed_by_module` short-circuit (DESIGN.md, Open
/// Question 1).
fn is_allowed_by_prefix(file: &str, prefixes: &[String]) -> bool {
    prefixes.iter().any(|prefix| {
        let trimmed = prefix.trim_end_matches('/');
        if trimmed.is_empty() || trimmed == "." {
            return true;
        }
        file == trimmed || file.starts_with(&format!("{trimmed}/"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change_set(files: &[&str]) -> ChangeSet {
        ChangeSet {
            vcs: Vcs::Synthetic,
            changed_files: files.iter().map(|f| PathSpec::parse(f).unwrap()).collect(),
            unsupported_vcs_warning: false,
        }
    }

    #[test]
    fn allows_file_under_module_path() {
        let guardrails = Guardrails::default();
        let report = evaluate(
            camino::Utf8Path::new("/repo"),
            GuardMode::DebugGuard,
            Some(camino::Utf8Path::new("mod")),
            ModulePathSource::Cli,
            &change_set(&["mod/a.rs"]),
            &guardrails,
            false,
            Utc::now(),
        );
        assert!(report.violations.is_empty());
        assert_eq!(report.decision, GuardDecision::Pass);
    }

    #[test]
    fn flags_outside_module() {
        let guardrails = Guardrails::default();
        let report = evaluate(
            camino::Utf8Path::new("/repo"),
            GuardMode::Run,
            Some(camino::Utf8Path::new("mod/b")),
            ModulePathSource::Cli,
            &change_set(&["src/main/java/com/a/Foo.java"]),
            &guardrails,
            false,
            Utc::now(),
        );
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].violation_type, ViolationType::OutsideModule);
        assert_eq!(report.decision, GuardDecision::Fail);
    }

    #[test]
    fn flags_forbidden_path() {
        let guardrails = Guardrails::default();
        let report = evaluate(
            camino::Utf8Path::new("/repo"),
            GuardMode::Run,
            None,
            ModulePathSource::Unset,
            &change_set(&["sys/Secret.java"]),
            &guardrails,
            false,
            Utc::now(),
        );
        assert_eq!(report.violations[0].violation_type, ViolationType::Forbidden);
    }

    #[test]
    fn flags_missing_module_path() {
        let guardrails = Guardrails::default();
        let report = evaluate(
            camino::Utf8Path::new("/repo"),
            GuardMode::Run,
            None,
            ModulePathSource::Unset,
            &change_set(&["src/Foo.java"]),
            &guardrails,
            false,
            Utc::now(),
        );
        assert_eq!(report.violations[0].violation_type, ViolationType::MissingModulePath);
    }

    #[test]
    fn advisory_mode_always_passes() {
        let mut guardrails = Guardrails::default();
        guardrails.advisory = true;
        let report = evaluate(
            camino::Utf8Path::new("/repo"),
            GuardMode::Validate,
            None,
            ModulePathSource::Unset,
            &change_set(&["sys/Secret.java"]),
            &guardrails,
            false,
            Utc::now(),
        );
        assert_eq!(report.decision, GuardDecision::Pass);
        assert_eq!(report.exit_code, 0);
    }

    #[test]
    fn ignored_files_excluded_from_violations() {
        let guardrails = Guardrails::default();
        let report = evaluate(
            camino::Utf8Path::new("/repo"),
            GuardMode::Run,
            Some(camino::Utf8Path::new("mod")),
            ModulePathSource::Cli,
            &change_set(&["node_modules/pkg/index.js"]),
            &guardrails,
            false,
            Utc::now(),
        );
        assert!(report.violations.is_empty());
        assert_eq!(report.ignored_files.len(), 1);
    }

    #[test]
    fn ignored_files_absent_from_changed_files() {
        let guardrails = Guardrails::default();
        let report = evaluate(
            camino::Utf8Path::new("/repo"),
            GuardMode::Run,
            Some(camino::Utf8Path::new("mod")),
            ModulePathSource::Cli,
            &change_set(&["mod/a.rs", "node_modules/pkg/index.js"]),
            &guardrails,
            false,
            Utc::now(),
        );
        assert_eq!(report.changed_files.len(), 1);
        assert_eq!(report.changed_files[0].as_str(), "mod/a.rs");
        assert_eq!(report.ignored_files.len(), 1);
    }

    #[test]
    fn strict_vcs_converts_unsupported_to_fail() {
        let guardrails = Guardrails::default();
        let empty = ChangeSet {
            vcs: Vcs::None,
            changed_files: Vec::new(),
            unsupported_vcs_warning: true,
        };
        let report = evaluate(
            camino::Utf8Path::new("/repo"),
            GuardMode::Validate,
            None,
            ModulePathSource::Unset,
            &empty,
            &guardrails,
            true,
            Utc::now(),
        );
        assert_eq!(report.decision, GuardDecision::Fail);
    }

    #[test]
    fn violation_type_display() {
        assert_eq!(ViolationType::Forbidden.to_string(), "forbidden");
        assert_eq!(ViolationType::OutsideModule.to_string(), "outside_module");
        assert_eq!(ViolationType::MissingModulePath.to_string(), "missing_module_path");
    }
}
