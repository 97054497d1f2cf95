//! Conflict Resolver (C5).
//!
//! For move destinations that already exist, produces three alternative
//! strategies — rename-suffix, imports-bucket, abort — each as a
//! deterministic mapping plus an executable script.

use std::fmt::Write as _;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::moveplan::{sanitize, MoveItem};
use crate::path::PathSpec;

/// The three conflict-resolution strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    RenameSuffix,
    ImportsBucket,
    Abort,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::RenameSuffix => "rename_suffix",
            Self::ImportsBucket => "imports_bucket",
            Self::Abort => "abort",
        };
        write!(f, "{s}")
    }
}

/// One resolved conflict mapping under a given strategy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConflictMapping {
    pub src: PathSpec,
    pub original_dst: PathSpec,
    pub resolved_dst: Option<PathSpec>,
}

/// The plan produced for a single strategy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StrategyPlan {
    pub strategy: Strategy,
    pub script: String,
    pub mappings: Vec<ConflictMapping>,
}

/// The full conflict plan, one entry per strategy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConflictPlan {
    pub rename_suffix: StrategyPlan,
    pub imports_bucket: StrategyPlan,
    pub abort: StrategyPlan,
}

/// First 8 hex characters of `sha1(src|dst)`, used as a deterministic
/// rename-suffix disambiguator.
#[must_use]
pub fn hash8(src: &str, dst: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(src.as_bytes());
    hasher.update(b"|");
    hasher.update(dst.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(8);
    for byte in digest.iter().take(4) {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Build the three-strategy conflict plan for every move item flagged
/// `dst_exists`.
#[must_use]
pub fn resolve(module_path: &Utf8Path, conflicted_items: &[MoveItem]) -> ConflictPlan {
    let mut rename_mappings = Vec::new();
    let mut imports_mappings = Vec::new();

    for item in conflicted_items {
        let Some(original_dst) = conflicting_original_dst(item) else {
            continue;
        };
        let src = item.src.as_str();
        let dst = original_dst.as_str();

        let rename_dst = format!("{dst}.moved.{}", hash8(src, dst));
        rename_mappings.push(ConflictMapping {
            src: item.src.clone(),
            original_dst: original_dst.clone(),
            resolved_dst: PathSpec::parse(&rename_dst).ok(),
        });

        let basename = Utf8Path::new(src).file_name().unwrap_or(src);
        let bucket_dst = format!(
            "{}/_imports_conflicts/{}/{basename}",
            module_path.as_str(),
            sanitize(src)
        );
        imports_mappings.push(ConflictMapping {
            src: item.src.clone(),
            original_dst: original_dst.clone(),
            resolved_dst: PathSpec::parse(&bucket_dst).ok(),
        });
    }

    let rename_script = render_strategy_script(&rename_mappings);
    let imports_script = render_strategy_script(&imports_mappings);
    let abort_script = "#!/usr/bin/env bash\nset -euo pipefail\necho \"aborted: unresolved move conflicts\" >&2\nexit 2\n".to_owned();

    ConflictPlan {
        rename_suffix: StrategyPlan {
            strategy: Strategy::RenameSuffix,
            script: rename_script,
            mappings: rename_mappings,
        },
        imports_bucket: StrategyPlan {
            strategy: Strategy::ImportsBucket,
            script: imports_script,
            mappings: imports_mappings,
        },
        abort: StrategyPlan {
            strategy: Strategy::Abort,
            script: abort_script,
            mappings: Vec::new(),
        },
    }
}

fn conflicting_original_dst(item: &MoveItem) -> Option<PathSpec> {
    item.attempted_dst.clone()
}

fn render_strategy_script(mappings: &[ConflictMapping]) -> String {
    let mut script = String::from("#!/usr/bin/env bash\nset -euo pipefail\n\n");
    for mapping in mappings {
        let Some(dst) = &mapping.resolved_dst else { continue };
        let _ = write!(
            script,
            "if [ ! -e {src:?} ]; then echo \"missing source: {src}\" >&2; exit 1; fi\n\
             mkdir -p \"$(dirname {dst:?})\"\n\
             git mv {src:?} {dst:?} 2>/dev/null || mv {src:?} {dst:?}\n\n",
            src = mapping.src.as_str(),
            dst = dst.as_str(),
        );
    }
    script
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::ViolationType;
    use crate::moveplan::{DstStrategy, RiskFlag};

    fn conflicted_item(src: &str, dst: &str) -> MoveItem {
        MoveItem {
            src: PathSpec::parse(src).unwrap(),
            dst: None,
            attempted_dst: PathSpec::parse(dst).ok(),
            violation_type: ViolationType::OutsideModule,
            can_move: false,
            deny_reason: Some("destination already exists".to_owned()),
            risk_flags: vec![RiskFlag::DstExists],
            needs_followup: Vec::new(),
            dst_strategy: DstStrategy::Preserve,
        }
    }

    #[test]
    fn hash8_is_deterministic() {
        assert_eq!(hash8("a", "b"), hash8("a", "b"));
        assert_eq!(hash8("a", "b").len(), 8);
    }

    #[test]
    fn hash8_differs_for_different_inputs() {
        assert_ne!(hash8("a", "b"), hash8("a", "c"));
    }

    #[test]
    fn rename_suffix_destination_matches_pattern() {
        let item = conflicted_item("src/a.java", "mod/src/a.java");
        let plan = resolve(Utf8Path::new("mod"), &[item]);
        let resolved = plan.rename_suffix.mappings[0].resolved_dst.as_ref().unwrap();
        let re = regex::Regex::new(r"\.moved\.[0-9a-f]{8}$").unwrap();
        assert!(re.is_match(resolved.as_str()));
    }

    #[test]
    fn imports_bucket_destination_uses_sanitized_token() {
        let item = conflicted_item("src/a.java", "mod/src/a.java");
        let plan = resolve(Utf8Path::new("mod"), &[item]);
        let resolved = plan.imports_bucket.mappings[0].resolved_dst.as_ref().unwrap();
        assert!(resolved.as_str().starts_with("mod/_imports_conflicts/"));
        assert!(resolved.as_str().ends_with("a.java"));
    }

    #[test]
    fn abort_script_always_exits_nonzero() {
        let plan = resolve(Utf8Path::new("mod"), &[]);
        assert!(plan.abort.script.contains("exit 2"));
    }

    #[test]
    fn strategy_display() {
        assert_eq!(Strategy::RenameSuffix.to_string(), "rename_suffix");
        assert_eq!(Strategy::ImportsBucket.to_string(), "imports_bucket");
        assert_eq!(Strategy::Abort.to_string(), "abort");
    }
}
