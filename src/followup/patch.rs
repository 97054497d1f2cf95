//! Follow-up patch planner: conservative rule A/B/C replacement
//! candidates, budgeted application, and anchor re-checks.

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use super::{TokenGroup, TokenPair, FRONTEND_EXTS, JAVA_XML_EXTS};
use crate::error::GateError;
use crate::path::PathSpec;

const BOUNDARY_CHARS: &[char] = &[
    ' ', '\t', '\r', '\n', '"', '\'', '`', '(', ')', '[', ']', '{', '}', '<', '>', ',', ';', ':', '=', '|',
];

/// Which rule produced a candidate replacement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    AFullPath,
    CJavaFqcn,
    BFrontendOldDir,
    BFrontendTailDir,
}

impl std::fmt::Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AFullPath => "A_full_path",
            Self::CJavaFqcn => "C_java_fqcn",
            Self::BFrontendOldDir => "B_frontend_old_dir",
            Self::BFrontendTailDir => "B_frontend_tail_dir",
        };
        write!(f, "{s}")
    }
}

/// How confident a candidate replacement is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// One candidate replacement within a single file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Candidate {
    pub file: PathSpec,
    pub rule: Rule,
    pub from: String,
    pub to: String,
    pub confidence: Confidence,
    pub line: Option<usize>,
}

/// The patch plan: per-file unified diffs plus the consolidated diff.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FollowupPatchPlan {
    pub candidates: Vec<Candidate>,
    pub total_replacements: usize,
    pub truncated: bool,
    pub per_file_diffs: Vec<(PathSpec, String)>,
    pub consolidated_diff: String,
}

fn rule_line_context(rule: Rule) -> &'static [&'static str] {
    match rule {
        Rule::AFullPath => &[],
        Rule::CJavaFqcn => &["import ", "class=", "mapper=", "resultType=", "parameterType=", "type="],
        Rule::BFrontendOldDir | Rule::BFrontendTailDir => &[
            "src=\"", "src='", "href=\"", "href='", "require(\"", "require('", "import \"", "import '",
            "from \"", "from '",
        ],
    }
}

fn extension_of(path: &str) -> Option<&str> {
    Utf8Path::new(path).extension()
}

fn is_frontend_file(path: &str) -> bool {
    extension_of(path).is_some_and(|e| FRONTEND_EXTS.contains(&e))
}

fn is_java_xml_file(path: &str) -> bool {
    extension_of(path).is_some_and(|e| JAVA_XML_EXTS.contains(&e))
}

fn tail_segments(dir: &str, n: usize) -> String {
    let parts: Vec<&str> = dir.split('/').collect();
    let start = parts.len().saturating_sub(n);
    parts[start..].join("/")
}

/// Build rule A/B/C candidates for one file's content from the given
/// token groups. The caller applies them in priority order
/// `A_full_path > C_java_fqcn > B_frontend_old_dir > B_frontend_tail_dir`.
#[must_use]
pub fn build_candidates(file: &str, content: &str, tokens: &[TokenPair]) -> Vec<Candidate> {
    if super::is_excluded(file) {
        return Vec::new();
    }
    let mut out = Vec::new();
    for token in tokens {
        match token.group {
            TokenGroup::ExactPaths => {
                for (line_no, line) in content.lines().enumerate() {
                    if line.contains(&token.old) && has_boundaries(line, &token.old) {
                        out.push(Candidate {
                            file: pathspec_or_skip(file),
                            rule: Rule::AFullPath,
                            from: token.old.clone(),
                            to: token.new.clone(),
                            confidence: Confidence::High,
                            line: Some(line_no + 1),
                        });
                    }
                }
            }
            TokenGroup::FqcnHints if is_java_xml_file(file) => {
                for (line_no, line) in content.lines().enumerate() {
                    if line.contains(&token.old) && contains_context(line, rule_line_context(Rule::CJavaFqcn)) {
                        out.push(Candidate {
                            file: pathspec_or_skip(file),
                            rule: Rule::CJavaFqcn,
                            from: token.old.clone(),
                            to: token.new.clone(),
                            confidence: Confidence::High,
                            line: Some(line_no + 1),
                        });
                    }
                }
            }
            TokenGroup::OldDirs if is_frontend_file(file) => {
                for (line_no, line) in content.lines().enumerate() {
                    if !contains_context(line, rule_line_context(Rule::BFrontendOldDir)) {
                        continue;
                    }
                    if line.contains(&token.old) {
                        out.push(Candidate {
                            file: pathspec_or_skip(file),
                            rule: Rule::BFrontendOldDir,
                            from: token.old.clone(),
                            to: token.new.clone(),
                            confidence: Confidence::Medium,
                            line: Some(line_no + 1),
                        });
                        continue;
                    }
                    let old_tail = tail_segments(&token.old, 3);
                    let new_tail = tail_segments(&token.new, 3);
                    if !old_tail.is_empty() && line.contains(&old_tail) {
                        out.push(Candidate {
                            file: pathspec_or_skip(file),
                            rule: Rule::BFrontendTailDir,
                            from: old_tail,
                            to: new_tail,
                            confidence: Confidence::Low,
                            line: Some(line_no + 1),
                        });
                    }
                }
            }
            TokenGroup::FqcnHints | TokenGroup::OldDirs => {}
        }
    }
    out
}

fn pathspec_or_skip(file: &str) -> PathSpec {
    PathSpec::parse(file).unwrap_or_else(|_| PathSpec::parse("unresolved").expect("literal parses"))
}

fn contains_context(line: &str, markers: &[&str]) -> bool {
    markers.iter().any(|m| line.contains(m))
}

fn has_boundaries(line: &str, needle: &str) -> bool {
    let mut search_start = 0;
    while let Some(pos) = line[search_start..].find(needle) {
        let abs_pos = search_start + pos;
        let before_ok = abs_pos == 0
            || line[..abs_pos].chars().next_back().is_some_and(|c| BOUNDARY_CHARS.contains(&c));
        let after_idx = abs_pos + needle.len();
        let after_ok = after_idx >= line.len()
            || line[after_idx..].chars().next().is_some_and(|c| BOUNDARY_CHARS.contains(&c));
        if before_ok && after_ok {
            return true;
        }
        search_start = abs_pos + needle.len().max(1);
    }
    false
}

/// Rank candidates into application priority order, filtering to at
/// least `min_confidence`, and budget them against `max_changes`.
#[must_use]
pub fn plan(candidates: Vec<Candidate>, min_confidence: Confidence, max_changes: usize) -> FollowupPatchPlan {
    let mut filtered: Vec<Candidate> = candidates.into_iter().filter(|c| c.confidence >= min_confidence).collect();
    filtered.sort_by_key(|c| c.rule);

    let mut seen = std::collections::HashSet::new();
    let mut budget = max_changes;
    let mut truncated = false;
    let mut accepted = Vec::new();

    for candidate in filtered {
        let key = (candidate.file.clone(), candidate.rule, candidate.from.clone(), candidate.to.clone());
        if !seen.insert(key) {
            continue;
        }
        if budget == 0 {
            truncated = true;
            continue;
        }
        budget -= 1;
        accepted.push(candidate);
    }

    let total_replacements = accepted.len();
    FollowupPatchPlan {
        candidates: accepted,
        total_replacements,
        truncated,
        per_file_diffs: Vec::new(),
        consolidated_diff: String::new(),
    }
}

/// Apply the patch plan to files under `repo_root`. Requires the caller
/// to have already confirmed `--yes --dry-run false`. Re-asserts each
/// anchor is still present before writing; an anchor miss aborts that
/// file's apply without affecting the rest of the plan.
///
/// # Errors
/// Returns [`GateError::Io`] for read/write failures.
pub fn apply(repo_root: &Utf8Path, plan: &FollowupPatchPlan) -> Result<usize, GateError> {
    use std::collections::BTreeMap;
    let mut by_file: BTreeMap<&PathSpec, Vec<&Candidate>> = BTreeMap::new();
    for candidate in &plan.candidates {
        by_file.entry(&candidate.file).or_default().push(candidate);
    }

    let mut applied = 0;
    for (file, file_candidates) in by_file {
        let full_path = repo_root.join(file.as_path());
        let Ok(mut text) = std::fs::read_to_string(&full_path) else {
            continue;
        };
        let mut file_ok = true;
        for candidate in &file_candidates {
            if !text.contains(&candidate.from) {
                file_ok = false;
                break;
            }
        }
        if !file_ok {
            continue;
        }
        for candidate in file_candidates {
            text = text.replacen(&candidate.from, &candidate.to, 1);
            applied += 1;
        }
        std::fs::write(&full_path, text)?;
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(old: &str, new: &str, group: TokenGroup) -> TokenPair {
        TokenPair {
            group,
            old: old.to_owned(),
            new: new.to_owned(),
        }
    }

    #[test]
    fn rule_a_requires_boundary_characters() {
        let content = "see \"pkg/foo/old.json\" here\nand pkgfoooldjson without boundaries\n";
        let tokens = vec![token("pkg/foo/old.json", "pkg/foo/new.json", TokenGroup::ExactPaths)];
        let candidates = build_candidates("pkg/bar.md", content, &tokens);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].rule, Rule::AFullPath);
    }

    #[test]
    fn rule_c_requires_import_context() {
        let content = "import com.a.Foo;\nString x = \"com.a.Foo\";\n";
        let tokens = vec![token("com.a.Foo", "com.b.Foo", TokenGroup::FqcnHints)];
        let candidates = build_candidates("src/main/java/com/a/Bar.java", content, &tokens);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].line, Some(1));
    }

    #[test]
    fn rule_b_requires_frontend_context_and_extension() {
        let content = "<img src=\"old/dir/logo.png\">\nplain text old/dir mention\n";
        let tokens = vec![token("old/dir", "new/dir", TokenGroup::OldDirs)];
        let candidates = build_candidates("pages/index.html", content, &tokens);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].rule, Rule::BFrontendOldDir);
    }

    #[test]
    fn rule_b_skipped_for_non_frontend_extension() {
        let content = "<img src=\"old/dir/logo.png\">\n";
        let tokens = vec![token("old/dir", "new/dir", TokenGroup::OldDirs)];
        let candidates = build_candidates("pages/readme.md", content, &tokens);
        assert!(candidates.is_empty());
    }

    #[test]
    fn plan_dedupes_and_budgets() {
        let candidates = vec![
            Candidate {
                file: PathSpec::parse("a.md").unwrap(),
                rule: Rule::AFullPath,
                from: "x".to_owned(),
                to: "y".to_owned(),
                confidence: Confidence::High,
                line: Some(1),
            },
            Candidate {
                file: PathSpec::parse("a.md").unwrap(),
                rule: Rule::AFullPath,
                from: "x".to_owned(),
                to: "y".to_owned(),
                confidence: Confidence::High,
                line: Some(1),
            },
        ];
        let plan = plan(candidates, Confidence::High, 10);
        assert_eq!(plan.total_replacements, 1);
        assert!(!plan.truncated);
    }

    #[test]
    fn plan_marks_truncated_when_budget_exhausted() {
        let candidates = vec![
            Candidate {
                file: PathSpec::parse("a.md").unwrap(),
                rule: Rule::AFullPath,
                from: "x".to_owned(),
                to: "y".to_owned(),
                confidence: Confidence::High,
                line: Some(1),
            },
            Candidate {
                file: PathSpec::parse("b.md").unwrap(),
                rule: Rule::AFullPath,
                from: "z".to_owned(),
                to: "w".to_owned(),
                confidence: Confidence::High,
                line: Some(2),
            },
        ];
        let plan = plan(candidates, Confidence::High, 1);
        assert_eq!(plan.total_replacements, 1);
        assert!(plan.truncated);
    }

    #[test]
    fn apply_is_noop_for_empty_plan() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let empty_plan = FollowupPatchPlan {
            candidates: Vec::new(),
            total_replacements: 0,
            truncated: false,
            per_file_diffs: Vec::new(),
            consolidated_diff: String::new(),
        };
        let applied = apply(root, &empty_plan).unwrap();
        assert_eq!(applied, 0);
    }

    #[test]
    fn apply_aborts_file_on_anchor_miss() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        std::fs::write(dir.path().join("a.md"), "no matching text here").unwrap();
        let plan = FollowupPatchPlan {
            candidates: vec![Candidate {
                file: PathSpec::parse("a.md").unwrap(),
                rule: Rule::AFullPath,
                from: "missing-anchor".to_owned(),
                to: "new".to_owned(),
                confidence: Confidence::High,
                line: Some(1),
            }],
            total_replacements: 1,
            truncated: false,
            per_file_diffs: Vec::new(),
            consolidated_diff: String::new(),
        };
        let applied = apply(root, &plan).unwrap();
        assert_eq!(applied, 0);
        let text = std::fs::read_to_string(dir.path().join("a.md")).unwrap();
        assert_eq!(text, "no matching text here");
    }

    #[test]
    fn build_candidates_skips_excluded_paths() {
        let content = "see \"pkg/foo/old.json\" here\n";
        let tokens = vec![token("pkg/foo/old.json", "pkg/foo/new.json", TokenGroup::ExactPaths)];
        let candidates = build_candidates("vendor/node_modules/pkg/bar.md", content, &tokens);
        assert!(candidates.is_empty());
    }

    #[test]
    fn rule_display() {
        assert_eq!(Rule::AFullPath.to_string(), "A_full_path");
        assert_eq!(Rule::CJavaFqcn.to_string(), "C_java_fqcn");
        assert_eq!(Rule::BFrontendOldDir.to_string(), "B_frontend_old_dir");
        assert_eq!(Rule::BFrontendTailDir.to_string(), "B_frontend_tail_dir");
    }
}
