//! Loop Detector (C8).
//!
//! Scans a window of trace records for repeated-command, bypass-attempt
//! and ping-pong-destination triggers, and rolls them up into a single
//! loop severity level consumed by the risk gate.

use serde::{Deserialize, Serialize};

use crate::trace::{AckUsed, BlockedBy, TraceRecord};
use crate::verify::VerifyStatus;

/// Loop severity, ordered `None < Low < Medium < High`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopLevel {
    None,
    Low,
    Medium,
    High,
}

impl std::fmt::Display for LoopLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        write!(f, "{s}")
    }
}

/// A single detected loop trigger.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoopTrigger {
    pub kind: String,
    pub level: LoopLevel,
    pub detail: String,
}

/// The loop detector's output, consumed by the risk gate and written as
/// `loop_diagnostics.json`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoopDiagnostics {
    pub level: LoopLevel,
    pub triggers: Vec<LoopTrigger>,
    pub records_considered: usize,
}

const PUSH_KIND_COMMANDS: &[&str] = &["run", "apply-move", "apply-followup-fixes"];
const REPEAT_THRESHOLD: usize = 3;

/// Evaluate loop triggers over `records`, optionally filtered to one
/// `trace_id`.
#[must_use]
pub fn evaluate(records: &[TraceRecord], trace_id: Option<&str>) -> LoopDiagnostics {
    let window: Vec<&TraceRecord> = records
        .iter()
        .filter(|r| trace_id.is_none_or(|id| r.trace_id == id))
        .collect();

    let mut triggers = Vec::new();

    triggers.extend(repeated_command_trigger(&window));
    triggers.extend(bypass_attempt_trigger(&window));
    triggers.extend(ping_pong_trigger(&window));

    let level = rollup(&triggers);

    LoopDiagnostics {
        level,
        triggers,
        records_considered: window.len(),
    }
}

fn repeated_command_trigger(window: &[&TraceRecord]) -> Option<LoopTrigger> {
    use std::collections::BTreeMap;
    let mut groups: BTreeMap<(String, String), Vec<&&TraceRecord>> = BTreeMap::new();
    for record in window {
        let module = record
            .effective_module_path
            .as_ref()
            .map_or_else(String::new, ToString::to_string);
        groups.entry((record.command.clone(), module)).or_default().push(record);
    }

    for ((command, module), group) in groups {
        if group.len() < REPEAT_THRESHOLD {
            continue;
        }
        let no_progress = group.windows(2).all(|pair| pair[0].guard_decision == pair[1].guard_decision);
        if no_progress {
            return Some(LoopTrigger {
                kind: "repeated_command_no_progress".to_owned(),
                level: LoopLevel::Medium,
                detail: format!("'{command}' repeated {} times against module '{module}' with no guard-decision progress", group.len()),
            });
        }
    }
    None
}

fn bypass_attempt_trigger(window: &[&TraceRecord]) -> Option<LoopTrigger> {
    window
        .iter()
        .find(|record| {
            PUSH_KIND_COMMANDS.contains(&record.command.as_str())
                && record.verify_status == Some(VerifyStatus::Fail)
                && record.verify_gate_required
                && record.blocked_by == BlockedBy::VerifyGate
                && record.ack_used == AckUsed::None
        })
        .map(|record| LoopTrigger {
            kind: "release_gate_bypass_attempt".to_owned(),
            level: LoopLevel::High,
            detail: format!("'{}' attempted to bypass a required, failing verify gate without an ACK", record.command),
        })
}

/// Detect a single source token whose destination (the invocation's
/// resolved module path) alternates between exactly two values across
/// four or more move records. Only records carrying a
/// `move_source_token` (currently just `apply-move`) participate, since
/// a destination ping-pong is only meaningful for a specific thing being
/// moved, not for the invocation as a whole.
fn ping_pong_trigger(window: &[&TraceRecord]) -> Option<LoopTrigger> {
    use std::collections::BTreeMap;
    let mut destinations: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for record in window {
        let (Some(token), Some(module)) = (&record.move_source_token, &record.effective_module_path) else {
            continue;
        };
        destinations.entry(token.as_str()).or_default().push(module.to_string());
    }
    for (token, seen) in destinations {
        if seen.len() < 4 {
            continue;
        }
        let distinct: std::collections::BTreeSet<&String> = seen.iter().collect();
        if distinct.len() != 2 {
            continue;
        }
        let alternates = seen.windows(2).filter(|w| w[0] != w[1]).count();
        if alternates >= 2 {
            return Some(LoopTrigger {
                kind: "ping_pong_destination".to_owned(),
                level: LoopLevel::Medium,
                detail: format!("source '{token}' alternated between two destinations across successive move commands"),
            });
        }
    }
    None
}

fn rollup(triggers: &[LoopTrigger]) -> LoopLevel {
    if triggers.iter().any(|t| t.level == LoopLevel::High) {
        return LoopLevel::High;
    }
    let medium_count = triggers.iter().filter(|t| t.level == LoopLevel::Medium).count();
    if medium_count >= 2 {
        LoopLevel::High
    } else if medium_count == 1 {
        LoopLevel::Medium
    } else if triggers.iter().any(|t| t.level == LoopLevel::Low) {
        LoopLevel::Low
    } else {
        LoopLevel::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use chrono::Utc;

    fn base_record(command: &str, module: &str, guard_decision: &str) -> TraceRecord {
        TraceRecord {
            timestamp: Utc::now(),
            repo_root: Utf8PathBuf::from("/repo"),
            context_id: "ctx".to_owned(),
            trace_id: "trace1".to_owned(),
            command: command.to_owned(),
            pipeline_path: None,
            effective_module_path: Some(Utf8PathBuf::from(module)),
            module_path_source: "cli".to_owned(),
            move_source_token: None,
            guard_decision: guard_decision.to_owned(),
            guard_decision_reason: String::new(),
            changed_files_count: 0,
            violations_count: 0,
            changed_files_sample: Vec::new(),
            verify_status: Some(VerifyStatus::Pass),
            verify_hits_total: Some(0),
            verify_gate_required: false,
            verify_gate_triggered: false,
            ack_used: AckUsed::None,
            blocked_by: BlockedBy::None,
            exit_code: 0,
            snapshot_created: false,
            snapshot_path: None,
            snapshot_label: None,
            action: "completed".to_owned(),
        }
    }

    #[test]
    fn repeated_command_with_no_progress_triggers_medium() {
        let records = vec![
            base_record("run", "src/main/java/a", "fail"),
            base_record("run", "src/main/java/a", "fail"),
            base_record("run", "src/main/java/a", "fail"),
        ];
        let diagnostics = evaluate(&records, None);
        assert_eq!(diagnostics.level, LoopLevel::Medium);
        assert!(diagnostics.triggers.iter().any(|t| t.kind == "repeated_command_no_progress"));
    }

    #[test]
    fn bypass_attempt_forces_high() {
        let mut record = base_record("run", "mod", "pass");
        record.verify_status = Some(VerifyStatus::Fail);
        record.verify_gate_required = true;
        record.blocked_by = BlockedBy::VerifyGate;
        record.ack_used = AckUsed::None;
        let diagnostics = evaluate(&[record], None);
        assert_eq!(diagnostics.level, LoopLevel::High);
    }

    #[test]
    fn no_triggers_yields_none() {
        let records = vec![base_record("validate", "mod", "pass")];
        let diagnostics = evaluate(&records, None);
        assert_eq!(diagnostics.level, LoopLevel::None);
        assert!(diagnostics.triggers.is_empty());
    }

    #[test]
    fn ping_pong_detects_alternating_destinations_for_same_source() {
        let mut records = vec![
            base_record("apply-move", "mod/a", "pass"),
            base_record("apply-move", "mod/b", "pass"),
            base_record("apply-move", "mod/a", "pass"),
            base_record("apply-move", "mod/b", "pass"),
        ];
        for record in &mut records {
            record.move_source_token = Some("pkg/foo/old.json".to_owned());
        }
        let diagnostics = evaluate(&records, None);
        assert!(diagnostics.triggers.iter().any(|t| t.kind == "ping_pong_destination"));
    }

    #[test]
    fn ping_pong_ignores_records_without_source_token() {
        let records = vec![
            base_record("apply-move", "mod/a", "pass"),
            base_record("apply-move", "mod/b", "pass"),
            base_record("apply-move", "mod/a", "pass"),
            base_record("apply-move", "mod/b", "pass"),
        ];
        let diagnostics = evaluate(&records, None);
        assert!(!diagnostics.triggers.iter().any(|t| t.kind == "ping_pong_destination"));
    }

    #[test]
    fn ping_pong_distinguishes_unrelated_source_tokens() {
        let mut records = vec![
            base_record("apply-move", "mod/a", "pass"),
            base_record("apply-move", "mod/b", "pass"),
            base_record("apply-move", "mod/a", "pass"),
            base_record("apply-move", "mod/b", "pass"),
        ];
        records[0].move_source_token = Some("pkg/foo.json".to_owned());
        records[1].move_source_token = Some("pkg/bar.json".to_owned());
        records[2].move_source_token = Some("pkg/foo.json".to_owned());
        records[3].move_source_token = Some("pkg/bar.json".to_owned());
        let diagnostics = evaluate(&records, None);
        assert!(!diagnostics.triggers.iter().any(|t| t.kind == "ping_pong_destination"));
    }

    #[test]
    fn loop_level_display() {
        assert_eq!(LoopLevel::High.to_string(), "high");
        assert_eq!(LoopLevel::None.to_string(), "none");
    }
}
