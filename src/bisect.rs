//! Trace Diff & Bisect (C12).
//!
//! Compares two trace summaries and derives a numbered recovery plan
//! from deterministic priority rules.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::risk::RiskLevel;
use crate::trace::{AckUsed, TraceIndex, TraceRecord};
use crate::verify::VerifyStatus;

const MODULE_PATH: &str = "<MODULE_PATH>";
const PIPELINE_PATH: &str = "<PIPELINE_PATH>";
const MOVES_JSON: &str = "<MOVES_JSON>";
const SCAN_REPORT_JSON: &str = "<SCAN_REPORT_JSON>";

/// The computed differences between a `bad` and `good` trace.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TraceDiff {
    pub bad_trace_id: String,
    pub good_trace_id: String,
    pub exit_code_delta: (Option<i32>, Option<i32>),
    pub verify_top_delta: (Option<VerifyStatus>, Option<VerifyStatus>),
    pub blocked_by_delta: BTreeMap<String, (usize, usize)>,
    pub ack_total_delta: (usize, usize),
    pub recommended_actions: Vec<String>,
}

fn ack_total(idx: &TraceIndex) -> usize {
    idx.ack_used_counts.values().sum()
}

/// Diff a `bad` and `good` [`TraceIndex`], producing deltas and a short
/// list of deterministic recommended actions.
#[must_use]
pub fn diff(bad: &TraceIndex, good: &TraceIndex) -> TraceDiff {
    let mut blocked_by_delta = BTreeMap::new();
    let mut keys: Vec<&String> = bad.blocked_by_counts.keys().chain(good.blocked_by_counts.keys()).collect();
    keys.sort();
    keys.dedup();
    for key in keys {
        let bad_count = *bad.blocked_by_counts.get(key).unwrap_or(&0);
        let good_count = *good.blocked_by_counts.get(key).unwrap_or(&0);
        blocked_by_delta.insert(key.clone(), (bad_count, good_count));
    }

    let mut recommended_actions = Vec::new();
    let regressed = matches!(
        (bad.latest_verify_status, good.latest_verify_status),
        (Some(VerifyStatus::Fail | VerifyStatus::Warn), Some(VerifyStatus::Pass))
    );
    if regressed {
        recommended_actions.push(format!(
            "verify regressed ({:?} -> {:?}): run verify-followup-fixes then apply-followup-fixes plan",
            good.latest_verify_status, bad.latest_verify_status
        ));
    }
    if bad.bypass_attempt && !good.bypass_attempt {
        recommended_actions.push("bypass attempt present only in the bad trace: inspect ACK usage around the blocked command".to_owned());
    }
    if bad.latest_exit_code.unwrap_or(0) != 0 && good.latest_exit_code.unwrap_or(0) == 0 {
        recommended_actions.push("exit code regressed from 0: re-run the failing command with --debug-guard".to_owned());
    }
    if recommended_actions.len() > 7 {
        recommended_actions.truncate(7);
    }

    TraceDiff {
        bad_trace_id: bad.trace_id.clone(),
        good_trace_id: good.trace_id.clone(),
        exit_code_delta: (bad.latest_exit_code, good.latest_exit_code),
        verify_top_delta: (bad.latest_verify_status, good.latest_verify_status),
        blocked_by_delta,
        ack_total_delta: (ack_total(bad), ack_total(good)),
        recommended_actions,
    }
}

/// One recovery step in a bisect plan.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BisectStep {
    pub id: String,
    pub purpose: String,
    pub when: String,
    pub cmd: String,
    pub expected: String,
    pub stop_if: String,
    pub risk: RiskLevel,
}

const MIN_PLAN_SIZE: usize = 5;
const MAX_PLAN_SIZE: usize = 12;

/// Pick the best auto-selected `good` trace: the latest trace before
/// `bad` whose latest exit code is 0 and whose top verify status is
/// `PASS`.
#[must_use]
pub fn auto_select_good<'a>(bad_trace_id: &str, records: &'a [TraceRecord], all_indexes: &'a [TraceIndex]) -> Option<&'a TraceIndex> {
    let bad_timestamp = records.iter().find(|r| r.trace_id == bad_trace_id).map(|r| r.timestamp)?;
    all_indexes
        .iter()
        .filter(|idx| idx.trace_id != bad_trace_id)
        .filter(|idx| idx.last_seen_at.is_some_and(|t| t < bad_timestamp))
        .filter(|idx| idx.latest_exit_code == Some(0) && idx.latest_verify_status == Some(VerifyStatus::Pass))
        .max_by_key(|idx| idx.last_seen_at)
}

/// Build a priority-ordered recovery plan for `bad`, at most
/// [`MAX_PLAN_SIZE`] steps, padded to at least [`MIN_PLAN_SIZE`].
#[must_use]
pub fn bisect(bad: &TraceIndex) -> Vec<BisectStep> {
    let mut steps = Vec::new();

    if bad.bypass_attempt {
        steps.push(BisectStep {
            id: "P0-1".to_owned(),
            purpose: "inspect bypass evidence".to_owned(),
            when: "a release-gate bypass attempt was recorded".to_owned(),
            cmd: format!("changegate trace-open --trace-id {}", bad.trace_id),
            expected: "bypass record confirmed or ruled out".to_owned(),
            stop_if: "no bypass evidence found".to_owned(),
            risk: RiskLevel::High,
        });
        steps.push(BisectStep {
            id: "P0-2".to_owned(),
            purpose: "force re-verification before any further apply".to_owned(),
            when: "bypass evidence confirmed".to_owned(),
            cmd: format!("changegate verify-followup-fixes --scan-report-json {SCAN_REPORT_JSON}"),
            expected: "verify status recomputed".to_owned(),
            stop_if: "verify status is now PASS".to_owned(),
            risk: RiskLevel::High,
        });
        steps.push(BisectStep {
            id: "P0-3".to_owned(),
            purpose: "re-check the release gate with the refreshed verify report".to_owned(),
            when: "re-verification completed".to_owned(),
            cmd: "changegate run --pipeline <PIPELINE_PATH>".to_owned(),
            expected: "release gate passes".to_owned(),
            stop_if: "gate blocks again".to_owned(),
            risk: RiskLevel::High,
        });
    }

    if matches!(bad.latest_verify_status, Some(VerifyStatus::Fail | VerifyStatus::Warn)) {
        steps.push(BisectStep {
            id: format!("P1-{}", steps.len() + 1),
            purpose: "open the bad trace and inspect residual hits".to_owned(),
            when: "verify status is FAIL or WARN".to_owned(),
            cmd: format!("changegate trace-open --trace-id {}", bad.trace_id),
            expected: "residual-hit locations identified".to_owned(),
            stop_if: "no residual hits remain".to_owned(),
            risk: RiskLevel::Medium,
        });
        steps.push(BisectStep {
            id: format!("P1-{}", steps.len() + 1),
            purpose: "re-run the follow-up verifier".to_owned(),
            when: "residual hits identified".to_owned(),
            cmd: format!("changegate verify-followup-fixes --scan-report-json {SCAN_REPORT_JSON}"),
            expected: "an updated verify report".to_owned(),
            stop_if: "status is PASS".to_owned(),
            risk: RiskLevel::Medium,
        });
        steps.push(BisectStep {
            id: format!("P1-{}", steps.len() + 1),
            purpose: "generate and apply a follow-up patch plan".to_owned(),
            when: "verify remains FAIL or WARN".to_owned(),
            cmd: format!("changegate apply-followup-fixes --moves-json {MOVES_JSON}"),
            expected: "candidate replacements applied".to_owned(),
            stop_if: "no safe candidates remain".to_owned(),
            risk: RiskLevel::Medium,
        });
    }

    if bad.blocked_by_counts.get("guard_gate").copied().unwrap_or(0) > 0 {
        steps.push(BisectStep {
            id: format!("P2-{}", steps.len() + 1),
            purpose: "run a guard precheck against the current module boundary".to_owned(),
            when: "guard_gate blocked one or more commands".to_owned(),
            cmd: format!("changegate debug-guard --module-path {MODULE_PATH}"),
            expected: "violations enumerated".to_owned(),
            stop_if: "no violations found".to_owned(),
            risk: RiskLevel::Medium,
        });
        steps.push(BisectStep {
            id: format!("P2-{}", steps.len() + 1),
            purpose: "plan move remediation for outside-module files".to_owned(),
            when: "guard precheck still reports violations".to_owned(),
            cmd: format!("changegate apply-move --module-path {MODULE_PATH}"),
            expected: "a generated move plan".to_owned(),
            stop_if: "plan has zero movable items".to_owned(),
            risk: RiskLevel::Medium,
        });
    }

    if bad.blocked_by_counts.get("loop_gate").copied().unwrap_or(0) > 0 {
        steps.push(BisectStep {
            id: format!("P3-{}", steps.len() + 1),
            purpose: "refresh the health view over the trace window".to_owned(),
            when: "loop_gate blocked one or more commands".to_owned(),
            cmd: format!("changegate trace-index --trace-id {}", bad.trace_id),
            expected: "current loop triggers listed".to_owned(),
            stop_if: "no active loop triggers".to_owned(),
            risk: RiskLevel::Low,
        });
        steps.push(BisectStep {
            id: format!("P3-{}", steps.len() + 1),
            purpose: "re-run with the loop detector's hard stop honored".to_owned(),
            when: "loop triggers remain active".to_owned(),
            cmd: format!("changegate run --pipeline {PIPELINE_PATH}"),
            expected: "command proceeds or blocks with a fresh reason".to_owned(),
            stop_if: "loop level returns to NONE".to_owned(),
            risk: RiskLevel::Low,
        });
    }

    steps.push(BisectStep {
        id: format!("P4-{}", steps.len() + 1),
        purpose: "locate the snapshot chain for this trace".to_owned(),
        when: "always, as a baseline safety check".to_owned(),
        cmd: "changegate snapshot-index".to_owned(),
        expected: "a snapshot is available to restore from".to_owned(),
        stop_if: "no snapshots exist for this trace".to_owned(),
        risk: RiskLevel::Low,
    });
    steps.push(BisectStep {
        id: format!("P4-{}", steps.len() + 1),
        purpose: "generate a restore guide and compare deliveries".to_owned(),
        when: "a snapshot was located".to_owned(),
        cmd: "changegate snapshot-restore-guide".to_owned(),
        expected: "restore_full.sh and restore_files.sh are generated".to_owned(),
        stop_if: "working tree already matches the snapshot".to_owned(),
        risk: RiskLevel::Low,
    });

    while steps.len() < MIN_PLAN_SIZE {
        let id = format!("P4-fallback-{}", steps.len() + 1);
        steps.push(BisectStep {
            id,
            purpose: "re-run validate to confirm the repository is in a known-good state".to_owned(),
            when: "no higher-priority trigger applies".to_owned(),
            cmd: "changegate validate".to_owned(),
            expected: "Errors: 0".to_owned(),
            stop_if: "validate reports errors".to_owned(),
            risk: RiskLevel::None,
        });
    }

    steps.truncate(MAX_PLAN_SIZE);
    steps
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(trace_id: &str, exit_code: i32, verify: VerifyStatus, bypass: bool) -> TraceIndex {
        let mut ack_used_counts = BTreeMap::new();
        ack_used_counts.insert(AckUsed::None.to_string(), 1);
        TraceIndex {
            trace_id: trace_id.to_owned(),
            command_counts: BTreeMap::new(),
            blocked_by_counts: BTreeMap::new(),
            verify_status_counts: BTreeMap::new(),
            ack_used_counts,
            paths: BTreeMap::new(),
            latest_verify_status: Some(verify),
            latest_exit_code: Some(exit_code),
            bypass_attempt: bypass,
            last_seen_at: Some(chrono::Utc::now()),
        }
    }

    #[test]
    fn diff_flags_verify_regression() {
        let bad = index("bad1", 4, VerifyStatus::Fail, false);
        let good = index("good1", 0, VerifyStatus::Pass, false);
        let result = diff(&bad, &good);
        assert!(result.recommended_actions.iter().any(|a| a.contains("verify regressed")));
    }

    #[test]
    fn bisect_pads_to_minimum_size() {
        let bad = index("bad1", 0, VerifyStatus::Pass, false);
        let steps = bisect(&bad);
        assert!(steps.len() >= MIN_PLAN_SIZE);
    }

    #[test]
    fn bisect_caps_at_twelve_steps() {
        let mut bad = index("bad1", 4, VerifyStatus::Fail, true);
        bad.blocked_by_counts.insert("guard_gate".to_owned(), 1);
        bad.blocked_by_counts.insert("loop_gate".to_owned(), 1);
        let steps = bisect(&bad);
        assert!(steps.len() <= MAX_PLAN_SIZE);
    }

    #[test]
    fn bisect_prioritizes_bypass_first() {
        let bad = index("bad1", 4, VerifyStatus::Fail, true);
        let steps = bisect(&bad);
        assert!(steps[0].id.starts_with("P0"));
    }
}
