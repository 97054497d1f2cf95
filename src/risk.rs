//! Risk Gate & Token Store (C9).
//!
//! Combines guard, loop and verify signals into an overall risk level,
//! decides whether a command may proceed, and issues/validates the
//! single-use, TTL-bounded ACK tokens that unblock it.

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::GateError;
use crate::guard::{GuardDecision, GuardReport, ViolationType};
use crate::loopdetect::{LoopDiagnostics, LoopLevel};
use crate::moveplan::MovePlan;
use crate::verify::{VerifyReport, VerifyStatus};

/// Overall or per-source risk severity, ordered `None < Low < Medium <
/// High`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    None,
    Low,
    Medium,
    High,
}

impl std::fmt::Display for RiskLevel {
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

impl RiskLevel {
    #[must_use]
    pub fn max(self, other: Self) -> Self {
        if self >= other {
            self
        } else {
            other
        }
    }
}

/// A single-use, TTL-bounded ACK token bound to one `(repo_root,
/// overall_risk, reason_hash)` triple.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AckToken {
    pub value: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub reason_hash: String,
    pub consumed: bool,
    pub consumed_at: Option<DateTime<Utc>>,
    pub repo_root: Utf8PathBuf,
    pub overall_risk: RiskLevel,
}

/// The risk gate's decision for one command invocation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RiskGateReport {
    pub overall_risk: RiskLevel,
    pub threshold: RiskLevel,
    pub reasons: Vec<String>,
    pub reason_hash: String,
    pub blocked: bool,
    pub ack_valid: bool,
    pub verify_status: Option<VerifyStatus>,
    pub verify_gate_required: bool,
    pub next_cmd: Option<String>,
    pub token: Option<AckToken>,
}

fn guard_risk(guard: &GuardReport) -> RiskLevel {
    if guard.decision == GuardDecision::Pass && guard.violations.is_empty() {
        return RiskLevel::None;
    }
    let has_severe = guard
        .violations
        .iter()
        .any(|v| matches!(v.violation_type, ViolationType::Forbidden | ViolationType::MissingModulePath));
    if has_severe {
        RiskLevel::High
    } else if !guard.violations.is_empty() {
        RiskLevel::Medium
    } else {
        RiskLevel::None
    }
}

fn loop_risk(loop_diagnostics: &LoopDiagnostics) -> RiskLevel {
    match loop_diagnostics.level {
        LoopLevel::None => RiskLevel::None,
        LoopLevel::Low => RiskLevel::Low,
        LoopLevel::Medium => RiskLevel::Medium,
        LoopLevel::High => RiskLevel::High,
    }
}

/// Whether the verify gate is required for this command, and the risk
/// contribution it makes when it is.
fn verify_elevation(
    verify: Option<&VerifyReport>,
    verify_threshold: VerifyStatus,
    verify_gate_enabled: bool,
    verify_as_risk: bool,
    command_is_verify_required: bool,
) -> (RiskLevel, bool) {
    let Some(report) = verify else {
        return (RiskLevel::None, false);
    };
    let required = verify_gate_enabled
        && command_is_verify_required
        && report.status != VerifyStatus::Missing
        && report.status.rank() >= verify_threshold.rank();
    let elevation = if required && verify_as_risk && report.status == VerifyStatus::Fail {
        RiskLevel::High
    } else {
        RiskLevel::None
    };
    (elevation, required)
}

/// Canonicalize the non-volatile inputs and hash them with SHA-256,
/// giving a stable `reason_hash` for a given guard/loop/verify state.
#[must_use]
pub fn reason_hash(guard: &GuardReport, loop_diagnostics: &LoopDiagnostics, verify: Option<&VerifyReport>) -> String {
    let violation_types: Vec<String> = guard.violations.iter().map(|v| v.violation_type.to_string()).collect();
    let loop_triggers: Vec<String> = loop_diagnostics.triggers.iter().map(|t| t.kind.clone()).collect();
    let payload = serde_json::json!({
        "guard": {
            "decision": guard.decision.to_string(),
            "decision_reason": guard.decision_reason,
            "violations_count": guard.violations.len(),
            "violation_types": violation_types,
        },
        "loop": {
            "loop_level": loop_diagnostics.level.to_string(),
            "loop_triggers": loop_triggers,
        },
        "extra": {
            "verify_status": verify.map(|v| v.status.to_string()),
        },
    });
    let canonical = serde_json::to_string(&payload).unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    hex_encode(&digest)
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Evaluate the risk gate for one command invocation.
#[allow(clippy::too_many_arguments)]
#[must_use]
pub fn evaluate(
    repo_root: &Utf8Path,
    guard: &GuardReport,
    loop_diagnostics: &LoopDiagnostics,
    verify: Option<&VerifyReport>,
    threshold: RiskLevel,
    verify_threshold: VerifyStatus,
    verify_gate_enabled: bool,
    verify_as_risk: bool,
    command_is_verify_required: bool,
    presented_ack: Option<&AckToken>,
    now: DateTime<Utc>,
) -> RiskGateReport {
    let g_risk = guard_risk(guard);
    let l_risk = loop_risk(loop_diagnostics);
    let (v_elevation, verify_gate_required) =
        verify_elevation(verify, verify_threshold, verify_gate_enabled, verify_as_risk, command_is_verify_required);

    let overall_risk = g_risk.max(l_risk).max(v_elevation);
    let hash = reason_hash(guard, loop_diagnostics, verify);

    let mut reasons = Vec::new();
    if g_risk > RiskLevel::None {
        reasons.push(format!("guard: {}", guard.decision_reason));
    }
    if l_risk > RiskLevel::None {
        reasons.push(format!("loop: level {}", loop_diagnostics.level));
    }
    if let Some(report) = verify {
        if report.status == VerifyStatus::Missing {
            reasons.push("verify: no tokens derivable, treated as informational only".to_owned());
        } else if verify_gate_required {
            reasons.push(format!("verify: status {} at or above threshold", report.status));
        }
    }

    if overall_risk < threshold {
        return RiskGateReport {
            overall_risk,
            threshold,
            reasons,
            reason_hash: hash,
            blocked: false,
            ack_valid: false,
            verify_status: verify.map(|v| v.status),
            verify_gate_required,
            next_cmd: None,
            token: None,
        };
    }

    let ack_valid = presented_ack.is_some_and(|ack| {
        !ack.consumed
            && ack.expires_at > now
            && ack.repo_root == repo_root
            && ack.overall_risk == overall_risk
            && ack.reason_hash == hash
    });

    if ack_valid {
        return RiskGateReport {
            overall_risk,
            threshold,
            reasons,
            reason_hash: hash,
            blocked: false,
            ack_valid: true,
            verify_status: verify.map(|v| v.status),
            verify_gate_required,
            next_cmd: None,
            token: presented_ack.cloned(),
        };
    }

    RiskGateReport {
        overall_risk,
        threshold,
        reasons,
        reason_hash: hash,
        blocked: true,
        ack_valid: false,
        verify_status: verify.map(|v| v.status),
        verify_gate_required,
        next_cmd: Some("changegate <command> --ack-latest".to_owned()),
        token: None,
    }
}

/// Issue a fresh token for a blocked gate report.
#[must_use]
pub fn issue_token(repo_root: &Utf8Path, report: &RiskGateReport, ttl_minutes: i64, now: DateTime<Utc>) -> AckToken {
    AckToken {
        value: random_token_hex(),
        issued_at: now,
        expires_at: now + Duration::minutes(ttl_minutes),
        reason_hash: report.reason_hash.clone(),
        consumed: false,
        consumed_at: None,
        repo_root: repo_root.to_path_buf(),
        overall_risk: report.overall_risk,
    }
}

/// 32 lowercase hex characters, matching the entropy of the original
/// tool's `secrets.token_hex(16)`.
fn random_token_hex() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Mark `token` consumed, in place, so the durable on-disk copy reflects
/// it once the caller rewrites the token file.
pub fn consume(token: &mut AckToken, now: DateTime<Utc>) {
    token.consumed = true;
    token.consumed_at = Some(now);
}

/// Validate a presented token against the expected binding, without
/// consuming it.
///
/// # Errors
/// Returns [`GateError::TokenInvalid`] describing why the token is
/// rejected.
pub fn validate(
    token: &AckToken,
    repo_root: &Utf8Path,
    overall_risk: RiskLevel,
    expected_hash: &str,
    now: DateTime<Utc>,
) -> Result<(), GateError> {
    if token.consumed {
        return Err(GateError::TokenInvalid {
            reason: "token already consumed".to_owned(),
        });
    }
    if token.expires_at <= now {
        return Err(GateError::TokenInvalid {
            reason: "token expired".to_owned(),
        });
    }
    if token.repo_root != repo_root {
        return Err(GateError::TokenInvalid {
            reason: "token was issued for a different repository".to_owned(),
        });
    }
    if token.overall_risk != overall_risk {
        return Err(GateError::TokenInvalid {
            reason: "token was issued for a different risk level".to_owned(),
        });
    }
    if token.reason_hash != expected_hash {
        return Err(GateError::TokenInvalid {
            reason: "token was issued for a different reason".to_owned(),
        });
    }
    Ok(())
}

/// Whether an auto-ACK may be issued without prompting the operator,
/// per the priority-ordered policy.
#[must_use]
pub fn auto_ack_eligible(guard: &GuardReport, overall_risk: RiskLevel, move_plan: Option<&MovePlan>) -> bool {
    let has_forbidden = guard.violations.iter().any(|v| v.violation_type == ViolationType::Forbidden);
    if has_forbidden {
        return false;
    }
    if overall_risk < RiskLevel::High {
        return true;
    }
    let has_missing_module = guard.violations.iter().any(|v| v.violation_type == ViolationType::MissingModulePath);
    if has_missing_module {
        return false;
    }
    let only_outside_module = guard
        .violations
        .iter()
        .all(|v| v.violation_type == ViolationType::OutsideModule);
    if only_outside_module {
        return move_plan.is_some_and(|plan| {
            plan.generated && !plan.items.is_empty() && plan.summary.non_movable == 0 && plan.summary.high_risk == 0
        });
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::{GuardMode, Violation};
    use crate::loopdetect::LoopTrigger;
    use crate::path::{ModulePathSource, PathSpec};
    use crate::vcs::Vcs;

    fn empty_guard() -> GuardReport {
        GuardReport {
            timestamp: Utc::now(),
            repo_root: Utf8PathBuf::from("/repo"),
            mode: GuardMode::Run,
            advisory: false,
            vcs: Vcs::Synthetic,
            module_path: None,
            module_path_source: ModulePathSource::Unset,
            effective_allowlist_prefixes: Vec::new(),
            changed_files: Vec::new(),
            ignored_files: Vec::new(),
            violations: Vec::new(),
            decision: GuardDecision::Pass,
            decision_reason: "no violations found".to_owned(),
            suggestions: Vec::new(),
            exit_code: 0,
            unsupported_vcs: false,
        }
    }

    fn no_loop() -> LoopDiagnostics {
        LoopDiagnostics {
            level: LoopLevel::None,
            triggers: Vec::new(),
            records_considered: 0,
        }
    }

    #[test]
    fn passes_when_overall_risk_below_threshold() {
        let guard = empty_guard();
        let loop_diagnostics = no_loop();
        let report = evaluate(
            Utf8Path::new("/repo"),
            &guard,
            &loop_diagnostics,
            None,
            RiskLevel::High,
            VerifyStatus::Fail,
            true,
            true,
            true,
            None,
            Utc::now(),
        );
        assert!(!report.blocked);
        assert_eq!(report.overall_risk, RiskLevel::None);
    }

    #[test]
    fn blocks_on_forbidden_violation_without_ack() {
        let mut guard = empty_guard();
        guard.decision = GuardDecision::Fail;
        guard.violations.push(Violation {
            file: PathSpec::parse("sys/a.rs").unwrap(),
            rule: "forbidden_path_patterns".to_owned(),
            violation_type: ViolationType::Forbidden,
            reason: "forbidden".to_owned(),
            suggestion: "s".to_owned(),
        });
        let report = evaluate(
            Utf8Path::new("/repo"),
            &guard,
            &no_loop(),
            None,
            RiskLevel::High,
            VerifyStatus::Fail,
            true,
            true,
            true,
            None,
            Utc::now(),
        );
        assert!(report.blocked);
        assert_eq!(report.overall_risk, RiskLevel::High);
    }

    #[test]
    fn valid_ack_unblocks() {
        let mut guard = empty_guard();
        guard.decision = GuardDecision::Fail;
        guard.violations.push(Violation {
            file: PathSpec::parse("sys/a.rs").unwrap(),
            rule: "forbidden_path_patterns".to_owned(),
            violation_type: ViolationType::Forbidden,
            reason: "forbidden".to_owned(),
            suggestion: "s".to_owned(),
        });
        let now = Utc::now();
        let hash = reason_hash(&guard, &no_loop(), None);
        let token = AckToken {
            value: "abc".to_owned(),
            issued_at: now,
            expires_at: now + Duration::minutes(10),
            reason_hash: hash,
            consumed: false,
            consumed_at: None,
            repo_root: Utf8PathBuf::from("/repo"),
            overall_risk: RiskLevel::High,
        };
        let report = evaluate(
            Utf8Path::new("/repo"),
            &guard,
            &no_loop(),
            None,
            RiskLevel::High,
            VerifyStatus::Fail,
            true,
            true,
            true,
            Some(&token),
            now,
        );
        assert!(!report.blocked);
        assert!(report.ack_valid);
    }

    #[test]
    fn validate_rejects_consumed_token() {
        let now = Utc::now();
        let mut token = AckToken {
            value: "abc".to_owned(),
            issued_at: now,
            expires_at: now + Duration::minutes(10),
            reason_hash: "h".to_owned(),
            consumed: false,
            consumed_at: None,
            repo_root: Utf8PathBuf::from("/repo"),
            overall_risk: RiskLevel::High,
        };
        consume(&mut token, now);
        let err = validate(&token, Utf8Path::new("/repo"), RiskLevel::High, "h", now).unwrap_err();
        assert!(matches!(err, GateError::TokenInvalid { .. }));
    }

    #[test]
    fn auto_ack_never_for_forbidden() {
        let mut guard = empty_guard();
        guard.violations.push(Violation {
            file: PathSpec::parse("sys/a.rs").unwrap(),
            rule: "r".to_owned(),
            violation_type: ViolationType::Forbidden,
            reason: "r".to_owned(),
            suggestion: "s".to_owned(),
        });
        assert!(!auto_ack_eligible(&guard, RiskLevel::High, None));
    }

    #[test]
    fn auto_ack_allowed_below_high() {
        let guard = empty_guard();
        assert!(auto_ack_eligible(&guard, RiskLevel::Medium, None));
    }

    #[test]
    fn auto_ack_never_for_missing_module_path_at_high() {
        let mut guard = empty_guard();
        guard.violations.push(Violation {
            file: PathSpec::parse("a.rs").unwrap(),
            rule: "r".to_owned(),
            violation_type: ViolationType::MissingModulePath,
            reason: "r".to_owned(),
            suggestion: "s".to_owned(),
        });
        assert!(!auto_ack_eligible(&guard, RiskLevel::High, None));
    }

    #[test]
    fn auto_ack_loop_only_high_permitted() {
        let guard = empty_guard();
        assert!(auto_ack_eligible(&guard, RiskLevel::High, None));
    }

    #[test]
    fn risk_level_display_and_ordering() {
        assert_eq!(RiskLevel::High.to_string(), "high");
        assert!(RiskLevel::High > RiskLevel::Medium);
        assert_eq!(RiskLevel::None.max(RiskLevel::Low), RiskLevel::Low);
    }

    #[test]
    fn loop_trigger_rolls_up_to_high_risk() {
        let diagnostics = LoopDiagnostics {
            level: LoopLevel::High,
            triggers: vec![LoopTrigger {
                kind: "release_gate_bypass_attempt".to_owned(),
                level: LoopLevel::High,
                detail: "d".to_owned(),
            }],
            records_considered: 1,
        };
        assert_eq!(loop_risk(&diagnostics), RiskLevel::High);
    }
}
