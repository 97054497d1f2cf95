//! `changegate run`: the full gate-order sequence for one pipeline step
//! — guard, loop, risk — with no move or patch of its own.

use camino::Utf8PathBuf;
use changegate::error::GateError;
use changegate::guard::{self, GuardMode};
use changegate::path;
use changegate::risk;
use changegate::trace::BlockedBy;
use changegate::vcs;
use clap::Args as ClapArgs;

use crate::context::Context;

#[derive(ClapArgs)]
pub struct Args {
    #[arg(long)]
    pub pipeline: Utf8PathBuf,
    #[arg(long)]
    pub module_path: Option<String>,
    #[arg(long)]
    pub ack: Option<String>,
    #[arg(long)]
    pub ack_file: Option<Utf8PathBuf>,
    #[arg(long)]
    pub ack_latest: bool,
    #[arg(long)]
    pub fail_on_loop: bool,
}

pub fn run(ctx: &Context, args: &Args) -> Result<i32, GateError> {
    let mut record = ctx.base_trace_record("run");
    record.pipeline_path = Some(args.pipeline.clone());

    let (module_path, module_path_source) =
        path::resolve_module_path(args.module_path.as_deref(), None, &[], &ctx.repo_root)?;
    record.effective_module_path = module_path.clone();
    record.module_path_source = module_path_source.to_string();

    if ctx.guard_disabled() {
        record.action = "guard_disabled".to_owned();
        ctx.append_trace(&record)?;
        println!("guard disabled via CHANGEGATE_GUARD_DISABLE");
        return Ok(0);
    }

    let injected = ctx.injected_change_list();
    let change_set = vcs::detect_changed_files(&ctx.repo_root, injected.as_deref(), None, None);

    let guard_report = guard::evaluate(
        &ctx.repo_root,
        GuardMode::Run,
        module_path.as_deref(),
        module_path_source,
        &change_set,
        &ctx.policy.guardrails,
        ctx.strict_vcs(),
        ctx.now(),
    );
    ctx.write_json("guard_report.json", &guard_report)?;
    record.guard_decision = guard_report.decision.to_string();
    record.guard_decision_reason = guard_report.decision_reason.clone();
    record.changed_files_count = guard_report.changed_files.len();
    record.violations_count = guard_report.violations.len();

    if guard_report.exit_code != 0 {
        record.blocked_by = BlockedBy::GuardGate;
        record.exit_code = guard_report.exit_code;
        ctx.append_trace(&record)?;
        return Err(GateError::GuardViolation {
            count: guard_report.violations.len(),
            reason: guard_report.decision_reason,
        });
    }

    let history = changegate::trace::read_all(&ctx.trace_path())?;
    let loop_diagnostics = changegate::loopdetect::evaluate(&history, Some(&ctx.trace_id));
    ctx.write_json("loop_diagnostics.json", &loop_diagnostics)?;

    if args.fail_on_loop && loop_diagnostics.level == changegate::loopdetect::LoopLevel::High {
        record.blocked_by = BlockedBy::LoopGate;
        record.exit_code = 3;
        ctx.append_trace(&record)?;
        return Err(GateError::GateBlocked {
            gate: "loop_gate",
            risk: changegate::risk::RiskLevel::High,
            next_cmd: "changegate debug-guard".to_owned(),
        });
    }

    let (presented_ack, ack_used) = ctx.resolve_presented_ack(args.ack.as_deref(), args.ack_file.as_deref(), args.ack_latest)?;
    record.ack_used = ack_used;

    let risk_report = risk::evaluate(
        &ctx.repo_root,
        &guard_report,
        &loop_diagnostics,
        None,
        ctx.policy.gates.risk_threshold,
        ctx.policy.gates.verify_threshold,
        ctx.policy.gates.verify_gate_enabled,
        ctx.policy.gates.verify_as_risk,
        false,
        presented_ack.as_ref(),
        ctx.now(),
    );
    ctx.write_json("risk_gate_report.json", &risk_report)?;

    if risk_report.blocked {
        let token = risk::issue_token(&ctx.repo_root, &risk_report, ctx.policy.gates.token_ttl_minutes, ctx.now());
        ctx.save_latest_token(&token)?;
        record.blocked_by = BlockedBy::RiskGate;
        record.exit_code = ctx.policy.gates.risk_exit_code;
        ctx.append_trace(&record)?;
        return Err(GateError::GateBlocked {
            gate: "risk_gate",
            risk: risk_report.overall_risk,
            next_cmd: "changegate run --ack-latest".to_owned(),
        });
    }

    if let Some(mut ack) = presented_ack {
        risk::consume(&mut ack, ctx.now());
        ctx.save_latest_token(&ack)?;
    }

    record.action = "completed".to_owned();
    ctx.append_trace(&record)?;
    println!("run: guard pass, loop {}, risk {}", loop_diagnostics.level, risk_report.overall_risk);
    Ok(0)
}
