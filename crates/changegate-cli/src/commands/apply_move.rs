//! `changegate apply-move`: plan (default) or execute a move plan for
//! the resolved module's guard violations, gated by risk and backed by
//! a pre-move snapshot.

use camino::Utf8PathBuf;
use changegate::error::GateError;
use changegate::guard::{self, GuardMode};
use changegate::moveplan;
use changegate::path;
use changegate::risk;
use changegate::trace::BlockedBy;
use changegate::vcs;
use clap::Args as ClapArgs;

use crate::context::Context;

#[derive(ClapArgs)]
pub struct Args {
    #[arg(long)]
    pub yes: bool,
    #[arg(long)]
    pub module_path: Option<String>,
    #[arg(long, default_value_t = true)]
    pub move_dry_run: bool,
    #[arg(long)]
    pub ack: Option<String>,
    #[arg(long)]
    pub ack_file: Option<Utf8PathBuf>,
    #[arg(long)]
    pub ack_latest: bool,
    #[arg(long)]
    pub no_snapshot: bool,
}

pub fn run(ctx: &Context, args: &Args) -> Result<i32, GateError> {
    if !args.yes {
        return Err(GateError::UsageError {
            detail: "apply-move requires --yes to confirm a mutating operation".to_owned(),
        });
    }

    let mut record = ctx.base_trace_record("apply-move");

    let (module_path, module_path_source) =
        path::resolve_module_path(args.module_path.as_deref(), None, &[], &ctx.repo_root)?;
    record.effective_module_path = module_path.clone();
    record.module_path_source = module_path_source.to_string();

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
    record.guard_decision = guard_report.decision.to_string();
    record.guard_decision_reason = guard_report.decision_reason.clone();
    record.violations_count = guard_report.violations.len();

    let repo_root = ctx.repo_root.clone();
    let move_plan = moveplan::plan(
        module_path.as_deref(),
        &guard_report.violations,
        |src| repo_root.join(src).exists(),
        |dst| repo_root.join(dst).exists(),
    );
    let script = moveplan::render_move_script(&move_plan, guard_report.vcs);
    record.move_source_token = move_plan.items.iter().find(|i| i.can_move).map(|i| i.src.as_str().to_owned());
    ctx.write_json("move_report.json", &move_plan)?;
    ctx.write_text("move_plan.sh", &script)?;
    println!(
        "apply-move plan: {} movable, {} non-movable, {} high-risk",
        move_plan.summary.movable, move_plan.summary.non_movable, move_plan.summary.high_risk
    );

    if args.move_dry_run {
        record.action = "planned".to_owned();
        ctx.append_trace(&record)?;
        return Ok(0);
    }

    let history = changegate::trace::read_all(&ctx.trace_path())?;
    let loop_diagnostics = changegate::loopdetect::evaluate(&history, Some(&ctx.trace_id));

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
            next_cmd: "changegate apply-move --yes --ack-latest".to_owned(),
        });
    }

    if let Some(mut ack) = presented_ack {
        risk::consume(&mut ack, ctx.now());
        ctx.save_latest_token(&ack)?;
    }

    if !args.no_snapshot {
        let includes: Vec<Utf8PathBuf> = move_plan
            .items
            .iter()
            .filter(|i| i.can_move)
            .map(|i| ctx.repo_root.join(i.src.as_path()))
            .collect();
        let snapshots_dir = ctx.tools_dir.join("snapshots");
        let rand8 = ctx.context_id.chars().take(8).collect::<String>();
        let snapshot = changegate::snapshot::create(
            &ctx.repo_root,
            &snapshots_dir,
            &ctx.context_id,
            &ctx.trace_id,
            "pre-move",
            &includes,
            ctx.policy.snapshots.max_copy_size_mb,
            ctx.now(),
            &rand8,
        )?;
        record.snapshot_created = true;
        record.snapshot_path = Some(snapshot.dir.clone());
        record.snapshot_label = Some(snapshot.label.clone());
    }

    for item in move_plan.items.iter().filter(|i| i.can_move) {
        let Some(dst) = &item.dst else { continue };
        let src_full = ctx.repo_root.join(item.src.as_path());
        let dst_full = ctx.repo_root.join(dst.as_path());
        if let Some(parent) = dst_full.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::rename(&src_full, &dst_full)?;
    }

    // Advisory-only recheck: the post-move guard decision is recorded on
    // the trace but never gates apply-move itself, since the move already
    // happened and is the thing that was supposed to fix the violations.
    let post_move_injected = ctx.injected_change_list();
    let post_move_change_set = vcs::detect_changed_files(&ctx.repo_root, post_move_injected.as_deref(), None, None);
    let post_move_guard_report = guard::evaluate(
        &ctx.repo_root,
        GuardMode::DebugGuard,
        module_path.as_deref(),
        module_path_source,
        &post_move_change_set,
        &ctx.policy.guardrails,
        ctx.strict_vcs(),
        ctx.now(),
    );
    ctx.write_json("guard_report.json", &post_move_guard_report)?;
    record.guard_decision = post_move_guard_report.decision.to_string();
    record.guard_decision_reason = post_move_guard_report.decision_reason.clone();
    record.violations_count = post_move_guard_report.violations.len();

    record.action = "completed".to_owned();
    ctx.append_trace(&record)?;
    println!("apply-move: {} file(s) moved", move_plan.summary.movable);
    Ok(0)
}
