//! `changegate validate`: advisory guard check over the current change
//! set, with no side effects beyond the written report.

use camino::Utf8PathBuf;
use changegate::error::GateError;
use changegate::guard::{self, GuardMode};
use changegate::path::ModulePathSource;
use changegate::vcs;
use clap::Args as ClapArgs;

use crate::context::Context;

#[derive(ClapArgs)]
pub struct Args {
    #[arg(long)]
    pub pipeline: Option<Utf8PathBuf>,
}

pub fn run(ctx: &Context, _args: &Args) -> Result<i32, GateError> {
    let mut record = ctx.base_trace_record("validate");

    if ctx.guard_disabled() {
        println!("guard disabled via CHANGEGATE_GUARD_DISABLE");
        record.action = "guard_disabled".to_owned();
        ctx.append_trace(&record)?;
        return Ok(0);
    }

    let injected = ctx.injected_change_list();
    let change_set = vcs::detect_changed_files(&ctx.repo_root, injected.as_deref(), None, None);

    let report = guard::evaluate(
        &ctx.repo_root,
        GuardMode::Validate,
        None,
        ModulePathSource::Unset,
        &change_set,
        &ctx.policy.guardrails,
        ctx.strict_vcs(),
        ctx.now(),
    );

    ctx.write_json("guard_report.json", &report)?;
    println!("Errors: {} Warnings: 0", report.violations.len());

    record.guard_decision = report.decision.to_string();
    record.guard_decision_reason = report.decision_reason.clone();
    record.changed_files_count = report.changed_files.len();
    record.violations_count = report.violations.len();
    record.changed_files_sample = changegate::trace::sample_changed_files(
        &report.changed_files.iter().map(ToString::to_string).collect::<Vec<_>>(),
    );
    record.exit_code = report.exit_code;
    if report.exit_code != 0 {
        record.blocked_by = changegate::trace::BlockedBy::GuardGate;
    }
    ctx.append_trace(&record)?;

    if report.exit_code == 0 {
        Ok(0)
    } else {
        Err(GateError::GuardViolation {
            count: report.violations.len(),
            reason: report.decision_reason,
        })
    }
}
