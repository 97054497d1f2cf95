//! `changegate debug-guard`: informational guard evaluation plus
//! optional move/rollback plan generation. Always exits 0.

use camino::Utf8PathBuf;
use changegate::error::GateError;
use changegate::guard::{self, GuardMode};
use changegate::moveplan;
use changegate::path;
use changegate::vcs;
use clap::{Args as ClapArgs, ValueEnum};

use crate::context::Context;

#[derive(Clone, Copy, ValueEnum)]
pub enum Plans {
    Move,
    Rollback,
    Both,
}

#[derive(ClapArgs)]
pub struct Args {
    #[arg(long)]
    pub module_path: Option<String>,
    #[arg(long)]
    pub pipeline: Option<Utf8PathBuf>,
    #[arg(long)]
    pub generate_plans: bool,
    #[arg(long, value_enum, default_value_t = Plans::Both)]
    pub plans: Plans,
}

pub fn run(ctx: &Context, args: &Args) -> Result<i32, GateError> {
    let (module_path, module_path_source) =
        path::resolve_module_path(args.module_path.as_deref(), None, &[], &ctx.repo_root)?;

    let injected = ctx.injected_change_list();
    let change_set = vcs::detect_changed_files(&ctx.repo_root, injected.as_deref(), None, None);

    let report = guard::evaluate(
        &ctx.repo_root,
        GuardMode::DebugGuard,
        module_path.as_deref(),
        module_path_source,
        &change_set,
        &ctx.policy.guardrails,
        ctx.strict_vcs(),
        ctx.now(),
    );
    ctx.write_json("guard_report.json", &report)?;
    println!(
        "debug-guard: {} violation(s), module path {}",
        report.violations.len(),
        module_path.as_deref().map_or_else(|| "<none>".to_owned(), |p| p.to_string())
    );

    if args.generate_plans && matches!(args.plans, Plans::Move | Plans::Both) {
        let repo_root = ctx.repo_root.clone();
        let plan = moveplan::plan(
            module_path.as_deref(),
            &report.violations,
            |src| repo_root.join(src).exists(),
            |dst| repo_root.join(dst).exists(),
        );
        let script = moveplan::render_move_script(&plan, report.vcs);
        ctx.write_json("move_report.json", &plan)?;
        ctx.write_text("move_plan.sh", &script)?;
        println!(
            "move plan: {} movable, {} non-movable, {} high-risk",
            plan.summary.movable, plan.summary.non_movable, plan.summary.high_risk
        );
    }

    if args.generate_plans && matches!(args.plans, Plans::Rollback | Plans::Both) {
        let rollback = "#!/usr/bin/env bash\nset -euo pipefail\necho \"rollback: restore from the most recent snapshot via 'changegate snapshot-restore-guide'\" >&2\n".to_owned();
        ctx.write_text("rollback_plan.sh", &rollback)?;
    }

    Ok(0)
}
