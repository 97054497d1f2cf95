//! `changegate resolve-move-conflicts`: generates (and, in apply mode,
//! executes) the three conflict-resolution strategies for move items
//! flagged `dst_exists` in an existing move report.

use camino::Utf8PathBuf;
use changegate::conflict::{self, Strategy};
use changegate::error::GateError;
use changegate::moveplan::{MovePlan, RiskFlag};
use clap::{Args as ClapArgs, ValueEnum};

use crate::context::Context;

#[derive(Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum Mode {
    Plan,
    Apply,
}

#[derive(ClapArgs)]
pub struct Args {
    #[arg(long)]
    pub module_path: String,
    #[arg(long, value_enum, default_value_t = Mode::Plan)]
    pub mode: Mode,
    #[arg(long, value_enum, default_value_t = ResolveStrategy::RenameSuffix)]
    pub strategy: ResolveStrategy,
    #[arg(long)]
    pub move_report: Option<Utf8PathBuf>,
}

#[derive(Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum ResolveStrategy {
    RenameSuffix,
    ImportsBucket,
    Abort,
}

pub fn run(ctx: &Context, args: &Args) -> Result<i32, GateError> {
    let report_path = args.move_report.clone().unwrap_or_else(|| ctx.tools_dir.join("move_report.json"));
    let text = std::fs::read_to_string(&report_path)?;
    let move_plan: MovePlan = serde_json::from_str(&text).map_err(|e| GateError::IOCorruption {
        path: report_path,
        detail: e.to_string(),
    })?;

    let conflicted: Vec<_> = move_plan
        .items
        .into_iter()
        .filter(|item| item.risk_flags.contains(&RiskFlag::DstExists))
        .collect();

    let module_path = camino::Utf8Path::new(&args.module_path);
    let plan = conflict::resolve(module_path, &conflicted);

    ctx.write_json("conflict_plan.json", &plan)?;
    ctx.write_text("conflict_rename_suffix.sh", &plan.rename_suffix.script)?;
    ctx.write_text("conflict_imports_bucket.sh", &plan.imports_bucket.script)?;
    ctx.write_text("conflict_abort.sh", &plan.abort.script)?;

    println!(
        "resolve-move-conflicts: {} conflicted item(s) across {} strategies",
        conflicted.len(),
        3
    );

    if args.mode == Mode::Apply {
        let strategy_plan = match args.strategy {
            ResolveStrategy::RenameSuffix => &plan.rename_suffix,
            ResolveStrategy::ImportsBucket => &plan.imports_bucket,
            ResolveStrategy::Abort => &plan.abort,
        };
        if strategy_plan.strategy == Strategy::Abort {
            return Err(GateError::UsageError {
                detail: "abort strategy selected: no moves were applied".to_owned(),
            });
        }
        for mapping in &strategy_plan.mappings {
            let Some(dst) = &mapping.resolved_dst else { continue };
            let src_full = ctx.repo_root.join(mapping.src.as_path());
            let dst_full = ctx.repo_root.join(dst.as_path());
            if let Some(parent) = dst_full.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::rename(&src_full, &dst_full)?;
        }
        println!("applied {} conflict resolution(s)", strategy_plan.mappings.len());
    }

    Ok(0)
}
