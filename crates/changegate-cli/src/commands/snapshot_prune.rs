//! `changegate snapshot-prune`: compute (and, with `--apply`, perform)
//! which snapshots fall outside the retention policy.

use changegate::error::GateError;
use changegate::snapshot;
use clap::Args as ClapArgs;

use crate::context::Context;

#[derive(ClapArgs)]
pub struct Args {
    #[arg(long)]
    pub keep_last: Option<usize>,
    #[arg(long)]
    pub max_total_size_mb: Option<u64>,
    #[arg(long)]
    pub apply: bool,
    #[arg(long)]
    pub protected_labels: Vec<String>,
}

pub fn run(ctx: &Context, args: &Args) -> Result<i32, GateError> {
    let snapshots_dir = ctx.tools_dir.join("snapshots");
    let keep_last = args.keep_last.unwrap_or(ctx.policy.snapshots.keep_last);
    let max_total_size_mb = args.max_total_size_mb.unwrap_or(ctx.policy.snapshots.max_total_size_mb);

    let decisions = snapshot::prune(&snapshots_dir, keep_last, max_total_size_mb, &args.protected_labels, args.apply)?;
    ctx.write_json("snapshot_prune_plan.json", &decisions)?;

    println!(
        "snapshot-prune: {} snapshot(s) {}",
        decisions.len(),
        if args.apply { "removed" } else { "would be removed" }
    );
    for decision in &decisions {
        println!("  {} ({}): {}", decision.label, decision.dir, decision.reason);
    }
    Ok(0)
}
