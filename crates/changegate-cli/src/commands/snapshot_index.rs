//! `changegate snapshot-index`: list every snapshot under the tools
//! subtree, newest first.

use changegate::error::GateError;
use changegate::snapshot;
use clap::Args as ClapArgs;

use crate::context::Context;

#[derive(ClapArgs)]
pub struct Args {}

pub fn run(ctx: &Context, _args: &Args) -> Result<i32, GateError> {
    let snapshots_dir = ctx.tools_dir.join("snapshots");
    let snapshots = snapshot::list(&snapshots_dir)?;
    ctx.write_json("snapshot_index.json", &snapshots)?;

    let mut md = String::from("# Snapshot index\n\n| label | created_at | files | size_total | truncated |\n|---|---|---|---|---|\n");
    for snap in &snapshots {
        md.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            snap.label,
            snap.created_at,
            snap.files.len(),
            snap.size_total,
            snap.truncated
        ));
    }
    ctx.write_text("snapshot_index.md", &md)?;

    println!("snapshot-index: {} snapshot(s)", snapshots.len());
    Ok(0)
}
