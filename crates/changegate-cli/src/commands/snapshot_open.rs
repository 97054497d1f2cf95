//! `changegate snapshot-open`: locate one snapshot by trace id, dir-name
//! suffix, or label, and print its manifest.

use changegate::error::GateError;
use changegate::snapshot;
use clap::Args as ClapArgs;

use crate::context::Context;

#[derive(ClapArgs)]
pub struct Args {
    #[arg(long)]
    pub trace_id: Option<String>,
    #[arg(long)]
    pub snapshot_id: Option<String>,
    #[arg(long)]
    pub label: Option<String>,
}

pub fn run(ctx: &Context, args: &Args) -> Result<i32, GateError> {
    let snapshots_dir = ctx.tools_dir.join("snapshots");
    let snapshots = snapshot::list(&snapshots_dir)?;

    let found = snapshots.into_iter().find(|snap| {
        args.trace_id.as_deref().is_none_or(|t| snap.trace_id == t)
            && args.label.as_deref().is_none_or(|l| snap.label == l)
            && args
                .snapshot_id
                .as_deref()
                .is_none_or(|id| snap.dir.file_name().is_some_and(|name| name.contains(id)))
    });

    let Some(snapshot) = found else {
        return Err(GateError::UsageError {
            detail: "no snapshot matches the given selectors".to_owned(),
        });
    };

    println!("snapshot {} (trace {}), {} file(s), created {}", snapshot.label, snapshot.trace_id, snapshot.files.len(), snapshot.created_at);
    for file in &snapshot.files {
        println!("  {} -> {} ({} bytes, sha256 {})", file.src, file.dst, file.size, file.sha256);
    }
    Ok(0)
}
