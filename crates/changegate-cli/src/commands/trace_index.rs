//! `changegate trace-index`: build a per-trace-id summary over the
//! trace log, defaulting to the most recently seen trace id.

use changegate::error::GateError;
use changegate::trace;
use clap::Args as ClapArgs;

use crate::context::Context;

#[derive(ClapArgs)]
pub struct Args {
    #[arg(long)]
    pub trace_id: Option<String>,
}

pub fn run(ctx: &Context, args: &Args) -> Result<i32, GateError> {
    let records = trace::read_all(&ctx.trace_path())?;

    let trace_id = match &args.trace_id {
        Some(prefix) => {
            let matches = trace::match_trace(prefix, &records);
            matches.into_iter().next().ok_or_else(|| GateError::UsageError {
                detail: format!("no trace id matches prefix '{prefix}'"),
            })?
        }
        None => records
            .iter()
            .max_by_key(|r| r.timestamp)
            .map(|r| r.trace_id.clone())
            .ok_or_else(|| GateError::UsageError {
                detail: "trace log is empty".to_owned(),
            })?,
    };

    let index = trace::index(&trace_id, &records);
    ctx.write_json("trace_index.json", &index)?;

    let mut md = format!("# Trace {trace_id}\n\ncommands:\n");
    for (command, count) in &index.command_counts {
        md.push_str(&format!("- {command}: {count}\n"));
    }
    ctx.write_text("trace_index.md", &md)?;

    println!(
        "trace-index: {} ({} command(s), bypass_attempt={})",
        trace_id,
        index.command_counts.values().sum::<usize>(),
        index.bypass_attempt
    );
    Ok(0)
}
