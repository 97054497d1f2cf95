//! `changegate trace-diff`: diff two resolved trace indices and list
//! recommended follow-up actions.

use changegate::bisect;
use changegate::error::GateError;
use changegate::trace;
use clap::Args as ClapArgs;

use crate::context::Context;

#[derive(ClapArgs)]
pub struct Args {
    #[arg(long)]
    pub a: String,
    #[arg(long)]
    pub b: String,
}

fn resolve(prefix: &str, records: &[trace::TraceRecord]) -> Result<String, GateError> {
    trace::match_trace(prefix, records).into_iter().next().ok_or_else(|| GateError::UsageError {
        detail: format!("no trace id matches prefix '{prefix}'"),
    })
}

pub fn run(ctx: &Context, args: &Args) -> Result<i32, GateError> {
    let records = trace::read_all(&ctx.trace_path())?;
    let bad_id = resolve(&args.a, &records)?;
    let good_id = resolve(&args.b, &records)?;

    let bad_index = trace::index(&bad_id, &records);
    let good_index = trace::index(&good_id, &records);
    let diff = bisect::diff(&bad_index, &good_index);
    ctx.write_json("trace_diff.json", &diff)?;

    let mut md = format!("# Trace diff: {bad_id} vs {good_id}\n\n## Recommended actions\n\n");
    for action in &diff.recommended_actions {
        md.push_str(&format!("- {action}\n"));
    }
    ctx.write_text("trace_diff.md", &md)?;

    println!("trace-diff: {} recommended action(s)", diff.recommended_actions.len());
    for action in &diff.recommended_actions {
        println!("  - {action}");
    }
    Ok(0)
}
