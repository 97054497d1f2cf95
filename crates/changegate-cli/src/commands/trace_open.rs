//! `changegate trace-open`: print every record matching a trace id
//! prefix.

use changegate::error::GateError;
use changegate::trace;
use clap::Args as ClapArgs;

use crate::context::Context;

#[derive(ClapArgs)]
pub struct Args {
    #[arg(long)]
    pub trace_id: String,
}

pub fn run(ctx: &Context, args: &Args) -> Result<i32, GateError> {
    let records = trace::read_all(&ctx.trace_path())?;
    let matches = trace::match_trace(&args.trace_id, &records);
    let Some(trace_id) = matches.into_iter().next() else {
        return Err(GateError::UsageError {
            detail: format!("no trace id matches prefix '{}'", args.trace_id),
        });
    };

    let mut matching: Vec<_> = records.into_iter().filter(|r| r.trace_id == trace_id).collect();
    matching.sort_by_key(|r| r.timestamp);

    for record in &matching {
        println!(
            "{} {} command={} guard={} blocked_by={} exit={}",
            record.timestamp, record.trace_id, record.command, record.guard_decision, record.blocked_by, record.exit_code
        );
    }
    println!("trace-open: {} record(s) for {}", matching.len(), trace_id);
    Ok(0)
}
