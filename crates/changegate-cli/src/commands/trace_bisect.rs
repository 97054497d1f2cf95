//! `changegate trace-bisect`: build a priority-ordered recovery plan
//! for a `bad` trace, auto-selecting a `good` trace if none is given.

use changegate::bisect;
use changegate::error::GateError;
use changegate::trace;
use clap::Args as ClapArgs;

use crate::context::Context;

#[derive(ClapArgs)]
pub struct Args {
    #[arg(long)]
    pub bad: String,
    #[arg(long)]
    pub good: Option<String>,
}

pub fn run(ctx: &Context, args: &Args) -> Result<i32, GateError> {
    let records = trace::read_all(&ctx.trace_path())?;
    let bad_id = trace::match_trace(&args.bad, &records).into_iter().next().ok_or_else(|| GateError::UsageError {
        detail: format!("no trace id matches prefix '{}'", args.bad),
    })?;
    let bad_index = trace::index(&bad_id, &records);

    let all_trace_ids: std::collections::BTreeSet<String> = records.iter().map(|r| r.trace_id.clone()).collect();
    let all_indexes: Vec<_> = all_trace_ids.iter().map(|id| trace::index(id, &records)).collect();

    let good_index = if let Some(good_prefix) = &args.good {
        let good_id = trace::match_trace(good_prefix, &records).into_iter().next().ok_or_else(|| GateError::UsageError {
            detail: format!("no trace id matches prefix '{good_prefix}'"),
        })?;
        Some(trace::index(&good_id, &records))
    } else {
        bisect::auto_select_good(&bad_id, &records, &all_indexes).cloned()
    };

    let steps = bisect::bisect(&bad_index);
    ctx.write_json("bisect_plan.json", &steps)?;

    let mut md = format!("# Recovery plan for {bad_id}\n\n");
    let mut script = String::from("#!/usr/bin/env bash\nset -euo pipefail\n\n");
    for step in &steps {
        md.push_str(&format!("## {}\n\n- when: {}\n- cmd: `{}`\n- expected: {}\n- stop_if: {}\n\n", step.id, step.when, step.cmd, step.expected, step.stop_if));
        script.push_str(&format!("# {}: {}\n{}\n\n", step.id, step.purpose, step.cmd));
    }
    ctx.write_text("bisect_plan.md", &md)?;
    ctx.write_text("bisect_plan.sh", &script)?;

    if let Some(good) = &good_index {
        let diff = bisect::diff(&bad_index, good);
        ctx.write_json("trace_diff.json", &diff)?;
    }

    println!("trace-bisect: {} step(s) for {bad_id}", steps.len());
    for step in &steps {
        println!("  {}: {}", step.id, step.purpose);
    }
    Ok(0)
}
