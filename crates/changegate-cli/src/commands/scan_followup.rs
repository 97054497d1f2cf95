//! `changegate scan-followup`: read-only re-scan of the repository for
//! residual references to a set of move mappings' tokens.

use camino::Utf8PathBuf;
use changegate::error::GateError;
use changegate::followup;
use changegate::moveplan::Mapping;
use clap::Args as ClapArgs;

use crate::context::Context;

#[derive(ClapArgs)]
pub struct Args {
    #[arg(long)]
    pub moves: Utf8PathBuf,
}

pub fn run(ctx: &Context, args: &Args) -> Result<i32, GateError> {
    let text = std::fs::read_to_string(&args.moves)?;
    let mappings: Vec<Mapping> = serde_json::from_str(&text).map_err(|e| GateError::IOCorruption {
        path: args.moves.clone(),
        detail: e.to_string(),
    })?;

    let tokens = followup::derive_tokens(&mappings);
    let report = followup::scan::scan(&ctx.repo_root, &tokens, ctx.policy.followup.max_hits);
    ctx.write_json("followup_scan_report.json", &report)?;

    let mut checklist = String::from("# Follow-up checklist\n\n");
    for hit in &report.hits {
        checklist.push_str(&format!("- [ ] {}:{} ({}) `{}`\n", hit.file, hit.line, hit.token_group, hit.snippet.trim()));
    }
    ctx.write_text("followup_checklist.md", &checklist)?;

    println!(
        "scan-followup: {} hit(s) across {} token(s){}",
        report.hits.len(),
        report.tokens_total,
        if report.truncated { " (truncated)" } else { "" }
    );
    Ok(0)
}
