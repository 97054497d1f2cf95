//! `changegate verify-followup-fixes`: re-scans for residual references
//! and classifies the result. Enforcement of the verify gate happens in
//! `run`/`apply-move`, not here — this command is purely diagnostic.

use camino::Utf8PathBuf;
use changegate::error::GateError;
use changegate::followup;
use changegate::moveplan::Mapping;
use changegate::verify;
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
    let report = verify::verify(&ctx.repo_root, &tokens, ctx.policy.followup.max_hits);
    ctx.write_json("followup_verify_report.json", &report)?;

    println!("verify-followup-fixes: status {} ({})", report.status, report.reason);
    Ok(0)
}
