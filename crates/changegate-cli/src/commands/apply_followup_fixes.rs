//! `changegate apply-followup-fixes`: plan (default) or apply
//! conservative rule A/B/C textual replacements for the files a
//! follow-up scan flagged.
//!
//! Takes `--moves` in addition to the spec's `--scan-report` so that
//! candidate building has the `(old, new)` token pairs the scan report
//! alone does not retain.

use std::collections::BTreeSet;

use camino::Utf8PathBuf;
use changegate::error::GateError;
use changegate::followup::patch::{self, Confidence};
use changegate::followup::scan::FollowupScanReport;
use changegate::followup::{self, TokenPair};
use changegate::moveplan::Mapping;
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
    pub scan_report: Utf8PathBuf,
    #[arg(long)]
    pub moves: Utf8PathBuf,
    #[arg(long, value_enum, default_value_t = Mode::Plan)]
    pub mode: Mode,
    #[arg(long, value_enum, default_value_t = ConfidenceArg::Low)]
    pub confidence_threshold: ConfidenceArg,
    #[arg(long)]
    pub max_changes: Option<usize>,
}

#[derive(Clone, Copy, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfidenceArg {
    Low,
    Medium,
    High,
}

fn to_confidence(value: ConfidenceArg) -> Confidence {
    match value {
        ConfidenceArg::Low => Confidence::Low,
        ConfidenceArg::Medium => Confidence::Medium,
        ConfidenceArg::High => Confidence::High,
    }
}

pub fn run(ctx: &Context, args: &Args) -> Result<i32, GateError> {
    let scan_text = std::fs::read_to_string(&args.scan_report)?;
    let scan_report: FollowupScanReport = serde_json::from_str(&scan_text).map_err(|e| GateError::IOCorruption {
        path: args.scan_report.clone(),
        detail: e.to_string(),
    })?;

    let moves_text = std::fs::read_to_string(&args.moves)?;
    let mappings: Vec<Mapping> = serde_json::from_str(&moves_text).map_err(|e| GateError::IOCorruption {
        path: args.moves.clone(),
        detail: e.to_string(),
    })?;
    let tokens: Vec<TokenPair> = followup::derive_tokens(&mappings);

    let files: BTreeSet<String> = scan_report.hits.iter().map(|h| h.file.as_str().to_owned()).collect();
    let mut candidates = Vec::new();
    for file in &files {
        let full = ctx.repo_root.join(file);
        let Ok(content) = std::fs::read_to_string(&full) else { continue };
        candidates.extend(patch::build_candidates(file, &content, &tokens));
    }

    let max_changes = args.max_changes.unwrap_or(ctx.policy.followup.max_changes);
    let plan = patch::plan(candidates, to_confidence(args.confidence_threshold), max_changes);
    ctx.write_json("followup_patch_plan.json", &plan)?;

    let mut diff = String::new();
    for (file, text) in &plan.per_file_diffs {
        diff.push_str(&format!("--- {file}\n{text}\n"));
    }
    ctx.write_text("followup_patch.diff", &diff)?;

    println!(
        "apply-followup-fixes: {} candidate(s){}",
        plan.candidates.len(),
        if plan.truncated { " (truncated)" } else { "" }
    );

    if args.mode == Mode::Apply {
        let applied = patch::apply(&ctx.repo_root, &plan)?;
        println!("applied {applied} replacement(s)");
    }

    Ok(0)
}
