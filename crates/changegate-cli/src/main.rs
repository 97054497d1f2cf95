//! `changegate`: repo-scoped change-governance CLI.
//!
//! Wires the library's gates (guard, loop, risk, verify) and planners
//! (move, conflict, follow-up patch, snapshot, trace/bisect) into one
//! subcommand per operation, in the gate-order sequence described in
//! the orchestrator design: guard gate, then loop gate, then risk gate.

mod commands;
mod context;

use camino::Utf8PathBuf;
use changegate::error::GateError;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use context::Context;

/// Repo-scoped change-governance orchestrator.
///
/// changegate gates mechanical refactors, moves, and reference
/// rewrites behind a guard/loop/risk gate sequence and keeps an
/// append-only audit trail of every decision under `tools_dir`.
#[derive(Parser)]
#[command(name = "changegate")]
#[command(version, about)]
#[command(propagate_version = true)]
struct Cli {
    /// Repository root. Defaults to the current directory.
    #[arg(long, global = true, env = "CHANGEGATE_REPO_ROOT")]
    repo_root: Option<Utf8PathBuf>,

    /// Path to a policy TOML file. Defaults to `<repo_root>/changegate.toml`
    /// if present, otherwise built-in defaults.
    #[arg(long, global = true, env = "CHANGEGATE_POLICY")]
    policy: Option<Utf8PathBuf>,

    /// Override a single policy key, `dotted.path=value`. May be repeated.
    #[arg(long = "policy-override", global = true)]
    policy_overrides: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate the path-diff guard in isolation.
    Validate(commands::validate::Args),
    /// Run the full guard -> loop -> risk gate sequence.
    Run(commands::run::Args),
    /// Evaluate the guard and optionally render move/rollback plans
    /// without gating anything.
    DebugGuard(commands::debug_guard::Args),
    /// Plan and, with `--move-dry-run=false`, execute a module move.
    ApplyMove(commands::apply_move::Args),
    /// Resolve destination conflicts found in a prior move plan.
    ResolveMoveConflicts(commands::resolve_move_conflicts::Args),
    /// Scan the repository for stale references to moved tokens.
    ScanFollowup(commands::scan_followup::Args),
    /// Plan and, in Apply mode, apply safe follow-up reference fixes.
    ApplyFollowupFixes(commands::apply_followup_fixes::Args),
    /// Re-run the follow-up verifier against the current working tree.
    VerifyFollowupFixes(commands::verify_followup_fixes::Args),
    /// List every snapshot under the tools directory.
    SnapshotIndex(commands::snapshot_index::Args),
    /// Show the manifest of one matching snapshot.
    SnapshotOpen(commands::snapshot_open::Args),
    /// Plan, and optionally apply, snapshot retention pruning.
    SnapshotPrune(commands::snapshot_prune::Args),
    /// Generate or check a snapshot's restore scripts.
    SnapshotRestoreGuide(commands::snapshot_restore_guide::Args),
    /// Summarize every record sharing a trace id.
    TraceIndex(commands::trace_index::Args),
    /// Print every record matching a trace id prefix.
    TraceOpen(commands::trace_open::Args),
    /// Diff two resolved trace ids.
    TraceDiff(commands::trace_diff::Args),
    /// Build a priority-ordered recovery plan from a bad trace.
    TraceBisect(commands::trace_bisect::Args),
    /// Print a shell completion script to stdout.
    Completions {
        /// The shell to generate completions for.
        shell: Shell,
    },
}

fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn resolve_repo_root(given: Option<Utf8PathBuf>) -> Result<Utf8PathBuf, GateError> {
    let path = match given {
        Some(p) => p,
        None => {
            let cwd = std::env::current_dir()?;
            Utf8PathBuf::from_path_buf(cwd).map_err(|p| GateError::UsageError {
                detail: format!("current directory '{}' is not valid UTF-8", p.display()),
            })?
        }
    };
    Ok(path)
}

fn dispatch(ctx: &Context, command: &Commands) -> Result<i32, GateError> {
    match command {
        Commands::Validate(args) => commands::validate::run(ctx, args),
        Commands::Run(args) => commands::run::run(ctx, args),
        Commands::DebugGuard(args) => commands::debug_guard::run(ctx, args),
        Commands::ApplyMove(args) => commands::apply_move::run(ctx, args),
        Commands::ResolveMoveConflicts(args) => commands::resolve_move_conflicts::run(ctx, args),
        Commands::ScanFollowup(args) => commands::scan_followup::run(ctx, args),
        Commands::ApplyFollowupFixes(args) => commands::apply_followup_fixes::run(ctx, args),
        Commands::VerifyFollowupFixes(args) => commands::verify_followup_fixes::run(ctx, args),
        Commands::SnapshotIndex(args) => commands::snapshot_index::run(ctx, args),
        Commands::SnapshotOpen(args) => commands::snapshot_open::run(ctx, args),
        Commands::SnapshotPrune(args) => commands::snapshot_prune::run(ctx, args),
        Commands::SnapshotRestoreGuide(args) => commands::snapshot_restore_guide::run(ctx, args),
        Commands::TraceIndex(args) => commands::trace_index::run(ctx, args),
        Commands::TraceOpen(args) => commands::trace_open::run(ctx, args),
        Commands::TraceDiff(args) => commands::trace_diff::run(ctx, args),
        Commands::TraceBisect(args) => commands::trace_bisect::run(ctx, args),
        Commands::Completions { .. } => unreachable!("Completions is handled in main() before dispatch() is called"),
    }
}

fn main() -> std::process::ExitCode {
    init_tracing();
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "changegate", &mut std::io::stdout());
        return std::process::ExitCode::SUCCESS;
    }

    let run_result = resolve_repo_root(cli.repo_root).and_then(|repo_root| {
        let ctx = Context::new(&repo_root, cli.policy.as_deref(), &cli.policy_overrides)?;
        dispatch(&ctx, &cli.command)
    });

    match run_result {
        Ok(code) => exit_code(code),
        Err(err) => {
            eprintln!("error: {err}");
            exit_code(err.exit_code())
        }
    }
}

fn exit_code(code: i32) -> std::process::ExitCode {
    u8::try_from(code).map_or(std::process::ExitCode::FAILURE, std::process::ExitCode::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_run_subcommand() {
        let cli = Cli::try_parse_from(["changegate", "run", "--pipeline", "pipeline.toml"]).unwrap();
        assert!(matches!(cli.command, Commands::Run(_)));
    }

    #[test]
    fn cli_parses_global_repo_root() {
        let cli = Cli::try_parse_from(["changegate", "--repo-root", "/tmp/repo", "validate"]).unwrap();
        assert_eq!(cli.repo_root, Some(Utf8PathBuf::from("/tmp/repo")));
    }

    #[test]
    fn cli_rejects_unknown_subcommand() {
        assert!(Cli::try_parse_from(["changegate", "not-a-command"]).is_err());
    }

    #[test]
    fn cli_parses_completions_subcommand() {
        let cli = Cli::try_parse_from(["changegate", "completions", "bash"]).unwrap();
        assert!(matches!(cli.command, Commands::Completions { shell: Shell::Bash }));
    }
}
