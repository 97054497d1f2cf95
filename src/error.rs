//! Error types for the change-governance engine.
//!
//! Defines [`GateError`], the unified error type for every gate, planning
//! and trace operation. Each variant carries enough context to render an
//! actionable message and maps to exactly one process exit code, so the
//! orchestrator never maintains a second table that can drift out of sync
//! with the error definitions.

use std::fmt;

use camino::Utf8PathBuf;

use crate::risk::RiskLevel;

/// Byte-wise `str` equality usable in a `const fn` (trait-based `==` on
/// `str` is not yet const-stable).
const fn const_str_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    let mut i = 0;
    while i < a.len() {
        if a[i] != b[i] {
            return false;
        }
        i += 1;
    }
    true
}

/// Unified error type for the change-governance engine.
#[derive(Debug)]
pub enum GateError {
    /// Invalid CLI flags, or a path that does not resolve under the repo
    /// root or the configured tools subtree.
    UsageError {
        /// Human-readable description of the bad input.
        detail: String,
    },

    /// A path escapes the repository root after normalization.
    PathEscapesRepo {
        /// The offending path, as given.
        path: Utf8PathBuf,
    },

    /// A write target resolved outside the configured tools subtree.
    OutsideToolsRoot {
        /// The tools subtree that writes must be confined to.
        tools_root: Utf8PathBuf,
        /// The path that escaped it.
        attempted: Utf8PathBuf,
    },

    /// A module path was given but does not exist as a directory.
    ModulePathNotFound {
        /// The module path that was not found.
        module_path: Utf8PathBuf,
    },

    /// The path-diff guard found one or more violations in non-advisory
    /// mode.
    GuardViolation {
        /// Number of violations found.
        count: usize,
        /// The guard's summarized decision reason.
        reason: String,
    },

    /// A risk, loop or verify gate blocked the command.
    GateBlocked {
        /// Which gate produced the block.
        gate: &'static str,
        /// The overall risk level at the time of the block.
        risk: RiskLevel,
        /// The `NEXT_CMD` hint to print for the user.
        next_cmd: String,
    },

    /// An external collaborator process (git, svn, rg, grep) exited
    /// non-zero.
    SubprocessFailure {
        /// The command that was run.
        command: String,
        /// The process exit code, if the process did not terminate by
        /// signal.
        exit_code: Option<i32>,
        /// Captured stderr output.
        stderr: String,
    },

    /// While applying a follow-up patch, an expected anchor substring was
    /// no longer present in the file.
    AnchorMissing {
        /// The file whose anchor text was missing.
        file: Utf8PathBuf,
        /// The anchor text that was expected.
        anchor: String,
    },

    /// A snapshot was required before a mutating apply but could not be
    /// created.
    SnapshotFailed {
        /// Human-readable description of why the snapshot failed.
        detail: String,
    },

    /// An ACK token presented by the caller is invalid: wrong value,
    /// expired, already consumed, or bound to a different reason hash.
    TokenInvalid {
        /// Why the token was rejected.
        reason: String,
    },

    /// A report or token JSON file on disk could not be parsed.
    IOCorruption {
        /// The unparseable file.
        path: Utf8PathBuf,
        /// The parse error text.
        detail: String,
    },

    /// An I/O error occurred.
    Io(std::io::Error),

    /// A JSON (de)serialization error occurred.
    Json(serde_json::Error),

    /// A TOML parse error occurred while loading policy.
    Toml(String),
}

impl GateError {
    /// The process exit code this error maps to, per the exit-code
    /// convention: 0 ok, 1 non-gate failure, 2 usage/input error, 3
    /// loop-gate block, 4 risk-gate block.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::UsageError { .. }
            | Self::PathEscapesRepo { .. }
            | Self::OutsideToolsRoot { .. }
            | Self::ModulePathNotFound { .. }
            | Self::GuardViolation { .. } => 2,
            Self::GateBlocked { gate, .. } => {
                if const_str_eq(gate, "loop_gate") {
                    3
                } else {
                    4
                }
            }
            Self::TokenInvalid { .. } => 4,
            Self::SubprocessFailure { .. }
            | Self::AnchorMissing { .. }
            | Self::SnapshotFailed { .. }
            | Self::IOCorruption { .. }
            | Self::Io(_)
            | Self::Json(_)
            | Self::Toml(_) => 1,
        }
    }
}

impl fmt::Display for GateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UsageError { detail } => write!(f, "usage error: {detail}"),
            Self::PathEscapesRepo { path } => {
                write!(
                    f,
                    "path '{path}' escapes the repository root.\n  To fix: use a path relative to the repository root without '..' segments."
                )
            }
            Self::OutsideToolsRoot {
                tools_root,
                attempted,
            } => {
                write!(
                    f,
                    "write target '{attempted}' resolves outside the tools subtree '{tools_root}'.\n  To fix: configure 'tools_dir' to cover this location, or choose an output path under it."
                )
            }
            Self::ModulePathNotFound { module_path } => {
                write!(
                    f,
                    "module path '{module_path}' does not exist.\n  To fix: pass an existing directory with --module-path, or omit it to derive one."
                )
            }
            Self::GuardViolation { count, reason } => {
                write!(
                    f,
                    "path-diff guard found {count} violation(s): {reason}\n  To fix: run 'debug-guard' to inspect violations, then 'apply-move' to relocate offending files."
                )
            }
            Self::GateBlocked {
                gate,
                risk,
                next_cmd,
            } => {
                write!(
                    f,
                    "{gate} blocked this command (overall risk {risk}).\nNEXT_CMD: {next_cmd}"
                )
            }
            Self::SubprocessFailure {
                command,
                exit_code,
                stderr,
            } => {
                write!(f, "command failed: {command}")?;
                if let Some(code) = exit_code {
                    write!(f, " (exit code {code})")?;
                } else {
                    write!(f, " (terminated by signal)")?;
                }
                if !stderr.is_empty() {
                    write!(f, "\n  stderr: {stderr}")?;
                }
                Ok(())
            }
            Self::AnchorMissing { file, anchor } => {
                write!(
                    f,
                    "anchor text '{anchor}' no longer present in '{file}'.\n  To fix: regenerate the scan report and patch plan against the current working tree."
                )
            }
            Self::SnapshotFailed { detail } => {
                write!(
                    f,
                    "snapshot creation failed: {detail}\n  To fix: free disk space or pass --no-snapshot to proceed without one (not recommended)."
                )
            }
            Self::TokenInvalid { reason } => {
                write!(
                    f,
                    "ACK token invalid: {reason}\n  To fix: re-run the blocked command without an ACK to obtain a fresh token."
                )
            }
            Self::IOCorruption { path, detail } => {
                write!(
                    f,
                    "unable to parse '{path}': {detail}\n  To fix: the file has been treated as absent; delete or repair it and retry."
                )
            }
            Self::Io(err) => write!(f, "I/O error: {err}"),
            Self::Json(err) => write!(f, "JSON error: {err}"),
            Self::Toml(detail) => write!(f, "TOML error: {detail}"),
        }
    }
}

impl std::error::Error for GateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for GateError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for GateError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

impl From<toml::de::Error> for GateError {
    fn from(err: toml::de::Error) -> Self {
        Self::Toml(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_usage_error() {
        let err = GateError::UsageError {
            detail: "missing --pipeline".to_owned(),
        };
        assert!(format!("{err}").contains("missing --pipeline"));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn display_path_escapes_repo() {
        let err = GateError::PathEscapesRepo {
            path: Utf8PathBuf::from("../outside"),
        };
        let msg = format!("{err}");
        assert!(msg.contains("../outside"));
        assert!(msg.contains("escapes"));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn display_outside_tools_root() {
        let err = GateError::OutsideToolsRoot {
            tools_root: Utf8PathBuf::from("tools"),
            attempted: Utf8PathBuf::from("other/report.json"),
        };
        let msg = format!("{err}");
        assert!(msg.contains("tools"));
        assert!(msg.contains("other/report.json"));
    }

    #[test]
    fn display_module_path_not_found() {
        let err = GateError::ModulePathNotFound {
            module_path: Utf8PathBuf::from("src/missing"),
        };
        assert!(format!("{err}").contains("src/missing"));
    }

    #[test]
    fn display_guard_violation() {
        let err = GateError::GuardViolation {
            count: 2,
            reason: "forbidden path".to_owned(),
        };
        let msg = format!("{err}");
        assert!(msg.contains('2'));
        assert!(msg.contains("forbidden path"));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn gate_blocked_loop_gate_exit_code() {
        let err = GateError::GateBlocked {
            gate: "loop_gate",
            risk: RiskLevel::High,
            next_cmd: "changegate debug-guard".to_owned(),
        };
        assert_eq!(err.exit_code(), 3);
        assert!(format!("{err}").contains("NEXT_CMD"));
    }

    #[test]
    fn gate_blocked_risk_gate_exit_code() {
        let err = GateError::GateBlocked {
            gate: "risk_gate",
            risk: RiskLevel::High,
            next_cmd: "changegate apply-move --ack-latest".to_owned(),
        };
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn display_subprocess_failure_with_code() {
        let err = GateError::SubprocessFailure {
            command: "git mv a b".to_owned(),
            exit_code: Some(128),
            stderr: "fatal: bad source".to_owned(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("128"));
        assert!(msg.contains("fatal: bad source"));
    }

    #[test]
    fn display_subprocess_failure_signal() {
        let err = GateError::SubprocessFailure {
            command: "rg --vimgrep".to_owned(),
            exit_code: None,
            stderr: String::new(),
        };
        assert!(format!("{err}").contains("terminated by signal"));
    }

    #[test]
    fn display_anchor_missing() {
        let err = GateError::AnchorMissing {
            file: Utf8PathBuf::from("pkg/foo.xml"),
            anchor: "pkg/foo/old.json".to_owned(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("pkg/foo.xml"));
        assert!(msg.contains("pkg/foo/old.json"));
    }

    #[test]
    fn display_snapshot_failed() {
        let err = GateError::SnapshotFailed {
            detail: "disk full".to_owned(),
        };
        assert!(format!("{err}").contains("disk full"));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn display_token_invalid() {
        let err = GateError::TokenInvalid {
            reason: "already consumed".to_owned(),
        };
        assert!(format!("{err}").contains("already consumed"));
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn display_io_corruption() {
        let err = GateError::IOCorruption {
            path: Utf8PathBuf::from("tools/risk_gate_report.json"),
            detail: "unexpected EOF".to_owned(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("risk_gate_report.json"));
        assert!(msg.contains("unexpected EOF"));
    }

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::other("disk full");
        let err: GateError = io_err.into();
        assert!(matches!(err, GateError::Io(_)));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: GateError = json_err.into();
        assert!(matches!(err, GateError::Json(_)));
    }

    #[test]
    fn error_source_io() {
        let err = GateError::Io(std::io::Error::other("x"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn error_source_non_io_is_none() {
        let err = GateError::UsageError {
            detail: "x".to_owned(),
        };
        assert!(std::error::Error::source(&err).is_none());
    }
}
