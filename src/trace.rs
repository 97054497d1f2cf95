//! Trace Writer & Indexer (C11).
//!
//! Appends one JSON line per command invocation to a trace log and
//! produces a best-effort per-`trace_id` index over it. The writer
//! never reads the file it appends to.

use std::collections::BTreeMap;
use std::io::Write as _;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GateError;
use crate::verify::VerifyStatus;

/// Which gate, if any, blocked a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockedBy {
    None,
    GuardGate,
    LoopGate,
    VerifyGate,
    RiskGate,
}

impl std::fmt::Display for BlockedBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::GuardGate => "guard_gate",
            Self::LoopGate => "loop_gate",
            Self::VerifyGate => "verify_gate",
            Self::RiskGate => "risk_gate",
        };
        write!(f, "{s}")
    }
}

/// How an ACK was presented, if at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AckUsed {
    None,
    Ack,
    AckFile,
    AckLatest,
}

impl std::fmt::Display for AckUsed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Ack => "ack",
            Self::AckFile => "ack-file",
            Self::AckLatest => "ack-latest",
        };
        write!(f, "{s}")
    }
}

/// One append-only record of a single command invocation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TraceRecord {
    pub timestamp: DateTime<Utc>,
    pub repo_root: Utf8PathBuf,
    pub context_id: String,
    pub trace_id: String,
    pub command: String,
    pub pipeline_path: Option<Utf8PathBuf>,
    pub effective_module_path: Option<Utf8PathBuf>,
    pub module_path_source: String,
    /// The source path being relocated, set by `apply-move` so the loop
    /// detector can group repeated-move records by the thing actually
    /// moving rather than by the invocation's module path.
    pub move_source_token: Option<String>,
    pub guard_decision: String,
    pub guard_decision_reason: String,
    pub changed_files_count: usize,
    pub violations_count: usize,
    pub changed_files_sample: Vec<String>,
    pub verify_status: Option<VerifyStatus>,
    pub verify_hits_total: Option<usize>,
    pub verify_gate_required: bool,
    pub verify_gate_triggered: bool,
    pub ack_used: AckUsed,
    pub blocked_by: BlockedBy,
    pub exit_code: i32,
    pub snapshot_created: bool,
    pub snapshot_path: Option<Utf8PathBuf>,
    pub snapshot_label: Option<String>,
    pub action: String,
}

const MAX_CHANGED_FILES_SAMPLE: usize = 20;

/// Truncate `changed_files` to the first [`MAX_CHANGED_FILES_SAMPLE`]
/// entries for embedding in a trace record.
#[must_use]
pub fn sample_changed_files(changed_files: &[String]) -> Vec<String> {
    changed_files.iter().take(MAX_CHANGED_FILES_SAMPLE).cloned().collect()
}

/// Append `record` as one JSON line to `trace_path`. Never reads the
/// file first; relies on the OS append-mode guarantee for atomicity of
/// a single `write`.
///
/// # Errors
/// Propagates I/O and serialization errors.
pub fn append(trace_path: &Utf8Path, record: &TraceRecord) -> Result<(), GateError> {
    if let Some(parent) = trace_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(trace_path)?;
    let line = serde_json::to_string(record)?;
    writeln!(file, "{line}")?;
    Ok(())
}

/// Read every record in `trace_path`, skipping unparseable lines.
///
/// # Errors
/// Returns [`GateError::Io`] if the file cannot be opened (a missing
/// file is treated as empty, not an error).
pub fn read_all(trace_path: &Utf8Path) -> Result<Vec<TraceRecord>, GateError> {
    let Ok(text) = std::fs::read_to_string(trace_path) else {
        return Ok(Vec::new());
    };
    Ok(text
        .lines()
        .filter_map(|line| serde_json::from_str::<TraceRecord>(line).ok())
        .collect())
}

/// Summarized view of every record sharing one `trace_id`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TraceIndex {
    pub trace_id: String,
    pub command_counts: BTreeMap<String, usize>,
    pub blocked_by_counts: BTreeMap<String, usize>,
    pub verify_status_counts: BTreeMap<String, usize>,
    pub ack_used_counts: BTreeMap<String, usize>,
    pub paths: BTreeMap<String, Utf8PathBuf>,
    pub latest_verify_status: Option<VerifyStatus>,
    pub latest_exit_code: Option<i32>,
    pub bypass_attempt: bool,
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// Build a per-`trace_id` index over `records`, best-effort.
#[must_use]
pub fn index(trace_id: &str, records: &[TraceRecord]) -> TraceIndex {
    let mut idx = TraceIndex {
        trace_id: trace_id.to_owned(),
        ..TraceIndex::default()
    };
    let mut matching: Vec<&TraceRecord> = records.iter().filter(|r| r.trace_id == trace_id).collect();
    matching.sort_by_key(|r| r.timestamp);

    for record in &matching {
        *idx.command_counts.entry(record.command.clone()).or_insert(0) += 1;
        *idx.blocked_by_counts.entry(record.blocked_by.to_string()).or_insert(0) += 1;
        *idx.ack_used_counts.entry(record.ack_used.to_string()).or_insert(0) += 1;
        if let Some(status) = record.verify_status {
            *idx.verify_status_counts.entry(status.to_string()).or_insert(0) += 1;
        }
        if let Some(path) = &record.snapshot_path {
            idx.paths.insert("snapshot".to_owned(), path.clone());
        }
        if record.blocked_by == BlockedBy::VerifyGate && record.ack_used == AckUsed::None {
            idx.bypass_attempt = true;
        }
    }

    if let Some(last) = matching.last() {
        idx.latest_verify_status = last.verify_status;
        idx.latest_exit_code = Some(last.exit_code);
        idx.last_seen_at = Some(last.timestamp);
    }

    idx
}

/// Find every distinct `trace_id` whose value starts with `prefix`,
/// sorted by `last_seen_at` descending.
#[must_use]
pub fn match_trace(prefix: &str, records: &[TraceRecord]) -> Vec<String> {
    let mut last_seen: BTreeMap<String, DateTime<Utc>> = BTreeMap::new();
    for record in records {
        if record.trace_id.starts_with(prefix) {
            let entry = last_seen.entry(record.trace_id.clone()).or_insert(record.timestamp);
            if record.timestamp > *entry {
                *entry = record.timestamp;
            }
        }
    }
    let mut ids: Vec<(String, DateTime<Utc>)> = last_seen.into_iter().collect();
    ids.sort_by(|a, b| b.1.cmp(&a.1));
    ids.into_iter().map(|(id, _)| id).collect()
}
