//! Snapshot Manager (C10).
//!
//! Content-addressed, size-capped copies of a set of include files taken
//! before a mutating apply, plus an indexer/pruner and restore-guide
//! generator.

use std::fmt::Write as _;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::GateError;

/// One copied (or skipped) file within a snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotFile {
    pub src: Utf8PathBuf,
    pub dst: Utf8PathBuf,
    pub size: u64,
    pub sha256: String,
}

/// The manifest for one snapshot directory.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub context_id: String,
    pub trace_id: String,
    pub label: String,
    pub created_at: DateTime<Utc>,
    pub repo_root: Utf8PathBuf,
    pub files: Vec<SnapshotFile>,
    pub size_total: u64,
    pub truncated: bool,
    pub dir: Utf8PathBuf,
}

/// Create a new snapshot directory under `snapshots_dir`, copying every
/// include whose on-disk size is within `max_copy_size_mb`.
///
/// # Errors
/// Returns [`GateError::SnapshotFailed`] if the snapshot directory
/// cannot be created, or propagates I/O errors from copying files.
pub fn create(
    repo_root: &Utf8Path,
    snapshots_dir: &Utf8Path,
    context_id: &str,
    trace_id: &str,
    label: &str,
    includes: &[Utf8PathBuf],
    max_copy_size_mb: u64,
    now: DateTime<Utc>,
    rand8: &str,
) -> Result<Snapshot, GateError> {
    let dir_name = format!("snapshot_{}_{label}_{rand8}", now.format("%Y%m%dT%H%M%SZ"));
    let dir = snapshots_dir.join(dir_name);
    std::fs::create_dir_all(&dir).map_err(|e| GateError::SnapshotFailed {
        detail: format!("failed to create snapshot directory '{dir}': {e}"),
    })?;

    let max_bytes = max_copy_size_mb.saturating_mul(1024 * 1024);
    let mut files = Vec::new();
    let mut size_total = 0;
    let mut truncated = false;

    for include in includes {
        let Ok(metadata) = std::fs::metadata(include) else {
            truncated = true;
            continue;
        };
        if metadata.len() > max_bytes {
            truncated = true;
            continue;
        }
        let bytes = std::fs::read(include)?;
        let sha256 = hex_encode(&Sha256::digest(&bytes));
        let file_name = include.file_name().unwrap_or("unnamed");
        let dst = dir.join(file_name);
        std::fs::write(&dst, &bytes)?;
        size_total += metadata.len();
        files.push(SnapshotFile {
            src: include.clone(),
            dst,
            size: metadata.len(),
            sha256,
        });
    }

    let snapshot = Snapshot {
        context_id: context_id.to_owned(),
        trace_id: trace_id.to_owned(),
        label: label.to_owned(),
        created_at: now,
        repo_root: repo_root.to_path_buf(),
        files,
        size_total,
        truncated,
        dir,
    };

    write_manifest(&snapshot)?;
    Ok(snapshot)
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

fn write_manifest(snapshot: &Snapshot) -> Result<(), GateError> {
    atomic_write(&snapshot.dir.join("manifest.json"), &serde_json::to_string_pretty(snapshot)?)?;
    atomic_write(&snapshot.dir.join("manifest.md"), &render_manifest_markdown(snapshot))?;
    Ok(())
}

fn render_manifest_markdown(snapshot: &Snapshot) -> String {
    let mut out = format!(
        "# Snapshot {label}\n\ncreated_at: {created_at}\nrepo_root: {repo_root}\ntruncated: {truncated}\n\n| file | size | sha256 |\n|---|---|---|\n",
        label = snapshot.label,
        created_at = snapshot.created_at,
        repo_root = snapshot.repo_root,
        truncated = snapshot.truncated,
    );
    for file in &snapshot.files {
        let _ = writeln!(out, "| {} | {} | {} |", file.src, file.size, file.sha256);
    }
    out
}

fn atomic_write(path: &Utf8Path, content: &str) -> Result<(), GateError> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// List every `manifest.json` under `snapshots_dir`, newest first.
///
/// # Errors
/// Propagates I/O errors reading the directory.
pub fn list(snapshots_dir: &Utf8Path) -> Result<Vec<Snapshot>, GateError> {
    let mut snapshots = Vec::new();
    if !snapshots_dir.exists() {
        return Ok(snapshots);
    }
    for entry in std::fs::read_dir(snapshots_dir)? {
        let entry = entry?;
        let manifest_path = entry.path().join("manifest.json");
        let Ok(text) = std::fs::read_to_string(&manifest_path) else {
            continue;
        };
        if let Ok(snapshot) = serde_json::from_str::<Snapshot>(&text) {
            snapshots.push(snapshot);
        }
    }
    snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(snapshots)
}

/// One pruning decision.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PruneDecision {
    pub dir: Utf8PathBuf,
    pub label: String,
    pub reason: String,
}

/// Compute (but do not perform, unless `apply`) which snapshots to
/// delete: keep the most recent `keep_last`, then drop the oldest
/// remaining snapshots until total size is within `max_total_size_mb`,
/// never dropping a `protected_labels` entry.
///
/// # Errors
/// Propagates I/O errors from listing or, if `apply`, deleting.
pub fn prune(
    snapshots_dir: &Utf8Path,
    keep_last: usize,
    max_total_size_mb: u64,
    protected_labels: &[String],
    apply: bool,
) -> Result<Vec<PruneDecision>, GateError> {
    let snapshots = list(snapshots_dir)?;
    let mut decisions = Vec::new();
    let max_bytes = u128::from(max_total_size_mb) * 1024 * 1024;
    let mut running_total: u128 = snapshots.iter().map(|s| u128::from(s.size_total)).sum();

    for (idx, snapshot) in snapshots.iter().enumerate() {
        if protected_labels.contains(&snapshot.label) {
            continue;
        }
        let past_keep_last = idx >= keep_last;
        let over_size_cap = running_total > max_bytes;
        if past_keep_last && over_size_cap {
            decisions.push(PruneDecision {
                dir: snapshot.dir.clone(),
                label: snapshot.label.clone(),
                reason: "beyond keep_last and total size cap exceeded".to_owned(),
            });
            running_total = running_total.saturating_sub(u128::from(snapshot.size_total));
        }
    }

    if apply {
        for decision in &decisions {
            std::fs::remove_dir_all(&decision.dir)?;
        }
    }
    Ok(decisions)
}

/// Generate `restore_full.sh` and `restore_files.sh` for `snapshot`.
#[must_use]
pub fn restore_guide(snapshot: &Snapshot, strict: bool) -> (String, String) {
    let guard = if strict {
        format!(
            "if [ \"$(pwd)\" != {repo_root:?} ]; then echo \"refusing: repo root mismatch\" >&2; exit 1; fi\n",
            repo_root = snapshot.repo_root.as_str()
        )
    } else {
        String::new()
    };

    let mut full = format!("#!/usr/bin/env bash\nset -euo pipefail\n\n{guard}");
    for file in &snapshot.files {
        let _ = writeln!(full, "cp {src:?} {dst:?}", src = file.dst.as_str(), dst = file.src.as_str());
    }

    let mut per_file = String::from("#!/usr/bin/env bash\nset -euo pipefail\n\n");
    for file in &snapshot.files {
        let _ = write!(
            per_file,
            "sha256sum {dst:?} | grep -q {hash:?} || {{ echo \"checksum mismatch: {dst}\" >&2; exit 1; }}\ncp {dst:?} {src:?}\n",
            dst = file.dst.as_str(),
            src = file.src.as_str(),
            hash = file.sha256,
        );
    }

    (full, per_file)
}
