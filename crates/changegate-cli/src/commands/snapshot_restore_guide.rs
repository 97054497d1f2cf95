//! `changegate snapshot-restore-guide`: generate (or check) the
//! restore scripts for a snapshot.

use camino::Utf8PathBuf;
use changegate::error::GateError;
use changegate::snapshot::{self, Snapshot};
use clap::{Args as ClapArgs, ValueEnum};
use sha2::{Digest, Sha256};

use crate::context::Context;

#[derive(Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum Mode {
    Generate,
    Check,
}

#[derive(ClapArgs)]
pub struct Args {
    #[arg(long)]
    pub snapshot: Utf8PathBuf,
    #[arg(long, value_enum, default_value_t = Mode::Generate)]
    pub mode: Mode,
    #[arg(long, default_value_t = true)]
    pub strict: bool,
}

pub fn run(_ctx: &Context, args: &Args) -> Result<i32, GateError> {
    let manifest_path = args.snapshot.join("manifest.json");
    let text = std::fs::read_to_string(&manifest_path)?;
    let snapshot: Snapshot = serde_json::from_str(&text).map_err(|e| GateError::IOCorruption {
        path: manifest_path,
        detail: e.to_string(),
    })?;

    let (full, per_file) = snapshot::restore_guide(&snapshot, args.strict);

    match args.mode {
        Mode::Generate => {
            std::fs::write(args.snapshot.join("restore_full.sh"), &full)?;
            std::fs::write(args.snapshot.join("restore_files.sh"), &per_file)?;
            println!("snapshot-restore-guide: wrote restore_full.sh and restore_files.sh");
        }
        Mode::Check => {
            let mut mismatches = 0;
            for file in &snapshot.files {
                let Ok(bytes) = std::fs::read(&file.dst) else {
                    mismatches += 1;
                    continue;
                };
                let actual = hex_encode(&Sha256::digest(&bytes));
                if actual != file.sha256 {
                    mismatches += 1;
                }
            }
            println!("snapshot-restore-guide: {mismatches} mismatch(es) against the snapshot's own copies");
        }
    }
    Ok(0)
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
