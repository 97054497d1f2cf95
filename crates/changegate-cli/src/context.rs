//! Shared per-invocation context: resolved policy, tools directory,
//! trace/context identifiers, and artifact write helpers.

use camino::{Utf8Path, Utf8PathBuf};
use changegate::error::GateError;
use changegate::policy::{Policy, PolicySources};
use changegate::risk::AckToken;
use changegate::trace::{AckUsed, BlockedBy, TraceRecord};
use chrono::Utc;
use serde::Serialize;

pub struct Context {
    pub repo_root: Utf8PathBuf,
    pub policy: Policy,
    pub policy_sources: PolicySources,
    pub tools_dir: Utf8PathBuf,
    pub context_id: String,
    pub trace_id: String,
}

impl Context {
    pub fn new(repo_root: &Utf8Path, policy_file: Option<&Utf8Path>, overrides: &[String]) -> Result<Self, GateError> {
        let (policy, policy_sources) = Policy::load(policy_file, overrides)?;
        let tools_dir = repo_root.join(&policy.tools_dir.0);
        let trace_id = std::env::var("CHANGEGATE_TRACE_ID").unwrap_or_else(|_| uuid::Uuid::new_v4().simple().to_string());
        Ok(Self {
            repo_root: repo_root.to_path_buf(),
            policy,
            policy_sources,
            tools_dir,
            context_id: uuid::Uuid::new_v4().simple().to_string(),
            trace_id,
        })
    }

    pub fn now(&self) -> chrono::DateTime<Utc> {
        Utc::now()
    }

    /// Write `value` as pretty JSON under `tools_dir/name`, returning the
    /// path it was written to.
    pub fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<Utf8PathBuf, GateError> {
        std::fs::create_dir_all(&self.tools_dir)?;
        let path = self.tools_dir.join(name);
        std::fs::write(&path, serde_json::to_string_pretty(value)?)?;
        Ok(path)
    }

    pub fn write_text(&self, name: &str, content: &str) -> Result<Utf8PathBuf, GateError> {
        std::fs::create_dir_all(&self.tools_dir)?;
        let path = self.tools_dir.join(name);
        std::fs::write(&path, content)?;
        Ok(path)
    }

    pub fn trace_path(&self) -> Utf8PathBuf {
        self.tools_dir.join("trace_history.jsonl")
    }

    pub fn guard_disabled(&self) -> bool {
        std::env::var("CHANGEGATE_GUARD_DISABLE").as_deref() == Ok("1")
    }

    pub fn injected_change_list(&self) -> Option<Vec<String>> {
        std::env::var("CHANGEGATE_GUARD_CHANGED_FILES")
            .ok()
            .map(|raw| changegate::vcs::parse_injected_list(&raw))
    }

    pub fn strict_vcs(&self) -> bool {
        std::env::var("CHANGEGATE_GUARD_REQUIRE_VCS").as_deref() == Ok("1")
            || std::env::var("CHANGEGATE_VALIDATE_STRICT").as_deref() == Ok("1")
    }

    /// A trace record pre-filled with this invocation's identifiers and
    /// conservative defaults; callers overwrite the fields relevant to
    /// what actually happened before appending it.
    pub fn base_trace_record(&self, command: &str) -> TraceRecord {
        TraceRecord {
            timestamp: self.now(),
            repo_root: self.repo_root.clone(),
            context_id: self.context_id.clone(),
            trace_id: self.trace_id.clone(),
            command: command.to_owned(),
            pipeline_path: None,
            effective_module_path: None,
            module_path_source: "none".to_owned(),
            move_source_token: None,
            guard_decision: "pass".to_owned(),
            guard_decision_reason: String::new(),
            changed_files_count: 0,
            violations_count: 0,
            changed_files_sample: Vec::new(),
            verify_status: None,
            verify_hits_total: None,
            verify_gate_required: false,
            verify_gate_triggered: false,
            ack_used: AckUsed::None,
            blocked_by: BlockedBy::None,
            exit_code: 0,
            snapshot_created: false,
            snapshot_path: None,
            snapshot_label: None,
            action: "completed".to_owned(),
        }
    }

    pub fn append_trace(&self, record: &TraceRecord) -> Result<(), GateError> {
        changegate::trace::append(&self.trace_path(), record)
    }

    fn latest_token_path(&self) -> Utf8PathBuf {
        self.tools_dir.join("risk_ack_token.json")
    }

    /// Persist a freshly issued token as the "latest" token for
    /// `--ack-latest` to pick up.
    pub fn save_latest_token(&self, token: &AckToken) -> Result<(), GateError> {
        self.write_json("risk_ack_token.json", token).map(|_| ())
    }

    fn load_token_file(&self, path: &Utf8Path) -> Result<AckToken, GateError> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| GateError::IOCorruption {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
    }

    /// Resolve the ACK token (if any) presented on the command line,
    /// alongside how it was presented.
    ///
    /// # Errors
    /// Propagates I/O/parse errors reading a token file.
    pub fn resolve_presented_ack(
        &self,
        ack: Option<&str>,
        ack_file: Option<&Utf8Path>,
        ack_latest: bool,
    ) -> Result<(Option<AckToken>, AckUsed), GateError> {
        if ack_latest {
            let path = self.latest_token_path();
            if path.exists() {
                return Ok((Some(self.load_token_file(&path)?), AckUsed::AckLatest));
            }
            return Ok((None, AckUsed::AckLatest));
        }
        if let Some(path) = ack_file {
            return Ok((Some(self.load_token_file(path)?), AckUsed::AckFile));
        }
        if let Some(value) = ack {
            let path = self.latest_token_path();
            if path.exists() {
                let token = self.load_token_file(&path)?;
                if token.value == value {
                    return Ok((Some(token), AckUsed::Ack));
                }
            }
            return Err(GateError::TokenInvalid {
                reason: "no matching issued token found for the presented --ack value".to_owned(),
            });
        }
        Ok((None, AckUsed::None))
    }
}
