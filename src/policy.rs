//! Policy loader.
//!
//! Merges compiled-in defaults, an optional policy file, and CLI
//! `key=value` overrides into a typed, immutable [`Policy`] snapshot,
//! alongside a [`PolicySources`] structure recording where each
//! top-level key's value came from.

use std::collections::BTreeMap;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::error::GateError;

fn default_forbidden_path_patterns() -> Vec<String> {
    vec![
        "**/sys/**".to_owned(),
        "**/error/**".to_owned(),
        "**/util/**".to_owned(),
        "**/vote/**".to_owned(),
        "**/.git/**".to_owned(),
        "**/target/**".to_owned(),
        "**/node_modules/**".to_owned(),
    ]
}

fn default_ignore_path_patterns() -> Vec<String> {
    vec![
        "**/.git/**".to_owned(),
        "**/target/**".to_owned(),
        "**/.idea/**".to_owned(),
        "**/.vscode/**".to_owned(),
        "**/node_modules/**".to_owned(),
        "**/dist/**".to_owned(),
        "**/build/**".to_owned(),
        "**/out/**".to_owned(),
        "**/logs/**".to_owned(),
    ]
}

fn default_tools_dir() -> String {
    "tools".to_owned()
}

fn default_true() -> bool {
    true
}

fn default_risk_threshold() -> crate::risk::RiskLevel {
    crate::risk::RiskLevel::High
}

fn default_verify_threshold() -> crate::verify::VerifyStatus {
    crate::verify::VerifyStatus::Fail
}

fn default_max_changes() -> usize {
    500
}

fn default_max_hits() -> usize {
    200
}

fn default_token_ttl_minutes() -> i64 {
    60
}

fn default_risk_exit_code() -> i32 {
    4
}

fn default_max_copy_size_mb() -> u64 {
    25
}

fn default_keep_last() -> usize {
    10
}

fn default_max_total_size_mb() -> u64 {
    500
}

/// Guardrail configuration consumed by the path-diff guard (C3).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Guardrails {
    #[serde(default = "default_forbidden_path_patterns")]
    pub forbidden_path_patterns: Vec<String>,
    #[serde(default = "default_ignore_path_patterns")]
    pub ignore_path_patterns: Vec<String>,
    #[serde(default = "default_true")]
    pub allow_tools_dir: bool,
    #[serde(default = "default_true")]
    pub require_module_path_for_project_changes: bool,
    #[serde(default)]
    pub advisory: bool,
}

impl Default for Guardrails {
    fn default() -> Self {
        Self {
            forbidden_path_patterns: default_forbidden_path_patterns(),
            ignore_path_patterns: default_ignore_path_patterns(),
            allow_tools_dir: true,
            require_module_path_for_project_changes: true,
            advisory: false,
        }
    }
}

/// Gate configuration consumed by the risk gate (C9).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Gates {
    #[serde(default = "default_risk_threshold")]
    pub risk_threshold: crate::risk::RiskLevel,
    #[serde(default = "default_verify_threshold")]
    pub verify_threshold: crate::verify::VerifyStatus,
    #[serde(default = "default_true")]
    pub verify_as_risk: bool,
    #[serde(default = "default_true")]
    pub verify_gate_enabled: bool,
    #[serde(default = "default_risk_exit_code")]
    pub risk_exit_code: i32,
    #[serde(default = "default_token_ttl_minutes")]
    pub token_ttl_minutes: i64,
}

impl Default for Gates {
    fn default() -> Self {
        Self {
            risk_threshold: default_risk_threshold(),
            verify_threshold: default_verify_threshold(),
            verify_as_risk: true,
            verify_gate_enabled: true,
            risk_exit_code: default_risk_exit_code(),
            token_ttl_minutes: default_token_ttl_minutes(),
        }
    }
}

/// Follow-up scan/patch configuration (C6/C7).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Followup {
    #[serde(default = "default_max_changes")]
    pub max_changes: usize,
    #[serde(default = "default_max_hits")]
    pub max_hits: usize,
}

impl Default for Followup {
    fn default() -> Self {
        Self {
            max_changes: default_max_changes(),
            max_hits: default_max_hits(),
        }
    }
}

/// Snapshot manager configuration (C10).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Snapshots {
    #[serde(default = "default_max_copy_size_mb")]
    pub max_copy_size_mb: u64,
    #[serde(default = "default_keep_last")]
    pub keep_last: usize,
    #[serde(default = "default_max_total_size_mb")]
    pub max_total_size_mb: u64,
}

impl Default for Snapshots {
    fn default() -> Self {
        Self {
            max_copy_size_mb: default_max_copy_size_mb(),
            keep_last: default_keep_last(),
            max_total_size_mb: default_max_total_size_mb(),
        }
    }
}

/// The merged, typed policy snapshot for one process invocation.
///
/// Unknown top-level keys encountered while loading a policy file are
/// retained in `extra` rather than rejected, since the policy is an open
/// map with typed accessors layered on top, not a closed schema.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub tools_dir: PolicyTools,
    #[serde(default)]
    pub guardrails: Guardrails,
    #[serde(default)]
    pub gates: Gates,
    #[serde(default)]
    pub followup: Followup,
    #[serde(default)]
    pub snapshots: Snapshots,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Wraps the tools-dir string so it carries a typed default like every
/// other policy section.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyTools(pub String);

impl Default for PolicyTools {
    fn default() -> Self {
        Self(default_tools_dir())
    }
}

/// Where a top-level policy key's effective value came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicySource {
    Default,
    File,
    Cli,
}

impl std::fmt::Display for PolicySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Default => "default",
            Self::File => "file",
            Self::Cli => "cli",
        };
        write!(f, "{s}")
    }
}

/// Per-key provenance for the merged [`Policy`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PolicySources(pub BTreeMap<String, PolicySource>);

impl Policy {
    /// Build a policy from compiled-in defaults, an optional TOML policy
    /// file, and a list of `key=value` CLI overrides (dotted keys address
    /// nested fields, e.g. `gates.verify_gate_enabled=false`).
    ///
    /// # Errors
    /// Returns [`GateError::Toml`] if the policy file fails to parse, or
    /// [`GateError::UsageError`] if an override is malformed or targets
    /// an unknown path.
    pub fn load(
        policy_file: Option<&Utf8Path>,
        overrides: &[String],
    ) -> Result<(Self, PolicySources), GateError> {
        let mut sources = PolicySources::default();
        let mut value = serde_json::to_value(Self::default()).unwrap_or_default();
        for key in ["tools_dir", "guardrails", "gates", "followup", "snapshots"] {
            sources.0.insert(key.to_owned(), PolicySource::Default);
        }

        if let Some(path) = policy_file {
            let text = std::fs::read_to_string(path)?;
            let file_value: toml::Value = toml::from_str(&text)?;
            let file_json = serde_json::to_value(file_value).unwrap_or_default();
            if let serde_json::Value::Object(map) = &file_json {
                for key in map.keys() {
                    sources.0.insert(key.clone(), PolicySource::File);
                }
            }
            merge_json(&mut value, file_json);
        }

        for raw in overrides {
            let (key_path, raw_value) = raw.split_once('=').ok_or_else(|| GateError::UsageError {
                detail: format!("invalid --policy-override '{raw}': expected key=value"),
            })?;
            let parsed_value = parse_override_value(raw_value);
            set_dotted(&mut value, key_path, parsed_value);
            if let Some(top) = key_path.split('.').next() {
                sources.0.insert(top.to_owned(), PolicySource::Cli);
            }
        }

        let policy: Self = serde_json::from_value(value)?;
        Ok((policy, sources))
    }

    /// Write the merged policy and its source provenance as
    /// `policy_effective.json` / `policy_sources.json` under `tools_dir`.
    ///
    /// # Errors
    /// Propagates I/O or serialization errors.
    pub fn write_artifacts(
        &self,
        sources: &PolicySources,
        tools_dir: &Utf8Path,
    ) -> Result<(), GateError> {
        std::fs::create_dir_all(tools_dir)?;
        let effective = tools_dir.join("policy_effective.json");
        std::fs::write(&effective, serde_json::to_string_pretty(self)?)?;
        let sources_path = tools_dir.join("policy_sources.json");
        std::fs::write(&sources_path, serde_json::to_string_pretty(sources)?)?;
        Ok(())
    }
}

fn parse_override_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_owned()))
}

fn merge_json(base: &mut serde_json::Value, overlay: serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                merge_json(base_map.entry(key).or_insert(serde_json::Value::Null), overlay_value);
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value;
        }
    }
}

fn set_dotted(root: &mut serde_json::Value, dotted_key: &str, new_value: serde_json::Value) {
    let parts: Vec<&str> = dotted_key.split('.').collect();
    let mut cursor = root;
    for part in &parts[..parts.len() - 1] {
        if !cursor.is_object() {
            *cursor = serde_json::Value::Object(serde_json::Map::new());
        }
        cursor = cursor
            .as_object_mut()
            .expect("just ensured object")
            .entry((*part).to_owned())
            .or_insert(serde_json::Value::Object(serde_json::Map::new()));
    }
    if !cursor.is_object() {
        *cursor = serde_json::Value::Object(serde_json::Map::new());
    }
    cursor
        .as_object_mut()
        .expect("just ensured object")
        .insert((*parts.last().expect("non-empty split")).to_owned(), new_value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_include_forbidden_patterns() {
        let (policy, sources) = Policy::load(None, &[]).unwrap();
        assert!(policy.guardrails.forbidden_path_patterns.contains(&"**/sys/**".to_owned()));
        assert_eq!(sources.0.get("guardrails"), Some(&PolicySource::Default));
    }

    #[test]
    fn cli_override_sets_dotted_bool() {
        let overrides = vec!["gates.verify_gate_enabled=false".to_owned()];
        let (policy, sources) = Policy::load(None, &overrides).unwrap();
        assert!(!policy.gates.verify_gate_enabled);
        assert_eq!(sources.0.get("gates"), Some(&PolicySource::Cli));
    }

    #[test]
    fn cli_override_sets_numeric_field() {
        let overrides = vec!["followup.max_changes=10".to_owned()];
        let (policy, _sources) = Policy::load(None, &overrides).unwrap();
        assert_eq!(policy.followup.max_changes, 10);
    }

    #[test]
    fn malformed_override_is_usage_error() {
        let overrides = vec!["no-equals-sign".to_owned()];
        let err = Policy::load(None, &overrides).unwrap_err();
        assert!(matches!(err, GateError::UsageError { .. }));
    }

    #[test]
    fn policy_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("policy.toml");
        std::fs::write(&file_path, "[guardrails]\nadvisory = true\n").unwrap();
        let utf8_path = Utf8Path::from_path(&file_path).unwrap();
        let (policy, sources) = Policy::load(Some(utf8_path), &[]).unwrap();
        assert!(policy.guardrails.advisory);
        assert_eq!(sources.0.get("guardrails"), Some(&PolicySource::File));
    }

    #[test]
    fn policy_source_display() {
        assert_eq!(PolicySource::Default.to_string(), "default");
        assert_eq!(PolicySource::File.to_string(), "file");
        assert_eq!(PolicySource::Cli.to_string(), "cli");
    }
}
