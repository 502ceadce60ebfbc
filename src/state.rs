//! Client state persisted between invocations.
//!
//! The file is read once at startup and written once after a flow starts.
//! Concurrent invocations are not coordinated.
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClientState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_instance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_instance_id: Option<String>,
    /// Keys written by other client versions, kept on rewrite.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Load the state file; a missing file is an empty state.
pub fn load_state(path: &Path) -> Result<Option<ClientState>> {
    if !path.is_file() {
        return Ok(None);
    }
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let state = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse client state {}", path.display()))?;
    Ok(Some(state))
}

pub fn write_state(path: &Path, state: &ClientState) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let text = serde_json::to_string_pretty(state).context("serialize client state")?;
    fs::write(path, text.as_bytes()).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_state_file_loads_as_none() {
        let dir = tempfile::tempdir().expect("temp dir");
        let state = load_state(&dir.path().join("absent.json")).expect("load");
        assert!(state.is_none());
    }

    #[test]
    fn unknown_keys_survive_a_rewrite() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("state.json");
        fs::write(
            &path,
            r#"{"author_email": "a@example.org", "favorite_catalog": "prod"}"#,
        )
        .expect("seed state");

        let mut state = load_state(&path).expect("load").expect("present");
        assert_eq!(state.author_email.as_deref(), Some("a@example.org"));
        state.flow_id = Some("flow-1".to_string());
        write_state(&path, &state).expect("write");

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read back")).expect("json");
        assert_eq!(raw["favorite_catalog"], "prod");
        assert_eq!(raw["flow_id"], "flow-1");
        assert!(raw.get("flow_instance_id").is_none());
    }
}
