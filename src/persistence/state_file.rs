//! A single length-prefixed JSON status file (spec §4.7), replacing the
//! teacher's SQLite-backed repositories (dropped — see DESIGN.md). The
//! atomic write pattern (temp file + rename) is grounded on the teacher's
//! `diff::writer::write_full_file`.

use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::time::{timeout, Duration};
use tracing::warn;

use crate::models::rules::{AnnoyRules, AutoreactRules};
use crate::{AppError, Result};

const SCHEMA_VERSION: u32 = 1;
const SAVE_TIMEOUT: Duration = Duration::from_secs(1);

/// Everything the bridge keeps across restarts.
#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedState {
    /// Bumped whenever the on-disk shape changes.
    pub schema_version: u32,
    /// Room id → last-seen message `ts`, used as the history-fetch resume cursor.
    pub last_seen_ts: HashMap<String, String>,
    /// Active annoy rules.
    pub annoy_rules: AnnoyRules,
    /// Active autoreact rules.
    pub autoreact_rules: AutoreactRules,
    /// Users currently on the silenced-yellers list.
    pub silenced_yellers: Vec<String>,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            last_seen_ts: HashMap::new(),
            annoy_rules: AnnoyRules::new(),
            autoreact_rules: AutoreactRules::new(),
            silenced_yellers: Vec::new(),
        }
    }
}

/// Load state from `path`, encoded as a `u32` little-endian length prefix
/// followed by the JSON payload.
///
/// Best-effort: a missing file, a truncated file, or a parse failure all
/// produce a fresh, empty [`PersistedState`] with a warning logged, rather
/// than refusing to start (spec §4.7, §7).
#[must_use]
pub async fn load(path: &Path) -> PersistedState {
    match load_inner(path).await {
        Ok(state) => state,
        Err(err) => {
            warn!(path = %path.display(), %err, "failed to load persisted state; starting fresh");
            PersistedState::default()
        }
    }
}

async fn load_inner(path: &Path) -> Result<PersistedState> {
    let bytes = tokio::fs::read(path).await?;
    if bytes.len() < 4 {
        return Err(AppError::Persistence("state file shorter than length prefix".into()));
    }
    let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let payload = bytes
        .get(4..4 + len)
        .ok_or_else(|| AppError::Persistence("state file length prefix exceeds file size".into()))?;
    serde_json::from_slice(payload).map_err(|err| AppError::Persistence(format!("malformed state json: {err}")))
}

/// Save state to `path` atomically (temp file in the same directory, then
/// rename), abandoning the attempt after 1s rather than blocking the event
/// loop (spec §4.7).
pub async fn save(path: &Path, state: &PersistedState) {
    let path = path.to_owned();
    let payload = match serde_json::to_vec(state) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(%err, "failed to serialize persisted state; save skipped");
            return;
        }
    };

    let result = timeout(SAVE_TIMEOUT, tokio::task::spawn_blocking(move || write_atomic(&path, &payload))).await;

    match result {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(err))) => warn!(%err, "failed to save persisted state"),
        Ok(Err(err)) => warn!(%err, "state save task panicked"),
        Err(_) => warn!("state save abandoned after 1s timeout"),
    }
}

fn write_atomic(path: &Path, payload: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    std::fs::create_dir_all(&parent)?;

    let mut tmp = NamedTempFile::new_in(&parent)
        .map_err(|err| AppError::Persistence(format!("failed to create temp file: {err}")))?;

    let len = u32::try_from(payload.len())
        .map_err(|_| AppError::Persistence("state payload exceeds u32::MAX".into()))?;
    tmp.write_all(&len.to_le_bytes())?;
    tmp.write_all(payload)?;

    tmp.persist(path)
        .map_err(|err| AppError::Persistence(format!("failed to persist state file: {err}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json.lp");

        let mut state = PersistedState::default();
        state.last_seen_ts.insert("C01".into(), "1700000000.000100".into());
        state.silenced_yellers.push("U02".into());

        save(&path, &state).await;
        let loaded = load(&path).await;

        assert_eq!(loaded.last_seen_ts.get("C01").unwrap(), "1700000000.000100");
        assert_eq!(loaded.silenced_yellers, vec!["U02".to_owned()]);
    }

    #[tokio::test]
    async fn missing_file_yields_fresh_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.json.lp");
        let loaded = load(&path).await;
        assert_eq!(loaded.schema_version, SCHEMA_VERSION);
        assert!(loaded.last_seen_ts.is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_yields_fresh_state_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.json.lp");
        tokio::fs::write(&path, b"\xff\xff\xff\xffnotjson").await.unwrap();
        let loaded = load(&path).await;
        assert_eq!(loaded.schema_version, SCHEMA_VERSION);
    }
}
