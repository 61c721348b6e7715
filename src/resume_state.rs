//! Resume-State Store (spec §4.3).
//!
//! A per-restore journal recording which archive members have been
//! successfully uploaded, colocated with the temporary extraction
//! directory a resumed restore continues from.

use crate::config::Config;
use crate::error::EngineResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

pub const RESTORE_STATE_FILE_NAME: &str = "_restore_state.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreState {
    #[serde(rename = "SettingsUsed")]
    pub settings_used: Config,
    #[serde(rename = "CompletedArchivePaths")]
    pub completed_archive_paths: BTreeSet<String>,
    #[serde(rename = "RestoreInitiatedTimestampUtc")]
    pub initiated_timestamp_utc: DateTime<Utc>,
    #[serde(rename = "OriginalBackupArchivePath")]
    pub original_archive_path: String,
}

impl RestoreState {
    pub fn new(settings_used: Config, original_archive_path: impl Into<String>) -> Self {
        RestoreState {
            settings_used,
            completed_archive_paths: BTreeSet::new(),
            initiated_timestamp_utc: Utc::now(),
            original_archive_path: original_archive_path.into(),
        }
    }
}

/// A process-wide guard serializing writes to a single resume state so
/// concurrent upload workers never interleave two `Save` calls (spec §4.3,
/// §5 "Resume state: mutated only under the state's mutex").
#[derive(Default)]
pub struct ResumeStateGuard(Mutex<()>);

impl ResumeStateGuard {
    pub fn new() -> Self {
        ResumeStateGuard(Mutex::new(()))
    }

    pub fn save(&self, dir: &Path, state: &RestoreState) -> EngineResult<()> {
        let _lock = self.0.lock().unwrap_or_else(|p| p.into_inner());
        save_unlocked(dir, state)
    }
}

fn save_unlocked(dir: &Path, state: &RestoreState) -> EngineResult<()> {
    // CompletedArchivePaths sorted ascending, case-insensitive (spec §6).
    let mut sorted: Vec<&String> = state.completed_archive_paths.iter().collect();
    sorted.sort_by_key(|s| s.to_lowercase());

    #[derive(Serialize)]
    struct OnDisk<'a> {
        #[serde(rename = "SettingsUsed")]
        settings_used: &'a Config,
        #[serde(rename = "CompletedArchivePaths")]
        completed_archive_paths: Vec<&'a String>,
        #[serde(rename = "RestoreInitiatedTimestampUtc")]
        initiated_timestamp_utc: &'a DateTime<Utc>,
        #[serde(rename = "OriginalBackupArchivePath")]
        original_archive_path: &'a String,
    }

    let on_disk = OnDisk {
        settings_used: &state.settings_used,
        completed_archive_paths: sorted,
        initiated_timestamp_utc: &state.initiated_timestamp_utc,
        original_archive_path: &state.original_archive_path,
    };

    let json = serde_json::to_string_pretty(&on_disk)?;
    fs::write(dir.join(RESTORE_STATE_FILE_NAME), json)?;
    Ok(())
}

pub fn load(dir: &Path) -> EngineResult<Option<RestoreState>> {
    let path = dir.join(RESTORE_STATE_FILE_NAME);
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(&path)?;
    let state: RestoreState = serde_json::from_str(&raw)?;
    Ok(Some(state))
}
