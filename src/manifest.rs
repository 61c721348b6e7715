//! Manifest (spec §4.2).
//!
//! The authoritative mapping between archive members and their original
//! remote paths, sizes and modification times. Read-only once written.

use crate::container::MANIFEST_MEMBER_NAME;
use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    #[serde(rename = "GoogleDrivePath")]
    pub remote_path: String,
    #[serde(rename = "ArchivePath")]
    pub archive_path: String,
    #[serde(rename = "SizeBytes")]
    pub size_bytes: u64,
    #[serde(rename = "GoogleDriveModifiedTime")]
    pub modified_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(rename = "BackupToolVersion")]
    pub tool_version: String,
    #[serde(rename = "BackupTimestampUtc")]
    pub backup_timestamp_utc: DateTime<Utc>,
    #[serde(rename = "Files")]
    pub files: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn new(tool_version: impl Into<String>, files: Vec<ManifestEntry>) -> Self {
        let mut files = files;
        files.sort_by(|a, b| a.remote_path.cmp(&b.remote_path));
        Manifest {
            tool_version: tool_version.into(),
            backup_timestamp_utc: Utc::now(),
            files,
        }
    }

    /// Look up an entry by the remote id the archive path was derived from
    /// (`archive_path`'s stem).
    pub fn entry_for_id(&self, id: &str) -> Option<&ManifestEntry> {
        self.files
            .iter()
            .find(|e| archive_stem(&e.archive_path) == id)
    }
}

pub fn archive_stem(archive_path: &str) -> &str {
    match archive_path.rsplit_once('.') {
        Some((stem, _ext)) => stem,
        None => archive_path,
    }
}

const TOP_LEVEL_KEYS: &[&str] = &["BackupToolVersion", "BackupTimestampUtc", "Files"];
const ENTRY_KEYS: &[&str] = &[
    "GoogleDrivePath",
    "ArchivePath",
    "SizeBytes",
    "GoogleDriveModifiedTime",
];

/// Rewrite an object's keys to the canonical case listed in `canonical`,
/// matching case-insensitively, so reads tolerate any casing a producer
/// used while writes stay case-preserving (spec §6).
fn canonicalize_keys(value: serde_json::Value, canonical: &[&str]) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                let key = canonical
                    .iter()
                    .find(|c| c.eq_ignore_ascii_case(&k))
                    .map(|c| c.to_string())
                    .unwrap_or(k);
                out.insert(key, v);
            }
            serde_json::Value::Object(out)
        }
        other => other,
    }
}

/// Read `_manifest.json` from `dir`.
pub fn read(dir: &Path) -> EngineResult<Manifest> {
    let path = dir.join(MANIFEST_MEMBER_NAME);
    if !path.exists() {
        return Err(EngineError::ManifestMissing);
    }
    let raw = fs::read_to_string(&path)?;
    let mut value: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|e| EngineError::ManifestCorrupt(e.to_string()))?;

    value = canonicalize_keys(value, TOP_LEVEL_KEYS);
    if let Some(files) = value.get_mut("Files") {
        if let Some(entries) = files.as_array_mut() {
            for entry in entries.iter_mut() {
                *entry = canonicalize_keys(entry.take(), ENTRY_KEYS);
            }
        }
    }

    let files_present = value.get("Files").cloned().unwrap_or(serde_json::Value::Null);
    if !files_present.is_array() {
        return Err(EngineError::ManifestCorrupt(
            "`Files` is absent or not an array".to_string(),
        ));
    }

    serde_json::from_value(value).map_err(|e| EngineError::ManifestCorrupt(e.to_string()))
}

/// Write human-readable JSON with entries sorted by `remote_path`.
pub fn write(dir: &Path, manifest: &Manifest) -> EngineResult<()> {
    let mut manifest = manifest.clone();
    manifest.files.sort_by(|a, b| a.remote_path.cmp(&b.remote_path));
    let json = serde_json::to_string_pretty(&manifest)?;
    fs::write(dir.join(MANIFEST_MEMBER_NAME), json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(path: &str, archive_path: &str) -> ManifestEntry {
        ManifestEntry {
            remote_path: path.to_string(),
            archive_path: archive_path.to_string(),
            size_bytes: 10,
            modified_time: Some(Utc.timestamp_opt(1_700_000_000, 0).unwrap()),
        }
    }

    #[test]
    fn test_write_then_read_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = Manifest::new(
            "1.0.0",
            vec![entry("/Root/b.txt", "X2.txt"), entry("/Root/a.txt", "X1.txt")],
        );
        write(dir.path(), &manifest).unwrap();

        let read_back = read(dir.path()).unwrap();
        assert_eq!(read_back.files[0].remote_path, "/Root/a.txt");
        assert_eq!(read_back.files[1].remote_path, "/Root/b.txt");
    }

    #[test]
    fn test_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(read(dir.path()), Err(EngineError::ManifestMissing)));
    }

    #[test]
    fn test_corrupt_manifest_missing_files_array() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(MANIFEST_MEMBER_NAME), r#"{"BackupToolVersion":"1"}"#).unwrap();
        assert!(matches!(read(dir.path()), Err(EngineError::ManifestCorrupt(_))));
    }

    #[test]
    fn test_archive_stem() {
        assert_eq!(archive_stem("X1.txt"), "X1");
        assert_eq!(archive_stem("abc-123_Z.docx"), "abc-123_Z");
        assert_eq!(archive_stem("noext"), "noext");
    }

    #[test]
    fn test_property_names_case_insensitive_on_read() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(MANIFEST_MEMBER_NAME),
            r#"{"backuptoolversion":"1.0","backuptimestamputc":"2024-01-01T00:00:00Z","files":[{"googledrivepath":"/Root/a.txt","archivepath":"X1.txt","sizebytes":5,"googledrivemodifiedtime":null}]}"#,
        )
        .unwrap();
        let manifest = read(dir.path()).unwrap();
        assert_eq!(manifest.tool_version, "1.0");
        assert_eq!(manifest.files.len(), 1);
        assert_eq!(manifest.files[0].remote_path, "/Root/a.txt");
    }
}
