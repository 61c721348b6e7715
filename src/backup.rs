//! Backup Engine: list the remote subtree, decide copy-vs-download against
//! a prior archive, fetch in parallel, write a manifest and a fresh
//! archive.

use crate::container;
use crate::context::{CounterSnapshot, OperationContext, OperationResult};
use crate::error::{EngineError, EngineResult};
use crate::executor::{AtomicCounters, CancelToken};
use crate::exclude::ExclusionSet;
use crate::fetch::RemoteFetcher;
use crate::manifest::{self, Manifest, ManifestEntry};
use crate::remote::{classify_mime, MimeClass, RemoteItem, RemotePort};
use crate::time_util::times_equivalent;
use log::{info, warn};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

pub struct BackupOptions {
    pub remote_root_id: String,
    pub prior_archive_path: Option<PathBuf>,
    pub exclusions: ExclusionSet,
    pub max_parallel_tasks: i64,
    pub temp_dir: PathBuf,
    pub output_dir: PathBuf,
    pub tool_version: String,
}

pub struct BackupOutcome {
    pub result: OperationResult,
    pub archive_path: Option<PathBuf>,
}

#[derive(Clone)]
enum Action {
    Copy {
        source_member_path: PathBuf,
        archive_path: String,
    },
    Download {
        export_mime: Option<&'static str>,
        archive_path: String,
    },
    SkipUnsupported,
}

struct Planned {
    item: RemoteItem,
    action: Action,
}

/// Run a backup of `options.remote_root_id` against `port`.
pub async fn run(
    port: Arc<dyn RemotePort>,
    options: BackupOptions,
) -> EngineResult<BackupOutcome> {
    let started = Instant::now();
    let ctx = OperationContext::new(options.max_parallel_tasks);

    // Phase 1: prior-archive prep (sequential, permissive on failure).
    let prior_by_id = load_prior_manifest(&options, &ctx.cancel).await;

    // Phase 2: listing (sequential, breadth-first).
    let root_meta = port
        .get_meta(&options.remote_root_id)
        .await
        .map_err(|_| EngineError::RootUnavailable(options.remote_root_id.clone()))?;

    let items = list_subtree(&port, &root_meta, &options.exclusions, &ctx).await?;
    AtomicCounters::inc(&ctx.counters.files_listed, items.len() as u64);

    // Phase 3: analysis (sequential).
    let planned = analyze(items, &prior_by_id, &ctx.counters);

    // Phase 4: execution (parallel, bound clamped by OperationContext).
    let work_dir = options.temp_dir.join(format!("backup_{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&work_dir)?;
    let fetcher = Arc::new(RemoteFetcher::new(Arc::clone(&port)));
    let prior_dir = prior_by_id.as_ref().map(|p| p.extract_dir.clone());

    let manifest_entries = Arc::new(Mutex::new(Vec::<ManifestEntry>::new()));
    let counters = Arc::clone(&ctx.counters);

    let units: Vec<Planned> = planned;

    if ctx.is_cancelled() {
        std::fs::remove_dir_all(&work_dir).ok();
        if let Some(dir) = &prior_dir {
            std::fs::remove_dir_all(dir).ok();
        }
        return Err(EngineError::Cancelled);
    }

    ctx.executor
        .run_all(units, {
            let fetcher = Arc::clone(&fetcher);
            let manifest_entries = Arc::clone(&manifest_entries);
            let counters = Arc::clone(&counters);
            let work_dir = work_dir.clone();
            let prior_dir = prior_dir.clone();
            move |planned, cancel| {
                let fetcher = Arc::clone(&fetcher);
                let manifest_entries = Arc::clone(&manifest_entries);
                let counters = Arc::clone(&counters);
                let work_dir = work_dir.clone();
                let prior_dir = prior_dir.clone();
                async move {
                    execute_one(planned, &fetcher, &work_dir, prior_dir.as_deref(), &counters, &cancel)
                        .await
                        .map(|entry| {
                            if let Some(entry) = entry {
                                manifest_entries.lock().unwrap().push(entry);
                            }
                        })
                }
            }
        })
        .await;

    if ctx.is_cancelled() {
        std::fs::remove_dir_all(&work_dir).ok();
        if let Some(dir) = &prior_dir {
            std::fs::remove_dir_all(dir).ok();
        }
        return Err(EngineError::Cancelled);
    }

    // Phase 5: finalization (sequential).
    let entries = Arc::try_unwrap(manifest_entries)
        .map(|m| m.into_inner().unwrap())
        .unwrap_or_default();
    let manifest = Manifest::new(options.tool_version.clone(), entries);
    manifest::write(&work_dir, &manifest)?;

    std::fs::create_dir_all(&options.output_dir)?;
    let archive_name = format!("backup_{}.zip", chrono::Utc::now().format("%Y%m%dT%H%M%SZ"));
    let archive_path = options.output_dir.join(archive_name);
    container::create(&work_dir, &archive_path)?;

    std::fs::remove_dir_all(&work_dir).ok();
    if let Some(dir) = &prior_dir {
        std::fs::remove_dir_all(dir).ok();
    }

    let snapshot = CounterSnapshot::from_counters(&ctx.counters);
    let success = snapshot.failed_downloads == 0 && snapshot.copy_errors == 0;

    Ok(BackupOutcome {
        result: OperationResult {
            success,
            cancelled: false,
            elapsed: started.elapsed(),
            counters: snapshot,
        },
        archive_path: Some(archive_path),
    })
}

struct PriorManifest {
    by_id: HashMap<String, ManifestEntry>,
    extract_dir: PathBuf,
}

async fn load_prior_manifest(options: &BackupOptions, _cancel: &CancelToken) -> Option<PriorManifest> {
    let prior_path = options.prior_archive_path.as_ref()?;
    if !prior_path.exists() {
        return None;
    }
    let extract_dir = options
        .temp_dir
        .join(format!("oldextract_{}", uuid::Uuid::new_v4()));

    if let Err(e) = container::extract_all(prior_path, &extract_dir) {
        warn!("prior archive extraction failed, proceeding as full backup: {e}");
        return None;
    }
    match manifest::read(&extract_dir) {
        Ok(manifest) => {
            let by_id = manifest
                .files
                .iter()
                .map(|e| (manifest::archive_stem(&e.archive_path).to_string(), e.clone()))
                .collect();
            Some(PriorManifest { by_id, extract_dir })
        }
        Err(e) => {
            warn!("prior manifest unreadable, proceeding as full backup: {e}");
            None
        }
    }
}

async fn list_subtree(
    port: &Arc<dyn RemotePort>,
    root: &RemoteItem,
    exclusions: &ExclusionSet,
    ctx: &OperationContext,
) -> EngineResult<Vec<RemoteItem>> {
    let mut out = Vec::new();
    let mut queue: VecDeque<(String, String)> = VecDeque::new();
    queue.push_back((root.id.clone(), String::new()));

    while let Some((folder_id, relative_path)) = queue.pop_front() {
        if ctx.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let children = port
            .list_children(&folder_id)
            .await
            .map_err(EngineError::from)?;

        for child in children {
            let child_relative = normalize_relative(&relative_path, &child.name);
            if exclusions.is_excluded(&child_relative) {
                continue;
            }
            let canonical_path = format!("/{}{}", root.name, child_relative);
            let mut item = child.clone();
            item.path = canonical_path;

            if item.is_folder {
                queue.push_back((item.id.clone(), child_relative));
            } else {
                out.push(item);
            }
        }
    }
    Ok(out)
}

fn normalize_relative(parent_relative: &str, name: &str) -> String {
    format!("{parent_relative}/{name}")
}

fn analyze(
    items: Vec<RemoteItem>,
    prior: &Option<PriorManifest>,
    counters: &Arc<AtomicCounters>,
) -> Vec<Planned> {
    let mut planned = Vec::with_capacity(items.len());
    for item in items {
        match classify_mime(&item.mime_type) {
            MimeClass::Exportable { export_mime, extension } => {
                planned.push(Planned {
                    action: Action::Download {
                        export_mime: Some(export_mime),
                        archive_path: format!("{}{}", item.id, extension),
                    },
                    item,
                });
            }
            MimeClass::UnsupportedNative => {
                AtomicCounters::inc(&counters.unsupported_skipped, 1);
                planned.push(Planned {
                    action: Action::SkipUnsupported,
                    item,
                });
            }
            MimeClass::Ordinary => {
                let extension = extension_of(&item.name);
                let prior_entry = prior
                    .as_ref()
                    .and_then(|p| p.by_id.get(&item.id));
                let reuse = match prior_entry {
                    Some(entry) => times_equivalent(item.modified_time, entry.modified_time),
                    None => false,
                };
                if reuse {
                    let prior = prior.as_ref().unwrap();
                    let entry = prior.by_id.get(&item.id).unwrap();
                    planned.push(Planned {
                        action: Action::Copy {
                            source_member_path: prior.extract_dir.join(&entry.archive_path),
                            archive_path: format!("{}{}", item.id, extension),
                        },
                        item,
                    });
                } else {
                    planned.push(Planned {
                        action: Action::Download {
                            export_mime: None,
                            archive_path: format!("{}{}", item.id, extension),
                        },
                        item,
                    });
                }
            }
        }
    }
    planned
}

fn extension_of(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => format!(".{ext}"),
        _ => String::new(),
    }
}

async fn execute_one(
    planned: Planned,
    fetcher: &Arc<RemoteFetcher>,
    work_dir: &Path,
    _prior_dir: Option<&Path>,
    counters: &Arc<AtomicCounters>,
    cancel: &CancelToken,
) -> Result<Option<ManifestEntry>, EngineError> {
    match planned.action {
        Action::SkipUnsupported => Ok(None),
        Action::Copy {
            source_member_path,
            archive_path,
        } => {
            let dest = work_dir.join(&archive_path);
            match std::fs::copy(&source_member_path, &dest) {
                Ok(bytes) => {
                    AtomicCounters::inc(&counters.files_copied, 1);
                    AtomicCounters::inc(&counters.total_bytes_copied, bytes);
                    Ok(Some(ManifestEntry {
                        remote_path: planned.item.path,
                        archive_path,
                        size_bytes: bytes,
                        modified_time: planned.item.modified_time,
                    }))
                }
                Err(_) => {
                    AtomicCounters::inc(&counters.copy_errors, 1);
                    download_fallback(&planned.item, fetcher, work_dir, counters, cancel).await
                }
            }
        }
        Action::Download { .. } => {
            download_fallback(&planned.item, fetcher, work_dir, counters, cancel).await
        }
    }
}

async fn download_fallback(
    item: &RemoteItem,
    fetcher: &Arc<RemoteFetcher>,
    work_dir: &Path,
    counters: &Arc<AtomicCounters>,
    cancel: &CancelToken,
) -> Result<Option<ManifestEntry>, EngineError> {
    AtomicCounters::inc(&counters.download_attempts, 1);
    let dest = work_dir.join(format!("{}.part", item.id));
    match fetcher.fetch(item, &dest, cancel).await {
        Ok(outcome) => {
            let final_dest = work_dir.join(&outcome.archive_path);
            std::fs::rename(&dest, &final_dest)?;
            AtomicCounters::inc(&counters.successful_downloads, 1);
            AtomicCounters::inc(&counters.total_bytes_downloaded, outcome.bytes_written);
            Ok(Some(ManifestEntry {
                remote_path: item.path.clone(),
                archive_path: outcome.archive_path,
                size_bytes: outcome.bytes_written,
                modified_time: item.modified_time,
            }))
        }
        Err(EngineError::Cancelled) => Err(EngineError::Cancelled),
        Err(_) => {
            AtomicCounters::inc(&counters.failed_downloads, 1);
            info!("download failed for {}", item.id);
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockRemotePort;
    use chrono::{TimeZone, Utc};

    fn item(id: &str, name: &str, is_folder: bool, mime: &str, path: &str, time_secs: i64) -> RemoteItem {
        RemoteItem {
            id: id.to_string(),
            name: name.to_string(),
            path: path.to_string(),
            is_folder,
            size_bytes: if is_folder { 0 } else { 10 },
            mime_type: mime.to_string(),
            modified_time: Some(Utc.timestamp_opt(time_secs, 0).unwrap()),
        }
    }

    #[tokio::test]
    async fn test_e1_no_prior_emits_manifest_and_members() {
        let mock = MockRemotePort::new();
        mock.set_meta(item("root", "Root", true, "application/vnd.google-apps.folder", "", 0));
        mock.add_child("root", item("X1", "a.txt", false, "text/plain", "", 100));
        mock.add_child(
            "root",
            item("X2", "doc", false, "application/vnd.google-apps.document", "", 100),
        );
        mock.set_file_contents("X1", b"0123456789".to_vec());
        mock.set_file_contents("X2", b"docbytes".to_vec());
        let port: Arc<dyn RemotePort> = Arc::new(mock);

        let temp = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let options = BackupOptions {
            remote_root_id: "root".into(),
            prior_archive_path: None,
            exclusions: ExclusionSet::new(Vec::<String>::new()),
            max_parallel_tasks: 2,
            temp_dir: temp.path().to_path_buf(),
            output_dir: out.path().to_path_buf(),
            tool_version: "test".into(),
        };

        let outcome = run(port, options).await.unwrap();
        assert!(outcome.result.success);
        assert_eq!(outcome.result.counters.files_listed, 2);
        assert_eq!(outcome.result.counters.successful_downloads, 2);

        let archive_path = outcome.archive_path.unwrap();
        assert!(archive_path.exists());

        let extract_dir = tempfile::tempdir().unwrap();
        container::extract_all(&archive_path, extract_dir.path()).unwrap();
        assert!(extract_dir.path().join("X1.txt").exists());
        assert!(extract_dir.path().join("X2.docx").exists());
        let manifest = manifest::read(extract_dir.path()).unwrap();
        assert_eq!(manifest.files.len(), 2);
    }

    #[tokio::test]
    async fn test_e2_incremental_copies_unchanged_downloads_changed() {
        let mock = MockRemotePort::new();
        mock.set_meta(item("root", "Root", true, "application/vnd.google-apps.folder", "", 0));
        mock.add_child("root", item("X1", "a.txt", false, "text/plain", "", 100));
        mock.add_child("root", item("X2", "b.txt", false, "text/plain", "", 100));
        mock.set_file_contents("X1", b"unchanged".to_vec());
        mock.set_file_contents("X2", b"first-version".to_vec());
        let port: Arc<dyn RemotePort> = Arc::new(mock);

        let temp = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let first_options = BackupOptions {
            remote_root_id: "root".into(),
            prior_archive_path: None,
            exclusions: ExclusionSet::new(Vec::<String>::new()),
            max_parallel_tasks: 2,
            temp_dir: temp.path().to_path_buf(),
            output_dir: out.path().to_path_buf(),
            tool_version: "test".into(),
        };
        let first = run(Arc::clone(&port), first_options).await.unwrap();
        assert_eq!(first.result.counters.successful_downloads, 2);
        let prior_archive_path = first.archive_path.unwrap();

        // Second run: X1's remote mtime is unchanged (100s -> reused via
        // Copy), X2's remote mtime moved forward by more than a second
        // (must be re-downloaded) and its content changed to match.
        let mock2 = MockRemotePort::new();
        mock2.set_meta(item("root", "Root", true, "application/vnd.google-apps.folder", "", 0));
        mock2.add_child("root", item("X1", "a.txt", false, "text/plain", "", 100));
        mock2.add_child("root", item("X2", "b.txt", false, "text/plain", "", 500));
        mock2.set_file_contents("X1", b"unchanged".to_vec());
        mock2.set_file_contents("X2", b"second-version".to_vec());
        let port2: Arc<dyn RemotePort> = Arc::new(mock2);

        let second_options = BackupOptions {
            remote_root_id: "root".into(),
            prior_archive_path: Some(prior_archive_path),
            exclusions: ExclusionSet::new(Vec::<String>::new()),
            max_parallel_tasks: 2,
            temp_dir: temp.path().to_path_buf(),
            output_dir: out.path().to_path_buf(),
            tool_version: "test".into(),
        };
        let second = run(port2, second_options).await.unwrap();
        assert!(second.result.success);
        assert_eq!(second.result.counters.files_copied, 1);
        assert_eq!(second.result.counters.successful_downloads, 1);

        let extract_dir = tempfile::tempdir().unwrap();
        container::extract_all(&second.archive_path.unwrap(), extract_dir.path()).unwrap();
        assert_eq!(
            std::fs::read(extract_dir.path().join("X1.txt")).unwrap(),
            b"unchanged"
        );
        assert_eq!(
            std::fs::read(extract_dir.path().join("X2.txt")).unwrap(),
            b"second-version"
        );
    }
}
