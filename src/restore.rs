//! Restore Engine (spec §4.7).

use crate::container;
use crate::context::{CounterSnapshot, OperationContext, OperationResult};
use crate::error::{EngineError, EngineResult};
use crate::executor::{AtomicCounters, CancelToken};
use crate::folder_cache::FolderIdCache;
use crate::manifest::{self, Manifest, ManifestEntry};
use crate::remote::{mime_from_extension, RemotePort};
use crate::resume_state::{self, ResumeStateGuard, RestoreState};
use log::warn;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

pub enum RestoreSource {
    /// Start fresh from an archive file.
    Archive(PathBuf),
    /// Resume from a directory containing a prior extraction and state file.
    ResumeDir(PathBuf),
}

pub struct RestoreOptions {
    pub source: RestoreSource,
    pub remote_restore_parent_id: String,
    pub max_parallel_tasks: i64,
    pub temp_dir: PathBuf,
    pub tool_version: String,
    pub settings_used: crate::config::Config,
}

pub struct RestoreOutcome {
    pub result: OperationResult,
    pub work_dir: PathBuf,
}

/// Run a restore per `options`. Returns `Ok` whether or not the restore
/// succeeded cleanly — cleanliness is reflected in `result.success`. Only
/// `Cancelled`/fatal setup errors are returned as `Err`.
pub async fn run(port: Arc<dyn RemotePort>, options: RestoreOptions) -> EngineResult<RestoreOutcome> {
    let started = Instant::now();

    let (work_dir, manifest, mut state, fresh) = prepare(&options).await?;

    let parallel_tasks = state.settings_used.max_parallel_tasks;
    if parallel_tasks != options.max_parallel_tasks && !fresh {
        warn!(
            "ambient max_parallel_tasks ({}) overridden by resumed settings snapshot ({})",
            options.max_parallel_tasks, parallel_tasks
        );
    }
    let ctx = OperationContext::new(parallel_tasks);

    // Phase 1: folder materialization (sequential).
    let restore_parent_id = state.settings_used.remote_restore_parent_id.clone().ok_or_else(|| {
        EngineError::RootUnavailable("no remote_restore_parent_id in settings snapshot".into())
    })?;
    let folder_cache = Arc::new(FolderIdCache::new(restore_parent_id));
    materialize_folders(&port, &manifest, &folder_cache).await?;

    // Phase 2: upload (parallel).
    let already_done: BTreeSet<String> = state.completed_archive_paths.clone();
    let pending: Vec<ManifestEntry> = manifest
        .files
        .iter()
        .filter(|e| !contains_ci(&already_done, &e.archive_path))
        .cloned()
        .collect();

    let files_already_done = Arc::new(AtomicU64::new(
        (manifest.files.len() - pending.len()) as u64,
    ));
    let files_skipped = Arc::new(AtomicU64::new(0));
    let files_uploaded = Arc::new(AtomicU64::new(0));
    let completed_in_this_run = Arc::new(Mutex::new(Vec::<String>::new()));

    if ctx.is_cancelled() {
        return finalize_cancelled(&work_dir, &mut state, &completed_in_this_run, started);
    }

    ctx.executor
        .run_all(pending, {
            let port = Arc::clone(&port);
            let folder_cache = Arc::clone(&folder_cache);
            let work_dir = work_dir.clone();
            let files_skipped = Arc::clone(&files_skipped);
            let files_uploaded = Arc::clone(&files_uploaded);
            let completed_in_this_run = Arc::clone(&completed_in_this_run);
            move |entry, cancel| {
                let port = Arc::clone(&port);
                let folder_cache = Arc::clone(&folder_cache);
                let work_dir = work_dir.clone();
                let files_skipped = Arc::clone(&files_skipped);
                let files_uploaded = Arc::clone(&files_uploaded);
                let completed_in_this_run = Arc::clone(&completed_in_this_run);
                async move {
                    upload_one(
                        &entry,
                        &port,
                        &work_dir,
                        &folder_cache,
                        &files_skipped,
                        &files_uploaded,
                        &completed_in_this_run,
                        &cancel,
                    )
                    .await;
                }
            }
        })
        .await;

    // Phase 3: state finalization (best-effort even on cancellation).
    {
        let newly_completed = completed_in_this_run.lock().unwrap();
        for path in newly_completed.iter() {
            state.completed_archive_paths.insert(path.clone());
        }
    }
    let guard = ResumeStateGuard::new();
    guard.save(&work_dir, &state)?;

    if ctx.is_cancelled() {
        return Ok(RestoreOutcome {
            result: OperationResult {
                success: false,
                cancelled: true,
                elapsed: started.elapsed(),
                counters: snapshot_restore(&files_skipped, &files_uploaded, &files_already_done),
            },
            work_dir,
        });
    }

    let skipped = files_skipped.load(Ordering::Relaxed);
    let uploaded = files_uploaded.load(Ordering::Relaxed);
    let done = files_already_done.load(Ordering::Relaxed);
    let success = skipped == 0 && uploaded + done == manifest.files.len() as u64;

    if success {
        std::fs::remove_dir_all(&work_dir).ok();
    }

    Ok(RestoreOutcome {
        result: OperationResult {
            success,
            cancelled: false,
            elapsed: started.elapsed(),
            counters: snapshot_restore(&files_skipped, &files_uploaded, &files_already_done),
        },
        work_dir,
    })
}

fn finalize_cancelled(
    work_dir: &Path,
    state: &mut RestoreState,
    completed_in_this_run: &Arc<Mutex<Vec<String>>>,
    started: Instant,
) -> EngineResult<RestoreOutcome> {
    let newly_completed = completed_in_this_run.lock().unwrap();
    for path in newly_completed.iter() {
        state.completed_archive_paths.insert(path.clone());
    }
    let guard = ResumeStateGuard::new();
    guard.save(work_dir, state)?;
    Ok(RestoreOutcome {
        result: OperationResult {
            success: false,
            cancelled: true,
            elapsed: started.elapsed(),
            counters: CounterSnapshot::default(),
        },
        work_dir: work_dir.to_path_buf(),
    })
}

fn snapshot_restore(
    skipped: &AtomicU64,
    uploaded: &AtomicU64,
    already_done: &AtomicU64,
) -> CounterSnapshot {
    CounterSnapshot {
        successful_downloads: uploaded.load(Ordering::Relaxed),
        files_skipped: skipped.load(Ordering::Relaxed),
        files_already_done: already_done.load(Ordering::Relaxed),
        ..Default::default()
    }
}

async fn prepare(
    options: &RestoreOptions,
) -> EngineResult<(PathBuf, Manifest, RestoreState, bool)> {
    match &options.source {
        RestoreSource::Archive(archive_path) => {
            let work_dir = options
                .temp_dir
                .join(format!("restore_{}", uuid::Uuid::new_v4()));
            container::extract_all(archive_path, &work_dir)?;
            let manifest = manifest::read(&work_dir)?;
            let mut settings = options.settings_used.clone();
            settings.remote_restore_parent_id = Some(options.remote_restore_parent_id.clone());
            settings.max_parallel_tasks = options.max_parallel_tasks;
            let state = RestoreState::new(settings, archive_path.display().to_string());
            let guard = ResumeStateGuard::new();
            guard.save(&work_dir, &state)?;
            Ok((work_dir, manifest, state, true))
        }
        RestoreSource::ResumeDir(dir) => {
            let manifest = manifest::read(dir)?;
            let state = resume_state::load(dir)?.ok_or(EngineError::ManifestMissing)?;
            Ok((dir.clone(), manifest, state, false))
        }
    }
}

async fn materialize_folders(
    port: &Arc<dyn RemotePort>,
    manifest: &Manifest,
    cache: &FolderIdCache,
) -> EngineResult<()> {
    let mut dirs: Vec<String> = manifest
        .files
        .iter()
        .filter_map(|e| directory_of(&e.remote_path))
        .collect::<std::collections::HashSet<_>>()
        .into_iter()
        .collect();
    dirs.sort_by_key(|d| d.len());

    for dir in dirs {
        let segments: Vec<&str> = dir.split('/').filter(|s| !s.is_empty()).collect();
        let mut accumulated = String::new();
        let mut parent_id = cache.get("").expect("restore parent id seeded at construction");
        for segment in segments {
            let child_path = if accumulated.is_empty() {
                segment.to_string()
            } else {
                format!("{accumulated}/{segment}")
            };
            if let Some(existing) = cache.get(&child_path) {
                parent_id = existing;
            } else {
                let found = port
                    .find_child_folder(&parent_id, segment)
                    .await
                    .map_err(EngineError::from)?;
                let folder_id = match found {
                    Some(id) => id,
                    None => port
                        .create_folder(&parent_id, segment)
                        .await
                        .map_err(EngineError::from)?,
                };
                cache.insert_if_absent(&child_path, folder_id.clone());
                parent_id = cache.get(&child_path).unwrap();
            }
            accumulated = child_path;
        }
    }
    Ok(())
}

/// The directory portion of a canonical `/Root/a/b/name.ext` path, relative
/// to the restore parent — includes the root folder's own name, since the
/// root is materialized as a real folder under the restore parent (spec
/// E3: "folder `Root` created once"). `None` only for a path with no
/// directory component at all.
fn directory_of(remote_path: &str) -> Option<String> {
    let trimmed = remote_path.trim_start_matches('/');
    let mut segments: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() <= 1 {
        return None;
    }
    segments.pop();
    Some(segments.join("/"))
}

#[allow(clippy::too_many_arguments)]
async fn upload_one(
    entry: &ManifestEntry,
    port: &Arc<dyn RemotePort>,
    work_dir: &Path,
    folder_cache: &FolderIdCache,
    files_skipped: &AtomicU64,
    files_uploaded: &AtomicU64,
    completed_in_this_run: &Arc<Mutex<Vec<String>>>,
    cancel: &CancelToken,
) {
    if cancel.is_cancelled() {
        return;
    }
    let local_path = work_dir.join(&entry.archive_path);
    if !local_path.exists() {
        AtomicCounters::inc(files_skipped, 1);
        return;
    }

    let parent_relative = directory_of(&entry.remote_path).unwrap_or_default();
    let parent_id = match folder_cache.get(&parent_relative) {
        Some(id) => id,
        None => {
            warn!("no cached folder id for {parent_relative}, skipping {}", entry.archive_path);
            AtomicCounters::inc(files_skipped, 1);
            return;
        }
    };

    let name = basename(&entry.remote_path);
    let mime = mime_from_extension(&name);

    // Retried per spec §7: "Transient*/LocalIO are retried inside the
    // download/upload routines" — the same policy RemoteFetcher::fetch
    // applies on the Backup/Repair side.
    match crate::fetch::upload_with_retry(port, &parent_id, &name, &mime, &local_path, cancel).await {
        Ok(_) => {
            AtomicCounters::inc(files_uploaded, 1);
            completed_in_this_run
                .lock()
                .unwrap()
                .push(entry.archive_path.clone());
        }
        Err(EngineError::Cancelled) => {}
        Err(_) => {
            AtomicCounters::inc(files_skipped, 1);
        }
    }
}

fn basename(remote_path: &str) -> String {
    remote_path.rsplit('/').next().unwrap_or(remote_path).to_string()
}

fn contains_ci(set: &BTreeSet<String>, value: &str) -> bool {
    set.iter().any(|s| s.eq_ignore_ascii_case(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockRemotePort;
    use chrono::{TimeZone, Utc};

    fn make_archive(out_dir: &Path) -> PathBuf {
        let work = tempfile::tempdir().unwrap();
        std::fs::write(work.path().join("X1.txt"), b"0123456789").unwrap();
        std::fs::write(work.path().join("X2.docx"), b"docbytes").unwrap();
        let manifest = Manifest::new(
            "test",
            vec![
                ManifestEntry {
                    remote_path: "/Root/a.txt".into(),
                    archive_path: "X1.txt".into(),
                    size_bytes: 10,
                    modified_time: Some(Utc.timestamp_opt(1_700_000_000, 0).unwrap()),
                },
                ManifestEntry {
                    remote_path: "/Root/doc.docx".into(),
                    archive_path: "X2.docx".into(),
                    size_bytes: 8,
                    modified_time: Some(Utc.timestamp_opt(1_700_000_000, 0).unwrap()),
                },
            ],
        );
        manifest::write(work.path(), &manifest).unwrap();
        let archive_path = out_dir.join("backup.zip");
        container::create(work.path(), &archive_path).unwrap();
        archive_path
    }

    #[tokio::test]
    async fn test_e3_fresh_restore_uploads_all() {
        let mock = MockRemotePort::new();
        let port: Arc<dyn RemotePort> = Arc::new(mock);

        let out = tempfile::tempdir().unwrap();
        let archive_path = make_archive(out.path());
        let temp = tempfile::tempdir().unwrap();

        let options = RestoreOptions {
            source: RestoreSource::Archive(archive_path),
            remote_restore_parent_id: "parent".into(),
            max_parallel_tasks: 2,
            temp_dir: temp.path().to_path_buf(),
            tool_version: "test".into(),
            settings_used: crate::config::Config::default(),
        };

        let outcome = run(port, options).await.unwrap();
        assert!(outcome.result.success);
        assert!(!outcome.work_dir.exists());
    }

    #[tokio::test]
    async fn test_e4_resume_skips_already_completed() {
        let mock = Arc::new(MockRemotePort::new());
        let port: Arc<dyn RemotePort> = mock.clone();

        let out = tempfile::tempdir().unwrap();
        let archive_path = make_archive(out.path());
        let temp = tempfile::tempdir().unwrap();

        let work_dir = temp.path().join("resume_work");
        container::extract_all(&archive_path, &work_dir).unwrap();
        let manifest = manifest::read(&work_dir).unwrap();

        let mut settings = crate::config::Config::default();
        settings.remote_restore_parent_id = Some("parent".into());
        let mut state = RestoreState::new(settings, archive_path.display().to_string());
        state.completed_archive_paths.insert("X1.txt".into());
        let guard = ResumeStateGuard::new();
        guard.save(&work_dir, &state).unwrap();

        let options = RestoreOptions {
            source: RestoreSource::ResumeDir(work_dir.clone()),
            remote_restore_parent_id: "parent".into(),
            max_parallel_tasks: 2,
            temp_dir: temp.path().to_path_buf(),
            tool_version: "test".into(),
            settings_used: crate::config::Config::default(),
        };

        let outcome = run(Arc::clone(&port), options).await.unwrap();
        assert!(outcome.result.success);
        assert_eq!(manifest.files.len(), 2);

        let uploads = mock.uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].1, "doc.docx");
    }
}
