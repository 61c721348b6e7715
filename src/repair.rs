//! Repair Engine (spec §4.8).

use crate::container;
use crate::context::{CounterSnapshot, OperationContext, OperationResult};
use crate::error::{EngineError, EngineResult};
use crate::executor::{AtomicCounters, CancelToken};
use crate::fetch::RemoteFetcher;
use crate::manifest::{self, ManifestEntry};
use crate::remote::{RemoteItem, RemotePort};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

pub struct RepairOptions {
    pub archive_path: PathBuf,
    pub temp_dir: PathBuf,
    pub archive_output_dir: PathBuf,
    pub max_parallel_tasks: i64,
}

pub struct RepairOutcome {
    pub result: OperationResult,
    pub repair_attempted: bool,
    pub repaired_archive_path: Option<PathBuf>,
}

fn is_valid_id(stem: &str) -> bool {
    !stem.is_empty() && stem.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Run a repair of `options.archive_path`. Never fatal on a missing or
/// damaged archive past the initial extraction/manifest read — those are
/// reported via `repair_attempted=false, result.success=false`.
pub async fn run(port: Arc<dyn RemotePort>, options: RepairOptions) -> EngineResult<RepairOutcome> {
    let started = Instant::now();
    let extract_dir = options
        .temp_dir
        .join(format!("repair_extract_{}", uuid::Uuid::new_v4()));

    let cleanup = |dir: &Path| {
        std::fs::remove_dir_all(dir).ok();
    };

    if let Err(e) = container::extract_all(&options.archive_path, &extract_dir) {
        cleanup(&extract_dir);
        return Err(e);
    }

    let manifest = match manifest::read(&extract_dir) {
        Ok(m) => m,
        Err(_) => {
            cleanup(&extract_dir);
            return Ok(RepairOutcome {
                result: OperationResult {
                    success: false,
                    cancelled: false,
                    elapsed: started.elapsed(),
                    counters: CounterSnapshot::default(),
                },
                repair_attempted: false,
                repaired_archive_path: None,
            });
        }
    };

    // Phase 2: check (sequential).
    let mut missing: Vec<(ManifestEntry, String)> = Vec::new();
    let mut skipped_no_id = 0u64;
    let mut found_ok = 0u64;

    for entry in &manifest.files {
        let member_path = extract_dir.join(&entry.archive_path);
        if member_path.exists() {
            found_ok += 1;
            continue;
        }
        let stem = manifest::archive_stem(&entry.archive_path);
        if is_valid_id(stem) {
            missing.push((entry.clone(), stem.to_string()));
        } else {
            skipped_no_id += 1;
        }
    }

    let repair_attempted = !missing.is_empty() || skipped_no_id > 0;

    if missing.is_empty() {
        // No usable missing entries: either nothing missing (no-op, spec
        // invariant #8) or every missing entry had an unusable id.
        cleanup(&extract_dir);
        let no_repair_needed = skipped_no_id == 0;
        return Ok(RepairOutcome {
            result: OperationResult {
                success: no_repair_needed,
                cancelled: false,
                elapsed: started.elapsed(),
                counters: CounterSnapshot {
                    files_listed: manifest.files.len() as u64,
                    files_copied: found_ok,
                    repairs_skipped_no_id: skipped_no_id,
                    ..Default::default()
                },
            },
            repair_attempted,
            repaired_archive_path: None,
        });
    }

    // Phase 3: refetch (parallel).
    let ctx = OperationContext::new(options.max_parallel_tasks);
    let fetcher = Arc::new(RemoteFetcher::new(Arc::clone(&port)));
    let counters = Arc::clone(&ctx.counters);

    ctx.executor
        .run_all(missing, {
            let fetcher = Arc::clone(&fetcher);
            let port = Arc::clone(&port);
            let extract_dir = extract_dir.clone();
            let counters = Arc::clone(&counters);
            move |(entry, id), cancel| {
                let fetcher = Arc::clone(&fetcher);
                let port = Arc::clone(&port);
                let extract_dir = extract_dir.clone();
                let counters = Arc::clone(&counters);
                async move {
                    refetch_one(&entry, &id, &port, &fetcher, &extract_dir, &counters, &cancel).await;
                }
            }
        })
        .await;

    if ctx.is_cancelled() {
        cleanup(&extract_dir);
        return Err(EngineError::Cancelled);
    }

    let snapshot = CounterSnapshot::from_counters(&ctx.counters);
    let all_refetched_ok = snapshot.failed_downloads == 0;
    let emit = all_refetched_ok && skipped_no_id == 0;

    let repaired_archive_path = if emit {
        std::fs::create_dir_all(&options.archive_output_dir).ok();
        let stem = options
            .archive_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("archive");
        let output_dir = options
            .archive_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| options.archive_output_dir.clone());
        let out_name = format!(
            "{stem}_REPAIRED_{}.zip",
            chrono::Utc::now().format("%Y%m%dT%H%M%SZ")
        );
        let out_path = output_dir.join(out_name);
        container::create(&extract_dir, &out_path)?;
        Some(out_path)
    } else {
        None
    };

    cleanup(&extract_dir);

    Ok(RepairOutcome {
        result: OperationResult {
            success: emit,
            cancelled: false,
            elapsed: started.elapsed(),
            counters: CounterSnapshot {
                files_listed: manifest.files.len() as u64,
                files_copied: found_ok,
                repairs_skipped_no_id: skipped_no_id,
                ..snapshot
            },
        },
        repair_attempted,
        repaired_archive_path,
    })
}

async fn refetch_one(
    entry: &ManifestEntry,
    id: &str,
    port: &Arc<dyn RemotePort>,
    fetcher: &Arc<RemoteFetcher>,
    extract_dir: &Path,
    counters: &AtomicCounters,
    cancel: &CancelToken,
) {
    AtomicCounters::inc(&counters.download_attempts, 1);
    let meta = match port.get_meta(id).await {
        Ok(m) => m,
        Err(_) => {
            AtomicCounters::inc(&counters.failed_downloads, 1);
            return;
        }
    };
    let item = RemoteItem {
        id: id.to_string(),
        name: meta.name,
        path: entry.remote_path.clone(),
        is_folder: false,
        size_bytes: entry.size_bytes,
        mime_type: meta.mime_type,
        modified_time: entry.modified_time,
    };

    let dest = extract_dir.join(format!("{id}.part"));
    match fetcher.fetch(&item, &dest, cancel).await {
        Ok(outcome) => {
            let final_dest = extract_dir.join(&outcome.archive_path);
            if std::fs::rename(&dest, &final_dest).is_ok() {
                AtomicCounters::inc(&counters.successful_downloads, 1);
                AtomicCounters::inc(&counters.total_bytes_downloaded, outcome.bytes_written);
            } else {
                AtomicCounters::inc(&counters.failed_downloads, 1);
            }
        }
        Err(_) => {
            AtomicCounters::inc(&counters.failed_downloads, 1);
        }
    }
}
