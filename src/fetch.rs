//! Shared remote-fetch capability (spec §9 Design Note on `RepairManager`
//! invoking `BackupManager.DownloadFileAsync`).
//!
//! Both the Backup and Repair engines need "download or export one item,
//! with retry" — instead of Repair calling back into Backup (the back-edge
//! the Design Note flags), both depend on this standalone `RemoteFetcher`.

use crate::error::EngineError;
use crate::executor::CancelToken;
use crate::remote::{MimeClass, RemoteItem, RemotePort};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const MAX_ATTEMPTS: u32 = 3;
pub const RETRY_DELAY: Duration = Duration::from_secs(7);

pub struct RemoteFetcher {
    port: Arc<dyn RemotePort>,
}

/// What a single file fetch resolved to: its destination name inside the
/// archive and the number of bytes written.
pub struct FetchOutcome {
    pub archive_path: String,
    pub bytes_written: u64,
}

impl RemoteFetcher {
    pub fn new(port: Arc<dyn RemotePort>) -> Self {
        RemoteFetcher { port }
    }

    /// Fetch `item` into `dest_path`, choosing export vs native download by
    /// `item.mime_type` (spec §4.6 Phase 3/4). Retries up to
    /// [`MAX_ATTEMPTS`] total attempts with a fixed [`RETRY_DELAY`] between
    /// them, only on transient remote conditions or local I/O; deletes any
    /// partial output between attempts; never retries `DiskFull` or
    /// cancellation.
    pub async fn fetch(
        &self,
        item: &RemoteItem,
        dest_path: &Path,
        cancel: &CancelToken,
    ) -> Result<FetchOutcome, EngineError> {
        let class = crate::remote::classify_mime(&item.mime_type);
        let (export_mime, extension) = match class {
            MimeClass::Exportable {
                export_mime,
                extension,
            } => (Some(export_mime), extension),
            _ => (None, extension_of(&item.name)),
        };
        let archive_path = format!("{}{}", item.id, extension);

        let mut last_err: Option<EngineError> = None;
        for attempt in 1..=MAX_ATTEMPTS {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let result = self.attempt_once(item, export_mime, dest_path).await;
            match result {
                Ok(bytes_written) => {
                    return Ok(FetchOutcome {
                        archive_path,
                        bytes_written,
                    });
                }
                Err(e) => {
                    let _ = std::fs::remove_file(dest_path);
                    let retryable = is_retryable(&e);
                    last_err = Some(e);
                    if !retryable || attempt == MAX_ATTEMPTS {
                        break;
                    }
                    if cancel.is_cancelled() {
                        return Err(EngineError::Cancelled);
                    }
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
        Err(last_err.unwrap_or(EngineError::LocalIo("fetch failed with no error".into())))
    }

    async fn attempt_once(
        &self,
        item: &RemoteItem,
        export_mime: Option<&'static str>,
        dest_path: &Path,
    ) -> Result<u64, EngineError> {
        let mut file = File::create(dest_path).map_err(EngineError::from)?;
        let result = if let Some(mime) = export_mime {
            self.port.export(&item.id, mime, &mut file).await
        } else {
            self.port.download_native(&item.id, &mut file).await
        };
        result.map_err(EngineError::from)?;
        let written = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(written)
    }
}

fn is_retryable(err: &EngineError) -> bool {
    matches!(err, EngineError::TransientRemote(_) | EngineError::LocalIo(_))
}

fn extension_of(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => format!(".{ext}"),
        _ => String::new(),
    }
}

/// Upload `local_path` to `parent_id`/`name`, retrying up to [`MAX_ATTEMPTS`]
/// total attempts with a fixed [`RETRY_DELAY`] between them — the same
/// policy [`RemoteFetcher::fetch`] applies to downloads/exports, per spec
/// §7: "`Transient*` and `LocalIO` are retried inside the download/upload
/// routines ... then surfaced as a per-file failure". Never retries
/// `DiskFull` or cancellation.
pub async fn upload_with_retry(
    port: &Arc<dyn RemotePort>,
    parent_id: &str,
    name: &str,
    mime: &str,
    local_path: &Path,
    cancel: &CancelToken,
) -> Result<RemoteItem, EngineError> {
    let mut last_err: Option<EngineError> = None;
    for attempt in 1..=MAX_ATTEMPTS {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let mut file = File::open(local_path).map_err(EngineError::from)?;
        let result = port.upload(parent_id, name, mime, &mut file).await;
        match result {
            Ok(item) => return Ok(item),
            Err(e) => {
                let engine_err: EngineError = e.into();
                let retryable = is_retryable(&engine_err);
                last_err = Some(engine_err);
                if !retryable || attempt == MAX_ATTEMPTS {
                    break;
                }
                if cancel.is_cancelled() {
                    return Err(EngineError::Cancelled);
                }
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
    }
    Err(last_err.unwrap_or(EngineError::LocalIo("upload failed with no error".into())))
}
