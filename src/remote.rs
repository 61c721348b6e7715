//! The Remote-Drive Port (spec §4.3/§6).
//!
//! This is the only boundary the engines cross to reach the actual remote
//! drive. Authentication, listing transport, and wire formats belong to a
//! concrete implementer of [`RemotePort`]; this crate never depends on one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::{Read, Write};

/// Classification the core is allowed to depend on (spec §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    Transient(String),
    Permanent(String),
    DiskFull(String),
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteError::Transient(m) => write!(f, "transient remote error: {m}"),
            RemoteError::Permanent(m) => write!(f, "permanent remote error: {m}"),
            RemoteError::DiskFull(m) => write!(f, "disk full: {m}"),
        }
    }
}

impl std::error::Error for RemoteError {}

impl From<RemoteError> for crate::error::EngineError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::Transient(m) => crate::error::EngineError::TransientRemote(m),
            RemoteError::Permanent(m) => crate::error::EngineError::PermanentRemote(m),
            RemoteError::DiskFull(m) => crate::error::EngineError::DiskFull(m),
        }
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// One listed item in the remote subtree (spec §3). Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteItem {
    pub id: String,
    pub name: String,
    /// canonical slash-delimited path from the root of the subtree,
    /// including the root name.
    pub path: String,
    pub is_folder: bool,
    pub size_bytes: u64,
    pub mime_type: String,
    pub modified_time: Option<DateTime<Utc>>,
}

/// The capability set a remote drive client must provide (spec §4.3/§6).
///
/// Implementations are expected to be cheaply cloneable handles (an `Arc`
/// around an HTTP client, typically) since the executor fans work out
/// across many concurrent tasks each holding a clone.
#[async_trait]
pub trait RemotePort: Send + Sync {
    /// Page-list the direct children of `folder_id`.
    async fn list_children(&self, folder_id: &str) -> RemoteResult<Vec<RemoteItem>>;

    /// Fetch metadata for a single item, failing with `Permanent` on
    /// not-found / permission-denied per spec §4.6 Phase 2.
    async fn get_meta(&self, item_id: &str) -> RemoteResult<RemoteItem>;

    /// Stream the native bytes of `file_id` into `sink`.
    async fn download_native(&self, file_id: &str, sink: &mut dyn Write) -> RemoteResult<()>;

    /// Stream an exported representation of `file_id` into `sink`.
    async fn export(
        &self,
        file_id: &str,
        export_mime: &str,
        sink: &mut dyn Write,
    ) -> RemoteResult<()>;

    /// Look up a direct child folder of `parent_id` named `name`.
    async fn find_child_folder(
        &self,
        parent_id: &str,
        name: &str,
    ) -> RemoteResult<Option<String>>;

    /// Create a new child folder of `parent_id` named `name`, returning its id.
    async fn create_folder(&self, parent_id: &str, name: &str) -> RemoteResult<String>;

    /// Upload `source` as a new file named `name` under `parent_id`.
    async fn upload(
        &self,
        parent_id: &str,
        name: &str,
        mime: &str,
        source: &mut dyn Read,
    ) -> RemoteResult<RemoteItem>;
}

/// One entry of the fixed remote-native -> export MIME/extension table
/// (spec §4.4). The table must be preserved exactly as specified.
pub struct MimeTranslation {
    pub remote_mime: &'static str,
    pub export_mime: &'static str,
    pub extension: &'static str,
}

const MIME_TABLE: &[MimeTranslation] = &[
    MimeTranslation {
        remote_mime: "application/vnd.google-apps.document",
        export_mime: "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        extension: ".docx",
    },
    MimeTranslation {
        remote_mime: "application/vnd.google-apps.spreadsheet",
        export_mime: "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        extension: ".xlsx",
    },
    MimeTranslation {
        remote_mime: "application/vnd.google-apps.presentation",
        export_mime: "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        extension: ".pptx",
    },
    MimeTranslation {
        remote_mime: "application/vnd.google-apps.drawing",
        export_mime: "image/png",
        extension: ".png",
    },
];

const GOOGLE_APPS_PREFIX: &str = "application/vnd.google-apps";

/// Classification of a listed file's MIME type (spec §4.4 / §4.6 Phase 3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MimeClass {
    /// Exportable native document; carries the chosen export MIME+extension.
    Exportable {
        export_mime: &'static str,
        extension: &'static str,
    },
    /// `application/vnd.google-apps*` with no translation entry.
    UnsupportedNative,
    /// Anything else — downloaded as-is, original extension kept.
    Ordinary,
}

pub fn classify_mime(remote_mime: &str) -> MimeClass {
    if let Some(entry) = MIME_TABLE.iter().find(|e| e.remote_mime == remote_mime) {
        return MimeClass::Exportable {
            export_mime: entry.export_mime,
            extension: entry.extension,
        };
    }
    if remote_mime.starts_with(GOOGLE_APPS_PREFIX) {
        return MimeClass::UnsupportedNative;
    }
    MimeClass::Ordinary
}

/// Derive a MIME type from a file extension for upload (spec §4.7 Phase 2),
/// falling back to `application/octet-stream` for unknown extensions.
pub fn mime_from_extension(name: &str) -> String {
    mime_guess::from_path(name)
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_known_google_docs() {
        assert_eq!(
            classify_mime("application/vnd.google-apps.document"),
            MimeClass::Exportable {
                export_mime: "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
                extension: ".docx",
            }
        );
        assert_eq!(
            classify_mime("application/vnd.google-apps.drawing"),
            MimeClass::Exportable {
                export_mime: "image/png",
                extension: ".png",
            }
        );
    }

    #[test]
    fn test_classify_unsupported_google_apps() {
        assert_eq!(
            classify_mime("application/vnd.google-apps.form"),
            MimeClass::UnsupportedNative
        );
    }

    #[test]
    fn test_classify_ordinary() {
        assert_eq!(classify_mime("text/plain"), MimeClass::Ordinary);
        assert_eq!(classify_mime("image/jpeg"), MimeClass::Ordinary);
    }

    #[test]
    fn test_mime_from_extension_unknown() {
        assert_eq!(mime_from_extension("weird.xyzabc"), "application/octet-stream");
    }

    #[test]
    fn test_mime_from_extension_known() {
        assert_eq!(mime_from_extension("sheet.xlsx"), "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet");
    }
}
