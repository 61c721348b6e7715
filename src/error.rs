use thiserror::Error;

/// The full error taxonomy the engines can produce.
///
/// Per the design, engines never depend on concrete remote-transport error
/// types beyond the `Transient` / `Permanent` / `DiskFull` classification
/// surfaced by [`crate::remote::RemoteError`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("remote backup root unavailable: {0}")]
    RootUnavailable(String),

    #[error("manifest missing")]
    ManifestMissing,

    #[error("manifest corrupt: {0}")]
    ManifestCorrupt(String),

    #[error("archive member missing: {0}")]
    MemberMissing(String),

    #[error("transient remote error: {0}")]
    TransientRemote(String),

    #[error("permanent remote error: {0}")]
    PermanentRemote(String),

    #[error("disk full: {0}")]
    DiskFull(String),

    #[error("local I/O error: {0}")]
    LocalIo(String),

    #[error("invalid archive path: {0}")]
    InvalidArchivePath(String),
}

impl From<std::io::Error> for EngineError {
    // `std::io::ErrorKind` has no portable disk-full variant; callers that
    // can distinguish disk-full (e.g. from a remote upload response) build
    // `EngineError::DiskFull` directly instead of going through this impl.
    fn from(e: std::io::Error) -> Self {
        EngineError::LocalIo(e.to_string())
    }
}

impl From<zip::result::ZipError> for EngineError {
    fn from(e: zip::result::ZipError) -> Self {
        EngineError::LocalIo(format!("zip error: {e}"))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::ManifestCorrupt(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
