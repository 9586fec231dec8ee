//! Error taxonomy shared by every component of the archive.

/// Errors surfaced by the archive. There is no `Eof` variant: walking the entry table is bounded
/// by the footer's cached `entry_count`, so running off the end of the file never escapes as an
/// error on its own.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("archive already exists")]
    AlreadyExists,

    #[error("archive file or lock unavailable")]
    Unavailable,

    #[error("archive header is incompatible with this library")]
    IncompatibleLibrary,

    #[error("archive is corrupt: {0}")]
    Corrupt(&'static str),

    #[error("invalid argument: {0}")]
    InvalidValue(&'static str),

    #[error("invalid pointer or empty buffer where data was expected")]
    InvalidPointer,

    #[error("page cache miss; retry with a bypass read")]
    NotReady,

    #[error("operation unsupported by this archive's open mode")]
    Unsupported,

    #[error("out of memory allocating the append buffer")]
    OutOfMemory,

    #[error("archive initialization failed")]
    InitializationFailed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = core::result::Result<T, ArchiveError>;
