//! Filesystem-level lifecycle: composing the path, creating, opening, and deleting archive files.
//!
//! Path building beyond joining `file_path`/`file_name` and creating the immediate parent
//! directory is out of scope here — callers are expected to hand in a fully-formed directory.

use std::fs::OpenOptions;
use std::path::PathBuf;

use crate::archive::Archive;
use crate::error::{ArchiveError, Result};
use crate::layout::{embed_platform_key, now_in_file_time, Footer, Header, ARCHIVE_MARKER, CURRENT_MAJOR, CURRENT_MINOR, FOOTER_MARKER};
use crate::io::FileIo;

/// Borrowed allocator abstraction for the page-cache arena. The archive core only needs to know
/// how much memory it is allowed to use; it does not implement a custom allocator itself — actual
/// allocation is out of scope (see the crate's top-level documentation).
pub trait MemoryCallbacks {
    /// Upper bound, in bytes, the page cache may occupy.
    fn budget(&self) -> usize;
}

/// Configuration for opening, creating, or deleting an archive file.
#[derive(Default)]
pub struct OpenInfo<'lt> {
    pub file_path: PathBuf,
    pub file_name: String,
    pub allow_write_access: bool,
    pub allow_create_file: bool,
    pub use_buffered_read_memory: bool,
    pub max_read_buffer_mem: usize,
    pub use_strict_version_control: bool,
    /// `0` means "any archive type is acceptable".
    pub archive_type: u32,
    /// Longer than [`crate::layout::PLATFORM_KEY_LEN`] is silently truncated; see
    /// `layout::embed_platform_key`.
    pub platform_key: Option<&'lt [u8]>,
    pub memory_callbacks: Option<&'lt dyn MemoryCallbacks>,
}

impl<'lt> OpenInfo<'lt> {
    pub fn path(&self) -> PathBuf {
        self.file_path.join(&self.file_name)
    }

    fn read_buffer_budget(&self) -> usize {
        self.memory_callbacks
            .map(MemoryCallbacks::budget)
            .unwrap_or(self.max_read_buffer_mem)
    }
}

/// Create a blank archive file. Does not open it; call [`open_archive_file`] afterwards.
pub fn create_archive_file(info: &OpenInfo) -> Result<()> {
    let path = info.path();
    if path.exists() {
        return Err(ArchiveError::AlreadyExists);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .read(true)
        .write(true)
        .open(&path)?;

    let io = match FileIo::lock(file, true) {
        Ok(io) => io,
        Err(err) => {
            let _ = std::fs::remove_file(&path);
            return Err(err);
        }
    };

    let header = Header {
        archive_marker: ARCHIVE_MARKER,
        major_version: CURRENT_MAJOR.into(),
        minor_version: CURRENT_MINOR.into(),
        first_block: (Header::SIZE as u32).into(),
        archive_type: info.archive_type.into(),
        platform_key: info.platform_key.map(embed_platform_key).unwrap_or_default(),
    };
    let footer = Footer {
        footer_marker: FOOTER_MARKER,
        entry_count: 0u32.into(),
        last_write_timestamp: now_in_file_time().into(),
        archive_marker: ARCHIVE_MARKER,
    };

    let mut buf = Vec::with_capacity(Header::SIZE + Footer::SIZE);
    buf.extend_from_slice(zerocopy::IntoBytes::as_bytes(&header));
    buf.extend_from_slice(zerocopy::IntoBytes::as_bytes(&footer));

    if let Err(err) = io.write_at(0, &buf) {
        drop(io);
        let _ = std::fs::remove_file(&path);
        return Err(err);
    }

    #[cfg(feature = "tracing")]
    tracing::debug!(path = %path.display(), "created archive");

    Ok(())
}

/// Open an existing archive file, optionally creating it first if `allow_create_file` is set.
pub fn open_archive_file(info: &OpenInfo) -> Result<Archive> {
    let path = info.path();

    if !path.exists() {
        if info.allow_create_file {
            create_archive_file(info)?;
        } else {
            return Err(ArchiveError::Unavailable);
        }
    }

    let file = OpenOptions::new()
        .read(true)
        .write(info.allow_write_access)
        .open(&path)?;

    let io = FileIo::lock(file, info.allow_write_access)?;

    let archive = Archive::init(
        io,
        info.archive_type,
        info.platform_key,
        info.use_strict_version_control,
        info.use_buffered_read_memory.then(|| info.read_buffer_budget()),
    )?;

    #[cfg(feature = "tracing")]
    tracing::debug!(path = %path.display(), "opened archive");

    Ok(archive)
}

/// Remove the archive file. Does not check that it is well-formed.
pub fn delete_archive_file(info: &OpenInfo) -> Result<()> {
    std::fs::remove_file(info.path())?;
    Ok(())
}
