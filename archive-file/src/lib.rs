//! Append-only, single-writer archive file format with a bounded LRU page cache for random reads.
//!
//! Producers append opaque binary entries (typically shader/pipeline artifacts) via [`Archive`],
//! consumers enumerate and read them back — possibly across process restarts, and possibly while
//! another process holds the file open for reading. See `SPEC_FULL.md` for the full format.
//!
//! Allocation callbacks and platform-key identity are treated as external collaborators: the core
//! only consumes [`MemoryCallbacks`] (an allocator-budget interface) and a borrowed platform-key
//! byte string, it does not implement a custom allocator. Path building, directory creation beyond
//! the immediate parent, and any CLI/config surface are likewise out of scope.

mod archive;
mod cache;
mod crc;
mod entries;
pub mod error;
pub mod layout;
mod io;
mod open;

pub use archive::Archive;
pub use error::{ArchiveError, Result};
pub use layout::EntryHeader;
pub use open::{create_archive_file, delete_archive_file, open_archive_file, MemoryCallbacks, OpenInfo};
