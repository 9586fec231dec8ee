//! On-disk binary layout: fixed-width, little-endian, unaligned records.
//!
//! The file is a flat concatenation of `Header || Entry0Header || Entry0Data || Entry1Header ||
//! Entry1Data || … || Footer`. The footer always sits at `fileSize - size_of::<Footer>()` and is
//! rewritten (not appended) on every `Archive::write`.

use zerocopy::byteorder::little_endian::{U32, U64};
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Width of [`Header::platform_key`] in bytes. Caller-supplied keys longer than this are silently
/// truncated, both when embedding and when comparing; see `OpenInfo::platform_key`.
pub const PLATFORM_KEY_LEN: usize = 12;

/// Width of [`EntryHeader::metadata`] in bytes. Opaque to the archive itself.
pub const METADATA_LEN: usize = 16;

pub const ARCHIVE_MARKER: [u8; 8] = *b"ARCHIVE1";
pub const ENTRY_MARKER: [u8; 8] = *b"ENTRYHDR";
pub const FOOTER_MARKER: [u8; 8] = *b"FOOTER01";

pub const CURRENT_MAJOR: u32 = 1;
pub const CURRENT_MINOR: u32 = 0;

/// File-time encoding of 2018-01-01T00:00:00Z. Timestamps older than this are treated as
/// corruption, on the assumption that no genuine archive predates this format.
pub const EARLIEST_VALID_TIME: u64 = 131_592_384_000_000_000;

/// Offset between the Unix epoch and the Windows/NT file-time epoch, in 100ns ticks.
const FILE_TIME_EPOCH_OFFSET: u64 = 116_444_736_000_000_000;

/// Convert a Unix timestamp (seconds) into the 100ns-tick, 1601-01-01 UTC epoch used by the
/// on-disk footer.
pub fn unix_seconds_to_file_time(unix_seconds: u64) -> u64 {
    unix_seconds
        .saturating_mul(10_000_000)
        .saturating_add(FILE_TIME_EPOCH_OFFSET)
}

/// The current file time, per the platform clock.
pub fn now_in_file_time() -> u64 {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    unix_seconds_to_file_time(now.as_secs())
}

#[derive(Debug, Clone, Copy, FromZeros, FromBytes, IntoBytes, KnownLayout, Unaligned, Immutable)]
#[repr(C)]
pub struct Header {
    pub archive_marker: [u8; 8],
    pub major_version: U32,
    pub minor_version: U32,
    pub first_block: U32,
    pub archive_type: U32,
    pub platform_key: [u8; PLATFORM_KEY_LEN],
}

impl Header {
    pub const SIZE: usize = core::mem::size_of::<Header>();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromZeros, FromBytes, IntoBytes, KnownLayout, Unaligned, Immutable)]
#[repr(C)]
pub struct EntryHeader {
    pub entry_marker: [u8; 8],
    pub ordinal_id: U32,
    pub metadata: [u8; METADATA_LEN],
    pub next_block: U32,
    pub data_position: U32,
    pub data_size: U32,
    pub data_crc64: U64,
}

impl EntryHeader {
    pub const SIZE: usize = core::mem::size_of::<EntryHeader>();
}

#[derive(Debug, Clone, Copy, FromZeros, FromBytes, IntoBytes, KnownLayout, Unaligned, Immutable)]
#[repr(C)]
pub struct Footer {
    pub footer_marker: [u8; 8],
    pub entry_count: U32,
    pub last_write_timestamp: U64,
    pub archive_marker: [u8; 8],
}

impl Footer {
    pub const SIZE: usize = core::mem::size_of::<Footer>();
}

/// Left-align and zero-pad `key` into a fixed-width field, truncating if it does not fit.
///
/// Keys longer than the field are silently truncated on both write and compare.
pub fn embed_platform_key(key: &[u8]) -> [u8; PLATFORM_KEY_LEN] {
    let mut buf = [0u8; PLATFORM_KEY_LEN];
    let n = key.len().min(PLATFORM_KEY_LEN);
    buf[..n].copy_from_slice(&key[..n]);
    buf
}
