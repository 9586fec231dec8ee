//! The archive object: the top-level state machine tying the direct I/O adapter, the page cache,
//! and the entry table together. Open/create/validate, footer refresh, append, integrity-checked
//! read, and enumeration all live here.

use zerocopy::{FromBytes, IntoBytes};

use crate::cache::PageCache;
use crate::crc::crc64;
use crate::entries::{read_entry_header, EntryTable};
use crate::error::{ArchiveError, Result};
use crate::io::FileIo;
use crate::layout::{
    embed_platform_key, now_in_file_time, EntryHeader, Footer, Header, ARCHIVE_MARKER,
    CURRENT_MAJOR, CURRENT_MINOR, EARLIEST_VALID_TIME, ENTRY_MARKER, FOOTER_MARKER,
};

/// A single open, exclusively-locked archive file.
///
/// Single-threaded from its own perspective: every method takes `&mut self`, so the borrow
/// checker — rather than an internal mutex — is what prevents concurrent use within one process.
/// Across processes, the `flock` held by the underlying [`FileIo`] does the same job.
pub struct Archive {
    io: FileIo,
    header: Header,
    footer: Footer,
    cur_footer_offset: u64,
    file_size: u64,
    entries: EntryTable,
    cache: Option<PageCache>,
}

impl Archive {
    pub(crate) fn init(
        io: FileIo,
        archive_type: u32,
        platform_key: Option<&[u8]>,
        strict_version: bool,
        buffered_budget: Option<usize>,
    ) -> Result<Self> {
        let header = read_header(&io)?;
        validate_header(&header, archive_type, platform_key, strict_version)?;

        let file_size = io.file_size()?;
        let footer_offset = file_size
            .checked_sub(Footer::SIZE as u64)
            .ok_or(ArchiveError::Corrupt("file too small to contain a footer"))?;
        let footer = read_footer(&io, footer_offset)?;
        validate_footer(&footer)?;

        let mut entries = EntryTable::new();
        walk_new_entries(&io, &header, &mut entries, &footer)?;

        let cache = buffered_budget.map(PageCache::new);

        Ok(Archive {
            io,
            header,
            footer,
            cur_footer_offset: footer_offset,
            file_size,
            entries,
            cache,
        })
    }

    /// Number of entries as of the last refresh.
    pub fn entry_count(&self) -> usize {
        self.footer.entry_count.get() as usize
    }

    /// Pull `min(max_read, fileSize - start)` bytes into the page cache without returning them.
    pub fn preload(&mut self, start: usize, max_read: usize) -> Result<()> {
        let cache = self.cache.as_mut().ok_or(ArchiveError::Unsupported)?;
        cache.preload(&self.io, start as u64, max_read)
    }

    /// Copy `[start, min(start + max, entry_count))` entry headers into `out`, returning how many
    /// were copied.
    pub fn fill_entry_header_table(
        &mut self,
        out: &mut [EntryHeader],
        start: usize,
        max: usize,
    ) -> Result<usize> {
        let _ = self.refresh_file(false);
        Ok(self.entries.fill(out, start, max))
    }

    /// Return a copy of the entry header at `index`, refreshing the entry table first.
    pub fn entry_by_index(&mut self, index: usize) -> Result<EntryHeader> {
        let refreshed = self.refresh_file(false);
        match self.entries.get(index) {
            Some(header) => Ok(header),
            None => match refreshed {
                Err(ArchiveError::NotReady) => Err(ArchiveError::NotReady),
                _ => Err(ArchiveError::InvalidValue("entry index out of range")),
            },
        }
    }

    /// Re-synchronize the cached footer and entry table with the on-disk state.
    ///
    /// Tolerated by callers of [`Self::read`]/[`Self::entry_by_index`]: its failure there is not
    /// fatal to the outer operation, it just means stale state is used for this call.
    pub fn refresh_file(&mut self, force: bool) -> Result<()> {
        let file_size = self.io.file_size()?;
        if file_size == self.file_size && !force {
            return Ok(());
        }

        let footer_offset = file_size
            .checked_sub(Footer::SIZE as u64)
            .ok_or(ArchiveError::Corrupt("file too small to contain a footer"))?;

        // Fast path: our own last write already updated the cached footer; nothing on disk has
        // moved behind our back.
        if self.io.write_access() && footer_offset == self.cur_footer_offset && !force {
            self.file_size = file_size;
            return Ok(());
        }

        // An async page loader could return `NotReady` here and need a bypass-retry; this
        // synchronous implementation always reads the footer directly, never through the page
        // cache, so that never actually triggers. See `DESIGN.md`.
        let footer = read_footer(&self.io, footer_offset)?;
        validate_footer(&footer)?;

        self.footer = footer;
        self.cur_footer_offset = footer_offset;
        self.file_size = file_size;

        walk_new_entries(&self.io, &self.header, &mut self.entries, &self.footer)?;

        Ok(())
    }

    /// Read the payload described by `header` into `out`, verifying its CRC64.
    pub fn read(&mut self, header: &EntryHeader, out: &mut [u8]) -> Result<()> {
        let _ = self.refresh_file(false);

        let data_size = header.data_size.get() as usize;
        let data_position = header.data_position.get() as u64;

        if header.ordinal_id.get() as usize >= self.entry_count() {
            return Err(ArchiveError::InvalidValue("ordinal beyond entry count"));
        }
        if data_position + data_size as u64 > self.cur_footer_offset {
            return Err(ArchiveError::InvalidValue("entry data overruns footer"));
        }
        if out.len() < data_size {
            return Err(ArchiveError::InvalidPointer);
        }

        let bytes = self.cached_read(data_position, data_size, false)?;
        let crc = crc64(&bytes);
        if crc != header.data_crc64.get() {
            #[cfg(feature = "tracing")]
            tracing::error!(ordinal = header.ordinal_id.get(), "payload CRC mismatch");
            return Err(ArchiveError::Corrupt("payload CRC mismatch"));
        }

        out[..data_size].copy_from_slice(&bytes);
        Ok(())
    }

    /// Append a new entry. `header.metadata` is preserved from the caller; every other field is
    /// computed here and written back into `*header` on success.
    pub fn write(&mut self, header: &mut EntryHeader, data: &[u8]) -> Result<()> {
        if !self.io.write_access() {
            return Err(ArchiveError::Unsupported);
        }

        let ordinal_id = self.footer.entry_count.get();
        let data_position = self.cur_footer_offset + EntryHeader::SIZE as u64;
        let next_block = data_position + data.len() as u64;

        let new_header = EntryHeader {
            entry_marker: ENTRY_MARKER,
            ordinal_id: ordinal_id.into(),
            metadata: header.metadata,
            next_block: (next_block as u32).into(),
            data_position: (data_position as u32).into(),
            data_size: (data.len() as u32).into(),
            data_crc64: crc64(data).into(),
        };

        let updated_footer = Footer {
            entry_count: (ordinal_id + 1).into(),
            last_write_timestamp: now_in_file_time().into(),
            ..self.footer
        };

        let mut buf = Vec::with_capacity(EntryHeader::SIZE + data.len() + Footer::SIZE);
        buf.extend_from_slice(new_header.as_bytes());
        buf.extend_from_slice(data);
        buf.extend_from_slice(updated_footer.as_bytes());

        self.io.write_at(self.cur_footer_offset, &buf)?;

        if let Some(cache) = self.cache.as_mut() {
            let _ = cache.write_cached(&self.io, self.cur_footer_offset, &buf);
        }

        self.cur_footer_offset = next_block;
        self.file_size = next_block + Footer::SIZE as u64;
        self.footer = updated_footer;
        self.entries.push(new_header);

        #[cfg(feature = "tracing")]
        tracing::debug!(ordinal = ordinal_id, size = data.len(), "appended entry");

        *header = new_header;
        Ok(())
    }

    fn cached_read(&mut self, offset: u64, len: usize, force_reload: bool) -> Result<Vec<u8>> {
        match self.cache.as_mut() {
            Some(cache) => {
                let mut buf = vec![0u8; len];
                match cache.read_cached(&self.io, offset, Some(&mut buf), len, force_reload) {
                    Ok(()) => Ok(buf),
                    Err(ArchiveError::NotReady) if force_reload => self.io.read_at(offset, len),
                    Err(err) => Err(err),
                }
            }
            None => self.io.read_at(offset, len),
        }
    }
}

fn read_header(io: &FileIo) -> Result<Header> {
    let bytes = io.read_at(0, Header::SIZE)?;
    if bytes.len() != Header::SIZE {
        return Err(ArchiveError::Corrupt("truncated header"));
    }
    Header::read_from_bytes(&bytes[..]).map_err(|_| ArchiveError::Corrupt("malformed header"))
}

fn read_footer(io: &FileIo, offset: u64) -> Result<Footer> {
    let bytes = io.read_at(offset, Footer::SIZE)?;
    if bytes.len() != Footer::SIZE {
        return Err(ArchiveError::Corrupt("truncated footer"));
    }
    Footer::read_from_bytes(&bytes[..]).map_err(|_| ArchiveError::Corrupt("malformed footer"))
}

fn validate_header(
    header: &Header,
    archive_type: u32,
    platform_key: Option<&[u8]>,
    strict_version: bool,
) -> Result<()> {
    if header.archive_marker != ARCHIVE_MARKER {
        return Err(ArchiveError::IncompatibleLibrary);
    }
    if header.major_version.get() != CURRENT_MAJOR {
        return Err(ArchiveError::IncompatibleLibrary);
    }
    if strict_version && header.minor_version.get() != CURRENT_MINOR {
        return Err(ArchiveError::IncompatibleLibrary);
    }
    if let Some(key) = platform_key {
        if embed_platform_key(key) != header.platform_key {
            return Err(ArchiveError::IncompatibleLibrary);
        }
    }
    if archive_type != 0 && archive_type != header.archive_type.get() {
        return Err(ArchiveError::IncompatibleLibrary);
    }
    Ok(())
}

fn validate_footer(footer: &Footer) -> Result<()> {
    if footer.footer_marker != FOOTER_MARKER {
        return Err(ArchiveError::Corrupt("footer marker mismatch"));
    }
    if footer.archive_marker != ARCHIVE_MARKER {
        return Err(ArchiveError::Corrupt("footer archive marker mismatch"));
    }
    if footer.entry_count.get() > i32::MAX as u32 {
        return Err(ArchiveError::Corrupt("entry count exceeds i32::MAX"));
    }
    let timestamp = footer.last_write_timestamp.get();
    if timestamp < EARLIEST_VALID_TIME || timestamp > now_in_file_time() {
        return Err(ArchiveError::Corrupt("footer timestamp out of range"));
    }
    Ok(())
}

fn walk_new_entries(
    io: &FileIo,
    header: &Header,
    entries: &mut EntryTable,
    footer: &Footer,
) -> Result<()> {
    let target = footer.entry_count.get() as usize;
    while entries.len() < target {
        let offset = match entries.last() {
            Some(last) => last.next_block.get() as u64,
            None => header.first_block.get() as u64,
        };
        let entry = read_entry_header(io, offset)?;
        if entry.ordinal_id.get() as usize != entries.len() {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                expected = entries.len(),
                found = entry.ordinal_id.get(),
                "entry ordinal mismatch while rebuilding entry table"
            );
        }
        entries.push(entry);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Write;
    use zerocopy::FromZeros;

    fn blank_header() -> Header {
        Header::new_zeroed()
    }

    fn valid_header() -> Header {
        Header {
            archive_marker: ARCHIVE_MARKER,
            major_version: CURRENT_MAJOR.into(),
            minor_version: CURRENT_MINOR.into(),
            first_block: (Header::SIZE as u32).into(),
            archive_type: 1u32.into(),
            platform_key: embed_platform_key(b"gpu0"),
        }
    }

    fn valid_footer() -> Footer {
        Footer {
            footer_marker: FOOTER_MARKER,
            entry_count: 0u32.into(),
            last_write_timestamp: now_in_file_time().into(),
            archive_marker: ARCHIVE_MARKER,
        }
    }

    #[test]
    fn validate_header_rejects_wrong_marker() {
        let header = blank_header();
        let err = validate_header(&header, 0, None, false).unwrap_err();
        assert!(matches!(err, ArchiveError::IncompatibleLibrary));
    }

    #[test]
    fn validate_header_rejects_major_version_mismatch() {
        let mut header = valid_header();
        header.major_version = (CURRENT_MAJOR + 1).into();
        let err = validate_header(&header, 0, None, false).unwrap_err();
        assert!(matches!(err, ArchiveError::IncompatibleLibrary));
    }

    #[test]
    fn validate_header_ignores_minor_version_unless_strict() {
        let mut header = valid_header();
        header.minor_version = (CURRENT_MINOR + 1).into();
        assert!(validate_header(&header, 0, None, false).is_ok());
        let err = validate_header(&header, 0, None, true).unwrap_err();
        assert!(matches!(err, ArchiveError::IncompatibleLibrary));
    }

    #[test]
    fn validate_header_checks_platform_key_and_archive_type() {
        let header = valid_header();
        assert!(validate_header(&header, 1, Some(b"gpu0"), false).is_ok());
        assert!(matches!(
            validate_header(&header, 1, Some(b"gpu1"), false).unwrap_err(),
            ArchiveError::IncompatibleLibrary
        ));
        assert!(matches!(
            validate_header(&header, 2, None, false).unwrap_err(),
            ArchiveError::IncompatibleLibrary
        ));
        // archive_type == 0 means "accept anything".
        assert!(validate_header(&header, 0, None, false).is_ok());
    }

    #[test]
    fn validate_footer_rejects_bad_markers_and_overflowing_count() {
        let mut footer = valid_footer();
        footer.footer_marker = *b"BADMARK1";
        assert!(matches!(
            validate_footer(&footer).unwrap_err(),
            ArchiveError::Corrupt(_)
        ));

        let mut footer = valid_footer();
        footer.archive_marker = *b"BADMARK1";
        assert!(matches!(
            validate_footer(&footer).unwrap_err(),
            ArchiveError::Corrupt(_)
        ));

        let mut footer = valid_footer();
        footer.entry_count = (i32::MAX as u32 + 1).into();
        assert!(matches!(
            validate_footer(&footer).unwrap_err(),
            ArchiveError::Corrupt(_)
        ));
    }

    #[test]
    fn validate_footer_rejects_timestamps_outside_the_valid_range() {
        let mut too_old = valid_footer();
        too_old.last_write_timestamp = (EARLIEST_VALID_TIME - 1).into();
        assert!(matches!(
            validate_footer(&too_old).unwrap_err(),
            ArchiveError::Corrupt(_)
        ));

        let mut future = valid_footer();
        future.last_write_timestamp = (now_in_file_time() + 10_000_000_000).into();
        assert!(matches!(
            validate_footer(&future).unwrap_err(),
            ArchiveError::Corrupt(_)
        ));

        assert!(validate_footer(&valid_footer()).is_ok());
    }

    fn write_fixture_file(path: &std::path::Path) {
        let mut f = OpenOptions::new().create(true).write(true).open(path).unwrap();
        let header = valid_header();
        let footer = valid_footer();
        f.write_all(header.as_bytes()).unwrap();
        f.write_all(footer.as_bytes()).unwrap();
    }

    fn fixture() -> (tempfile::TempDir, FileIo) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.arc");
        write_fixture_file(&path);
        let file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
        let io = FileIo::lock(file, true).unwrap();
        (dir, io)
    }

    #[test]
    fn init_reads_a_freshly_written_header_and_footer() {
        let (_dir, io) = fixture();
        let archive = Archive::init(io, 0, None, false, None).unwrap();
        assert_eq!(archive.entry_count(), 0);
    }

    #[test]
    fn write_then_read_round_trips_and_validates_crc() {
        let (_dir, io) = fixture();
        let mut archive = Archive::init(io, 0, None, false, None).unwrap();

        let mut header = EntryHeader::new_zeroed();
        archive.write(&mut header, b"abcd").unwrap();
        assert_eq!(header.ordinal_id.get(), 0);
        assert_eq!(archive.entry_count(), 1);

        let mut out = [0u8; 4];
        archive.read(&header, &mut out).unwrap();
        assert_eq!(&out, b"abcd");
    }

    #[test]
    fn write_without_write_access_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.arc");
        write_fixture_file(&path);

        let file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
        let io = FileIo::lock(file, false).unwrap();
        let mut archive = Archive::init(io, 0, None, false, None).unwrap();

        let mut header = EntryHeader::new_zeroed();
        let err = archive.write(&mut header, b"abcd").unwrap_err();
        assert!(matches!(err, ArchiveError::Unsupported));
    }

    #[test]
    fn read_rejects_ordinal_at_or_beyond_entry_count() {
        let (_dir, io) = fixture();
        let mut archive = Archive::init(io, 0, None, false, None).unwrap();

        let mut header = EntryHeader::new_zeroed();
        archive.write(&mut header, b"ok").unwrap();

        let mut bogus = header;
        bogus.ordinal_id = 1u32.into();
        let mut out = [0u8; 2];
        let err = archive.read(&bogus, &mut out).unwrap_err();
        assert!(matches!(err, ArchiveError::InvalidValue(_)));
    }

    #[test]
    fn read_rejects_an_undersized_output_buffer() {
        let (_dir, io) = fixture();
        let mut archive = Archive::init(io, 0, None, false, None).unwrap();

        let mut header = EntryHeader::new_zeroed();
        archive.write(&mut header, b"abcd").unwrap();

        let mut out = [0u8; 2];
        let err = archive.read(&header, &mut out).unwrap_err();
        assert!(matches!(err, ArchiveError::InvalidPointer));
    }
}
