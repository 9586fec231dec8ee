//! In-memory entry table: an ordered vector of entry headers, rebuilt lazily by walking forward
//! from the file header's `first_block` offset (or, incrementally, from the last known entry's
//! `next_block`).

use zerocopy::FromBytes;

use crate::error::{ArchiveError, Result};
use crate::io::FileIo;
use crate::layout::{EntryHeader, ENTRY_MARKER};

#[derive(Default)]
pub struct EntryTable {
    entries: Vec<EntryHeader>,
}

impl EntryTable {
    pub fn new() -> Self {
        EntryTable::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, header: EntryHeader) {
        self.entries.push(header);
    }

    pub fn get(&self, index: usize) -> Option<EntryHeader> {
        self.entries.get(index).copied()
    }

    pub fn last(&self) -> Option<&EntryHeader> {
        self.entries.last()
    }

    /// Copy `[start, min(start + max, len))` into `out`, returning the number copied.
    pub fn fill(&self, out: &mut [EntryHeader], start: usize, max: usize) -> usize {
        let end = (start + max).min(self.entries.len()).min(start + out.len());
        if start >= end {
            return 0;
        }
        let n = end - start;
        out[..n].copy_from_slice(&self.entries[start..end]);
        n
    }
}

/// Read and validate a single entry header at `offset`.
pub fn read_entry_header(io: &FileIo, offset: u64) -> Result<EntryHeader> {
    let bytes = io.read_at(offset, EntryHeader::SIZE)?;
    if bytes.len() != EntryHeader::SIZE {
        return Err(ArchiveError::Corrupt("truncated entry header"));
    }
    let header = EntryHeader::read_from_bytes(&bytes[..])
        .map_err(|_| ArchiveError::Corrupt("malformed entry header"))?;
    if header.entry_marker != ENTRY_MARKER {
        return Err(ArchiveError::Corrupt("entry marker mismatch"));
    }
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Write;
    use zerocopy::{FromZeros, IntoBytes};

    fn blank_entry() -> EntryHeader {
        EntryHeader::new_zeroed()
    }

    #[test]
    fn fill_copies_the_requested_window() {
        let mut table = EntryTable::new();
        for k in 0..5u32 {
            let mut header = blank_entry();
            header.ordinal_id = k.into();
            table.push(header);
        }

        let mut out = vec![blank_entry(); 2];
        let n = table.fill(&mut out, 1, 2);
        assert_eq!(n, 2);
        assert_eq!(out[0].ordinal_id.get(), 1);
        assert_eq!(out[1].ordinal_id.get(), 2);
    }

    #[test]
    fn fill_past_the_end_returns_zero() {
        let table = EntryTable::new();
        let mut out = vec![blank_entry(); 3];
        assert_eq!(table.fill(&mut out, 0, 3), 0);
    }

    #[test]
    fn get_and_last_reflect_pushes() {
        let mut table = EntryTable::new();
        assert!(table.is_empty());
        assert!(table.last().is_none());

        let mut header = blank_entry();
        header.ordinal_id = 7u32.into();
        table.push(header);

        assert_eq!(table.len(), 1);
        assert_eq!(table.get(0).unwrap().ordinal_id.get(), 7);
        assert_eq!(table.last().unwrap().ordinal_id.get(), 7);
        assert!(table.get(1).is_none());
    }

    fn fixture(bytes: &[u8]) -> (tempfile::TempDir, FileIo) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entries.bin");
        {
            let mut f = OpenOptions::new().create(true).write(true).open(&path).unwrap();
            f.write_all(bytes).unwrap();
        }
        let file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
        let io = FileIo::lock(file, true).unwrap();
        (dir, io)
    }

    #[test]
    fn read_entry_header_round_trips() {
        let mut header = blank_entry();
        header.entry_marker = ENTRY_MARKER;
        header.ordinal_id = 3u32.into();
        let (_dir, io) = fixture(header.as_bytes());

        let read_back = read_entry_header(&io, 0).unwrap();
        assert_eq!(read_back, header);
    }

    #[test]
    fn read_entry_header_rejects_wrong_marker() {
        let mut header = blank_entry();
        header.entry_marker = *b"NOTANENT";
        let (_dir, io) = fixture(header.as_bytes());

        let err = read_entry_header(&io, 0).unwrap_err();
        assert!(matches!(err, ArchiveError::Corrupt(_)));
    }

    #[test]
    fn read_entry_header_rejects_truncated_file() {
        let (_dir, io) = fixture(&[0u8; 4]);
        let err = read_entry_header(&io, 0).unwrap_err();
        assert!(matches!(err, ArchiveError::Corrupt(_)));
    }
}
