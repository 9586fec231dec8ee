//! Bounded in-memory page cache with LRU replacement.
//!
//! Backing memory for every page comes from a single `Vec<u8>` arena sized to the configured
//! budget, allocated once in [`PageCache::new`]. Slots are claimed from the arena lazily, in order
//! — a bump allocator: the first `max_pages()` misses each carve out the next unused
//! `page_size`-sized slice, and only once every slot is claimed does a miss start reloading the
//! least-recently-used slot in place instead of carving a new one. Slots are linked into an
//! intrusive, index-based doubly linked recency list — `head` is the most-recently-used slot,
//! `tail` is the next one due for eviction.

use crate::error::{ArchiveError, Result};
use crate::io::FileIo;

/// Upper bound on the number of pages the cache will hold, regardless of the memory budget.
const MAX_PAGE_COUNT: usize = 64;
/// Pages are never smaller than this, even for a tiny memory budget.
const MIN_PAGE_SIZE: usize = 4096;

struct Slot {
    begin_offset: u64,
    /// Valid bytes at the start of this slot's arena slice; short of `page_size` only for the
    /// slot covering the tail of the file.
    mem_size: usize,
    loaded: bool,
    prev: Option<usize>,
    next: Option<usize>,
}

pub struct PageCache {
    page_size: usize,
    /// Single backing allocation for every slot's memory, sized `page_size * max_pages` up front.
    arena: Vec<u8>,
    slots: Vec<Slot>,
    /// Number of slots claimed from the arena so far; grows from 0 up to `max_pages()`, then stays
    /// put — from then on misses reload the LRU slot instead of claiming a new one.
    claimed: usize,
    head: Option<usize>,
    tail: Option<usize>,
}

impl PageCache {
    /// Build a cache sized for a memory budget of `budget` bytes.
    pub fn new(budget: usize) -> Self {
        let per_page = (budget / MAX_PAGE_COUNT.max(1)).max(1);
        let page_size = per_page.next_power_of_two().max(MIN_PAGE_SIZE);
        let max_pages = (budget / page_size).clamp(1, MAX_PAGE_COUNT);
        PageCache {
            page_size,
            arena: vec![0u8; page_size * max_pages],
            slots: Vec::with_capacity(max_pages),
            claimed: 0,
            head: None,
            tail: None,
        }
    }

    fn max_pages(&self) -> usize {
        (self.arena.len() / self.page_size).max(1)
    }

    fn slot_range(&self, idx: usize) -> std::ops::Range<usize> {
        let start = idx * self.page_size;
        start..start + self.page_size
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.slots[idx].prev, self.slots[idx].next);
        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].prev = prev,
            None => self.tail = prev,
        }
        self.slots[idx].prev = None;
        self.slots[idx].next = None;
    }

    fn push_front(&mut self, idx: usize) {
        self.slots[idx].prev = None;
        self.slots[idx].next = self.head;
        if let Some(h) = self.head {
            self.slots[h].prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.unlink(idx);
        self.push_front(idx);
    }

    fn find_resident(&self, offset: u64) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.loaded && s.begin_offset <= offset && offset < s.begin_offset + s.mem_size as u64)
    }

    fn load_into(&mut self, io: &FileIo, idx: usize, begin_offset: u64) -> Result<()> {
        let range = self.slot_range(idx);
        let mem_size = io.read_into(begin_offset, &mut self.arena[range])?;
        self.slots[idx].begin_offset = begin_offset;
        self.slots[idx].mem_size = mem_size;
        self.slots[idx].loaded = true;
        Ok(())
    }

    /// Find (and load, if requested) the page containing `offset`.
    ///
    /// On a hit with `force_reload`, the page's contents are re-read from disk. On a miss with
    /// `load_on_miss`, an unclaimed arena slot is bumped into use, or — once every slot has been
    /// claimed — the LRU slot is reloaded at the new offset. Returns the slot's index into the
    /// arena.
    pub fn find_page(
        &mut self,
        io: &FileIo,
        offset: u64,
        load_on_miss: bool,
        force_reload: bool,
    ) -> Result<Option<usize>> {
        if let Some(idx) = self.find_resident(offset) {
            if force_reload {
                let begin = self.slots[idx].begin_offset;
                self.load_into(io, idx, begin)?;
            }
            self.move_to_front(idx);
            return Ok(Some(idx));
        }

        if !load_on_miss {
            return Ok(None);
        }

        let begin_offset = (offset / self.page_size as u64) * self.page_size as u64;

        if self.claimed < self.max_pages() {
            let idx = self.claimed;
            self.claimed += 1;
            self.slots.push(Slot {
                begin_offset: 0,
                mem_size: 0,
                loaded: false,
                prev: None,
                next: None,
            });
            self.load_into(io, idx, begin_offset)?;
            self.push_front(idx);
            Ok(Some(idx))
        } else {
            let Some(idx) = self.tail else {
                return Ok(None);
            };
            self.load_into(io, idx, begin_offset)?;
            self.move_to_front(idx);
            Ok(Some(idx))
        }
    }

    /// Read `len` bytes starting at `offset`, splitting the range at page boundaries and pulling
    /// each sub-range through [`Self::find_page`]. `out` may be omitted (preload-only) or shorter
    /// than `len`, in which case only the bytes that fit are copied.
    pub fn read_cached(
        &mut self,
        io: &FileIo,
        offset: u64,
        mut out: Option<&mut [u8]>,
        len: usize,
        force_reload: bool,
    ) -> Result<()> {
        let mut remaining = len;
        let mut cur = offset;

        while remaining > 0 {
            let page_begin = (cur / self.page_size as u64) * self.page_size as u64;
            let in_page = (cur - page_begin) as usize;
            let chunk = remaining.min(self.page_size - in_page);

            let Some(idx) = self.find_page(io, cur, true, force_reload)? else {
                return Err(ArchiveError::Corrupt("page cache could not obtain a page"));
            };

            let slot = &self.slots[idx];
            if !slot.loaded {
                return Err(ArchiveError::NotReady);
            }

            let avail = slot.mem_size.saturating_sub(in_page);
            let n = chunk.min(avail);

            if let Some(out) = out.as_deref_mut() {
                let dst_start = (cur - offset) as usize;
                if dst_start < out.len() {
                    let dst_end = (dst_start + n).min(out.len());
                    let slot_start = idx * self.page_size + in_page;
                    let src_end = slot_start + (dst_end - dst_start);
                    out[dst_start..dst_end].copy_from_slice(&self.arena[slot_start..src_end]);
                }
            }

            if n == 0 {
                break;
            }

            cur += n as u64;
            remaining -= n;
        }

        Ok(())
    }

    /// Write-through: overwrite the resident slice of any page(s) covering `[offset, offset+len)`.
    /// Pages that are not resident are left alone; they will be fetched fresh (with the new
    /// on-disk contents) on the next read.
    pub fn write_cached(&mut self, io: &FileIo, offset: u64, data: &[u8]) -> Result<()> {
        let len = data.len();
        let mut remaining = len;
        let mut cur = offset;

        while remaining > 0 {
            let page_begin = (cur / self.page_size as u64) * self.page_size as u64;
            let in_page = (cur - page_begin) as usize;
            let chunk = remaining.min(self.page_size - in_page);

            if let Some(idx) = self.find_page(io, cur, false, false)? {
                let mem_size = self.slots[idx].mem_size;
                let avail = mem_size.saturating_sub(in_page);
                let n = chunk.min(avail);
                if n > 0 {
                    let src_start = (cur - offset) as usize;
                    let slot_start = idx * self.page_size + in_page;
                    self.arena[slot_start..slot_start + n].copy_from_slice(&data[src_start..src_start + n]);
                }
            }

            cur += chunk as u64;
            remaining -= chunk;
        }

        Ok(())
    }

    /// Pull `min(max_bytes, fileSize - start)` bytes into the cache without returning them.
    pub fn preload(&mut self, io: &FileIo, start: u64, max_bytes: usize) -> Result<()> {
        let file_size = io.file_size()?;
        let available = file_size.saturating_sub(start) as usize;
        let len = max_bytes.min(available);
        self.read_cached(io, start, None, len, false)
    }

    #[cfg(test)]
    fn is_resident(&self, offset: u64) -> bool {
        self.find_resident(offset).is_some()
    }

    #[cfg(test)]
    fn lru_tail_offset(&self) -> Option<u64> {
        self.tail.map(|idx| self.slots[idx].begin_offset)
    }
}
