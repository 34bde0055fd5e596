//! Free-sector bookkeeping for the payload region of an archive.
//!
//! Sector indices are absolute: sectors `[0, reserved)` hold the header and
//! are never allocatable. Freed runs are kept in a coalesced free-extent
//! map and handed back out first-fit; the file itself is never truncated.

use crate::error::{RegionError, Result};
use crate::locator::BlockLocator;
use std::collections::BTreeMap;

/// Map of free sector runs past the header region, plus an end-of-file
/// watermark. Rebuilt from the locator table when a file is opened and
/// maintained incrementally afterwards.
#[derive(Debug, Clone)]
pub struct SectorMap {
    /// Free extents keyed by starting sector; values are run lengths.
    /// Adjacent extents are always coalesced.
    free_extents: BTreeMap<u32, u32>,
    /// First sector past the reserved header region.
    reserved: u32,
    /// One past the highest sector ever allocated.
    end: u32,
}

impl SectorMap {
    /// Empty map for a freshly created file: nothing allocated yet.
    pub fn new(reserved_sectors: u32) -> Self {
        SectorMap {
            free_extents: BTreeMap::new(),
            reserved: reserved_sectors,
            end: reserved_sectors,
        }
    }

    /// Reconstruct occupancy from the locator table of an opened file.
    ///
    /// A table whose runs overlap each other or reach into the reserved
    /// header sectors is corrupt: accepting it would let the allocator hand
    /// out sectors a surviving block still references, so the caller must
    /// treat the whole archive as unreadable.
    pub fn rebuild<'a>(
        reserved_sectors: u32,
        locators: impl Iterator<Item = &'a BlockLocator>,
    ) -> Result<Self> {
        let mut occupied: Vec<(u32, u32)> = locators
            .filter(|locator| !locator.is_empty())
            .map(|locator| (locator.sector_index(), locator.sector_count()))
            .collect();
        occupied.sort_unstable();

        let mut map = SectorMap::new(reserved_sectors);
        let mut cursor = reserved_sectors;
        for (start, count) in occupied {
            if start < cursor {
                return Err(RegionError::CorruptHeader(format!(
                    "sector run at {start} overlaps the header region or a preceding run"
                )));
            }
            if start > cursor {
                map.free_extents.insert(cursor, start - cursor);
            }
            cursor = start + count;
        }
        map.end = cursor;
        Ok(map)
    }

    /// First-fit allocation of `count` contiguous sectors. Falls back to
    /// extending the end-of-file watermark when no free run is large
    /// enough; the 24-bit locator ceiling is enforced by the caller when
    /// the run is recorded.
    pub fn allocate(&mut self, count: u32) -> u32 {
        debug_assert!(count > 0);
        let found = self
            .free_extents
            .iter()
            .find(|(_, &length)| length >= count)
            .map(|(&start, &length)| (start, length));

        match found {
            Some((start, length)) => {
                self.free_extents.remove(&start);
                if length > count {
                    self.free_extents.insert(start + count, length - count);
                }
                start
            }
            None => {
                let start = self.end;
                self.end += count;
                start
            }
        }
    }

    /// Return a run to the free map, coalescing with its neighbors.
    ///
    /// A run that is already free or lies outside the allocatable range is
    /// logged and ignored rather than corrupting the map.
    pub fn free(&mut self, first: u32, count: u32) {
        if count == 0 {
            return;
        }
        let end = first + count;
        if first < self.reserved || end > self.end {
            tracing::warn!(first, count, "freed sector run outside the allocatable range");
            return;
        }
        if let Some((&prev_start, &prev_len)) = self.free_extents.range(..=first).next_back() {
            if prev_start + prev_len > first {
                tracing::warn!(first, count, "double free of sector run");
                return;
            }
        }
        if let Some((&next_start, _)) = self.free_extents.range(first..).next() {
            if next_start < end {
                tracing::warn!(first, count, "double free of sector run");
                return;
            }
        }

        let mut merged_first = first;
        let mut merged_count = count;
        if let Some((&prev_start, &prev_len)) = self.free_extents.range(..first).next_back() {
            if prev_start + prev_len == first {
                self.free_extents.remove(&prev_start);
                merged_first = prev_start;
                merged_count += prev_len;
            }
        }
        if let Some((&next_start, &next_len)) = self.free_extents.range(end..).next() {
            if next_start == end {
                self.free_extents.remove(&next_start);
                merged_count += next_len;
            }
        }
        self.free_extents.insert(merged_first, merged_count);
    }

    /// One past the highest sector ever allocated.
    pub fn end(&self) -> u32 {
        self.end
    }

    /// Total sectors currently reusable.
    pub fn free_sector_count(&self) -> u32 {
        self.free_extents.values().sum()
    }
}
