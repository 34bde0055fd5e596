//! Region file engine: block save/load over a sector-allocated archive.
//!
//! One `RegionFile` exclusively owns its file handle, in-memory header, and
//! sector map while open. It is not internally synchronized; callers must
//! serialize access to one instance, though any number of instances may be
//! open on different archives at once.

use crate::block::{BlockPayload, BlockSerializer};
use crate::error::{RegionError, Result};
use crate::format::RegionFormat;
use crate::header::RegionHeader;
use crate::io::RegionFileHandle;
use crate::locator::{BlockLocator, MAX_SECTOR_COUNT};
use crate::sector::SectorMap;
use std::path::Path;
use vek::Vec3;

/// Archive of optionally-present voxel blocks on a fixed 3D grid.
///
/// The file stays open between operations so individual blocks can be
/// loaded and saved without rewriting anything else. Saves allocate whole
/// sectors first-fit, overwrite in place when the block's sector footprint
/// is unchanged, and relocate it otherwise; freed sectors are reused but
/// the file is never truncated.
pub struct RegionFile {
    file: Option<RegionFileHandle>,
    header: RegionHeader,
    header_modified: bool,
    sectors: SectorMap,
    blocks_begin_offset: u64,
    #[cfg(test)]
    inject_write_error: bool,
}

impl RegionFile {
    /// Engine with no file attached. Call [`RegionFile::set_format`] and
    /// then [`RegionFile::open`].
    pub fn new() -> Self {
        RegionFile {
            file: None,
            header: RegionHeader::new(RegionFormat::default()),
            header_modified: false,
            sectors: SectorMap::new(0),
            blocks_begin_offset: 0,
            #[cfg(test)]
            inject_write_error: false,
        }
    }

    /// Choose the format used when `open` creates a new file.
    ///
    /// Returns `false` for a descriptor that fails validation, or when a
    /// header is already initialized from disk and `format` differs from
    /// it. Legal only before any block has been written.
    pub fn set_format(&mut self, format: RegionFormat) -> bool {
        if !format.validate() {
            return false;
        }
        if self.file.is_some() {
            return self.header.format == format;
        }
        self.header = RegionHeader::new(format);
        true
    }

    /// Open an existing archive, or create one when `create_if_not_found`
    /// is set.
    ///
    /// Opening loads the header, migrates older versions in memory, and
    /// rebuilds the sector map from the locator table. Creating requires a
    /// valid format to have been set and writes the initial header. An
    /// already-open engine is closed (flushing a dirty header) first.
    pub fn open<P: AsRef<Path>>(&mut self, path: P, create_if_not_found: bool) -> Result<()> {
        let path = path.as_ref();
        self.close()?;

        if path.exists() {
            let mut handle = RegionFileHandle::open(path)?;
            let header = handle.read_header()?;
            let reserved = (header.padded_size() / header.format.sector_size as usize) as u32;
            self.sectors = SectorMap::rebuild(reserved, header.blocks.iter())?;
            self.blocks_begin_offset = header.padded_size() as u64;
            self.header = header;
            self.file = Some(handle);
            self.header_modified = false;
            tracing::debug!(path = %path.display(), "opened region file");
        } else if create_if_not_found {
            if !self.header.format.validate() {
                return Err(RegionError::InvalidFormat);
            }
            // Start from a clean locator table in case this engine was
            // used for another file before.
            self.header = RegionHeader::new(self.header.format.clone());
            let handle = RegionFileHandle::create(path, &self.header)?;
            let reserved = (self.header.padded_size() / self.header.format.sector_size as usize) as u32;
            self.sectors = SectorMap::new(reserved);
            self.blocks_begin_offset = self.header.padded_size() as u64;
            self.file = Some(handle);
            self.header_modified = false;
            tracing::debug!(path = %path.display(), "created region file");
        } else {
            return Err(RegionError::FileNotFound(path.display().to_string()));
        }
        Ok(())
    }

    /// Write a dirty header back to disk without closing.
    pub fn flush(&mut self) -> Result<()> {
        if self.header_modified {
            let file = self.file.as_mut().ok_or(RegionError::NotOpen)?;
            file.write_header(&self.header)?;
            file.sync()?;
            self.header_modified = false;
        }
        Ok(())
    }

    /// Flush a dirty header and release the file handle. Does nothing if
    /// the engine is already closed.
    pub fn close(&mut self) -> Result<()> {
        if self.file.is_none() {
            return Ok(());
        }
        self.flush()?;
        self.file = None;
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn format(&self) -> &RegionFormat {
        &self.header.format
    }

    /// Read and decode the block at `position`.
    ///
    /// Returns `Ok(None)` when no block is stored there; missing blocks are
    /// ordinary, not an error.
    pub fn load_block<S: BlockSerializer>(
        &mut self,
        position: Vec3<u32>,
        serializer: &mut S,
    ) -> Result<Option<S::Block>> {
        if self.file.is_none() {
            return Err(RegionError::NotOpen);
        }
        let index = self
            .header
            .block_index(position)
            .ok_or(RegionError::PositionOutOfBounds(position))?;
        let locator = self.header.blocks[index];
        if locator.is_empty() {
            return Ok(None);
        }

        let sector_size = self.header.format.sector_size as u64;
        let offset = locator.sector_index() as u64 * sector_size;
        let length = locator.sector_count() as usize * sector_size as usize;
        let mut buffer = vec![0u8; length];

        let file = self.file.as_mut().ok_or(RegionError::NotOpen)?;
        file.read_exact_at(offset, &mut buffer)?;

        let block = serializer.decode(&buffer, &self.header.format)?;
        Ok(Some(block))
    }

    /// Encode and store the block at `position`, reusing, relocating, or
    /// reclaiming sectors as its footprint requires.
    ///
    /// Saving an empty block over an occupied cell frees its sectors and
    /// resets the locator to the empty sentinel; over an empty cell it is a
    /// no-op. Panics if the encoded block needs more sectors than the 8-bit
    /// locator field can count, which means the format's sector granularity
    /// is incompatible with payloads this large.
    pub fn save_block<S: BlockSerializer>(
        &mut self,
        position: Vec3<u32>,
        block: &S::Block,
        serializer: &mut S,
    ) -> Result<()> {
        if self.file.is_none() {
            return Err(RegionError::NotOpen);
        }
        if !self.header.format.verify_block(block) {
            return Err(RegionError::FormatMismatch);
        }
        let index = self
            .header
            .block_index(position)
            .ok_or(RegionError::PositionOutOfBounds(position))?;
        let locator = self.header.blocks[index];

        if block.is_empty() {
            self.reclaim(index, locator, position);
            return Ok(());
        }

        let data = serializer.encode(block, &self.header.format)?;
        if data.is_empty() {
            // A zero-length encoding stores nothing.
            self.reclaim(index, locator, position);
            return Ok(());
        }

        let sector_size = self.header.format.sector_size as u64;
        let needed = (data.len() as u64).div_ceil(sector_size);
        assert!(
            needed <= MAX_SECTOR_COUNT as u64,
            "block of {} bytes spans {needed} sectors, above the 8-bit locator ceiling",
            data.len()
        );
        let sector_count = needed as u32;

        if locator.is_empty() {
            let first = self.sectors.allocate(sector_count);
            self.write_block_data(first, &data)?;
            self.header.blocks[index] = BlockLocator::new(first, sector_count);
            self.header_modified = true;
        } else if locator.sector_count() == sector_count {
            // Same footprint, overwrite in place; the locator is untouched.
            self.write_block_data(locator.sector_index(), &data)?;
        } else {
            // Free first so a shrinking block may land back on its old
            // sectors. The locator is updated before the data write: if the
            // write fails, the header must not keep referencing a run the
            // map already considers free, or a later save could land on it.
            self.sectors.free(locator.sector_index(), locator.sector_count());
            let first = self.sectors.allocate(sector_count);
            self.header.blocks[index] = BlockLocator::new(first, sector_count);
            self.header_modified = true;
            tracing::debug!(
                %position,
                from = locator.sector_index(),
                to = first,
                "relocating block on size change"
            );
            self.write_block_data(first, &data)?;
        }
        Ok(())
    }

    fn reclaim(&mut self, index: usize, locator: BlockLocator, position: Vec3<u32>) {
        if locator.is_empty() {
            return;
        }
        self.sectors.free(locator.sector_index(), locator.sector_count());
        self.header.blocks[index] = BlockLocator::EMPTY;
        self.header_modified = true;
        tracing::debug!(%position, "reclaimed sectors of emptied block");
    }

    fn write_block_data(&mut self, first_sector: u32, data: &[u8]) -> Result<()> {
        #[cfg(test)]
        if self.inject_write_error {
            self.inject_write_error = false;
            return Err(RegionError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected write failure",
            )));
        }
        let sector_size = self.header.format.sector_size as usize;
        let padded_length = data.len().div_ceil(sector_size) * sector_size;
        let mut buffer = Vec::with_capacity(padded_length);
        buffer.extend_from_slice(data);
        buffer.resize(padded_length, 0);

        let offset = first_sector as u64 * sector_size as u64;
        let file = self.file.as_mut().ok_or(RegionError::NotOpen)?;
        file.write_all_at(offset, &buffer)
    }

    /// Whether a block is stored at `position`. Out-of-grid positions
    /// report `false`. No I/O.
    pub fn has_block(&self, position: Vec3<u32>) -> bool {
        self.header
            .block_index(position)
            .map(|index| !self.header.blocks[index].is_empty())
            .unwrap_or(false)
    }

    /// Index-addressed variant of [`RegionFile::has_block`].
    pub fn has_block_at_index(&self, index: usize) -> bool {
        self.header
            .blocks
            .get(index)
            .map(|locator| !locator.is_empty())
            .unwrap_or(false)
    }

    /// Number of cells in the locator table (the region volume).
    pub fn header_block_count(&self) -> usize {
        self.header.blocks.len()
    }

    /// Grid position of a locator table index.
    pub fn block_position_from_index(&self, index: usize) -> Vec3<u32> {
        self.header.block_position_from_index(index)
    }

    /// Locator stored for `position`; `None` if the position is outside
    /// the grid. An empty locator means no block is stored there.
    pub fn block_locator(&self, position: Vec3<u32>) -> Option<BlockLocator> {
        self.header
            .block_index(position)
            .map(|index| self.header.blocks[index])
    }

    /// Verify that every stored locator lies past the reserved header
    /// sectors and that no two sector runs overlap. Intended for tests and
    /// diagnostics.
    pub fn debug_check(&self) -> bool {
        if self.file.is_none() {
            return true;
        }
        let sector_size = self.header.format.sector_size as u64;
        let reserved = (self.blocks_begin_offset / sector_size) as u32;

        let mut runs: Vec<(u32, u32)> = self
            .header
            .blocks
            .iter()
            .filter(|locator| !locator.is_empty())
            .map(|locator| (locator.sector_index(), locator.sector_count()))
            .collect();
        runs.sort_unstable();

        let mut cursor = reserved;
        for (start, count) in runs {
            if count == 0 {
                tracing::warn!(start, "locator with zero sector count");
                return false;
            }
            if start < cursor {
                tracing::warn!(start, count, "overlapping or header-intersecting sector run");
                return false;
            }
            cursor = start + count;
        }
        true
    }
}

impl Default for RegionFile {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RegionFile {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(%err, "failed to flush region file on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{Depth, CHANNEL_COUNT};
    use tempfile::TempDir;

    struct TestBlock {
        data: Vec<u8>,
    }

    struct RawSerializer;

    impl BlockPayload for TestBlock {
        fn channel_depths(&self) -> [Depth; CHANNEL_COUNT] {
            [Depth::U8; CHANNEL_COUNT]
        }

        fn is_empty(&self) -> bool {
            self.data.is_empty()
        }
    }

    impl BlockSerializer for RawSerializer {
        type Block = TestBlock;

        fn encode(&mut self, block: &TestBlock, _format: &RegionFormat) -> Result<Vec<u8>> {
            let mut bytes = Vec::with_capacity(4 + block.data.len());
            bytes.extend_from_slice(&(block.data.len() as u32).to_le_bytes());
            bytes.extend_from_slice(&block.data);
            Ok(bytes)
        }

        fn decode(&mut self, bytes: &[u8], _format: &RegionFormat) -> Result<TestBlock> {
            if bytes.len() < 4 {
                return Err(RegionError::Serialization("truncated block".into()));
            }
            let length = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
            if bytes.len() < 4 + length {
                return Err(RegionError::Serialization("truncated block body".into()));
            }
            Ok(TestBlock {
                data: bytes[4..4 + length].to_vec(),
            })
        }
    }

    fn test_format() -> RegionFormat {
        RegionFormat {
            block_size_po2: 4,
            region_size: Vec3::new(4, 4, 4),
            sector_size: 512,
            ..Default::default()
        }
    }

    fn open_fresh(dir: &TempDir) -> RegionFile {
        let mut region = RegionFile::new();
        assert!(region.set_format(test_format()));
        region.open(dir.path().join("test.vxr"), true).unwrap();
        region
    }

    #[test]
    fn test_set_format_rejects_invalid() {
        let mut region = RegionFile::new();
        assert!(!region.set_format(RegionFormat::default()));
    }

    #[test]
    fn test_set_format_after_open_only_accepts_identical() {
        let dir = TempDir::new().unwrap();
        let mut region = open_fresh(&dir);

        assert!(region.set_format(test_format()));

        let mut other = test_format();
        other.region_size = Vec3::new(8, 8, 8);
        assert!(!region.set_format(other));
    }

    #[test]
    fn test_open_missing_without_create_fails() {
        let dir = TempDir::new().unwrap();
        let mut region = RegionFile::new();
        region.set_format(test_format());
        let result = region.open(dir.path().join("absent.vxr"), false);
        assert!(matches!(result, Err(RegionError::FileNotFound(_))));
        assert!(!region.is_open());
    }

    #[test]
    fn test_create_without_format_fails() {
        let dir = TempDir::new().unwrap();
        let mut region = RegionFile::new();
        let result = region.open(dir.path().join("test.vxr"), true);
        assert!(matches!(result, Err(RegionError::InvalidFormat)));
    }

    #[test]
    fn test_load_unwritten_position_is_none() {
        let dir = TempDir::new().unwrap();
        let mut region = open_fresh(&dir);
        let loaded = region
            .load_block(Vec3::new(0, 0, 0), &mut RawSerializer)
            .unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut region = open_fresh(&dir);
        let block = TestBlock {
            data: vec![42; 100],
        };

        region
            .save_block(Vec3::new(1, 2, 3), &block, &mut RawSerializer)
            .unwrap();
        assert!(region.has_block(Vec3::new(1, 2, 3)));

        let loaded = region
            .load_block(Vec3::new(1, 2, 3), &mut RawSerializer)
            .unwrap()
            .unwrap();
        assert_eq!(loaded.data, block.data);
    }

    #[test]
    fn test_save_out_of_bounds_fails() {
        let dir = TempDir::new().unwrap();
        let mut region = open_fresh(&dir);
        let block = TestBlock { data: vec![1] };
        let result = region.save_block(Vec3::new(4, 0, 0), &block, &mut RawSerializer);
        assert!(matches!(result, Err(RegionError::PositionOutOfBounds(_))));
    }

    #[test]
    fn test_resave_same_size_keeps_locator() {
        let dir = TempDir::new().unwrap();
        let mut region = open_fresh(&dir);
        let position = Vec3::new(2, 1, 0);
        let block = TestBlock {
            data: vec![7; 600],
        };

        region.save_block(position, &block, &mut RawSerializer).unwrap();
        let before = region.block_locator(position).unwrap();

        region.save_block(position, &block, &mut RawSerializer).unwrap();
        let after = region.block_locator(position).unwrap();

        assert_eq!(before, after);
        assert!(region.debug_check());
    }

    #[test]
    fn test_grown_block_is_relocated() {
        let dir = TempDir::new().unwrap();
        let mut region = open_fresh(&dir);
        let position = Vec3::new(0, 0, 1);

        let small = TestBlock {
            data: vec![1; 100],
        };
        region.save_block(position, &small, &mut RawSerializer).unwrap();
        // Occupy the following sectors so growth cannot extend in place.
        let neighbor = TestBlock {
            data: vec![2; 100],
        };
        region
            .save_block(Vec3::new(1, 0, 1), &neighbor, &mut RawSerializer)
            .unwrap();
        let before = region.block_locator(position).unwrap();

        let large = TestBlock {
            data: vec![3; 3000],
        };
        region.save_block(position, &large, &mut RawSerializer).unwrap();
        let after = region.block_locator(position).unwrap();

        assert_ne!(before.sector_index(), after.sector_index());
        assert_eq!(after.sector_count(), 6);
        assert!(region.debug_check());

        let loaded = region
            .load_block(position, &mut RawSerializer)
            .unwrap()
            .unwrap();
        assert_eq!(loaded.data, large.data);
    }

    #[test]
    fn test_saving_empty_block_reclaims_sectors() {
        let dir = TempDir::new().unwrap();
        let mut region = open_fresh(&dir);
        let position = Vec3::new(3, 3, 3);

        let block = TestBlock {
            data: vec![9; 100],
        };
        region.save_block(position, &block, &mut RawSerializer).unwrap();
        let freed_index = region.block_locator(position).unwrap().sector_index();

        let empty = TestBlock { data: Vec::new() };
        region.save_block(position, &empty, &mut RawSerializer).unwrap();
        assert!(!region.has_block(position));
        assert_eq!(
            region.load_block(position, &mut RawSerializer).unwrap().map(|_| ()),
            None
        );

        // The freed run is handed to the next allocation.
        region
            .save_block(Vec3::new(0, 1, 0), &block, &mut RawSerializer)
            .unwrap();
        let reused = region.block_locator(Vec3::new(0, 1, 0)).unwrap();
        assert_eq!(reused.sector_index(), freed_index);
    }

    #[test]
    fn test_failed_relocation_write_leaves_no_dangling_locator() {
        let dir = TempDir::new().unwrap();
        let mut region = open_fresh(&dir);
        let position = Vec3::new(1, 1, 1);

        region
            .save_block(position, &TestBlock { data: vec![0xbb; 2000] }, &mut RawSerializer)
            .unwrap();
        // Occupy the next sectors so the grown block cannot extend in place.
        region
            .save_block(
                Vec3::new(2, 1, 1),
                &TestBlock { data: vec![1; 100] },
                &mut RawSerializer,
            )
            .unwrap();

        region.inject_write_error = true;
        let result = region.save_block(
            position,
            &TestBlock { data: vec![2; 4000] },
            &mut RawSerializer,
        );
        assert!(matches!(result, Err(RegionError::Io(_))));

        // The header must not keep referencing the freed run: saves at
        // other cells may be handed those sectors.
        region
            .save_block(
                Vec3::new(3, 1, 1),
                &TestBlock { data: vec![3; 2000] },
                &mut RawSerializer,
            )
            .unwrap();
        assert!(region.debug_check());

        // The neighbor untouched by the failure still loads intact.
        let neighbor = region
            .load_block(Vec3::new(2, 1, 1), &mut RawSerializer)
            .unwrap()
            .unwrap();
        assert_eq!(neighbor.data, vec![1; 100]);
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut region = open_fresh(&dir);
        region.close().unwrap();
        region.close().unwrap();
        assert!(!region.is_open());
    }

    #[test]
    fn test_operations_on_closed_engine_fail() {
        let mut region = RegionFile::new();
        region.set_format(test_format());
        let block = TestBlock { data: vec![1] };
        assert!(matches!(
            region.save_block(Vec3::new(0, 0, 0), &block, &mut RawSerializer),
            Err(RegionError::NotOpen)
        ));
        assert!(matches!(
            region.load_block(Vec3::new(0, 0, 0), &mut RawSerializer),
            Err(RegionError::NotOpen)
        ));
    }

    #[test]
    fn test_index_introspection() {
        let dir = TempDir::new().unwrap();
        let region = {
            let mut r = RegionFile::new();
            r.set_format(test_format());
            r.open(dir.path().join("test.vxr"), true).unwrap();
            r
        };
        assert_eq!(region.header_block_count(), 64);
        for index in 0..region.header_block_count() {
            let position = region.block_position_from_index(index);
            assert!(!region.has_block(position));
            assert!(!region.has_block_at_index(index));
        }
        assert!(!region.has_block_at_index(64));
    }
}
