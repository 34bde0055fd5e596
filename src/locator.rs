//! Packed block locator
//!
//! One 32-bit word per grid cell: the high 24 bits hold the absolute index
//! of the block's first sector, the low 8 bits how many contiguous sectors
//! it occupies. The all-zero word is the sentinel for "no block stored
//! here"; sector 0 always belongs to the header region, so the sentinel can
//! never collide with a real allocation.

/// Highest sector index representable in the 24-bit field.
pub const MAX_SECTOR_INDEX: u32 = 0x00ff_ffff;

/// Highest sector count representable in the 8-bit field.
pub const MAX_SECTOR_COUNT: u32 = 0xff;

/// Location and size of one stored block, packed into 32 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockLocator(u32);

impl BlockLocator {
    /// Sentinel value meaning "no block stored at this position".
    pub const EMPTY: BlockLocator = BlockLocator(0);

    pub fn new(sector_index: u32, sector_count: u32) -> Self {
        let mut locator = BlockLocator::EMPTY;
        locator.set_sector_index(sector_index);
        locator.set_sector_count(sector_count);
        locator
    }

    pub fn from_raw(raw: u32) -> Self {
        BlockLocator(raw)
    }

    pub fn to_raw(self) -> u32 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn sector_index(self) -> u32 {
        self.0 >> 8
    }

    /// Panics if `index` exceeds [`MAX_SECTOR_INDEX`]. Overflowing the field
    /// means the chosen region dimensions or sector granularity are
    /// incompatible with the 24/8-bit packing, which is a logic error in the
    /// caller, not a recoverable condition.
    pub fn set_sector_index(&mut self, index: u32) {
        assert!(
            index <= MAX_SECTOR_INDEX,
            "sector index {index} exceeds the 24-bit locator field"
        );
        self.0 = (index << 8) | (self.0 & 0xff);
    }

    pub fn sector_count(self) -> u32 {
        self.0 & 0xff
    }

    /// Panics if `count` exceeds [`MAX_SECTOR_COUNT`]; same capacity
    /// contract as [`BlockLocator::set_sector_index`].
    pub fn set_sector_count(&mut self, count: u32) {
        assert!(
            count <= MAX_SECTOR_COUNT,
            "sector count {count} exceeds the 8-bit locator field"
        );
        self.0 = (self.0 & 0xffff_ff00) | count;
    }
}
