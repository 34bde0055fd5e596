//! Region format descriptor
//!
//! Describes the immutable shape of one archive: grid extent, per-channel
//! voxel depths, sector granularity, and the optional shared color palette.
//! A descriptor must pass [`RegionFormat::validate`] before it is used to
//! create or interpret a file.

use crate::block::BlockPayload;
use crate::error::{RegionError, Result};
use vek::Vec3;

/// File extension conventionally used for region archives.
pub const FILE_EXTENSION: &str = "vxr";

/// Number of channels every block carries. The format does not support
/// variable channel counts.
pub const CHANNEL_COUNT: usize = 8;

/// Maximum grid extent along any axis, in blocks (each axis is stored as
/// one byte).
pub const MAX_BLOCKS_ACROSS: u32 = 255;

/// Entry count of the optional shared palette.
pub const PALETTE_SIZE: usize = 256;

/// Per-channel storage depth tag.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Depth {
    #[default]
    U8 = 0,
    U16 = 1,
    U32 = 2,
    U64 = 3,
}

impl Depth {
    /// Parse a depth from its on-disk tag code.
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Depth::U8),
            1 => Ok(Depth::U16),
            2 => Ok(Depth::U32),
            3 => Ok(Depth::U64),
            other => Err(RegionError::CorruptHeader(format!(
                "invalid channel depth code {other}"
            ))),
        }
    }

    /// Bytes occupied by one voxel value at this depth.
    pub fn byte_count(self) -> u32 {
        1 << (self as u32)
    }
}

/// One RGBA entry of the shared block palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Color8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color8 {
    pub fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Color8 { r, g, b, a }
    }

    pub fn to_bytes(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Color8::new(bytes[0], bytes[1], bytes[2], bytes[3])
    }
}

/// Shape of a region archive.
///
/// Set once before a file is created and fixed for the file's lifetime;
/// opening an existing archive loads the descriptor recorded in its header.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionFormat {
    /// Edge length of one cubic block, in voxels, as a power of two.
    pub block_size_po2: u8,
    /// Grid extent in blocks. Each axis is `1..=255`.
    pub region_size: Vec3<u32>,
    /// Storage depth of each channel, in fixed channel order.
    pub channel_depths: [Depth; CHANNEL_COUNT],
    /// Byte granularity of file allocation units. Every stored block
    /// occupies a whole number of sectors.
    pub sector_size: u16,
    /// Shared color table, meaningful only when `has_palette` is set.
    pub palette: [Color8; PALETTE_SIZE],
    pub has_palette: bool,
}

impl Default for RegionFormat {
    fn default() -> Self {
        RegionFormat {
            block_size_po2: 0,
            region_size: Vec3::zero(),
            channel_depths: [Depth::U8; CHANNEL_COUNT],
            sector_size: 0,
            palette: [Color8::default(); PALETTE_SIZE],
            has_palette: false,
        }
    }
}

impl RegionFormat {
    /// Check all capacity and non-zero invariants.
    ///
    /// Returns `false` instead of erroring so a descriptor decoded from a
    /// corrupt file can be rejected without aborting; no state is mutated.
    pub fn validate(&self) -> bool {
        let s = self.region_size;
        self.block_size_po2 != 0
            && self.sector_size != 0
            && s.x >= 1
            && s.y >= 1
            && s.z >= 1
            && s.x <= MAX_BLOCKS_ACROSS
            && s.y <= MAX_BLOCKS_ACROSS
            && s.z <= MAX_BLOCKS_ACROSS
    }

    /// Check that a payload's channel layout matches this descriptor.
    ///
    /// Must hold before the payload can be stored in the archive.
    pub fn verify_block(&self, block: &impl BlockPayload) -> bool {
        block.channel_depths() == self.channel_depths
    }

    /// Number of grid cells in the region.
    pub fn volume(&self) -> usize {
        let s = self.region_size;
        (s.x * s.y * s.z) as usize
    }
}
