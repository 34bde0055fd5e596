//! Region header: version tag, format descriptor, and the locator table.
//!
//! # On-disk layout (version 3)
//!
//! ```text
//! byte 0          version tag
//! byte 1          block_size_po2
//! bytes 2..5      region_size x, y, z (one byte each)
//! bytes 5..13     channel depth tags (8 bytes)
//! bytes 13..15    sector_size (u16 LE)
//! byte 15         has_palette flag
//! [1024 bytes]    palette (256 RGBA entries), present only when the flag is set
//! then            locator table, region volume x 4-byte packed words (LE)
//! pad             zeros up to a whole number of sectors
//! ```
//!
//! Version 2 uses the same byte length: the flag byte was reserved
//! (must be zero, no palette section followed), and channel depths were
//! recorded as bytes-per-voxel rather than tag codes. Opening a v2 file runs
//! the migration chain on the in-memory header; nothing is written back to
//! disk until the header is flushed.

use crate::error::{RegionError, Result};
use crate::format::{Color8, Depth, RegionFormat, CHANNEL_COUNT, PALETTE_SIZE};
use crate::locator::BlockLocator;
use std::io::Read;
use vek::Vec3;

/// Current on-disk format revision.
pub const FORMAT_VERSION: u8 = 3;

/// Oldest revision the migration chain can still read.
pub const OLDEST_SUPPORTED_VERSION: u8 = 2;

fn read_u8(reader: &mut impl Read) -> Result<u8> {
    let mut byte = [0u8; 1];
    reader.read_exact(&mut byte)?;
    Ok(byte[0])
}

/// Header fields exactly as recorded on disk, before migration.
///
/// Migration steps transform this value in memory, one version at a time,
/// until [`FORMAT_VERSION`] is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RawHeader {
    version: u8,
    block_size_po2: u8,
    region_size: Vec3<u32>,
    channel_tags: [u8; CHANNEL_COUNT],
    sector_size: u16,
    has_palette: bool,
    palette: [Color8; PALETTE_SIZE],
}

impl RawHeader {
    fn read_from(reader: &mut impl Read) -> Result<Self> {
        let version = read_u8(reader)?;
        if !(OLDEST_SUPPORTED_VERSION..=FORMAT_VERSION).contains(&version) {
            return Err(RegionError::UnsupportedVersion(version));
        }

        let block_size_po2 = read_u8(reader)?;
        let region_size = Vec3::new(
            read_u8(reader)? as u32,
            read_u8(reader)? as u32,
            read_u8(reader)? as u32,
        );

        let mut channel_tags = [0u8; CHANNEL_COUNT];
        reader.read_exact(&mut channel_tags)?;

        let mut sector_size_bytes = [0u8; 2];
        reader.read_exact(&mut sector_size_bytes)?;
        let sector_size = u16::from_le_bytes(sector_size_bytes);

        let flag = read_u8(reader)?;
        let mut palette = [Color8::default(); PALETTE_SIZE];
        let has_palette = match version {
            2 => {
                // Reserved byte in v2, reinterpreted as the palette flag in v3.
                if flag != 0 {
                    return Err(RegionError::CorruptHeader(
                        "nonzero reserved byte in a version 2 header".into(),
                    ));
                }
                false
            }
            _ => {
                if flag != 0 {
                    let mut entry = [0u8; 4];
                    for color in palette.iter_mut() {
                        reader.read_exact(&mut entry)?;
                        *color = Color8::from_bytes(entry);
                    }
                }
                flag != 0
            }
        };

        Ok(RawHeader {
            version,
            block_size_po2,
            region_size,
            channel_tags,
            sector_size,
            has_palette,
            palette,
        })
    }

    fn migrate_to_latest(&mut self) -> Result<()> {
        while self.version < FORMAT_VERSION {
            match self.version {
                2 => self.migrate_v2_to_v3()?,
                other => return Err(RegionError::UnsupportedVersion(other)),
            }
        }
        Ok(())
    }

    /// v2 recorded each channel depth as its byte count (1/2/4/8); v3
    /// records tag codes. No palette existed before v3. Sector contents are
    /// untouched: this step only reinterprets header metadata.
    fn migrate_v2_to_v3(&mut self) -> Result<()> {
        for tag in self.channel_tags.iter_mut() {
            *tag = match *tag {
                1 => 0,
                2 => 1,
                4 => 2,
                8 => 3,
                other => {
                    return Err(RegionError::CorruptHeader(format!(
                        "invalid v2 channel depth of {other} bytes"
                    )))
                }
            };
        }
        self.has_palette = false;
        self.version = 3;
        Ok(())
    }

    fn into_format(self) -> Result<RegionFormat> {
        let mut channel_depths = [Depth::U8; CHANNEL_COUNT];
        for (depth, tag) in channel_depths.iter_mut().zip(self.channel_tags) {
            *depth = Depth::from_code(tag)?;
        }
        Ok(RegionFormat {
            block_size_po2: self.block_size_po2,
            region_size: self.region_size,
            channel_depths,
            sector_size: self.sector_size,
            palette: self.palette,
            has_palette: self.has_palette,
        })
    }
}

/// In-memory image of an archive's header.
///
/// The locator table always has exactly `region volume` entries; the same
/// index always corresponds to the same 3D position, so the linearization
/// must never change once files exist.
#[derive(Debug, Clone)]
pub struct RegionHeader {
    pub version: u8,
    pub format: RegionFormat,
    pub blocks: Vec<BlockLocator>,
}

impl RegionHeader {
    /// Fresh header at the current version, with every cell empty.
    pub fn new(format: RegionFormat) -> Self {
        let volume = format.volume();
        RegionHeader {
            version: FORMAT_VERSION,
            format,
            blocks: vec![BlockLocator::EMPTY; volume],
        }
    }

    /// Flat locator index of a grid position, row-major in x, then y, then z.
    pub fn block_index(&self, position: Vec3<u32>) -> Option<usize> {
        let s = self.format.region_size;
        if position.x >= s.x || position.y >= s.y || position.z >= s.z {
            return None;
        }
        Some((position.x + s.x * (position.y + s.y * position.z)) as usize)
    }

    /// Inverse of [`RegionHeader::block_index`].
    pub fn block_position_from_index(&self, index: usize) -> Vec3<u32> {
        let s = self.format.region_size;
        let i = index as u32;
        Vec3::new(i % s.x, (i / s.x) % s.y, i / (s.x * s.y))
    }

    /// Parse a header from the start of an archive, migrating older
    /// versions in memory as needed.
    pub fn read_from(reader: &mut impl Read) -> Result<Self> {
        let mut raw = RawHeader::read_from(reader)?;

        // The locator table layout is identical across supported versions,
        // so it can be read before migration runs.
        let volume = (raw.region_size.x * raw.region_size.y * raw.region_size.z) as usize;
        let mut blocks = Vec::with_capacity(volume);
        let mut word = [0u8; 4];
        for _ in 0..volume {
            reader.read_exact(&mut word)?;
            blocks.push(BlockLocator::from_raw(u32::from_le_bytes(word)));
        }

        if raw.version < FORMAT_VERSION {
            tracing::debug!(
                from = raw.version,
                to = FORMAT_VERSION,
                "migrating region header"
            );
            raw.migrate_to_latest()?;
        }

        let format = raw.into_format()?;
        if !format.validate() {
            return Err(RegionError::CorruptHeader(
                "format descriptor failed validation".into(),
            ));
        }

        Ok(RegionHeader {
            version: FORMAT_VERSION,
            format,
            blocks,
        })
    }

    /// Serialize at the current version, zero-padded to a whole number of
    /// sectors.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.padded_size());

        bytes.push(self.version);
        bytes.push(self.format.block_size_po2);
        bytes.push(self.format.region_size.x as u8);
        bytes.push(self.format.region_size.y as u8);
        bytes.push(self.format.region_size.z as u8);
        for depth in self.format.channel_depths {
            bytes.push(depth as u8);
        }
        bytes.extend_from_slice(&self.format.sector_size.to_le_bytes());
        bytes.push(self.format.has_palette as u8);
        if self.format.has_palette {
            for color in &self.format.palette {
                bytes.extend_from_slice(&color.to_bytes());
            }
        }

        for locator in &self.blocks {
            bytes.extend_from_slice(&locator.to_raw().to_le_bytes());
        }

        bytes.resize(self.padded_size(), 0);
        bytes
    }

    /// Size of the serialized header before sector padding.
    pub fn serialized_size(&self) -> usize {
        let descriptor = 16 + if self.format.has_palette {
            4 * PALETTE_SIZE
        } else {
            0
        };
        descriptor + 4 * self.blocks.len()
    }

    /// Size of the reserved header region: the serialized size rounded up
    /// to a sector boundary. Payload sectors begin at this offset.
    pub fn padded_size(&self) -> usize {
        let sector_size = self.format.sector_size as usize;
        self.serialized_size().div_ceil(sector_size) * sector_size
    }
}
