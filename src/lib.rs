//! Voxel Region Archive Format
//!
//! A single-file archive holding a fixed-size 3D grid of optionally-present,
//! independently-sized voxel blocks, designed for incremental save/load of
//! large volumetric terrain. Blocks can be read and written individually
//! without rewriting the rest of the file.
//!
//! ## Features
//!
//! - **Sector-based allocation**: payloads occupy whole sectors; saves reuse
//!   freed runs first-fit, overwrite in place when the footprint is
//!   unchanged, and relocate on growth
//! - **Packed locator table**: one 32-bit word per grid cell (24-bit sector
//!   index, 8-bit sector count), with the all-zero word meaning "no block"
//! - **Header migration**: older on-disk format versions are upgraded in
//!   memory through a linear chain of per-version steps on open
//! - **Opaque payloads**: block contents are encoded/decoded by a
//!   caller-supplied [`BlockSerializer`]; the engine only verifies the
//!   channel layout against the archive's [`RegionFormat`]
//!
//! ## Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Header region (sector-aligned)               │
//! │  - version tag                               │
//! │  - format descriptor (+ optional palette)    │
//! │  - locator table, one u32 per grid cell      │
//! ├──────────────────────────────────────────────┤
//! │ Payload sectors                              │
//! │  - one sector-aligned run per stored block   │
//! │  - addressed only through the locator table  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use vek::Vec3;
//! use voxel_region::{RegionFile, RegionFormat};
//!
//! let format = RegionFormat {
//!     block_size_po2: 4,
//!     region_size: Vec3::new(16, 16, 16),
//!     sector_size: 512,
//!     ..Default::default()
//! };
//!
//! let mut region = RegionFile::new();
//! assert!(region.set_format(format));
//! region.open("world/r.0.0.0.vxr", true)?;
//!
//! // Blocks are saved and loaded through a caller-supplied serializer;
//! // see the `BlockSerializer` trait.
//! region.close()?;
//! # Ok::<(), voxel_region::RegionError>(())
//! ```
//!
//! A `RegionFile` is single-owner: it holds the file handle and header for
//! as long as it is open, and does no internal locking. Callers serialize
//! access per archive; separate archives can be open concurrently through
//! separate instances.

pub mod block;
pub mod error;
pub mod format;
pub mod header;
pub mod io;
pub mod locator;
pub mod region;
pub mod sector;

pub use block::{BlockPayload, BlockSerializer};
pub use error::{RegionError, Result};
pub use format::{
    Color8, Depth, RegionFormat, CHANNEL_COUNT, FILE_EXTENSION, MAX_BLOCKS_ACROSS, PALETTE_SIZE,
};
pub use header::{RegionHeader, FORMAT_VERSION, OLDEST_SUPPORTED_VERSION};
pub use locator::{BlockLocator, MAX_SECTOR_COUNT, MAX_SECTOR_INDEX};
pub use region::RegionFile;
pub use sector::SectorMap;
