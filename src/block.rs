//! Collaborator traits for block payloads and their serializers.
//!
//! The engine treats block contents as opaque: it only checks the channel
//! layout against the archive's format and hands raw bytes to a serializer.
//! Production payload types and serializers live outside this crate.

use crate::error::Result;
use crate::format::{Depth, RegionFormat, CHANNEL_COUNT};

/// An in-memory voxel block, seen by the engine as an opaque payload.
pub trait BlockPayload {
    /// Per-channel storage depths, in fixed channel order.
    fn channel_depths(&self) -> [Depth; CHANNEL_COUNT];

    /// Whether the block holds only default content. Saving an empty block
    /// reclaims its sectors instead of writing anything.
    fn is_empty(&self) -> bool;
}

/// Byte encoder/decoder for block payloads.
///
/// Implementations must be deterministic and self-delimiting: `decode`
/// receives exactly the sector run a block occupies, so trailing pad bytes
/// past the real payload must be ignorable.
pub trait BlockSerializer {
    type Block: BlockPayload;

    fn encode(&mut self, block: &Self::Block, format: &RegionFormat) -> Result<Vec<u8>>;

    fn decode(&mut self, bytes: &[u8], format: &RegionFormat) -> Result<Self::Block>;
}
