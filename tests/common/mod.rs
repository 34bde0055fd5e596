#![allow(dead_code)]
//! Shared test payload and serializer.
//!
//! `RawSerializer` writes a little-endian length prefix followed by the raw
//! bytes, so decoding is self-delimiting and ignores sector padding.

use voxel_region::{
    BlockPayload, BlockSerializer, Depth, RegionError, RegionFormat, Result, CHANNEL_COUNT,
};

pub struct TestBlock {
    pub depths: [Depth; CHANNEL_COUNT],
    pub data: Vec<u8>,
}

impl TestBlock {
    pub fn filled(data: Vec<u8>) -> Self {
        TestBlock {
            depths: [Depth::U8; CHANNEL_COUNT],
            data,
        }
    }

    pub fn empty() -> Self {
        Self::filled(Vec::new())
    }
}

impl BlockPayload for TestBlock {
    fn channel_depths(&self) -> [Depth; CHANNEL_COUNT] {
        self.depths
    }

    fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

pub struct RawSerializer;

impl BlockSerializer for RawSerializer {
    type Block = TestBlock;

    fn encode(&mut self, block: &TestBlock, _format: &RegionFormat) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(4 + block.data.len());
        bytes.extend_from_slice(&(block.data.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&block.data);
        Ok(bytes)
    }

    fn decode(&mut self, bytes: &[u8], format: &RegionFormat) -> Result<TestBlock> {
        if bytes.len() < 4 {
            return Err(RegionError::Serialization("truncated block".into()));
        }
        let length = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        if bytes.len() < 4 + length {
            return Err(RegionError::Serialization("truncated block body".into()));
        }
        Ok(TestBlock {
            depths: format.channel_depths,
            data: bytes[4..4 + length].to_vec(),
        })
    }
}

/// Encode a payload the way `RawSerializer` does, for hand-building files.
pub fn raw_encoding(data: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(4 + data.len());
    bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());
    bytes.extend_from_slice(data);
    bytes
}
