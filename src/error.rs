use thiserror::Error;
use vek::Vec3;

#[derive(Error, Debug)]
pub enum RegionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Region file not found: {0}")]
    FileNotFound(String),

    #[error("Unsupported region format version: {0}")]
    UnsupportedVersion(u8),

    #[error("Corrupt region header: {0}")]
    CorruptHeader(String),

    #[error("Invalid region format descriptor")]
    InvalidFormat,

    #[error("Block channel layout does not match the region format")]
    FormatMismatch,

    #[error("Region file is not open")]
    NotOpen,

    #[error("Block position {0} is outside the region grid")]
    PositionOutOfBounds(Vec3<u32>),

    #[error("Block serialization failed: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, RegionError>;
