//! Positioned file I/O for region archives.

use crate::error::Result;
use crate::header::RegionHeader;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Owned read/write handle over one archive file.
///
/// All access is by absolute byte offset; writes past the current end of
/// file are allowed and grow it.
pub struct RegionFileHandle {
    file: File,
    path: PathBuf,
}

impl RegionFileHandle {
    /// Create (or truncate) an archive file and write its initial header.
    pub fn create<P: AsRef<Path>>(path: P, header: &RegionHeader) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        file.write_all(&header.to_bytes())?;
        file.flush()?;

        Ok(RegionFileHandle {
            file,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Open an existing archive file for read and write.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        Ok(RegionFileHandle {
            file,
            path: path.as_ref().to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse the header at the start of the file, migrating older versions
    /// in memory as needed.
    pub fn read_header(&mut self) -> Result<RegionHeader> {
        self.file.seek(SeekFrom::Start(0))?;
        RegionHeader::read_from(&mut self.file)
    }

    /// Rewrite the header region at the start of the file.
    pub fn write_header(&mut self, header: &RegionHeader) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&header.to_bytes())?;
        self.file.flush()?;
        Ok(())
    }

    pub fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    pub fn write_all_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Flush buffered writes down to the storage device.
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}
