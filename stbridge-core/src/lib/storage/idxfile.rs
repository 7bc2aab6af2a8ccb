use log::info;
use std::io::{self, Seek, SeekFrom};
use std::time::Instant;

use super::backing::Backing;
use crate::BLOCK_SIZE;

/// An open image with an optional fast-seek index. Big images on a badly
/// fragmented volume seek slowly without one; the index is built once after
/// open and failure to build it only costs speed.
pub struct IdxFile {
    backing: Box<dyn Backing>,
    blocks: u32,
    indexed: bool,
}

impl IdxFile {
    /// Take ownership of a backing and capture its capacity.
    pub fn open(backing: impl Backing + 'static) -> Self {
        let blocks = (backing.size() / BLOCK_SIZE as u64) as u32;
        IdxFile {
            backing: Box::new(backing),
            blocks,
            indexed: false,
        }
    }

    /// Build the fast-seek index. Failure is not fatal: the image stays
    /// usable with slower seeks.
    pub fn build_index(&mut self) {
        let start = Instant::now();
        match self.backing.build_link_map() {
            Ok(()) => {
                self.indexed = true;
                info!("Seek index created in {} ms.",
                      start.elapsed().as_millis());
            }
            Err(e) => {
                self.indexed = false;
                info!("Indexing error: {}, continuing without index.", e);
            }
        }
    }

    pub fn indexed(&self) -> bool {
        self.indexed
    }

    /// Capacity in 512-byte blocks.
    pub fn blocks(&self) -> u32 {
        self.blocks
    }

    /// Total size in bytes.
    pub fn size(&self) -> u64 {
        self.backing.size()
    }

    /// Position at a block address.
    pub fn seek(&mut self, lba: u32) -> io::Result<()> {
        self.backing
            .seek(SeekFrom::Start(lba as u64 * BLOCK_SIZE as u64))?;
        Ok(())
    }

    /// Fill `buf` from the current position.
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.backing.read_exact(buf)
    }

    /// Write all of `buf` at the current position.
    pub fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        self.backing.write_all(buf)
    }
}
