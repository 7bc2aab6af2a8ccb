use std::fs::OpenOptions;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::BLOCK_SIZE;

/// Raw block access to the SD card the FAT volume lives on. Direct-SD mode
/// exposes the whole card to the core as ACSI target 0, bypassing the
/// filesystem entirely.
pub trait SdCard: Send {
    fn read_blocks(&mut self, lba: u32, buf: &mut [u8]) -> io::Result<()>;
    fn write_blocks(&mut self, lba: u32, buf: &[u8]) -> io::Result<()>;

    /// Total card capacity in blocks.
    fn block_count(&mut self) -> io::Result<u32>;
}

/// A card image or block device node on the host.
pub struct FileCard {
    file: std::fs::File,
}

impl FileCard {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(FileCard { file })
    }
}

impl SdCard for FileCard {
    fn read_blocks(&mut self, lba: u32, buf: &mut [u8]) -> io::Result<()> {
        debug_assert_eq!(buf.len() % BLOCK_SIZE, 0);
        self.file
            .seek(SeekFrom::Start(lba as u64 * BLOCK_SIZE as u64))?;
        self.file.read_exact(buf)
    }

    fn write_blocks(&mut self, lba: u32, buf: &[u8]) -> io::Result<()> {
        debug_assert_eq!(buf.len() % BLOCK_SIZE, 0);
        self.file
            .seek(SeekFrom::Start(lba as u64 * BLOCK_SIZE as u64))?;
        self.file.write_all(buf)
    }

    fn block_count(&mut self) -> io::Result<u32> {
        Ok((self.file.metadata()?.len() / BLOCK_SIZE as u64) as u32)
    }
}
