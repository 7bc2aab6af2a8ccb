use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::backing::{Backing, LINK_TABLE_LEN};
use super::card::SdCard;
use crate::BLOCK_SIZE;

/// A backing that behaves like a fragmented file on a cluster chain: without
/// a link map, a seek walks the chain from the start, one step per cluster.
/// The step counter is shared out so tests can observe how expensive seeks
/// were.
pub struct ChainBacking {
    data: Cursor<Vec<u8>>,
    cluster_len: u64,
    mapped: bool,
    steps: Arc<AtomicU64>,
}

impl ChainBacking {
    pub fn new(data: Vec<u8>, cluster_len: u64) -> Self {
        ChainBacking {
            data: Cursor::new(data),
            cluster_len,
            mapped: false,
            steps: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A handle on the seek step counter.
    pub fn steps(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.steps)
    }
}

impl Read for ChainBacking {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.data.read(buf)
    }
}

impl Write for ChainBacking {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.data.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.data.flush()
    }
}

impl Seek for ChainBacking {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        if let SeekFrom::Start(offset) = pos {
            let steps = if self.mapped {
                1
            } else {
                offset / self.cluster_len + 1
            };
            self.steps.fetch_add(steps, Ordering::Relaxed);
        }
        self.data.seek(pos)
    }
}

impl Backing for ChainBacking {
    fn size(&self) -> u64 {
        self.data.get_ref().len() as u64
    }

    /// Builds the map only if the whole chain fits the table.
    fn build_link_map(&mut self) -> io::Result<()> {
        let entries = self.data.get_ref().len() / self.cluster_len as usize + 1;
        if entries > LINK_TABLE_LEN {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!(
                    "chain needs {} entries, table holds {}",
                    entries, LINK_TABLE_LEN
                ),
            ));
        }
        self.mapped = true;
        Ok(())
    }
}

/// An in-memory SD card.
pub struct MemCard {
    data: Vec<u8>,
}

impl MemCard {
    pub fn new(blocks: u32) -> Self {
        MemCard {
            data: vec![0; blocks as usize * BLOCK_SIZE],
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn range(&self, lba: u32, len: usize) -> io::Result<std::ops::Range<usize>> {
        let start = lba as usize * BLOCK_SIZE;
        let end = start + len;
        if end > self.data.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "block address beyond card capacity",
            ));
        }
        Ok(start..end)
    }
}

impl SdCard for MemCard {
    fn read_blocks(&mut self, lba: u32, buf: &mut [u8]) -> io::Result<()> {
        let range = self.range(lba, buf.len())?;
        buf.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn write_blocks(&mut self, lba: u32, buf: &[u8]) -> io::Result<()> {
        let range = self.range(lba, buf.len())?;
        self.data[range].copy_from_slice(buf);
        Ok(())
    }

    fn block_count(&mut self) -> io::Result<u32> {
        Ok((self.data.len() / BLOCK_SIZE) as u32)
    }
}
