use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

// Capacity of the precomputed seek link map, in chain entries.
pub const LINK_TABLE_LEN: usize = 1024;

/// The filesystem side of an image handle. On the real device images live
/// on a FAT volume; the emulator consumes it through this narrow contract:
/// positioned byte IO, the total size, and an optional link map that makes
/// random seeks cheap.
pub trait Backing: Read + Write + Seek + Send {
    /// Total image size in bytes.
    fn size(&self) -> u64;

    /// Precompute a seek link map. The default has nothing to build.
    fn build_link_map(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// An image in a flat host file. Flat files already seek in constant time,
/// so the default (empty) link map applies.
pub struct HostBacking {
    file: File,
    size: u64,
    read_only: bool,
}

impl HostBacking {
    /// Open an image for reading and writing.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Self::from_file(file, false)
    }

    /// Open an image for reading only.
    pub fn open_read_only(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        Self::from_file(file, true)
    }

    fn from_file(file: File, read_only: bool) -> io::Result<Self> {
        let size = file.metadata()?.len();
        Ok(HostBacking {
            file,
            size,
            read_only,
        })
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }
}

impl Read for HostBacking {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for HostBacking {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Seek for HostBacking {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

impl Backing for HostBacking {
    fn size(&self) -> u64 {
        self.size
    }
}
