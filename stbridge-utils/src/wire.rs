use std::io::{self, Read, Write};

/// Read big-endian integers directly from a stream.
pub trait ReadBE: Read {
    fn read_u8(&mut self) -> Result<u8, io::Error>;
    fn read_be_u16(&mut self) -> Result<u16, io::Error>;
    fn read_be_u32(&mut self) -> Result<u32, io::Error>;
    /// Read exactly `len` raw bytes into a fresh buffer.
    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, io::Error>;
}

/// Everything that implements Read can also implement ReadBE.
impl<T: Read> ReadBE for T {
    fn read_u8(&mut self) -> Result<u8, io::Error> {
        let mut buf = [0; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_be_u16(&mut self) -> Result<u16, io::Error> {
        let mut buf = [0; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    fn read_be_u32(&mut self) -> Result<u32, io::Error> {
        let mut buf = [0; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, io::Error> {
        let mut buf = vec![0; len];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// Write big-endian integers directly to a stream.
pub trait WriteBE: Write {
    fn write_u8(&mut self, val: u8) -> io::Result<()>;
    fn write_be_u16(&mut self, val: u16) -> io::Result<()>;
    fn write_be_u32(&mut self, val: u32) -> io::Result<()>;
}

/// Everything that implements Write can also implement WriteBE.
impl<T: Write> WriteBE for T {
    fn write_u8(&mut self, val: u8) -> io::Result<()> {
        let buf = [val];
        self.write_all(&buf)
    }

    fn write_be_u16(&mut self, val: u16) -> io::Result<()> {
        let buf = val.to_be_bytes();
        self.write_all(&buf)
    }

    fn write_be_u32(&mut self, val: u32) -> io::Result<()> {
        let buf = val.to_be_bytes();
        self.write_all(&buf)
    }
}
