// Link opcodes: the first byte of every framed exchange selects the
// operation the FPGA side performs for the rest of the frame.
pub const LINK_SET_ADDRESS: u8 = 0x01;
pub const LINK_WRITE_MEMORY: u8 = 0x02;
pub const LINK_READ_MEMORY: u8 = 0x03;
pub const LINK_SET_CONTROL: u8 = 0x04;
pub const LINK_GET_DMASTATE: u8 = 0x05;
pub const LINK_ACK_DMA: u8 = 0x06;
pub const LINK_SET_VADJ: u8 = 0x09;
pub const LINK_NAK_DMA: u8 = 0x0a;

// Bus clock dividers.
pub const SPI_SPEED_SDC: u8 = 2;    // 24 MHz
pub const SPI_SPEED_MMC: u8 = 3;    // 16 MHz

// Largest DMA status block any core kind reports.
pub const DMA_STATUS_MAX: usize = 32;

/// Which FPGA core flavour sits on the other end of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreKind {
    Mist,
    Mistery,
}

impl CoreKind {
    /// Size of the DMA status block this core kind reports.
    pub fn dma_status_len(self) -> usize {
        match self {
            CoreKind::Mist => 32,
            CoreKind::Mistery => 16,
        }
    }
}

/// The SPI controller the link runs over. One implementation talks to real
/// hardware; tests and the harness binary use a software model.
pub trait SpiBus {
    /// Assert the FPGA chip select. Every frame is bracketed by exactly one
    /// select/deselect pair.
    fn select(&mut self);
    fn deselect(&mut self);

    /// Full-duplex single-byte exchange.
    fn xfer(&mut self, byte: u8) -> u8;

    /// Bulk transmit. Implementations may override with a faster path.
    fn write_bytes(&mut self, data: &[u8]) {
        for byte in data {
            self.xfer(*byte);
        }
    }

    /// Bulk receive. Implementations may override with a faster path.
    fn read_bytes(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            *byte = self.xfer(0);
        }
    }

    /// Current bus clock divider.
    fn speed(&self) -> u8;
    fn set_speed(&mut self, divider: u8);
}
