use log::trace;

use super::link_interface::*;
use crate::BLOCK_SIZE;

/// Framing layer for the FPGA link. Every exchange between the front-end
/// and the core goes through here; each method produces exactly one
/// select/deselect bracketed frame.
pub struct FpgaLink<B> {
    bus: B,
    core: CoreKind,
    transfer_speed: u8,
}

impl<B: SpiBus> FpgaLink<B> {
    pub fn new(bus: B, core: CoreKind) -> Self {
        FpgaLink {
            bus,
            core,
            transfer_speed: SPI_SPEED_SDC,
        }
    }

    pub fn core(&self) -> CoreKind {
        self.core
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Select the clock used for subsequent bulk transfers. Only takes
    /// effect on core kinds that switch clocks at all.
    pub fn set_transfer_speed(&mut self, divider: u8) {
        self.transfer_speed = divider;
    }

    /// Point the core's memory port at an address. `blocks` hints how many
    /// 512-byte blocks the following transfer covers; `read_back` marks the
    /// transfer direction as core-to-host.
    pub fn set_address(&mut self, address: u32, blocks: u8, read_back: bool) {
        let mut addr = address;
        if read_back {
            addr |= 0x0100_0000;
        }
        // The port is word-addressed.
        addr >>= 1;

        self.bus.select();
        self.bus.xfer(LINK_SET_ADDRESS);
        self.bus.xfer(blocks);
        self.bus.xfer((addr >> 16) as u8);
        self.bus.xfer((addr >> 8) as u8);
        self.bus.xfer(addr as u8);
        self.bus.deselect();
    }

    /// Push the system control word.
    pub fn set_control(&mut self, word: u32) {
        trace!("link: set control {:#010x}", word);
        self.bus.select();
        self.bus.xfer(LINK_SET_CONTROL);
        self.bus.write_bytes(&word.to_be_bytes());
        self.bus.deselect();
    }

    /// Push both video adjust values.
    pub fn set_video_adjust(&mut self, h: u8, v: u8) {
        self.bus.select();
        self.bus.xfer(LINK_SET_VADJ);
        self.bus.xfer(h);
        self.bus.xfer(v);
        self.bus.deselect();
    }

    /// Poll the DMA status block. The caller supplies a slice sized for the
    /// core kind in use.
    pub fn get_dma_state(&mut self, block: &mut [u8]) {
        self.bus.select();
        self.bus.xfer(LINK_GET_DMASTATE);
        self.bus.read_bytes(block);
        self.bus.deselect();
    }

    /// Complete the pending request with the given status byte, raising an
    /// interrupt in the core.
    pub fn ack_dma(&mut self, status: u8) {
        trace!("link: ack dma, status {:#04x}", status);
        self.bus.select();
        self.bus.xfer(LINK_ACK_DMA);
        self.bus.xfer(status);
        self.bus.deselect();
    }

    /// Complete the pending request without raising an interrupt.
    pub fn nak_dma(&mut self) {
        trace!("link: nak dma");
        self.bus.select();
        self.bus.xfer(LINK_NAK_DMA);
        self.bus.deselect();
    }

    /// Write words into core memory at the current port address. The length
    /// must be even.
    pub fn memory_write(&mut self, data: &[u8]) {
        debug_assert_eq!(data.len() % 2, 0, "memory transfers are word-sized");
        let saved = self.enter_transfer_speed();
        self.bus.select();
        self.bus.xfer(LINK_WRITE_MEMORY);
        self.bus.write_bytes(data);
        self.bus.deselect();
        self.leave_transfer_speed(saved);
    }

    /// Read words from core memory at the current port address. The length
    /// must be even.
    pub fn memory_read(&mut self, data: &mut [u8]) {
        debug_assert_eq!(data.len() % 2, 0, "memory transfers are word-sized");
        self.bus.select();
        self.bus.xfer(LINK_READ_MEMORY);
        self.bus.read_bytes(data);
        self.bus.deselect();
    }

    /// Write exactly one block into core memory.
    pub fn memory_write_block(&mut self, block: &[u8]) {
        debug_assert_eq!(block.len(), BLOCK_SIZE);
        self.bus.select();
        self.bus.xfer(LINK_WRITE_MEMORY);
        self.bus.write_bytes(block);
        self.bus.deselect();
    }

    /// Read exactly one block from core memory.
    pub fn memory_read_block(&mut self, block: &mut [u8]) {
        debug_assert_eq!(block.len(), BLOCK_SIZE);
        let saved = self.enter_transfer_speed();
        self.bus.select();
        self.bus.xfer(LINK_READ_MEMORY);
        self.bus.read_bytes(block);
        self.bus.deselect();
        self.leave_transfer_speed(saved);
    }

    /// Switch the bus to the transfer clock, returning the divider to
    /// restore afterwards. Core kinds other than Mistery run the whole link
    /// at one clock, so this is a no-op for them.
    pub(crate) fn enter_transfer_speed(&mut self) -> u8 {
        let saved = self.bus.speed();
        if self.core == CoreKind::Mistery {
            self.bus.set_speed(self.transfer_speed);
        }
        saved
    }

    pub(crate) fn leave_transfer_speed(&mut self, saved: u8) {
        if self.core == CoreKind::Mistery {
            self.bus.set_speed(saved);
        }
    }
}
