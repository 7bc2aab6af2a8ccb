use std::collections::VecDeque;

use super::link_interface::*;

// Byte-addressable memory carried by the model. Power of two so the port
// pointer can wrap cheaply.
const MODEL_RAM_SIZE: usize = 4 << 20;

/// A memory port address recorded by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortAddress {
    pub address: u32,
    pub blocks: u8,
    pub read_back: bool,
}

/// Decoder state for the frame in progress.
enum Frame {
    Opcode,
    SetAddress { got: [u8; 4], n: usize },
    WriteMemory,
    ReadMemory,
    SetControl { got: [u8; 4], n: usize },
    GetDmaState { block: [u8; DMA_STATUS_MAX], pos: usize },
    AckDma,
    SetVadj { got: [u8; 2], n: usize },
    Done,
}

/// A software model of the FPGA side of the link. It decodes the same frame
/// opcodes as a real core, serves queued DMA status blocks, and records
/// everything the front-end sends so tests and the harness binary can
/// inspect the conversation.
pub struct ModelBus {
    ram: Vec<u8>,
    ptr: usize,
    selected: bool,
    frame: Frame,
    status_queue: VecDeque<[u8; DMA_STATUS_MAX]>,
    acks: Vec<u8>,
    naks: usize,
    controls: Vec<u32>,
    addresses: Vec<PortAddress>,
    video_adjusts: Vec<(u8, u8)>,
    speed: u8,
    speed_trace: Vec<u8>,
}

impl ModelBus {
    pub fn new() -> Self {
        ModelBus {
            ram: vec![0; MODEL_RAM_SIZE],
            ptr: 0,
            selected: false,
            frame: Frame::Opcode,
            status_queue: VecDeque::new(),
            acks: Vec::new(),
            naks: 0,
            controls: Vec::new(),
            addresses: Vec::new(),
            video_adjusts: Vec::new(),
            speed: SPI_SPEED_SDC,
            speed_trace: Vec::new(),
        }
    }

    /// Queue a DMA status block to be served by the next status poll. Blocks
    /// shorter than the maximum are zero-padded.
    pub fn queue_status(&mut self, data: &[u8]) {
        assert!(data.len() <= DMA_STATUS_MAX);
        let mut block = [0; DMA_STATUS_MAX];
        block[..data.len()].copy_from_slice(data);
        self.status_queue.push_back(block);
    }

    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    pub fn ram_mut(&mut self) -> &mut [u8] {
        &mut self.ram
    }

    /// All request completion statuses seen so far.
    pub fn acks(&self) -> &[u8] {
        &self.acks
    }

    pub fn last_ack(&self) -> Option<u8> {
        self.acks.last().copied()
    }

    /// Number of completions that did not raise an interrupt.
    pub fn nak_count(&self) -> usize {
        self.naks
    }

    pub fn controls(&self) -> &[u32] {
        &self.controls
    }

    pub fn last_control(&self) -> Option<u32> {
        self.controls.last().copied()
    }

    pub fn addresses(&self) -> &[PortAddress] {
        &self.addresses
    }

    pub fn video_adjusts(&self) -> &[(u8, u8)] {
        &self.video_adjusts
    }

    /// Every clock divider change, in order.
    pub fn speed_trace(&self) -> &[u8] {
        &self.speed_trace
    }

    fn begin_frame(&mut self, opcode: u8) {
        self.frame = match opcode {
            LINK_SET_ADDRESS => Frame::SetAddress { got: [0; 4], n: 0 },
            LINK_WRITE_MEMORY => Frame::WriteMemory,
            LINK_READ_MEMORY => Frame::ReadMemory,
            LINK_SET_CONTROL => Frame::SetControl { got: [0; 4], n: 0 },
            LINK_GET_DMASTATE => {
                let block = self.status_queue.pop_front()
                    .unwrap_or([0; DMA_STATUS_MAX]);
                Frame::GetDmaState { block, pos: 0 }
            }
            LINK_ACK_DMA => Frame::AckDma,
            LINK_SET_VADJ => Frame::SetVadj { got: [0; 2], n: 0 },
            LINK_NAK_DMA => {
                self.naks += 1;
                Frame::Done
            }
            _ => panic!("unknown link opcode {:#04x}", opcode),
        };
    }
}

impl Default for ModelBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SpiBus for ModelBus {
    fn select(&mut self) {
        assert!(!self.selected, "nested select");
        self.selected = true;
        self.frame = Frame::Opcode;
    }

    fn deselect(&mut self) {
        assert!(self.selected, "deselect while idle");
        self.selected = false;
    }

    fn xfer(&mut self, byte: u8) -> u8 {
        assert!(self.selected, "transfer while deselected");
        match &mut self.frame {
            Frame::Opcode => {
                self.begin_frame(byte);
                0
            }
            Frame::SetAddress { got, n } => {
                got[*n] = byte;
                *n += 1;
                if *n == got.len() {
                    let word = (got[1] as u32) << 16
                        | (got[2] as u32) << 8
                        | got[3] as u32;
                    self.ptr = ((word & 0x007f_ffff) << 1) as usize;
                    self.addresses.push(PortAddress {
                        address: self.ptr as u32,
                        blocks: got[0],
                        read_back: word & 0x0080_0000 != 0,
                    });
                    self.frame = Frame::Done;
                }
                0
            }
            Frame::WriteMemory => {
                let i = self.ptr & (MODEL_RAM_SIZE - 1);
                self.ram[i] = byte;
                self.ptr += 1;
                0
            }
            Frame::ReadMemory => {
                let i = self.ptr & (MODEL_RAM_SIZE - 1);
                self.ptr += 1;
                self.ram[i]
            }
            Frame::SetControl { got, n } => {
                got[*n] = byte;
                *n += 1;
                if *n == got.len() {
                    self.controls.push(u32::from_be_bytes(*got));
                    self.frame = Frame::Done;
                }
                0
            }
            Frame::GetDmaState { block, pos } => {
                let out = if *pos < block.len() { block[*pos] } else { 0 };
                *pos += 1;
                out
            }
            Frame::AckDma => {
                self.acks.push(byte);
                self.frame = Frame::Done;
                0
            }
            Frame::SetVadj { got, n } => {
                got[*n] = byte;
                *n += 1;
                if *n == got.len() {
                    self.video_adjusts.push((got[0], got[1]));
                    self.frame = Frame::Done;
                }
                0
            }
            Frame::Done => 0,
        }
    }

    fn speed(&self) -> u8 {
        self.speed
    }

    fn set_speed(&mut self, divider: u8) {
        self.speed = divider;
        self.speed_trace.push(divider);
    }
}
