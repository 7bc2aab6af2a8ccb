use log::{debug, error};
use std::io;

use crate::acsi::ACK_OK;
use crate::front::{DeviceMap, Notices};
use crate::link::{FpgaLink, SpiBus};
use crate::BLOCK_SIZE;

// Command class and flag bits of the WD1772 command byte.
const CLASS_MASK: u8 = 0xc0;
const CLASS_SECTOR: u8 = 0x80;
const CLASS_MISC: u8 = 0xc0;
const FLAG_MULTI: u8 = 0x10;

/// A decoded floppy-controller request.
///
/// The drive field counts from 1 (A:) with 0 meaning no drive selected;
/// the selection byte on the wire carries both drive bits active-low and
/// the side flag inverted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdcRequest {
    pub dma_address: u32,
    pub sector_count: u8,
    pub cmd: u8,
    pub track: u8,
    pub sector: u8,
    pub data: u8,
    pub drive: u8,
    pub side: u8,
}

impl FdcRequest {
    /// Decode a 9-byte request view: bytes 0-2 carry the DMA address,
    /// bytes 3-7 the controller registers, byte 8 the drive selection.
    pub fn decode(frame: &[u8]) -> Self {
        FdcRequest {
            dma_address: (frame[0] as u32) << 16
                | (frame[1] as u32) << 8
                | (frame[2] & 0xfe) as u32,
            sector_count: frame[3],
            cmd: frame[4],
            track: frame[5],
            sector: frame[6],
            data: frame[7],
            drive: 3 - ((frame[8] >> 2) & 3),
            side: 1 - ((frame[8] >> 1) & 1),
        }
    }

    /// Type II read or write sector command.
    pub fn is_sector_op(&self) -> bool {
        self.cmd & CLASS_MASK == CLASS_SECTOR
    }

    /// Among the sector ops, reads have bit 5 clear.
    pub fn is_read(&self) -> bool {
        self.cmd & 0xe0 == 0x80
    }

    /// Multi-sector flag: keep transferring until the count runs out.
    pub fn is_multi(&self) -> bool {
        self.cmd & FLAG_MULTI != 0
    }
}

/// Build the drive-selection byte as the core sends it: drive bits
/// active-low, side flag inverted. Inverse of the decode above.
pub fn encode_selection(drive: u8, side: u8) -> u8 {
    ((3 - drive) & 3) << 2 | (1 - side) << 1
}

/// Service one pending floppy request. A request for no drive, or for a
/// drive with no disk, is dropped without any completion; the core's own
/// controller state machine times out on its own.
pub fn handle_request<B: SpiBus>(
    frame: &[u8],
    link: &mut FpgaLink<B>,
    devices: &mut DeviceMap,
    notices: &mut Notices,
    buffer: &mut [u8],
) {
    let req = FdcRequest::decode(frame);

    if req.drive == 0 {
        return;
    }
    let drive = req.drive as usize - 1;
    if !devices.inserted(drive) {
        return;
    }

    if req.is_sector_op() {
        sector_op(&req, drive, link, devices, buffer);
    } else if req.cmd & CLASS_MASK == CLASS_MISC {
        track_op(&req, link, notices);
    }
    // Type I commands (restore, seek, step) never leave the core.
}

/// Read or write a run of sectors between the image and core memory.
fn sector_op<B: SpiBus>(
    req: &FdcRequest,
    drive: usize,
    link: &mut FpgaLink<B>,
    devices: &mut DeviceMap,
    buffer: &mut [u8],
) {
    let geometry = devices.geometry(drive);

    // Map side/track/sector onto the flat image. Sector numbers are
    // 1-based; an out-of-range register wraps harmlessly because the
    // range check below skips every iteration.
    let base = (req.side as u32 + req.track as u32 * geometry.sides as u32)
        * geometry.spt as u32;
    let mut offset = base
        .wrapping_add(req.sector as u32)
        .wrapping_sub(1);

    debug!("FDC: {} request, {} sectors ({}: side {}, track {}, sector {} = {}) -> {:#x}",
           if req.is_multi() { "multi" } else { "single" },
           req.sector_count,
           (b'A' + drive as u8) as char,
           req.side, req.track, req.sector, offset, req.dma_address);

    // The register is checked once: it never changes during the run, even
    // though the offset keeps advancing past track boundaries.
    let in_range = req.sector > 0 && req.sector <= geometry.spt;

    let mut remaining = req.sector_count;
    while remaining > 0 {
        if in_range {
            if let Err(e) = transfer_sector(req, drive, offset, link, devices, buffer) {
                error!("FDC: transfer at offset {} failed: {}", offset, e);
            }
        } else {
            debug!("FDC: sector out of range");
        }

        remaining -= 1;
        offset = offset.wrapping_add(1);
        if !req.is_multi() {
            break;
        }
    }
    link.ack_dma(ACK_OK);
}

fn transfer_sector<B: SpiBus>(
    req: &FdcRequest,
    drive: usize,
    offset: u32,
    link: &mut FpgaLink<B>,
    devices: &mut DeviceMap,
    buffer: &mut [u8],
) -> io::Result<()> {
    let image = devices.image_mut(drive).ok_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "no image behind drive")
    })?;
    let block = &mut buffer[..BLOCK_SIZE];

    image.seek(offset)?;
    if req.is_read() {
        image.read(block)?;
        link.memory_write_block(block);
    } else {
        link.memory_read_block(block);
        image.write(block)?;
    }
    Ok(())
}

/// Type III commands: nothing moves, but track reads and writes surface a
/// notice so the user sees what software tried.
fn track_op<B: SpiBus>(req: &FdcRequest, link: &mut FpgaLink<B>, notices: &mut Notices) {
    if req.cmd & 0xe0 == 0xc0 {
        debug!("FDC: read address");
    }
    if req.cmd & 0xf0 == 0xe0 {
        debug!("FDC: read track {} side {}", req.track, req.side);
        notices.post(format!("RD TRK {} S {}", req.track, req.side));
    }
    if req.cmd & 0xf0 == 0xf0 {
        debug!("FDC: write track {} side {}", req.track, req.side);
        notices.post(format!("WR TRK {} S {}", req.track, req.side));
    }
    debug!("FDC: sector count {}", req.sector_count);
    link.ack_dma(ACK_OK);
}
