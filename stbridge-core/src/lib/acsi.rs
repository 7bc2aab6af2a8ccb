use log::{debug, error};
use std::io;

use crate::front::{DeviceMap, SLOT_HDD_0};
use crate::link::{CoreKind, FpgaLink, SpiBus};
use crate::storage::SdCard;
use crate::BLOCK_SIZE;

// Request completion statuses.
pub const ACK_OK: u8 = 0x00;
pub const ACK_CHECK_CONDITION: u8 = 0x02;

// Additional sense codes reported by Request Sense.
pub const SENSE_NONE: u8 = 0x00;
pub const SENSE_INVALID_COMMAND: u8 = 0x20;
pub const SENSE_LBA_OUT_OF_RANGE: u8 = 0x21;
pub const SENSE_INVALID_LUN: u8 = 0x25;

// The supported command opcodes.
const CMD_TEST_DRIVE_READY: u8 = 0x00;
const CMD_REQUEST_SENSE: u8 = 0x03;
const CMD_FORMAT_DRIVE: u8 = 0x04;
const CMD_READ_SECTOR: u8 = 0x08;
const CMD_WRITE_SECTOR: u8 = 0x0a;
const CMD_INQUIRY: u8 = 0x12;
const CMD_MODE_SENSE: u8 = 0x1a;
const CMD_READ_CAPACITY: u8 = 0x25;
const CMD_READ_10: u8 = 0x28;
const CMD_WRITE_10: u8 = 0x2a;

/// Display names for the classic command set.
const COMMAND_NAMES: [&str; 0x2c] = [
    "Test Drive Ready", "Restore to Zero", "Cmd $2", "Request Sense",
    "Format Drive", "Read Block Limits", "Reassign Blocks", "Cmd $7",
    "Read Sector", "Cmd $9", "Write Sector", "Seek Block",
    "Cmd $C", "Cmd $D", "Cmd $E", "Cmd $F",
    "Cmd $10", "Cmd $11", "Inquiry", "Verify",
    "Cmd $14", "Mode Select", "Cmd $16", "Cmd $17",
    "Cmd $18", "Cmd $19", "Mode Sense", "Start/Stop Unit",
    "Cmd $1C", "Cmd $1D", "Cmd $1E", "Cmd $1F",
    "Cmd $20", "Cmd $21", "Cmd $22", "Read Format Capacities",
    "Cmd $24", "Read Capacity (10)", "Cmd $26", "Cmd $27",
    "Read (10)", "Read Generation", "Write (10)", "Seek (10)",
];

fn command_name(cmd: u8) -> &'static str {
    COMMAND_NAMES.get(cmd as usize).copied().unwrap_or("Unknown")
}

/// A decoded ACSI command block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcsiRequest {
    pub target: usize,
    pub lun: u8,
    pub cmd: u8,
    pub lba: u32,
    pub count: u16,
}

impl AcsiRequest {
    /// Decode an 11-byte request view: bytes 0-9 carry the command block,
    /// byte 10 the target field.
    pub fn decode(frame: &[u8]) -> Self {
        let cmd = frame[0];
        let mut lba = (frame[1] as u32 & 0x1f) << 16
            | (frame[2] as u32) << 8
            | frame[3] as u32;
        // A zero count means 256 in the classic 6-byte commands.
        let mut count = match frame[4] {
            0 => 256,
            n => n as u16,
        };
        // The 10-byte variants carry the address and count elsewhere.
        if cmd == CMD_READ_10 || cmd == CMD_WRITE_10 {
            lba = u32::from_be_bytes([frame[2], frame[3], frame[4], frame[5]]);
            count = (frame[7] as u16) << 8 | frame[8] as u16;
        }
        AcsiRequest {
            target: (frame[10] >> 5) as usize,
            lun: frame[1] >> 5,
            cmd,
            lba,
            count,
        }
    }
}

/// The ACSI hard-disk emulator: the per-target sense state plus the command
/// dispatch. Every serviced request ends in exactly one completion frame.
pub struct AcsiEmulator {
    sense: [u8; 2],
}

impl AcsiEmulator {
    pub fn new() -> Self {
        AcsiEmulator {
            sense: [SENSE_NONE; 2],
        }
    }

    /// The pending additional sense code for a target.
    pub fn sense(&self, target: usize) -> u8 {
        self.sense[target]
    }

    /// Service one pending ACSI request.
    pub fn handle<B: SpiBus>(
        &mut self,
        frame: &[u8],
        link: &mut FpgaLink<B>,
        devices: &mut DeviceMap,
        mut card: Option<&mut (dyn SdCard + '_)>,
        direct_blocks: u32,
        buffer: &mut [u8],
    ) {
        let req = AcsiRequest::decode(frame);
        debug!("ACSI: target {}.{}, \"{}\" ({:#04x})",
               req.target, req.lun, command_name(req.cmd), req.cmd);
        debug!("ACSI: lba {} ({:#x}), count {}", req.lba, req.lba, req.count);

        // Only a hard disk on target 0/1 with an image is serviced; target 0
        // also answers when direct-SD mode is active.
        let direct = direct_blocks != 0 && req.target == 0;
        let serviced = (req.target < 2
            && devices.inserted(SLOT_HDD_0 + req.target))
            || direct;
        if !serviced {
            debug!("ACSI: request for unsupported target");
            // Tell the DMA state machine we are done, without raising an
            // interrupt.
            link.nak_dma();
            return;
        }

        // In direct mode the raw card dictates the capacity.
        let blocks = if direct {
            direct_blocks
        } else {
            devices.blocks(SLOT_HDD_0 + req.target)
        };

        match req.cmd {
            CMD_TEST_DRIVE_READY | CMD_FORMAT_DRIVE => {
                if req.lun == 0 {
                    self.sense[req.target] = SENSE_NONE;
                    link.ack_dma(ACK_OK);
                } else {
                    self.sense[req.target] = SENSE_INVALID_LUN;
                    link.ack_dma(ACK_CHECK_CONDITION);
                }
            }
            CMD_REQUEST_SENSE => self.request_sense(&req, link, buffer),
            CMD_READ_SECTOR | CMD_READ_10 => {
                self.read(&req, link, devices, &mut card, direct, blocks,
                          buffer)
            }
            CMD_WRITE_SECTOR | CMD_WRITE_10 => {
                self.write(&req, link, devices, &mut card, direct, blocks,
                           buffer)
            }
            CMD_INQUIRY => self.inquiry(&req, link, devices, direct, buffer),
            CMD_MODE_SENSE => self.mode_sense(&req, link, blocks, buffer),
            CMD_READ_CAPACITY => {
                self.read_capacity(&req, link, blocks, buffer)
            }
            _ => {
                debug!("ACSI: unsupported command");
                self.sense[req.target] = SENSE_INVALID_COMMAND;
                link.ack_dma(ACK_CHECK_CONDITION);
            }
        }
    }

    /// Report and clear the pending sense state. Always succeeds, even for
    /// an unsupported logical unit.
    fn request_sense<B: SpiBus>(
        &mut self,
        req: &AcsiRequest,
        link: &mut FpgaLink<B>,
        buffer: &mut [u8],
    ) {
        if req.lun != 0 {
            self.sense[req.target] = SENSE_INVALID_LUN;
        }

        let buf = &mut buffer[..BLOCK_SIZE];
        buf.fill(0);
        buf[7] = 0x0b; // additional sense length
        if self.sense[req.target] != SENSE_NONE {
            buf[2] = 0x05; // illegal request
            buf[12] = self.sense[req.target];
        }
        link.memory_write(&buf[..18]);
        link.ack_dma(ACK_OK);
        self.sense[req.target] = SENSE_NONE;
    }

    fn read<B: SpiBus>(
        &mut self,
        req: &AcsiRequest,
        link: &mut FpgaLink<B>,
        devices: &mut DeviceMap,
        card: &mut Option<&mut (dyn SdCard + '_)>,
        direct: bool,
        blocks: u32,
        buffer: &mut [u8],
    ) {
        if req.lun != 0 {
            self.sense[req.target] = SENSE_INVALID_LUN;
            link.ack_dma(ACK_CHECK_CONDITION);
            return;
        }
        if req.lba as u64 + req.count as u64 > blocks as u64 {
            debug!("ACSI: read ({}+{}) exceeds device limits ({})",
                   req.lba, req.count, blocks);
            self.sense[req.target] = SENSE_LBA_OUT_OF_RANGE;
            link.ack_dma(ACK_CHECK_CONDITION);
            return;
        }

        let result = if link.core() == CoreKind::Mistery {
            read_streamed(req, link, devices, card, direct)
        } else {
            read_buffered(req, link, devices, card, direct, buffer)
        };
        match result {
            Ok(()) => {
                self.sense[req.target] = SENSE_NONE;
                link.ack_dma(ACK_OK);
            }
            Err(e) => {
                error!("ACSI: read failed at target {}: {}", req.target, e);
                self.sense[req.target] = SENSE_INVALID_COMMAND;
                link.ack_dma(ACK_CHECK_CONDITION);
            }
        }
    }

    fn write<B: SpiBus>(
        &mut self,
        req: &AcsiRequest,
        link: &mut FpgaLink<B>,
        devices: &mut DeviceMap,
        card: &mut Option<&mut (dyn SdCard + '_)>,
        direct: bool,
        blocks: u32,
        buffer: &mut [u8],
    ) {
        if req.lun != 0 {
            self.sense[req.target] = SENSE_INVALID_LUN;
            link.ack_dma(ACK_CHECK_CONDITION);
            return;
        }
        if req.lba as u64 + req.count as u64 > blocks as u64 {
            debug!("ACSI: write ({}+{}) exceeds device limits ({})",
                   req.lba, req.count, blocks);
            self.sense[req.target] = SENSE_LBA_OUT_OF_RANGE;
            link.ack_dma(ACK_CHECK_CONDITION);
            return;
        }

        match write_buffered(req, link, devices, card, direct, buffer) {
            Ok(()) => {
                self.sense[req.target] = SENSE_NONE;
                link.ack_dma(ACK_OK);
            }
            Err(e) => {
                error!("ACSI: write failed at target {}: {}", req.target, e);
                self.sense[req.target] = SENSE_INVALID_COMMAND;
                link.ack_dma(ACK_CHECK_CONDITION);
            }
        }
    }

    fn inquiry<B: SpiBus>(
        &mut self,
        req: &AcsiRequest,
        link: &mut FpgaLink<B>,
        devices: &DeviceMap,
        direct: bool,
        buffer: &mut [u8],
    ) {
        if direct {
            debug!("ACSI: inquiry direct");
        } else {
            debug!("ACSI: inquiry target {}", req.target);
        }

        let buf = &mut buffer[..BLOCK_SIZE];
        buf.fill(0);
        buf[2] = 2; // SCSI-2
        buf[4] = req.count.wrapping_sub(5) as u8; // allocation length echo
        buf[8..16].copy_from_slice(b"STBRIDGE"); // vendor
        buf[16..32].fill(b' ');
        let label = if direct {
            "SD DIRECT"
        } else {
            devices.label(SLOT_HDD_0 + req.target)
        };
        let n = label.len().min(16);
        buf[16..16 + n].copy_from_slice(&label.as_bytes()[..n]);
        buf[32..36].copy_from_slice(b"ATA "); // product revision
        let version = env!("CARGO_PKG_VERSION").as_bytes();
        let n = version.len().min(8);
        buf[36..36 + n].copy_from_slice(&version[..n]);
        buf[36 + n..44].fill(b' ');
        if req.lun != 0 {
            buf[0] = 0x7f; // no device on this logical unit
        }

        link.memory_write(&buf[..(req.count as usize / 2) * 2]);
        link.ack_dma(ACK_OK);
        self.sense[req.target] = SENSE_NONE;
    }

    fn mode_sense<B: SpiBus>(
        &mut self,
        req: &AcsiRequest,
        link: &mut FpgaLink<B>,
        blocks: u32,
        buffer: &mut [u8],
    ) {
        if req.lun != 0 {
            self.sense[req.target] = SENSE_INVALID_LUN;
            link.ack_dma(ACK_CHECK_CONDITION);
            return;
        }
        debug!("ACSI: mode sense, blocks = {}", blocks);

        let buf = &mut buffer[..BLOCK_SIZE];
        buf.fill(0);
        buf[3] = 8; // size of the extent descriptor list
        buf[5] = (blocks >> 16) as u8;
        buf[6] = (blocks >> 8) as u8;
        buf[7] = blocks as u8;
        buf[10] = 2; // block size 512, middle byte
        link.memory_write(&buf[..(req.count as usize / 2) * 2]);
        link.ack_dma(ACK_OK);
        self.sense[req.target] = SENSE_NONE;
    }

    fn read_capacity<B: SpiBus>(
        &mut self,
        req: &AcsiRequest,
        link: &mut FpgaLink<B>,
        blocks: u32,
        buffer: &mut [u8],
    ) {
        if req.lun != 0 {
            self.sense[req.target] = SENSE_INVALID_LUN;
            link.ack_dma(ACK_CHECK_CONDITION);
            return;
        }

        let buf = &mut buffer[..BLOCK_SIZE];
        buf.fill(0);
        buf[..4].copy_from_slice(&blocks.wrapping_sub(1).to_be_bytes());
        buf[6] = 2; // block size 512
        link.memory_write(&buf[..8]);
        link.ack_dma(ACK_OK);
        self.sense[req.target] = SENSE_NONE;
    }
}

impl Default for AcsiEmulator {
    fn default() -> Self {
        Self::new()
    }
}

fn no_source() -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, "no storage behind target")
}

/// Move one run of blocks from storage into the chunk buffer.
fn fill_from_storage(
    devices: &mut DeviceMap,
    card: &mut Option<&mut (dyn SdCard + '_)>,
    direct: bool,
    slot: usize,
    lba: u32,
    buf: &mut [u8],
) -> io::Result<()> {
    if direct {
        debug!("ACSI: direct read {}", lba);
        let card = card.as_deref_mut().ok_or_else(no_source)?;
        card.read_blocks(lba, buf)
    } else {
        let image = devices.image_mut(slot).ok_or_else(no_source)?;
        image.seek(lba)?;
        image.read(buf)
    }
}

/// Move one run of blocks from the chunk buffer into storage.
fn drain_to_storage(
    devices: &mut DeviceMap,
    card: &mut Option<&mut (dyn SdCard + '_)>,
    direct: bool,
    slot: usize,
    lba: u32,
    buf: &[u8],
) -> io::Result<()> {
    if direct {
        debug!("ACSI: direct write {}", lba);
        let card = card.as_deref_mut().ok_or_else(no_source)?;
        card.write_blocks(lba, buf)
    } else {
        let image = devices.image_mut(slot).ok_or_else(no_source)?;
        image.seek(lba)?;
        image.write(buf)
    }
}

/// Read path staged through the chunk buffer: fill from storage, push one
/// memory-write frame per chunk.
fn read_buffered<B: SpiBus>(
    req: &AcsiRequest,
    link: &mut FpgaLink<B>,
    devices: &mut DeviceMap,
    card: &mut Option<&mut (dyn SdCard + '_)>,
    direct: bool,
    buffer: &mut [u8],
) -> io::Result<()> {
    let slot = SLOT_HDD_0 + req.target;
    let chunk_blocks = buffer.len() / BLOCK_SIZE;
    let mut lba = req.lba;
    let mut remaining = req.count as usize;
    while remaining > 0 {
        let chunk = remaining.min(chunk_blocks);
        let buf = &mut buffer[..chunk * BLOCK_SIZE];
        fill_from_storage(devices, card, direct, slot, lba, buf)?;
        link.memory_write(buf);
        remaining -= chunk;
        lba += chunk as u32;
    }
    Ok(())
}

/// Read path for cores with a fast transfer clock: raise the clock once and
/// move block by block straight out, without staging through the shared
/// buffer.
fn read_streamed<B: SpiBus>(
    req: &AcsiRequest,
    link: &mut FpgaLink<B>,
    devices: &mut DeviceMap,
    card: &mut Option<&mut (dyn SdCard + '_)>,
    direct: bool,
) -> io::Result<()> {
    let saved = link.enter_transfer_speed();
    let result = stream_blocks(req, link, devices, card, direct);
    link.leave_transfer_speed(saved);
    result
}

fn stream_blocks<B: SpiBus>(
    req: &AcsiRequest,
    link: &mut FpgaLink<B>,
    devices: &mut DeviceMap,
    card: &mut Option<&mut (dyn SdCard + '_)>,
    direct: bool,
) -> io::Result<()> {
    let mut block = [0u8; BLOCK_SIZE];
    if direct {
        debug!("ACSI: direct read {}", req.lba);
        let card = card.as_deref_mut().ok_or_else(no_source)?;
        for n in 0..req.count as u32 {
            card.read_blocks(req.lba + n, &mut block)?;
            link.memory_write_block(&block);
        }
    } else {
        let image = devices
            .image_mut(SLOT_HDD_0 + req.target)
            .ok_or_else(no_source)?;
        image.seek(req.lba)?;
        for _ in 0..req.count {
            image.read(&mut block)?;
            link.memory_write_block(&block);
        }
    }
    Ok(())
}

/// Write path: pull one memory-read frame per block into the chunk buffer,
/// then drain the chunk to storage.
fn write_buffered<B: SpiBus>(
    req: &AcsiRequest,
    link: &mut FpgaLink<B>,
    devices: &mut DeviceMap,
    card: &mut Option<&mut (dyn SdCard + '_)>,
    direct: bool,
    buffer: &mut [u8],
) -> io::Result<()> {
    let slot = SLOT_HDD_0 + req.target;
    let chunk_blocks = buffer.len() / BLOCK_SIZE;
    let mut lba = req.lba;
    let mut remaining = req.count as usize;
    while remaining > 0 {
        let chunk = remaining.min(chunk_blocks);
        let buf = &mut buffer[..chunk * BLOCK_SIZE];
        for block in buf.chunks_mut(BLOCK_SIZE) {
            link.memory_read_block(block);
        }
        drain_to_storage(devices, card, direct, slot, lba, buf)?;
        remaining -= chunk;
        lba += chunk as u32;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::front::SECTOR_BUFFER_SIZE;
    use crate::init_test_logging;
    use crate::link::ModelBus;
    use crate::storage::{ChainBacking, IdxFile, MemCard};

    /// Build an 11-byte request view for a classic 6-byte command.
    fn frame6(target: u8, cmd: u8, lun: u8, lba: u32, count: u8) -> [u8; 11] {
        let mut frame = [0u8; 11];
        frame[0] = cmd;
        frame[1] = lun << 5 | ((lba >> 16) & 0x1f) as u8;
        frame[2] = (lba >> 8) as u8;
        frame[3] = lba as u8;
        frame[4] = count;
        frame[10] = target << 5;
        frame
    }

    /// Build an 11-byte request view for a 10-byte command.
    fn frame10(target: u8, cmd: u8, lba: u32, count: u16) -> [u8; 11] {
        let mut frame = [0u8; 11];
        frame[0] = cmd;
        frame[2..6].copy_from_slice(&lba.to_be_bytes());
        frame[7] = (count >> 8) as u8;
        frame[8] = count as u8;
        frame[10] = target << 5;
        frame
    }

    /// An image whose block n is filled with byte n.
    fn patterned(blocks: usize) -> Vec<u8> {
        let mut data = vec![0u8; blocks * BLOCK_SIZE];
        for (n, block) in data.chunks_mut(BLOCK_SIZE).enumerate() {
            block.fill(n as u8);
        }
        data
    }

    struct AcsiFixture {
        link: FpgaLink<ModelBus>,
        devices: DeviceMap,
        acsi: AcsiEmulator,
        buffer: Vec<u8>,
    }

    impl AcsiFixture {
        /// A fixture with a 64-block image on target 0 and nothing else.
        fn new(core: CoreKind) -> Self {
            init_test_logging();
            let mut devices = DeviceMap::new();
            let image = IdxFile::open(ChainBacking::new(patterned(64), 4096));
            devices.insert(SLOT_HDD_0, image, "TEST.HD");
            AcsiFixture {
                link: FpgaLink::new(ModelBus::new(), core),
                devices,
                acsi: AcsiEmulator::new(),
                buffer: vec![0; SECTOR_BUFFER_SIZE],
            }
        }

        fn request(&mut self, frame: &[u8]) {
            self.acsi.handle(frame, &mut self.link, &mut self.devices,
                             None, 0, &mut self.buffer);
        }

        fn request_direct(&mut self, frame: &[u8], card: &mut dyn SdCard,
                          direct_blocks: u32) {
            self.acsi.handle(frame, &mut self.link, &mut self.devices,
                             Some(card), direct_blocks, &mut self.buffer);
        }
    }

    #[test]
    fn test_read_boundary() {
        let mut fx = AcsiFixture::new(CoreKind::Mist);

        // The last addressable run succeeds.
        fx.link.set_address(0, 4, true);
        fx.request(&frame6(0, CMD_READ_SECTOR, 0, 60, 4));
        assert_eq!(fx.link.bus().acks(), [ACK_OK]);
        assert_eq!(fx.acsi.sense(0), SENSE_NONE);
        assert_eq!(fx.link.bus().ram()[3 * BLOCK_SIZE], 63);

        // One block further acks a check condition and records the sense.
        fx.request(&frame6(0, CMD_READ_SECTOR, 0, 61, 4));
        assert_eq!(fx.link.bus().acks(), [ACK_OK, ACK_CHECK_CONDITION]);
        assert_eq!(fx.acsi.sense(0), SENSE_LBA_OUT_OF_RANGE);
    }

    #[test]
    fn test_request_sense_reports_and_clears() {
        let mut fx = AcsiFixture::new(CoreKind::Mist);
        fx.request(&frame6(0, CMD_READ_SECTOR, 0, 64, 1));
        assert_eq!(fx.acsi.sense(0), SENSE_LBA_OUT_OF_RANGE);

        fx.link.set_address(0, 1, true);
        fx.request(&frame6(0, CMD_REQUEST_SENSE, 0, 0, 18));
        assert_eq!(fx.link.bus().last_ack(), Some(ACK_OK));
        let ram = fx.link.bus().ram();
        assert_eq!(ram[2], 0x05);
        assert_eq!(ram[7], 0x0b);
        assert_eq!(ram[12], SENSE_LBA_OUT_OF_RANGE);
        assert_eq!(fx.acsi.sense(0), SENSE_NONE);

        // A second request reports no sense.
        fx.request(&frame6(0, CMD_REQUEST_SENSE, 0, 0, 18));
        assert_eq!(fx.link.bus().ram()[2], 0x00);
        assert_eq!(fx.link.bus().ram()[12], 0x00);
    }

    #[test]
    fn test_absent_target_naks() {
        let mut fx = AcsiFixture::new(CoreKind::Mist);
        fx.request(&frame6(0, CMD_READ_SECTOR, 0, 64, 1));
        let sense_before = fx.acsi.sense(1);

        fx.request(&frame6(1, CMD_TEST_DRIVE_READY, 0, 0, 1));
        assert_eq!(fx.link.bus().nak_count(), 1);
        assert_eq!(fx.link.bus().acks().len(), 1); // only the earlier read
        assert_eq!(fx.acsi.sense(1), sense_before);
    }

    #[test]
    fn test_lun_handling() {
        let mut fx = AcsiFixture::new(CoreKind::Mist);

        fx.request(&frame6(0, CMD_READ_SECTOR, 1, 0, 1));
        assert_eq!(fx.link.bus().last_ack(), Some(ACK_CHECK_CONDITION));
        assert_eq!(fx.acsi.sense(0), SENSE_INVALID_LUN);

        // Inquiry still answers on a bad lun, flagging byte 0.
        fx.link.set_address(0, 1, true);
        fx.request(&frame6(0, CMD_INQUIRY, 1, 0, 48));
        assert_eq!(fx.link.bus().last_ack(), Some(ACK_OK));
        assert_eq!(fx.link.bus().ram()[0], 0x7f);
        assert_eq!(fx.acsi.sense(0), SENSE_NONE);
    }

    #[test]
    fn test_count_zero_reads_256_blocks() {
        init_test_logging();
        let mut devices = DeviceMap::new();
        let image = IdxFile::open(ChainBacking::new(patterned(300), 65536));
        devices.insert(SLOT_HDD_0, image, "BIG.HD");
        let mut link = FpgaLink::new(ModelBus::new(), CoreKind::Mist);
        let mut acsi = AcsiEmulator::new();
        let mut buffer = vec![0; SECTOR_BUFFER_SIZE];

        link.set_address(0, 0, true);
        acsi.handle(&frame6(0, CMD_READ_SECTOR, 0, 0, 0), &mut link,
                    &mut devices, None, 0, &mut buffer);
        assert_eq!(link.bus().last_ack(), Some(ACK_OK));
        // 256 blocks landed: the last one carries the pattern of block 255.
        assert_eq!(link.bus().ram()[255 * BLOCK_SIZE], 255);
        assert_eq!(link.bus().ram()[256 * BLOCK_SIZE], 0);
    }

    #[test]
    fn test_inquiry_layout() {
        let mut fx = AcsiFixture::new(CoreKind::Mist);
        fx.link.set_address(0, 1, true);
        fx.request(&frame6(0, CMD_INQUIRY, 0, 0, 48));

        let ram = fx.link.bus().ram();
        assert_eq!(ram[2], 2);
        assert_eq!(ram[4], 48 - 5);
        assert_eq!(&ram[8..16], b"STBRIDGE");
        assert_eq!(&ram[16..23], b"TEST.HD");
        assert_eq!(ram[23], b' ');
        assert_eq!(&ram[32..36], b"ATA ");
        assert_eq!(fx.link.bus().last_ack(), Some(ACK_OK));
    }

    #[test]
    fn test_mode_sense_layout() {
        let mut fx = AcsiFixture::new(CoreKind::Mist);
        fx.link.set_address(0, 1, true);
        fx.request(&frame6(0, CMD_MODE_SENSE, 0, 0, 16));

        let ram = fx.link.bus().ram();
        assert_eq!(ram[3], 8);
        assert_eq!(ram[5], 0);
        assert_eq!(ram[6], 0);
        assert_eq!(ram[7], 64); // capacity, low byte
        assert_eq!(ram[10], 2);
    }

    #[test]
    fn test_read_capacity_layout() {
        let mut fx = AcsiFixture::new(CoreKind::Mist);
        fx.link.set_address(0, 1, true);
        fx.request(&frame6(0, CMD_READ_CAPACITY, 0, 0, 1));

        let ram = fx.link.bus().ram();
        assert_eq!(&ram[0..4], 63u32.to_be_bytes());
        assert_eq!(ram[6], 2);
        assert_eq!(fx.link.bus().last_ack(), Some(ACK_OK));
    }

    /// A successful command wipes a pending sense code.
    #[test]
    fn test_success_clears_sense() {
        let mut fx = AcsiFixture::new(CoreKind::Mist);
        fx.request(&frame6(0, CMD_READ_SECTOR, 0, 64, 1));
        assert_eq!(fx.acsi.sense(0), SENSE_LBA_OUT_OF_RANGE);

        fx.request(&frame6(0, CMD_TEST_DRIVE_READY, 0, 0, 1));
        assert_eq!(fx.link.bus().last_ack(), Some(ACK_OK));
        assert_eq!(fx.acsi.sense(0), SENSE_NONE);
    }

    #[test]
    fn test_unknown_command() {
        let mut fx = AcsiFixture::new(CoreKind::Mist);
        fx.request(&frame6(0, 0x55, 0, 0, 1));
        assert_eq!(fx.link.bus().last_ack(), Some(ACK_CHECK_CONDITION));
        assert_eq!(fx.acsi.sense(0), SENSE_INVALID_COMMAND);
    }

    #[test]
    fn test_write_lands_in_image() {
        let mut fx = AcsiFixture::new(CoreKind::Mist);

        // Stage the payload in core memory, then ask for a 2-block write.
        fx.link.bus_mut().ram_mut()[0x2000..0x2000 + 2 * BLOCK_SIZE]
            .fill(0x5a);
        fx.link.set_address(0x2000, 2, false);
        fx.request(&frame10(0, CMD_WRITE_10, 10, 2));
        assert_eq!(fx.link.bus().last_ack(), Some(ACK_OK));

        let image = fx.devices.image_mut(SLOT_HDD_0).unwrap();
        let mut buf = [0u8; BLOCK_SIZE];
        image.seek(11).unwrap();
        image.read(&mut buf).unwrap();
        assert_eq!(buf, [0x5a; BLOCK_SIZE]);
        // The neighbouring block is untouched.
        image.seek(12).unwrap();
        image.read(&mut buf).unwrap();
        assert_eq!(buf, [12; BLOCK_SIZE]);
    }

    /// A read on the fast-clock core raises the transfer clock once for the
    /// whole stream and restores it at the end.
    #[test]
    fn test_mistery_read_streams() {
        let mut fx = AcsiFixture::new(CoreKind::Mistery);
        fx.link.set_transfer_speed(crate::link::SPI_SPEED_MMC);

        fx.link.set_address(0, 4, true);
        fx.request(&frame6(0, CMD_READ_SECTOR, 0, 4, 4));
        assert_eq!(fx.link.bus().last_ack(), Some(ACK_OK));
        assert_eq!(fx.link.bus().ram()[0], 4);
        assert_eq!(fx.link.bus().ram()[3 * BLOCK_SIZE], 7);
        assert_eq!(fx.link.bus().speed_trace(),
                   [crate::link::SPI_SPEED_MMC, crate::link::SPI_SPEED_SDC]);
    }

    #[test]
    fn test_direct_mode_routes_to_card() {
        let mut fx = AcsiFixture::new(CoreKind::Mist);
        let mut card = MemCard::new(32);
        card.data_mut()[5 * BLOCK_SIZE..6 * BLOCK_SIZE].fill(0xc3);

        fx.link.set_address(0, 1, true);
        fx.request_direct(&frame6(0, CMD_READ_SECTOR, 0, 5, 1), &mut card,
                          32);
        assert_eq!(fx.link.bus().last_ack(), Some(ACK_OK));
        // The card's bytes arrive, not block 5 of the slot image.
        assert_eq!(fx.link.bus().ram()[0], 0xc3);
    }

    /// Direct mode without a card cannot complete; the request still gets
    /// exactly one completion frame.
    #[test]
    fn test_transfer_failure_acks_check_condition() {
        init_test_logging();
        let mut devices = DeviceMap::new();
        let mut link = FpgaLink::new(ModelBus::new(), CoreKind::Mist);
        let mut acsi = AcsiEmulator::new();
        let mut buffer = vec![0; SECTOR_BUFFER_SIZE];

        acsi.handle(&frame6(0, CMD_READ_SECTOR, 0, 0, 1), &mut link,
                    &mut devices, None, 32, &mut buffer);
        assert_eq!(link.bus().acks(), [ACK_CHECK_CONDITION]);
        assert_eq!(acsi.sense(0), SENSE_INVALID_COMMAND);
    }

    #[test]
    fn test_decode_variants() {
        let req = AcsiRequest::decode(&frame6(1, CMD_READ_SECTOR, 2,
                                              0x1ffff, 0));
        assert_eq!(req.target, 1);
        assert_eq!(req.lun, 2);
        assert_eq!(req.lba, 0x1ffff);
        assert_eq!(req.count, 256);

        let req = AcsiRequest::decode(&frame10(0, CMD_WRITE_10, 0x12345678,
                                               0x0300));
        assert_eq!(req.lba, 0x12345678);
        assert_eq!(req.count, 0x0300);
    }
}
