use itertools::iproduct;
use log::{debug, error, info};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::mpsc::Sender;

use crate::acsi::AcsiEmulator;
use crate::config::FrontConfig;
use crate::error::{FrontError, FrontResult};
use crate::fdc;
use crate::link::{CoreKind, FpgaLink, SpiBus, DMA_STATUS_MAX, SPI_SPEED_MMC};
use crate::storage::{Backing, HostBacking, IdxFile, SdCard};
use crate::BLOCK_SIZE;

/// Size of the shared sector buffer all transfers stage through.
pub const SECTOR_BUFFER_SIZE: usize = 8 * BLOCK_SIZE;

// Fixed slot assignment: two floppy drives, two ACSI units.
pub const SLOT_FLOPPY_A: usize = 0;
pub const SLOT_FLOPPY_B: usize = 1;
pub const SLOT_HDD_0: usize = 2;
pub const SLOT_HDD_1: usize = 3;

// System control word bits owned by the disk subsystem.
pub const CTRL_CPU_RESET: u32 = 1;
pub const CTRL_FDC_WR_PROT_A: u32 = 1 << 6;
pub const CTRL_FDC_WR_PROT_B: u32 = 1 << 7;
pub const CTRL_ACSI0_ENABLE: u32 = 1 << 8;
pub const CTRL_ACSI1_ENABLE: u32 = 1 << 9;

/// Geometry of a mounted floppy image. A drive with no recognised format
/// keeps `spt == 0`, which makes every sector request out of range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloppyGeometry {
    pub sides: u8,
    pub spt: u8,
}

impl Default for FloppyGeometry {
    fn default() -> Self {
        FloppyGeometry { sides: 1, spt: 0 }
    }
}

#[derive(Default)]
struct DeviceSlot {
    image: Option<IdxFile>,
    label: String,
    path: String,
}

/// The four device slots and the floppy drives' geometry. A slot is
/// "inserted" exactly while it holds an open image.
#[derive(Default)]
pub struct DeviceMap {
    slots: [DeviceSlot; 4],
    geometry: [FloppyGeometry; 2],
}

impl DeviceMap {
    pub fn new() -> Self {
        DeviceMap::default()
    }

    pub fn inserted(&self, slot: usize) -> bool {
        self.slots[slot].image.is_some()
    }

    pub fn image_mut(&mut self, slot: usize) -> Option<&mut IdxFile> {
        self.slots[slot].image.as_mut()
    }

    /// Capacity of the slot's image in blocks, 0 when empty.
    pub fn blocks(&self, slot: usize) -> u32 {
        self.slots[slot].image.as_ref().map_or(0, IdxFile::blocks)
    }

    /// File name of the mounted image, for reporting.
    pub fn label(&self, slot: usize) -> &str {
        &self.slots[slot].label
    }

    /// Full path the image was mounted from.
    pub fn path(&self, slot: usize) -> &str {
        &self.slots[slot].path
    }

    pub fn insert(&mut self, slot: usize, image: IdxFile, path: impl AsRef<Path>) {
        let path = path.as_ref();
        self.slots[slot] = DeviceSlot {
            image: Some(image),
            label: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            path: path.to_string_lossy().into_owned(),
        };
    }

    pub fn eject(&mut self, slot: usize) {
        self.slots[slot] = DeviceSlot::default();
    }

    pub fn geometry(&self, drive: usize) -> FloppyGeometry {
        self.geometry[drive]
    }

    pub fn set_geometry(&mut self, drive: usize, geometry: FloppyGeometry) {
        self.geometry[drive] = geometry;
    }
}

/// A user-facing message.
pub type Notice = String;

/// Sink for user-facing messages. An embedding UI subscribes with a
/// channel; without one the messages are only logged.
pub struct Notices {
    tx: Option<Sender<Notice>>,
}

impl Notices {
    pub fn new() -> Self {
        Notices { tx: None }
    }

    pub fn subscribe(&mut self, tx: Sender<Notice>) {
        self.tx = Some(tx);
    }

    pub fn post(&mut self, message: impl Into<Notice>) {
        let message = message.into();
        info!("{}", message);
        if let Some(tx) = &self.tx {
            // A subscriber that went away is not an error.
            let _ = tx.send(message);
        }
    }
}

impl Default for Notices {
    fn default() -> Self {
        Notices::new()
    }
}

fn drive_letter(drive: usize) -> char {
    (b'A' + drive as u8) as char
}

fn wp_bit(drive: usize) -> u32 {
    if drive == SLOT_FLOPPY_A {
        CTRL_FDC_WR_PROT_A
    } else {
        CTRL_FDC_WR_PROT_B
    }
}

/// The storage front-end: one link to the core, the mounted devices, the
/// emulators, and the shared sector buffer. The embedding main loop mounts
/// images through this and calls [`poll_once`](DiskFront::poll_once) at its
/// own rhythm.
pub struct DiskFront<B> {
    link: FpgaLink<B>,
    devices: DeviceMap,
    acsi: AcsiEmulator,
    buffer: Vec<u8>,
    card: Option<Box<dyn SdCard>>,
    direct_blocks: u32,
    control: u32,
    video_adjust: [i8; 2],
    notices: Notices,
}

impl<B: SpiBus> DiskFront<B> {
    pub fn new(bus: B, core: CoreKind) -> Self {
        DiskFront {
            link: FpgaLink::new(bus, core),
            devices: DeviceMap::new(),
            acsi: AcsiEmulator::new(),
            buffer: vec![0; SECTOR_BUFFER_SIZE],
            card: None,
            direct_blocks: 0,
            control: 0,
            video_adjust: [0; 2],
            notices: Notices::new(),
        }
    }

    pub fn link(&self) -> &FpgaLink<B> {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut FpgaLink<B> {
        &mut self.link
    }

    pub fn devices(&self) -> &DeviceMap {
        &self.devices
    }

    /// The pending additional sense code for an ACSI target.
    pub fn sense(&self, target: usize) -> u8 {
        self.acsi.sense(target)
    }

    pub fn control(&self) -> u32 {
        self.control
    }

    pub fn direct_active(&self) -> bool {
        self.direct_blocks != 0
    }

    /// Route user-facing messages to the given channel as well as the log.
    pub fn subscribe_notices(&mut self, tx: Sender<Notice>) {
        self.notices.subscribe(tx);
    }

    /// Attach the raw card handle that direct-SD mode exposes as ACSI
    /// target 0.
    pub fn attach_card(&mut self, card: Box<dyn SdCard>) {
        self.card = Some(card);
    }

    /// Replace the shadowed system control word and push it to the core.
    pub fn update_control(&mut self, word: u32) {
        self.control = word;
        self.link.set_control(word);
    }

    /// Shift one of the video adjust values and push both.
    pub fn nudge_video(&mut self, axis: usize, delta: i8) {
        self.video_adjust[axis] = self.video_adjust[axis].wrapping_add(delta);
        let [h, v] = self.video_adjust;
        self.link.set_video_adjust(h as u8, v as u8);
    }

    pub fn video_adjust(&self) -> [i8; 2] {
        self.video_adjust
    }

    /// Unmount a floppy drive (0 = A, 1 = B). The control word is pushed
    /// with the drive's write-protect bit raised so TOS sees a media
    /// change; the next push restores it.
    pub fn eject_floppy(&mut self, drive: usize) {
        debug!("{}: eject", drive_letter(drive));
        self.link.set_control(self.control | wp_bit(drive));
        self.devices.set_geometry(drive, FloppyGeometry::default());
        self.devices.eject(drive);
    }

    /// Mount a floppy image, ejecting whatever the drive held. The image
    /// is opened read-write with a read-only fallback; a read-only image
    /// keeps the write-protect bit raised until the final control push.
    pub fn insert_floppy(&mut self, drive: usize, path: impl AsRef<Path>) -> FrontResult<()> {
        let path = path.as_ref();
        self.eject_floppy(drive);

        let mut backing = match HostBacking::open(path) {
            Ok(backing) => backing,
            Err(_) => {
                let backing = HostBacking::open_read_only(path)?;
                self.link.set_control(self.control | wp_bit(drive));
                backing
            }
        };
        info!("{}: {}", drive_letter(drive), path.display());
        assert_or_error!(backing.size() != 0, "{} is empty", path.display());

        let geometry = detect_geometry(&mut backing);
        self.devices.set_geometry(drive, geometry);
        self.devices.insert(drive, IdxFile::open(backing), path);
        self.link.set_control(self.control);
        debug!("{}: detected {} sides with {} sectors per track",
               drive_letter(drive), geometry.sides, geometry.spt);
        Ok(())
    }

    /// Unmount an ACSI unit (0 or 1) and disable it in the core.
    pub fn detach_hdd(&mut self, unit: usize) {
        self.devices.eject(SLOT_HDD_0 + unit);
        self.control &= !(CTRL_ACSI0_ENABLE << unit);
        self.link.set_control(self.control);
    }

    /// Mount a hard-disk image on an ACSI unit (0 or 1), build its seek
    /// index and enable the unit. The control word is pushed whether or
    /// not the open succeeds.
    pub fn attach_hdd(&mut self, unit: usize, path: impl AsRef<Path>) -> FrontResult<()> {
        let path = path.as_ref();
        let slot = SLOT_HDD_0 + unit;

        self.devices.eject(slot);
        self.control &= !(CTRL_ACSI0_ENABLE << unit);

        match HostBacking::open(path) {
            Ok(backing) => {
                let mut image = IdxFile::open(backing);
                info!("ACSI {}: {}", unit, path.display());
                image.build_index();
                self.devices.insert(slot, image, path);
                self.control |= CTRL_ACSI0_ENABLE << unit;
                self.link.set_control(self.control);
                Ok(())
            }
            Err(e) => {
                error!("Cannot open {}: {}", path.display(), e);
                self.link.set_control(self.control);
                Err(e.into())
            }
        }
    }

    /// Switch direct-SD mode. On, the raw card claims ACSI target 0; off,
    /// a mounted unit 0 image gets the target back.
    pub fn set_direct_sd(&mut self, on: bool) -> FrontResult<()> {
        if on {
            debug!("ACSI: enable direct SD access");
            let card = self
                .card
                .as_mut()
                .ok_or_else(|| FrontError::new("no card attached for direct SD access"))?;
            self.direct_blocks = card.block_count()?;
            debug!("ACSI: direct capacity = {} blocks", self.direct_blocks);
            self.control |= CTRL_ACSI0_ENABLE;
        } else {
            debug!("ACSI: disable direct SD access");
            self.control &= !CTRL_ACSI0_ENABLE;
            self.direct_blocks = 0;
            if self.devices.inserted(SLOT_HDD_0) {
                debug!("ACSI: re-enabling image on ACSI 0");
                self.control |= CTRL_ACSI0_ENABLE;
            }
        }
        self.link.set_control(self.control);
        Ok(())
    }

    /// Drop every mounted device after the card has gone away. The ACSI
    /// enable bits are left as they were; the emptied slots already answer
    /// with a nak.
    pub fn eject_all(&mut self) {
        for drive in [SLOT_FLOPPY_A, SLOT_FLOPPY_B] {
            self.eject_floppy(drive);
        }
        self.card = None;
        self.direct_blocks = 0;
        for slot in [SLOT_HDD_0, SLOT_HDD_1] {
            if self.devices.inserted(slot) {
                self.devices.eject(slot);
                self.notices.post("Card removed: disabling hard disk");
            }
        }
    }

    /// Poll the core's DMA port once and service at most one pending
    /// request. When both emulators have work, ACSI wins; the floppy
    /// request stays pending for the next poll.
    pub fn poll_once(&mut self) {
        let mut status = [0u8; DMA_STATUS_MAX];
        let status = &mut status[..self.link.core().dma_status_len()];
        self.link.get_dma_state(status);

        match self.link.core() {
            CoreKind::Mist => {
                if status[19] & 0x01 != 0 {
                    let dma_address = (status[0] as u32) << 16
                        | (status[1] as u32) << 8
                        | (status[2] & 0xfe) as u32;
                    debug!("DMA: scnt {}, addr {:#x}", status[3], dma_address);
                    self.acsi.handle(
                        &status[9..20],
                        &mut self.link,
                        &mut self.devices,
                        self.card.as_deref_mut(),
                        self.direct_blocks,
                        &mut self.buffer,
                    );
                    return;
                }
                if status[8] & 0x01 != 0 {
                    fdc::handle_request(
                        &status[..9],
                        &mut self.link,
                        &mut self.devices,
                        &mut self.notices,
                        &mut self.buffer,
                    );
                }
            }
            CoreKind::Mistery => {
                if status[10] & 0x01 != 0 {
                    self.link.set_transfer_speed(SPI_SPEED_MMC);
                    self.acsi.handle(
                        &status[..11],
                        &mut self.link,
                        &mut self.devices,
                        self.card.as_deref_mut(),
                        self.direct_blocks,
                        &mut self.buffer,
                    );
                }
            }
        }
    }

    /// Capture the mount state for persistence.
    pub fn snapshot(&self) -> FrontConfig {
        FrontConfig {
            control: self.control,
            direct_sd: self.direct_blocks != 0,
            video_adjust: self.video_adjust,
            paths: [
                self.devices.path(SLOT_FLOPPY_A).to_owned(),
                self.devices.path(SLOT_FLOPPY_B).to_owned(),
                self.devices.path(SLOT_HDD_0).to_owned(),
                self.devices.path(SLOT_HDD_1).to_owned(),
            ],
        }
    }

    /// Replay a saved configuration: mount everything it names and push
    /// the control state. Images that fail to mount are logged and
    /// skipped.
    pub fn restore(&mut self, config: &FrontConfig) {
        self.control = config.control;
        self.video_adjust = config.video_adjust;
        self.nudge_video(0, 0);

        for drive in [SLOT_FLOPPY_A, SLOT_FLOPPY_B] {
            let path = &config.paths[drive];
            if !path.is_empty() {
                if let Err(e) = self.insert_floppy(drive, path) {
                    error!("{}: cannot mount {}: {}", drive_letter(drive), path, e);
                }
            }
        }

        if config.direct_sd {
            if let Err(e) = self.set_direct_sd(true) {
                error!("Cannot enable direct SD access: {}", e);
            }
        } else {
            for unit in 0..2 {
                let path = &config.paths[SLOT_HDD_0 + unit];
                if !path.is_empty() {
                    if let Err(e) = self.attach_hdd(unit, path) {
                        error!("ACSI {}: cannot mount {}: {}", unit, path, e);
                    }
                }
            }
        }
        self.link.set_control(self.control);
    }
}

/// Work out a floppy image's geometry: a size heuristic for the side
/// count, a probe over the common formats, then the boot record as a last
/// resort.
fn detect_geometry(backing: &mut impl Backing) -> FloppyGeometry {
    let size = backing.size();
    let mut geometry = FloppyGeometry::default();

    // Anything bigger than the largest single-sided format has two sides.
    if size > 85 * 11 * 512 {
        geometry.sides = 2;
    }

    // Probe the common layouts, with doubled and quadrupled sector counts
    // for HD and ED media. The last match wins.
    for (m, s, t) in iproduct!(0u32..=2, 9u32..=12, 78u32..=85) {
        if 512 * (1 << m) as u64 * s as u64 * t as u64 * geometry.sides as u64 == size {
            geometry.spt = (s << m) as u8;
        }
    }

    if geometry.spt == 0 {
        // No common layout matched: trust the boot record's own fields.
        match boot_record_geometry(backing) {
            Ok(from_boot) => geometry = from_boot,
            Err(e) => debug!("Boot record unreadable: {}", e),
        }
    }
    geometry
}

/// The layout a DOS boot record claims: sectors per track at offset 24,
/// side count at offset 26, both little-endian words.
fn boot_record_geometry(backing: &mut impl Backing) -> std::io::Result<FloppyGeometry> {
    let mut boot = [0u8; BLOCK_SIZE];
    backing.seek(SeekFrom::Start(0))?;
    backing.read_exact(&mut boot)?;
    Ok(FloppyGeometry {
        spt: u16::from_le_bytes([boot[24], boot[25]]) as u8,
        sides: u16::from_le_bytes([boot[26], boot[27]]) as u8,
    })
}

/// Run floppy geometry detection against an image file.
pub fn probe_geometry(path: impl AsRef<Path>) -> FrontResult<FloppyGeometry> {
    let mut backing = HostBacking::open_read_only(path)?;
    Ok(detect_geometry(&mut backing))
}
