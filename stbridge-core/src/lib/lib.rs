#[macro_use]
mod error;

mod acsi;
mod config;
mod fdc;
mod front;
mod link;
mod storage;


// Public API.
pub use acsi::{AcsiEmulator, AcsiRequest, ACK_CHECK_CONDITION, ACK_OK,
               SENSE_INVALID_COMMAND, SENSE_INVALID_LUN,
               SENSE_LBA_OUT_OF_RANGE, SENSE_NONE};
pub use config::FrontConfig;
pub use error::{FrontError, FrontResult};
pub use fdc::{encode_selection, FdcRequest};
pub use front::{probe_geometry, DeviceMap, DiskFront, FloppyGeometry, Notice,
                Notices, CTRL_ACSI0_ENABLE, CTRL_ACSI1_ENABLE, CTRL_CPU_RESET,
                CTRL_FDC_WR_PROT_A, CTRL_FDC_WR_PROT_B, SECTOR_BUFFER_SIZE,
                SLOT_FLOPPY_A, SLOT_FLOPPY_B, SLOT_HDD_0, SLOT_HDD_1};
pub use link::{CoreKind, FpgaLink, ModelBus, PortAddress, SpiBus,
               DMA_STATUS_MAX, SPI_SPEED_MMC, SPI_SPEED_SDC};
pub use storage::{Backing, FileCard, HostBacking, IdxFile, SdCard,
                  LINK_TABLE_LEN};

/// Bytes per device block.
pub const BLOCK_SIZE: usize = 512;

/// Set up predictable logging inside tests. Safe to call repeatedly.
#[cfg(test)]
fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        simplelog::TestLogger::init(
            log::LevelFilter::Trace,
            simplelog::Config::default(),
        )
        .expect("Failed to initialise test logging.");
    });
}
