mod backing;
mod card;
mod idxfile;

pub use backing::{Backing, HostBacking, LINK_TABLE_LEN};
pub use card::{FileCard, SdCard};
pub use idxfile::IdxFile;

// Chain-walking backing and in-memory card for testing.
#[cfg(test)]
mod storage_mock;
#[cfg(test)]
pub use storage_mock::{ChainBacking, MemCard};
