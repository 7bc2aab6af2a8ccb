mod link_interface;
mod link_port;

pub use link_interface::*;
pub use link_port::FpgaLink;

// Software model of the core side, for tests and the harness binary.
mod link_model;
pub use link_model::{ModelBus, PortAddress};
