pub mod hexprint;
pub mod wire;
