//! Register maps of the ECAN module and the DMA controller
//!
//! Offsets are byte offsets relative to the first register of the respective
//! bank (`CiCTRL1` and `DMA0CON`).

pub mod can;
pub mod dma;

pub use ecan_core::{RegisterView, Registers};
