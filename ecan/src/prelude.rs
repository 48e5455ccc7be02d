//! Traits needed to use the driver, imported anonymously

pub use crate::bus::DynCan as _;
pub use crate::bus::ResultCode as _;
pub use embedded_can::Frame as _;
