#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
//! # ECAN
//!
//! ## Overview
//! This crate provides a platform-agnostic driver for the ECAN module of
//! 16-bit dsPIC33 devices together with the DMA channels that feed it.
//!
//! It provides the following features:
//!
//! - classical CAN with standard and extended identifiers, data and remote
//!   frames
//! - eight hardware buffers that can be opened for transmission or reception
//! - a receive FIFO placed behind the hardware buffers
//! - 16 acceptance filters with 3 masks
//! - transmission with four priority levels and cancellation
//! - event notification from the module interrupt through a callback
//! - a standalone DMA channel driver
//!
//! ECAN does not access memory by itself. Every frame is moved between the
//! module and a region of DMA RAM (the message buffers) by two DMA channels
//! in peripheral indirect mode, one per direction. Both channels and the
//! module refer to the same region, eight words per message buffer.
//!
//! For the abstractions to be considered operational, the module interface
//! has to be properly configured. The latter is assured through the safety
//! requirements of [`ecan_core`] traits which platform-specific HALs are
//! expected to implement.
//!
//! ## Lifecycle
//!
//! A [`Can`] is created uninitialised from a [`Dependencies`] implementing
//! struct and a notification callback. [`init`] validates a [`CanConfig`],
//! programs both DMA channels and the module and leaves the module
//! disabled. Masks, filters and the bit timing can be changed at any time;
//! the driver passes through configuration mode and comes back to the mode
//! the module was in. [`clean_up`] disables the module and gives the DMA
//! channels back.
//!
//! Operations that may have to be retried return [`nb::Result`]:
//! `WouldBlock` means the buffer is busy or empty, or the module did not
//! acknowledge a mode request in time. Every result can be flattened to the
//! integer codes of [`bus::code`] with [`bus::code_of`].
//!
//! ## General usage example
//!
//! ```no_run
//! # use core::ops::Range;
//! # use ecan::core::{CanId, Dependencies, DmaMemory, RegisterView};
//! # pub enum Can1 {}
//! # unsafe impl CanId for Can1 {
//! #     const MODULE: u8 = 1;
//! #     const RX_REQUEST: u8 = 0x22;
//! #     const TX_REQUEST: u8 = 0x46;
//! #     const RX_DATA_ADDRESS: u16 = 0x0440;
//! #     const TX_DATA_ADDRESS: u16 = 0x0442;
//! # }
//! # pub struct Board(RegisterView);
//! # unsafe impl DmaMemory for Board {
//! #     fn dma_ram(&self) -> Range<usize> { 0x4000..0x4800 }
//! # }
//! # unsafe impl Dependencies<Can1> for Board {
//! #     type Registers = RegisterView;
//! #     fn registers(&self) -> &RegisterView { &self.0 }
//! #     fn can_clock(&self) -> fugit::HertzU32 { unreachable!() }
//! #     fn disable_interrupt(&self) -> bool { unreachable!() }
//! #     fn restore_interrupt(&self, _: bool) {}
//! # }
//! # let board = Board(unsafe { RegisterView::new(0x0400 as *const (), 0x40) });
//! # let dma = unsafe { RegisterView::new(0x0380 as *const (), 0x33) };
//! # let buffer: &[vcell::VolatileCell<u16>] =
//! #     unsafe { core::slice::from_raw_parts(0x4000 as *const _, 128) };
//! use ecan::bus::{Can, DynCan};
//! use ecan::config::{BitTiming, CanConfig, Direction, FifoConfig, FifoLength};
//! use ecan::dma::Channel;
//! use ecan::filter::{BufferId, FilterId, Mask};
//! use ecan::interrupt::Event;
//! use ecan::message::{Header, Message};
//! use ecan::mode::Mode;
//! use ecan::tx_buffers::Priority;
//! use fugit::RateExtU32 as _;
//!
//! // B0..B7 followed by an eight buffer FIFO, B0 transmits
//! let mut config = CanConfig {
//!     timing: BitTiming::for_bitrate(40.MHz(), 500.kHz()).unwrap(),
//!     fifo: FifoConfig { start: 8, length: FifoLength::Eight },
//!     ..Default::default()
//! };
//! config.directions[0] = Direction::Tx;
//!
//! // Both channels cover the whole message buffer region
//! let tx_dma = Channel::new(0, &dma, buffer, None).unwrap();
//! let rx_dma = Channel::new(1, &dma, buffer, None).unwrap();
//!
//! let mut can = Can::<Can1, _, _, _>::new(board, |can: &dyn DynCan, event: Event| {
//!     // Interrupt context: only queries are available here
//!     let _ = (can.mode(), event);
//! });
//! can.init(config, tx_dma, rx_dma, buffer).unwrap();
//!
//! // Every standard frame goes to the FIFO
//! let f0 = FilterId::new(0).unwrap();
//! nb::block!(can.set_mask(Mask::M0, Header::standard(0))).unwrap();
//! nb::block!(can.assign_mask(Mask::M0, f0.into())).unwrap();
//! nb::block!(can.set_filter(f0, Header::standard(0))).unwrap();
//! nb::block!(can.connect(f0, BufferId::Fifo)).unwrap();
//!
//! can.notify_on([Event::TxSuccess, Event::RxSuccess].into_iter().collect())
//!     .unwrap();
//! nb::block!(can.set_mode(Mode::Normal)).unwrap();
//!
//! let message = Message::new(Header::standard(0x123), &[0xAA, 0xBB]).unwrap();
//! nb::block!(can.write(BufferId::Buffer(0), &message, Priority::Low)).unwrap();
//!
//! // In the ECAN interrupt handler
//! can.isr();
//!
//! if let Ok(received) = can.read(BufferId::Fifo) {
//!     let _ = received.payload();
//! }
//! ```
//!
//! [`Can`]: crate::bus::Can
//! [`init`]: crate::bus::Can::init
//! [`clean_up`]: crate::bus::Can::clean_up
//! [`CanConfig`]: crate::config::CanConfig
//! [`Dependencies`]: ecan_core::Dependencies

pub mod bus;
pub mod config;
pub mod dma;
pub mod filter;
pub mod interrupt;
pub mod message;
pub mod messageram;
pub mod mode;
pub mod prelude;
pub mod reg;
mod rx_fifo;
pub mod tx_buffers;

#[cfg(test)]
mod sim;

pub use embedded_can;
pub use ecan_core as core;
