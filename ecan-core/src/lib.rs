#![no_std]
#![warn(missing_docs)]

//! `ecan-core` provides a set of essential abstractions that serve as a thin
//! integration layer between the platform independent [`ecan`] crate and
//! chip specific HAL crates (in documentation also referred to as _target
//! HALs_).
//!
//! Traits from this crate are not supposed to be implemented by the
//! application developer; implementations should be provided by target HALs.
//!
//! Integrators of this crate into any given target HAL are responsible for
//! soundness of trait implementations and conforming to their respective safety
//! prerequisites.
//!
//! [`ecan`]: <https://docs.rs/crate/ecan/>

use core::ops::Range;
use vcell::VolatileCell;

pub use fugit;

/// Word-wide access to a bank of 16-bit peripheral registers.
///
/// Offsets are byte offsets from the start of the bank, exactly as they are
/// listed in the family reference manual. Every offset is even.
///
/// # Safety
/// - A call to [`Registers::read`] or [`Registers::write`] must perform a
///   single, complete 16-bit access with no other side effects than the
///   access itself.
/// - The implementor must own the register bank; no other code may write to
///   it while the implementor is alive.
pub unsafe trait Registers {
    /// Reads the register at `offset`.
    fn read(&self, offset: u16) -> u16;

    /// Writes `value` to the register at `offset`.
    fn write(&self, offset: u16, value: u16);

    /// Read-modify-write of the bits selected by `mask`. Bits outside of
    /// `mask` are written back with the value that was read.
    ///
    /// Must not be used on registers with clear-only flags that the
    /// peripheral sets asynchronously, as a flag raised between the read and
    /// the write would be lost.
    fn modify(&self, offset: u16, mask: u16, value: u16) {
        let current = self.read(offset);
        self.write(offset, (current & !mask) | (value & mask));
    }
}

// Safety: forwards to an implementation that upholds the contract.
unsafe impl<R: Registers + ?Sized> Registers for &R {
    fn read(&self, offset: u16) -> u16 {
        (**self).read(offset)
    }

    fn write(&self, offset: u16, value: u16) {
        (**self).write(offset, value)
    }

    fn modify(&self, offset: u16, mask: u16, value: u16) {
        (**self).modify(offset, mask, value)
    }
}

/// Memory-mapped register bank located at a fixed base address.
///
/// The silicon guarantees that aligned 16-bit accesses are atomic, so a
/// single [`Registers::read`] or [`Registers::write`] cannot be torn by an
/// interrupt.
pub struct RegisterView {
    base: *const VolatileCell<u16>,
    words: usize,
}

impl RegisterView {
    /// Creates a view of `words` consecutive 16-bit registers starting at
    /// `base`.
    ///
    /// # Safety
    /// - `base` must point to the start of a valid, word aligned register bank
    ///   that is at least `words` registers long.
    /// - Only one `RegisterView` may exist for a given bank.
    pub const unsafe fn new(base: *const (), words: usize) -> Self {
        Self {
            base: base as *const VolatileCell<u16>,
            words,
        }
    }

    /// Base address of the bank
    pub fn base(&self) -> *const () {
        self.base as *const ()
    }

    fn cell(&self, offset: u16) -> &VolatileCell<u16> {
        let index = usize::from(offset / 2);
        debug_assert!(offset % 2 == 0, "misaligned register offset");
        assert!(index < self.words, "register offset out of bank");
        // Safety: The index is in bounds of the bank described in the
        // constructor.
        unsafe { &*self.base.add(index) }
    }
}

// Safety: Every access is a single volatile word access and the constructor
// requires exclusive ownership of the bank.
unsafe impl Registers for RegisterView {
    #[inline(always)]
    fn read(&self, offset: u16) -> u16 {
        self.cell(offset).get()
    }

    #[inline(always)]
    fn write(&self, offset: u16, value: u16) {
        self.cell(offset).set(value)
    }
}

/// Trait representing ECAN module identity
///
/// Types implementing this trait are expected to be used as marker types that
/// identify a specific instance of the ECAN module available on the chip (as
/// there might be more than one). It conveys the fixed, chip specific facts
/// the driver needs to wire the module to its DMA channels.
///
/// # Safety
/// The constants must match the reference manual of the targeted device.
/// Wrong request numbers or data register addresses make the DMA engine move
/// data to or from unrelated peripherals.
///
/// # Examples
/// ```no_run
/// use ecan_core::CanId;
///
/// pub enum Can1 {}
///
/// unsafe impl CanId for Can1 {
///     const MODULE: u8 = 1;
///     const RX_REQUEST: u8 = 0x22;
///     const TX_REQUEST: u8 = 0x46;
///     const RX_DATA_ADDRESS: u16 = 0x0440;
///     const TX_DATA_ADDRESS: u16 = 0x0442;
/// }
/// ```
pub unsafe trait CanId {
    /// Module number, starting at 1
    const MODULE: u8;
    /// DMA request source (IRQSEL) raised when a frame has been received
    const RX_REQUEST: u8;
    /// DMA request source (IRQSEL) raised when a frame is ready to be sent
    const TX_REQUEST: u8;
    /// Address of the receive data register (`CiRXD`)
    const RX_DATA_ADDRESS: u16;
    /// Address of the transmit data register (`CiTXD`)
    const TX_DATA_ADDRESS: u16;
}

/// Region of RAM that the DMA engine can reach.
///
/// # Safety
/// The returned range must be exactly the dual-ported RAM the DMA engine
/// addresses relative to its start.
pub unsafe trait DmaMemory {
    /// Address range of DMA RAM
    fn dma_ram(&self) -> Range<usize>;

    /// Offset of `len` bytes located at `address` relative to the start of
    /// DMA RAM. `None` if the region is not entirely DMA accessible.
    fn dma_offset(&self, address: usize, len: usize) -> Option<u16> {
        let ram = self.dma_ram();
        let end = address.checked_add(len)?;
        if ram.start <= address && end <= ram.end {
            u16::try_from(address - ram.start).ok()
        } else {
            None
        }
    }
}

/// Trait representing the peripheral environment of an ECAN module.
///
/// # Safety
/// - Clocks must not change while the driver owns the implementor
/// - The register bank returned by [`Dependencies::registers`] must belong
///   to the module referenced by `Id` and must be owned by the implementor in
///   order to avoid aliasing
/// - [`Dependencies::disable_interrupt`] must mask exactly the interrupt
///   source of this module at the interrupt controller, without touching
///   the global interrupt enable
pub unsafe trait Dependencies<Id: CanId>: DmaMemory {
    /// Register bank of the module
    type Registers: Registers;

    /// Access to the register bank of the module
    fn registers(&self) -> &Self::Registers;

    /// Frequency of the clock feeding the module (`FCAN`)
    fn can_clock(&self) -> fugit::HertzU32;

    /// Masks the interrupt source of the module. Returns whether it was
    /// enabled before the call.
    fn disable_interrupt(&self) -> bool;

    /// Restores the interrupt source to the state returned by
    /// [`Dependencies::disable_interrupt`].
    fn restore_interrupt(&self, was_enabled: bool);
}
