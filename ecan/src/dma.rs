//! DMA channel driver
//!
//! A [`Channel`] owns one of the eight DMA engines of the controller together
//! with the buffer(s) in DMA RAM it moves data to or from. Buffers are fixed
//! when the channel is constructed; [`Channel::init`] freezes the
//! configuration until [`Channel::cleanup`]. In between, only the block size,
//! the enable state, the interrupt point and forced transfers can change.
//!
//! Providing a second buffer enables ping-pong mode: the engine alternates
//! between buffer A and buffer B on consecutive blocks.

use crate::reg::dma::{self as reg, Con, Cs1, Req};
use crate::reg::Registers;
use core::ops::RangeInclusive;
use ecan_core::DmaMemory;
use vcell::VolatileCell;

/// Largest block in byte transfers
pub const MAX_BLOCK_BYTES: u16 = 1024;
/// Largest block in word transfers
pub const MAX_BLOCK_WORDS: u16 = 512;

/// Width of a single transfer
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataSize {
    /// 16-bit transfers
    #[default]
    Word,
    /// 8-bit transfers
    Byte,
}

/// Direction of the transfer, seen from DMA RAM
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferDirection {
    /// Read from the peripheral, write to DMA RAM
    #[default]
    PeripheralToRam,
    /// Read from DMA RAM, write to the peripheral
    RamToPeripheral,
}

/// Point of a block transfer at which the channel interrupt is raised
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InterruptOn {
    /// When the whole block has been moved
    #[default]
    Full,
    /// When half of the block has been moved
    Half,
}

/// How DMA RAM addresses are generated
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressingMode {
    /// Register indirect with post-increment
    #[default]
    PostIncrement,
    /// Register indirect without post-increment
    RegisterIndirect,
    /// The peripheral supplies the address. Used by ECAN, which computes the
    /// message buffer location itself.
    PeripheralIndirect,
}

impl AddressingMode {
    fn bits(self) -> u8 {
        match self {
            Self::PostIncrement => 0b00,
            Self::RegisterIndirect => 0b01,
            Self::PeripheralIndirect => 0b10,
        }
    }
}

/// Whether the channel stays enabled after a block
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OperatingMode {
    /// Keep transferring blocks
    #[default]
    Continuous,
    /// Disable the channel after one block
    OneShot,
}

/// One of the two buffers of a channel
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Buffer {
    /// Primary buffer
    A,
    /// Secondary buffer, only used in ping-pong mode
    B,
}

/// Channel attributes
#[derive(Copy, Clone, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelConfig {
    /// Width of a transfer
    pub size: DataSize,
    /// Direction of the transfer
    pub direction: TransferDirection,
    /// Interrupt point
    pub interrupt_on: InterruptOn,
    /// Write a null word to the peripheral for every word read from it
    pub null_write: bool,
    /// DMA RAM address generation
    pub addressing: AddressingMode,
    /// One-shot or continuous
    pub mode: OperatingMode,
    /// Peripheral request source (IRQ number, 0..=127)
    pub request: u8,
    /// Address of the peripheral data register
    pub peripheral_address: u16,
}

impl ChannelConfig {
    fn con(&self, ping_pong: bool, enabled: bool) -> Con {
        let mut con = Con(0);
        con.set_chen(enabled);
        con.set_size(self.size == DataSize::Byte);
        con.set_dir(self.direction == TransferDirection::RamToPeripheral);
        con.set_half(self.interrupt_on == InterruptOn::Half);
        con.set_nullw(self.null_write);
        con.set_amode(self.addressing.bits());
        con.set_mode(u8::from(self.mode == OperatingMode::OneShot) | u8::from(ping_pong) << 1);
        con
    }

    fn max_block(&self) -> u16 {
        match self.size {
            DataSize::Byte => MAX_BLOCK_BYTES,
            DataSize::Word => MAX_BLOCK_WORDS,
        }
    }
}

/// Errors reported by [`Channel`]
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The controller has no channel with this number
    InvalidChannel,
    /// [`Channel::init`] was called twice without [`Channel::cleanup`]
    AlreadyInitialised,
    /// The channel has not been initialised
    NotInitialised,
    /// An attribute is out of range or a buffer is empty
    InvalidInput,
    /// A buffer does not lie in DMA RAM
    NotDmaAccessible,
    /// Block size is outside the wrapped `RangeInclusive`
    BlockSizeOutOfRange(RangeInclusive<u16>),
}

struct ChannelState {
    config: ChannelConfig,
    block_size: u16,
    enabled: bool,
}

/// A DMA channel with its buffer(s)
pub struct Channel<'a, R> {
    number: u8,
    regs: R,
    buffer_a: &'a [VolatileCell<u16>],
    buffer_b: Option<&'a [VolatileCell<u16>]>,
    state: Option<ChannelState>,
}

impl<'a, R: Registers> Channel<'a, R> {
    /// Creates an uninitialised channel.
    ///
    /// `regs` is the register bank of the whole DMA controller. The buffers
    /// must lie in DMA RAM; this is checked by [`Self::init`]. Passing
    /// `buffer_b` selects ping-pong mode.
    pub fn new(
        number: u8,
        regs: R,
        buffer_a: &'a [VolatileCell<u16>],
        buffer_b: Option<&'a [VolatileCell<u16>]>,
    ) -> Result<Self, Error> {
        if number >= reg::CHANNELS {
            return Err(Error::InvalidChannel);
        }
        if buffer_a.is_empty() || buffer_b.map_or(false, |b| b.is_empty()) {
            return Err(Error::InvalidInput);
        }
        Ok(Self {
            number,
            regs,
            buffer_a,
            buffer_b,
            state: None,
        })
    }

    /// Channel number
    pub fn number(&self) -> u8 {
        self.number
    }

    /// `true` between [`Self::init`] and [`Self::cleanup`]
    pub fn is_initialised(&self) -> bool {
        self.state.is_some()
    }

    /// `true` if ping-pong mode is in use
    pub fn is_ping_pong(&self) -> bool {
        self.buffer_b.is_some()
    }

    fn offset(&self, register: u16) -> u16 {
        reg::channel(self.number, register)
    }

    fn state(&self) -> Result<&ChannelState, Error> {
        self.state.as_ref().ok_or(Error::NotInitialised)
    }

    fn state_mut(&mut self) -> Result<&mut ChannelState, Error> {
        self.state.as_mut().ok_or(Error::NotInitialised)
    }

    /// Number of transfers that fit in `buffer` with the given data size
    fn capacity(buffer: &[VolatileCell<u16>], size: DataSize) -> usize {
        match size {
            DataSize::Word => buffer.len(),
            DataSize::Byte => buffer.len() * 2,
        }
    }

    /// Largest block size allowed for `config` with the buffers of this
    /// channel.
    fn block_limit(&self, config: &ChannelConfig) -> u16 {
        let a = Self::capacity(self.buffer_a, config.size);
        let b = self
            .buffer_b
            .map_or(usize::MAX, |b| Self::capacity(b, config.size));
        let limit = usize::from(config.max_block()).min(a).min(b);
        // Fits, since it is bounded by `max_block`
        limit as u16
    }

    fn dma_offset(
        buffer: &[VolatileCell<u16>],
        memory: &(impl DmaMemory + ?Sized),
    ) -> Result<u16, Error> {
        memory
            .dma_offset(buffer.as_ptr() as usize, core::mem::size_of_val(buffer))
            .ok_or(Error::NotDmaAccessible)
    }

    /// Validates `config`, stores it and programs the channel registers. The
    /// channel is left disabled with the largest block size the buffers
    /// allow.
    pub fn init(
        &mut self,
        config: ChannelConfig,
        memory: &(impl DmaMemory + ?Sized),
    ) -> Result<(), Error> {
        if self.state.is_some() {
            return Err(Error::AlreadyInitialised);
        }
        if config.request > 0x7F {
            return Err(Error::InvalidInput);
        }
        let sta = Self::dma_offset(self.buffer_a, memory)?;
        let stb = match self.buffer_b {
            Some(b) => Self::dma_offset(b, memory)?,
            None => 0,
        };
        let block_size = self.block_limit(&config);

        let mut req = Req(0);
        req.set_irqsel(config.request);
        self.regs
            .write(self.offset(reg::CON), config.con(self.is_ping_pong(), false).0);
        self.regs.write(self.offset(reg::REQ), req.0);
        self.regs.write(self.offset(reg::STA), sta);
        self.regs.write(self.offset(reg::STB), stb);
        self.regs
            .write(self.offset(reg::PAD), config.peripheral_address);
        self.regs.write(self.offset(reg::CNT), block_size - 1);

        log::debug!(
            "DMA{}: request {:#x}, peripheral {:#06x}, STA {:#x}, block {}",
            self.number,
            config.request,
            config.peripheral_address,
            sta,
            block_size
        );
        self.state = Some(ChannelState {
            config,
            block_size,
            enabled: false,
        });
        Ok(())
    }

    fn set_enabled(&mut self, enabled: bool) -> Result<(), Error> {
        let offset = self.offset(reg::CON);
        self.state_mut()?.enabled = enabled;
        let mut mask = Con(0);
        mask.set_chen(true);
        let mut value = Con(0);
        value.set_chen(enabled);
        self.regs.modify(offset, mask.0, value.0);
        Ok(())
    }

    /// Arms the channel. Idempotent.
    pub fn enable(&mut self) -> Result<(), Error> {
        self.set_enabled(true)
    }

    /// Disarms the channel. Idempotent.
    pub fn disable(&mut self) -> Result<(), Error> {
        self.set_enabled(false)
    }

    /// `true` if the channel is initialised and enabled
    pub fn is_enabled(&self) -> bool {
        self.state.as_ref().map_or(false, |s| s.enabled)
    }

    /// Current block size in transfers
    pub fn block_size(&self) -> Option<u16> {
        self.state.as_ref().map(|s| s.block_size)
    }

    /// Sets the number of transfers per block.
    ///
    /// The channel is not disabled; if a transfer is in flight, the caller
    /// has to disable the channel first.
    pub fn set_block_size(&mut self, transfers: u16) -> Result<(), Error> {
        let limit = self.block_limit(&self.state()?.config);
        if !(1..=limit).contains(&transfers) {
            return Err(Error::BlockSizeOutOfRange(1..=limit));
        }
        self.regs.write(self.offset(reg::CNT), transfers - 1);
        self.state_mut()?.block_size = transfers;
        Ok(())
    }

    /// Requests a single transfer regardless of the peripheral request
    /// line. Returns the state of the force bit before the request.
    pub fn force(&mut self) -> Result<bool, Error> {
        self.state()?;
        let offset = self.offset(reg::REQ);
        let before = Req(self.regs.read(offset));
        let mut mask = Req(0);
        mask.set_force(true);
        self.regs.modify(offset, mask.0, mask.0);
        Ok(before.force())
    }

    /// Buffer A; in ping-pong mode the buffers are sized independently
    pub fn buffer_a(&self) -> &'a [VolatileCell<u16>] {
        self.buffer_a
    }

    /// Buffer B, `None` unless ping-pong mode is in use
    pub fn buffer_b(&self) -> Option<&'a [VolatileCell<u16>]> {
        self.buffer_b
    }

    /// The buffer the engine will use for the next block. Always
    /// [`Buffer::A`] without ping-pong.
    pub fn pingpong_status(&self) -> Buffer {
        if !self.is_ping_pong() || !self.is_initialised() {
            return Buffer::A;
        }
        let status = Cs1(self.regs.read(reg::DMACS1));
        if status.ppst() & (1 << self.number) != 0 {
            Buffer::B
        } else {
            Buffer::A
        }
    }

    /// Selects whether the channel interrupt fires on a full or a half
    /// block.
    pub fn set_interrupt_on(&mut self, interrupt_on: InterruptOn) -> Result<(), Error> {
        let offset = self.offset(reg::CON);
        self.state_mut()?.config.interrupt_on = interrupt_on;
        let mut mask = Con(0);
        mask.set_half(true);
        let mut value = Con(0);
        value.set_half(interrupt_on == InterruptOn::Half);
        self.regs.modify(offset, mask.0, value.0);
        Ok(())
    }

    /// Configuration stored by [`Self::init`]
    pub fn config(&self) -> Option<&ChannelConfig> {
        self.state.as_ref().map(|s| &s.config)
    }

    /// Disables the channel and clears its configuration. Idempotent.
    pub fn cleanup(&mut self) {
        if self.state.take().is_some() {
            for register in [reg::CON, reg::REQ, reg::STA, reg::STB, reg::PAD, reg::CNT] {
                self.regs.write(self.offset(register), 0);
            }
            log::debug!("DMA{}: released", self.number);
        }
    }

    /// Cleans the channel up and gives back the register bank and buffers.
    pub fn release(
        mut self,
    ) -> (
        R,
        &'a [VolatileCell<u16>],
        Option<&'a [VolatileCell<u16>]>,
    ) {
        self.cleanup();
        (self.regs, self.buffer_a, self.buffer_b)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sim::{DmaRam, Memory};

    fn rx_config() -> ChannelConfig {
        ChannelConfig {
            addressing: AddressingMode::PeripheralIndirect,
            request: 0x22,
            peripheral_address: 0x0440,
            ..Default::default()
        }
    }

    #[test]
    fn rejects_unknown_channel() {
        let regs = Memory::<{ reg::WORDS }>::new();
        let ram = DmaRam::new(16);
        assert_eq!(
            Channel::new(8, &regs, ram.words(0, 16), None).err(),
            Some(Error::InvalidChannel)
        );
    }

    #[test]
    fn init_programs_registers() {
        let regs = Memory::<{ reg::WORDS }>::new();
        let ram = DmaRam::new(64);
        let mut ch = Channel::new(2, &regs, ram.words(16, 32), None).unwrap();
        ch.init(rx_config(), &ram).unwrap();

        let con = Con(regs.read(reg::channel(2, reg::CON)));
        assert!(!con.chen());
        assert_eq!(con.amode(), 0b10);
        assert_eq!(con.mode(), 0);
        assert_eq!(regs.read(reg::channel(2, reg::REQ)), 0x22);
        assert_eq!(regs.read(reg::channel(2, reg::STA)), 32);
        assert_eq!(regs.read(reg::channel(2, reg::PAD)), 0x0440);
        assert_eq!(regs.read(reg::channel(2, reg::CNT)), 31);
        assert_eq!(ch.block_size(), Some(32));
        assert_eq!(ch.init(rx_config(), &ram), Err(Error::AlreadyInitialised));
    }

    #[test]
    fn buffer_outside_dma_ram_is_rejected() {
        let regs = Memory::<{ reg::WORDS }>::new();
        let ram = DmaRam::new(16);
        let elsewhere = DmaRam::new(16);
        let mut ch = Channel::new(0, &regs, elsewhere.words(0, 16), None).unwrap();
        assert_eq!(ch.init(rx_config(), &ram), Err(Error::NotDmaAccessible));
        assert!(!ch.is_initialised());
    }

    #[test]
    fn enable_and_disable_are_idempotent() {
        let regs = Memory::<{ reg::WORDS }>::new();
        let ram = DmaRam::new(16);
        let mut ch = Channel::new(1, &regs, ram.words(0, 16), None).unwrap();
        assert_eq!(ch.enable(), Err(Error::NotInitialised));
        ch.init(rx_config(), &ram).unwrap();
        ch.enable().unwrap();
        ch.enable().unwrap();
        assert!(ch.is_enabled());
        assert!(Con(regs.read(reg::channel(1, reg::CON))).chen());
        ch.disable().unwrap();
        ch.disable().unwrap();
        assert!(!ch.is_enabled());
        assert!(!Con(regs.read(reg::channel(1, reg::CON))).chen());
    }

    #[test]
    fn block_size_is_bounded_by_buffer_and_data_size() {
        let regs = Memory::<{ reg::WORDS }>::new();
        let ram = DmaRam::new(1024);
        let mut small = Channel::new(0, &regs, ram.words(0, 8), None).unwrap();
        small.init(rx_config(), &ram).unwrap();
        assert_eq!(small.set_block_size(0), Err(Error::BlockSizeOutOfRange(1..=8)));
        assert_eq!(small.set_block_size(9), Err(Error::BlockSizeOutOfRange(1..=8)));
        small.set_block_size(3).unwrap();
        assert_eq!(regs.read(reg::channel(0, reg::CNT)), 2);

        let mut words = Channel::new(1, &regs, ram.words(0, 1024), None).unwrap();
        words.init(rx_config(), &ram).unwrap();
        assert_eq!(words.block_size(), Some(MAX_BLOCK_WORDS));

        let mut bytes = Channel::new(2, &regs, ram.words(0, 600), None).unwrap();
        let config = ChannelConfig {
            size: DataSize::Byte,
            ..rx_config()
        };
        bytes.init(config, &ram).unwrap();
        assert_eq!(bytes.block_size(), Some(MAX_BLOCK_BYTES));
    }

    #[test]
    fn ping_pong_buffers_are_sized_independently() {
        let regs = Memory::<{ reg::WORDS }>::new();
        let ram = DmaRam::new(64);
        let mut ch = Channel::new(3, &regs, ram.words(0, 16), Some(ram.words(16, 8))).unwrap();
        ch.init(rx_config(), &ram).unwrap();
        assert_eq!(ch.buffer_a().len(), 16);
        assert_eq!(ch.buffer_b().map(|b| b.len()), Some(8));
        assert_eq!(ch.block_size(), Some(8));
        assert_eq!(Con(regs.read(reg::channel(3, reg::CON))).mode(), 0b10);
        assert_eq!(regs.read(reg::channel(3, reg::STB)), 32);
    }

    #[test]
    fn pingpong_status_follows_controller() {
        let regs = Memory::<{ reg::WORDS }>::new();
        let ram = DmaRam::new(64);
        let mut single = Channel::new(4, &regs, ram.words(0, 16), None).unwrap();
        single.init(rx_config(), &ram).unwrap();
        let mut double = Channel::new(5, &regs, ram.words(16, 16), Some(ram.words(32, 16))).unwrap();
        double.init(rx_config(), &ram).unwrap();

        regs.write(reg::DMACS1, 0xFF);
        assert_eq!(single.pingpong_status(), Buffer::A);
        assert_eq!(double.pingpong_status(), Buffer::B);
        regs.write(reg::DMACS1, 0);
        assert_eq!(double.pingpong_status(), Buffer::A);
    }

    #[test]
    fn force_reports_previous_state() {
        let regs = Memory::<{ reg::WORDS }>::new();
        let ram = DmaRam::new(16);
        let mut ch = Channel::new(6, &regs, ram.words(0, 16), None).unwrap();
        ch.init(rx_config(), &ram).unwrap();
        assert_eq!(ch.force(), Ok(false));
        assert_eq!(ch.force(), Ok(true));
        assert_eq!(Req(regs.read(reg::channel(6, reg::REQ))).irqsel(), 0x22);
    }

    #[test]
    fn interrupt_point_can_change() {
        let regs = Memory::<{ reg::WORDS }>::new();
        let ram = DmaRam::new(16);
        let mut ch = Channel::new(7, &regs, ram.words(0, 16), None).unwrap();
        ch.init(rx_config(), &ram).unwrap();
        ch.set_interrupt_on(InterruptOn::Half).unwrap();
        assert!(Con(regs.read(reg::channel(7, reg::CON))).half());
        ch.set_interrupt_on(InterruptOn::Full).unwrap();
        assert!(!Con(regs.read(reg::channel(7, reg::CON))).half());
    }

    #[test]
    fn cleanup_clears_configuration() {
        let regs = Memory::<{ reg::WORDS }>::new();
        let ram = DmaRam::new(16);
        let mut ch = Channel::new(0, &regs, ram.words(0, 16), None).unwrap();
        ch.init(rx_config(), &ram).unwrap();
        ch.enable().unwrap();
        ch.cleanup();
        ch.cleanup();
        assert!(!ch.is_initialised());
        assert_eq!(regs.read(reg::channel(0, reg::CON)), 0);
        assert_eq!(regs.read(reg::channel(0, reg::REQ)), 0);
        ch.init(rx_config(), &ram).unwrap();
    }
}
