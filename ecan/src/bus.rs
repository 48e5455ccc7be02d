//! The CAN module driver

use crate::config::{BitTiming, CanConfig, ConfigurationError, Direction, HARDWARE_BUFFERS};
use crate::dma::{self, AddressingMode, Channel, ChannelConfig, DataSize, TransferDirection};
use crate::filter::{BufferId, FilterId, FilterSelect, Mask, MaskId, Routing};
use crate::interrupt::{Event, EventSet};
use crate::message::raw::BUFFER_WORDS;
use crate::message::{Header, Message};
use crate::messageram::MessageRam;
use crate::mode::{self, Mode};
use crate::reg::can::{self, Ec, Ecan, Inte, Intf, TxControl};
use crate::reg::Registers;
use crate::rx_fifo::RxFifo;
use crate::tx_buffers::{self, Priority, Submitted};
use core::fmt::{self, Debug};
use core::marker::PhantomData;
use ecan_core::{CanId, Dependencies};
use fugit::HertzU32;
use vcell::VolatileCell;

/// Stable integer codes of the driver results
pub mod code {
    /// Success
    pub const NONE: i32 = 0;
    /// Try again
    pub const AGAIN: i32 = -1;
    /// Invalid object or argument
    pub const OBJECT: i32 = -2;
    /// Not enough resources
    pub const ALLOC: i32 = -3;
    /// Frame cannot be written
    pub const WRITE: i32 = -4;
    /// Frame cannot be read
    pub const READ: i32 = -5;
    /// Internal invariant violated
    pub const ASSERT: i32 = 0x8001;
    /// Unexpected hardware state
    pub const UNKNOWN: i32 = 0x8000;
}

/// Reasons for [`Error::Object`]
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ObjectError {
    /// The driver is not initialised
    Uninitialised,
    /// [`Can::init`] was called twice without [`Can::clean_up`]
    AlreadyInitialised,
    /// The attributes are invalid
    Configuration(ConfigurationError),
    /// A DMA channel does not use exactly the message buffer region, or
    /// uses ping-pong mode
    DmaBuffer,
    /// Transmit and receive use the same DMA channel
    SameChannel,
    /// The buffer does not exist in the current geometry
    NoSuchBuffer(BufferId),
    /// The buffer is part of the FIFO and only reachable through
    /// [`BufferId::Fifo`]
    InFifo(BufferId),
    /// The buffer is open in the other direction
    WrongDirection(BufferId),
    /// A filter points at the buffer
    Connected(FilterId),
    /// The mode cannot be requested
    InvalidMode(Mode),
    /// The mask selection is not valid for the operation
    InvalidMask(Mask),
    /// An identifier field is wider than the silicon stores
    InvalidHeader,
    /// The DMA driver rejected the request
    Dma(dma::Error),
}

/// Errors reported by [`Can`]
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The module did not acknowledge in time. Only returned from
    /// operations that do not use `nb`.
    Again,
    /// Caller error, nothing was changed
    Object(ObjectError),
    /// The message buffer region is too small
    Alloc,
    /// The frame cannot be encoded
    Write,
    /// The stored frame cannot be decoded
    Read,
    /// Driver state and silicon disagree
    Assert,
    /// The silicon reports a reserved state
    Unknown,
}

impl Error {
    /// Integer code of the error
    pub fn code(&self) -> i32 {
        match self {
            Self::Again => code::AGAIN,
            Self::Object(_) => code::OBJECT,
            Self::Alloc => code::ALLOC,
            Self::Write => code::WRITE,
            Self::Read => code::READ,
            Self::Assert => code::ASSERT,
            Self::Unknown => code::UNKNOWN,
        }
    }
}

impl From<ObjectError> for Error {
    fn from(value: ObjectError) -> Self {
        Self::Object(value)
    }
}

impl From<ConfigurationError> for Error {
    fn from(value: ConfigurationError) -> Self {
        Self::Object(ObjectError::Configuration(value))
    }
}

impl From<dma::Error> for Error {
    fn from(value: dma::Error) -> Self {
        Self::Object(ObjectError::Dma(value))
    }
}

/// Results that flatten to an integer code
pub trait ResultCode {
    /// `0` on success, the error code otherwise. `WouldBlock` is
    /// [`code::AGAIN`].
    fn code(&self) -> i32;
}

impl<T> ResultCode for Result<T, Error> {
    fn code(&self) -> i32 {
        self.as_ref().map_or_else(Error::code, |_| code::NONE)
    }
}

impl<T> ResultCode for nb::Result<T, Error> {
    fn code(&self) -> i32 {
        match self {
            Ok(_) => code::NONE,
            Err(nb::Error::WouldBlock) => code::AGAIN,
            Err(nb::Error::Other(e)) => e.code(),
        }
    }
}

/// Integer code of `result`
pub fn code_of<R: ResultCode>(result: &R) -> i32 {
    result.code()
}

/// Printable `CiEC`
pub struct ErrorCounters(pub Ec);

impl From<Ec> for ErrorCounters {
    fn from(value: Ec) -> Self {
        Self(value)
    }
}

impl ErrorCounters {
    /// Transmit error count
    pub fn transmit(&self) -> u8 {
        self.0.terrcnt()
    }

    /// Receive error count
    pub fn receive(&self) -> u8 {
        self.0.rerrcnt()
    }
}

impl Debug for ErrorCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorCounters")
            .field("tec", &self.transmit())
            .field("rec", &self.receive())
            .finish()
    }
}

/// Printable error state bits of `CiINTF`
pub struct ErrorState(pub Intf);

impl From<Intf> for ErrorState {
    fn from(value: Intf) -> Self {
        Self(value)
    }
}

impl Debug for ErrorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let intf = &self.0;

        f.debug_struct("ErrorState")
            .field("txbo", &intf.txbo())
            .field("txbp", &intf.txbp())
            .field("rxbp", &intf.rxbp())
            .field("txwar", &intf.txwar())
            .field("rxwar", &intf.rxwar())
            .field("ewarn", &intf.ewarn())
            .finish()
    }
}

/// Read-only view of a [`Can`], with its type parameters erased.
///
/// This is what the notification callback receives. The callback runs in
/// interrupt context and must keep its work short; it cannot submit or
/// consume frames.
pub trait DynCan {
    /// Module number
    fn module(&self) -> u8;
    /// `true` while the driver is initialised
    fn is_valid(&self) -> bool;
    /// Current mode, `None` if not initialised
    fn mode(&self) -> Option<Mode>;
    /// Enabled notifications, `None` if not initialised
    fn notify_mask(&self) -> Option<EventSet>;
    /// `true` for B0..B7 and for the buffers of the FIFO
    fn buffer_exists(&self, buffer: BufferId) -> bool;
    /// Direction of `buffer`
    fn get_direction(&self, buffer: BufferId) -> Result<Direction, Error>;
    /// `true` if `buffer` holds no unread frame, or for a transmit buffer,
    /// no pending frame. Also `true` for buffers that do not exist.
    fn is_empty(&self, buffer: BufferId) -> bool;
    /// Returns the next frame of `buffer` without consuming it
    fn peek(&self, buffer: BufferId) -> nb::Result<Message, Error>;
    /// Buffer `filter` points at
    fn filter_target(&self, filter: FilterId) -> Option<BufferId>;
    /// Mask assigned to `filter`
    fn filter_mask(&self, filter: FilterId) -> Option<MaskId>;
    /// Value last written to `filter`, if the filter is enabled
    fn filter_value(&self, filter: FilterId) -> Option<Header>;
    /// Value last written to `mask`
    fn mask_value(&self, mask: MaskId) -> Option<Header>;
    /// Transmit and receive error counters
    fn error_counters(&self) -> Option<ErrorCounters>;
    /// Error state of the module
    fn error_state(&self) -> Option<ErrorState>;
}

struct State<'a, R> {
    config: CanConfig,
    mode: Mode,
    notify: EventSet,
    directions: [Direction; HARDWARE_BUFFERS as usize],
    routing: Routing,
    submitted: Submitted,
    fifo: RxFifo,
    buffers: MessageRam<'a>,
    tx_dma: Channel<'a, R>,
    rx_dma: Channel<'a, R>,
}

impl<R> State<'_, R> {
    fn exists(&self, buffer: BufferId) -> bool {
        match buffer {
            BufferId::Fifo => true,
            BufferId::Buffer(index) => {
                (index < HARDWARE_BUFFERS && index < self.config.dma_buffers())
                    || self.config.fifo.contains(index)
            }
        }
    }

    fn direction(&self, buffer: BufferId) -> Result<Direction, Error> {
        if !self.exists(buffer) {
            return Err(ObjectError::NoSuchBuffer(buffer).into());
        }
        Ok(match buffer {
            BufferId::Buffer(index) if !self.config.fifo.contains(index) => {
                self.directions[usize::from(index)]
            }
            _ => Direction::Rx,
        })
    }

    /// Index of a buffer B0..B7 outside the FIFO
    fn hardware_index(&self, buffer: BufferId) -> Result<u8, Error> {
        match buffer {
            BufferId::Buffer(index) if self.config.fifo.contains(index) => {
                Err(ObjectError::InFifo(buffer).into())
            }
            BufferId::Buffer(index) if self.exists(buffer) && index < HARDWARE_BUFFERS => Ok(index),
            _ => Err(ObjectError::NoSuchBuffer(buffer).into()),
        }
    }

    /// Index of the buffer a read of `buffer` comes from
    fn read_index(&self, buffer: BufferId) -> Result<u8, Error> {
        if self.direction(buffer)? == Direction::Tx {
            return Err(ObjectError::WrongDirection(buffer).into());
        }
        match buffer {
            BufferId::Fifo => Ok(self.fifo.head()),
            BufferId::Buffer(_) => self.hardware_index(buffer),
        }
    }

    /// Index of a buffer open for transmission
    fn tx_index(&self, buffer: BufferId) -> Result<u8, Error> {
        if self.direction(buffer)? != Direction::Tx {
            return Err(ObjectError::WrongDirection(buffer).into());
        }
        self.hardware_index(buffer)
    }

    fn fetch<Reg: Registers>(&self, ecan: &Ecan<'_, Reg>, index: u8) -> nb::Result<Message, Error> {
        if ecan.rxful() & 1 << index == 0 {
            return Err(nb::Error::WouldBlock);
        }
        let message = self.buffers.read(index).ok_or(Error::Assert)?;
        if message.dlc > 8 {
            return Err(Error::Read.into());
        }
        Ok(message)
    }
}

fn masked<Id: CanId, D: Dependencies<Id>, T>(dependencies: &D, f: impl FnOnce() -> T) -> T {
    let was_enabled = dependencies.disable_interrupt();
    let result = f();
    dependencies.restore_interrupt(was_enabled);
    result
}

fn same_region(a: &[VolatileCell<u16>], b: &[VolatileCell<u16>]) -> bool {
    a.as_ptr() == b.as_ptr() && a.len() == b.len()
}

/// Driver of one ECAN module and the two DMA channels that move its
/// frames.
///
/// The object starts out uninitialised. [`Self::init`] programs the module
/// and the channels and leaves the module disabled; [`Self::clean_up`]
/// returns it to the uninitialised state.
///
/// `notify` is called from [`Self::isr`] once per event enabled with
/// [`Self::notify_on`].
pub struct Can<'a, Id, D, R, N> {
    dependencies: D,
    notify: N,
    state: Option<State<'a, R>>,
    _id: PhantomData<Id>,
}

impl<'a, Id, D, R, N> Can<'a, Id, D, R, N>
where
    Id: CanId,
    D: Dependencies<Id>,
    R: Registers,
    N: Fn(&dyn DynCan, Event),
{
    /// Creates an uninitialised driver
    pub fn new(dependencies: D, notify: N) -> Self {
        Self {
            dependencies,
            notify,
            state: None,
            _id: PhantomData,
        }
    }

    fn ecan(&self) -> Ecan<'_, D::Registers> {
        Ecan::new(self.dependencies.registers())
    }

    fn state(&self) -> Result<&State<'a, R>, Error> {
        self.state
            .as_ref()
            .ok_or(Error::Object(ObjectError::Uninitialised))
    }

    fn split(&mut self) -> Result<(&D, &mut State<'a, R>), Error> {
        let state = self.state.as_mut().ok_or(ObjectError::Uninitialised)?;
        Ok((&self.dependencies, state))
    }

    /// Validates the attributes, programs both DMA channels and the module
    /// and leaves the module in [`Mode::Disable`].
    ///
    /// `buffer` holds the message buffers and must be the buffer A of both
    /// channels. It needs room for eight words per buffer up to the end of
    /// the FIFO. On error, the driver stays uninitialised and the channels
    /// are cleaned up.
    pub fn init(
        &mut self,
        config: CanConfig,
        mut tx_dma: Channel<'a, R>,
        mut rx_dma: Channel<'a, R>,
        buffer: &'a [VolatileCell<u16>],
    ) -> Result<(), Error> {
        if self.state.is_some() {
            return Err(ObjectError::AlreadyInitialised.into());
        }
        config.validate()?;
        let buffers = MessageRam::new(buffer);
        if buffers.buffers() < usize::from(config.dma_buffers()) {
            return Err(Error::Alloc);
        }
        if tx_dma.number() == rx_dma.number() {
            return Err(ObjectError::SameChannel.into());
        }
        for channel in [&tx_dma, &rx_dma] {
            if !same_region(channel.buffer_a(), buffer) || channel.is_ping_pong() {
                return Err(ObjectError::DmaBuffer.into());
            }
        }

        let programmed = self
            .program_dma(&mut tx_dma, &mut rx_dma)
            .and_then(|()| self.program_module(&config, &buffers));
        if let Err(e) = programmed {
            tx_dma.cleanup();
            rx_dma.cleanup();
            return Err(e);
        }

        log::debug!(
            "ECAN{}: {} buffers, FIFO at B{}, {} bit/s",
            Id::MODULE,
            config.dma_buffers(),
            config.fifo.start,
            config.timing.bitrate(self.dependencies.can_clock()).to_Hz()
        );
        self.state = Some(State {
            config,
            mode: Mode::Disable,
            notify: EventSet::default(),
            directions: config.directions,
            routing: Routing::new(),
            submitted: Submitted::default(),
            fifo: RxFifo::new(&config.fifo),
            buffers,
            tx_dma,
            rx_dma,
        });
        Ok(())
    }

    fn program_dma(&self, tx_dma: &mut Channel<'a, R>, rx_dma: &mut Channel<'a, R>) -> Result<(), Error> {
        let common = ChannelConfig {
            size: DataSize::Word,
            addressing: AddressingMode::PeripheralIndirect,
            ..Default::default()
        };
        tx_dma.init(
            ChannelConfig {
                direction: TransferDirection::RamToPeripheral,
                request: Id::TX_REQUEST,
                peripheral_address: Id::TX_DATA_ADDRESS,
                ..common
            },
            &self.dependencies,
        )?;
        rx_dma.init(
            ChannelConfig {
                direction: TransferDirection::PeripheralToRam,
                request: Id::RX_REQUEST,
                peripheral_address: Id::RX_DATA_ADDRESS,
                ..common
            },
            &self.dependencies,
        )?;
        for channel in [tx_dma, rx_dma] {
            // One message buffer per request
            channel.set_block_size(BUFFER_WORDS as u16)?;
            channel.enable()?;
        }
        Ok(())
    }

    fn program_module(&self, config: &CanConfig, buffers: &MessageRam<'_>) -> Result<(), Error> {
        let ecan = self.ecan();
        let regs = ecan.raw();
        mode::enter(&ecan, Mode::Configuration).map_err(|_| Error::Again)?;

        regs.write(can::CFG1, config.timing.cfg1().0);
        let mut cfg2 = config.timing.cfg2();
        cfg2.set_wakfil(config.flags.wake_on_filter);
        regs.write(can::CFG2, cfg2.0);
        regs.write(can::FCTRL, config.fifo.fctrl()?.0);
        ecan.modify_ctrl1(|r| {
            r.set_csidl(config.flags.stop_in_idle);
            r.set_cancap(config.flags.timestamp);
        });

        ecan.set_fen1(0);
        regs.write(can::FMSKSEL1, 0);
        regs.write(can::FMSKSEL2, 0);
        ecan.with_filter_window(|ecan| {
            for index in (0..crate::filter::FILTERS).step_by(4) {
                ecan.raw().write(can::bufpnt(index), 0);
            }
        });

        ecan.set_inte(Inte(0));
        ecan.clear_intf(Intf(0xFF));
        regs.write(can::RXFUL1, 0);
        regs.write(can::RXFUL2, 0);
        ecan.clear_rxovf(u32::MAX);
        for pair in (0..HARDWARE_BUFFERS).step_by(2) {
            let mut word = 0;
            for index in [pair, pair + 1] {
                let mut control = TxControl(0);
                control.set_txen(config.directions[usize::from(index)] == Direction::Tx);
                word |= u16::from(control.0) << can::trcon_shift(index);
            }
            regs.write(can::trcon(pair), word);
        }
        buffers.clear();

        mode::enter(&ecan, Mode::Disable).map_err(|_| Error::Again)
    }

    /// Disables the module and both DMA channels and drops the driver
    /// state. Returns the cleaned up channels, or `None` if the driver was
    /// not initialised.
    pub fn clean_up(&mut self) -> Option<(Channel<'a, R>, Channel<'a, R>)> {
        let mut state = self.state.take()?;
        let ecan = self.ecan();
        if !state.submitted.is_empty() {
            log::debug!("ECAN{}: aborting pending transmissions", Id::MODULE);
        }
        masked::<Id, _, _>(&self.dependencies, || {
            ecan.set_inte(Inte(0));
            for index in 0..HARDWARE_BUFFERS {
                tx_buffers::abort(&ecan, &mut state.submitted, index);
            }
        });
        if mode::enter(&ecan, Mode::Disable).is_err() {
            log::warn!("ECAN{}: released while not disabled", Id::MODULE);
        }
        state.tx_dma.cleanup();
        state.rx_dma.cleanup();
        log::debug!("ECAN{}: released", Id::MODULE);
        Some((state.tx_dma, state.rx_dma))
    }

    /// Requests `mode`. Returns `WouldBlock` if the module does not
    /// acknowledge within [`mode::ACK_SPIN_LIMIT`] polls, in which case the
    /// mode is unchanged.
    pub fn set_mode(&mut self, mode: Mode) -> nb::Result<(), Error> {
        if !mode.is_external() {
            return Err(Error::from(ObjectError::InvalidMode(mode)).into());
        }
        let (dependencies, state) = self.split()?;
        let ecan = Ecan::new(dependencies.registers());
        mode::enter(&ecan, mode).map_err(|_| nb::Error::WouldBlock)?;
        log::debug!("ECAN{}: {:?} -> {:?}", Id::MODULE, state.mode, mode);
        state.mode = mode;
        Ok(())
    }

    /// Selects the events delivered to the callback
    pub fn notify_on(&mut self, events: EventSet) -> Result<(), Error> {
        let (dependencies, state) = self.split()?;
        let ecan = Ecan::new(dependencies.registers());
        masked::<Id, _, _>(dependencies, || {
            state.notify = events;
            ecan.set_inte(events.inte());
        });
        Ok(())
    }

    /// Runs `f` in configuration mode and returns to the previous mode.
    fn configure<T>(
        &mut self,
        f: impl FnOnce(&Ecan<'_, D::Registers>, &mut State<'a, R>) -> T,
    ) -> nb::Result<T, Error> {
        let (dependencies, state) = self.split()?;
        let ecan = Ecan::new(dependencies.registers());
        let prior = state.mode;
        if prior != Mode::Configuration {
            mode::enter(&ecan, Mode::Configuration).map_err(|_| nb::Error::WouldBlock)?;
        }
        let result = f(&ecan, state);
        if prior != Mode::Configuration && mode::enter(&ecan, prior).is_err() {
            // Applied, but stuck in configuration until the next set_mode
            state.mode = Mode::Configuration;
            return Err(nb::Error::WouldBlock);
        }
        Ok(result)
    }

    /// Writes the value of `mask`, or of all masks with [`Mask::All`]. For
    /// masks, `header.ide` selects whether only frames of the filter's
    /// identifier type match.
    pub fn set_mask(&mut self, mask: Mask, header: Header) -> nb::Result<(), Error> {
        if mask == Mask::None {
            return Err(Error::from(ObjectError::InvalidMask(mask)).into());
        }
        if !header.is_valid() {
            return Err(Error::from(ObjectError::InvalidHeader).into());
        }
        self.configure(|ecan, state| state.routing.set_mask(ecan, mask, header))
    }

    /// Assigns `mask` to `filters`. [`Mask::None`] removes the mask, which
    /// deactivates the filters.
    pub fn assign_mask(&mut self, mask: Mask, filters: FilterSelect) -> nb::Result<(), Error> {
        if mask == Mask::All {
            return Err(Error::from(ObjectError::InvalidMask(mask)).into());
        }
        self.configure(|ecan, state| state.routing.assign_mask(ecan, mask.id(), filters))
    }

    /// Writes the value of `filter` and enables it
    pub fn set_filter(&mut self, filter: FilterId, header: Header) -> nb::Result<(), Error> {
        if !header.is_valid() {
            return Err(Error::from(ObjectError::InvalidHeader).into());
        }
        self.configure(|ecan, state| state.routing.set_filter(ecan, filter, header))
    }

    /// Enables `filter` with its current value
    pub fn enable_filter(&mut self, filter: FilterId) -> nb::Result<(), Error> {
        self.configure(|ecan, state| state.routing.set_enabled(ecan, filter, true))
    }

    /// Disables `filter`; frames are no longer steered by it
    pub fn disable_filter(&mut self, filter: FilterId) -> nb::Result<(), Error> {
        self.configure(|ecan, state| state.routing.set_enabled(ecan, filter, false))
    }

    /// Points `filter` at `buffer`. The buffer must be a receive buffer
    /// among B0..B7 or the FIFO.
    pub fn connect(&mut self, filter: FilterId, buffer: BufferId) -> nb::Result<(), Error> {
        let state = self.state()?;
        if let BufferId::Buffer(_) = buffer {
            state.hardware_index(buffer)?;
            if state.direction(buffer)? == Direction::Tx {
                return Err(Error::from(ObjectError::WrongDirection(buffer)).into());
            }
        }
        self.configure(|ecan, state| state.routing.connect(ecan, filter, Some(buffer)))
    }

    /// Clears the buffer `filter` points at
    pub fn disconnect(&mut self, filter: FilterId) -> nb::Result<(), Error> {
        self.configure(|ecan, state| state.routing.connect(ecan, filter, None))
    }

    /// Opens buffer B0..B7 for transmission or reception. Returns
    /// `WouldBlock` while a transmission from the buffer is pending or, when
    /// opening for transmission, while it holds an unread frame.
    pub fn open(&mut self, buffer: BufferId, direction: Direction) -> nb::Result<(), Error> {
        let (dependencies, state) = self.split()?;
        let index = state.hardware_index(buffer)?;
        if direction == Direction::Tx {
            if let Some(filter) = state.routing.connected_to(buffer) {
                return Err(Error::from(ObjectError::Connected(filter)).into());
            }
        }
        let ecan = Ecan::new(dependencies.registers());
        masked::<Id, _, _>(dependencies, || {
            if tx_buffers::is_pending(&ecan, index) {
                return Err(nb::Error::WouldBlock);
            }
            if direction == Direction::Tx && ecan.rxful() & 1 << index != 0 {
                return Err(nb::Error::WouldBlock);
            }
            tx_buffers::set_direction(&ecan, index, direction);
            state.directions[usize::from(index)] = direction;
            Ok(())
        })
    }

    /// Submits `message` from transmit buffer `buffer` with `priority`.
    /// Returns `WouldBlock` while an earlier frame of the buffer is pending.
    pub fn write(
        &mut self,
        buffer: BufferId,
        message: &Message,
        priority: Priority,
    ) -> nb::Result<(), Error> {
        let (dependencies, state) = self.split()?;
        let index = state.tx_index(buffer)?;
        if message.dlc > 8 || !message.header.is_valid() {
            return Err(Error::Write.into());
        }
        let ecan = Ecan::new(dependencies.registers());
        masked::<Id, _, _>(dependencies, || {
            if tx_buffers::is_pending(&ecan, index) {
                return Err(nb::Error::WouldBlock);
            }
            let State {
                buffers, submitted, ..
            } = state;
            if tx_buffers::submit(&ecan, buffers, submitted, index, message, priority) {
                Ok(())
            } else {
                Err(Error::Assert.into())
            }
        })
    }

    /// Withdraws the pending frame of `buffer`. Returns whether one was
    /// pending.
    pub fn abort_write(&mut self, buffer: BufferId) -> Result<bool, Error> {
        let (dependencies, state) = self.split()?;
        let index = state.tx_index(buffer)?;
        let ecan = Ecan::new(dependencies.registers());
        Ok(masked::<Id, _, _>(dependencies, || {
            tx_buffers::abort(&ecan, &mut state.submitted, index)
        }))
    }

    /// Takes the next frame out of `buffer`. Returns `WouldBlock` if it is
    /// empty.
    pub fn read(&mut self, buffer: BufferId) -> nb::Result<Message, Error> {
        let (dependencies, state) = self.split()?;
        let index = state.read_index(buffer)?;
        let ecan = Ecan::new(dependencies.registers());
        masked::<Id, _, _>(dependencies, || {
            let message = state.fetch(&ecan, index)?;
            ecan.clear_rxful(index);
            if buffer == BufferId::Fifo {
                state.fifo.pop();
            }
            Ok(message)
        })
    }

    /// Changes the bit timing. The module passes through configuration
    /// mode.
    pub fn set_bit_timing(&mut self, timing: BitTiming) -> nb::Result<(), Error> {
        timing
            .check()
            .map_err(|e| Error::from(ConfigurationError::BitTiming(e)))?;
        self.configure(|ecan, state| {
            let mut cfg2 = timing.cfg2();
            cfg2.set_wakfil(state.config.flags.wake_on_filter);
            ecan.raw().write(can::CFG1, timing.cfg1().0);
            ecan.raw().write(can::CFG2, cfg2.0);
            state.config.timing = timing;
        })?;
        log::debug!(
            "ECAN{}: {} bit/s",
            Id::MODULE,
            timing.bitrate(self.dependencies.can_clock()).to_Hz()
        );
        Ok(())
    }

    /// Bit timing in use
    pub fn bit_timing(&self) -> Option<BitTiming> {
        self.state.as_ref().map(|s| s.config.timing)
    }

    /// Bit rate resulting from the bit timing and the module clock
    pub fn bitrate(&self) -> Option<HertzU32> {
        self.bit_timing()
            .map(|t| t.bitrate(self.dependencies.can_clock()))
    }

    /// Services the module interrupt.
    ///
    /// Clears the observed flags, collects completed transmissions, follows
    /// the FIFO fill position and then calls the callback once per event
    /// that is enabled.
    pub fn isr(&mut self) {
        let events = {
            let Some(state) = self.state.as_mut() else {
                return;
            };
            let ecan = Ecan::new(self.dependencies.registers());
            let intf = ecan.intf();
            ecan.clear_intf(intf);

            let mut events = EventSet::from_flags(intf);
            if intf.tbif() && tx_buffers::completed(&ecan, &mut state.submitted) != 0 {
                events.insert(Event::TxSuccess);
            }
            if intf.rbif() {
                state.fifo.track(ecan.rxful());
            }
            if state.fifo.take_almost_full() {
                events.insert(Event::FifoAlmostFull);
            }
            if intf.rbovif() {
                ecan.clear_rxovf(ecan.rxovf());
            }
            if intf.errif() {
                log::trace!("ECAN{}: {:?}", Id::MODULE, ErrorState(intf));
            }
            events.intersection(state.notify)
        };
        for event in events.iter() {
            (self.notify)(&*self, event);
        }
    }

    /// Access to the dependencies
    pub fn dependencies(&self) -> &D {
        &self.dependencies
    }
}

impl<'a, Id, D, R, N> DynCan for Can<'a, Id, D, R, N>
where
    Id: CanId,
    D: Dependencies<Id>,
    R: Registers,
    N: Fn(&dyn DynCan, Event),
{
    fn module(&self) -> u8 {
        Id::MODULE
    }

    fn is_valid(&self) -> bool {
        self.state.is_some()
    }

    fn mode(&self) -> Option<Mode> {
        self.state.as_ref().map(|s| s.mode)
    }

    fn notify_mask(&self) -> Option<EventSet> {
        self.state.as_ref().map(|s| s.notify)
    }

    fn buffer_exists(&self, buffer: BufferId) -> bool {
        self.state.as_ref().map_or(false, |s| s.exists(buffer))
    }

    fn get_direction(&self, buffer: BufferId) -> Result<Direction, Error> {
        self.state()?.direction(buffer)
    }

    fn is_empty(&self, buffer: BufferId) -> bool {
        let Ok(state) = self.state() else {
            return true;
        };
        let ecan = self.ecan();
        match state.direction(buffer) {
            Ok(Direction::Tx) => state
                .tx_index(buffer)
                .map_or(true, |index| !tx_buffers::is_pending(&ecan, index)),
            Ok(Direction::Rx) => {
                let index = match buffer {
                    BufferId::Fifo => state.fifo.head(),
                    BufferId::Buffer(index) => index,
                };
                ecan.rxful() & 1 << index == 0
            }
            Err(_) => true,
        }
    }

    fn peek(&self, buffer: BufferId) -> nb::Result<Message, Error> {
        let state = self.state()?;
        let index = state.read_index(buffer)?;
        state.fetch(&self.ecan(), index)
    }

    fn filter_target(&self, filter: FilterId) -> Option<BufferId> {
        self.state.as_ref()?.routing.target(filter)
    }

    fn filter_mask(&self, filter: FilterId) -> Option<MaskId> {
        self.state.as_ref()?.routing.mask_of(filter)
    }

    fn filter_value(&self, filter: FilterId) -> Option<Header> {
        let routing = &self.state.as_ref()?.routing;
        routing.is_enabled(filter).then(|| routing.filter(filter))
    }

    fn mask_value(&self, mask: MaskId) -> Option<Header> {
        Some(self.state.as_ref()?.routing.mask(mask))
    }

    fn error_counters(&self) -> Option<ErrorCounters> {
        self.state.as_ref()?;
        Some(self.ecan().ec().into())
    }

    fn error_state(&self) -> Option<ErrorState> {
        self.state.as_ref()?;
        Some(self.ecan().intf().into())
    }
}
