//! Register level model of an ECAN module, the DMA controller and DMA RAM
//! for host tests.
//!
//! The model reacts to register writes the way the silicon does where the
//! driver depends on it: mode requests are acknowledged immediately unless
//! refused, filter registers are banked and locked outside configuration
//! mode, and flag registers are clear-only. Bus traffic happens only when a
//! test calls [`Silicon::run`] or [`Silicon::inject`]; frames move through
//! DMA RAM at the address of the enabled DMA channel whose peripheral
//! address is the module's data register.

extern crate std;

use crate::message::{raw, Message};
use crate::mode::Mode;
use crate::reg::can::{self, opmode, AcceptanceSid, Ctrl1, Fctrl, Fifo, TxControl};
use crate::reg::dma as dreg;
use crate::reg::Registers;
use core::ops::Range;
use ecan_core::{CanId, Dependencies, DmaMemory};
use fugit::{HertzU32, RateExtU32};
use std::boxed::Box;
use std::cell::{Cell, RefCell};
use std::vec::Vec;
use vcell::VolatileCell;

/// Plain register memory
pub(crate) struct Memory<const N: usize> {
    words: [Cell<u16>; N],
}

impl<const N: usize> Memory<N> {
    pub fn new() -> Self {
        Self {
            words: core::array::from_fn(|_| Cell::new(0)),
        }
    }
}

unsafe impl<const N: usize> Registers for Memory<N> {
    fn read(&self, offset: u16) -> u16 {
        self.words[usize::from(offset / 2)].get()
    }

    fn write(&self, offset: u16, value: u16) {
        self.words[usize::from(offset / 2)].set(value)
    }
}

pub(crate) type DmaRegisters = Memory<{ dreg::WORDS }>;

/// Heap allocated stand-in for DMA RAM
pub(crate) struct DmaRam {
    words: Box<[VolatileCell<u16>]>,
}

impl DmaRam {
    pub fn new(len: usize) -> Self {
        Self {
            words: (0..len).map(|_| VolatileCell::new(0)).collect(),
        }
    }

    pub fn words(&self, start: usize, len: usize) -> &[VolatileCell<u16>] {
        &self.words[start..start + len]
    }

    fn block(&self, start: usize) -> [u16; raw::BUFFER_WORDS] {
        core::array::from_fn(|i| self.words[start + i].get())
    }

    fn store(&self, start: usize, words: &[u16; raw::BUFFER_WORDS]) {
        for (i, word) in words.iter().enumerate() {
            self.words[start + i].set(*word);
        }
    }
}

unsafe impl DmaMemory for DmaRam {
    fn dma_ram(&self) -> Range<usize> {
        let start = self.words.as_ptr() as usize;
        start..start + self.words.len() * 2
    }
}

/// The ECAN register bank
pub(crate) struct CanRegisters {
    common: [Cell<u16>; 0x10],
    buffer_window: [Cell<u16>; 0x30],
    filter_window: [Cell<u16>; 0x30],
    refuse: Cell<Option<Mode>>,
}

const RXFUL: [u16; 2] = [can::RXFUL1, can::RXFUL2];
const RXOVF: [u16; 2] = [can::RXOVF1, can::RXOVF2];

impl CanRegisters {
    fn new() -> Self {
        Self {
            common: core::array::from_fn(|_| Cell::new(0)),
            buffer_window: core::array::from_fn(|_| Cell::new(0)),
            filter_window: core::array::from_fn(|_| Cell::new(0)),
            refuse: Cell::new(None),
        }
    }

    fn ctrl1(&self) -> Ctrl1 {
        Ctrl1(self.common[0].get())
    }

    fn configuring(&self) -> bool {
        self.ctrl1().opmode() == opmode::CONFIGURATION
    }

    fn cell(&self, offset: u16) -> &Cell<u16> {
        let index = usize::from(offset / 2);
        if index < 0x10 {
            &self.common[index]
        } else if self.ctrl1().win() {
            &self.filter_window[index - 0x10]
        } else {
            &self.buffer_window[index - 0x10]
        }
    }

    fn common(&self, offset: u16) -> &Cell<u16> {
        &self.common[usize::from(offset / 2)]
    }

    fn buffer(&self, offset: u16) -> &Cell<u16> {
        &self.buffer_window[usize::from(offset / 2) - 0x10]
    }

    fn filter(&self, offset: u16) -> &Cell<u16> {
        &self.filter_window[usize::from(offset / 2) - 0x10]
    }

    fn raise(&self, flags: u16) {
        let intf = self.common(can::INTF);
        intf.set(intf.get() | flags);
    }

    fn set_bit(cell: &Cell<u16>, bit: u8) {
        cell.set(cell.get() | 1 << bit);
    }

    fn rxful(&self, index: u8) -> bool {
        self.buffer(RXFUL[usize::from(index / 16)]).get() & 1 << (index % 16) != 0
    }

    fn trcon(&self, index: u8) -> TxControl {
        TxControl((self.buffer(can::trcon(index)).get() >> can::trcon_shift(index)) as u8)
    }

    fn clear_txreq(&self, index: u8) {
        let cell = self.buffer(can::trcon(index));
        cell.set(cell.get() & !(1 << 3 << can::trcon_shift(index)));
    }
}

unsafe impl Registers for CanRegisters {
    fn read(&self, offset: u16) -> u16 {
        self.cell(offset).get()
    }

    fn write(&self, offset: u16, value: u16) {
        const OPMODE: u16 = 0b111 << 5;
        let cell = self.cell(offset);
        let old = cell.get();
        match offset {
            can::CTRL1 => {
                let mut new = Ctrl1(value & !OPMODE | old & OPMODE);
                let requested = new.reqop();
                if self.refuse.get().map(Mode::opmode) != Some(requested) {
                    new.0 = new.0 & !OPMODE | u16::from(requested) << 5;
                }
                cell.set(new.0);
            }
            can::INTF => cell.set(old & 0xFF00 | old & value & 0x00FF),
            can::VEC | can::FIFO | can::EC => {}
            can::FCTRL => {
                if self.configuring() {
                    cell.set(value);
                    let mut fifo = Fifo(0);
                    fifo.set_fbp(Fctrl(value).fsa());
                    fifo.set_fnrb(Fctrl(value).fsa());
                    self.common(can::FIFO).set(fifo.0);
                }
            }
            can::CFG1 | can::CFG2 | can::FEN1 | can::FMSKSEL1 | can::FMSKSEL2 => {
                if self.configuring() {
                    cell.set(value);
                }
            }
            _ if offset >= 0x20 && self.ctrl1().win() => {
                if self.configuring() {
                    cell.set(value);
                }
            }
            can::RXFUL1 | can::RXFUL2 | can::RXOVF1 | can::RXOVF2 => cell.set(old & value),
            0x30..=0x36 => {
                // TXABT, TXLARB and TXERR are read-only
                const STATUS: u16 = 0x7070;
                cell.set(value & !STATUS | old & STATUS);
            }
            _ => cell.set(value),
        }
    }
}

/// A module with its DMA controller and DMA RAM
pub(crate) struct Silicon {
    can: CanRegisters,
    dma: DmaRegisters,
    ram: DmaRam,
    transmitted: RefCell<Vec<(u8, Message)>>,
}

impl Silicon {
    pub fn new() -> Self {
        Self {
            can: CanRegisters::new(),
            dma: DmaRegisters::new(),
            ram: DmaRam::new(512),
            transmitted: RefCell::new(Vec::new()),
        }
    }

    pub fn can(&self) -> &CanRegisters {
        &self.can
    }

    pub fn dma(&self) -> &DmaRegisters {
        &self.dma
    }

    pub fn ram(&self) -> &DmaRam {
        &self.ram
    }

    /// Stops acknowledging requests for `mode`
    pub fn refuse_mode(&self, mode: Option<Mode>) {
        self.can.refuse.set(mode);
    }

    /// Reads a register of the filter window regardless of `WIN`
    pub fn filter_window(&self, offset: u16) -> u16 {
        self.can.filter(offset).get()
    }

    /// Raises interrupt flags
    pub fn raise(&self, flags: u16) {
        self.can.raise(flags);
    }

    /// Frames sent so far with the buffer they came from
    pub fn transmitted(&self) -> Vec<(u8, Message)> {
        self.transmitted.borrow().clone()
    }

    fn opmode(&self) -> u8 {
        self.can.ctrl1().opmode()
    }

    /// Word index in DMA RAM of the buffers served by the enabled channel
    /// feeding `peripheral`
    fn channel_for(&self, peripheral: u16) -> Option<usize> {
        (0..dreg::CHANNELS).find_map(|ch| {
            let con = dreg::Con(self.dma.read(dreg::channel(ch, dreg::CON)));
            let pad = self.dma.read(dreg::channel(ch, dreg::PAD));
            (con.chen() && pad == peripheral)
                .then(|| usize::from(self.dma.read(dreg::channel(ch, dreg::STA)) / 2))
        })
    }

    /// Sends every pending frame, highest priority first and lowest buffer
    /// first among equals. Frames loop back in loopback mode.
    pub fn run(&self) {
        loop {
            let mode = self.opmode();
            if mode != opmode::NORMAL && mode != opmode::LOOPBACK {
                return;
            }
            let Some(base) = self.channel_for(Can1::TX_DATA_ADDRESS) else {
                return;
            };
            let mut next: Option<(u8, u8)> = None;
            for index in 0..8 {
                let control = self.can.trcon(index);
                if control.txen()
                    && control.txreq()
                    && next.map_or(true, |(priority, _)| control.txpri() > priority)
                {
                    next = Some((control.txpri(), index));
                }
            }
            let Some((_, index)) = next else {
                return;
            };
            let words = self.ram.block(base + usize::from(index) * raw::BUFFER_WORDS);
            self.can.clear_txreq(index);
            self.can.raise(1 << 0);
            let mut message = raw::decode(&words);
            message.filter = None;
            self.transmitted.borrow_mut().push((index, message));
            if mode == opmode::LOOPBACK {
                self.deliver(&words);
            }
        }
    }

    /// Receives `message` from the bus. Returns `false` if the module is not
    /// listening.
    pub fn inject(&self, message: &Message) -> bool {
        match self.opmode() {
            opmode::NORMAL | opmode::LISTEN_ONLY | opmode::LISTEN_ALL | opmode::LOOPBACK => {
                self.deliver(&raw::encode(message));
                true
            }
            _ => false,
        }
    }

    fn acceptance(&self, sid_offset: u16) -> (u16, bool, u32) {
        let sid = AcceptanceSid(self.can.filter(sid_offset).get());
        let eid = u32::from(sid.eid_high()) << 16 | u32::from(self.can.filter(sid_offset + 2).get());
        (sid.sid(), sid.exide(), eid)
    }

    fn deliver(&self, words: &[u16; raw::BUFFER_WORDS]) {
        let sid = words[0] >> 2 & 0x7FF;
        let ide = words[0] & 1 != 0;
        let eid = u32::from(words[1] & 0x0FFF) << 6 | u32::from(words[2] >> 10);
        let enabled = self.can.common(can::FEN1).get();

        for filter in 0..16 {
            if enabled & 1 << filter == 0 {
                continue;
            }
            let mask = self.can.common(can::fmsksel(filter)).get() >> can::fmsksel_shift(filter) & 0b11;
            if mask == 0b11 {
                continue;
            }
            let (fsid, exide, feid) = self.acceptance(can::rxf_sid(filter));
            let (msid, mide, meid) = self.acceptance(can::rxm_sid(mask as u8));
            if mide && exide != ide {
                continue;
            }
            if (fsid ^ sid) & msid != 0 || ide && (feid ^ eid) & meid != 0 {
                continue;
            }
            let target = self.can.filter(can::bufpnt(filter)).get() >> can::bufpnt_shift(filter) & 0xF;
            self.store(filter, target as u8, words);
            return;
        }
    }

    fn store(&self, filter: u8, target: u8, words: &[u16; raw::BUFFER_WORDS]) {
        let Some(base) = self.channel_for(Can1::RX_DATA_ADDRESS) else {
            return;
        };
        let fctrl = Fctrl(self.can.common(can::FCTRL).get());
        let total = [4, 6, 8, 12, 16, 24, 32, 32][usize::from(fctrl.dmabs())];
        let start = fctrl.fsa();
        let into_fifo = u16::from(target) == can::BUFPNT_FIFO;
        let mut fifo = Fifo(self.can.common(can::FIFO).get());
        let slot = if into_fifo { fifo.fbp() } else { target };
        if slot >= total || slot < 8 && self.can.trcon(slot).txen() {
            return;
        }

        if self.can.rxful(slot) {
            CanRegisters::set_bit(self.can.buffer(RXOVF[usize::from(slot / 16)]), slot % 16);
            self.can.raise(1 << 2);
            return;
        }
        let mut stored = *words;
        stored[7] = u16::from(filter) << 8;
        self.ram.store(base + usize::from(slot) * raw::BUFFER_WORDS, &stored);
        CanRegisters::set_bit(self.can.buffer(RXFUL[usize::from(slot / 16)]), slot % 16);
        self.can.raise(1 << 1);

        if into_fifo {
            fifo.set_fbp(if slot + 1 >= total { start } else { slot + 1 });
            self.can.common(can::FIFO).set(fifo.0);
            let full = (start..total).filter(|i| self.can.rxful(*i)).count();
            if full + 1 >= usize::from(total - start) {
                self.can.raise(1 << 3);
            }
        }
    }
}

/// Module identity used by the tests
pub(crate) enum Can1 {}

unsafe impl CanId for Can1 {
    const MODULE: u8 = 1;
    const RX_REQUEST: u8 = 0x22;
    const TX_REQUEST: u8 = 0x46;
    const RX_DATA_ADDRESS: u16 = 0x0440;
    const TX_DATA_ADDRESS: u16 = 0x0442;
}

/// Peripheral environment of the module
pub(crate) struct Board<'s> {
    silicon: &'s Silicon,
    interrupt: Cell<bool>,
    masked_sections: Cell<u32>,
}

impl<'s> Board<'s> {
    pub fn new(silicon: &'s Silicon) -> Self {
        Self {
            silicon,
            interrupt: Cell::new(true),
            masked_sections: Cell::new(0),
        }
    }

    /// Number of times the module interrupt has been masked
    pub fn masked_sections(&self) -> u32 {
        self.masked_sections.get()
    }

    /// `true` if the module interrupt is currently enabled
    pub fn interrupt_enabled(&self) -> bool {
        self.interrupt.get()
    }
}

unsafe impl DmaMemory for Board<'_> {
    fn dma_ram(&self) -> Range<usize> {
        self.silicon.ram.dma_ram()
    }
}

unsafe impl Dependencies<Can1> for Board<'_> {
    type Registers = CanRegisters;

    fn registers(&self) -> &CanRegisters {
        &self.silicon.can
    }

    fn can_clock(&self) -> HertzU32 {
        40.MHz()
    }

    fn disable_interrupt(&self) -> bool {
        self.masked_sections.set(self.masked_sections.get() + 1);
        self.interrupt.replace(false)
    }

    fn restore_interrupt(&self, was_enabled: bool) {
        self.interrupt.set(was_enabled);
    }
}
