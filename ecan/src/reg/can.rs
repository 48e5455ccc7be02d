//! ECAN module register map
//!
//! Offsets `0x20..0x80` are banked: the `WIN` bit of `CiCTRL1` selects
//! between the buffer control window (`WIN=0`) and the acceptance filter
//! window (`WIN=1`).

use super::Registers;
use bitfield::bitfield;

/// Size of the register bank in 16-bit words
pub const WORDS: usize = 0x40;

/// Control register 1
pub const CTRL1: u16 = 0x00;
/// Control register 2
pub const CTRL2: u16 = 0x02;
/// Interrupt code register
pub const VEC: u16 = 0x04;
/// FIFO control register
pub const FCTRL: u16 = 0x06;
/// FIFO status register
pub const FIFO: u16 = 0x08;
/// Interrupt flag register
pub const INTF: u16 = 0x0A;
/// Interrupt enable register
pub const INTE: u16 = 0x0C;
/// Transmit/receive error count register
pub const EC: u16 = 0x0E;
/// Baud rate configuration register 1
pub const CFG1: u16 = 0x10;
/// Baud rate configuration register 2
pub const CFG2: u16 = 0x12;
/// Acceptance filter enable register
pub const FEN1: u16 = 0x14;
/// Filter 0-7 mask selection register
pub const FMSKSEL1: u16 = 0x18;
/// Filter 8-15 mask selection register
pub const FMSKSEL2: u16 = 0x1A;

// WIN = 0

/// Receive buffer full register, buffers 0-15
pub const RXFUL1: u16 = 0x20;
/// Receive buffer full register, buffers 16-31
pub const RXFUL2: u16 = 0x22;
/// Receive buffer overflow register, buffers 0-15
pub const RXOVF1: u16 = 0x28;
/// Receive buffer overflow register, buffers 16-31
pub const RXOVF2: u16 = 0x2A;
/// Transmit/receive buffer control register of buffers 0 and 1. Buffers
/// 2-7 follow in pairs at consecutive words.
pub const TR01CON: u16 = 0x30;
/// Receive data register, source address of the RX DMA channel
pub const RXD: u16 = 0x40;
/// Transmit data register, destination address of the TX DMA channel
pub const TXD: u16 = 0x42;

// WIN = 1

/// Filter 0-3 buffer pointer register. Filters 4-15 follow at consecutive
/// words, four filters per register.
pub const BUFPNT1: u16 = 0x20;
/// Acceptance mask 0 standard identifier register. Masks 1 and 2 follow,
/// two words per mask.
pub const RXM0SID: u16 = 0x30;
/// Acceptance filter 0 standard identifier register. Filters 1-15 follow,
/// two words per filter.
pub const RXF0SID: u16 = 0x40;

/// Buffer pointer value that routes a filter match into the FIFO
pub const BUFPNT_FIFO: u16 = 0xF;

/// Operation mode encoding shared by `REQOP` and `OPMODE`
pub mod opmode {
    /// Normal operation
    pub const NORMAL: u8 = 0b000;
    /// Module disabled
    pub const DISABLE: u8 = 0b001;
    /// Loopback
    pub const LOOPBACK: u8 = 0b010;
    /// Listen only
    pub const LISTEN_ONLY: u8 = 0b011;
    /// Configuration
    pub const CONFIGURATION: u8 = 0b100;
    /// Listen to all messages
    pub const LISTEN_ALL: u8 = 0b111;
}

bitfield! {
    /// `CiCTRL1`
    #[derive(Copy, Clone)]
    pub struct Ctrl1(u16);
    impl Debug;
    /// Bit 13 - Stop in idle mode
    pub csidl, set_csidl: 13;
    /// Bit 12 - Abort all pending transmissions
    pub abat, set_abat: 12;
    /// Bits 8:10 - Request operation mode
    pub u8, reqop, set_reqop: 10, 8;
    /// Bits 5:7 - Operation mode acknowledged by the module
    pub u8, opmode, _: 7, 5;
    /// Bit 3 - Timestamp on reception
    pub cancap, set_cancap: 3;
    /// Bit 0 - SFR map window select
    pub win, set_win: 0;
}

bitfield! {
    /// `CiCFG1`
    #[derive(Copy, Clone)]
    pub struct Cfg1(u16);
    impl Debug;
    /// Bits 6:7 - Synchronization jump width, minus one
    pub u8, sjw, set_sjw: 7, 6;
    /// Bits 0:5 - Baud rate prescaler, minus one
    pub u8, brp, set_brp: 5, 0;
}

bitfield! {
    /// `CiCFG2`
    #[derive(Copy, Clone)]
    pub struct Cfg2(u16);
    impl Debug;
    /// Bit 14 - Use the CAN bus line filter for wake-up
    pub wakfil, set_wakfil: 14;
    /// Bits 8:10 - Phase segment 2, minus one
    pub u8, seg2ph, set_seg2ph: 10, 8;
    /// Bit 7 - Phase segment 2 is freely programmable
    pub seg2phts, set_seg2phts: 7;
    /// Bit 6 - Sample the bus line three times
    pub sam, set_sam: 6;
    /// Bits 3:5 - Phase segment 1, minus one
    pub u8, seg1ph, set_seg1ph: 5, 3;
    /// Bits 0:2 - Propagation segment, minus one
    pub u8, prseg, set_prseg: 2, 0;
}

bitfield! {
    /// `CiFCTRL`
    #[derive(Copy, Clone)]
    pub struct Fctrl(u16);
    impl Debug;
    /// Bits 13:15 - Number of message buffers in DMA RAM
    pub u8, dmabs, set_dmabs: 15, 13;
    /// Bits 0:4 - FIFO start area
    pub u8, fsa, set_fsa: 4, 0;
}

bitfield! {
    /// `CiFIFO`
    #[derive(Copy, Clone)]
    pub struct Fifo(u16);
    impl Debug;
    /// Bits 8:13 - FIFO buffer pointer, the next buffer the module writes
    pub u8, fbp, set_fbp: 13, 8;
    /// Bits 0:5 - FIFO next read buffer pointer
    pub u8, fnrb, set_fnrb: 5, 0;
}

bitfield! {
    /// `CiINTF`. Status bits 8-13 are read-only, flag bits 0-7 are
    /// cleared by writing zero.
    #[derive(Copy, Clone)]
    pub struct Intf(u16);
    impl Debug;
    /// Bit 13 - Transmitter in bus off state
    pub txbo, _: 13;
    /// Bit 12 - Transmitter in error passive state
    pub txbp, _: 12;
    /// Bit 11 - Receiver in error passive state
    pub rxbp, _: 11;
    /// Bit 10 - Transmitter in error warning state
    pub txwar, _: 10;
    /// Bit 9 - Receiver in error warning state
    pub rxwar, _: 9;
    /// Bit 8 - Transmitter or receiver in error warning state
    pub ewarn, _: 8;
    /// Bit 7 - Invalid message received
    pub ivrif, set_ivrif: 7;
    /// Bit 6 - Bus wake-up activity
    pub wakif, set_wakif: 6;
    /// Bit 5 - Error interrupt
    pub errif, set_errif: 5;
    /// Bit 3 - FIFO almost full
    pub fifoif, set_fifoif: 3;
    /// Bit 2 - Receive buffer overflow
    pub rbovif, set_rbovif: 2;
    /// Bit 1 - Receive buffer
    pub rbif, set_rbif: 1;
    /// Bit 0 - Transmit buffer
    pub tbif, set_tbif: 0;
}

bitfield! {
    /// `CiINTE`
    #[derive(Copy, Clone)]
    pub struct Inte(u16);
    impl Debug;
    /// Bit 7 - Invalid message received
    pub ivrie, set_ivrie: 7;
    /// Bit 6 - Bus wake-up activity
    pub wakie, set_wakie: 6;
    /// Bit 5 - Error interrupt
    pub errie, set_errie: 5;
    /// Bit 3 - FIFO almost full
    pub fifoie, set_fifoie: 3;
    /// Bit 2 - Receive buffer overflow
    pub rbovie, set_rbovie: 2;
    /// Bit 1 - Receive buffer
    pub rbie, set_rbie: 1;
    /// Bit 0 - Transmit buffer
    pub tbie, set_tbie: 0;
}

bitfield! {
    /// `CiEC`
    #[derive(Copy, Clone)]
    pub struct Ec(u16);
    impl Debug;
    /// Bits 8:15 - Transmit error count
    pub u8, terrcnt, _: 15, 8;
    /// Bits 0:7 - Receive error count
    pub u8, rerrcnt, _: 7, 0;
}

bitfield! {
    /// Half of a `CiTRmnCON` register, controlling a single buffer
    #[derive(Copy, Clone)]
    pub struct TxControl(u8);
    impl Debug;
    /// Bit 7 - Buffer is a transmit buffer
    pub txen, set_txen: 7;
    /// Bit 6 - Message was aborted
    pub txabt, _: 6;
    /// Bit 5 - Message lost arbitration
    pub txlarb, _: 5;
    /// Bit 4 - Error detected during transmission
    pub txerr, _: 4;
    /// Bit 3 - Transmission requested
    pub txreq, set_txreq: 3;
    /// Bit 2 - Auto-remote transmit enable
    pub rtren, set_rtren: 2;
    /// Bits 0:1 - Message priority
    pub u8, txpri, set_txpri: 1, 0;
}

bitfield! {
    /// `CiRXFnSID` / `CiRXMnSID`. The `exide` bit is named `MIDE` in the
    /// mask registers.
    #[derive(Copy, Clone)]
    pub struct AcceptanceSid(u16);
    impl Debug;
    /// Bits 5:15 - Standard identifier
    pub u16, sid, set_sid: 15, 5;
    /// Bit 3 - Extended identifier enable / match identifier type
    pub exide, set_exide: 3;
    /// Bits 0:1 - Extended identifier bits 16:17
    pub u8, eid_high, set_eid_high: 1, 0;
}

/// Offset of the `CiTRmnCON` register holding buffer `index` (0-7)
pub fn trcon(index: u8) -> u16 {
    TR01CON + 2 * u16::from(index / 2)
}

/// Bit position of buffer `index` inside its `CiTRmnCON` register
pub fn trcon_shift(index: u8) -> u16 {
    8 * u16::from(index % 2)
}

/// Offset of the standard identifier register of filter `index` (0-15)
pub fn rxf_sid(index: u8) -> u16 {
    RXF0SID + 4 * u16::from(index)
}

/// Offset of the extended identifier register of filter `index` (0-15)
pub fn rxf_eid(index: u8) -> u16 {
    rxf_sid(index) + 2
}

/// Offset of the standard identifier register of mask `index` (0-2)
pub fn rxm_sid(index: u8) -> u16 {
    RXM0SID + 4 * u16::from(index)
}

/// Offset of the extended identifier register of mask `index` (0-2)
pub fn rxm_eid(index: u8) -> u16 {
    rxm_sid(index) + 2
}

/// Offset of the `CiBUFPNTn` register holding filter `index` (0-15)
pub fn bufpnt(index: u8) -> u16 {
    BUFPNT1 + 2 * u16::from(index / 4)
}

/// Bit position of filter `index` inside its `CiBUFPNTn` register
pub fn bufpnt_shift(index: u8) -> u16 {
    4 * u16::from(index % 4)
}

/// Offset of the `CiFMSKSELn` register holding filter `index` (0-15)
pub fn fmsksel(index: u8) -> u16 {
    FMSKSEL1 + 2 * u16::from(index / 8)
}

/// Bit position of filter `index` inside its `CiFMSKSELn` register
pub fn fmsksel_shift(index: u8) -> u16 {
    2 * u16::from(index % 8)
}

/// Typed access to the ECAN register bank.
pub struct Ecan<'r, R> {
    regs: &'r R,
}

impl<'r, R: Registers> Ecan<'r, R> {
    /// Wraps the register bank of one module
    pub fn new(regs: &'r R) -> Self {
        Self { regs }
    }

    /// Raw access to the registers.
    pub fn raw(&self) -> &'r R {
        self.regs
    }

    /// `CiCTRL1`
    pub fn ctrl1(&self) -> Ctrl1 {
        Ctrl1(self.regs.read(CTRL1))
    }

    /// Read-modify-write of `CiCTRL1`
    pub fn modify_ctrl1(&self, f: impl FnOnce(&mut Ctrl1)) {
        let mut ctrl1 = self.ctrl1();
        f(&mut ctrl1);
        self.regs.write(CTRL1, ctrl1.0);
    }

    /// Runs `f` with the filter window selected. The buffer window is
    /// selected again afterwards.
    pub fn with_filter_window<T>(&self, f: impl FnOnce(&Self) -> T) -> T {
        self.modify_ctrl1(|r| r.set_win(true));
        let result = f(self);
        self.modify_ctrl1(|r| r.set_win(false));
        result
    }

    /// `CiINTF`
    pub fn intf(&self) -> Intf {
        Intf(self.regs.read(INTF))
    }

    /// Clears the flags set in `flags`. Other flags are left untouched.
    pub fn clear_intf(&self, flags: Intf) {
        self.regs.write(INTF, !(flags.0 & 0x00FF));
    }

    /// Writes `CiINTE`
    pub fn set_inte(&self, inte: Inte) {
        self.regs.write(INTE, inte.0);
    }

    /// `CiEC`, both error counters
    pub fn ec(&self) -> Ec {
        Ec(self.regs.read(EC))
    }

    /// `CiFIFO`, put and read pointers
    pub fn fifo(&self) -> Fifo {
        Fifo(self.regs.read(FIFO))
    }

    /// `CiFEN1`, one enable bit per filter
    pub fn fen1(&self) -> u16 {
        self.regs.read(FEN1)
    }

    /// Writes `CiFEN1`
    pub fn set_fen1(&self, enabled: u16) {
        self.regs.write(FEN1, enabled);
    }

    /// `CiRXFUL2:CiRXFUL1` as a single set. Requires the buffer window.
    pub fn rxful(&self) -> u32 {
        u32::from(self.regs.read(RXFUL1)) | u32::from(self.regs.read(RXFUL2)) << 16
    }

    /// Marks buffer `index` as read. Requires the buffer window.
    ///
    /// The flags can only be cleared by software, so writing ones leaves the
    /// flags of the other buffers untouched even if they are raised in the
    /// meantime.
    pub fn clear_rxful(&self, index: u8) {
        if index < 16 {
            self.regs.write(RXFUL1, !(1 << index));
        } else {
            self.regs.write(RXFUL2, !(1 << (index - 16)));
        }
    }

    /// `CiRXOVF2:CiRXOVF1` as a single set. Requires the buffer window.
    pub fn rxovf(&self) -> u32 {
        u32::from(self.regs.read(RXOVF1)) | u32::from(self.regs.read(RXOVF2)) << 16
    }

    /// Clears the overflow flags in `set`. Requires the buffer window.
    pub fn clear_rxovf(&self, set: u32) {
        self.regs.write(RXOVF1, !(set as u16));
        self.regs.write(RXOVF2, !((set >> 16) as u16));
    }

    /// Control bits of buffer `index` (0-7). Requires the buffer window.
    pub fn trcon(&self, index: u8) -> TxControl {
        TxControl((self.regs.read(trcon(index)) >> trcon_shift(index)) as u8)
    }

    /// Writes the control bits selected by `mask` of buffer `index` (0-7).
    /// The other buffer sharing the register is not affected. Requires the
    /// buffer window.
    pub fn modify_trcon(&self, index: u8, mask: u8, value: TxControl) {
        let shift = trcon_shift(index);
        self.regs.modify(
            trcon(index),
            u16::from(mask) << shift,
            u16::from(value.0) << shift,
        );
    }
}
