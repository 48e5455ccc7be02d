//! DMA controller register map

use bitfield::bitfield;

/// Number of channels of the controller
pub const CHANNELS: u8 = 8;

/// Size of the register bank in 16-bit words
pub const WORDS: usize = 0x33;

/// Distance between the register blocks of two consecutive channels
pub const CHANNEL_STRIDE: u16 = 0x0C;

/// Channel control register
pub const CON: u16 = 0x00;
/// Channel IRQ select register
pub const REQ: u16 = 0x02;
/// Buffer A start address offset
pub const STA: u16 = 0x04;
/// Buffer B start address offset
pub const STB: u16 = 0x06;
/// Peripheral address register
pub const PAD: u16 = 0x08;
/// Transfer count register
pub const CNT: u16 = 0x0A;

/// Controller status register 0 (write collisions)
pub const DMACS0: u16 = 0x60;
/// Controller status register 1 (ping-pong status)
pub const DMACS1: u16 = 0x62;
/// Most recent DMA RAM address
pub const DSADR: u16 = 0x64;

/// Offset of register `register` of channel `channel`
pub fn channel(channel: u8, register: u16) -> u16 {
    CHANNEL_STRIDE * u16::from(channel) + register
}

bitfield! {
    /// `DMAxCON`
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct Con(u16);
    impl Debug;
    /// Bit 15 - Channel enable
    pub chen, set_chen: 15;
    /// Bit 14 - Byte (set) or word (clear) transfers
    pub size, set_size: 14;
    /// Bit 13 - Read from DMA RAM, write to peripheral
    pub dir, set_dir: 13;
    /// Bit 12 - Interrupt when half of the block has been moved
    pub half, set_half: 12;
    /// Bit 11 - Null data write to peripheral
    pub nullw, set_nullw: 11;
    /// Bits 4:5 - Addressing mode
    pub u8, amode, set_amode: 5, 4;
    /// Bits 0:1 - Operating mode; bit 1 enables ping-pong
    pub u8, mode, set_mode: 1, 0;
}

bitfield! {
    /// `DMAxREQ`
    #[derive(Copy, Clone)]
    pub struct Req(u16);
    impl Debug;
    /// Bit 15 - Force a single transfer
    pub force, set_force: 15;
    /// Bits 0:6 - Peripheral request source
    pub u8, irqsel, set_irqsel: 6, 0;
}

bitfield! {
    /// `DMACS1`
    #[derive(Copy, Clone)]
    pub struct Cs1(u16);
    impl Debug;
    /// Bits 8:11 - Last active channel
    pub u8, lstch, _: 11, 8;
    /// Bits 0:7 - Ping-pong status, one bit per channel; set when buffer B
    /// is selected
    pub u8, ppst, _: 7, 0;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn channel_offsets() {
        assert_eq!(channel(0, CON), 0x00);
        assert_eq!(channel(1, REQ), 0x0E);
        assert_eq!(channel(7, CNT), 0x5E);
        assert!(channel(7, CNT) < DMACS0);
    }

    #[test]
    fn con_fields() {
        let mut con = Con(0);
        con.set_chen(true);
        con.set_dir(true);
        con.set_amode(0b10);
        con.set_mode(0b10);
        assert_eq!(con.0, 0xA022);
    }
}
