//! CAN bus configuration

use crate::reg::can::{Cfg1, Cfg2, Fctrl};
use core::ops::RangeInclusive;
use fugit::HertzU32;

/// Number of buffers with a transmit/receive control register
pub const HARDWARE_BUFFERS: u8 = 8;

/// Configuration of the CAN module, fixed after initialisation except for
/// the bit timing.
///
/// The default value corresponds to all configuration registers being zero.
#[derive(Copy, Clone, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanConfig {
    /// Bit timing parameters
    pub timing: BitTiming,
    /// Module level options
    pub flags: ModuleFlags,
    /// Receive FIFO placement
    pub fifo: FifoConfig,
    /// Direction of buffers B0..B7. Buffers inside the FIFO must be
    /// [`Direction::Rx`].
    pub directions: [Direction; HARDWARE_BUFFERS as usize],
}

impl CanConfig {
    /// Checks all fields and their combination
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.timing.check().map_err(ConfigurationError::BitTiming)?;
        self.fifo.fctrl()?;
        for (index, direction) in self.directions.iter().enumerate() {
            let index = index as u8;
            if *direction == Direction::Tx && self.fifo.contains(index) {
                return Err(ConfigurationError::FifoBufferNotRx(index));
            }
        }
        Ok(())
    }

    /// Number of message buffers placed in DMA RAM
    pub fn dma_buffers(&self) -> u8 {
        self.fifo.end()
    }
}

/// Module level options
#[derive(Copy, Clone, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ModuleFlags {
    /// Use the bus line filter to detect wake-up activity
    pub wake_on_filter: bool,
    /// Stop the module while the CPU idles
    pub stop_in_idle: bool,
    /// Capture a timestamp on reception
    pub timestamp: bool,
}

/// Direction of a message buffer
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// Receive buffer
    #[default]
    Rx,
    /// Transmit buffer
    Tx,
}

/// Number of buffers in the receive FIFO
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FifoLength {
    /// 4 buffers
    #[default]
    Four,
    /// 6 buffers
    Six,
    /// 8 buffers
    Eight,
    /// 12 buffers
    Twelve,
    /// 16 buffers
    Sixteen,
    /// 24 buffers
    TwentyFour,
    /// 32 buffers
    ThirtyTwo,
}

impl FifoLength {
    /// Number of buffers
    pub fn slots(self) -> u8 {
        match self {
            Self::Four => 4,
            Self::Six => 6,
            Self::Eight => 8,
            Self::Twelve => 12,
            Self::Sixteen => 16,
            Self::TwentyFour => 24,
            Self::ThirtyTwo => 32,
        }
    }

    /// Length with `slots` buffers, if supported
    pub fn from_slots(slots: u8) -> Option<Self> {
        Some(match slots {
            4 => Self::Four,
            6 => Self::Six,
            8 => Self::Eight,
            12 => Self::Twelve,
            16 => Self::Sixteen,
            24 => Self::TwentyFour,
            32 => Self::ThirtyTwo,
            _ => return None,
        })
    }
}

/// `DMABS` code for a total of `buffers` message buffers in DMA RAM
fn dmabs(buffers: u8) -> Option<u8> {
    FifoLength::from_slots(buffers).map(|l| l as u8)
}

/// Placement of the receive FIFO.
///
/// The FIFO runs from buffer `start` to the last buffer placed in DMA RAM,
/// so `start + length` is the total buffer count and must itself be one of
/// the counts of [`FifoLength`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FifoConfig {
    /// First FIFO buffer
    pub start: u8,
    /// Number of FIFO buffers
    pub length: FifoLength,
}

impl FifoConfig {
    /// One past the last FIFO buffer
    pub fn end(&self) -> u8 {
        self.start.saturating_add(self.length.slots())
    }

    /// `true` if buffer `index` is part of the FIFO
    pub fn contains(&self, index: u8) -> bool {
        (self.start..self.end()).contains(&index)
    }

    /// Packs the geometry into `CiFCTRL`
    pub fn fctrl(&self) -> Result<Fctrl, ConfigurationError> {
        if self.start >= 32 {
            return Err(ConfigurationError::FifoStartOutOfRange);
        }
        let code = dmabs(self.end()).ok_or(ConfigurationError::FifoExtent {
            start: self.start,
            length: self.length.slots(),
        })?;
        let mut fctrl = Fctrl(0);
        fctrl.set_dmabs(code);
        fctrl.set_fsa(self.start);
        Ok(fctrl)
    }

    /// Reads the geometry back from `CiFCTRL`
    pub fn from_fctrl(fctrl: Fctrl) -> Option<Self> {
        // Reserved code, the silicon treats it as 32 buffers
        let total: u8 = match fctrl.dmabs() {
            0b111 => 32,
            code => [4, 6, 8, 12, 16, 24, 32][usize::from(code)],
        };
        let start = fctrl.fsa();
        Some(Self {
            start,
            length: FifoLength::from_slots(total.checked_sub(start)?)?,
        })
    }
}

/// Bit timing parameters.
///
/// All values are *real* values; the offsets of the register encoding are
/// handled by the driver. A bit consists of the synchronisation segment
/// (one time quantum), the propagation segment and both phase segments.
/// The time quantum is `2 * prescaler / FCAN`.
///
/// The default value is the register reset state: every field at its
/// minimum.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BitTiming {
    /// Baud rate prescaler, 1..=64
    pub prescaler: u8,
    /// Synchronisation jump width in time quanta, 1..=4
    pub sjw: u8,
    /// Propagation segment in time quanta, 1..=8
    pub propagation: u8,
    /// Phase segment 1 in time quanta, 1..=8
    pub phase_seg_1: u8,
    /// Phase segment 2 in time quanta, 1..=8. Only used if
    /// `phase_seg_2_programmable` is set.
    pub phase_seg_2: u8,
    /// Use `phase_seg_2`. Otherwise the silicon picks the larger of phase
    /// segment 1 and the information processing time.
    pub phase_seg_2_programmable: bool,
    /// Sample the bus three times per bit
    pub triple_sample: bool,
}

impl Default for BitTiming {
    fn default() -> Self {
        Self {
            prescaler: 1,
            sjw: 1,
            propagation: 1,
            phase_seg_1: 1,
            phase_seg_2: 1,
            phase_seg_2_programmable: false,
            triple_sample: false,
        }
    }
}

/// Misconfigurations of [`BitTiming`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BitTimingError {
    /// Prescaler is outside the wrapped `RangeInclusive`
    PrescalerOutOfRange(RangeInclusive<u8>),
    /// SJW is outside the wrapped `RangeInclusive`
    SynchronizationJumpWidthOutOfRange(RangeInclusive<u8>),
    /// Propagation segment is outside the wrapped `RangeInclusive`
    PropagationOutOfRange(RangeInclusive<u8>),
    /// Phase segment 1 is outside the wrapped `RangeInclusive`
    PhaseSeg1OutOfRange(RangeInclusive<u8>),
    /// Phase segment 2 is outside the wrapped `RangeInclusive`
    PhaseSeg2OutOfRange(RangeInclusive<u8>),
    /// No valid prescaler could be found
    ///
    /// `can_clock` must be divisible by `2 * bitrate * bit_time_quanta` for
    /// some bit time between 8 and 25 time quanta.
    NoValidPrescaler {
        /// Provided module clock
        can_clock: HertzU32,
        /// Requested bitrate
        bitrate: HertzU32,
    },
}

const PRESCALER: RangeInclusive<u8> = 1..=64;
const SJW: RangeInclusive<u8> = 1..=4;
const SEGMENT: RangeInclusive<u8> = 1..=8;
/// Time quanta per bit tried by [`BitTiming::for_bitrate`]
const QUANTA_PER_BIT: RangeInclusive<u8> = 8..=25;
/// Information processing time in time quanta
const IPT: u8 = 2;

impl BitTiming {
    /// Checks every field against its range
    pub fn check(&self) -> Result<(), BitTimingError> {
        if !PRESCALER.contains(&self.prescaler) {
            Err(BitTimingError::PrescalerOutOfRange(PRESCALER))
        } else if !SJW.contains(&self.sjw) {
            Err(BitTimingError::SynchronizationJumpWidthOutOfRange(SJW))
        } else if !SEGMENT.contains(&self.propagation) {
            Err(BitTimingError::PropagationOutOfRange(SEGMENT))
        } else if !SEGMENT.contains(&self.phase_seg_1) {
            Err(BitTimingError::PhaseSeg1OutOfRange(SEGMENT))
        } else if !SEGMENT.contains(&self.phase_seg_2) {
            Err(BitTimingError::PhaseSeg2OutOfRange(SEGMENT))
        } else {
            Ok(())
        }
    }

    /// Phase segment 2 as the silicon applies it
    pub fn effective_phase_seg_2(&self) -> u8 {
        if self.phase_seg_2_programmable {
            self.phase_seg_2
        } else {
            self.phase_seg_1.max(IPT)
        }
    }

    /// Returns the number of time quanta that make up one bit time
    pub fn time_quanta_per_bit(&self) -> u32 {
        1 + u32::from(self.propagation)
            + u32::from(self.phase_seg_1)
            + u32::from(self.effective_phase_seg_2())
    }

    /// Bit rate resulting from the module clock `can_clock`
    pub fn bitrate(&self, can_clock: HertzU32) -> HertzU32 {
        let divider = 2 * u32::from(self.prescaler.max(1)) * self.time_quanta_per_bit();
        can_clock / divider
    }

    /// Derives a timing with a sample point near 80 % that yields exactly
    /// `bitrate`. Longer bit times are preferred.
    pub fn for_bitrate(can_clock: HertzU32, bitrate: HertzU32) -> Result<Self, BitTimingError> {
        let no_prescaler = BitTimingError::NoValidPrescaler { can_clock, bitrate };
        if bitrate.to_Hz() == 0 {
            return Err(no_prescaler);
        }
        for quanta in QUANTA_PER_BIT.rev() {
            let Some(f_q) = bitrate.to_Hz().checked_mul(2 * u32::from(quanta)) else {
                continue;
            };
            if can_clock.to_Hz() % f_q != 0 {
                continue;
            }
            let prescaler = can_clock.to_Hz() / f_q;
            if !(1..=u32::from(*PRESCALER.end())).contains(&prescaler) {
                continue;
            }
            let phase_seg_2 = ((quanta + 4) / 5).clamp(IPT, 8).max(quanta.saturating_sub(17));
            let rest = quanta - 1 - phase_seg_2;
            return Ok(Self {
                prescaler: prescaler as u8,
                sjw: phase_seg_2.min(*SJW.end()),
                propagation: rest / 2,
                phase_seg_1: rest - rest / 2,
                phase_seg_2,
                phase_seg_2_programmable: true,
                triple_sample: false,
            });
        }
        Err(no_prescaler)
    }

    /// Packs prescaler and SJW into `CiCFG1`
    pub fn cfg1(&self) -> Cfg1 {
        let mut cfg1 = Cfg1(0);
        cfg1.set_brp(self.prescaler.saturating_sub(1));
        cfg1.set_sjw(self.sjw.saturating_sub(1));
        cfg1
    }

    /// Packs the segments into `CiCFG2`
    pub fn cfg2(&self) -> Cfg2 {
        let mut cfg2 = Cfg2(0);
        cfg2.set_prseg(self.propagation.saturating_sub(1));
        cfg2.set_seg1ph(self.phase_seg_1.saturating_sub(1));
        cfg2.set_seg2ph(self.phase_seg_2.saturating_sub(1));
        cfg2.set_seg2phts(self.phase_seg_2_programmable);
        cfg2.set_sam(self.triple_sample);
        cfg2
    }

    /// Unpacks a timing from `CiCFG1` and `CiCFG2`
    pub fn from_registers(cfg1: Cfg1, cfg2: Cfg2) -> Self {
        Self {
            prescaler: cfg1.brp() + 1,
            sjw: cfg1.sjw() + 1,
            propagation: cfg2.prseg() + 1,
            phase_seg_1: cfg2.seg1ph() + 1,
            phase_seg_2: cfg2.seg2ph() + 1,
            phase_seg_2_programmable: cfg2.seg2phts(),
            triple_sample: cfg2.sam(),
        }
    }
}

/// Invalid [`CanConfig`]
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigurationError {
    /// Bit timing out of range
    BitTiming(BitTimingError),
    /// FIFO start is not a buffer index
    FifoStartOutOfRange,
    /// The FIFO does not end on a supported buffer count
    FifoExtent {
        /// Requested start
        start: u8,
        /// Requested length
        length: u8,
    },
    /// A buffer inside the FIFO was configured for transmission
    FifoBufferNotRx(u8),
}

#[cfg(test)]
mod test {
    use super::*;
    use fugit::RateExtU32;

    #[test]
    fn default_packs_to_zero() {
        let config = CanConfig::default();
        assert_eq!(config.timing.cfg1().0, 0);
        assert_eq!(config.timing.cfg2().0, 0);
        assert_eq!(config.fifo.fctrl().unwrap().0, 0);
        assert!(config.validate().is_ok());
        assert_eq!(config.dma_buffers(), 4);
    }

    #[test]
    fn timing_round_trips_through_registers() {
        let timing = BitTiming {
            prescaler: 64,
            sjw: 4,
            propagation: 8,
            phase_seg_1: 5,
            phase_seg_2: 3,
            phase_seg_2_programmable: true,
            triple_sample: true,
        };
        assert_eq!(timing.cfg1().0, 0x00FF);
        assert_eq!(
            BitTiming::from_registers(timing.cfg1(), timing.cfg2()),
            timing
        );
    }

    #[test]
    fn out_of_range_fields_are_reported() {
        let timing = BitTiming {
            sjw: 5,
            ..Default::default()
        };
        assert_eq!(
            timing.check(),
            Err(BitTimingError::SynchronizationJumpWidthOutOfRange(1..=4))
        );
        let timing = BitTiming {
            prescaler: 0,
            ..Default::default()
        };
        assert_eq!(timing.check(), Err(BitTimingError::PrescalerOutOfRange(1..=64)));
        let timing = BitTiming {
            phase_seg_2: 9,
            ..Default::default()
        };
        assert_eq!(timing.check(), Err(BitTimingError::PhaseSeg2OutOfRange(1..=8)));
    }

    #[test]
    fn bitrate_uses_two_clocks_per_prescaler_step() {
        // 40 MHz, TQ = 2 * 2 / 40 MHz = 100 ns, 20 TQ -> 500 kbit/s
        let timing = BitTiming {
            prescaler: 2,
            propagation: 5,
            phase_seg_1: 8,
            phase_seg_2: 6,
            phase_seg_2_programmable: true,
            ..Default::default()
        };
        assert_eq!(timing.time_quanta_per_bit(), 20);
        assert_eq!(timing.bitrate(40.MHz()), 500.kHz::<1, 1>());
    }

    #[test]
    fn phase_seg_2_follows_seg_1_unless_programmable() {
        let timing = BitTiming {
            phase_seg_1: 6,
            phase_seg_2: 2,
            ..Default::default()
        };
        assert_eq!(timing.effective_phase_seg_2(), 6);
        let timing = BitTiming {
            phase_seg_1: 1,
            ..Default::default()
        };
        assert_eq!(timing.effective_phase_seg_2(), 2);
    }

    #[test]
    fn derived_timing_hits_requested_bitrate() {
        for (clock, rate) in [
            (40_000_000_u32, 1_000_000_u32),
            (40_000_000, 125_000),
            (20_000_000, 250_000),
        ] {
            let timing = BitTiming::for_bitrate(clock.Hz(), rate.Hz()).unwrap();
            assert!(timing.check().is_ok());
            assert_eq!(timing.bitrate(clock.Hz()), rate.Hz::<1, 1>());
        }
        assert!(matches!(
            BitTiming::for_bitrate(40.MHz(), 3.kHz()),
            Err(BitTimingError::NoValidPrescaler { .. })
        ));
    }

    #[test]
    fn bitrate_above_clock_has_no_timing() {
        assert!(matches!(
            BitTiming::for_bitrate(40.MHz(), 100.MHz()),
            Err(BitTimingError::NoValidPrescaler { .. })
        ));
        assert!(BitTiming::for_bitrate(40.MHz(), 4_000.MHz()).is_err());
    }

    #[test]
    fn fifo_must_end_on_supported_count() {
        let fifo = FifoConfig {
            start: 8,
            length: FifoLength::Eight,
        };
        let fctrl = fifo.fctrl().unwrap();
        assert_eq!(fctrl.dmabs(), 4);
        assert_eq!(fctrl.fsa(), 8);
        assert_eq!(FifoConfig::from_fctrl(fctrl), Some(fifo));

        // Start past the last buffer
        let mut fctrl = Fctrl(0);
        fctrl.set_dmabs(0);
        fctrl.set_fsa(8);
        assert_eq!(FifoConfig::from_fctrl(fctrl), None);

        let fifo = FifoConfig {
            start: 10,
            length: FifoLength::Four,
        };
        assert_eq!(
            fifo.fctrl().err(),
            Some(ConfigurationError::FifoExtent { start: 10, length: 4 })
        );
        let fifo = FifoConfig {
            start: 8,
            length: FifoLength::ThirtyTwo,
        };
        assert!(fifo.fctrl().is_err());
    }

    #[test]
    fn fifo_buffers_must_receive() {
        let mut config = CanConfig {
            fifo: FifoConfig {
                start: 4,
                length: FifoLength::Four,
            },
            ..Default::default()
        };
        config.directions[0] = Direction::Tx;
        assert!(config.validate().is_ok());
        config.directions[5] = Direction::Tx;
        assert_eq!(config.validate(), Err(ConfigurationError::FifoBufferNotRx(5)));
    }
}
