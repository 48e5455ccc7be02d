//! Operation modes of the module
//!
//! A mode change is a request written to `REQOP` which the module
//! acknowledges in `OPMODE` once it reaches a safe point on the bus (for
//! example, the end of a frame in progress).

use crate::reg::can::{opmode, Ecan};
use crate::reg::Registers;

/// Polls of `OPMODE` before a mode request is given up
pub const ACK_SPIN_LIMIT: u32 = 10_000;

/// Operation mode
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    /// Module disabled; it neither transmits nor receives
    #[default]
    Disable,
    /// Normal operation on the bus
    Normal,
    /// Receive only, no acknowledgement or error frames are sent
    ListenOnly,
    /// Transmitted frames are received internally, nothing reaches the bus
    Loopback,
    /// Receive every frame, including erroneous ones, ignoring filters
    ListenAll,
    /// Configuration registers are writable. Entered transiently by the
    /// driver.
    Configuration,
}

impl Mode {
    /// Encoding in `REQOP`/`OPMODE`
    pub fn opmode(self) -> u8 {
        match self {
            Self::Disable => opmode::DISABLE,
            Self::Normal => opmode::NORMAL,
            Self::ListenOnly => opmode::LISTEN_ONLY,
            Self::Loopback => opmode::LOOPBACK,
            Self::ListenAll => opmode::LISTEN_ALL,
            Self::Configuration => opmode::CONFIGURATION,
        }
    }

    /// Decodes `OPMODE`. Reserved values yield `None`.
    pub fn from_opmode(bits: u8) -> Option<Self> {
        Some(match bits {
            opmode::DISABLE => Self::Disable,
            opmode::NORMAL => Self::Normal,
            opmode::LISTEN_ONLY => Self::ListenOnly,
            opmode::LOOPBACK => Self::Loopback,
            opmode::LISTEN_ALL => Self::ListenAll,
            opmode::CONFIGURATION => Self::Configuration,
            _ => return None,
        })
    }

    /// `true` for modes an application may request
    pub fn is_external(self) -> bool {
        self != Self::Configuration
    }
}

/// The module did not acknowledge a mode request in time
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Timeout {
    /// Mode that was requested
    pub requested: Mode,
    /// Mode the module stayed in, if it reports a valid one
    pub current: Option<Mode>,
}

/// Mode the module currently acknowledges
pub(crate) fn current<R: Registers>(ecan: &Ecan<'_, R>) -> Option<Mode> {
    Mode::from_opmode(ecan.ctrl1().opmode())
}

/// Requests `mode` and waits for the acknowledgement.
///
/// On timeout, the request is withdrawn by requesting the mode the module
/// still reports, so that a late acknowledgement cannot change the mode
/// behind the caller's back.
pub(crate) fn enter<R: Registers>(ecan: &Ecan<'_, R>, mode: Mode) -> Result<(), Timeout> {
    let bits = mode.opmode();
    ecan.modify_ctrl1(|r| r.set_reqop(bits));
    for _ in 0..ACK_SPIN_LIMIT {
        if ecan.ctrl1().opmode() == bits {
            log::trace!("ECAN: entered {:?}", mode);
            return Ok(());
        }
    }
    let current = current(ecan);
    if let Some(current) = current {
        let bits = current.opmode();
        ecan.modify_ctrl1(|r| r.set_reqop(bits));
    }
    log::warn!("ECAN: {:?} not acknowledged, still {:?}", mode, current);
    Err(Timeout {
        requested: mode,
        current,
    })
}
