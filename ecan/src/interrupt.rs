//! Notification events
//!
//! The module interrupt is decoded into a small set of [`Event`]s. The
//! application selects the events it wants with an [`EventSet`] and
//! receives them through the callback given to [`crate::bus::Can::new`].

use crate::reg::can::{Inte, Intf};
use bitfield::bitfield;

/// A notification delivered to the callback
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    /// A submitted frame was transmitted
    TxSuccess = 0,
    /// A frame was stored into a receive buffer or the FIFO
    RxSuccess = 1,
    /// At most one free buffer is left in the FIFO
    FifoAlmostFull = 2,
    /// A frame was dropped because its buffer was still full
    Overflow = 3,
    /// Bus error or invalid frame
    Error = 4,
}

impl Event {
    const ALL: [Self; 5] = [
        Self::TxSuccess,
        Self::RxSuccess,
        Self::FifoAlmostFull,
        Self::Overflow,
        Self::Error,
    ];
}

impl From<Event> for u8 {
    fn from(event: Event) -> Self {
        1 << event as u8
    }
}

bitfield! {
    /// A set of notification events.
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct EventSet(u8);

    /// Frame transmitted
    pub tx_success, set_tx_success: 0;
    /// Frame received
    pub rx_success, set_rx_success: 1;
    /// FIFO almost full
    pub fifo_almost_full, set_fifo_almost_full: 2;
    /// Receive overflow
    pub overflow, set_overflow: 3;
    /// Bus or frame error
    pub error, set_error: 4;
}

impl EventSet {
    /// Every event
    pub fn all() -> Self {
        Event::ALL.into_iter().collect()
    }

    /// `true` if `event` is part of the set
    pub fn contains(&self, event: Event) -> bool {
        self.0 & u8::from(event) != 0
    }

    /// Adds `event` to the set
    pub fn insert(&mut self, event: Event) {
        self.0 |= u8::from(event);
    }

    /// `true` if no event is selected
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Events that are part of both sets
    pub fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Events in the set, in the order of [`Event`]
    pub fn iter(self) -> impl Iterator<Item = Event> {
        Event::ALL.into_iter().filter(move |e| self.contains(*e))
    }

    /// Module interrupt sources needed to detect the events
    pub(crate) fn inte(self) -> Inte {
        let mut inte = Inte(0);
        inte.set_tbie(self.tx_success());
        inte.set_rbie(self.rx_success());
        inte.set_fifoie(self.fifo_almost_full());
        inte.set_rbovie(self.overflow());
        inte.set_errie(self.error());
        inte.set_ivrie(self.error());
        inte
    }

    /// Events indicated directly by the interrupt flags. Completion of
    /// transmissions and FIFO fill level need more state and are decided by
    /// the caller.
    pub(crate) fn from_flags(intf: Intf) -> Self {
        let mut set = Self(0);
        set.set_rx_success(intf.rbif());
        set.set_fifo_almost_full(intf.fifoif());
        set.set_overflow(intf.rbovif());
        set.set_error(intf.errif() || intf.ivrif());
        set
    }
}

impl FromIterator<Event> for EventSet {
    fn from_iter<T: IntoIterator<Item = Event>>(iter: T) -> Self {
        let mut set = Self(0);
        for event in iter {
            set.insert(event);
        }
        set
    }
}

impl core::fmt::Debug for EventSet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for EventSet {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "EventSet({=u8:#b})", self.0)
    }
}
