//! Transmit buffers
//!
//! Buffers B0..B7 can be opened for transmission. A frame is submitted by
//! placing it in the buffer's slot in DMA RAM and raising `TXREQ`. Among
//! the pending buffers the module sends the one with the highest priority
//! first; equal priorities go in ascending buffer order. The driver does not
//! reorder.

use crate::config::{Direction, HARDWARE_BUFFERS};
use crate::message::Message;
use crate::messageram::MessageRam;
use crate::reg::can::{Ecan, TxControl};
use crate::reg::Registers;

/// Transmit priority of a buffer
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Priority {
    /// Lowest priority
    #[default]
    Lowest = 0,
    /// Low intermediate priority
    Low = 1,
    /// High intermediate priority
    High = 2,
    /// Highest priority
    Highest = 3,
}

/// Buffers the driver submitted and has not seen complete yet
#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct Submitted(u8);

impl Submitted {
    pub fn contains(&self, index: u8) -> bool {
        self.0 & 1 << index != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    fn insert(&mut self, index: u8) {
        self.0 |= 1 << index;
    }

    fn remove(&mut self, index: u8) {
        self.0 &= !(1 << index);
    }
}

fn mask(f: impl FnOnce(&mut TxControl)) -> u8 {
    let mut control = TxControl(0);
    f(&mut control);
    control.0
}

/// `true` if a transmission of buffer `index` is pending
pub(crate) fn is_pending<R: Registers>(ecan: &Ecan<'_, R>, index: u8) -> bool {
    ecan.trcon(index).txreq()
}

/// Sets the direction of buffer `index`
pub(crate) fn set_direction<R: Registers>(ecan: &Ecan<'_, R>, index: u8, direction: Direction) {
    let mut value = TxControl(0);
    value.set_txen(direction == Direction::Tx);
    ecan.modify_trcon(index, mask(|c| c.set_txen(true)), value);
}

/// Places `message` in buffer `index` and requests its transmission. The
/// caller has checked that the buffer is idle and masked the module
/// interrupt.
pub(crate) fn submit<R: Registers>(
    ecan: &Ecan<'_, R>,
    buffers: &MessageRam<'_>,
    submitted: &mut Submitted,
    index: u8,
    message: &Message,
    priority: Priority,
) -> bool {
    if !buffers.write(index, message) {
        return false;
    }
    let mut value = TxControl(0);
    value.set_txpri(priority as u8);
    ecan.modify_trcon(index, mask(|c| c.set_txpri(0b11)), value);
    value.set_txreq(true);
    ecan.modify_trcon(index, mask(|c| c.set_txreq(true)), value);
    submitted.insert(index);
    true
}

/// Withdraws the request of buffer `index`. Returns whether one was
/// pending.
pub(crate) fn abort<R: Registers>(ecan: &Ecan<'_, R>, submitted: &mut Submitted, index: u8) -> bool {
    let pending = is_pending(ecan, index);
    if pending {
        ecan.modify_trcon(index, mask(|c| c.set_txreq(true)), TxControl(0));
    }
    submitted.remove(index);
    pending
}

/// Collects submitted buffers whose request the module has cleared.
/// Returns the set of completed buffers.
pub(crate) fn completed<R: Registers>(ecan: &Ecan<'_, R>, submitted: &mut Submitted) -> u8 {
    let mut done = 0;
    for index in 0..HARDWARE_BUFFERS {
        if submitted.contains(index) && !is_pending(ecan, index) {
            submitted.remove(index);
            done |= 1 << index;
        }
    }
    done
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::message::Header;
    use crate::sim::Silicon;

    #[test]
    fn submit_sets_priority_and_request() {
        let silicon = Silicon::new();
        let ecan = Ecan::new(silicon.can());
        let buffers = MessageRam::new(silicon.ram().words(0, 64));
        let mut submitted = Submitted::default();
        set_direction(&ecan, 1, Direction::Tx);

        let message = Message::new(Header::standard(0x10), &[1]).unwrap();
        assert!(submit(&ecan, &buffers, &mut submitted, 1, &message, Priority::High));
        let control = ecan.trcon(1);
        assert!(control.txen());
        assert!(control.txreq());
        assert_eq!(control.txpri(), 2);
        assert!(!ecan.trcon(0).txreq());
        assert!(submitted.contains(1));
        assert_eq!(buffers.read(1).unwrap().header, message.header);
    }

    #[test]
    fn abort_reports_pending_request() {
        let silicon = Silicon::new();
        let ecan = Ecan::new(silicon.can());
        let buffers = MessageRam::new(silicon.ram().words(0, 64));
        let mut submitted = Submitted::default();
        set_direction(&ecan, 0, Direction::Tx);

        assert!(!abort(&ecan, &mut submitted, 0));
        submit(&ecan, &buffers, &mut submitted, 0, &Message::default(), Priority::Low);
        assert!(abort(&ecan, &mut submitted, 0));
        assert!(!is_pending(&ecan, 0));
        assert!(submitted.is_empty());
        assert_eq!(completed(&ecan, &mut submitted), 0);
    }

    #[test]
    fn completion_is_reported_once() {
        let silicon = Silicon::new();
        let ecan = Ecan::new(silicon.can());
        let buffers = MessageRam::new(silicon.ram().words(0, 64));
        let mut submitted = Submitted::default();
        set_direction(&ecan, 2, Direction::Tx);
        submit(&ecan, &buffers, &mut submitted, 2, &Message::default(), Priority::Low);
        assert_eq!(completed(&ecan, &mut submitted), 0);

        // The module clears TXREQ once the frame is on the bus
        ecan.modify_trcon(2, mask(|c| c.set_txreq(true)), TxControl(0));
        assert_eq!(completed(&ecan, &mut submitted), 1 << 2);
        assert_eq!(completed(&ecan, &mut submitted), 0);
    }
}
