//! Receive FIFO
//!
//! The FIFO is the contiguous run of buffers from `start` to the last buffer
//! in DMA RAM, used as a ring. The module writes at its own put pointer and
//! marks each filled buffer in `CiRXFUL`; the driver reads at a software
//! head and releases buffers by clearing their full flag. A frame arriving
//! at a buffer that is still full is dropped and flagged as an overflow.

use crate::config::FifoConfig;

/// Ring indices of the FIFO
#[derive(Copy, Clone, Debug)]
pub(crate) struct RxFifo {
    start: u8,
    end: u8,
    head: u8,
    tail: u8,
    len: u8,
    reported: bool,
}

impl RxFifo {
    pub fn new(config: &FifoConfig) -> Self {
        Self {
            start: config.start,
            end: config.end(),
            head: config.start,
            tail: config.start,
            len: 0,
            reported: false,
        }
    }

    /// Number of buffers in the ring
    pub fn capacity(&self) -> u8 {
        self.end - self.start
    }

    /// Buffer the next read comes from
    pub fn head(&self) -> u8 {
        self.head
    }

    /// Frames seen by [`Self::track`] and not yet read
    pub fn len(&self) -> u8 {
        self.len
    }

    fn next(&self, index: u8) -> u8 {
        if index + 1 >= self.end {
            self.start
        } else {
            index + 1
        }
    }

    /// Follows the module's put pointer over the buffers marked full in
    /// `rxful`.
    pub fn track(&mut self, rxful: u32) {
        while self.len < self.capacity() && rxful & 1 << self.tail != 0 {
            self.tail = self.next(self.tail);
            self.len += 1;
        }
    }

    /// `true` once at most one free buffer remains
    pub fn is_almost_full(&self) -> bool {
        self.len() + 1 >= self.capacity()
    }

    /// `true` the first time the ring is seen almost full. Stays `false`
    /// until reads bring the fill level below the threshold again.
    pub fn take_almost_full(&mut self) -> bool {
        let rising = self.is_almost_full() && !self.reported;
        self.reported = self.is_almost_full();
        rising
    }

    /// Moves the head past the buffer just read
    pub fn pop(&mut self) {
        self.head = self.next(self.head);
        if self.len > 0 {
            self.len -= 1;
        } else {
            // Read without the interrupt tracking the arrival
            self.tail = self.head;
        }
        if !self.is_almost_full() {
            self.reported = false;
        }
    }
}
