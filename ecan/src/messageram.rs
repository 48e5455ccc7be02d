//! Message buffers in DMA RAM.
//!
//! The module and both DMA channels share one contiguous region. Buffer `n`
//! occupies words `8 * n..8 * n + 8`. The driver must not write a buffer the
//! module has marked full and not yet read.

use crate::message::raw::{self, BUFFER_WORDS};
use crate::message::Message;
use vcell::VolatileCell;

/// Most message buffers the module can address
pub const MAX_BUFFERS: usize = 32;

/// View of the message buffers in DMA RAM
#[derive(Copy, Clone)]
pub struct MessageRam<'a> {
    words: &'a [VolatileCell<u16>],
}

impl<'a> MessageRam<'a> {
    /// Wraps `words`. A trailing partial buffer is ignored.
    pub fn new(words: &'a [VolatileCell<u16>]) -> Self {
        Self { words }
    }

    /// Number of complete buffers in the region
    pub fn buffers(&self) -> usize {
        (self.words.len() / BUFFER_WORDS).min(MAX_BUFFERS)
    }

    /// Words needed to hold `buffers` message buffers
    pub const fn words_for(buffers: usize) -> usize {
        buffers * BUFFER_WORDS
    }

    /// The underlying region
    pub fn words(&self) -> &'a [VolatileCell<u16>] {
        self.words
    }

    fn slot(&self, index: u8) -> Option<&'a [VolatileCell<u16>]> {
        let index = usize::from(index);
        if index >= self.buffers() {
            return None;
        }
        let start = index * BUFFER_WORDS;
        self.words.get(start..start + BUFFER_WORDS)
    }

    /// Copies buffer `index` out of DMA RAM
    pub fn load(&self, index: u8) -> Option<[u16; BUFFER_WORDS]> {
        let slot = self.slot(index)?;
        let mut words = [0; BUFFER_WORDS];
        for (word, cell) in words.iter_mut().zip(slot) {
            *word = cell.get();
        }
        Some(words)
    }

    /// Copies `words` into buffer `index`. Returns `false` if the buffer is
    /// outside the region.
    pub fn store(&self, index: u8, words: &[u16; BUFFER_WORDS]) -> bool {
        match self.slot(index) {
            Some(slot) => {
                for (cell, word) in slot.iter().zip(words) {
                    cell.set(*word);
                }
                true
            }
            None => false,
        }
    }

    /// Decodes the frame held by buffer `index`
    pub fn read(&self, index: u8) -> Option<Message> {
        self.load(index).map(|words| raw::decode(&words))
    }

    /// Encodes `message` into buffer `index`
    pub fn write(&self, index: u8, message: &Message) -> bool {
        self.store(index, &raw::encode(message))
    }

    /// Zeroes every buffer
    pub fn clear(&self) {
        for cell in self.words {
            cell.set(0);
        }
    }
}
