//! Layout of a message buffer in DMA RAM
//!
//! Every buffer is eight words long. Words 3 to 6 hold the payload, low byte
//! first.

use super::{Header, Message, MAX_EID};
use bitfield::bitfield;

/// Words per message buffer
pub const BUFFER_WORDS: usize = 8;

bitfield! {
    /// Word 0
    #[derive(Copy, Clone)]
    struct Word0(u16);
    impl Debug;
    /// Bits 2:12 - Standard identifier
    u16, sid, set_sid: 12, 2;
    /// Bit 1 - Substitute remote request; the RTR bit of standard frames
    srr, set_srr: 1;
    /// Bit 0 - Extended identifier
    ide, set_ide: 0;
}

bitfield! {
    /// Word 2
    #[derive(Copy, Clone)]
    struct Word2(u16);
    impl Debug;
    /// Bits 10:15 - Extended identifier bits 5:0
    u8, eid_low, set_eid_low: 15, 10;
    /// Bit 9 - Remote transmission request of extended frames
    rtr, set_rtr: 9;
    /// Bits 0:3 - Data length code
    u8, dlc, set_dlc: 3, 0;
}

bitfield! {
    /// Word 7
    #[derive(Copy, Clone)]
    struct Word7(u16);
    impl Debug;
    /// Bits 8:12 - Index of the filter that accepted the frame
    u8, filhit, _: 12, 8;
}

/// Encodes `message` into the buffer layout. The filter index is not
/// transmitted.
pub fn encode(message: &Message) -> [u16; BUFFER_WORDS] {
    let header = &message.header;
    let mut words = [0; BUFFER_WORDS];

    let mut w0 = Word0(0);
    w0.set_sid(header.sid);
    w0.set_ide(header.ide);
    // Recessive for extended frames
    w0.set_srr(if header.ide { true } else { header.rtr });
    words[0] = w0.0;

    let mut w2 = Word2(0);
    w2.set_dlc(message.dlc);
    if header.ide {
        let eid = header.eid & MAX_EID;
        words[1] = (eid >> 6) as u16;
        w2.set_eid_low((eid & 0x3F) as u8);
        w2.set_rtr(header.rtr);
    }
    words[2] = w2.0;

    for (word, bytes) in words[3..7].iter_mut().zip(message.data.chunks(2)) {
        *word = u16::from_le_bytes([bytes[0], bytes[1]]);
    }
    words
}

/// Decodes a received buffer
pub fn decode(words: &[u16; BUFFER_WORDS]) -> Message {
    let w0 = Word0(words[0]);
    let w2 = Word2(words[2]);
    let ide = w0.ide();
    let header = Header {
        sid: w0.sid(),
        eid: if ide {
            u32::from(words[1] & 0x0FFF) << 6 | u32::from(w2.eid_low())
        } else {
            0
        },
        rtr: if ide { w2.rtr() } else { w0.srr() },
        ide,
    };

    let mut data = [0; 8];
    for (bytes, word) in data.chunks_mut(2).zip(&words[3..7]) {
        bytes.copy_from_slice(&word.to_le_bytes());
    }
    Message {
        header,
        dlc: w2.dlc(),
        data,
        filter: Some(Word7(words[7]).filhit()),
    }
}
