//! Handling of messages/frames

pub(crate) mod raw;

use embedded_can::{ExtendedId, Frame, Id, StandardId};

/// Largest standard identifier
pub const MAX_SID: u16 = 0x7FF;
/// Largest extended identifier part (the 18 bits below the standard part)
pub const MAX_EID: u32 = 0x3FFFF;

/// Identifier and frame type of a message.
///
/// An extended 29-bit identifier is split into the standard part `sid`
/// (bits 28:18) and the extension `eid` (bits 17:0). When `ide` is clear,
/// `eid` is ignored on transmit and reads as zero on receive.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Header {
    /// Standard identifier, 11 bits
    pub sid: u16,
    /// Extended identifier, 18 bits
    pub eid: u32,
    /// Remote transmission request
    pub rtr: bool,
    /// Identifier extension
    pub ide: bool,
}

impl Header {
    /// Data frame header with a standard identifier
    pub const fn standard(sid: u16) -> Self {
        Self {
            sid,
            eid: 0,
            rtr: false,
            ide: false,
        }
    }

    /// Data frame header with an extended identifier made of `sid` and `eid`
    pub const fn extended(sid: u16, eid: u32) -> Self {
        Self {
            sid,
            eid,
            rtr: false,
            ide: true,
        }
    }

    /// `true` if the fields fit the widths the silicon stores
    pub fn is_valid(&self) -> bool {
        self.sid <= MAX_SID && self.eid <= MAX_EID
    }

    /// The identifier as seen on the bus. `None` if a field is too wide.
    pub fn id(&self) -> Option<Id> {
        if !self.is_valid() {
            return None;
        }
        if self.ide {
            let raw = u32::from(self.sid) << 18 | self.eid;
            ExtendedId::new(raw).map(Id::Extended)
        } else {
            StandardId::new(self.sid).map(Id::Standard)
        }
    }
}

impl From<Id> for Header {
    fn from(id: Id) -> Self {
        match id {
            Id::Standard(id) => Self::standard(id.as_raw()),
            Id::Extended(id) => {
                let raw = id.as_raw();
                Self::extended((raw >> 18) as u16, raw & MAX_EID)
            }
        }
    }
}

/// A classic CAN frame.
///
/// Bytes of `data` beyond `dlc` carry no meaning.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Message {
    /// Identifier and frame type
    pub header: Header,
    /// Data length code, 0..=8
    pub dlc: u8,
    /// Payload
    pub data: [u8; 8],
    /// Index of the acceptance filter that accepted the frame. Only set on
    /// received messages.
    pub filter: Option<u8>,
}

impl Message {
    /// Creates a data frame
    pub fn new(header: Header, data: &[u8]) -> Option<Self> {
        if data.len() > 8 {
            return None;
        }
        let mut message = Self {
            header,
            dlc: data.len() as u8,
            ..Default::default()
        };
        message.data[..data.len()].copy_from_slice(data);
        Some(message)
    }

    /// Payload as long as the data length code says, clamped to 8 bytes
    pub fn payload(&self) -> &[u8] {
        &self.data[..usize::from(self.dlc.min(8))]
    }
}

impl Frame for Message {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        Message::new(Header::from(id.into()), data)
    }

    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        if dlc > 8 {
            return None;
        }
        let mut header = Header::from(id.into());
        header.rtr = true;
        Some(Self {
            header,
            dlc: dlc as u8,
            ..Default::default()
        })
    }

    fn is_extended(&self) -> bool {
        self.header.ide
    }

    fn is_remote_frame(&self) -> bool {
        self.header.rtr
    }

    fn id(&self) -> Id {
        // Out of range fields are truncated to the widths on the wire
        let header = Header {
            sid: self.header.sid & MAX_SID,
            eid: self.header.eid & MAX_EID,
            ..self.header
        };
        header
            .id()
            .unwrap_or(Id::Standard(StandardId::ZERO))
    }

    fn dlc(&self) -> usize {
        self.dlc.into()
    }

    fn data(&self) -> &[u8] {
        if self.header.rtr {
            &[]
        } else {
            self.payload()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn extended_id_splits_into_sid_and_eid() {
        let id = ExtendedId::new(0x1234_5678).unwrap();
        let header = Header::from(Id::Extended(id));
        assert!(header.ide);
        assert_eq!(header.sid, (0x1234_5678 >> 18) as u16);
        assert_eq!(header.eid, 0x1234_5678 & 0x3FFFF);
        assert_eq!(header.id(), Some(Id::Extended(id)));
    }

    #[test]
    fn oversized_fields_have_no_id() {
        assert_eq!(Header::standard(0x800).id(), None);
        assert_eq!(Header::extended(0, 0x40000).id(), None);
        assert!(Header::standard(0x7FF).is_valid());
    }

    #[test]
    fn frame_constructors() {
        let id = StandardId::new(0x123).unwrap();
        let data = <Message as Frame>::new(id, &[1, 2, 3]).unwrap();
        assert_eq!(data.dlc(), 3);
        assert_eq!(Frame::data(&data), &[1, 2, 3]);
        assert!(!data.is_remote_frame());
        assert!(<Message as Frame>::new(id, &[0; 9]).is_none());

        let remote = <Message as Frame>::new_remote(id, 4).unwrap();
        assert!(remote.is_remote_frame());
        assert_eq!(remote.dlc(), 4);
        assert!(Frame::data(&remote).is_empty());
        assert!(<Message as Frame>::new_remote(id, 9).is_none());
    }
}
