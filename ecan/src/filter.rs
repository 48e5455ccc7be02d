//! Acceptance filters and masks
//!
//! A received frame is stored into the buffer a filter points at if the
//! filter is active and the frame identifier, masked by the filter's mask,
//! equals the filter value masked the same way. A filter is active once it
//! is enabled, connected to a buffer and has a mask assigned. When several
//! filters match, the module picks the lowest numbered one.
//!
//! All filter and mask registers are only writable in configuration mode.

use crate::message::{Header, MAX_EID};
use crate::reg::can::{self, AcceptanceSid, Ecan};
use crate::reg::Registers;

/// Number of acceptance filters
pub const FILTERS: u8 = 16;
/// Number of acceptance masks
pub const MASKS: u8 = 3;

/// Acceptance filter F0..F15
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FilterId(u8);

impl FilterId {
    /// Filter `index`, `None` above F15
    pub const fn new(index: u8) -> Option<Self> {
        if index < FILTERS {
            Some(Self(index))
        } else {
            None
        }
    }

    /// Index of the filter
    pub fn index(self) -> u8 {
        self.0
    }

    fn bit(self) -> u16 {
        1 << self.0
    }

    /// F0..F15 in ascending order
    pub fn all() -> impl Iterator<Item = Self> {
        (0..FILTERS).map(Self)
    }
}

/// Filters an operation applies to
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FilterSelect {
    /// A single filter
    One(FilterId),
    /// Every filter
    All,
}

impl From<FilterId> for FilterSelect {
    fn from(filter: FilterId) -> Self {
        Self::One(filter)
    }
}

/// One of the three acceptance masks
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MaskId {
    /// Mask 0
    M0,
    /// Mask 1
    M1,
    /// Mask 2
    M2,
}

impl MaskId {
    /// Index of the mask, also its `FMSKSEL` code
    pub fn index(self) -> u8 {
        self as u8
    }

    const ALL: [Self; MASKS as usize] = [Self::M0, Self::M1, Self::M2];
}

/// Mask argument of the mask operations
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mask {
    /// Mask 0
    M0,
    /// Mask 1
    M1,
    /// Mask 2
    M2,
    /// No mask. Assigning it removes the mask from a filter.
    None,
    /// Every mask. Setting it writes all three masks.
    All,
}

impl Mask {
    /// The single mask selected, if any
    pub fn id(self) -> Option<MaskId> {
        match self {
            Self::M0 => Some(MaskId::M0),
            Self::M1 => Some(MaskId::M1),
            Self::M2 => Some(MaskId::M2),
            Self::None | Self::All => None,
        }
    }
}

impl From<MaskId> for Mask {
    fn from(mask: MaskId) -> Self {
        match mask {
            MaskId::M0 => Self::M0,
            MaskId::M1 => Self::M1,
            MaskId::M2 => Self::M2,
        }
    }
}

/// Message buffer B0..B31 or the receive FIFO
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BufferId {
    /// A single buffer
    Buffer(u8),
    /// The receive FIFO
    Fifo,
}

impl BufferId {
    fn pointer(self) -> u16 {
        match self {
            Self::Buffer(index) => u16::from(index),
            Self::Fifo => can::BUFPNT_FIFO,
        }
    }
}

/// Software copy of the acceptance configuration
pub(crate) struct Routing {
    enabled: u16,
    filters: [Header; FILTERS as usize],
    masks: [Header; MASKS as usize],
    targets: [Option<BufferId>; FILTERS as usize],
    assigned: [Option<MaskId>; FILTERS as usize],
}

impl Routing {
    pub fn new() -> Self {
        Self {
            enabled: 0,
            filters: [Header::default(); FILTERS as usize],
            masks: [Header::default(); MASKS as usize],
            targets: [None; FILTERS as usize],
            assigned: [None; FILTERS as usize],
        }
    }

    /// Filters that steer frames, as written to `CiFEN1`
    pub fn active(&self) -> u16 {
        FilterId::all()
            .filter(|f| self.targets[usize::from(f.0)].is_some())
            .filter(|f| self.assigned[usize::from(f.0)].is_some())
            .fold(0, |set, f| set | f.bit()) & self.enabled
    }

    pub fn is_enabled(&self, filter: FilterId) -> bool {
        self.enabled & filter.bit() != 0
    }

    pub fn target(&self, filter: FilterId) -> Option<BufferId> {
        self.targets[usize::from(filter.0)]
    }

    pub fn mask_of(&self, filter: FilterId) -> Option<MaskId> {
        self.assigned[usize::from(filter.0)]
    }

    pub fn filter(&self, filter: FilterId) -> Header {
        self.filters[usize::from(filter.0)]
    }

    pub fn mask(&self, mask: MaskId) -> Header {
        self.masks[usize::from(mask.index())]
    }

    /// First filter pointing at `buffer`
    pub fn connected_to(&self, buffer: BufferId) -> Option<FilterId> {
        FilterId::all().find(|f| self.target(*f) == Some(buffer))
    }

    /// Writes filter `filter` and enables it. Configuration mode only.
    pub fn set_filter<R: Registers>(&mut self, ecan: &Ecan<'_, R>, filter: FilterId, header: Header) {
        ecan.with_filter_window(|ecan| {
            write_acceptance(
                ecan.raw(),
                can::rxf_sid(filter.0),
                can::rxf_eid(filter.0),
                &header,
            )
        });
        self.filters[usize::from(filter.0)] = header;
        self.enabled |= filter.bit();
        self.sync_enable(ecan);
    }

    /// Writes mask `mask`. Configuration mode only.
    pub fn set_mask<R: Registers>(&mut self, ecan: &Ecan<'_, R>, mask: Mask, header: Header) {
        let single = mask.id();
        let selected: &[MaskId] = match &single {
            Some(id) => core::slice::from_ref(id),
            None if mask == Mask::All => &MaskId::ALL,
            None => &[],
        };
        ecan.with_filter_window(|ecan| {
            for id in selected {
                write_acceptance(
                    ecan.raw(),
                    can::rxm_sid(id.index()),
                    can::rxm_eid(id.index()),
                    &header,
                );
            }
        });
        for id in selected {
            self.masks[usize::from(id.index())] = header;
        }
    }

    /// Assigns `mask` to the selected filters, or removes the mask with
    /// `None`. Configuration mode only.
    pub fn assign_mask<R: Registers>(
        &mut self,
        ecan: &Ecan<'_, R>,
        mask: Option<MaskId>,
        filters: FilterSelect,
    ) {
        let code = mask.map_or(0, MaskId::index);
        for filter in FilterId::all() {
            if let FilterSelect::One(one) = filters {
                if one != filter {
                    continue;
                }
            }
            let shift = can::fmsksel_shift(filter.0);
            ecan.raw()
                .modify(can::fmsksel(filter.0), 0b11 << shift, u16::from(code) << shift);
            self.assigned[usize::from(filter.0)] = mask;
        }
        self.sync_enable(ecan);
    }

    /// Points `filter` at `buffer`, or clears the pointer with `None`.
    /// Configuration mode only.
    pub fn connect<R: Registers>(
        &mut self,
        ecan: &Ecan<'_, R>,
        filter: FilterId,
        buffer: Option<BufferId>,
    ) {
        let pointer = buffer.map_or(0, BufferId::pointer);
        let shift = can::bufpnt_shift(filter.0);
        ecan.with_filter_window(|ecan| {
            ecan.raw()
                .modify(can::bufpnt(filter.0), 0xF << shift, pointer << shift)
        });
        self.targets[usize::from(filter.0)] = buffer;
        self.sync_enable(ecan);
    }

    /// Enables or disables `filter` without touching its value.
    /// Configuration mode only.
    pub fn set_enabled<R: Registers>(&mut self, ecan: &Ecan<'_, R>, filter: FilterId, enabled: bool) {
        if enabled {
            self.enabled |= filter.bit();
        } else {
            self.enabled &= !filter.bit();
        }
        self.sync_enable(ecan);
    }

    fn sync_enable<R: Registers>(&self, ecan: &Ecan<'_, R>) {
        ecan.set_fen1(self.active());
    }
}

/// Writes the identifier registers of a filter or mask. For masks, `ide`
/// is the `MIDE` bit: only frames of the filter's identifier type match.
fn write_acceptance<R: Registers>(regs: &R, sid_offset: u16, eid_offset: u16, header: &Header) {
    let eid = header.eid & MAX_EID;
    let mut sid = AcceptanceSid(0);
    sid.set_sid(header.sid);
    sid.set_exide(header.ide);
    sid.set_eid_high((eid >> 16) as u8);
    regs.write(sid_offset, sid.0);
    regs.write(eid_offset, eid as u16);
}
