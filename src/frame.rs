use embedded_can::{ExtendedId, Frame, Id, StandardId};

/// Classic CAN frame as it travels through the receive ring and transmit queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    id: Id,
    rtr: bool,
    dlc: u8,
    data: [u8; 8],
}

impl CanFrame {
    /// Builds a frame from the raw mailbox fields.
    ///
    /// `dlc` is clamped to 8.
    pub const fn from_parts(id: Id, rtr: bool, dlc: u8, data: [u8; 8]) -> Self {
        CanFrame {
            id,
            rtr,
            dlc: if dlc > 8 { 8 } else { dlc },
            data,
        }
    }

    pub fn standard(raw: u16, data: &[u8]) -> Option<Self> {
        let id = StandardId::new(raw)?;
        Frame::new(id, data)
    }

    pub fn extended(raw: u32, data: &[u8]) -> Option<Self> {
        let id = ExtendedId::new(raw)?;
        Frame::new(id, data)
    }

    /// Raw identifier without the IDE bit.
    pub fn raw_id(&self) -> u32 {
        raw_id(self.id)
    }

    /// All eight data bytes, including the ones beyond the DLC.
    pub fn raw_data(&self) -> &[u8; 8] {
        &self.data
    }
}

impl Frame for CanFrame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        if data.len() > 8 {
            return None;
        }
        let mut frame_data = [0; 8];
        frame_data[..data.len()].copy_from_slice(data);
        Some(CanFrame {
            id: id.into(),
            rtr: false,
            dlc: data.len() as u8,
            data: frame_data,
        })
    }

    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        if dlc > 8 {
            return None;
        }
        Some(CanFrame {
            id: id.into(),
            rtr: true,
            dlc: dlc as u8,
            data: [0; 8],
        })
    }

    fn is_extended(&self) -> bool {
        matches!(self.id, Id::Extended(_))
    }

    fn is_remote_frame(&self) -> bool {
        self.rtr
    }

    fn id(&self) -> Id {
        self.id
    }

    fn dlc(&self) -> usize {
        self.dlc as usize
    }

    fn data(&self) -> &[u8] {
        &self.data[..self.dlc as usize]
    }
}

pub(crate) fn raw_id(id: Id) -> u32 {
    match id {
        Id::Standard(id) => id.as_raw() as u32,
        Id::Extended(id) => id.as_raw(),
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for CanFrame {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(
            f,
            "CanFrame {{ id: {=u32:#x}, ext: {}, rtr: {}, data: {=[u8]:02x} }}",
            self.raw_id(),
            self.is_extended(),
            self.rtr,
            self.data()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_payload_is_rejected() {
        assert!(CanFrame::standard(0x100, &[0; 9]).is_none());
        assert!(CanFrame::standard(0x800, &[0; 1]).is_none());
    }

    #[test]
    fn data_is_limited_to_dlc() {
        let frame = CanFrame::extended(0x1234_5678, &[1, 2, 3]).unwrap();
        assert!(frame.is_extended());
        assert_eq!(frame.data(), &[1, 2, 3]);
        assert_eq!(frame.raw_data(), &[1, 2, 3, 0, 0, 0, 0, 0]);
        assert_eq!(frame.raw_id(), 0x1234_5678);
    }

    #[test]
    fn from_parts_clamps_dlc() {
        let id = StandardId::new(0x7F0).unwrap();
        let frame = CanFrame::from_parts(id.into(), false, 12, [0xAA; 8]);
        assert_eq!(frame.dlc(), 8);
    }
}
