//! Device services the CAN core depends on

use crc::{Crc, CRC_32_ISO_HDLC};

pub(crate) static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// What the bootloader should do after the next reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootRequest {
    /// Open a download session.
    OpenSession,
    /// Stay in the bootloader in listen-only mode.
    StaySilent,
}

pub trait SystemControl {
    /// Free running tick counter.
    fn timestamp(&self) -> u32;

    /// Persists `request` for the bootloader, e.g. in a backup register.
    fn request_bootloader(&self, request: BootRequest);

    /// Restarts the device. Real implementations never return.
    fn reset(&self);
}

/// Nonvolatile storage channels written by the CAN core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NvChannel {
    BoardInfo,
}

/// Fire-and-forget write of a record into nonvolatile storage.
pub trait NvStorage {
    fn persist(&self, channel: NvChannel, record: &[u8]);
}

/// 96 bit factory-programmed device id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniqueDeviceId {
    pub words: [u32; 3],
}

impl UniqueDeviceId {
    pub const fn new(words: [u32; 3]) -> Self {
        UniqueDeviceId { words }
    }

    /// CRC-32 over all 96 bits, little endian. Used to address the device.
    pub fn crc(&self) -> u32 {
        let mut digest = CRC32.digest();
        for word in self.words {
            digest.update(&word.to_le_bytes());
        }
        digest.finalize()
    }
}

/// Board information record as stored in nonvolatile memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BoardInfo {
    pub network_node_id: u16,
    pub checksum: u32,
}

impl BoardInfo {
    pub const SIZE: usize = 6;

    pub fn new(network_node_id: u16) -> Self {
        BoardInfo {
            network_node_id,
            checksum: CRC32.checksum(&network_node_id.to_le_bytes()),
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0; Self::SIZE];
        bytes[..2].copy_from_slice(&self.network_node_id.to_le_bytes());
        bytes[2..].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    /// `None` if the checksum does not match.
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Option<Self> {
        let network_node_id = u16::from_le_bytes([bytes[0], bytes[1]]);
        let checksum = u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
        let info = BoardInfo::new(network_node_id);
        (info.checksum == checksum).then_some(info)
    }
}
