//! Device addressing and bootloader control on reserved identifiers
//!
//! Every reply has the layout `[sub-command, crc (LE, 4 bytes), network id
//! (LE, 2 bytes), ACK/NACK]` and goes out on both nodes through the direct
//! send path.

use embedded_can::{Frame, Id};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;

use crate::config::ProtocolConfig;
use crate::frame::CanFrame;
use crate::node::CanNode;
use crate::system::{BoardInfo, BootRequest, NvChannel, NvStorage, SystemControl};

pub const ACK: u8 = 0x06;
pub const NACK: u8 = 0x15;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootloaderCommand {
    Identify = 1,
    Silence = 2,
    SilenceFinish = 3,
    OpenSession = 4,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NetworkIdCommand {
    Write = 1,
    Read = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeIdentity {
    /// CRC of the unique device id, fixed per device.
    pub unique_device_crc: u32,
    /// Assigned network id, persisted in the board info record.
    pub network_id: u16,
}

/// Action taken for an interpreted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolEvent {
    /// Not a protocol frame, not addressed to us or malformed.
    Ignored,
    Reset,
    Identified,
    Silenced,
    SilenceFinished,
    SessionOpened,
    /// Silenced device that was not addressed restarts into the silent bootloader.
    StaySilent,
    SessionDenied,
    NetworkIdWritten(u16),
    NetworkIdRead(u16),
}

/// Transmit side of the protocol, implemented by the driver.
pub trait ProtocolLink {
    /// Sends `frame` on node 1, then on node 0, bypassing the transmit queue.
    /// Failures are not reported back.
    fn send_reply(&mut self, frame: &CanFrame);

    fn is_listen_only(&self, node: CanNode) -> bool;

    fn set_listen_only(&mut self, node: CanNode, listen_only: bool);
}

pub struct NodeProtocol {
    config: ProtocolConfig,
    identity: NodeIdentity,
}

impl NodeProtocol {
    pub fn new(config: ProtocolConfig, identity: NodeIdentity) -> Self {
        NodeProtocol { config, identity }
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Interprets `frame` if it carries one of the reserved identifiers.
    pub fn on_frame(
        &mut self,
        frame: &CanFrame,
        link: &mut dyn ProtocolLink,
        system: &dyn SystemControl,
        storage: &dyn NvStorage,
    ) -> ProtocolEvent {
        let id = frame.id();
        let event = if id == self.config.software_reset_id {
            self.on_software_reset(frame, system)
        } else if id == self.config.bootloader_id {
            self.on_bootloader(frame, link, system)
        } else if id == self.config.network_node_id_id {
            self.on_network_node_id(frame, link, storage)
        } else {
            ProtocolEvent::Ignored
        };
        if event != ProtocolEvent::Ignored {
            #[cfg(feature = "defmt")]
            defmt::info!("protocol: {}", event);
        }
        event
    }

    fn on_software_reset(&self, frame: &CanFrame, system: &dyn SystemControl) -> ProtocolEvent {
        if frame.dlc() != 8 || frame.data().iter().any(|&b| b != 0xFF) {
            return ProtocolEvent::Ignored;
        }
        system.reset();
        ProtocolEvent::Reset
    }

    fn on_bootloader(
        &mut self,
        frame: &CanFrame,
        link: &mut dyn ProtocolLink,
        system: &dyn SystemControl,
    ) -> ProtocolEvent {
        let request = frame.raw_data();
        let Some(command) = BootloaderCommand::from_u8(request[0]) else {
            return ProtocolEvent::Ignored;
        };
        let addressed = self.is_addressed(request);
        let reply = self.reply(self.config.bootloader_id, command as u8, ACK);

        match command {
            BootloaderCommand::Identify => {
                if frame.dlc() != 1 {
                    return ProtocolEvent::Ignored;
                }
                link.send_reply(&reply);
                ProtocolEvent::Identified
            }
            BootloaderCommand::Silence if addressed => {
                link.send_reply(&reply);
                for node in CanNode::ALL {
                    link.set_listen_only(node, true);
                }
                ProtocolEvent::Silenced
            }
            BootloaderCommand::SilenceFinish if addressed => {
                for node in CanNode::ALL {
                    link.set_listen_only(node, false);
                }
                link.send_reply(&reply);
                ProtocolEvent::SilenceFinished
            }
            BootloaderCommand::OpenSession => {
                let silenced = link.is_listen_only(CanNode::Node0);
                if addressed && silenced {
                    system.request_bootloader(BootRequest::OpenSession);
                    link.set_listen_only(CanNode::Node0, false);
                    link.send_reply(&reply);
                    system.reset();
                    ProtocolEvent::SessionOpened
                } else if silenced {
                    system.request_bootloader(BootRequest::StaySilent);
                    system.reset();
                    ProtocolEvent::StaySilent
                } else {
                    let nack = self.reply(self.config.bootloader_id, command as u8, NACK);
                    link.send_reply(&nack);
                    ProtocolEvent::SessionDenied
                }
            }
            _ => ProtocolEvent::Ignored,
        }
    }

    fn on_network_node_id(
        &mut self,
        frame: &CanFrame,
        link: &mut dyn ProtocolLink,
        storage: &dyn NvStorage,
    ) -> ProtocolEvent {
        let request = frame.raw_data();
        if frame.dlc() != 7 || !self.is_addressed(request) {
            return ProtocolEvent::Ignored;
        }
        let event = match NetworkIdCommand::from_u8(request[0]) {
            Some(NetworkIdCommand::Write) => {
                let network_id = u16::from_le_bytes([request[5], request[6]]);
                self.identity.network_id = network_id;
                storage.persist(NvChannel::BoardInfo, &BoardInfo::new(network_id).to_bytes());
                ProtocolEvent::NetworkIdWritten(network_id)
            }
            Some(NetworkIdCommand::Read) => ProtocolEvent::NetworkIdRead(self.identity.network_id),
            None => return ProtocolEvent::Ignored,
        };
        let reply = self.reply(self.config.network_node_id_id, request[0], ACK);
        link.send_reply(&reply);
        event
    }

    /// Matches the unique device crc (bytes 1..5), the network id (bytes 5..7)
    /// or the broadcast id.
    pub fn is_addressed(&self, request: &[u8; 8]) -> bool {
        let crc = u32::from_le_bytes(request[1..5].try_into().unwrap_or_default());
        let network_id = u16::from_le_bytes([request[5], request[6]]);
        crc == self.identity.unique_device_crc
            || network_id == self.identity.network_id
            || network_id == self.config.broadcast_id
    }

    fn reply(&self, id: Id, command: u8, status: u8) -> CanFrame {
        let mut data = [0; 8];
        data[0] = command;
        data[1..5].copy_from_slice(&self.identity.unique_device_crc.to_le_bytes());
        data[5..7].copy_from_slice(&self.identity.network_id.to_le_bytes());
        data[7] = status;
        CanFrame::from_parts(id, false, 8, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::{Cell, RefCell};
    use std::vec::Vec;

    const CRC: u32 = 0xDEAD_BEEF;

    #[derive(Default)]
    struct MockLink {
        replies: Vec<CanFrame>,
        listen_only: [bool; 2],
    }

    impl ProtocolLink for MockLink {
        fn send_reply(&mut self, frame: &CanFrame) {
            for node in [CanNode::Node1, CanNode::Node0] {
                if !self.listen_only[node.index()] {
                    self.replies.push(*frame);
                }
            }
        }

        fn is_listen_only(&self, node: CanNode) -> bool {
            self.listen_only[node.index()]
        }

        fn set_listen_only(&mut self, node: CanNode, listen_only: bool) {
            self.listen_only[node.index()] = listen_only;
        }
    }

    #[derive(Default)]
    struct MockSystem {
        resets: Cell<u32>,
        boot_requests: RefCell<Vec<BootRequest>>,
    }

    impl SystemControl for MockSystem {
        fn timestamp(&self) -> u32 {
            0
        }

        fn request_bootloader(&self, request: BootRequest) {
            self.boot_requests.borrow_mut().push(request);
        }

        fn reset(&self) {
            self.resets.set(self.resets.get() + 1);
        }
    }

    #[derive(Default)]
    struct MockStorage {
        records: RefCell<Vec<Vec<u8>>>,
    }

    impl NvStorage for MockStorage {
        fn persist(&self, _channel: NvChannel, record: &[u8]) {
            self.records.borrow_mut().push(record.to_vec());
        }
    }

    fn protocol() -> NodeProtocol {
        NodeProtocol::new(
            ProtocolConfig::DEFAULT,
            NodeIdentity {
                unique_device_crc: CRC,
                network_id: 0x0010,
            },
        )
    }

    fn addressed(id: embedded_can::StandardId, command: u8, crc: u32, network_id: u16, dlc: usize) -> CanFrame {
        let mut data = [0; 8];
        data[0] = command;
        data[1..5].copy_from_slice(&crc.to_le_bytes());
        data[5..7].copy_from_slice(&network_id.to_le_bytes());
        CanFrame::new(id, &data[..dlc]).unwrap()
    }

    fn bootloader(command: BootloaderCommand, crc: u32, network_id: u16) -> CanFrame {
        addressed(crate::config::BOOTLOADER_ID, command as u8, crc, network_id, 8)
    }

    #[test]
    fn software_reset_requires_all_ones() {
        let mut protocol = protocol();
        let (mut link, system, storage) = (MockLink::default(), MockSystem::default(), MockStorage::default());

        let frame = CanFrame::new(crate::config::SOFTWARE_RESET_ID, &[0xFF; 7]).unwrap();
        assert_eq!(protocol.on_frame(&frame, &mut link, &system, &storage), ProtocolEvent::Ignored);
        let frame = CanFrame::new(crate::config::SOFTWARE_RESET_ID, &[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFE]).unwrap();
        assert_eq!(protocol.on_frame(&frame, &mut link, &system, &storage), ProtocolEvent::Ignored);
        assert_eq!(system.resets.get(), 0);

        let frame = CanFrame::new(crate::config::SOFTWARE_RESET_ID, &[0xFF; 8]).unwrap();
        assert_eq!(protocol.on_frame(&frame, &mut link, &system, &storage), ProtocolEvent::Reset);
        assert_eq!(system.resets.get(), 1);
    }

    #[test]
    fn identify_needs_dlc_one() {
        let mut protocol = protocol();
        let (mut link, system, storage) = (MockLink::default(), MockSystem::default(), MockStorage::default());

        let frame = bootloader(BootloaderCommand::Identify, 0, 0);
        assert_eq!(protocol.on_frame(&frame, &mut link, &system, &storage), ProtocolEvent::Ignored);

        let frame = CanFrame::new(crate::config::BOOTLOADER_ID, &[1]).unwrap();
        assert_eq!(protocol.on_frame(&frame, &mut link, &system, &storage), ProtocolEvent::Identified);
        assert_eq!(link.replies.len(), 2);
        assert_eq!(link.replies[0].data(), &[1, 0xEF, 0xBE, 0xAD, 0xDE, 0x10, 0x00, ACK]);
    }

    #[test]
    fn addressing() {
        let protocol = protocol();
        let request = |crc: u32, network_id: u16| {
            *bootloader(BootloaderCommand::Silence, crc, network_id).raw_data()
        };
        assert!(protocol.is_addressed(&request(CRC, 0)));
        assert!(protocol.is_addressed(&request(0, 0x0010)));
        assert!(protocol.is_addressed(&request(0, 0xFFFF)));
        assert!(!protocol.is_addressed(&request(CRC ^ 1, 0x0011)));
    }

    #[test]
    fn silence_roundtrip() {
        let mut protocol = protocol();
        let (mut link, system, storage) = (MockLink::default(), MockSystem::default(), MockStorage::default());

        let silence = bootloader(BootloaderCommand::Silence, CRC, 0);
        assert_eq!(protocol.on_frame(&silence, &mut link, &system, &storage), ProtocolEvent::Silenced);
        assert_eq!(link.listen_only, [true, true]);
        // reply goes out before the nodes are silenced
        assert_eq!(link.replies.len(), 2);

        let finish = bootloader(BootloaderCommand::SilenceFinish, CRC, 0);
        assert_eq!(protocol.on_frame(&finish, &mut link, &system, &storage), ProtocolEvent::SilenceFinished);
        assert_eq!(link.listen_only, [false, false]);
        assert_eq!(link.replies.len(), 4);
        assert!(link.replies.iter().all(|r| r.data()[1..5] == CRC.to_le_bytes()));
    }

    #[test]
    fn silence_for_other_device_is_ignored() {
        let mut protocol = protocol();
        let (mut link, system, storage) = (MockLink::default(), MockSystem::default(), MockStorage::default());

        let silence = bootloader(BootloaderCommand::Silence, 0x1234, 0x0020);
        assert_eq!(protocol.on_frame(&silence, &mut link, &system, &storage), ProtocolEvent::Ignored);
        assert_eq!(link.listen_only, [false, false]);
        assert!(link.replies.is_empty());
    }

    #[test]
    fn open_session() {
        let mut protocol = protocol();
        let (mut link, system, storage) = (MockLink::default(), MockSystem::default(), MockStorage::default());

        let open = bootloader(BootloaderCommand::OpenSession, CRC, 0);
        assert_eq!(protocol.on_frame(&open, &mut link, &system, &storage), ProtocolEvent::SessionDenied);
        assert_eq!(link.replies.len(), 2);
        assert_eq!(link.replies[0].data()[7], NACK);
        assert_eq!(system.resets.get(), 0);

        link.listen_only = [true, true];
        link.replies.clear();
        assert_eq!(protocol.on_frame(&open, &mut link, &system, &storage), ProtocolEvent::SessionOpened);
        assert_eq!(*system.boot_requests.borrow(), [BootRequest::OpenSession]);
        assert_eq!(system.resets.get(), 1);
        // only node 0 leaves listen-only mode
        assert_eq!(link.replies.len(), 1);
        assert_eq!(link.replies[0].data()[7], ACK);
    }

    #[test]
    fn silenced_bystander_stays_in_bootloader() {
        let mut protocol = protocol();
        let (mut link, system, storage) = (MockLink::default(), MockSystem::default(), MockStorage::default());
        link.listen_only = [true, true];

        let open = bootloader(BootloaderCommand::OpenSession, 0x1234, 0x0020);
        assert_eq!(protocol.on_frame(&open, &mut link, &system, &storage), ProtocolEvent::StaySilent);
        assert_eq!(*system.boot_requests.borrow(), [BootRequest::StaySilent]);
        assert_eq!(system.resets.get(), 1);
        assert!(link.replies.is_empty());
    }

    #[test]
    fn write_then_read_network_id() {
        let mut protocol = protocol();
        let (mut link, system, storage) = (MockLink::default(), MockSystem::default(), MockStorage::default());
        let id = crate::config::NETWORK_NODE_ID_ID;

        let write = addressed(id, NetworkIdCommand::Write as u8, CRC, 0x0042, 7);
        assert_eq!(
            protocol.on_frame(&write, &mut link, &system, &storage),
            ProtocolEvent::NetworkIdWritten(0x0042)
        );
        assert_eq!(protocol.identity().network_id, 0x0042);
        assert_eq!(storage.records.borrow()[0], BoardInfo::new(0x0042).to_bytes());

        let read = addressed(id, NetworkIdCommand::Read as u8, 0, 0x0042, 7);
        assert_eq!(
            protocol.on_frame(&read, &mut link, &system, &storage),
            ProtocolEvent::NetworkIdRead(0x0042)
        );
        assert_eq!(link.replies.last().unwrap().data()[5..7], [0x42, 0x00]);
        assert_eq!(link.replies.len(), 4);
    }

    #[test]
    fn network_id_needs_dlc_seven() {
        let mut protocol = protocol();
        let (mut link, system, storage) = (MockLink::default(), MockSystem::default(), MockStorage::default());
        let write = addressed(crate::config::NETWORK_NODE_ID_ID, NetworkIdCommand::Write as u8, CRC, 0x0042, 8);
        assert_eq!(protocol.on_frame(&write, &mut link, &system, &storage), ProtocolEvent::Ignored);
        assert_eq!(protocol.identity().network_id, 0x0010);
        assert!(storage.records.borrow().is_empty());
    }
}
