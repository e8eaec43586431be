//! Static configuration tables

use embedded_can::{Id, StandardId};

use crate::filter::{ReceiveDescriptor, MAX_FILTER_BANKS};
use crate::node::PerNode;

pub const SOFTWARE_RESET_ID: StandardId = unsafe { StandardId::new_unchecked(0x95) };
pub const BOOTLOADER_ID: StandardId = unsafe { StandardId::new_unchecked(0x7F0) };
pub const NETWORK_NODE_ID_ID: StandardId = unsafe { StandardId::new_unchecked(0x7F1) };

/// Network id every device answers to.
pub const BROADCAST_NETWORK_ID: u16 = 0xFFFF;
/// Network id of a device that was never assigned one.
pub const DEFAULT_NETWORK_ID: u16 = 0x0001;

/// Default bounded wait for data store requests.
pub const DATA_QUEUE_TIMEOUT_MS: u32 = 10;

/// Reserved identifiers of the node protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolConfig {
    pub software_reset_id: Id,
    pub bootloader_id: Id,
    pub network_node_id_id: Id,
    pub broadcast_id: u16,
}

impl ProtocolConfig {
    pub const DEFAULT: ProtocolConfig = ProtocolConfig {
        software_reset_id: Id::Standard(SOFTWARE_RESET_ID),
        bootloader_id: Id::Standard(BOOTLOADER_ID),
        network_node_id_id: Id::Standard(NETWORK_NODE_ID_ID),
        broadcast_id: BROADCAST_NETWORK_ID,
    };
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Receive and transmit setup of one node.
#[derive(Debug, Clone, Copy)]
pub struct NodeConfig<'a> {
    pub descriptors: &'a [ReceiveDescriptor],
    /// Identifiers served on the bypass path, linked to the descriptor with
    /// the same identifier.
    pub bypass_ids: &'a [Id],
    /// Frames are buffered in the node's receive ring.
    pub use_rx_buffer: bool,
    /// [`CanDriver::send`](crate::CanDriver::send) goes through the node's transmit queue.
    pub use_tx_buffer: bool,
}

impl<'a> NodeConfig<'a> {
    pub const DISABLED: NodeConfig<'static> = NodeConfig {
        descriptors: &[],
        bypass_ids: &[],
        use_rx_buffer: false,
        use_tx_buffer: false,
    };

    pub const fn new(descriptors: &'a [ReceiveDescriptor]) -> Self {
        NodeConfig {
            descriptors,
            bypass_ids: &[],
            use_rx_buffer: false,
            use_tx_buffer: false,
        }
    }

    pub const fn with_bypass(mut self, bypass_ids: &'a [Id]) -> Self {
        self.bypass_ids = bypass_ids;
        self
    }

    pub const fn buffered(mut self, rx: bool, tx: bool) -> Self {
        self.use_rx_buffer = rx;
        self.use_tx_buffer = tx;
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CanConfig<'a> {
    pub nodes: PerNode<NodeConfig<'a>>,
    pub filter_bank_count: usize,
    pub protocol: ProtocolConfig,
}

impl<'a> CanConfig<'a> {
    pub const fn new(node0: NodeConfig<'a>, node1: NodeConfig<'a>) -> Self {
        CanConfig {
            nodes: PerNode::new(node0, node1),
            filter_bank_count: MAX_FILTER_BANKS,
            protocol: ProtocolConfig::DEFAULT,
        }
    }
}
