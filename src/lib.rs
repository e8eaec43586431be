//! CAN communication core of a battery management system
//!
//! Two bxCAN-style controllers share one block of filter banks. Incoming
//! frames are routed at interrupt priority to bypass callbacks, a receive
//! ring or the node protocol; outgoing frames go through a per-node transmit
//! queue or straight into a mailbox.
#![cfg_attr(not(feature = "std"), no_std)]

pub mod config;
pub mod database;
pub mod diag;
pub mod driver;
pub mod error;
pub mod filter;
pub mod frame;
pub mod hal;
pub mod node;
pub mod protocol;
pub mod ring;
pub mod router;
pub mod system;
pub mod tx;

pub use crate::driver::{CanBuffers, CanDriver, Collaborators, RxOutcome};
pub use crate::error::{ErrorCode, ErrorRecord};
pub use crate::filter::{FilterAllocator, FilterError, ReceiveDescriptor, RxHandler};
pub use crate::frame::CanFrame;
pub use crate::hal::{CanHardware, Fifo};
pub use crate::node::{CanNode, PerNode};
pub use crate::protocol::{NodeIdentity, NodeProtocol, ProtocolEvent};
pub use crate::tx::TxError;
