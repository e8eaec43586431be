use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embedded_can::{Id, StandardId};

use crate::frame::CanFrame;
use crate::hal::{CanHardware, TransmitError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxError {
    /// Every slot holds an unsent frame.
    BufferFull,
    /// The node has no transmit buffer.
    Disabled,
    /// The node is silenced.
    ListenOnly,
    /// No free mailbox, retry later.
    Busy,
    Fault,
}

impl From<TransmitError> for TxError {
    fn from(error: TransmitError) -> Self {
        match error {
            TransmitError::Busy => TxError::Busy,
            TransmitError::Fault => TxError::Fault,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxSlot {
    pub frame: CanFrame,
    pub new_msg: bool,
}

impl TxSlot {
    const EMPTY: TxSlot = TxSlot {
        frame: CanFrame::from_parts(Id::Standard(StandardId::ZERO), false, 0, [0; 8]),
        new_msg: false,
    };
}

struct TxState<const N: usize> {
    slots: [TxSlot; N],
    write: usize,
    read: usize,
}

/// Outbound ring of one node.
///
/// Filled from task context, drained from the transmit interrupt. Both sides
/// only hold the critical section while checking and moving the cursors.
pub struct TxQueue<const N: usize> {
    state: Mutex<CriticalSectionRawMutex, RefCell<TxState<N>>>,
}

impl<const N: usize> Default for TxQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> TxQueue<N> {
    pub const fn new() -> Self {
        assert!(N > 0);
        TxQueue {
            state: Mutex::new(RefCell::new(TxState {
                slots: [TxSlot::EMPTY; N],
                write: 0,
                read: 0,
            })),
        }
    }

    pub fn enqueue(&self, frame: CanFrame) -> Result<(), TxError> {
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            let write = state.write;
            if state.slots[write].new_msg {
                // write caught up with read
                return Err(TxError::BufferFull);
            }
            state.slots[write] = TxSlot {
                frame,
                new_msg: true,
            };
            state.write = (write + 1) % N;
            Ok(())
        })
    }

    /// Oldest unsent frame and its slot index.
    fn peek(&self) -> Option<(usize, CanFrame)> {
        self.state.lock(|state| {
            let state = state.borrow();
            let slot = &state.slots[state.read];
            slot.new_msg.then_some((state.read, slot.frame))
        })
    }

    /// Hands the oldest frame to the hardware.
    ///
    /// Returns `Ok(false)` when nothing was pending. A refused frame stays
    /// queued for the next attempt.
    pub fn drain_one<H: CanHardware>(&self, hardware: &mut H) -> Result<bool, TxError> {
        let Some((index, frame)) = self.peek() else {
            return Ok(false);
        };
        hardware.transmit(&frame)?;
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            if state.read == index && state.slots[index].new_msg {
                state.slots[index].new_msg = false;
                state.read = (index + 1) % N;
            }
        });
        Ok(true)
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock(|state| {
            let state = state.borrow();
            state.read == state.write && !state.slots[state.read].new_msg
        })
    }

    pub fn len(&self) -> usize {
        self.state.lock(|state| state.borrow().slots.iter().filter(|s| s.new_msg).count())
    }
}
