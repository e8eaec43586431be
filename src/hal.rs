//! Controller abstraction
//!
//! One `CanHardware` instance drives one bxCAN-style controller: filter banks,
//! two receive FIFOs, the transmit mailboxes and the error status register.

use crate::error::LastErrorCode;
use crate::filter::FilterBank;
use crate::frame::CanFrame;

/// Hardware receive FIFO a filter bank routes matched frames into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Fifo {
    Fifo0 = 0,
    Fifo1 = 1,
}

impl Fifo {
    pub const ALL: [Fifo; 2] = [Fifo::Fifo0, Fifo::Fifo1];
}

/// Reasons the controller refused a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransmitError {
    /// All mailboxes are occupied.
    Busy,
    /// Controller not initialised or in a fault state.
    Fault,
}

/// Snapshot of the error status register.
///
/// Only conditions whose interrupt source is enabled are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BusErrorFlags {
    pub warning: bool,
    pub passive: bool,
    pub bus_off: bool,
    pub last_error: LastErrorCode,
}

pub trait CanHardware {
    /// Brings the controller into initialisation mode.
    fn init(&mut self);

    /// Writes one filter bank. `first_bank` is the bank the controller's own
    /// filters start at when banks are shared between two controllers.
    fn configure_filter_bank(&mut self, bank: &FilterBank, first_bank: u8);

    /// Leaves initialisation mode and enables the receive, transmit and error
    /// interrupts.
    fn start(&mut self);

    /// Number of frames waiting in `fifo`.
    fn pending(&self, fifo: Fifo) -> u8;

    /// Copies the frame at the head of `fifo`, if any, without releasing it.
    fn read_frame(&mut self, fifo: Fifo) -> Option<CanFrame>;

    /// Releases the head of `fifo`.
    fn release_fifo(&mut self, fifo: Fifo);

    /// Places `frame` into a free transmit mailbox.
    fn transmit(&mut self, frame: &CanFrame) -> Result<(), TransmitError>;

    /// Returns and clears the "request completed" status of the mailboxes.
    fn take_transmit_complete(&mut self) -> bool;

    fn bus_error_flags(&self) -> BusErrorFlags;

    fn clear_bus_error_flags(&mut self, flags: &BusErrorFlags);

    /// Masks every error interrupt source.
    fn disable_error_interrupts(&mut self);

    /// Forces the driver-level state back to ready.
    fn set_ready(&mut self);

    fn sleep(&mut self);

    fn wake_up(&mut self);
}
