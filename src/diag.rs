use crate::node::CanNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DiagEvent {
    /// Filter or bypass configuration of a node could not be applied.
    CanInitFailure,
    /// Bus error interrupt, code carries the [`ErrorCode`](crate::error::ErrorCode) bits.
    CanBusError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DiagSeverity {
    Info,
    Warning,
    Error,
}

/// Failure codes reported with [`DiagEvent::CanInitFailure`].
pub mod init_failure {
    /// More bypass identifiers than receive descriptors.
    pub const BYPASS_TABLE_TOO_LONG: u32 = 1;
    /// Not enough filter banks left.
    pub const INSUFFICIENT_FILTER_BANKS: u32 = 2;
    /// More bypass identifiers than the router holds. The excess ones are
    /// served like any other identifier.
    pub const BYPASS_TABLE_OVERFLOW: u32 = 3;
}

/// Sink for diagnostic events. Called from interrupt context, must not block.
pub trait Diagnostics {
    fn notify(&self, event: DiagEvent, severity: DiagSeverity, code: u32, node: Option<CanNode>);
}
