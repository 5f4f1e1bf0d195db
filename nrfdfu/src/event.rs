//! Transfer events reported to an external observer.
//!
//! The core never renders progress itself; it hands these to whatever
//! listener was registered on the transport (a progress bar, a log sink,
//! nothing at all).

/// Event emitted during a DFU transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DfuEvent {
    /// Firmware transfer progress.
    Progress {
        /// Percentage of data packets sent, 0-100.
        percent: u8,
        /// Whether the transfer has finished.
        done: bool,
        /// Free-form status text, may be empty.
        message: String,
    },
    /// An acknowledgement wait expired. The packet will be retried until
    /// the attempt budget runs out; this event is informational.
    Timeout {
        /// Description of what timed out.
        message: String,
    },
}

/// Observer callback registered on a [`crate::dfu::DfuTransport`].
pub type EventListener = Box<dyn FnMut(&DfuEvent)>;
