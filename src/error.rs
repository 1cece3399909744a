//! Error types for the CEC bridge.

use thiserror::Error;

/// Errors surfaced by the bridge.
#[derive(Error, Debug)]
pub enum CecError {
    /// Adapter I/O error (ioctl, open). During steady-state operation the
    /// reactor recovers from these by reopening the device node.
    #[error("adapter I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A logical address outside [0,16) was supplied or reported
    #[error("logical address {0} out of range")]
    AddressOutOfRange(u8),

    /// The adapter has not claimed any logical address yet
    #[error("adapter is unconfigured, no logical address claimed")]
    Unconfigured,

    /// Source name not in the fixed input list
    #[error("unknown input source: {0}")]
    UnknownSource(String),

    /// UI command outside the supported vocabulary
    #[error("unknown ui command: {0}")]
    UnknownUiCommand(String),
}

pub type Result<T> = std::result::Result<T, CecError>;
