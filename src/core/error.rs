//! Error types for the desk controller core

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the desk link and the control logic built on it
#[derive(Debug, Error)]
pub enum DeskError {
    /// The bounded initial connect ran out of attempts
    #[error("could not connect to desk after {attempts} attempt(s): {reason}")]
    Connect { attempts: u32, reason: String },

    /// A telemetry record was not exactly 4 bytes long
    #[error("malformed telemetry payload: expected 4 bytes, got {len}")]
    MalformedPayload { len: usize },

    #[error("no Bluetooth adapter found")]
    NoAdapter,

    #[error("device not found with address: {0}")]
    DeviceNotFound(String),

    #[error("characteristic not found: {0}")]
    CharacteristicNotFound(Uuid),

    #[error("desk is not connected")]
    NotConnected,

    #[error("bluetooth error: {0}")]
    Bluetooth(#[from] bluest::Error),

    #[error("timed out while {0}")]
    Timeout(&'static str),
}

pub type DeskResult<T> = Result<T, DeskError>;
