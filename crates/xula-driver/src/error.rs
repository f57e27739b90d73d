//! Error types for XuLA-2 driver operations

use thiserror::Error;
use xula_chip::FieldError;

/// Result type alias for XuLA-2 operations
pub type Result<T> = std::result::Result<T, XulaError>;

/// Errors that can occur while talking to a peripheral
#[derive(Debug, Error)]
pub enum XulaError {
    /// No module answers at the requested address
    #[error("Module {module_id:#04x} not found on USB index {usb_index}")]
    DeviceNotFound {
        /// USB index that was tried
        usb_index: u32,
        /// Module identifier that was tried
        module_id: u8,
    },

    /// A register transaction failed in the transport
    #[error("Transport error: {reason}")]
    Transport {
        /// Reason for failure
        reason: String,
    },

    /// A status condition was not reached within the poll bound
    #[error("Device unresponsive: {condition} not reached during {phase} after {polls} polls ({elapsed_ms}ms)")]
    Unresponsive {
        /// Condition being waited for
        condition: &'static str,
        /// Transfer phase at the time of the wait
        phase: String,
        /// Number of status reads issued
        polls: u64,
        /// Time spent waiting in milliseconds
        elapsed_ms: u64,
    },

    /// The controller stayed busy through every reset attempt
    #[error("Device unresponsive: still busy after {attempts} resets")]
    InitFailed {
        /// Number of resets issued
        attempts: u32,
    },

    /// The controller reported a nonzero error status
    #[error("Device error status {code:#06x} during {phase}")]
    DeviceError {
        /// Error code from the status frame
        code: u16,
        /// Transfer phase when it was observed
        phase: String,
    },

    /// A register field did not fit its declared width
    #[error("Register field error: {source}")]
    Field {
        /// Underlying layout error
        #[from]
        source: FieldError,
    },

    /// Write source longer than one block
    #[error("Block data too long: {len} bytes (block is {max})")]
    BlockTooLong {
        /// Supplied length
        len: usize,
        /// Block size
        max: usize,
    },

    /// Configuration values that cannot work
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// What is wrong
        reason: String,
    },
}

impl XulaError {
    /// Create a transport error
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// True for the errors a wedged peripheral produces
    pub const fn is_unresponsive(&self) -> bool {
        matches!(self, Self::Unresponsive { .. } | Self::InitFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresponsive_kinds() {
        let hang = XulaError::Unresponsive {
            condition: "busy cleared",
            phase: "Draining".into(),
            polls: 10,
            elapsed_ms: 1,
        };
        assert!(hang.is_unresponsive());
        assert!(XulaError::InitFailed { attempts: 3 }.is_unresponsive());
        assert!(!XulaError::transport("usb").is_unresponsive());
    }

    #[test]
    fn messages_name_the_condition() {
        let hang = XulaError::Unresponsive {
            condition: "handshake asserted",
            phase: "Transferring(3)".into(),
            polls: 42,
            elapsed_ms: 7,
        };
        let msg = hang.to_string();
        assert!(msg.contains("handshake asserted"));
        assert!(msg.contains("Transferring(3)"));
        assert!(msg.contains("42 polls"));
    }

    #[test]
    fn field_errors_convert() {
        let err: XulaError = FieldError::CountMismatch { expected: 4, got: 1 }.into();
        assert!(matches!(err, XulaError::Field { .. }));
    }
}
