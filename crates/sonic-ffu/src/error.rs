//! FFU error types and status handling.
//!
//! Every fallible operation in this crate returns [`FfuResult`]. The
//! [`FfuStatus`] codes mirror the numeric status values the ACL compiler
//! boundary still speaks, so errors can be handed back across it unchanged.

use std::fmt;
use thiserror::Error;
use tracing::error;

use crate::mux::MuxPosition;
use crate::types::SliceOwner;

/// Legacy FFU status codes.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FfuStatus {
    Ok = 0,
    Fail = -1,
    InvalidSwitch = -2,
    UnsupportedSwitchType = -3,
    InvalidSlice = -4,
    InvalidArgument = -5,
    InvalidMuxSelect = -6,
    ResourceOwned = -7,
    NoResourceFound = -8,
    InvalidPort = -9,
    IoError = -10,
    InternalError = -11,
}

impl FfuStatus {
    /// Creates a status from a raw i32 value.
    pub fn from_raw(status: i32) -> Self {
        match status {
            0 => FfuStatus::Ok,
            -2 => FfuStatus::InvalidSwitch,
            -3 => FfuStatus::UnsupportedSwitchType,
            -4 => FfuStatus::InvalidSlice,
            -5 => FfuStatus::InvalidArgument,
            -6 => FfuStatus::InvalidMuxSelect,
            -7 => FfuStatus::ResourceOwned,
            -8 => FfuStatus::NoResourceFound,
            -9 => FfuStatus::InvalidPort,
            -10 => FfuStatus::IoError,
            -11 => FfuStatus::InternalError,
            _ => FfuStatus::Fail,
        }
    }

    /// Returns true if the status indicates success.
    pub fn is_ok(&self) -> bool {
        *self == FfuStatus::Ok
    }

    /// Converts to a Result, returning Ok(()) for success.
    pub fn into_result(self) -> FfuResult<()> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(FfuError::from_status(self))
        }
    }
}

impl fmt::Display for FfuStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FfuStatus::Ok => "FM_OK",
            FfuStatus::Fail => "FM_FAIL",
            FfuStatus::InvalidSwitch => "FM_ERR_INVALID_SWITCH",
            FfuStatus::UnsupportedSwitchType => "FM_ERR_UNSUPPORTED",
            FfuStatus::InvalidSlice => "FM_ERR_INVALID_SLICE",
            FfuStatus::InvalidArgument => "FM_ERR_INVALID_ARGUMENT",
            FfuStatus::InvalidMuxSelect => "FM_ERR_INVALID_FFU_MUX_SELECT",
            FfuStatus::ResourceOwned => "FM_ERR_FFU_RES_OWNED",
            FfuStatus::NoResourceFound => "FM_ERR_NO_FFU_RES_FOUND",
            FfuStatus::InvalidPort => "FM_ERR_INVALID_PORT",
            FfuStatus::IoError => "FM_ERR_IO",
            FfuStatus::InternalError => "FM_ERR_ASSERTION_FAILED",
        };
        write!(f, "{}", s)
    }
}

/// Error type for FFU operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FfuError {
    /// The switch is not up, or the engine was detached from it.
    #[error("Invalid switch {switch_id}")]
    InvalidSwitch { switch_id: u32 },

    /// The switch family has no FFU slice engine.
    #[error("Switch type not supported: {family}")]
    UnsupportedSwitchType { family: String },

    /// Slice geometry violation.
    #[error("Invalid slice: {message}")]
    InvalidSlice { message: String },

    /// A value is outside its documented field range.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// A generic selector has no hardware mux code at the requested position.
    #[error("No mux select for generic selector 0x{generic:02x} at {position}")]
    InvalidMuxSelect { generic: u8, position: MuxPosition },

    /// Slice ownership conflict.
    #[error("Slice {slice} is owned by {owner}")]
    ResourceOwned { slice: usize, owner: SliceOwner },

    /// Ownership query matched nothing.
    #[error("No slices owned by {owner}")]
    NoResourceFound { owner: SliceOwner },

    /// A logical port has no glort.
    #[error("Logical port {port} cannot be resolved to a glort")]
    InvalidPort { port: u32 },

    /// Underlying register access failed.
    #[error("Register access failed at 0x{address:08x}: {message}")]
    Io { address: u32, message: String },

    /// Logic or codec bug, e.g. an impossible key encoding.
    #[error("Internal invariant violated: {message}")]
    InternalInvariantViolation { message: String },

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    Config { field: String, message: String },
}

impl FfuError {
    /// Creates an error from a status code.
    pub fn from_status(status: FfuStatus) -> Self {
        let message = format!("status {}", status);
        match status {
            FfuStatus::InvalidSwitch => FfuError::InvalidSwitch { switch_id: 0 },
            FfuStatus::UnsupportedSwitchType => FfuError::UnsupportedSwitchType {
                family: "unknown".to_string(),
            },
            FfuStatus::InvalidSlice => FfuError::invalid_slice(message),
            FfuStatus::InvalidArgument | FfuStatus::InvalidMuxSelect => {
                FfuError::invalid_argument(message)
            }
            FfuStatus::ResourceOwned => FfuError::ResourceOwned {
                slice: 0,
                owner: SliceOwner::None,
            },
            FfuStatus::NoResourceFound => FfuError::NoResourceFound {
                owner: SliceOwner::None,
            },
            FfuStatus::InvalidPort => FfuError::InvalidPort { port: 0 },
            FfuStatus::IoError => FfuError::io(0, message),
            FfuStatus::Ok | FfuStatus::Fail | FfuStatus::InternalError => {
                FfuError::internal(message)
            }
        }
    }

    /// Creates an invalid slice error.
    pub fn invalid_slice(message: impl Into<String>) -> Self {
        FfuError::InvalidSlice {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        FfuError::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a register I/O error.
    pub fn io(address: u32, message: impl Into<String>) -> Self {
        FfuError::Io {
            address,
            message: message.into(),
        }
    }

    /// Creates an internal invariant violation, logged at error level.
    pub fn internal(message: impl Into<String>) -> Self {
        let message = message.into();
        error!(%message, "FFU internal invariant violated");
        FfuError::InternalInvariantViolation { message }
    }

    /// Creates a configuration error.
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        FfuError::Config {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns the legacy status code for this error.
    pub fn status(&self) -> FfuStatus {
        match self {
            FfuError::InvalidSwitch { .. } => FfuStatus::InvalidSwitch,
            FfuError::UnsupportedSwitchType { .. } => FfuStatus::UnsupportedSwitchType,
            FfuError::InvalidSlice { .. } => FfuStatus::InvalidSlice,
            FfuError::InvalidArgument { .. } | FfuError::Config { .. } => {
                FfuStatus::InvalidArgument
            }
            FfuError::InvalidMuxSelect { .. } => FfuStatus::InvalidMuxSelect,
            FfuError::ResourceOwned { .. } => FfuStatus::ResourceOwned,
            FfuError::NoResourceFound { .. } => FfuStatus::NoResourceFound,
            FfuError::InvalidPort { .. } => FfuStatus::InvalidPort,
            FfuError::Io { .. } => FfuStatus::IoError,
            FfuError::InternalInvariantViolation { .. } => FfuStatus::InternalError,
        }
    }

    /// Returns true if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FfuError::Io { .. })
    }
}

/// Result type for FFU operations.
pub type FfuResult<T> = Result<T, FfuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_ok() {
        assert!(FfuStatus::Ok.is_ok());
        assert!(FfuStatus::Ok.into_result().is_ok());
        assert!(FfuStatus::InvalidSlice.into_result().is_err());
    }

    #[test]
    fn test_status_from_raw() {
        assert_eq!(FfuStatus::from_raw(0), FfuStatus::Ok);
        assert_eq!(FfuStatus::from_raw(-7), FfuStatus::ResourceOwned);
        assert_eq!(FfuStatus::from_raw(-999), FfuStatus::Fail);
    }

    #[test]
    fn test_error_status_mapping() {
        let err = FfuError::invalid_slice("keyStart > keyEnd");
        assert_eq!(err.status(), FfuStatus::InvalidSlice);

        let err = FfuError::ResourceOwned {
            slice: 3,
            owner: SliceOwner::Routing,
        };
        assert_eq!(err.status(), FfuStatus::ResourceOwned);
        assert_eq!(err.to_string(), "Slice 3 is owned by ROUTING");

        let err = FfuError::from_status(FfuStatus::NoResourceFound);
        assert!(matches!(err, FfuError::NoResourceFound { .. }));
    }

    #[test]
    fn test_error_retryable() {
        assert!(FfuError::io(0x100, "timeout").is_retryable());
        assert!(!FfuError::invalid_argument("count").is_retryable());
    }

    #[test]
    fn test_io_error_display() {
        let err = FfuError::io(0x00c0_0004, "bus error");
        assert_eq!(
            err.to_string(),
            "Register access failed at 0x00c00004: bus error"
        );
    }
}
