//! Common error types for lifepo4wered-access.
//!
//! This module provides a centralized Error enum using thiserror. Every
//! variant maps onto one of the coarse classes a caller of the boolean
//! wrappers would care about; see [`ErrorKind`].

use std::fmt;
use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

use crate::hw_trait::I2cError;

/// Which step of a register access a transaction failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Register-address write that precedes a read
    Latch,
    /// Data read following the latch
    Read,
    /// Combined register + payload write
    Write,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Latch => write!(f, "address latch"),
            Phase::Read => write!(f, "data read"),
            Phase::Write => write!(f, "data write"),
        }
    }
}

/// Coarse classification of [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Device could not be opened or its lock is held elsewhere
    BusUnavailable,
    /// The addressed transaction was rejected by the bus layer
    TransactionFailed,
    /// Caller-supplied lengths violate the access contract
    InvalidArgument,
    /// Configuration could not be loaded
    Config,
}

/// Main error type for lifepo4wered-access operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Opening the bus device node failed
    #[error("cannot open I2C bus {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Another handle holds the exclusive bus lock
    #[error("I2C bus {} is locked by another user", .path.display())]
    Busy { path: PathBuf },

    /// Taking the bus lock failed for a reason other than contention
    #[error("cannot lock I2C bus {}: {source}", .path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: Errno,
    },

    /// An addressed transaction was rejected
    #[error("I2C {phase} failed: {source}")]
    Transaction {
        phase: Phase,
        #[source]
        source: I2cError,
    },

    /// Register byte plus payload does not fit a single frame
    #[error("payload of {len} bytes exceeds the {max} byte frame limit")]
    PayloadTooLarge { len: usize, max: usize },

    /// Caller buffer is shorter than the requested byte count
    #[error("buffer of {len} bytes cannot hold {count} requested bytes")]
    BufferTooSmall { len: usize, count: usize },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Open { .. } | Error::Busy { .. } | Error::Lock { .. } => {
                ErrorKind::BusUnavailable
            }
            Error::Transaction { .. } => ErrorKind::TransactionFailed,
            Error::PayloadTooLarge { .. } | Error::BufferTooSmall { .. } => {
                ErrorKind::InvalidArgument
            }
            Error::Config(_) => ErrorKind::Config,
        }
    }

    pub(crate) fn transaction(phase: Phase) -> impl FnOnce(I2cError) -> Error {
        move |source| Error::Transaction { phase, source }
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(err.to_string())
    }
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        let busy = Error::Busy {
            path: PathBuf::from("/dev/i2c-1"),
        };
        assert_eq!(busy.kind(), ErrorKind::BusUnavailable);

        let nack = Error::Transaction {
            phase: Phase::Latch,
            source: I2cError::NoAck(0x43),
        };
        assert_eq!(nack.kind(), ErrorKind::TransactionFailed);

        let big = Error::PayloadTooLarge { len: 300, max: 255 };
        assert_eq!(big.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_display_names_phase() {
        let err = Error::Transaction {
            phase: Phase::Read,
            source: I2cError::NoAck(0x43),
        };
        assert_eq!(
            err.to_string(),
            "I2C data read failed: no acknowledgment from device at address 0x43"
        );
    }
}
