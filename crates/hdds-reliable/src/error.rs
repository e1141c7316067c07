// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Errors returned by the reliability engine.
//!
//! Only application-facing operations (`write`, `match_reader`, the blocking
//! wait APIs, explicit removals) surface errors. Timer- and network-driven
//! transitions are handled internally and logged.

use crate::types::{Guid, SequenceNumber};

/// Errors returned by writer and flow controller operations.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration object failed validation.
    InvalidConfig(String),
    /// No flow controller registered under the requested name.
    UnknownFlowController(String),

    // ========================================================================
    // Reader Lifecycle Errors
    // ========================================================================
    /// Reader identity is unknown or malformed (e.g. GUID_UNKNOWN).
    InvalidReader(Guid),
    /// Reader is already matched with this writer.
    AlreadyMatched(Guid),
    /// Reader is not matched with this writer.
    ReaderNotMatched(Guid),

    // ========================================================================
    // Sample / History Errors
    // ========================================================================
    /// Sequence number is not strictly greater than the last written one.
    OutOfOrderSequence {
        /// Highest sequence number written so far.
        last: SequenceNumber,
        /// Offending sequence number.
        got: SequenceNumber,
    },
    /// Sample was produced by another writer.
    ForeignSample(Guid),
    /// Writer aborted after a fatal invariant violation.
    WriterFailed,
    /// Sequence number is not present in the writer history.
    UnknownSequence(SequenceNumber),
    /// Sample is still awaiting acknowledgement from at least one reader.
    NotAcknowledged(SequenceNumber),
    /// History or queue capacity exhausted.
    ResourceLimitExceeded(String),

    // ========================================================================
    // Delivery Errors
    // ========================================================================
    /// Blocking operation timed out.
    Timeout,
    /// Synchronous delivery failed and no fallback is configured.
    SendFailed(String),
    /// I/O error with underlying cause.
    IoError(std::io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            Error::UnknownFlowController(name) => write!(f, "Unknown flow controller: {}", name),
            Error::InvalidReader(guid) => write!(f, "Invalid reader identity: {}", guid),
            Error::AlreadyMatched(guid) => write!(f, "Reader already matched: {}", guid),
            Error::ReaderNotMatched(guid) => write!(f, "Reader not matched: {}", guid),
            Error::OutOfOrderSequence { last, got } => write!(
                f,
                "Out-of-order sequence number {} (last written {})",
                got, last
            ),
            Error::ForeignSample(guid) => write!(f, "Sample belongs to writer {}", guid),
            Error::WriterFailed => write!(f, "Writer aborted after fatal invariant violation"),
            Error::UnknownSequence(seq) => write!(f, "Sequence number {} not in history", seq),
            Error::NotAcknowledged(seq) => {
                write!(f, "Sequence number {} not acknowledged by all readers", seq)
            }
            Error::ResourceLimitExceeded(msg) => write!(f, "Resource limit exceeded: {}", msg),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::SendFailed(msg) => write!(f, "Send failed: {}", msg),
            Error::IoError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IoError(e)
    }
}

/// Convenient alias for results using the crate `Error` type.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_display_out_of_order() {
        let err = Error::OutOfOrderSequence { last: 7, got: 3 };
        assert_eq!(
            err.to_string(),
            "Out-of-order sequence number 3 (last written 7)"
        );
    }

    #[test]
    fn test_io_error_has_source() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::WouldBlock, "full").into();
        assert!(err.source().is_some());
        assert!(Error::Timeout.source().is_none());
    }
}
