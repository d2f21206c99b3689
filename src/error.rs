// Freescale SEC (TALITOS) Descriptor Engine
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Error types for SEC engine operations.

use thiserror::Error;

/// Errors that can occur while configuring or driving the SEC engine.
#[derive(Debug, Error)]
pub enum SecError {
    /// Device geometry or capability data is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid argument provided.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Key length rejected by the transform.
    #[error("bad key length: {0}")]
    BadKeyLength(usize),

    /// Request data exceeds what a single descriptor pointer can carry.
    #[error("length {0} exceeds h/w max limit")]
    LengthTooLarge(usize),

    /// Neither the recycle pool nor the allocator could provide memory.
    #[error("out of memory allocating {0} bytes")]
    OutOfMemory(usize),

    /// The selected channel has no free FIFO slot; retry later.
    #[error("channel {0} is busy")]
    Busy(u8),

    /// No channel is assigned to the caller's affinity group.
    #[error("no channel configured for group {0}")]
    NoChannel(u8),

    /// A channel reset did not self-clear before the deadline.
    #[error("failed to reset channel {0}")]
    ChannelResetTimeout(u8),

    /// A channel continue did not self-clear before the deadline.
    #[error("failed to restart channel {0}")]
    ChannelContinueTimeout(u8),

    /// The master software reset did not self-clear before the deadline.
    #[error("failed to reset device")]
    DeviceResetTimeout,

    /// Bus address is not (or no longer) mapped.
    #[error("bus address {0:#011x} is not mapped")]
    UnmappedAddress(u64),

    /// Algorithm is not supported by this device.
    #[error("algorithm {0} not supported by device")]
    Unsupported(String),

    /// A completion callback was dropped without being called.
    #[error("request dropped before completion")]
    Dropped,

    /// A submitted request completed with an error.
    #[error("request failed: {0}")]
    Request(#[from] RequestError),
}

/// Result type alias for SEC operations.
pub type SecResult<T> = Result<T, SecError>;

/// Status delivered to a request's completion callback when it did not
/// succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RequestError {
    /// Retryable: the descriptor was dropped or the channel had to be reset.
    #[error("retryable channel fault")]
    Again,

    /// Fatal I/O failure: the device was reset or is unrecoverable.
    #[error("device I/O error")]
    Io,

    /// The channel rejected the descriptor or its data.
    #[error("invalid descriptor or data")]
    Invalid,

    /// Integrity check value mismatch.
    #[error("authentication failed")]
    BadMessage,
}

impl RequestError {
    /// Negative errno value equivalent of this status.
    pub fn errno(self) -> i32 {
        match self {
            Self::Again => -libc::EAGAIN,
            Self::Io => -libc::EIO,
            Self::Invalid => -libc::EINVAL,
            Self::BadMessage => -libc::EBADMSG,
        }
    }

    /// Returns true if the caller may resubmit the request unchanged.
    #[inline]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Again)
    }
}

/// Outcome reported to a completion callback.
pub type RequestStatus = Result<(), RequestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(RequestError::Again.errno(), -libc::EAGAIN);
        assert_eq!(RequestError::Io.errno(), -libc::EIO);
        assert_eq!(RequestError::Invalid.errno(), -libc::EINVAL);
        assert_eq!(RequestError::BadMessage.errno(), -libc::EBADMSG);
        assert!(RequestError::Again.errno() < 0);
    }

    #[test]
    fn test_retryable() {
        assert!(RequestError::Again.is_retryable());
        assert!(!RequestError::Io.is_retryable());
        assert!(!RequestError::BadMessage.is_retryable());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            SecError::ChannelResetTimeout(2).to_string(),
            "failed to reset channel 2"
        );
        let err: SecError = RequestError::BadMessage.into();
        assert_eq!(err.to_string(), "request failed: authentication failed");
    }
}
