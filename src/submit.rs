// Freescale SEC (TALITOS) Descriptor Engine
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! In-flight request records and submission results.
//!
//! # Ownership
//!
//! A front-end builds an [`ExtDesc`] and hands it to
//! [`SecEngine::submit`](crate::SecEngine::submit) together with a
//! [`CompletionFn`]. If the engine accepts the request, it owns both until
//! the descriptor is drained, at which point the callback receives the
//! descriptor back along with the outcome. If the engine defers the
//! request, the descriptor is returned to the caller untouched and the
//! callback is dropped without being called.

use crate::affinity::{ExecCtx, GroupId};
use crate::bus::{BusAddr, DmaMapper};
use crate::edesc::{EdescPool, ExtDesc};
use crate::error::{RequestStatus, SecError};

/// Environment passed to completion callbacks.
pub struct CompletionCtx<'a> {
    /// Bus mapper, to release the request's buffer mappings.
    pub mapper: &'a dyn DmaMapper,
    /// Recycle pool the descriptor should be released into.
    pub pool: &'a EdescPool,
    /// Context running the completion.
    pub exec: ExecCtx,
    /// Channel the request ran on.
    pub channel: u8,
}

impl CompletionCtx<'_> {
    /// Hand the descriptor back to the recycle pool.
    #[inline]
    pub fn release(&self, edesc: Box<ExtDesc>) {
        self.pool.release(self.exec, edesc);
    }
}

/// Completion callback: receives the environment, the descriptor and the
/// outcome. Must not block.
pub type CompletionFn = Box<dyn FnOnce(&CompletionCtx<'_>, Box<ExtDesc>, RequestStatus) + Send>;

/// A request occupying a ring slot.
pub struct Request {
    /// Bus address of the mapped descriptor.
    pub dma_desc: BusAddr,
    pub edesc: Box<ExtDesc>,
    pub callback: CompletionFn,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("dma_desc", &self.dma_desc)
            .field("hdr", &format_args!("{:#010x}", self.edesc.desc.hdr))
            .finish_non_exhaustive()
    }
}

/// A drained request and its outcome, waiting for its callback to run.
#[derive(Debug)]
pub struct Finished {
    pub request: Request,
    pub status: RequestStatus,
}

/// Why a submission was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferReason {
    /// The caller's group has no channels.
    NoChannel(GroupId),
    /// The selected channel has no credit left.
    FifoFull(u8),
}

impl DeferReason {
    pub const fn name(self) -> &'static str {
        match self {
            Self::NoChannel(_) => "NO_CHANNEL",
            Self::FifoFull(_) => "FIFO_FULL",
        }
    }
}

impl std::fmt::Display for DeferReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoChannel(g) => write!(f, "{} (group {})", self.name(), g.0),
            Self::FifoFull(ch) => write!(f, "{} (channel {ch})", self.name()),
        }
    }
}

impl From<DeferReason> for SecError {
    fn from(reason: DeferReason) -> Self {
        match reason {
            DeferReason::NoChannel(g) => SecError::NoChannel(g.0),
            DeferReason::FifoFull(ch) => SecError::Busy(ch),
        }
    }
}

/// Result of a submission.
#[derive(Debug)]
pub enum SubmitResult {
    /// The descriptor was pushed to `channel`; the callback will run.
    InProgress { channel: u8 },
    /// Not accepted, retry later. The descriptor is handed back.
    Deferred {
        edesc: Box<ExtDesc>,
        reason: DeferReason,
    },
    /// The descriptor could not be mapped. The descriptor is handed back.
    Failed { edesc: Box<ExtDesc>, error: SecError },
}

impl SubmitResult {
    /// Returns true if the request is in flight.
    #[inline]
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::InProgress { .. })
    }

    /// Returns true if the caller should retry later.
    #[inline]
    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred { .. })
    }

    /// Channel the request was pushed to.
    pub fn channel(&self) -> Option<u8> {
        match self {
            Self::InProgress { channel } => Some(*channel),
            _ => None,
        }
    }

    /// Convert into a plain result, giving back the descriptor on failure.
    pub fn into_result(self) -> Result<u8, (Box<ExtDesc>, SecError)> {
        match self {
            Self::InProgress { channel } => Ok(channel),
            Self::Deferred { edesc, reason } => Err((edesc, reason.into())),
            Self::Failed { edesc, error } => Err((edesc, error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defer_reason_display() {
        assert_eq!(
            DeferReason::FifoFull(3).to_string(),
            "FIFO_FULL (channel 3)"
        );
        assert_eq!(
            DeferReason::NoChannel(GroupId(1)).to_string(),
            "NO_CHANNEL (group 1)"
        );
    }

    #[test]
    fn test_defer_reason_into_error() {
        let err: SecError = DeferReason::FifoFull(2).into();
        assert!(matches!(err, SecError::Busy(2)));
        let err: SecError = DeferReason::NoChannel(GroupId(0)).into();
        assert!(matches!(err, SecError::NoChannel(0)));
    }
}
