// Freescale SEC (TALITOS) Descriptor Engine
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Channel fault classification and bounded register polling.
//!
//! [`classify`] turns the low word of a channel's pointer status register
//! into a [`Diagnosis`]: the faults found, the status to fail the affected
//! request with, and what the engine must do to bring the channel back.

use crate::error::RequestError;
use crate::regs::RegisterIo;
use bitflags::bitflags;
use std::time::{Duration, Instant};

bitflags! {
    /// Fault bits of the channel pointer status register, low word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ChannelFaults: u32 {
        /// Double fetch FIFO overflow.
        const DOF = 0x8000;
        /// Single fetch FIFO overflow.
        const SOF = 0x4000;
        /// Master data transfer error.
        const MDTE = 0x2000;
        /// S/G data length zero.
        const SGDLZ = 0x1000;
        /// Fetch pointer zero.
        const FPZ = 0x0800;
        /// Illegal descriptor header.
        const IDH = 0x0400;
        /// Invalid execution unit.
        const IEU = 0x0200;
        /// Execution unit error.
        const EU = 0x0100;
        /// Gather boundary error.
        const GB = 0x0080;
        /// Gather return/length error.
        const GRL = 0x0040;
        /// Scatter boundary error.
        const SB = 0x0020;
        /// Scatter return/length error.
        const SRL = 0x0010;
    }
}

impl ChannelFaults {
    /// Log message for a single fault bit.
    pub fn describe(self) -> &'static str {
        match self {
            f if f == Self::DOF => "double fetch fifo overflow error",
            f if f == Self::SOF => "single fetch fifo overflow error",
            f if f == Self::MDTE => "master data transfer error",
            f if f == Self::SGDLZ => "s/g data length zero error",
            f if f == Self::FPZ => "fetch pointer zero error",
            f if f == Self::IDH => "illegal descriptor header error",
            f if f == Self::IEU => "invalid execution unit error",
            f if f == Self::EU => "execution unit error",
            f if f == Self::GB => "gather boundary error",
            f if f == Self::GRL => "gather return/length error",
            f if f == Self::SB => "scatter boundary error",
            f if f == Self::SRL => "scatter return/length error",
            _ => "unknown channel error",
        }
    }
}

/// What the engine does to recover a faulted channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// The descriptor was dropped; continue in place. The failed request
    /// may be resubmitted.
    Retry,
    /// Skip the failed descriptor and continue in place.
    ContinueInPlace,
    /// Reset the channel; every request on it fails.
    ResetChannel,
    /// Reset the whole device; every request on every channel fails.
    ResetDevice,
}

impl RecoveryAction {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Retry => "RETRY",
            Self::ContinueInPlace => "CONTINUE",
            Self::ResetChannel => "RESET_CHANNEL",
            Self::ResetDevice => "RESET_DEVICE",
        }
    }

    /// Whether the ring is drained completely rather than up to the first
    /// failed request.
    #[inline]
    pub const fn drains_all(self) -> bool {
        matches!(self, Self::ResetChannel | Self::ResetDevice)
    }
}

impl std::fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Classified channel fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Diagnosis {
    pub faults: ChannelFaults,
    /// Status the failed request completes with.
    pub error: RequestError,
    pub action: RecoveryAction,
}

impl Diagnosis {
    /// Returns true if an execution unit reported the fault and its status
    /// registers are worth dumping.
    #[inline]
    pub fn eu_fault(&self) -> bool {
        self.faults.contains(ChannelFaults::EU)
    }
}

/// Classify a channel pointer status word (low half).
///
/// A double fetch overflow is retryable and needs a channel reset; a
/// single fetch overflow is retryable in place. Everything else fails the
/// request as invalid and continues in place.
pub fn classify(ccpsr_lo: u32) -> Diagnosis {
    let faults = ChannelFaults::from_bits_truncate(ccpsr_lo);

    let (error, action) = if faults.contains(ChannelFaults::DOF) {
        (RequestError::Again, RecoveryAction::ResetChannel)
    } else if faults.contains(ChannelFaults::SOF) {
        (RequestError::Again, RecoveryAction::Retry)
    } else {
        (RequestError::Invalid, RecoveryAction::ContinueInPlace)
    };

    Diagnosis {
        faults,
        error,
        action,
    }
}

/// Whether an interrupt status indicates a device-level problem: any bit
/// outside the channels of the interrupted group, or any low-word bit.
///
/// The test is made once per interrupt against the whole group's mask, not
/// per handled channel, so an error bit of a sibling channel in the same
/// group is not a device fault.
#[inline]
pub const fn device_fault(isr: u32, isr_lo: u32, group_isr_mask: u32) -> bool {
    isr & !group_isr_mask != 0 || isr_lo != 0
}

/// Poll `offset` until every bit of `bits` reads zero or `timeout` expires.
///
/// Returns true if the bits cleared.
pub fn wait_for_clear(
    regs: &dyn RegisterIo,
    offset: u32,
    bits: u32,
    timeout: Duration,
) -> bool {
    let deadline = Instant::now() + timeout;
    let mut spins = 0u32;
    loop {
        if regs.read32(offset) & bits == 0 {
            return true;
        }
        if Instant::now() >= deadline {
            return regs.read32(offset) & bits == 0;
        }
        spins = spins.wrapping_add(1);
        if spins % 64 == 0 {
            std::thread::yield_now();
        } else {
            std::hint::spin_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affinity::{map_array, map_array_done, map_array_error};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_classify_dof() {
        let d = classify(0x8000);
        assert_eq!(d.error, RequestError::Again);
        assert_eq!(d.action, RecoveryAction::ResetChannel);
        assert!(d.action.drains_all());
    }

    #[test]
    fn test_classify_dof_wins() {
        let d = classify(0x8000 | 0x4000 | 0x0400);
        assert_eq!(d.action, RecoveryAction::ResetChannel);
        assert!(d.faults.contains(ChannelFaults::IDH));
    }

    #[test]
    fn test_classify_sof() {
        let d = classify(0x4000);
        assert_eq!(d.error, RequestError::Again);
        assert_eq!(d.action, RecoveryAction::Retry);
        assert!(!d.action.drains_all());
    }

    #[test]
    fn test_classify_data_faults() {
        for bits in [0x2000, 0x1000, 0x0800, 0x0400, 0x0200, 0x0080, 0x0040, 0x0020, 0x0010] {
            let d = classify(bits);
            assert_eq!(d.error, RequestError::Invalid, "{bits:#x}");
            assert_eq!(d.action, RecoveryAction::ContinueInPlace, "{bits:#x}");
        }
        let eu = classify(0x0100);
        assert!(eu.eu_fault());
    }

    #[test]
    fn test_classify_unknown_bits() {
        let d = classify(0x1);
        assert!(d.faults.is_empty());
        assert_eq!(d.error, RequestError::Invalid);
    }

    #[test]
    fn test_describe() {
        assert_eq!(ChannelFaults::DOF.describe(), "double fetch fifo overflow error");
        assert_eq!(ChannelFaults::SRL.describe(), "scatter return/length error");
        assert_eq!(
            (ChannelFaults::SB | ChannelFaults::GB).describe(),
            "unknown channel error"
        );
    }

    #[test]
    fn test_device_fault() {
        assert!(!device_fault(0x01, 0, 0x0f));
        assert!(device_fault(0x10, 0, 0x0f));
        assert!(device_fault(0x01, 0x2, 0x0f));
    }

    #[test]
    fn test_device_fault_uses_group_mask() {
        // Channels 0 and 1 form the group: an error on channel 1 while
        // channel 0 is handled is not a device fault.
        let group = map_array(0) | map_array(1);
        assert!(!device_fault(map_array_error(1), 0, group));
        assert!(!device_fault(map_array_error(0) | map_array_done(1), 0, group));
        assert!(device_fault(map_array_error(2), 0, group));
    }

    struct Reg(AtomicU32);

    impl RegisterIo for Reg {
        fn read32(&self, _offset: u32) -> u32 {
            // clears itself after a few reads
            let v = self.0.load(Ordering::Relaxed);
            self.0.store(v.saturating_sub(1), Ordering::Relaxed);
            v
        }

        fn write32(&self, _offset: u32, value: u32) {
            self.0.store(value, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_wait_for_clear() {
        let reg = Reg(AtomicU32::new(3));
        assert!(wait_for_clear(&reg, 0, 0xff, Duration::from_millis(100)));

        let stuck = Reg(AtomicU32::new(u32::MAX));
        assert!(!wait_for_clear(&stuck, 0, 0x8000_0000, Duration::from_millis(5)));
    }
}
