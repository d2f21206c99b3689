// Freescale SEC (TALITOS) Descriptor Engine
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Interrupt dispatch.
//!
//! The handler only touches registers: it acknowledges the status bits of
//! the interrupted group, masks further done interrupts and leaves draining
//! to the scheduled completion poll. Error interrupts run recovery inline.

use crate::affinity::ExecCtx;
use crate::bus::DmaMapper;
use crate::engine::SecEngine;
use crate::regs::{self, RegisterIo};

/// Result of an interrupt handler, for shared interrupt lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    /// No status bits were set: not ours.
    None,
    /// The interrupt was serviced.
    Handled,
}

impl IrqReturn {
    #[inline]
    pub fn is_handled(self) -> bool {
        self == Self::Handled
    }
}

impl<R: RegisterIo, M: DmaMapper> SecEngine<R, M> {
    /// Service an interrupt on the line of `ctx`'s group.
    pub fn handle_interrupt(&self, ctx: ExecCtx) -> IrqReturn {
        let group = self.affinity.group_of(ctx);
        let done_mask = self.affinity.done_mask(group);

        let owned = regs::ISR_DEVICE_MASK | self.affinity.isr_mask(group);
        let isr = self.regs.read32(regs::ISR) & owned;
        let isr_lo = self.regs.read32(regs::ISR_LO);

        // Acknowledge
        self.regs.write32(regs::ICR, isr);
        self.regs.write32(regs::ICR_LO, isr_lo);

        if isr == 0 && isr_lo == 0 {
            return IrqReturn::None;
        }

        if isr & !done_mask != 0 || isr_lo != 0 {
            self.regs.clr_bits32(regs::IMR, done_mask);
            log::debug!("{ctx}: error interrupt ISR {isr:#010x}_{isr_lo:#010x}");
            let report = self.handle_error(ctx, isr, isr_lo);
            if report.device_reset {
                log::warn!("{ctx}: device was reset");
            }
            // Pick up whatever completed around the error.
            self.schedule_poll(group);
        } else if isr & done_mask != 0 {
            self.regs.clr_bits32(regs::IMR, done_mask);
            self.schedule_poll(group);
        }

        IrqReturn::Handled
    }
}
