// Freescale SEC (TALITOS) Descriptor Engine
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! SEC register map.
//!
//! Offsets are relative to the start of the SEC register block. Channel
//! registers repeat with a stride of [`CH_STRIDE`].

use crate::header::ExecUnit;
use bitflags::bitflags;
use std::sync::Arc;

/// Interrupt mask register.
pub const IMR: u32 = 0x1008;
pub const IMR_LO: u32 = 0x100c;
/// Enable channel done and error interrupts.
pub const IMR_INIT: u32 = 0x0001_00ff;
/// Enable RNGU error interrupts.
pub const IMR_LO_INIT: u32 = 0x0002_0000;

/// Interrupt status register.
pub const ISR: u32 = 0x1010;
pub const ISR_LO: u32 = 0x1014;

/// Interrupt clear register.
pub const ICR: u32 = 0x1018;
pub const ICR_LO: u32 = 0x101c;

/// Master control register.
pub const MCR: u32 = 0x1030;
pub const MCR_LO: u32 = 0x1034;
/// Software reset.
pub const MCR_SWR: u32 = 0x1;
/// Channel remap field position.
pub const MCR_REMAP_SHIFT: u32 = 12;

/// Interrupt status bits that belong to no channel (done overflow,
/// internal time out, ...).
pub const ISR_DEVICE_MASK: u32 = 0xffff_ff00;

const CH_BASE: u32 = 0x1100;
/// Distance between consecutive channel register blocks.
pub const CH_STRIDE: u32 = 0x100;

#[inline]
const fn ch_reg(ch: u8, offset: u32) -> u32 {
    CH_BASE + ch as u32 * CH_STRIDE + offset
}

/// Channel configuration register.
pub const fn cccr(ch: u8) -> u32 {
    ch_reg(ch, 0x08)
}

pub const fn cccr_lo(ch: u8) -> u32 {
    ch_reg(ch, 0x0c)
}

/// Channel pointer status register.
pub const fn ccpsr(ch: u8) -> u32 {
    ch_reg(ch, 0x10)
}

pub const fn ccpsr_lo(ch: u8) -> u32 {
    ch_reg(ch, 0x14)
}

/// Current descriptor pointer register.
pub const fn cdpr(ch: u8) -> u32 {
    ch_reg(ch, 0x40)
}

pub const fn cdpr_lo(ch: u8) -> u32 {
    ch_reg(ch, 0x44)
}

/// Fetch FIFO: writing the low word pushes a descriptor.
pub const fn ff(ch: u8) -> u32 {
    ch_reg(ch, 0x48)
}

pub const fn ff_lo(ch: u8) -> u32 {
    ch_reg(ch, 0x4c)
}

/// Descriptor buffer: eight 64-bit words of the descriptor being processed.
pub const fn descbuf(ch: u8) -> u32 {
    ch_reg(ch, 0x80)
}

pub const fn descbuf_lo(ch: u8) -> u32 {
    ch_reg(ch, 0x84)
}

/// Channel index decoded from a channel register offset.
pub const fn channel_of(offset: u32) -> Option<u8> {
    if offset >= CH_BASE && offset < CH_BASE + 4 * CH_STRIDE {
        Some(((offset - CH_BASE) / CH_STRIDE) as u8)
    } else {
        None
    }
}

bitflags! {
    /// Channel configuration register, high word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Cccr: u32 {
        /// Continue after a single-descriptor error.
        const CONT = 0x2;
        /// Channel reset.
        const RESET = 0x1;
    }
}

bitflags! {
    /// Channel configuration register, low word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CccrLo: u32 {
        /// ICCR writeback enable.
        const IWSE = 0x80;
        /// Extended (36-bit) address enable.
        const EAE = 0x20;
        /// Channel done writeback enable.
        const CDWE = 0x10;
        /// Notification type.
        const NT = 0x4;
        /// Channel done interrupt enable.
        const CDIE = 0x2;
    }
}

/// Per-EU interrupt status registers.
pub const AFEUISR: u32 = 0x8010;
pub const DEUISR: u32 = 0x2010;
pub const MDEUISR: u32 = 0x6010;
pub const AESUISR: u32 = 0x4010;
pub const RNGUISR: u32 = 0xa010;
pub const PKEUISR: u32 = 0xc010;
pub const KEUISR: u32 = 0xe010;
pub const CRCUISR: u32 = 0xf010;

/// Interrupt status register of an execution unit.
pub const fn eu_isr(eu: ExecUnit) -> u32 {
    match eu {
        ExecUnit::Afeu => AFEUISR,
        ExecUnit::Deu => DEUISR,
        ExecUnit::MdeuA | ExecUnit::MdeuB => MDEUISR,
        ExecUnit::Rng => RNGUISR,
        ExecUnit::Pkeu => PKEUISR,
        ExecUnit::Aesu => AESUISR,
        ExecUnit::Keu => KEUISR,
        ExecUnit::Crcu => CRCUISR,
    }
}

/// MDEU interrupt control, low word.
pub const MDEUICR_LO: u32 = 0x603c;
/// Integrity check error interrupt.
pub const MDEUICR_LO_ICE: u32 = 0x4000;

/// Low word of a 64-bit EU status register.
#[inline]
pub const fn lo(reg: u32) -> u32 {
    reg + 4
}

/// Register-level access to a SEC block.
///
/// All SEC registers are 32 bits wide and big-endian on the bus;
/// implementations return and accept CPU-order values.
pub trait RegisterIo: Send + Sync {
    fn read32(&self, offset: u32) -> u32;

    fn write32(&self, offset: u32, value: u32);

    /// Read-modify-write: set `bits`.
    fn set_bits32(&self, offset: u32, bits: u32) {
        let v = self.read32(offset);
        self.write32(offset, v | bits);
    }

    /// Read-modify-write: clear `bits`.
    fn clr_bits32(&self, offset: u32, bits: u32) {
        let v = self.read32(offset);
        self.write32(offset, v & !bits);
    }
}

impl<T: RegisterIo + ?Sized> RegisterIo for Arc<T> {
    fn read32(&self, offset: u32) -> u32 {
        (**self).read32(offset)
    }

    fn write32(&self, offset: u32, value: u32) {
        (**self).write32(offset, value)
    }

    fn set_bits32(&self, offset: u32, bits: u32) {
        (**self).set_bits32(offset, bits)
    }

    fn clr_bits32(&self, offset: u32, bits: u32) {
        (**self).clr_bits32(offset, bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_offsets() {
        assert_eq!(cccr(0), 0x1108);
        assert_eq!(cccr_lo(1), 0x120c);
        assert_eq!(ccpsr_lo(2), 0x1314);
        assert_eq!(ff(3), 0x1448);
        assert_eq!(ff_lo(3), 0x144c);
        assert_eq!(cdpr_lo(0), 0x1144);
        assert_eq!(descbuf(1), 0x1280);
    }

    #[test]
    fn test_eu_isr() {
        assert_eq!(eu_isr(ExecUnit::MdeuB), MDEUISR);
        assert_eq!(eu_isr(ExecUnit::Aesu), 0x4010);
        assert_eq!(lo(eu_isr(ExecUnit::Deu)), 0x2014);
    }

    #[test]
    fn test_channel_of() {
        assert_eq!(channel_of(ff_lo(2)), Some(2));
        assert_eq!(channel_of(cccr(0)), Some(0));
        assert_eq!(channel_of(MCR), None);
        assert_eq!(channel_of(ISR), None);
    }
}
