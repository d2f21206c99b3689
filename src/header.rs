// Freescale SEC (TALITOS) Descriptor Engine
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Descriptor header encoding.
//!
//! The first word of every SEC descriptor selects the descriptor type, the
//! primary and secondary execution units (EUs) and their mode bits:
//!
//! | Bits    | Field |
//! |---------|-------|
//! | [31:28] | primary EU select |
//! | [27:20] | primary EU mode |
//! | [19:16] | secondary EU select |
//! | [15:8]  | secondary EU mode |
//! | [7:3]   | descriptor type |
//! | [1]     | direction (inbound) |
//! | [0]     | done notify |

use bitflags::bitflags;

/// Header bits written back by the device once a descriptor is done.
pub const DESC_HDR_DONE: u32 = 0xff00_0000;

/// Integrity check result of the secondary EU, in the low header word.
pub const DESC_HDR_LO_ICCR1_MASK: u32 = 0x0018_0000;
/// ICV check passed.
pub const DESC_HDR_LO_ICCR1_PASS: u32 = 0x0008_0000;
/// ICV check failed.
pub const DESC_HDR_LO_ICCR1_FAIL: u32 = 0x0010_0000;

const SEL0_SHIFT: u32 = 28;
const SEL1_SHIFT: u32 = 16;
const TYPE_SHIFT: u32 = 3;

bitflags! {
    /// Mode and control bits of the descriptor header.
    ///
    /// Mode values are EU specific, so several constants share a bit
    /// position; SHA-1 and SHA-384 are the all-zero mode and have no
    /// constant.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HeaderFlags: u32 {
        /// Primary EU: encrypt (otherwise decrypt).
        const MODE0_ENCRYPT = 0x0010_0000;
        /// AESU: CBC mode.
        const MODE0_AESU_CBC = 0x0020_0000;
        /// DEU: CBC mode.
        const MODE0_DEU_CBC = 0x0040_0000;
        /// DEU: triple DES.
        const MODE0_DEU_3DES = 0x0020_0000;
        /// MDEU: continue a hash from a loaded context.
        const MODE0_MDEU_CONT = 0x0800_0000;
        /// MDEU: initialise the hash context.
        const MODE0_MDEU_INIT = 0x0100_0000;
        /// MDEU: HMAC.
        const MODE0_MDEU_HMAC = 0x0080_0000;
        /// MDEU: pad the final block.
        const MODE0_MDEU_PAD = 0x0040_0000;
        /// MDEU: SHA-224.
        const MODE0_MDEU_SHA224 = 0x0030_0000;
        /// MDEU: MD5.
        const MODE0_MDEU_MD5 = 0x0020_0000;
        /// MDEU: SHA-256.
        const MODE0_MDEU_SHA256 = 0x0010_0000;
        /// MDEU-B: SHA-512.
        const MODE0_MDEUB_SHA512 = 0x0020_0000;

        /// Secondary MDEU: compare the ICV in hardware.
        const MODE1_MDEU_CICV = 0x0000_4000;
        /// Secondary MDEU: initialise.
        const MODE1_MDEU_INIT = 0x0000_1000;
        /// Secondary MDEU: HMAC.
        const MODE1_MDEU_HMAC = 0x0000_0800;
        /// Secondary MDEU: pad.
        const MODE1_MDEU_PAD = 0x0000_0400;
        /// Secondary MDEU: SHA-224.
        const MODE1_MDEU_SHA224 = 0x0000_0300;
        /// Secondary MDEU: MD5.
        const MODE1_MDEU_MD5 = 0x0000_0200;
        /// Secondary MDEU: SHA-256.
        const MODE1_MDEU_SHA256 = 0x0000_0100;

        /// Inbound (decrypt/verify) direction.
        const DIR_INBOUND = 0x0000_0002;
        /// Raise a done interrupt for this descriptor.
        const DONE_NOTIFY = 0x0000_0001;
    }
}

/// SEC execution units, as encoded in the header select nibbles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExecUnit {
    /// ARC four.
    Afeu = 0x1,
    /// DES/3DES.
    Deu = 0x2,
    /// Message digest A (MD5, SHA-1, SHA-224, SHA-256).
    MdeuA = 0x3,
    /// Random number generator.
    Rng = 0x4,
    /// Public key.
    Pkeu = 0x5,
    /// AES.
    Aesu = 0x6,
    /// Kasumi.
    Keu = 0x7,
    /// CRC.
    Crcu = 0x8,
    /// Message digest B (SHA-384, SHA-512).
    MdeuB = 0xb,
}

impl ExecUnit {
    /// Returns the EU select value.
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decode an EU select nibble.
    pub const fn from_nibble(value: u8) -> Option<Self> {
        match value {
            0x1 => Some(Self::Afeu),
            0x2 => Some(Self::Deu),
            0x3 => Some(Self::MdeuA),
            0x4 => Some(Self::Rng),
            0x5 => Some(Self::Pkeu),
            0x6 => Some(Self::Aesu),
            0x7 => Some(Self::Keu),
            0x8 => Some(Self::Crcu),
            0xb => Some(Self::MdeuB),
            _ => None,
        }
    }

    /// Header bits selecting this EU as primary.
    #[inline]
    pub const fn sel0(self) -> u32 {
        (self as u32) << SEL0_SHIFT
    }

    /// Header bits selecting this EU as secondary.
    #[inline]
    pub const fn sel1(self) -> u32 {
        (self as u32) << SEL1_SHIFT
    }

    /// Returns a human-readable name for the EU.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Afeu => "AFEU",
            Self::Deu => "DEU",
            Self::MdeuA => "MDEUA",
            Self::Rng => "RNGU",
            Self::Pkeu => "PKEU",
            Self::Aesu => "AESU",
            Self::Keu => "KEU",
            Self::Crcu => "CRCU",
            Self::MdeuB => "MDEUB",
        }
    }
}

impl std::fmt::Display for ExecUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:#03x})", self.name(), self.as_u8())
    }
}

/// Descriptor types understood by the SEC channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DescType {
    /// AES counter mode, non-snooping.
    AesuCtrNonsnoop = 0,
    /// Single-pass IPsec ESP (cipher + HMAC).
    IpsecEsp = 1,
    /// Common non-snooping, no ARC4.
    CommonNonsnoopNoAfeu = 2,
    /// HMAC snooping, no ARC4.
    HmacSnoopNoAfeu = 4,
}

impl DescType {
    /// Header bits for this type.
    #[inline]
    pub const fn bits(self) -> u32 {
        (self as u32) << TYPE_SHIFT
    }
}

/// Assemble a header from its type, EU selections and mode bits.
pub const fn compose(
    desc_type: DescType,
    primary: ExecUnit,
    secondary: Option<ExecUnit>,
    flags: HeaderFlags,
) -> u32 {
    let sel1 = match secondary {
        Some(eu) => eu.sel1(),
        None => 0,
    };
    desc_type.bits() | primary.sel0() | sel1 | flags.bits()
}

/// Descriptor type field of a header.
#[inline]
pub const fn desc_type(hdr: u32) -> u8 {
    ((hdr >> TYPE_SHIFT) & 0x1f) as u8
}

/// Primary EU select nibble of a header.
#[inline]
pub const fn primary_eu(hdr: u32) -> u8 {
    ((hdr >> SEL0_SHIFT) & 0xf) as u8
}

/// Secondary EU select nibble of a header.
#[inline]
pub const fn secondary_eu(hdr: u32) -> u8 {
    ((hdr >> SEL1_SHIFT) & 0xf) as u8
}

/// Whether a device with the given capability masks can execute
/// descriptors built from `template`.
pub fn hw_supports(template: u32, exec_units: u32, desc_types: u32) -> bool {
    let mut ok = (1u32 << desc_type(template)) & desc_types != 0
        && (1u32 << primary_eu(template)) & exec_units != 0;

    let secondary = secondary_eu(template);
    if secondary != 0 {
        ok = ok && (1u32 << secondary) & exec_units != 0;
    }
    ok
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_unit_values() {
        assert_eq!(ExecUnit::Aesu.sel0(), 0x6000_0000);
        assert_eq!(ExecUnit::MdeuA.sel1(), 0x0003_0000);
        assert_eq!(ExecUnit::MdeuB.sel0(), 0xb000_0000);
        assert_eq!(ExecUnit::from_nibble(0xb), Some(ExecUnit::MdeuB));
        assert_eq!(ExecUnit::from_nibble(0x9), None);
    }

    #[test]
    fn test_exec_unit_display() {
        assert_eq!(format!("{}", ExecUnit::Aesu), "AESU (0x6)");
        assert_eq!(format!("{}", ExecUnit::Deu), "DEU (0x2)");
    }

    #[test]
    fn test_compose_and_decode() {
        let hdr = compose(
            DescType::IpsecEsp,
            ExecUnit::Aesu,
            Some(ExecUnit::MdeuA),
            HeaderFlags::MODE0_AESU_CBC | HeaderFlags::MODE1_MDEU_INIT,
        );
        assert_eq!(desc_type(hdr), 1);
        assert_eq!(primary_eu(hdr), 0x6);
        assert_eq!(secondary_eu(hdr), 0x3);
        assert_eq!(hdr & HeaderFlags::MODE1_MDEU_INIT.bits(), 0x1000);
    }

    #[test]
    fn test_hw_supports() {
        let hdr = compose(
            DescType::CommonNonsnoopNoAfeu,
            ExecUnit::Deu,
            None,
            HeaderFlags::MODE0_DEU_CBC,
        );
        let eus = 1 << ExecUnit::Deu.as_u8();
        let types = 1 << DescType::CommonNonsnoopNoAfeu as u8;
        assert!(hw_supports(hdr, eus, types));
        assert!(!hw_supports(hdr, 1 << ExecUnit::Aesu.as_u8(), types));
        assert!(!hw_supports(hdr, eus, 1 << DescType::IpsecEsp as u8));

        let esp = compose(
            DescType::IpsecEsp,
            ExecUnit::Deu,
            Some(ExecUnit::MdeuA),
            HeaderFlags::empty(),
        );
        let esp_types = 1 << DescType::IpsecEsp as u8;
        assert!(!hw_supports(esp, eus, esp_types));
        assert!(hw_supports(esp, eus | 1 << ExecUnit::MdeuA.as_u8(), esp_types));
    }
}
