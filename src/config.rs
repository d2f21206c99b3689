// Freescale SEC (TALITOS) Descriptor Engine
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Device geometry, capabilities and engine tunables.
//!
//! A [`SecConfig`] carries what a device tree node would describe (channel
//! count, FIFO depth, capability masks, channel remap) together with the
//! engine's own knobs. [`SecConfig::validate`] must pass before an engine
//! can be probed.

use crate::error::{SecError, SecResult};
use bitflags::bitflags;
use std::time::Duration;

/// Maximum number of channels on any SEC.
pub const MAX_CHANNELS: u32 = 4;

/// Maximum number of affinity groups.
pub const MAX_GROUPS: usize = 2;

bitflags! {
    /// Hardware quirks and capabilities that change request construction.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Features: u32 {
        /// Link table length of the cipher input includes the extent.
        const SRC_LINK_TBL_LEN_INCLUDES_EXTENT = 0x1;
        /// The MDEU can compare ICVs in hardware.
        const HW_AUTH_CHECK = 0x2;
        /// The MDEU can initialise a SHA-224 context itself.
        const SHA224_HWINIT = 0x4;
    }
}

/// How the device is shared between hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MultiHostMode {
    /// This host owns the device and initialises it.
    #[default]
    Primary,
    /// Another host owns the device; this host only uses its channels.
    Secondary,
    /// Each of two execution contexts drives its own channel group.
    Dual,
}

impl MultiHostMode {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
            Self::Dual => "dual",
        }
    }
}

impl std::fmt::Display for MultiHostMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecConfig {
    /// Number of channels; a power of two up to [`MAX_CHANNELS`].
    pub num_channels: u32,
    /// Descriptors each channel's fetch FIFO accepts.
    pub fifo_depth: u32,
    /// Bit `n` set: EU with select value `n` is present.
    pub exec_units: u32,
    /// Bit `n` set: descriptor type `n` is supported.
    pub desc_types: u32,
    /// Channel remap bits; bit `i` moves channel `num_channels - 1 - i`
    /// to the second group.
    pub channel_remap: u32,
    /// Explicit per-group channel lists, overriding `channel_remap`.
    pub group_channels: Option<Vec<Vec<u8>>>,
    pub mode: MultiHostMode,
    pub features: Features,
    /// Number of execution contexts that may submit requests.
    pub num_contexts: usize,
    /// Completion budget per poll.
    pub napi_weight: usize,
    /// Deadline for self-clearing reset and continue bits.
    pub reset_timeout: Duration,
    /// Descriptors kept per execution context for reuse.
    pub recycle_depth: usize,
}

impl Default for SecConfig {
    fn default() -> Self {
        Self::sec3()
    }
}

impl SecConfig {
    /// SEC 2.x geometry.
    pub fn sec2() -> Self {
        Self {
            num_channels: 4,
            fifo_depth: 24,
            exec_units: 0xfe,
            desc_types: 0x012b_0ebf,
            channel_remap: 0,
            group_channels: None,
            mode: MultiHostMode::Primary,
            features: Features::HW_AUTH_CHECK | Features::SHA224_HWINIT,
            num_contexts: 2,
            napi_weight: 64,
            reset_timeout: Duration::from_millis(100),
            recycle_depth: 32,
        }
    }

    /// SEC 3.x geometry.
    pub fn sec3() -> Self {
        Self {
            exec_units: 0x97c,
            desc_types: 0x03a3_0abf,
            features: Features::all(),
            ..Self::sec2()
        }
    }

    pub fn with_channels(mut self, num_channels: u32) -> Self {
        self.num_channels = num_channels;
        self
    }

    pub fn with_fifo_depth(mut self, depth: u32) -> Self {
        self.fifo_depth = depth;
        self
    }

    pub fn with_remap(mut self, remap: u32) -> Self {
        self.channel_remap = remap;
        self
    }

    pub fn with_groups(mut self, groups: Vec<Vec<u8>>) -> Self {
        self.group_channels = Some(groups);
        self
    }

    pub fn with_mode(mut self, mode: MultiHostMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_contexts(mut self, n: usize) -> Self {
        self.num_contexts = n;
        self
    }

    pub fn with_features(mut self, features: Features) -> Self {
        self.features = features;
        self
    }

    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Slots in each channel's request ring.
    #[inline]
    pub fn fifo_len(&self) -> usize {
        (self.fifo_depth as usize).next_power_of_two()
    }

    /// Mode actually used. Dual mode needs two execution contexts and
    /// falls back to primary with fewer.
    pub fn effective_mode(&self) -> MultiHostMode {
        match self.mode {
            MultiHostMode::Dual if self.num_contexts < 2 => MultiHostMode::Primary,
            m => m,
        }
    }

    #[inline]
    pub fn has(&self, feature: Features) -> bool {
        self.features.contains(feature)
    }

    /// Check the configuration for values the engine cannot work with.
    pub fn validate(&self) -> SecResult<()> {
        if self.num_channels == 0
            || !self.num_channels.is_power_of_two()
            || self.num_channels > MAX_CHANNELS
        {
            return Err(SecError::InvalidConfig(format!(
                "channel count {} is not a power of two up to {MAX_CHANNELS}",
                self.num_channels
            )));
        }
        if self.fifo_depth == 0 {
            return Err(SecError::InvalidConfig("fifo depth is zero".into()));
        }
        if self.exec_units == 0 || self.desc_types == 0 {
            return Err(SecError::InvalidConfig(
                "execution unit and descriptor type masks must be non-zero".into(),
            ));
        }
        if self.num_contexts == 0 {
            return Err(SecError::InvalidConfig("no execution contexts".into()));
        }
        if self.mode == MultiHostMode::Dual && self.num_contexts > MAX_GROUPS {
            return Err(SecError::InvalidConfig(format!(
                "dual mode supports at most {MAX_GROUPS} execution contexts, got {}",
                self.num_contexts
            )));
        }
        if self.napi_weight == 0 {
            return Err(SecError::InvalidConfig("poll weight is zero".into()));
        }
        if let Some(groups) = &self.group_channels {
            if groups.is_empty() || groups.len() > MAX_GROUPS {
                return Err(SecError::InvalidConfig(format!(
                    "expected 1..={MAX_GROUPS} channel groups, got {}",
                    groups.len()
                )));
            }
        }
        Ok(())
    }
}
