// Freescale SEC (TALITOS) Descriptor Engine
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Channel-to-group affinity.
//!
//! Channels are split into at most two groups. Each group has its own
//! round-robin cursor, poll context and slice of the interrupt status
//! register: channel `ch` owns the done bit `1 << 2ch` and the error bit
//! `2 << 2ch`. The table is built once at probe and never changes.

use crate::config::{MultiHostMode, SecConfig, MAX_GROUPS};
use crate::error::{SecError, SecResult};

/// Identifier of an execution context (a CPU, worker thread or task slot).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecCtx(pub u32);

impl ExecCtx {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for ExecCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx{}", self.0)
    }
}

/// Affinity group index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub u8);

impl GroupId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Both interrupt bits of channel `ch`.
#[inline]
pub const fn map_array(ch: u8) -> u32 {
    3 << (2 * ch as u32)
}

/// Done interrupt bit of channel `ch`.
#[inline]
pub const fn map_array_done(ch: u8) -> u32 {
    1 << (2 * ch as u32)
}

/// Error interrupt bit of channel `ch`.
#[inline]
pub const fn map_array_error(ch: u8) -> u32 {
    2 << (2 * ch as u32)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Group {
    channels: Vec<u8>,
    isr_mask: u32,
    done_mask: u32,
}

impl Group {
    fn push(&mut self, ch: u8) {
        self.channels.push(ch);
        self.isr_mask |= map_array(ch);
        self.done_mask |= map_array_done(ch);
    }
}

/// Static assignment of channels to groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffinityTable {
    groups: [Group; MAX_GROUPS],
    mode: MultiHostMode,
}

impl AffinityTable {
    /// Build the table from a remap word: bit `i` set moves channel
    /// `num_channels - 1 - i` to group 1.
    pub fn from_remap(num_channels: u32, remap: u32, mode: MultiHostMode) -> Self {
        let mut groups: [Group; MAX_GROUPS] = Default::default();
        for ch in 0..num_channels as u8 {
            let bit = num_channels - 1 - ch as u32;
            let group = if remap & (1 << bit) != 0 { 1 } else { 0 };
            groups[group].push(ch);
        }
        Self { groups, mode }
    }

    /// Build the table from explicit per-group channel lists.
    pub fn from_groups(
        num_channels: u32,
        lists: &[Vec<u8>],
        mode: MultiHostMode,
    ) -> SecResult<Self> {
        if lists.len() > MAX_GROUPS {
            return Err(SecError::InvalidConfig(format!(
                "{} channel groups, at most {MAX_GROUPS} supported",
                lists.len()
            )));
        }
        let mut groups: [Group; MAX_GROUPS] = Default::default();
        let mut seen = 0u32;
        for (group, list) in groups.iter_mut().zip(lists) {
            for &ch in list {
                if ch as u32 >= num_channels {
                    return Err(SecError::InvalidConfig(format!(
                        "channel {ch} out of range (device has {num_channels})"
                    )));
                }
                if seen & (1 << ch) != 0 {
                    return Err(SecError::InvalidConfig(format!(
                        "channel {ch} assigned to more than one group"
                    )));
                }
                seen |= 1 << ch;
                group.push(ch);
            }
        }
        Ok(Self { groups, mode })
    }

    /// Build the table a configuration describes.
    pub fn from_config(config: &SecConfig) -> SecResult<Self> {
        let mode = config.effective_mode();
        match &config.group_channels {
            Some(lists) => Self::from_groups(config.num_channels, lists, mode),
            None => Ok(Self::from_remap(
                config.num_channels,
                config.channel_remap,
                mode,
            )),
        }
    }

    /// Group an execution context submits to and polls for.
    pub fn group_of(&self, ctx: ExecCtx) -> GroupId {
        match self.mode {
            MultiHostMode::Primary => GroupId(0),
            MultiHostMode::Secondary => GroupId(1),
            MultiHostMode::Dual => GroupId((ctx.0 as usize).min(MAX_GROUPS - 1) as u8),
        }
    }

    /// Group that owns channel `ch`, if any.
    pub fn group_of_channel(&self, ch: u8) -> Option<GroupId> {
        self.groups
            .iter()
            .position(|g| g.channels.contains(&ch))
            .map(|i| GroupId(i as u8))
    }

    /// Channels of `group`, in round-robin order.
    pub fn channels(&self, group: GroupId) -> &[u8] {
        self.groups
            .get(group.index())
            .map(|g| g.channels.as_slice())
            .unwrap_or(&[])
    }

    /// Done and error bits of every channel in `group`.
    pub fn isr_mask(&self, group: GroupId) -> u32 {
        self.groups.get(group.index()).map_or(0, |g| g.isr_mask)
    }

    /// Done bits of every channel in `group`.
    pub fn done_mask(&self, group: GroupId) -> u32 {
        self.groups.get(group.index()).map_or(0, |g| g.done_mask)
    }

    /// Iterate over non-empty groups.
    pub fn groups(&self) -> impl Iterator<Item = GroupId> + '_ {
        self.groups
            .iter()
            .enumerate()
            .filter(|(_, g)| !g.channels.is_empty())
            .map(|(i, _)| GroupId(i as u8))
    }

    #[inline]
    pub fn mode(&self) -> MultiHostMode {
        self.mode
    }
}
