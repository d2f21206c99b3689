// Freescale SEC (TALITOS) Descriptor Engine
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Register model of a SEC block.
//!
//! `SimSec` keeps a sparse register file plus one fetch FIFO per channel.
//! Writes to the control registers have the side effects the engine relies
//! on: self-clearing reset and continue bits, FIFO pushes through the
//! fetch FIFO pair and write-one-to-clear interrupt acknowledgement.
//! Descriptors only complete when the test says so, through
//! [`SimSec::complete`] or [`SimSec::inject_fault`].

use super::bus::SimBus;
use crate::affinity::{map_array_done, map_array_error};
use crate::bus::BusAddr;
use crate::config::MAX_CHANNELS;
use crate::descriptor::HwDesc;
use crate::header::{
    HeaderFlags, DESC_HDR_LO_ICCR1_FAIL, DESC_HDR_LO_ICCR1_PASS,
};
use crate::regs::{self, Cccr, RegisterIo};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Work done on a descriptor when the simulated device completes it.
pub type Processor = Box<dyn Fn(&SimBus, &HwDesc) + Send + Sync>;

#[derive(Debug, Default)]
struct ChannelModel {
    fifo: VecDeque<BusAddr>,
    ff_hi: u32,
    stuck_reset: bool,
    stuck_continue: bool,
}

#[derive(Debug, Default)]
struct DevState {
    regs: HashMap<u32, u32>,
    writes: HashMap<u32, usize>,
    channels: Vec<ChannelModel>,
    stuck_master: bool,
    icv_fail: bool,
}

impl DevState {
    fn get(&self, offset: u32) -> u32 {
        self.regs.get(&offset).copied().unwrap_or(0)
    }

    fn set(&mut self, offset: u32, value: u32) {
        self.regs.insert(offset, value);
    }

    fn or(&mut self, offset: u32, bits: u32) {
        *self.regs.entry(offset).or_insert(0) |= bits;
    }

    fn master_reset(&mut self) {
        self.regs.clear();
        for ch in &mut self.channels {
            ch.fifo.clear();
            ch.ff_hi = 0;
        }
    }

    fn write_channel(&mut self, ch: u8, offset: u32, value: u32) {
        let idx = ch as usize;
        if idx >= self.channels.len() {
            self.set(offset, value);
            return;
        }

        if offset == regs::cccr(ch) {
            let mut value = value;
            if value & Cccr::RESET.bits() != 0 {
                let model = &mut self.channels[idx];
                model.fifo.clear();
                model.ff_hi = 0;
                self.set(regs::cccr_lo(ch), 0);
                self.set(regs::ccpsr_lo(ch), 0);
                if !self.channels[idx].stuck_reset {
                    value &= !Cccr::RESET.bits();
                }
            }
            if value & Cccr::CONT.bits() != 0 {
                // Skip the faulted descriptor.
                if self.get(regs::ccpsr_lo(ch)) != 0 {
                    self.channels[idx].fifo.pop_front();
                }
                self.set(regs::ccpsr_lo(ch), 0);
                if !self.channels[idx].stuck_continue {
                    value &= !Cccr::CONT.bits();
                }
            }
            self.set(offset, value);
        } else if offset == regs::ff(ch) {
            self.channels[idx].ff_hi = value;
        } else if offset == regs::ff_lo(ch) {
            let model = &mut self.channels[idx];
            model.fifo.push_back(BusAddr::from_parts(model.ff_hi, value));
        } else {
            self.set(offset, value);
        }
    }

    fn read_channel(&self, ch: u8, offset: u32) -> u32 {
        let current = self
            .channels
            .get(ch as usize)
            .and_then(|m| m.fifo.front().copied())
            .unwrap_or(BusAddr::NULL);
        if offset == regs::cdpr(ch) {
            current.hi()
        } else if offset == regs::cdpr_lo(ch) {
            current.lo()
        } else {
            self.get(offset)
        }
    }
}

/// Simulated SEC block.
pub struct SimSec {
    bus: Arc<SimBus>,
    state: Mutex<DevState>,
    processor: Mutex<Option<Processor>>,
}

impl SimSec {
    /// Device with `num_channels` channels whose descriptors live on `bus`.
    pub fn new(bus: Arc<SimBus>, num_channels: u32) -> Self {
        let n = (num_channels as usize).min(MAX_CHANNELS as usize);
        let state = DevState {
            channels: (0..n).map(|_| ChannelModel::default()).collect(),
            ..Default::default()
        };
        Self {
            bus,
            state: Mutex::new(state),
            processor: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DevState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn bus(&self) -> &Arc<SimBus> {
        &self.bus
    }

    /// Install the work run on each descriptor as it completes.
    pub fn set_processor(&self, processor: Processor) {
        *self
            .processor
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(processor);
    }

    /// Make hardware ICV checks fail (or pass again).
    pub fn set_icv_fail(&self, fail: bool) {
        self.lock().icv_fail = fail;
    }

    /// Keep the reset bit of channel `ch` from clearing.
    pub fn set_stuck_reset(&self, ch: u8, stuck: bool) {
        if let Some(m) = self.lock().channels.get_mut(ch as usize) {
            m.stuck_reset = stuck;
        }
    }

    /// Keep the continue bit of channel `ch` from clearing.
    pub fn set_stuck_continue(&self, ch: u8, stuck: bool) {
        if let Some(m) = self.lock().channels.get_mut(ch as usize) {
            m.stuck_continue = stuck;
        }
    }

    /// Keep the master software reset bit from clearing.
    pub fn set_stuck_master(&self, stuck: bool) {
        self.lock().stuck_master = stuck;
    }

    /// Descriptors fetched by channel `ch` and not yet processed.
    pub fn pending(&self, ch: u8) -> Vec<BusAddr> {
        self.lock()
            .channels
            .get(ch as usize)
            .map(|m| m.fifo.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Current value of a register, without read side effects.
    pub fn reg(&self, offset: u32) -> u32 {
        self.lock().get(offset)
    }

    /// Number of writes seen at `offset`.
    pub fn writes_to(&self, offset: u32) -> usize {
        self.lock().writes.get(&offset).copied().unwrap_or(0)
    }

    /// Complete up to `n` descriptors at the front of channel `ch`'s FIFO.
    ///
    /// Each descriptor is run through the processor, if any, gets its done
    /// header written back and raises the channel's done interrupt.
    /// Returns the number completed.
    pub fn complete(&self, ch: u8, n: usize) -> usize {
        let (batch, icv_fail) = {
            let mut st = self.lock();
            let icv_fail = st.icv_fail;
            let Some(model) = st.channels.get_mut(ch as usize) else {
                return 0;
            };
            let take = n.min(model.fifo.len());
            (model.fifo.drain(..take).collect::<Vec<_>>(), icv_fail)
        };

        let processor = self
            .processor
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut done = 0;
        for addr in batch {
            let Some(desc) = self.bus.descriptor(addr) else {
                log::warn!("sim: channel {ch} fetched unmapped descriptor {addr}");
                continue;
            };
            if let Some(process) = processor.as_ref() {
                process(&self.bus, &desc);
            }
            let hdr_lo = if desc.hdr & HeaderFlags::MODE1_MDEU_CICV.bits() != 0 {
                if icv_fail {
                    DESC_HDR_LO_ICCR1_FAIL
                } else {
                    DESC_HDR_LO_ICCR1_PASS
                }
            } else {
                0
            };
            if self.bus.complete_desc(addr, hdr_lo).is_ok() {
                done += 1;
            }
        }
        drop(processor);

        if done > 0 {
            self.lock().or(regs::ISR, map_array_done(ch));
        }
        done
    }

    /// Complete everything fetched by channel `ch`.
    pub fn complete_all(&self, ch: u8) -> usize {
        self.complete(ch, usize::MAX)
    }

    /// Stop channel `ch` on its current descriptor with the given pointer
    /// status bits and raise its error interrupt.
    pub fn inject_fault(&self, ch: u8, ccpsr_lo: u32) {
        let mut st = self.lock();
        st.or(regs::ccpsr_lo(ch), ccpsr_lo);
        st.or(regs::ISR, map_array_error(ch));
    }

    /// Raise device-level interrupt status bits.
    pub fn raise_device_error(&self, isr: u32, isr_lo: u32) {
        let mut st = self.lock();
        st.or(regs::ISR, isr);
        st.or(regs::ISR_LO, isr_lo);
    }
}

impl RegisterIo for SimSec {
    fn read32(&self, offset: u32) -> u32 {
        let st = self.lock();
        match regs::channel_of(offset) {
            Some(ch) => st.read_channel(ch, offset),
            None => st.get(offset),
        }
    }

    fn write32(&self, offset: u32, value: u32) {
        let mut st = self.lock();
        *st.writes.entry(offset).or_insert(0) += 1;

        match offset {
            regs::ICR => {
                let isr = st.get(regs::ISR);
                st.set(regs::ISR, isr & !value);
            }
            regs::ICR_LO => {
                let isr = st.get(regs::ISR_LO);
                st.set(regs::ISR_LO, isr & !value);
            }
            regs::MCR => {
                let mut value = value;
                if value & regs::MCR_SWR != 0 {
                    st.master_reset();
                    if !st.stuck_master {
                        value &= !regs::MCR_SWR;
                    }
                }
                st.set(regs::MCR, value);
            }
            _ => match regs::channel_of(offset) {
                Some(ch) => st.write_channel(ch, offset, value),
                None => st.set(offset, value),
            },
        }
    }
}

impl std::fmt::Debug for SimSec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimSec")
            .field("state", &*self.lock())
            .finish_non_exhaustive()
    }
}
