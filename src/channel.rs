// Freescale SEC (TALITOS) Descriptor Engine
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Per-channel ring of in-flight requests.
//!
//! Each SEC channel has a fetch FIFO of `depth` descriptors. The ring
//! mirrors it in software: `capacity` slots (depth rounded up to a power of
//! two), a head where submissions go and a tail where completions are
//! drained. Admission is controlled by a credit counter that starts at
//! `-depth`; a submission takes one credit by incrementing it and is
//! refused when it reads zero, a drained slot returns one.
//!
//! # Concurrency
//!
//! Producers serialise on the head lock; the drain path serialises on the
//! tail lock. The two sides share no lock: a slot is handed over through
//! its `occupied` flag, stored with release ordering after the request has
//! been written and loaded with acquire ordering before it is read. Paths
//! that need both sides (ring reset) take head before tail.

use crate::bus::BusAddr;
use crate::error::RequestError;
use crate::edesc::ExtDesc;
use crate::submit::{CompletionFn, Finished, Request};
use std::cell::UnsafeCell;
use std::sync::atomic::{fence, AtomicBool, AtomicI32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Error recovery state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecoveryState {
    Normal = 0,
    Diagnosing = 1,
    ChannelReset = 2,
    ChannelContinue = 3,
    DeviceReset = 4,
}

impl RecoveryState {
    const fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Diagnosing,
            2 => Self::ChannelReset,
            3 => Self::ChannelContinue,
            4 => Self::DeviceReset,
            _ => Self::Normal,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Diagnosing => "DIAGNOSING",
            Self::ChannelReset => "CHANNEL_RESET",
            Self::ChannelContinue => "CHANNEL_CONTINUE",
            Self::DeviceReset => "DEVICE_RESET",
        }
    }
}

impl std::fmt::Display for RecoveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

struct Slot {
    occupied: AtomicBool,
    /// Bus address of the descriptor in this slot, 0 when free. Readable
    /// without owning the slot, for current-descriptor lookups.
    dma_desc: AtomicU64,
    request: UnsafeCell<Option<Request>>,
}

impl Slot {
    fn new() -> Self {
        Self {
            occupied: AtomicBool::new(false),
            dma_desc: AtomicU64::new(0),
            request: UnsafeCell::new(None),
        }
    }
}

/// Ring of request slots for one channel.
pub struct Channel {
    id: u8,
    slots: Box<[Slot]>,
    mask: usize,
    depth: u32,
    head: Mutex<usize>,
    tail: Mutex<usize>,
    submit_count: AtomicI32,
    state: AtomicU8,
}

// SAFETY: `request` of a slot is written only by the producer holding the
// head lock while `occupied` is false, and read or taken only by the
// consumer holding the tail lock after observing `occupied == true`. The
// flag is stored with release and loaded with acquire ordering, so the two
// sides never access the cell at the same time. `Request` is `Send`.
unsafe impl Send for Channel {}
unsafe impl Sync for Channel {}

/// Why [`Channel::push`] did not publish a request. The descriptor is
/// handed back in both cases.
pub(crate) enum PushError<E> {
    /// No credit left.
    Full(Box<ExtDesc>),
    /// Mapping the descriptor failed; the credit was returned.
    Map(Box<ExtDesc>, E),
}

impl Channel {
    /// Create an empty ring for a channel with a FIFO of `depth` entries.
    pub fn new(id: u8, depth: u32) -> Self {
        let capacity = (depth.max(1) as usize).next_power_of_two();
        let slots = (0..capacity).map(|_| Slot::new()).collect();
        Self {
            id,
            slots,
            mask: capacity - 1,
            depth,
            head: Mutex::new(0),
            tail: Mutex::new(0),
            submit_count: AtomicI32::new(-(depth as i32)),
            state: AtomicU8::new(RecoveryState::Normal as u8),
        }
    }

    #[inline]
    pub fn id(&self) -> u8 {
        self.id
    }

    /// Number of slots in the ring.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Hardware FIFO depth.
    #[inline]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Submissions that would still be admitted.
    #[inline]
    pub fn credits(&self) -> u32 {
        (-self.submit_count.load(Ordering::Acquire)).max(0) as u32
    }

    /// Requests currently occupying slots.
    pub fn in_flight(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.occupied.load(Ordering::Acquire))
            .count()
    }

    pub fn head(&self) -> usize {
        *self.lock_head()
    }

    pub fn tail(&self) -> usize {
        *self.lock_tail()
    }

    /// Current recovery state.
    pub fn recovery_state(&self) -> RecoveryState {
        RecoveryState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_recovery_state(&self, state: RecoveryState) {
        let prev = self.state.swap(state as u8, Ordering::AcqRel);
        if prev != state as u8 {
            log::debug!(
                "channel {}: {} -> {}",
                self.id,
                RecoveryState::from_u8(prev),
                state
            );
        }
    }

    pub(crate) fn lock_head(&self) -> MutexGuard<'_, usize> {
        self.head.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_tail(&self) -> MutexGuard<'_, usize> {
        self.tail.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take one credit. Returns false when the channel is credited out.
    fn take_credit(&self) -> bool {
        self.submit_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                if c == 0 {
                    None
                } else {
                    Some(c + 1)
                }
            })
            .is_ok()
    }

    /// Publish a request at the head.
    ///
    /// `map` runs once a credit has been taken and returns the bus address
    /// of the mapped descriptor; `doorbell` runs after the slot is
    /// published, still under the head lock, so descriptors reach the
    /// hardware in ring order.
    pub(crate) fn push<E>(
        &self,
        edesc: Box<ExtDesc>,
        callback: CompletionFn,
        map: impl FnOnce(&ExtDesc) -> Result<BusAddr, E>,
        doorbell: impl FnOnce(BusAddr),
    ) -> Result<usize, PushError<E>> {
        let mut head = self.lock_head();
        if !self.take_credit() {
            return Err(PushError::Full(edesc));
        }

        let dma = match map(&edesc) {
            Ok(addr) => addr,
            Err(e) => {
                self.submit_count.fetch_sub(1, Ordering::AcqRel);
                return Err(PushError::Map(edesc, e));
            }
        };
        let request = Request {
            dma_desc: dma,
            edesc,
            callback,
        };

        let index = *head;
        let slot = &self.slots[index];
        debug_assert!(!slot.occupied.load(Ordering::Acquire));

        // SAFETY: the slot is free (credits never exceed the capacity and
        // slots drain in order) and we hold the head lock, so no other
        // producer touches it and the consumer ignores it until `occupied`
        // is set below.
        unsafe {
            *slot.request.get() = Some(request);
        }
        slot.dma_desc.store(dma.0, Ordering::Relaxed);
        *head = (index + 1) & self.mask;
        slot.occupied.store(true, Ordering::Release);

        // Slot contents must be visible before the device can complete it.
        fence(Ordering::SeqCst);
        doorbell(dma);
        log::trace!("channel {}: slot {index} <- {dma}", self.id);
        Ok(index)
    }

    /// Drain up to `weight` slots starting at the tail.
    ///
    /// A slot whose descriptor the device marked done completes with
    /// success, even when `error` is set. Otherwise draining stops at the
    /// first slot still in flight unless `error` is set, in which case the
    /// slot completes with that error. Without `reset` draining also stops
    /// after the first failed slot.
    ///
    /// Drained requests are appended to `out`; returns how many.
    pub(crate) fn flush(
        &self,
        error: Option<RequestError>,
        reset: bool,
        weight: usize,
        out: &mut Vec<Finished>,
    ) -> usize {
        let mut tail = self.lock_tail();
        self.flush_locked(&mut tail, error, reset, weight, out)
    }

    fn flush_locked(
        &self,
        tail: &mut usize,
        error: Option<RequestError>,
        reset: bool,
        weight: usize,
        out: &mut Vec<Finished>,
    ) -> usize {
        let mut count = 0;
        while count < weight {
            let slot = &self.slots[*tail];
            if !slot.occupied.load(Ordering::Acquire) {
                break;
            }

            // SAFETY: `occupied` was observed true with acquire ordering and
            // we hold the tail lock, so the producer is done with the cell
            // and no other consumer can reach it.
            let done = match unsafe { (*slot.request.get()).as_ref() } {
                Some(r) => r.edesc.status().is_done(),
                None => break,
            };

            let status = if done {
                Ok(())
            } else if let Some(e) = error {
                Err(e)
            } else {
                break;
            };

            // SAFETY: as above.
            let Some(request) = (unsafe { (*slot.request.get()).take() }) else {
                break;
            };
            slot.dma_desc.store(0, Ordering::Relaxed);
            slot.occupied.store(false, Ordering::Release);
            *tail = (*tail + 1) & self.mask;
            self.submit_count.fetch_sub(1, Ordering::AcqRel);

            out.push(Finished { request, status });
            count += 1;

            if error.is_some() && !reset && status.is_err() {
                break;
            }
        }
        count
    }

    /// Drain every slot with `error` and return the ring to its initial
    /// state: head and tail at 0, all credits available.
    ///
    /// The caller holds the head lock so that no submission can interleave.
    pub(crate) fn reset_locked(
        &self,
        head: &mut usize,
        error: RequestError,
        out: &mut Vec<Finished>,
    ) -> usize {
        let mut tail = self.lock_tail();
        let drained = self.flush_locked(&mut tail, Some(error), true, self.capacity(), out);
        *head = 0;
        *tail = 0;
        self.submit_count
            .store(-(self.depth as i32), Ordering::Release);
        drained
    }

    /// Header of the request whose descriptor lives at `addr`, if it is in
    /// the ring.
    pub fn find_by_bus_addr(&self, addr: BusAddr) -> Option<(usize, u32)> {
        if addr.is_null() {
            return None;
        }
        let tail = self.lock_tail();
        let mut index = *tail;
        for _ in 0..self.capacity() {
            let slot = &self.slots[index];
            if !slot.occupied.load(Ordering::Acquire) {
                break;
            }
            if slot.dma_desc.load(Ordering::Relaxed) == addr.0 {
                // SAFETY: occupied and the tail lock is held.
                let request = unsafe { (*slot.request.get()).as_ref() }?;
                return Some((index, request.edesc.desc.hdr));
            }
            index = (index + 1) & self.mask;
        }
        None
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("capacity", &self.capacity())
            .field("depth", &self.depth)
            .field("credits", &self.credits())
            .field("state", &self.recovery_state())
            .finish_non_exhaustive()
    }
}
