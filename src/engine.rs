// Freescale SEC (TALITOS) Descriptor Engine
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! High-level SEC engine: submission, completion and recovery.

use crate::affinity::{map_array_error, AffinityTable, ExecCtx, GroupId};
use crate::bus::{BusAddr, DmaMapper};
use crate::channel::{Channel, PushError, RecoveryState};
use crate::config::{Features, MultiHostMode, SecConfig, MAX_GROUPS};
use crate::edesc::{EdescPool, ExtDesc};
use crate::error::{RequestError, SecError, SecResult};
use crate::header::{primary_eu, secondary_eu, ExecUnit};
use crate::recovery::{classify, device_fault, wait_for_clear, Diagnosis, RecoveryAction};
use crate::regs::{self, Cccr, CccrLo, RegisterIo};
use crate::submit::{CompletionCtx, CompletionFn, DeferReason, Finished, SubmitResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Hook invoked when a group's completion poll should be scheduled.
pub type PollHook = Box<dyn Fn(GroupId) + Send + Sync>;

/// How one channel was recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelRecovery {
    pub channel: u8,
    pub diagnosis: Diagnosis,
    /// Action actually taken; differs from the diagnosis when recovery
    /// had to escalate.
    pub action: RecoveryAction,
    /// Requests failed (or completed) while recovering.
    pub drained: usize,
}

/// Outcome of handling an error interrupt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorReport {
    pub channels: Vec<ChannelRecovery>,
    /// Status bits outside the group's channels, or low-word bits, were set.
    pub device_fault: bool,
    /// The device was reset and reinitialised.
    pub device_reset: bool,
    /// Requests drained with a fatal status outside per-channel recovery.
    pub drained: usize,
}

/// SEC descriptor engine.
///
/// `SecEngine` owns the channel rings and drives the device through a
/// [`RegisterIo`] implementation. Buffers are mapped through a
/// [`DmaMapper`]. All methods take `&self`; the engine can be shared across
/// threads.
///
/// # Example
///
/// ```rust
/// use talitos_rs::sim::{SimBus, SimSec};
/// use talitos_rs::{ExecCtx, SecConfig, SecEngine, SecError};
/// use std::sync::Arc;
///
/// fn main() -> Result<(), SecError> {
///     let bus = Arc::new(SimBus::new());
///     let sec = Arc::new(SimSec::new(Arc::clone(&bus), 4));
///     let engine = SecEngine::probe(SecConfig::default(), sec, bus)?;
///     assert_eq!(engine.channel_count(), 4);
///     assert_eq!(engine.group_of(ExecCtx(0)).0, 0);
///     Ok(())
/// }
/// ```
pub struct SecEngine<R: RegisterIo, M: DmaMapper> {
    pub(crate) regs: R,
    pub(crate) mapper: M,
    pub(crate) config: SecConfig,
    pub(crate) affinity: AffinityTable,
    pub(crate) channels: Vec<Channel>,
    cursors: [AtomicUsize; MAX_GROUPS],
    poll_scheduled: [AtomicBool; MAX_GROUPS],
    poll_hook: Option<PollHook>,
    pub(crate) pool: EdescPool,
    device_lock: Mutex<()>,
}

impl<R: RegisterIo, M: DmaMapper> SecEngine<R, M> {
    /// Create an engine for a device.
    ///
    /// Validates the configuration, builds the channel rings and, unless
    /// this host is a secondary, resets and initialises the device.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the device does
    /// not come out of reset.
    pub fn probe(config: SecConfig, regs: R, mapper: M) -> SecResult<Self> {
        config.validate()?;
        let affinity = AffinityTable::from_config(&config)?;
        let channels = (0..config.num_channels as u8)
            .map(|ch| Channel::new(ch, config.fifo_depth))
            .collect();
        let pool = EdescPool::new(config.num_contexts, config.recycle_depth);

        let engine = Self {
            regs,
            mapper,
            affinity,
            channels,
            cursors: Default::default(),
            poll_scheduled: Default::default(),
            poll_hook: None,
            pool,
            device_lock: Mutex::new(()),
            config,
        };

        if engine.affinity.mode() != MultiHostMode::Secondary {
            engine.init_device()?;
        }

        log::info!(
            "SEC: {} channels, fifo depth {}, {} host",
            engine.config.num_channels,
            engine.config.fifo_depth,
            engine.affinity.mode()
        );
        Ok(engine)
    }

    /// Install the hook that schedules completion polls.
    pub fn set_poll_hook(&mut self, hook: PollHook) {
        self.poll_hook = Some(hook);
    }

    /// Change the deadline for self-clearing reset and continue bits.
    pub fn set_reset_timeout(&mut self, timeout: Duration) {
        self.config.reset_timeout = timeout;
    }

    #[inline]
    pub fn config(&self) -> &SecConfig {
        &self.config
    }

    #[inline]
    pub fn affinity(&self) -> &AffinityTable {
        &self.affinity
    }

    #[inline]
    pub fn regs(&self) -> &R {
        &self.regs
    }

    #[inline]
    pub fn mapper(&self) -> &M {
        &self.mapper
    }

    #[inline]
    pub fn pool(&self) -> &EdescPool {
        &self.pool
    }

    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channel(&self, ch: u8) -> Option<&Channel> {
        self.channels.get(ch as usize)
    }

    /// Group the execution context `ctx` belongs to.
    #[inline]
    pub fn group_of(&self, ctx: ExecCtx) -> GroupId {
        self.affinity.group_of(ctx)
    }

    #[inline]
    pub fn has(&self, feature: Features) -> bool {
        self.config.has(feature)
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Submit a descriptor on behalf of execution context `ctx`.
    ///
    /// The channel is picked round-robin among the channels of `ctx`'s
    /// group; the group cursor advances even when the picked channel turns
    /// out to be full. On [`SubmitResult::InProgress`] the descriptor's bus
    /// address has been written to the channel's fetch FIFO and `callback`
    /// will run exactly once. Otherwise the descriptor is handed back and
    /// `callback` is dropped.
    pub fn submit(
        &self,
        ctx: ExecCtx,
        edesc: Box<ExtDesc>,
        callback: CompletionFn,
    ) -> SubmitResult {
        let group = self.affinity.group_of(ctx);
        let chans = self.affinity.channels(group);
        if chans.is_empty() {
            return SubmitResult::Deferred {
                edesc,
                reason: DeferReason::NoChannel(group),
            };
        }

        let len = chans.len();
        let pos = self.cursors[group.index()]
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                Some(if c + 1 >= len { 0 } else { c + 1 })
            })
            .unwrap_or(0)
            % len;
        let ch = chans[pos];
        let channel = &self.channels[ch as usize];

        edesc.arm();
        let pushed = channel.push(
            edesc,
            callback,
            |e| self.mapper.map_desc(&e.desc, e.status()),
            |addr| {
                self.regs.write32(regs::ff(ch), addr.hi());
                self.regs.write32(regs::ff_lo(ch), addr.lo());
            },
        );

        match pushed {
            Ok(_) => SubmitResult::InProgress { channel: ch },
            Err(PushError::Full(edesc)) => {
                log::trace!("{ctx}: channel {ch} full");
                SubmitResult::Deferred {
                    edesc,
                    reason: DeferReason::FifoFull(ch),
                }
            }
            Err(PushError::Map(edesc, error)) => {
                log::warn!("{ctx}: failed to map descriptor for channel {ch}: {error}");
                SubmitResult::Failed { edesc, error }
            }
        }
    }

    // ========================================================================
    // Completion
    // ========================================================================

    fn complete(&self, ctx: ExecCtx, ch: u8, finished: Vec<Finished>) {
        let cctx = CompletionCtx {
            mapper: &self.mapper,
            pool: &self.pool,
            exec: ctx,
            channel: ch,
        };
        for Finished { request, status } in finished {
            self.mapper.unmap_desc(request.dma_desc);
            (request.callback)(&cctx, request.edesc, status);
        }
    }

    /// Drain up to `max` slots of channel `ch`, running their callbacks.
    ///
    /// Slots the device marked done complete successfully. Other slots are
    /// left in flight unless `error` is given: then the first one fails
    /// with `error` and, with `force_reset`, so do all after it. Returns
    /// the number of callbacks run.
    pub fn drain(
        &self,
        ctx: ExecCtx,
        ch: u8,
        error: Option<RequestError>,
        force_reset: bool,
        max: usize,
    ) -> usize {
        let Some(channel) = self.channels.get(ch as usize) else {
            return 0;
        };
        let mut finished = Vec::new();
        let n = channel.flush(error, force_reset, max, &mut finished);
        self.complete(ctx, ch, finished);
        n
    }

    /// Run a completion poll for `ctx`'s group.
    ///
    /// The budget is split evenly over the group's channels, with at least
    /// one request per channel even when `budget` is smaller than the
    /// number of channels. When less work than `budget` was found the poll
    /// is complete and done interrupts of the group are unmasked again.
    pub fn poll(&self, ctx: ExecCtx, budget: usize) -> usize {
        let group = self.affinity.group_of(ctx);
        let chans = self.affinity.channels(group);
        if chans.is_empty() {
            return 0;
        }

        let per_channel = (budget / chans.len()).max(1);
        let work: usize = chans
            .iter()
            .map(|&ch| self.drain(ctx, ch, None, false, per_channel))
            .sum();

        if work < budget {
            self.poll_scheduled[group.index()].store(false, Ordering::Release);
            self.regs
                .set_bits32(regs::IMR, self.affinity.done_mask(group));
        }
        work
    }

    /// Whether a completion poll is pending for `group`.
    pub fn poll_pending(&self, group: GroupId) -> bool {
        self.poll_scheduled
            .get(group.index())
            .is_some_and(|p| p.load(Ordering::Acquire))
    }

    /// Mark a poll pending for `group` and call the poll hook, unless one
    /// is already pending.
    pub(crate) fn schedule_poll(&self, group: GroupId) {
        let Some(flag) = self.poll_scheduled.get(group.index()) else {
            return;
        };
        if !flag.swap(true, Ordering::AcqRel) {
            if let Some(hook) = &self.poll_hook {
                hook(group);
            }
        }
    }

    // ========================================================================
    // Error recovery
    // ========================================================================

    /// Recover from an error interrupt of `ctx`'s group.
    ///
    /// `isr` and `isr_lo` are the acknowledged interrupt status words,
    /// already restricted to the group's channels plus device bits.
    pub fn handle_error(&self, ctx: ExecCtx, isr: u32, isr_lo: u32) -> ErrorReport {
        let group = self.affinity.group_of(ctx);
        let mut report = ErrorReport::default();
        let mut reset_dev = false;

        for &ch in self.affinity.channels(group) {
            if isr & map_array_error(ch) == 0 {
                continue;
            }
            let recovery = self.recover_channel(ctx, ch);
            reset_dev |= recovery.action == RecoveryAction::ResetDevice;
            report.channels.push(recovery);
        }

        report.device_fault = device_fault(isr, isr_lo, self.affinity.isr_mask(group));
        if report.device_fault {
            log::error!(
                "done overflow, internal time out, or rngu error: ISR {isr:#010x}_{isr_lo:#010x}"
            );
        }

        if reset_dev {
            report.drained += self.reset_device_locked(ctx, RequestError::Io);
            report.device_reset = true;
        } else if report.device_fault {
            // Only channels that raised an error bit are failed.
            let faulted: Vec<u8> = report.channels.iter().map(|r| r.channel).collect();
            for ch in faulted {
                report.drained +=
                    self.drain(ctx, ch, Some(RequestError::Io), true, usize::MAX);
            }
        }
        report
    }

    fn recover_channel(&self, ctx: ExecCtx, ch: u8) -> ChannelRecovery {
        let channel = &self.channels[ch as usize];
        channel.set_recovery_state(RecoveryState::Diagnosing);

        let ccpsr_lo = self.regs.read32(regs::ccpsr_lo(ch));
        let diagnosis = classify(ccpsr_lo);
        for fault in diagnosis.faults.iter() {
            log::error!("channel {ch}: {}", fault.describe());
        }
        if diagnosis.eu_fault() {
            self.report_eu_error(ch);
        }

        let mut action = diagnosis.action;
        let drained = match diagnosis.action {
            RecoveryAction::ResetChannel => {
                channel.set_recovery_state(RecoveryState::ChannelReset);
                let mut finished = Vec::new();
                let (drained, reset) = {
                    let mut head = channel.lock_head();
                    let drained =
                        channel.reset_locked(&mut head, diagnosis.error, &mut finished);
                    (drained, self.reset_channel(ch))
                };
                self.complete(ctx, ch, finished);
                if let Err(e) = reset {
                    log::error!("{e}");
                    action = RecoveryAction::ResetDevice;
                }
                drained
            }
            RecoveryAction::Retry | RecoveryAction::ContinueInPlace => {
                channel.set_recovery_state(RecoveryState::ChannelContinue);
                let drained = self.drain(ctx, ch, Some(diagnosis.error), false, usize::MAX);
                if let Err(e) = self.continue_channel(ch) {
                    log::error!("{e}");
                    action = RecoveryAction::ResetDevice;
                }
                drained
            }
            RecoveryAction::ResetDevice => 0,
        };

        if action == RecoveryAction::ResetDevice {
            channel.set_recovery_state(RecoveryState::DeviceReset);
        } else {
            channel.set_recovery_state(RecoveryState::Normal);
        }

        ChannelRecovery {
            channel: ch,
            diagnosis,
            action,
            drained,
        }
    }

    /// Ask a channel to skip the failed descriptor and carry on.
    fn continue_channel(&self, ch: u8) -> SecResult<()> {
        self.regs.set_bits32(regs::cccr(ch), Cccr::CONT.bits());
        if wait_for_clear(
            &self.regs,
            regs::cccr(ch),
            Cccr::CONT.bits(),
            self.config.reset_timeout,
        ) {
            Ok(())
        } else {
            Err(SecError::ChannelContinueTimeout(ch))
        }
    }

    /// Header of the request the channel is currently processing.
    pub fn current_desc(&self, ch: u8) -> Option<(usize, u32)> {
        let channel = self.channels.get(ch as usize)?;
        let cdpr = BusAddr::from_parts(
            self.regs.read32(regs::cdpr(ch)),
            self.regs.read32(regs::cdpr_lo(ch)),
        );
        channel.find_by_bus_addr(cdpr)
    }

    fn report_eu_error(&self, ch: u8) {
        match self.current_desc(ch) {
            None => log::error!("channel {ch}: couldn't locate current descriptor"),
            Some((slot, hdr)) => {
                log::error!("channel {ch}: slot {slot} header {hdr:#010x}");
                for sel in [primary_eu(hdr), secondary_eu(hdr)] {
                    let Some(eu) = ExecUnit::from_nibble(sel) else {
                        continue;
                    };
                    let isr = regs::eu_isr(eu);
                    log::error!(
                        "{}ISR {:#010x}_{:#010x}",
                        eu.name(),
                        self.regs.read32(isr),
                        self.regs.read32(regs::lo(isr))
                    );
                }
            }
        }
        for i in 0..8 {
            log::error!(
                "DESCBUF {:#010x}_{:#010x}",
                self.regs.read32(regs::descbuf(ch) + 8 * i),
                self.regs.read32(regs::descbuf_lo(ch) + 8 * i)
            );
        }
    }

    // ========================================================================
    // Resets
    // ========================================================================

    /// Reset one channel and configure it for operation.
    ///
    /// Only touches registers; the ring is left alone.
    pub fn reset_channel(&self, ch: u8) -> SecResult<()> {
        self.regs.set_bits32(regs::cccr(ch), Cccr::RESET.bits());
        if !wait_for_clear(
            &self.regs,
            regs::cccr(ch),
            Cccr::RESET.bits(),
            self.config.reset_timeout,
        ) {
            return Err(SecError::ChannelResetTimeout(ch));
        }

        let mut lo = CccrLo::EAE | CccrLo::CDWE | CccrLo::CDIE;
        if self.has(Features::HW_AUTH_CHECK) {
            lo |= CccrLo::IWSE;
        }
        self.regs.set_bits32(regs::cccr_lo(ch), lo.bits());
        Ok(())
    }

    /// Issue a master software reset.
    fn reset_master(&self) -> SecResult<()> {
        self.regs.set_bits32(regs::MCR, regs::MCR_SWR);
        if !wait_for_clear(
            &self.regs,
            regs::MCR,
            regs::MCR_SWR,
            self.config.reset_timeout,
        ) {
            return Err(SecError::DeviceResetTimeout);
        }
        if self.config.channel_remap != 0 {
            self.regs.set_bits32(
                regs::MCR,
                self.config.channel_remap << regs::MCR_REMAP_SHIFT,
            );
        }
        Ok(())
    }

    /// Reset and initialise the device registers.
    ///
    /// The master reset is issued twice, working around an erratum. Then
    /// every channel is reset and configured and the interrupt masks are
    /// enabled.
    pub fn init_device(&self) -> SecResult<()> {
        self.reset_master()?;
        self.reset_master()?;

        for ch in 0..self.channels.len() as u8 {
            self.reset_channel(ch)?;
        }

        self.regs.set_bits32(regs::IMR, regs::IMR_INIT);
        self.regs.set_bits32(regs::IMR_LO, regs::IMR_LO_INIT);

        if self.has(Features::HW_AUTH_CHECK) {
            self.regs
                .set_bits32(regs::MDEUICR_LO, regs::MDEUICR_LO_ICE);
        }
        log::debug!("SEC: device initialised");
        Ok(())
    }

    fn lock_device(&self) -> MutexGuard<'_, ()> {
        self.device_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail every request on every channel with `error`, reset all rings
    /// and reinitialise the device. No submission is accepted until the
    /// rings are back at their initial state.
    fn reset_device_locked(&self, ctx: ExecCtx, error: RequestError) -> usize {
        let _device = self.lock_device();
        let mut heads: Vec<_> = self.channels.iter().map(|c| c.lock_head()).collect();

        let mut finished: Vec<(u8, Vec<Finished>)> = Vec::with_capacity(self.channels.len());
        let mut drained = 0;
        for (channel, head) in self.channels.iter().zip(heads.iter_mut()) {
            channel.set_recovery_state(RecoveryState::DeviceReset);
            let mut out = Vec::new();
            drained += channel.reset_locked(head, error, &mut out);
            finished.push((channel.id(), out));
        }

        match self.init_device() {
            Ok(()) => log::warn!("SEC: device reset, {drained} requests failed"),
            Err(e) => log::error!("SEC: device reinitialisation failed: {e}"),
        }
        for channel in &self.channels {
            channel.set_recovery_state(RecoveryState::Normal);
        }
        drop(heads);

        for (ch, out) in finished {
            self.complete(ctx, ch, out);
        }
        drained
    }

    /// Fail all outstanding requests with [`RequestError::Io`] and
    /// reinitialise the device.
    pub fn reset_device(&self, ctx: ExecCtx) -> usize {
        self.reset_device_locked(ctx, RequestError::Io)
    }

    /// Fail all outstanding requests with [`RequestError::Io`] and mask
    /// the device's interrupts. Returns the number of requests failed.
    pub fn shutdown(&self, ctx: ExecCtx) -> usize {
        let mut drained = 0;
        for channel in &self.channels {
            let mut out = Vec::new();
            {
                let mut head = channel.lock_head();
                drained += channel.reset_locked(&mut head, RequestError::Io, &mut out);
            }
            self.complete(ctx, channel.id(), out);
        }
        self.regs.write32(regs::IMR, 0);
        self.regs.write32(regs::IMR_LO, 0);
        log::info!("SEC: shut down, {drained} requests failed");
        drained
    }
}

impl<R: RegisterIo, M: DmaMapper> std::fmt::Debug for SecEngine<R, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecEngine")
            .field("config", &self.config)
            .field("affinity", &self.affinity)
            .field("channels", &self.channels)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::HwDesc;
    use crate::edesc::EdescLayout;
    use crate::sim::{SimBus, SimSec};
    use std::sync::Arc;

    type SimEngine = SecEngine<Arc<SimSec>, Arc<SimBus>>;

    fn sim(config: SecConfig) -> (SimEngine, Arc<SimSec>) {
        let bus = Arc::new(SimBus::new());
        let sec = Arc::new(SimSec::new(Arc::clone(&bus), config.num_channels));
        let engine = SecEngine::probe(config, Arc::clone(&sec), bus).unwrap();
        (engine, sec)
    }

    fn submit_hdr(engine: &SimEngine, hdr: u32) -> u8 {
        let ctx = ExecCtx(0);
        let mut edesc = engine.pool().alloc(ctx, EdescLayout::default(), false).unwrap();
        edesc.desc = HwDesc::with_header(hdr);
        engine
            .submit(ctx, edesc, Box::new(|cctx, edesc, _| cctx.release(edesc)))
            .channel()
            .unwrap()
    }

    #[test]
    fn test_probe_rejects_invalid_config() {
        let bus = Arc::new(SimBus::new());
        let sec = Arc::new(SimSec::new(Arc::clone(&bus), 4));
        let res = SecEngine::probe(SecConfig::default().with_channels(3), sec, bus);
        assert!(matches!(res, Err(SecError::InvalidConfig(_))));
    }

    #[test]
    fn test_probe_resets_master_twice() {
        let (engine, sec) = sim(SecConfig::default());
        assert_eq!(sec.writes_to(regs::MCR), 2);
        assert_eq!(engine.channel_count(), 4);
        assert_eq!(sec.reg(regs::IMR) & regs::IMR_INIT, regs::IMR_INIT);
    }

    #[test]
    fn test_current_desc_follows_the_device() {
        let (engine, sec) = sim(SecConfig::default().with_channels(1));
        assert_eq!(engine.current_desc(0), None);

        submit_hdr(&engine, 0x2040_0011);
        submit_hdr(&engine, 0x6030_0011);
        assert_eq!(engine.current_desc(0), Some((0, 0x2040_0011)));

        sec.complete(0, 1);
        assert_eq!(engine.current_desc(0), Some((1, 0x6030_0011)));

        sec.complete_all(0);
        assert_eq!(engine.current_desc(0), None);
        assert_eq!(engine.current_desc(7), None);
    }

    #[test]
    fn test_reset_timeout_is_reported() {
        let (mut engine, sec) = sim(SecConfig::default());
        engine.set_reset_timeout(Duration::from_millis(1));
        sec.set_stuck_reset(2, true);
        assert!(matches!(
            engine.reset_channel(2),
            Err(SecError::ChannelResetTimeout(2))
        ));
        assert!(engine.reset_channel(1).is_ok());
    }
}
