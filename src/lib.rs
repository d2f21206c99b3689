// Freescale SEC (TALITOS) Descriptor Engine
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! # Freescale SEC (TALITOS) descriptor engine
//!
//! This crate drives the Freescale/NXP Security Engine (SEC 2.x/3.x, also
//! known as TALITOS): it hands hardware descriptors to the device's
//! channels, collects finished ones, and recovers channels that fault.
//!
//! ## Model
//!
//! The SEC has up to four channels. Each channel has a fetch FIFO the CPU
//! writes descriptor bus addresses to; the device processes them in order
//! and writes a done marker back into each descriptor header. The engine
//! mirrors every FIFO with a ring of in-flight requests:
//!
//! - [`SecEngine::submit`] picks a channel of the caller's group
//!   round-robin, takes one submit credit and pushes the descriptor.
//! - [`SecEngine::drain`] and [`SecEngine::poll`] complete finished
//!   requests in FIFO order and run their callbacks outside the ring locks.
//! - [`SecEngine::handle_error`] classifies channel faults and resets,
//!   continues or fails the affected requests; a stuck channel escalates
//!   to a full device reset.
//!
//! Channels are split into up to two groups so that two execution contexts
//! (cores, or hosts sharing the device) never contend for a channel.
//!
//! ## Collaborators
//!
//! The engine reaches the hardware through two traits: [`RegisterIo`] for
//! the register block and [`DmaMapper`] for bus mappings. The [`sim`]
//! module implements both in memory.
//!
//! ## Algorithms
//!
//! The [`frontend`] module builds descriptors for AEAD (cipher + HMAC),
//! block cipher and hash requests; [`algs`] lists the algorithms and which
//! ones a device can run.
//!
//! ## Example
//!
//! ```rust
//! use talitos_rs::descriptor::HwDesc;
//! use talitos_rs::edesc::EdescLayout;
//! use talitos_rs::sim::{SimBus, SimSec};
//! use talitos_rs::{ExecCtx, SecConfig, SecEngine, SecError};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), SecError> {
//!     let bus = Arc::new(SimBus::new());
//!     let sec = Arc::new(SimSec::new(Arc::clone(&bus), 4));
//!     let engine = SecEngine::probe(SecConfig::default(), Arc::clone(&sec), bus)?;
//!
//!     let ctx = ExecCtx(0);
//!     let mut edesc = engine.pool().alloc(ctx, EdescLayout::default(), false)?;
//!     edesc.desc = HwDesc::with_header(0x2040_0011);
//!
//!     let done = Arc::new(AtomicUsize::new(0));
//!     let seen = Arc::clone(&done);
//!     let ch = engine
//!         .submit(ctx, edesc, Box::new(move |cctx, edesc, status| {
//!             assert!(status.is_ok());
//!             seen.fetch_add(1, Ordering::SeqCst);
//!             cctx.release(edesc);
//!         }))
//!         .channel()
//!         .expect("accepted");
//!
//!     sec.complete(ch, 1);
//!     assert_eq!(engine.drain(ctx, ch, None, false, usize::MAX), 1);
//!     assert_eq!(done.load(Ordering::SeqCst), 1);
//!     Ok(())
//! }
//! ```

pub mod affinity;
pub mod algs;
pub mod bus;
pub mod channel;
pub mod config;
pub mod descriptor;
pub mod edesc;
pub mod engine;
pub mod error;
pub mod frontend;
pub mod header;
pub mod irq;
#[cfg(feature = "tokio")]
pub mod notify;
pub mod recovery;
pub mod regs;
pub mod sim;
pub mod submit;

// Re-exports for convenient access
pub use affinity::{AffinityTable, ExecCtx, GroupId};
pub use algs::{AlgKind, RegisteredAlg};
pub use bus::{BusAddr, DmaDirection, DmaMapper, ScatterList, Segment};
pub use channel::RecoveryState;
pub use config::{Features, MultiHostMode, SecConfig};
pub use descriptor::{DescPtr, HwDesc};
pub use engine::{ChannelRecovery, ErrorReport, SecEngine};
pub use error::{RequestError, RequestStatus, SecError, SecResult};
pub use irq::IrqReturn;
pub use recovery::RecoveryAction;
pub use regs::RegisterIo;
pub use submit::{CompletionCtx, CompletionFn, DeferReason, SubmitResult};
