// Freescale SEC (TALITOS) Descriptor Engine
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Software model of a SEC block and its bus.
//!
//! The engine only sees a SEC through [`RegisterIo`](crate::RegisterIo) and
//! [`DmaMapper`](crate::DmaMapper). [`SimBus`] and [`SimSec`] implement both
//! in memory so the engine can be driven without hardware: tests decide
//! when descriptors complete, fault, or get stuck.
//!
//! ```rust
//! use talitos_rs::sim::{SimBus, SimSec};
//! use talitos_rs::RegisterIo;
//! use std::sync::Arc;
//!
//! let bus = Arc::new(SimBus::new());
//! let sec = SimSec::new(Arc::clone(&bus), 4);
//! sec.write32(0x1008, 0xff);
//! assert_eq!(sec.read32(0x1008), 0xff);
//! ```

mod bus;
mod device;

pub use bus::{SimBus, SIM_BUS_BASE};
pub use device::{Processor, SimSec};
