// Freescale SEC (TALITOS) Descriptor Engine
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use talitos_rs::descriptor::{DescPtr, DESC_PTR_LNKTBL_JUMP, DESC_PTR_LNKTBL_RETURN, DESC_PTR_SIZE};
use talitos_rs::edesc::EdescLayout;
use talitos_rs::sim::{SimBus, SimSec};
use talitos_rs::{
    CompletionFn, DmaMapper, ExecCtx, HwDesc, RequestStatus, SecConfig, SecEngine, SubmitResult,
};

pub type SimEngine = SecEngine<Arc<SimSec>, Arc<SimBus>>;

pub struct Rig {
    pub engine: SimEngine,
    pub sec: Arc<SimSec>,
    pub bus: Arc<SimBus>,
}

pub fn rig(config: SecConfig) -> Rig {
    let bus = Arc::new(SimBus::new());
    let sec = Arc::new(SimSec::new(Arc::clone(&bus), config.num_channels));
    let engine = SecEngine::probe(config, Arc::clone(&sec), Arc::clone(&bus)).unwrap();
    Rig { engine, sec, bus }
}

/// Completion statuses in the order the callbacks ran, tagged with the
/// request id.
#[derive(Clone, Default)]
pub struct Log(Arc<Mutex<Vec<(u32, RequestStatus)>>>);

impl Log {
    pub fn callback(&self, id: u32) -> CompletionFn {
        let log = Arc::clone(&self.0);
        Box::new(move |cctx, edesc, status| {
            log.lock().unwrap().push((id, status));
            cctx.release(edesc);
        })
    }

    pub fn entries(&self) -> Vec<(u32, RequestStatus)> {
        self.0.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

/// Submit a descriptor that carries only a header.
pub fn submit_raw(rig: &Rig, ctx: ExecCtx, log: &Log, id: u32) -> SubmitResult {
    let mut edesc = rig
        .engine
        .pool()
        .alloc(ctx, EdescLayout::default(), false)
        .unwrap();
    edesc.desc = HwDesc::with_header(0x2040_0011);
    rig.engine.submit(ctx, edesc, log.callback(id))
}

/// Entries a pointer refers to: itself, or the link table it jumps to.
fn entries(bus: &SimBus, ptr: &DescPtr) -> Vec<DescPtr> {
    if ptr.j_extent & DESC_PTR_LNKTBL_JUMP == 0 {
        return vec![*ptr];
    }
    let mut out = Vec::new();
    let mut addr = ptr.addr();
    loop {
        let raw = bus.read(addr, DESC_PTR_SIZE).unwrap();
        let mut bytes = [0u8; DESC_PTR_SIZE];
        bytes.copy_from_slice(&raw);
        let entry = DescPtr::from_bytes(&bytes);
        out.push(entry);
        if entry.j_extent & DESC_PTR_LNKTBL_RETURN != 0 {
            return out;
        }
        addr = addr.offset(DESC_PTR_SIZE);
    }
}

/// Device-side read of the `ptr.len` bytes a pointer describes.
pub fn gather(bus: &SimBus, ptr: &DescPtr) -> Vec<u8> {
    if ptr.len == 0 {
        return Vec::new();
    }
    let mut data = Vec::new();
    for e in entries(bus, ptr) {
        data.extend(bus.read(e.addr(), e.len as usize).unwrap());
    }
    data.truncate(ptr.len as usize);
    data
}

/// Device-side write through a pointer, continuing into its extent.
pub fn scatter(bus: &SimBus, ptr: &DescPtr, data: &[u8]) {
    if ptr.j_extent & DESC_PTR_LNKTBL_JUMP == 0 {
        bus.write(ptr.addr(), data).unwrap();
        return;
    }
    let mut written = 0;
    for e in entries(bus, ptr) {
        let take = (e.len as usize).min(data.len() - written);
        bus.write(e.addr(), &data[written..written + take]).unwrap();
        written += take;
        if written == data.len() {
            break;
        }
    }
    assert_eq!(written, data.len(), "pointer too short");
}

/// Simple stand-in for a cipher: every byte xor `key`.
pub fn xor(data: &[u8], key: u8) -> Vec<u8> {
    data.iter().map(|b| b ^ key).collect()
}

/// Simple stand-in for an ICV: the xor of all bytes, spread over `len`
/// bytes.
pub fn icv(data: &[u8], len: usize) -> Vec<u8> {
    let x = data.iter().fold(0u8, |a, b| a ^ b);
    (0..len).map(|i| x ^ i as u8).collect()
}

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}
