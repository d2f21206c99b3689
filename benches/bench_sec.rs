// Freescale SEC (TALITOS) Descriptor Engine
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Benchmarks of the submission and completion paths on the simulated SEC.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use talitos_rs::algs::{find, register};
use talitos_rs::descriptor::HwDesc;
use talitos_rs::edesc::EdescLayout;
use talitos_rs::frontend::{CipherRequest, CipherTfm};
use talitos_rs::sim::{SimBus, SimSec};
use talitos_rs::{ExecCtx, SecConfig, SecEngine};

const CTX: ExecCtx = ExecCtx(0);

fn engine(config: SecConfig) -> (SecEngine<Arc<SimSec>, Arc<SimBus>>, Arc<SimSec>, Arc<SimBus>) {
    let bus = Arc::new(SimBus::new());
    let sec = Arc::new(SimSec::new(Arc::clone(&bus), config.num_channels));
    let engine = SecEngine::probe(config, Arc::clone(&sec), Arc::clone(&bus)).unwrap();
    (engine, sec, bus)
}

/// Fill one channel's FIFO with header-only descriptors, complete them and
/// drain the ring.
fn bench_submit_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit_drain");

    for depth in [8u32, 24, 64] {
        let (engine, sec, _bus) = engine(SecConfig::default().with_channels(1).with_fifo_depth(depth));
        group.throughput(Throughput::Elements(depth as u64));

        group.bench_with_input(BenchmarkId::new("fifo", depth), &depth, |b, &depth| {
            b.iter(|| {
                for _ in 0..depth {
                    let mut edesc = engine.pool().alloc(CTX, EdescLayout::default(), false).unwrap();
                    edesc.desc = HwDesc::with_header(0x2040_0011);
                    let res = engine.submit(CTX, edesc, Box::new(|cctx, edesc, _| cctx.release(edesc)));
                    assert!(res.channel().is_some());
                }
                sec.complete_all(0);
                engine.drain(CTX, 0, None, false, usize::MAX)
            });
        });
    }

    group.finish();
}

/// In-place AES-CBC requests through the cipher front-end, scattered
/// source included.
fn bench_cipher(c: &mut Criterion) {
    let sizes: Vec<usize> = vec![
        64,        // 64 B
        1024,      // 1 KB
        16 * 1024, // 16 KB
    ];

    let mut group = c.benchmark_group("cipher");
    let (engine, sec, bus) = engine(SecConfig::default().with_channels(1));
    let algs = register(engine.config());
    let mut tfm = CipherTfm::new(find(&algs, "cbc(aes)").unwrap()).unwrap();
    tfm.set_key(&[0x2b; 16]).unwrap();

    for size in sizes {
        let data: Vec<u8> = (0..size).map(|i| (i & 0xFF) as u8).collect();
        group.throughput(Throughput::Bytes(size as u64));

        for (name, chunk) in [("single", size), ("scattered", 256)] {
            let src = bus.map_chunks(&data, chunk).unwrap();
            group.bench_with_input(BenchmarkId::new(name, size), &src, |b, src| {
                b.iter(|| {
                    let req = CipherRequest {
                        src: src.clone(),
                        dst: None,
                        nbytes: size,
                        iv: vec![0; 16],
                    };
                    let ch = engine.cipher_encrypt(CTX, &tfm, req, Box::new(|_| {})).unwrap();
                    sec.complete_all(ch);
                    engine.drain(CTX, ch, None, false, usize::MAX)
                });
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_submit_drain, bench_cipher);
criterion_main!(benches);
