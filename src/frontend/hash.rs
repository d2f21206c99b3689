// Freescale SEC (TALITOS) Descriptor Engine
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Hash and HMAC front-end (`common_nonsnoop_hash` descriptors).
//!
//! | Pointer | Content |
//! |---------|---------|
//! | 0 | empty |
//! | 1 | hash context in, unless the device initialises it |
//! | 2 | HMAC key |
//! | 3 | data in |
//! | 4 | empty |
//! | 5 | digest out on the last request, hash context out otherwise |
//! | 6 | empty |
//!
//! The device only hashes whole blocks until the final request, so a
//! [`HashState`] buffers the partial block an update leaves over and feeds
//! it in front of the next request's data.

use super::{link_sg, sync_link_area, Done};
use crate::affinity::ExecCtx;
use crate::algs::{AlgKind, RegisteredAlg, MAX_KEY_SIZE, SHA224_H};
use crate::bus::{DmaDirection, DmaMapper, ScatterList};
use crate::edesc::{Destination, EdescLayout};
use crate::engine::SecEngine;
use crate::error::{RequestError, SecError, SecResult};
use crate::header::HeaderFlags;
use crate::regs::RegisterIo;
use crate::submit::CompletionFn;
use scopeguard::ScopeGuard;
use std::sync::{Arc, Mutex, PoisonError};

/// Hash transform: algorithm and, for HMAC, the key.
#[derive(Debug, Clone)]
pub struct HashTfm {
    alg: RegisteredAlg,
    key: Vec<u8>,
    digest_size: usize,
}

impl HashTfm {
    /// Transform for a registered hash.
    pub fn new(alg: RegisteredAlg) -> SecResult<Self> {
        let AlgKind::Hash { digest_size } = alg.kind() else {
            return Err(SecError::Unsupported(format!("{} is not a hash", alg.name())));
        };
        Ok(Self {
            alg,
            key: Vec::new(),
            digest_size,
        })
    }

    /// Set an HMAC key; the transform computes HMACs from now on.
    pub fn set_key(&mut self, key: &[u8]) -> SecResult<()> {
        if key.is_empty() || key.len() > MAX_KEY_SIZE {
            return Err(SecError::BadKeyLength(key.len()));
        }
        self.key = key.to_vec();
        Ok(())
    }

    #[inline]
    pub fn alg(&self) -> &RegisteredAlg {
        &self.alg
    }

    #[inline]
    pub fn digest_size(&self) -> usize {
        self.digest_size
    }

    #[inline]
    pub fn is_hmac(&self) -> bool {
        !self.key.is_empty()
    }
}

#[derive(Debug, Clone)]
struct HashInner {
    /// Bytes passed in so far.
    count: u64,
    hw_context: Vec<u8>,
    /// Partial block waiting for more data.
    buf: Vec<u8>,
    /// Partial block left over by the request in flight.
    bufnext: Vec<u8>,
    to_hash_later: usize,
    /// The device has not seen this hash yet.
    first: bool,
    last: bool,
    /// The context was loaded by software and must be passed in.
    swinit: bool,
}

/// Running state of one hash computation.
///
/// Clones share the state. A request must complete before the next one on
/// the same state is submitted.
#[derive(Debug, Clone)]
pub struct HashState {
    inner: Arc<Mutex<HashInner>>,
    block_size: usize,
}

impl HashState {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bytes passed in so far.
    pub fn count(&self) -> u64 {
        self.lock().count
    }

    /// Bytes buffered, waiting for a full block or the final request.
    pub fn buffered(&self) -> usize {
        (self.lock().count as usize) & (self.block_size - 1)
    }

    /// Current hash context as last written by the device (or by software
    /// initialisation).
    pub fn context(&self) -> Vec<u8> {
        self.lock().hw_context.clone()
    }
}

/// Hash request: `nbytes` of `src`.
#[derive(Debug, Clone, Default)]
pub struct HashRequest {
    pub src: ScatterList,
    pub nbytes: usize,
}

impl<R: RegisterIo, M: DmaMapper> SecEngine<R, M> {
    /// Start a new hash computation.
    pub fn hash_init(&self, tfm: &HashTfm) -> HashState {
        let ctx_size = tfm.alg.hash_context_size();
        let block_size = tfm.alg.block_size();
        let mut hw_context = vec![0u8; ctx_size];

        let swinit = tfm.alg.sha224_swinit;
        if swinit {
            // SHA-256 engine, SHA-224 initial values, zero bit count.
            for (word, h) in hw_context.chunks_exact_mut(4).zip(SHA224_H) {
                word.copy_from_slice(&h.to_be_bytes());
            }
        }

        HashState {
            inner: Arc::new(Mutex::new(HashInner {
                count: 0,
                hw_context,
                buf: vec![0; block_size],
                bufnext: vec![0; block_size],
                to_hash_later: 0,
                first: true,
                last: false,
                swinit,
            })),
            block_size,
        }
    }

    /// Hash `req`. Returns `Ok(None)` when the data was only buffered; `done`
    /// is then dropped without being called.
    pub fn hash_update(
        &self,
        ctx: ExecCtx,
        tfm: &HashTfm,
        state: &HashState,
        req: HashRequest,
        done: Done<()>,
    ) -> SecResult<Option<u8>> {
        let done: Done<Vec<u8>> = Box::new(move |status| done(status.map(|_| ())));
        self.hash_process(ctx, tfm, state, &req, false, done)
    }

    /// Finish the computation; `done` receives the digest.
    pub fn hash_final(
        &self,
        ctx: ExecCtx,
        tfm: &HashTfm,
        state: &HashState,
        done: Done<Vec<u8>>,
    ) -> SecResult<u8> {
        self.hash_last(ctx, tfm, state, &HashRequest::default(), done)
    }

    /// Hash `req` and finish the computation.
    pub fn hash_finup(
        &self,
        ctx: ExecCtx,
        tfm: &HashTfm,
        state: &HashState,
        req: HashRequest,
        done: Done<Vec<u8>>,
    ) -> SecResult<u8> {
        self.hash_last(ctx, tfm, state, &req, done)
    }

    /// One-shot digest of `req`. Returns the state used, for inspection.
    pub fn hash_digest(
        &self,
        ctx: ExecCtx,
        tfm: &HashTfm,
        req: HashRequest,
        done: Done<Vec<u8>>,
    ) -> SecResult<(u8, HashState)> {
        let state = self.hash_init(tfm);
        let ch = self.hash_last(ctx, tfm, &state, &req, done)?;
        Ok((ch, state))
    }

    fn hash_last(
        &self,
        ctx: ExecCtx,
        tfm: &HashTfm,
        state: &HashState,
        req: &HashRequest,
        done: Done<Vec<u8>>,
    ) -> SecResult<u8> {
        self.hash_process(ctx, tfm, state, req, true, done)?
            .ok_or_else(|| SecError::InvalidArgument("final hash request not submitted".into()))
    }

    fn hash_process(
        &self,
        ctx: ExecCtx,
        tfm: &HashTfm,
        state: &HashState,
        req: &HashRequest,
        last: bool,
        done: Done<Vec<u8>>,
    ) -> SecResult<Option<u8>> {
        let block_size = state.block_size;
        let nbytes = req.nbytes;
        if req.src.total_len() < nbytes {
            return Err(SecError::InvalidArgument(format!(
                "hash source holds {} bytes, {nbytes} requested",
                req.src.total_len()
            )));
        }

        // Held until the request is accepted, so the callback sees the
        // committed state.
        let mut inner = state.lock();
        let mut next = inner.clone();
        next.last = last;

        let index = (next.count as usize) & (block_size - 1);
        next.count += nbytes as u64;

        if !last && index + nbytes < block_size {
            let data = req.src.read(&self.mapper, 0, nbytes)?;
            next.buf[index..index + nbytes].copy_from_slice(&data);
            *inner = next;
            return Ok(None);
        }

        let mut dma = self.dma_guard();

        // A buffered partial block goes in front of the new data.
        let psrc = if index > 0 {
            let buf = dma.map(&self.mapper, &next.buf[..index], DmaDirection::ToDevice)?;
            let head = ScatterList::single(buf.addr(), index as u32);
            if nbytes > 0 {
                head.chain(&req.src)
            } else {
                head
            }
        } else {
            req.src.clone()
        };

        let mut to_hash = index + nbytes;
        if !last {
            let later = to_hash & (block_size - 1);
            if later > 0 {
                let tail = req.src.read(&self.mapper, nbytes - later, later)?;
                next.bufnext[..later].copy_from_slice(&tail);
                to_hash -= later;
            }
            next.to_hash_later = later;
        }

        let layout = EdescLayout::for_request(&psrc, Destination::Digest, to_hash, 0, false)?;
        let mut edesc = self.edesc_guard(ctx, self.pool.alloc(ctx, layout, false)?);

        let mut hdr = tfm.alg.desc_hdr_template;
        hdr |= if last {
            HeaderFlags::MODE0_MDEU_PAD.bits()
        } else {
            HeaderFlags::MODE0_MDEU_CONT.bits()
        };
        if next.first && !next.swinit {
            hdr |= HeaderFlags::MODE0_MDEU_INIT.bits();
        }
        if tfm.is_hmac() && (next.first || last) {
            hdr |= HeaderFlags::MODE0_MDEU_HMAC.bits();
        }
        edesc.desc.hdr = hdr;

        if !next.first || next.swinit {
            edesc.desc.ptr[1] =
                dma.map(&self.mapper, &next.hw_context, DmaDirection::ToDevice)?;
        }
        next.first = false;
        next.swinit = false;

        edesc.desc.ptr[2] = dma.map(&self.mapper, &tfm.key, DmaDirection::ToDevice)?;
        dma.map_link_area(&self.mapper, &mut edesc)?;

        edesc.desc.ptr[3].len = to_hash as u16;
        link_sg(&mut edesc, 3, &psrc, layout.src_nents, 0, to_hash)?;

        let out_len = if last {
            tfm.digest_size
        } else {
            next.hw_context.len()
        };
        edesc.desc.ptr[5] = dma.map(&self.mapper, &vec![0; out_len], DmaDirection::FromDevice)?;
        sync_link_area(&self.mapper, &edesc)?;

        let out = edesc.desc.ptr[5].addr();
        let shared = Arc::clone(&state.inner);
        let mut maps = (*dma).clone();
        let callback: CompletionFn = Box::new(move |cctx, edesc, status| {
            let result = maps.take(cctx.mapper, out);
            maps.release(cctx.mapper);
            cctx.release(edesc);

            let mut st = shared.lock().unwrap_or_else(PoisonError::into_inner);
            let inner = &mut *st;
            if !inner.last && inner.to_hash_later > 0 {
                let later = inner.to_hash_later;
                inner.buf[..later].copy_from_slice(&inner.bufnext[..later]);
            }
            let status = status.and_then(|()| {
                result.map_err(|e| {
                    log::warn!("hash: output: {e}");
                    RequestError::Io
                })
            });
            match status {
                Ok(bytes) if !st.last => {
                    st.hw_context = bytes;
                    drop(st);
                    done(Ok(Vec::new()));
                }
                other => {
                    drop(st);
                    done(other);
                }
            }
        });

        let ch = self.submit_mapped(ctx, ScopeGuard::into_inner(edesc), dma, callback)?;
        *inner = next;
        Ok(Some(ch))
    }
}
