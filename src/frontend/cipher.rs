// Freescale SEC (TALITOS) Descriptor Engine
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Block cipher front-end (`common_nonsnoop` descriptors).
//!
//! | Pointer | Content |
//! |---------|---------|
//! | 0 | empty |
//! | 1 | IV in |
//! | 2 | key |
//! | 3 | data in |
//! | 4 | data out |
//! | 5 | IV out |
//! | 6 | empty |

use super::{link_sg, sync_link_area, Done};
use crate::affinity::ExecCtx;
use crate::algs::{AlgKind, RegisteredAlg, MAX_KEY_SIZE};
use crate::bus::{DmaDirection, DmaMapper, ScatterList};
use crate::edesc::{Destination, EdescLayout};
use crate::engine::SecEngine;
use crate::error::{SecError, SecResult};
use crate::header::HeaderFlags;
use crate::regs::RegisterIo;
use crate::submit::CompletionFn;
use scopeguard::ScopeGuard;
use std::sync::{Arc, Mutex, PoisonError};

/// Block cipher transform: algorithm, key and chaining IV.
#[derive(Debug, Clone)]
pub struct CipherTfm {
    alg: RegisteredAlg,
    key: Vec<u8>,
    ivsize: usize,
    min_keysize: usize,
    max_keysize: usize,
    iv: Arc<Mutex<Vec<u8>>>,
}

impl CipherTfm {
    /// Transform for a registered block cipher.
    pub fn new(alg: RegisteredAlg) -> SecResult<Self> {
        let AlgKind::Cipher {
            ivsize,
            min_keysize,
            max_keysize,
        } = alg.kind()
        else {
            return Err(SecError::Unsupported(format!("{} is not a cipher", alg.name())));
        };
        Ok(Self {
            alg,
            key: Vec::new(),
            ivsize,
            min_keysize,
            max_keysize,
            iv: Arc::new(Mutex::new(vec![0; ivsize])),
        })
    }

    pub fn set_key(&mut self, key: &[u8]) -> SecResult<()> {
        if key.len() > MAX_KEY_SIZE
            || key.len() < self.min_keysize
            || key.len() > self.max_keysize
        {
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
    pub fn ivsize(&self) -> usize {
        self.ivsize
    }

    /// IV the device wrote back after the last successful request.
    pub fn last_iv(&self) -> Vec<u8> {
        self.iv.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Block cipher request.
#[derive(Debug, Clone)]
pub struct CipherRequest {
    pub src: ScatterList,
    /// Separate destination; `None` operates in place.
    pub dst: Option<ScatterList>,
    pub nbytes: usize,
    pub iv: Vec<u8>,
}

impl<R: RegisterIo, M: DmaMapper> SecEngine<R, M> {
    /// Encrypt `req` with `tfm`. Returns the channel the request runs on.
    pub fn cipher_encrypt(
        &self,
        ctx: ExecCtx,
        tfm: &CipherTfm,
        req: CipherRequest,
        done: Done<()>,
    ) -> SecResult<u8> {
        let hdr = tfm.alg.desc_hdr_template | HeaderFlags::MODE0_ENCRYPT.bits();
        self.common_nonsnoop(ctx, tfm, req, hdr, done)
    }

    /// Decrypt `req` with `tfm`. Returns the channel the request runs on.
    pub fn cipher_decrypt(
        &self,
        ctx: ExecCtx,
        tfm: &CipherTfm,
        req: CipherRequest,
        done: Done<()>,
    ) -> SecResult<u8> {
        let hdr = tfm.alg.desc_hdr_template | HeaderFlags::DIR_INBOUND.bits();
        self.common_nonsnoop(ctx, tfm, req, hdr, done)
    }

    fn common_nonsnoop(
        &self,
        ctx: ExecCtx,
        tfm: &CipherTfm,
        req: CipherRequest,
        hdr: u32,
        done: Done<()>,
    ) -> SecResult<u8> {
        if tfm.key.is_empty() {
            return Err(SecError::InvalidArgument("cipher key not set".into()));
        }
        if req.iv.len() != tfm.ivsize {
            return Err(SecError::InvalidArgument(format!(
                "IV of {} bytes, expected {}",
                req.iv.len(),
                tfm.ivsize
            )));
        }

        let dest = req.dst.as_ref().map_or(Destination::InPlace, Destination::Separate);
        let layout = EdescLayout::for_request(&req.src, dest, req.nbytes, 0, false)?;
        let mut edesc = self.edesc_guard(ctx, self.pool.alloc(ctx, layout, false)?);
        let mut dma = self.dma_guard();
        let len = req.nbytes as u16;

        edesc.desc.hdr = hdr;
        edesc.desc.ptr[1] = dma.map(&self.mapper, &req.iv, DmaDirection::ToDevice)?;
        edesc.desc.ptr[2] = dma.map(&self.mapper, &tfm.key, DmaDirection::ToDevice)?;
        dma.map_link_area(&self.mapper, &mut edesc)?;

        // cipher in
        edesc.desc.ptr[3].len = len;
        link_sg(&mut edesc, 3, &req.src, layout.src_nents, 0, req.nbytes)?;

        // cipher out
        let (dst, dst_nents) = match &req.dst {
            Some(dst) => (dst, layout.dst_nents),
            None => (&req.src, layout.src_nents),
        };
        edesc.desc.ptr[4].len = len;
        link_sg(&mut edesc, 4, dst, dst_nents, layout.src_nents + 1, req.nbytes)?;

        edesc.desc.ptr[5] = dma.map(&self.mapper, &vec![0; tfm.ivsize], DmaDirection::FromDevice)?;
        sync_link_area(&self.mapper, &edesc)?;

        let iv_out = edesc.desc.ptr[5].addr();
        let chain_iv = Arc::clone(&tfm.iv);
        let mut maps = (*dma).clone();
        let callback: CompletionFn = Box::new(move |cctx, edesc, status| {
            match maps.take(cctx.mapper, iv_out) {
                Ok(iv) if status.is_ok() => {
                    *chain_iv.lock().unwrap_or_else(PoisonError::into_inner) = iv;
                }
                Ok(_) => {}
                Err(e) => log::warn!("cipher: IV out: {e}"),
            }
            maps.release(cctx.mapper);
            cctx.release(edesc);
            done(status);
        });

        self.submit_mapped(ctx, ScopeGuard::into_inner(edesc), dma, callback)
    }
}
