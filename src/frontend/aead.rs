// Freescale SEC (TALITOS) Descriptor Engine
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! AEAD front-end: single-pass cipher plus HMAC (`ipsec_esp` descriptors).
//!
//! | Pointer | Content |
//! |---------|---------|
//! | 0 | HMAC key |
//! | 1 | HMAC data: associated data followed by the IV |
//! | 2 | cipher IV |
//! | 3 | cipher key |
//! | 4 | cipher in, extent = ICV length |
//! | 5 | cipher out, extent = ICV length |
//! | 6 | IV out |
//!
//! Encryption appends the ICV to the ciphertext. Decryption checks the ICV
//! in hardware when the device can; otherwise the incoming ICV is stashed
//! and compared in software once the request completes.

use super::{link_sg, sync_link_area, Done};
use crate::affinity::ExecCtx;
use crate::algs::{AlgKind, RegisteredAlg, MAX_KEY_SIZE};
use crate::bus::{BusAddr, DmaDirection, DmaMapper, ScatterList};
use crate::config::Features;
use crate::descriptor::{DescPtr, DESC_PTR_LNKTBL_JUMP, DESC_PTR_LNKTBL_RETURN, DESC_PTR_SIZE};
use crate::edesc::{Destination, EdescLayout, ExtDesc};
use crate::engine::SecEngine;
use crate::error::{RequestError, SecError, SecResult};
use crate::header::HeaderFlags;
use crate::regs::RegisterIo;
use crate::submit::CompletionFn;
use scopeguard::ScopeGuard;
use std::sync::{Arc, Mutex, PoisonError};

/// Attribute type of the authenc key parameter.
const AUTHENC_KEYA_PARAM: u16 = 1;
const RTA_HDR_LEN: usize = 4;

#[inline]
const fn rta_align(len: usize) -> usize {
    (len + 3) & !3
}

/// Build an authenc key blob: a parameter attribute carrying the cipher key
/// length (big-endian), then the authentication key, then the cipher key.
pub fn authenc_key(auth_key: &[u8], enc_key: &[u8]) -> Vec<u8> {
    let rta_len = (RTA_HDR_LEN + 4) as u16;
    let mut blob = Vec::with_capacity(8 + auth_key.len() + enc_key.len());
    blob.extend_from_slice(&rta_len.to_ne_bytes());
    blob.extend_from_slice(&AUTHENC_KEYA_PARAM.to_ne_bytes());
    blob.extend_from_slice(&(enc_key.len() as u32).to_be_bytes());
    blob.extend_from_slice(auth_key);
    blob.extend_from_slice(enc_key);
    blob
}

/// AEAD transform: algorithm, keys, ICV length and the IV chain.
#[derive(Debug, Clone)]
pub struct AeadTfm {
    alg: RegisteredAlg,
    /// Authentication key followed by the cipher key.
    key: Vec<u8>,
    enckeylen: usize,
    authkeylen: usize,
    authsize: usize,
    ivsize: usize,
    max_authsize: usize,
    iv: Arc<Mutex<Vec<u8>>>,
}

impl AeadTfm {
    /// Transform for a registered AEAD. The ICV length defaults to the
    /// digest size.
    pub fn new(alg: RegisteredAlg) -> SecResult<Self> {
        let AlgKind::Aead {
            ivsize,
            max_authsize,
        } = alg.kind()
        else {
            return Err(SecError::Unsupported(format!("{} is not an AEAD", alg.name())));
        };
        Ok(Self {
            alg,
            key: Vec::new(),
            enckeylen: 0,
            authkeylen: 0,
            authsize: max_authsize,
            ivsize,
            max_authsize,
            iv: Arc::new(Mutex::new(vec![0; ivsize])),
        })
    }

    /// Set the keys from an authenc key blob (see [`authenc_key`]).
    pub fn set_key(&mut self, blob: &[u8]) -> SecResult<()> {
        let bad = || SecError::BadKeyLength(blob.len());

        if blob.len() < RTA_HDR_LEN {
            return Err(bad());
        }
        let rta_len = u16::from_ne_bytes([blob[0], blob[1]]) as usize;
        let rta_type = u16::from_ne_bytes([blob[2], blob[3]]);
        if rta_len < RTA_HDR_LEN || rta_len > blob.len() {
            return Err(bad());
        }
        if rta_type != AUTHENC_KEYA_PARAM || rta_len - RTA_HDR_LEN < 4 {
            return Err(bad());
        }
        let enckeylen = u32::from_be_bytes([blob[4], blob[5], blob[6], blob[7]]) as usize;

        let key = blob.get(rta_align(rta_len)..).ok_or_else(bad)?;
        if key.len() < enckeylen || key.len() > MAX_KEY_SIZE {
            return Err(bad());
        }

        self.key = key.to_vec();
        self.enckeylen = enckeylen;
        self.authkeylen = key.len() - enckeylen;
        Ok(())
    }

    /// Set the ICV length.
    pub fn set_authsize(&mut self, authsize: usize) -> SecResult<()> {
        if authsize > self.max_authsize {
            return Err(SecError::InvalidArgument(format!(
                "authsize {authsize} exceeds {}",
                self.max_authsize
            )));
        }
        self.authsize = authsize;
        Ok(())
    }

    /// Seed the IV chain used by [`SecEngine::aead_givencrypt`].
    pub fn set_iv(&self, iv: &[u8]) -> SecResult<()> {
        if iv.len() != self.ivsize {
            return Err(SecError::InvalidArgument(format!(
                "IV of {} bytes, expected {}",
                iv.len(),
                self.ivsize
            )));
        }
        self.iv
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .copy_from_slice(iv);
        Ok(())
    }

    /// IV for packet `seq`: the chained IV with `seq` folded into its
    /// first eight bytes, so consecutive packets never share an IV.
    pub fn generate_iv(&self, seq: u64) -> Vec<u8> {
        let mut giv = self.iv.lock().unwrap_or_else(PoisonError::into_inner).clone();
        for (b, s) in giv.iter_mut().zip(seq.to_be_bytes()) {
            *b ^= s;
        }
        giv
    }

    #[inline]
    pub fn alg(&self) -> &RegisteredAlg {
        &self.alg
    }

    #[inline]
    pub fn authsize(&self) -> usize {
        self.authsize
    }

    #[inline]
    pub fn ivsize(&self) -> usize {
        self.ivsize
    }

    #[inline]
    pub fn enckeylen(&self) -> usize {
        self.enckeylen
    }

    #[inline]
    pub fn authkeylen(&self) -> usize {
        self.authkeylen
    }

    fn auth_key(&self) -> &[u8] {
        &self.key[..self.authkeylen]
    }

    fn enc_key(&self) -> &[u8] {
        &self.key[self.authkeylen..]
    }
}

/// AEAD request.
///
/// For encryption `cryptlen` is the plaintext length and the destination
/// must have room for the ICV behind the ciphertext. For decryption
/// `cryptlen` includes the trailing ICV.
#[derive(Debug, Clone)]
pub struct AeadRequest {
    /// Associated data, authenticated but not encrypted.
    pub assoc: Vec<u8>,
    pub src: ScatterList,
    /// Separate destination; `None` operates in place.
    pub dst: Option<ScatterList>,
    pub cryptlen: usize,
    pub iv: Vec<u8>,
}

/// How a completed request is finished off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EspDone {
    /// Copy the generated ICV out of the link table area to the
    /// destination.
    Encrypt,
    /// The device compared the ICV.
    DecryptHwAuth,
    /// Compare the stashed ICV with the one in the destination.
    DecryptSwAuth,
}

impl<R: RegisterIo, M: DmaMapper> SecEngine<R, M> {
    /// Encrypt and authenticate `req`. Returns the channel the request runs
    /// on.
    pub fn aead_encrypt(
        &self,
        ctx: ExecCtx,
        tfm: &AeadTfm,
        req: AeadRequest,
        done: Done<()>,
    ) -> SecResult<u8> {
        let hdr = tfm.alg.desc_hdr_template | HeaderFlags::MODE0_ENCRYPT.bits();
        let iv = req.iv.clone();
        self.ipsec_esp(ctx, tfm, req, iv, hdr, false, EspDone::Encrypt, done)
    }

    /// Encrypt `req` with an IV generated from the transform's IV chain and
    /// `seq`. `done` receives the generated IV.
    pub fn aead_givencrypt(
        &self,
        ctx: ExecCtx,
        tfm: &AeadTfm,
        req: AeadRequest,
        seq: u64,
        done: Done<Vec<u8>>,
    ) -> SecResult<u8> {
        let hdr = tfm.alg.desc_hdr_template | HeaderFlags::MODE0_ENCRYPT.bits();
        let giv = tfm.generate_iv(seq);
        let out = giv.clone();
        let done: Done<()> = Box::new(move |status| done(status.map(|()| out)));
        self.ipsec_esp(ctx, tfm, req, giv, hdr, false, EspDone::Encrypt, done)
    }

    /// Decrypt and verify `req`. An ICV mismatch completes with
    /// [`RequestError::BadMessage`].
    pub fn aead_decrypt(
        &self,
        ctx: ExecCtx,
        tfm: &AeadTfm,
        mut req: AeadRequest,
        done: Done<()>,
    ) -> SecResult<u8> {
        req.cryptlen = req
            .cryptlen
            .checked_sub(tfm.authsize)
            .ok_or_else(|| SecError::InvalidArgument("input shorter than the ICV".into()))?;

        let dest = req.dst.as_ref().map_or(Destination::InPlace, Destination::Separate);
        let layout = EdescLayout::for_request(&req.src, dest, req.cryptlen, tfm.authsize, true)?;
        let hw_auth = self.has(Features::HW_AUTH_CHECK)
            && ((layout.src_nents == 0 && layout.dst_nents == 0)
                || self.has(Features::SRC_LINK_TBL_LEN_INCLUDES_EXTENT));

        let iv = req.iv.clone();
        if hw_auth {
            let hdr = tfm.alg.desc_hdr_template
                | HeaderFlags::DIR_INBOUND.bits()
                | HeaderFlags::MODE1_MDEU_CICV.bits();
            self.ipsec_esp(ctx, tfm, req, iv, hdr, true, EspDone::DecryptHwAuth, done)
        } else {
            let hdr = tfm.alg.desc_hdr_template | HeaderFlags::DIR_INBOUND.bits();
            self.ipsec_esp(ctx, tfm, req, iv, hdr, true, EspDone::DecryptSwAuth, done)
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn ipsec_esp(
        &self,
        ctx: ExecCtx,
        tfm: &AeadTfm,
        req: AeadRequest,
        iv: Vec<u8>,
        hdr: u32,
        icv_stashing: bool,
        finish: EspDone,
        done: Done<()>,
    ) -> SecResult<u8> {
        if tfm.key.is_empty() {
            return Err(SecError::InvalidArgument("AEAD key not set".into()));
        }
        if iv.len() != tfm.ivsize {
            return Err(SecError::InvalidArgument(format!(
                "IV of {} bytes, expected {}",
                iv.len(),
                tfm.ivsize
            )));
        }

        let cryptlen = req.cryptlen;
        let authsize = tfm.authsize;
        let dest = req.dst.as_ref().map_or(Destination::InPlace, Destination::Separate);
        let layout = EdescLayout::for_request(&req.src, dest, cryptlen, authsize, icv_stashing)?;
        let mut edesc = self.edesc_guard(ctx, self.pool.alloc(ctx, layout, false)?);
        let mut dma = self.dma_guard();
        edesc.desc.hdr = hdr;

        if finish == EspDone::DecryptSwAuth {
            // Stash the incoming ICV before the device can overwrite it.
            let icv = req.src.read(&self.mapper, cryptlen, authsize)?;
            edesc.icv.copy_from_slice(&icv);
        }

        let mut hmac_data = req.assoc.clone();
        hmac_data.extend_from_slice(&iv);

        edesc.desc.ptr[0] = dma.map(&self.mapper, tfm.auth_key(), DmaDirection::ToDevice)?;
        edesc.desc.ptr[1] = dma.map(&self.mapper, &hmac_data, DmaDirection::ToDevice)?;
        edesc.desc.ptr[2] = dma.map(&self.mapper, &iv, DmaDirection::ToDevice)?;
        edesc.desc.ptr[3] = dma.map(&self.mapper, tfm.enc_key(), DmaDirection::ToDevice)?;
        dma.map_link_area(&self.mapper, &mut edesc)?;

        // Cipher in. The extent is the ICV behind the data; with the device
        // checking the ICV the link table must cover it too.
        edesc.desc.ptr[4].len = cryptlen as u16;
        edesc.desc.ptr[4].j_extent = authsize as u8;
        let src_tbl_len = if hdr & HeaderFlags::MODE1_MDEU_CICV.bits() != 0 {
            cryptlen + authsize
        } else {
            cryptlen
        };
        let mut sg_count = link_sg(&mut edesc, 4, &req.src, layout.src_nents, 0, src_tbl_len)?;

        // Cipher out.
        edesc.desc.ptr[5].len = cryptlen as u16;
        edesc.desc.ptr[5].j_extent = authsize as u8;
        let dst = match &req.dst {
            Some(dst) => {
                sg_count = layout.dst_nents.max(1);
                dst
            }
            None => &req.src,
        };
        if sg_count == 1 {
            edesc.desc.ptr[5].set_addr(dst.first_addr());
        } else {
            self.esp_dst_link_tbl(&mut edesc, dst, cryptlen, authsize)?;
        }

        edesc.desc.ptr[6] = dma.map(&self.mapper, &vec![0; tfm.ivsize], DmaDirection::FromDevice)?;
        sync_link_area(&self.mapper, &edesc)?;

        let iv_out = edesc.desc.ptr[6].addr();
        let link_area = edesc.dma_link_tbl;
        let icv_offset = edesc.icv_offset();
        let chain_iv = Arc::clone(&tfm.iv);
        let dst = dst.clone();
        let mut maps = (*dma).clone();

        let callback: CompletionFn = Box::new(move |cctx, edesc, status| {
            let mapper = cctx.mapper;
            match maps.take(mapper, iv_out) {
                Ok(iv) if status.is_ok() => {
                    *chain_iv.lock().unwrap_or_else(PoisonError::into_inner) = iv;
                }
                Ok(_) => {}
                Err(e) => log::warn!("aead: IV out: {e}"),
            }

            // ICV area: behind the link table, or the stash without one.
            let icv_area = match link_area {
                Some(addr) => maps
                    .take(mapper, addr)
                    .map(|bytes| bytes[icv_offset..icv_offset + authsize].to_vec()),
                None => Ok(edesc.icv.clone()),
            };
            maps.release(mapper);

            let status = status.and_then(|()| match finish {
                EspDone::Encrypt => match (link_area, icv_area) {
                    (Some(_), Ok(icv)) => dst
                        .write(mapper, cryptlen, &icv)
                        .map_err(|_| RequestError::Io),
                    (Some(_), Err(_)) => Err(RequestError::Io),
                    (None, _) => Ok(()),
                },
                EspDone::DecryptHwAuth => {
                    if edesc.status().icv_passed() {
                        Ok(())
                    } else {
                        Err(RequestError::BadMessage)
                    }
                }
                EspDone::DecryptSwAuth => {
                    let icv = icv_area.map_err(|_| RequestError::Io)?;
                    let out = dst
                        .read(mapper, cryptlen, authsize)
                        .map_err(|_| RequestError::Io)?;
                    if icv == out {
                        Ok(())
                    } else {
                        Err(RequestError::BadMessage)
                    }
                }
            });

            cctx.release(edesc);
            done(status);
        });

        self.submit_mapped(ctx, ScopeGuard::into_inner(edesc), dma, callback)
    }

    /// Destination link table: the data segments, then one entry for the
    /// ICV that points at the ICV area behind the table.
    fn esp_dst_link_tbl(
        &self,
        edesc: &mut ExtDesc,
        dst: &ScatterList,
        cryptlen: usize,
        authsize: usize,
    ) -> SecResult<()> {
        let base: BusAddr = edesc
            .dma_link_tbl
            .ok_or_else(|| SecError::InvalidArgument("link table not mapped".into()))?;
        let layout = edesc.layout;
        let start = layout.src_nents + 1;
        let nents = layout.dst_nents.max(1).min(dst.segments().len());

        let count = crate::descriptor::sg_to_link_tbl(
            &dst.segments()[..nents],
            cryptlen,
            &mut edesc.link_tbl[start..],
        )?;
        if count == 0 {
            return Err(SecError::InvalidArgument("empty destination".into()));
        }

        let icv_addr = base.offset((layout.src_nents + layout.dst_nents + 2) * DESC_PTR_SIZE);
        let tbl = &mut edesc.link_tbl[start..];
        tbl[count - 1].j_extent = 0;
        let mut icv_entry = DescPtr::new(icv_addr, authsize as u16);
        icv_entry.j_extent = DESC_PTR_LNKTBL_RETURN;
        tbl[count] = icv_entry;

        let ptr = &mut edesc.desc.ptr[5];
        ptr.j_extent |= DESC_PTR_LNKTBL_JUMP;
        ptr.set_addr(base.offset(start * DESC_PTR_SIZE));
        Ok(())
    }
}
