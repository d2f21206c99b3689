// Freescale SEC (TALITOS) Descriptor Engine
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Cipher, AEAD and hash requests end to end on the simulated SEC.
//!
//! The simulated device runs toy transforms (xor "cipher", xor-fold "ICV",
//! byte-sum "hash") so that the tests can check where data was read from
//! and written to.

mod common;

use common::{gather, icv, pattern, rig, scatter, xor, Rig};
use std::sync::{Arc, Mutex};
use talitos_rs::algs::{find, register};
use talitos_rs::descriptor::DESC_PTR_LNKTBL_JUMP;
use talitos_rs::frontend::{
    authenc_key, AeadRequest, AeadTfm, CipherRequest, CipherTfm, Done, HashRequest, HashTfm,
};
use talitos_rs::header::HeaderFlags;
use talitos_rs::sim::SimBus;
use talitos_rs::{ExecCtx, Features, HwDesc, RequestError, SecConfig, SecError};

const CTX: ExecCtx = ExecCtx(0);

type Outcome<T> = Arc<Mutex<Option<Result<T, RequestError>>>>;

fn outcome<T: Send + 'static>() -> (Done<T>, Outcome<T>) {
    let slot: Outcome<T> = Arc::new(Mutex::new(None));
    let out = Arc::clone(&slot);
    let done: Done<T> = Box::new(move |status| {
        assert!(out.lock().unwrap().replace(status).is_none(), "completed twice");
    });
    (done, slot)
}

fn take<T>(slot: &Outcome<T>) -> Result<T, RequestError> {
    slot.lock().unwrap().take().expect("request completed")
}

/// Let the device finish channel `ch` and run the completions.
fn finish(rig: &Rig, ch: u8) {
    rig.sec.complete_all(ch);
    rig.engine.drain(CTX, ch, None, false, usize::MAX);
}

fn has(desc: &HwDesc, flag: HeaderFlags) -> bool {
    desc.hdr & flag.bits() == flag.bits()
}

// ============================================================================
// Block cipher
// ============================================================================

fn cipher_device(rig: &Rig) {
    rig.sec.set_processor(Box::new(|bus: &SimBus, desc: &HwDesc| {
        let key = gather(bus, &desc.ptr[2])[0];
        let out = xor(&gather(bus, &desc.ptr[3]), key);
        scatter(bus, &desc.ptr[4], &out);
        scatter(bus, &desc.ptr[5], &out[out.len() - 16..]);
    }));
}

fn aes(rig: &Rig) -> CipherTfm {
    let algs = register(rig.engine.config());
    let mut tfm = CipherTfm::new(find(&algs, "cbc(aes)").unwrap()).unwrap();
    tfm.set_key(&[0x5a; 16]).unwrap();
    tfm
}

#[test]
fn test_cipher_in_place() {
    let rig = rig(SecConfig::default());
    cipher_device(&rig);
    let tfm = aes(&rig);

    let plain = pattern(64);
    let src = rig.bus.map_buffer(&plain).unwrap();
    let req = CipherRequest {
        src: src.clone(),
        dst: None,
        nbytes: 64,
        iv: vec![0; 16],
    };
    let (done, slot) = outcome();
    let ch = rig.engine.cipher_encrypt(CTX, &tfm, req, done).unwrap();

    let desc = rig.bus.descriptor(rig.sec.pending(ch)[0]).unwrap();
    assert!(has(&desc, HeaderFlags::MODE0_ENCRYPT));
    assert_eq!(desc.ptr[0].len, 0);
    assert_eq!(desc.ptr[6].len, 0);

    finish(&rig, ch);
    assert_eq!(take(&slot), Ok(()));
    let cipher = rig.bus.read_list(&src).unwrap();
    assert_eq!(cipher, xor(&plain, 0x5a));
    assert_eq!(tfm.last_iv(), cipher[48..].to_vec());
    // Only the caller's buffer is still mapped.
    assert_eq!(rig.bus.live_mappings(), 1);
}

#[test]
fn test_cipher_scattered_to_separate_destination() {
    let rig = rig(SecConfig::default());
    cipher_device(&rig);
    let tfm = aes(&rig);

    let plain = pattern(80);
    let src = rig.bus.map_chunks(&plain, 32).unwrap();
    let dst = rig.bus.map_chunks(&[0; 80], 16).unwrap();
    let req = CipherRequest {
        src,
        dst: Some(dst.clone()),
        nbytes: 80,
        iv: vec![1; 16],
    };
    let (done, slot) = outcome();
    let ch = rig.engine.cipher_decrypt(CTX, &tfm, req, done).unwrap();

    let desc = rig.bus.descriptor(rig.sec.pending(ch)[0]).unwrap();
    assert!(has(&desc, HeaderFlags::DIR_INBOUND));
    assert_ne!(desc.ptr[3].j_extent & DESC_PTR_LNKTBL_JUMP, 0);
    assert_ne!(desc.ptr[4].j_extent & DESC_PTR_LNKTBL_JUMP, 0);

    finish(&rig, ch);
    assert_eq!(take(&slot), Ok(()));
    assert_eq!(rig.bus.read_list(&dst).unwrap(), xor(&plain, 0x5a));
    assert_eq!(rig.bus.live_mappings(), 3 + 5);
}

#[test]
fn test_cipher_deferral_unmaps_everything() {
    let rig = rig(SecConfig::default().with_channels(1).with_fifo_depth(1));
    let tfm = aes(&rig);
    let src = rig.bus.map_buffer(&pattern(32)).unwrap();
    let req = CipherRequest {
        src,
        dst: None,
        nbytes: 32,
        iv: vec![0; 16],
    };

    let (done, _first) = outcome();
    rig.engine.cipher_encrypt(CTX, &tfm, req.clone(), done).unwrap();
    let live = rig.bus.live_mappings();

    let (done, second) = outcome();
    let err = rig.engine.cipher_encrypt(CTX, &tfm, req, done).unwrap_err();
    assert!(matches!(err, SecError::Busy(0)));
    assert_eq!(rig.bus.live_mappings(), live);
    assert!(second.lock().unwrap().is_none());
}

#[test]
fn test_cipher_rejects_bad_requests() {
    let rig = rig(SecConfig::default());
    let algs = register(rig.engine.config());
    let unkeyed = CipherTfm::new(find(&algs, "cbc(des3_ede)").unwrap()).unwrap();
    let src = rig.bus.map_buffer(&pattern(16)).unwrap();
    let req = CipherRequest {
        src,
        dst: None,
        nbytes: 16,
        iv: vec![0; 8],
    };
    let (done, _) = outcome();
    assert!(rig.engine.cipher_encrypt(CTX, &unkeyed, req.clone(), done).is_err());

    let tfm = aes(&rig);
    let (done, _) = outcome();
    assert!(rig.engine.cipher_encrypt(CTX, &tfm, req, done).is_err());
    assert_eq!(rig.bus.live_mappings(), 1);
}

// ============================================================================
// AEAD
// ============================================================================

const AUTHSIZE: usize = 20;

fn aead_device(rig: &Rig) {
    rig.sec.set_processor(Box::new(|bus: &SimBus, desc: &HwDesc| {
        let key = gather(bus, &desc.ptr[3])[0];
        let authsize = (desc.ptr[5].j_extent & !DESC_PTR_LNKTBL_JUMP) as usize;
        let input = gather(bus, &desc.ptr[4]);
        let out = xor(&input, key);
        let inbound = has(desc, HeaderFlags::DIR_INBOUND);

        let mut written = out.clone();
        if !has(desc, HeaderFlags::MODE1_MDEU_CICV) {
            let ciphertext = if inbound { &input } else { &out };
            written.extend(icv(ciphertext, authsize));
        }
        scatter(bus, &desc.ptr[5], &written);
        scatter(bus, &desc.ptr[6], &[0xee; 16]);
    }));
}

fn authenc(rig: &Rig) -> AeadTfm {
    let algs = register(rig.engine.config());
    let mut tfm = AeadTfm::new(find(&algs, "authenc(hmac(sha1),cbc(aes))").unwrap()).unwrap();
    tfm.set_key(&authenc_key(&[0x11; 20], &[0x3c; 16])).unwrap();
    tfm
}

fn aead_req(src: talitos_rs::ScatterList, cryptlen: usize) -> AeadRequest {
    AeadRequest {
        assoc: vec![0xa0; 8],
        src,
        dst: None,
        cryptlen,
        iv: vec![7; 16],
    }
}

/// Encrypt `plain` in place and return the buffer, ciphertext plus ICV.
fn seal(rig: &Rig, tfm: &AeadTfm, plain: &[u8], chunk: usize) -> talitos_rs::ScatterList {
    let mut buf = plain.to_vec();
    buf.resize(plain.len() + AUTHSIZE, 0);
    let src = rig.bus.map_chunks(&buf, chunk).unwrap();
    let (done, slot) = outcome();
    let ch = rig
        .engine
        .aead_encrypt(CTX, tfm, aead_req(src.clone(), plain.len()), done)
        .unwrap();
    finish(rig, ch);
    assert_eq!(take(&slot), Ok(()));
    src
}

#[test]
fn test_aead_encrypt_appends_icv() {
    let rig = rig(SecConfig::default());
    aead_device(&rig);
    let tfm = authenc(&rig);
    let plain = pattern(48);

    let src = seal(&rig, &tfm, &plain, 4096);
    let sealed = rig.bus.read_list(&src).unwrap();
    let cipher = xor(&plain, 0x3c);
    assert_eq!(&sealed[..48], &cipher[..]);
    assert_eq!(&sealed[48..], &icv(&cipher, AUTHSIZE)[..]);
    assert_eq!(rig.bus.live_mappings(), 1);
}

#[test]
fn test_aead_encrypt_scattered_copies_icv_out_of_link_area() {
    let rig = rig(SecConfig::default());
    aead_device(&rig);
    let tfm = authenc(&rig);
    let plain = pattern(52);

    // 72 bytes in 32-byte chunks: the ICV straddles the last two.
    let src = seal(&rig, &tfm, &plain, 32);
    let sealed = rig.bus.read_list(&src).unwrap();
    let cipher = xor(&plain, 0x3c);
    assert_eq!(&sealed[..52], &cipher[..]);
    assert_eq!(&sealed[52..], &icv(&cipher, AUTHSIZE)[..]);
    assert_eq!(rig.bus.live_mappings(), 3);
}

#[test]
fn test_aead_decrypt_hw_icv_check() {
    let rig = rig(SecConfig::default());
    aead_device(&rig);
    let tfm = authenc(&rig);
    let plain = pattern(48);
    let src = seal(&rig, &tfm, &plain, 32);

    let (done, slot) = outcome();
    let ch = rig
        .engine
        .aead_decrypt(CTX, &tfm, aead_req(src.clone(), 48 + AUTHSIZE), done)
        .unwrap();
    let desc = rig.bus.descriptor(rig.sec.pending(ch)[0]).unwrap();
    assert!(has(&desc, HeaderFlags::MODE1_MDEU_CICV));
    finish(&rig, ch);
    assert_eq!(take(&slot), Ok(()));
    assert_eq!(&rig.bus.read_list(&src).unwrap()[..48], &plain[..]);

    // Same request, device reports a mismatch.
    let src = seal(&rig, &tfm, &plain, 32);
    rig.sec.set_icv_fail(true);
    let (done, slot) = outcome();
    let ch = rig
        .engine
        .aead_decrypt(CTX, &tfm, aead_req(src, 48 + AUTHSIZE), done)
        .unwrap();
    finish(&rig, ch);
    assert_eq!(take(&slot), Err(RequestError::BadMessage));
}

#[test]
fn test_aead_decrypt_sw_icv_check() {
    let rig = rig(SecConfig::default().with_features(Features::SHA224_HWINIT));
    aead_device(&rig);
    let tfm = authenc(&rig);
    let plain = pattern(48);

    let src = seal(&rig, &tfm, &plain, 4096);
    let (done, slot) = outcome();
    let ch = rig
        .engine
        .aead_decrypt(CTX, &tfm, aead_req(src.clone(), 48 + AUTHSIZE), done)
        .unwrap();
    let desc = rig.bus.descriptor(rig.sec.pending(ch)[0]).unwrap();
    assert!(!has(&desc, HeaderFlags::MODE1_MDEU_CICV));
    finish(&rig, ch);
    assert_eq!(take(&slot), Ok(()));
    assert_eq!(&rig.bus.read_list(&src).unwrap()[..48], &plain[..]);

    // Flip one ICV byte: the stashed ICV no longer matches.
    let src = seal(&rig, &tfm, &plain, 4096);
    let mut sealed = rig.bus.read_list(&src).unwrap();
    sealed[50] ^= 0xff;
    src.write(&*rig.bus, 0, &sealed).unwrap();
    let (done, slot) = outcome();
    let ch = rig
        .engine
        .aead_decrypt(CTX, &tfm, aead_req(src, 48 + AUTHSIZE), done)
        .unwrap();
    finish(&rig, ch);
    assert_eq!(take(&slot), Err(RequestError::BadMessage));
}

#[test]
fn test_aead_givencrypt_delivers_iv() {
    let rig = rig(SecConfig::default());
    aead_device(&rig);
    let tfm = authenc(&rig);
    tfm.set_iv(&[0x40; 16]).unwrap();

    let mut buf = pattern(32);
    buf.resize(32 + AUTHSIZE, 0);
    let src = rig.bus.map_buffer(&buf).unwrap();
    let (done, slot) = outcome();
    let ch = rig
        .engine
        .aead_givencrypt(CTX, &tfm, aead_req(src, 32), 5, done)
        .unwrap();
    let desc = rig.bus.descriptor(rig.sec.pending(ch)[0]).unwrap();
    finish(&rig, ch);

    let giv = take(&slot).unwrap();
    let mut expected = vec![0x40; 16];
    expected[7] ^= 5;
    assert_eq!(giv, expected);
    assert_eq!(desc.ptr[2].len, 16);
    // The device's IV out seeds the next generated IV.
    assert_eq!(tfm.generate_iv(0), vec![0xee; 16]);
}

#[test]
fn test_aead_rejects_short_input() {
    let rig = rig(SecConfig::default());
    let tfm = authenc(&rig);
    let src = rig.bus.map_buffer(&[0; 16]).unwrap();
    let (done, _) = outcome();
    let err = rig.engine.aead_decrypt(CTX, &tfm, aead_req(src, 16), done);
    assert!(matches!(err, Err(SecError::InvalidArgument(_))));
}

// ============================================================================
// Hash
// ============================================================================

type Headers = Arc<Mutex<Vec<u32>>>;

/// Byte-sum "hash": the context carries the running sum in its first
/// eight bytes.
fn hash_device(rig: &Rig) -> Headers {
    let headers: Headers = Arc::default();
    let seen = Arc::clone(&headers);
    rig.sec.set_processor(Box::new(move |bus: &SimBus, desc: &HwDesc| {
        seen.lock().unwrap().push(desc.hdr);
        let mut sum = 0u64;
        if desc.ptr[1].len > 0 {
            let ctx = gather(bus, &desc.ptr[1]);
            sum = u64::from_be_bytes(ctx[..8].try_into().unwrap());
        }
        sum += gather(bus, &desc.ptr[3]).iter().map(|&b| b as u64).sum::<u64>();
        let mut out = vec![0u8; desc.ptr[5].len as usize];
        out[..8].copy_from_slice(&sum.to_be_bytes());
        scatter(bus, &desc.ptr[5], &out);
    }));
    headers
}

fn byte_sum(data: &[u8]) -> Vec<u8> {
    data.iter().map(|&b| b as u64).sum::<u64>().to_be_bytes().to_vec()
}

fn sha1(rig: &Rig) -> HashTfm {
    let algs = register(rig.engine.config());
    HashTfm::new(find(&algs, "sha1").unwrap()).unwrap()
}

#[test]
fn test_hash_update_then_final() {
    let rig = rig(SecConfig::default());
    let headers = hash_device(&rig);
    let tfm = sha1(&rig);
    let state = rig.engine.hash_init(&tfm);
    let data = pattern(100);

    let src = rig.bus.map_buffer(&data).unwrap();
    let (done, slot) = outcome();
    let ch = rig
        .engine
        .hash_update(CTX, &tfm, &state, HashRequest { src, nbytes: 100 }, done)
        .unwrap()
        .expect("a full block is submitted");
    finish(&rig, ch);
    assert_eq!(take(&slot), Ok(()));
    assert_eq!(state.buffered(), 36);
    assert_eq!(&state.context()[..8], &byte_sum(&data[..64])[..]);

    let (done, slot) = outcome();
    let ch = rig.engine.hash_final(CTX, &tfm, &state, done).unwrap();
    finish(&rig, ch);
    let digest = take(&slot).unwrap();
    assert_eq!(digest.len(), 20);
    assert_eq!(&digest[..8], &byte_sum(&data)[..]);

    let headers = headers.lock().unwrap();
    let init = HeaderFlags::MODE0_MDEU_INIT.bits();
    let pad = HeaderFlags::MODE0_MDEU_PAD.bits();
    let cont = HeaderFlags::MODE0_MDEU_CONT.bits();
    assert_eq!(headers[0] & (init | pad | cont), init | cont);
    assert_eq!(headers[1] & (init | pad | cont), pad);
    assert_eq!(rig.bus.live_mappings(), 1);
}

#[test]
fn test_hash_small_updates_only_buffer() {
    let rig = rig(SecConfig::default());
    let headers = hash_device(&rig);
    let tfm = sha1(&rig);
    let state = rig.engine.hash_init(&tfm);
    let data = pattern(130);

    // 10 bytes are buffered, then 120 more arrive in 30-byte chunks and go
    // out behind the buffered bytes through a link table.
    let head = rig.bus.map_buffer(&data[..10]).unwrap();
    let (done, _) = outcome();
    let res = rig
        .engine
        .hash_update(CTX, &tfm, &state, HashRequest { src: head, nbytes: 10 }, done)
        .unwrap();
    assert_eq!(res, None);
    assert!(headers.lock().unwrap().is_empty());

    let tail = rig.bus.map_chunks(&data[10..], 30).unwrap();
    let (done, slot) = outcome();
    let ch = rig
        .engine
        .hash_finup(CTX, &tfm, &state, HashRequest { src: tail, nbytes: 120 }, done)
        .unwrap();
    let desc = rig.bus.descriptor(rig.sec.pending(ch)[0]).unwrap();
    assert_ne!(desc.ptr[3].j_extent & DESC_PTR_LNKTBL_JUMP, 0);
    assert_eq!(desc.ptr[3].len, 130);
    finish(&rig, ch);
    assert_eq!(&take(&slot).unwrap()[..8], &byte_sum(&data)[..]);
}

#[test]
fn test_hash_digest_matches_incremental() {
    let rig = rig(SecConfig::default());
    hash_device(&rig);
    let tfm = sha1(&rig);
    let data = pattern(100);
    let src = rig.bus.map_buffer(&data).unwrap();

    let (done, slot) = outcome();
    let (ch, state) = rig
        .engine
        .hash_digest(CTX, &tfm, HashRequest { src, nbytes: 100 }, done)
        .unwrap();
    finish(&rig, ch);
    assert_eq!(&take(&slot).unwrap()[..8], &byte_sum(&data)[..]);
    assert_eq!(state.count(), 100);
}

#[test]
fn test_hmac_flag_on_first_and_last_only() {
    let rig = rig(SecConfig::default());
    let headers = hash_device(&rig);
    let mut tfm = sha1(&rig);
    tfm.set_key(&[0x0b; 20]).unwrap();
    let state = rig.engine.hash_init(&tfm);

    for _ in 0..2 {
        let src = rig.bus.map_buffer(&pattern(64)).unwrap();
        let (done, slot) = outcome();
        let ch = rig
            .engine
            .hash_update(CTX, &tfm, &state, HashRequest { src, nbytes: 64 }, done)
            .unwrap()
            .unwrap();
        finish(&rig, ch);
        assert_eq!(take(&slot), Ok(()));
    }
    let (done, slot) = outcome();
    let ch = rig.engine.hash_final(CTX, &tfm, &state, done).unwrap();
    finish(&rig, ch);
    assert!(take(&slot).is_ok());

    let hmac = HeaderFlags::MODE0_MDEU_HMAC.bits();
    let flags: Vec<bool> = headers.lock().unwrap().iter().map(|h| h & hmac != 0).collect();
    assert_eq!(flags, vec![true, false, true]);
}

#[test]
fn test_sha224_software_init_passes_context() {
    let rig = rig(SecConfig::default().with_features(Features::HW_AUTH_CHECK));
    let headers = hash_device(&rig);
    let algs = register(rig.engine.config());
    let tfm = HashTfm::new(find(&algs, "sha224").unwrap()).unwrap();
    let src = rig.bus.map_buffer(&pattern(64)).unwrap();

    let (done, slot) = outcome();
    let (ch, _) = rig
        .engine
        .hash_digest(CTX, &tfm, HashRequest { src, nbytes: 64 }, done)
        .unwrap();
    let desc = rig.bus.descriptor(rig.sec.pending(ch)[0]).unwrap();
    // SHA-256 engine, context loaded by software, no device init.
    assert_eq!(desc.ptr[1].len, 0x28);
    let mode = desc.hdr & HeaderFlags::MODE0_MDEU_SHA224.bits();
    assert_eq!(mode, HeaderFlags::MODE0_MDEU_SHA256.bits());
    finish(&rig, ch);
    assert_eq!(take(&slot).unwrap().len(), 28);
    assert_eq!(headers.lock().unwrap()[0] & HeaderFlags::MODE0_MDEU_INIT.bits(), 0);
}
