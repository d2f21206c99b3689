// Freescale SEC (TALITOS) Descriptor Engine
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Algorithm templates.
//!
//! Every algorithm the front-ends implement is described by a template: its
//! name, its sizes and the descriptor header that selects the execution
//! units doing the work. [`register`] keeps the templates a device can
//! execute.

use crate::config::{Features, SecConfig};
use crate::error::{SecError, SecResult};
use crate::header::{compose, hw_supports, DescType, ExecUnit, HeaderFlags};

/// Priority of every algorithm this driver provides.
pub const CRA_PRIORITY: u32 = 3000;

/// Largest key (cipher plus authentication key) a transform stores.
pub const MAX_KEY_SIZE: usize = 64;

/// Largest IV: the AES block.
pub const MAX_IV_LENGTH: usize = 16;

/// MDEU context size for MD5, SHA-1, SHA-224 and SHA-256.
pub const MDEU_CONTEXT_SIZE_MD5_SHA1_SHA256: usize = 0x28;

/// MDEU context size for SHA-384 and SHA-512.
pub const MDEU_CONTEXT_SIZE_SHA384_SHA512: usize = 0x48;

/// SHA-224 initial hash value, loaded by software on devices that cannot
/// initialise a SHA-224 context.
pub const SHA224_H: [u32; 8] = [
    0xc105_9ed8,
    0x367c_d507,
    0x3070_dd17,
    0xf70e_5939,
    0xffc0_0b31,
    0x6858_1511,
    0x64f9_8fa7,
    0xbefa_4fa4,
];

const AES_BLOCK_SIZE: usize = 16;
const DES3_EDE_BLOCK_SIZE: usize = 8;
const DES3_EDE_KEY_SIZE: usize = 24;

/// Kind-specific template data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgKind {
    /// Single-pass cipher + HMAC (`ipsec_esp` descriptors).
    Aead { ivsize: usize, max_authsize: usize },
    /// Block cipher.
    Cipher {
        ivsize: usize,
        min_keysize: usize,
        max_keysize: usize,
    },
    /// Message digest.
    Hash { digest_size: usize },
}

impl AlgKind {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Aead { .. } => "aead",
            Self::Cipher { .. } => "ablkcipher",
            Self::Hash { .. } => "ahash",
        }
    }
}

/// Algorithm template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlgTemplate {
    pub name: &'static str,
    pub driver_name: &'static str,
    pub block_size: usize,
    pub kind: AlgKind,
    /// Descriptor header without direction and per-request mode bits.
    pub desc_hdr_template: u32,
}

const fn esp_hdr(cipher: ExecUnit, cipher_mode: HeaderFlags, auth_mode: HeaderFlags) -> u32 {
    compose(
        DescType::IpsecEsp,
        cipher,
        Some(ExecUnit::MdeuA),
        cipher_mode
            .union(HeaderFlags::MODE1_MDEU_INIT)
            .union(HeaderFlags::MODE1_MDEU_PAD)
            .union(HeaderFlags::MODE1_MDEU_HMAC)
            .union(auth_mode),
    )
}

const fn common_hdr(eu: ExecUnit, mode: HeaderFlags) -> u32 {
    compose(DescType::CommonNonsnoopNoAfeu, eu, None, mode)
}

const AES_CBC: HeaderFlags = HeaderFlags::MODE0_AESU_CBC;
const DES3_CBC: HeaderFlags = HeaderFlags::MODE0_DEU_CBC.union(HeaderFlags::MODE0_DEU_3DES);
const SHA1: HeaderFlags = HeaderFlags::empty();

const SHA256_HDR: u32 = common_hdr(ExecUnit::MdeuA, HeaderFlags::MODE0_MDEU_SHA256);

/// Every algorithm the front-ends implement.
pub const TEMPLATES: [AlgTemplate; 14] = [
    AlgTemplate {
        name: "authenc(hmac(sha1),cbc(aes))",
        driver_name: "authenc-hmac-sha1-cbc-aes-talitos",
        block_size: AES_BLOCK_SIZE,
        kind: AlgKind::Aead {
            ivsize: AES_BLOCK_SIZE,
            max_authsize: 20,
        },
        desc_hdr_template: esp_hdr(ExecUnit::Aesu, AES_CBC, SHA1),
    },
    AlgTemplate {
        name: "authenc(hmac(sha1),cbc(des3_ede))",
        driver_name: "authenc-hmac-sha1-cbc-3des-talitos",
        block_size: DES3_EDE_BLOCK_SIZE,
        kind: AlgKind::Aead {
            ivsize: DES3_EDE_BLOCK_SIZE,
            max_authsize: 20,
        },
        desc_hdr_template: esp_hdr(ExecUnit::Deu, DES3_CBC, SHA1),
    },
    AlgTemplate {
        name: "authenc(hmac(sha256),cbc(aes))",
        driver_name: "authenc-hmac-sha256-cbc-aes-talitos",
        block_size: AES_BLOCK_SIZE,
        kind: AlgKind::Aead {
            ivsize: AES_BLOCK_SIZE,
            max_authsize: 32,
        },
        desc_hdr_template: esp_hdr(ExecUnit::Aesu, AES_CBC, HeaderFlags::MODE1_MDEU_SHA256),
    },
    AlgTemplate {
        name: "authenc(hmac(sha256),cbc(des3_ede))",
        driver_name: "authenc-hmac-sha256-cbc-3des-talitos",
        block_size: DES3_EDE_BLOCK_SIZE,
        kind: AlgKind::Aead {
            ivsize: DES3_EDE_BLOCK_SIZE,
            max_authsize: 32,
        },
        desc_hdr_template: esp_hdr(ExecUnit::Deu, DES3_CBC, HeaderFlags::MODE1_MDEU_SHA256),
    },
    AlgTemplate {
        name: "authenc(hmac(md5),cbc(aes))",
        driver_name: "authenc-hmac-md5-cbc-aes-talitos",
        block_size: AES_BLOCK_SIZE,
        kind: AlgKind::Aead {
            ivsize: AES_BLOCK_SIZE,
            max_authsize: 16,
        },
        desc_hdr_template: esp_hdr(ExecUnit::Aesu, AES_CBC, HeaderFlags::MODE1_MDEU_MD5),
    },
    AlgTemplate {
        name: "authenc(hmac(md5),cbc(des3_ede))",
        driver_name: "authenc-hmac-md5-cbc-3des-talitos",
        block_size: DES3_EDE_BLOCK_SIZE,
        kind: AlgKind::Aead {
            ivsize: DES3_EDE_BLOCK_SIZE,
            max_authsize: 16,
        },
        desc_hdr_template: esp_hdr(ExecUnit::Deu, DES3_CBC, HeaderFlags::MODE1_MDEU_MD5),
    },
    AlgTemplate {
        name: "cbc(aes)",
        driver_name: "cbc-aes-talitos",
        block_size: AES_BLOCK_SIZE,
        kind: AlgKind::Cipher {
            ivsize: AES_BLOCK_SIZE,
            min_keysize: 16,
            max_keysize: 32,
        },
        desc_hdr_template: common_hdr(ExecUnit::Aesu, AES_CBC),
    },
    AlgTemplate {
        name: "cbc(des3_ede)",
        driver_name: "cbc-3des-talitos",
        block_size: DES3_EDE_BLOCK_SIZE,
        kind: AlgKind::Cipher {
            ivsize: DES3_EDE_BLOCK_SIZE,
            min_keysize: DES3_EDE_KEY_SIZE,
            max_keysize: DES3_EDE_KEY_SIZE,
        },
        desc_hdr_template: common_hdr(ExecUnit::Deu, DES3_CBC),
    },
    AlgTemplate {
        name: "md5",
        driver_name: "md5-talitos",
        block_size: 64,
        kind: AlgKind::Hash { digest_size: 16 },
        desc_hdr_template: common_hdr(ExecUnit::MdeuA, HeaderFlags::MODE0_MDEU_MD5),
    },
    AlgTemplate {
        name: "sha1",
        driver_name: "sha1-talitos",
        block_size: 64,
        kind: AlgKind::Hash { digest_size: 20 },
        desc_hdr_template: common_hdr(ExecUnit::MdeuA, SHA1),
    },
    AlgTemplate {
        name: "sha224",
        driver_name: "sha224-talitos",
        block_size: 64,
        kind: AlgKind::Hash { digest_size: 28 },
        desc_hdr_template: common_hdr(ExecUnit::MdeuA, HeaderFlags::MODE0_MDEU_SHA224),
    },
    AlgTemplate {
        name: "sha256",
        driver_name: "sha256-talitos",
        block_size: 64,
        kind: AlgKind::Hash { digest_size: 32 },
        desc_hdr_template: SHA256_HDR,
    },
    AlgTemplate {
        name: "sha384",
        driver_name: "sha384-talitos",
        block_size: 128,
        kind: AlgKind::Hash { digest_size: 48 },
        // SHA-384 is the all-zero MDEU-B mode.
        desc_hdr_template: common_hdr(ExecUnit::MdeuB, HeaderFlags::empty()),
    },
    AlgTemplate {
        name: "sha512",
        driver_name: "sha512-talitos",
        block_size: 128,
        kind: AlgKind::Hash { digest_size: 64 },
        desc_hdr_template: common_hdr(ExecUnit::MdeuB, HeaderFlags::MODE0_MDEUB_SHA512),
    },
];

/// An algorithm as registered for a particular device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisteredAlg {
    pub template: AlgTemplate,
    /// Header actually used; differs from the template for SHA-224 on
    /// devices without SHA-224 context initialisation.
    pub desc_hdr_template: u32,
    /// The hash context is initialised by software, not the device.
    pub sha224_swinit: bool,
    pub priority: u32,
}

impl RegisteredAlg {
    #[inline]
    pub fn name(&self) -> &'static str {
        self.template.name
    }

    #[inline]
    pub fn kind(&self) -> AlgKind {
        self.template.kind
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.template.block_size
    }

    /// MDEU context size used by a hash; 0 for other kinds.
    pub fn hash_context_size(&self) -> usize {
        match self.template.kind {
            AlgKind::Hash { digest_size } if digest_size <= 32 => {
                MDEU_CONTEXT_SIZE_MD5_SHA1_SHA256
            }
            AlgKind::Hash { .. } => MDEU_CONTEXT_SIZE_SHA384_SHA512,
            _ => 0,
        }
    }
}

fn adapt(template: &AlgTemplate, config: &SecConfig) -> RegisteredAlg {
    let swinit = matches!(template.kind, AlgKind::Hash { .. })
        && template.name == "sha224"
        && !config.has(Features::SHA224_HWINIT);
    RegisteredAlg {
        template: *template,
        desc_hdr_template: if swinit {
            SHA256_HDR
        } else {
            template.desc_hdr_template
        },
        sha224_swinit: swinit,
        priority: CRA_PRIORITY,
    }
}

/// Algorithms a device with `config`'s capabilities can execute.
pub fn register(config: &SecConfig) -> Vec<RegisteredAlg> {
    TEMPLATES
        .iter()
        .filter(|t| hw_supports(t.desc_hdr_template, config.exec_units, config.desc_types))
        .map(|t| {
            let alg = adapt(t, config);
            log::debug!(
                "{} alg registered: {} ({})",
                t.kind.name(),
                t.name,
                t.driver_name
            );
            alg
        })
        .collect()
}

/// Look up a registered algorithm by name.
pub fn find(algs: &[RegisteredAlg], name: &str) -> SecResult<RegisteredAlg> {
    algs.iter()
        .find(|a| a.name() == name || a.template.driver_name == name)
        .copied()
        .ok_or_else(|| SecError::Unsupported(name.to_string()))
}
