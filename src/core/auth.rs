//! Authentication of signed spans
//!
//! Every byte range the loader trusts passes through [`Authenticator::authenticate`]
//! first. Three kinds of check are dispatched from the declared auth type:
//!
//! - **None**: accepted only while verified boot is disabled
//! - **Hash**: digest of the span compared with an expected digest
//! - **Signature**: Ed25519 signature over the span, checked with a public key
//!   carried in the authentication tag; the key itself must be trusted by the
//!   [`HashStore`]
//!
//! Authentication tag layout for signatures:
//!
//! ```text
//! ┌──────────────────────┬──────────────────────────────┐
//! │ public key (32 bytes)│ signature (64 bytes)         │
//! └──────────────────────┴──────────────────────────────┘
//! ```

use crate::error::{BootError, Result};
use crate::header::{AuthKind, AuthType};
use crate::tag::Tag;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Length of the public key prefix in a signature tag
pub const PUBLIC_KEY_LEN: usize = 32;

/// Length of the signature following the public key
pub const SIGNATURE_LEN: usize = 64;

/// Total signature tag length
pub const SIGNATURE_TAG_LEN: usize = PUBLIC_KEY_LEN + SIGNATURE_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
}

impl HashAlgorithm {
    pub fn digest_len(self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    Ed25519,
}

/// Cryptographic primitives consumed by the dispatcher
pub trait AuthEngine: Send + Sync {
    fn digest(&self, algorithm: HashAlgorithm, data: &[u8]) -> Result<Vec<u8>>;

    fn verify_hash(&self, data: &[u8], algorithm: HashAlgorithm, expected: &[u8]) -> Result<()> {
        let actual = self.digest(algorithm, data)?;
        if constant_time_eq(&actual, expected) {
            Ok(())
        } else {
            Err(BootError::SecurityViolation(format!(
                "{:?} digest mismatch",
                algorithm
            )))
        }
    }

    fn verify_signature(
        &self,
        data: &[u8],
        algorithm: SignatureAlgorithm,
        public_key: &[u8],
        signature: &[u8],
    ) -> Result<()>;
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Software implementation backed by `sha2` and `ed25519-dalek`
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftwareAuth;

impl AuthEngine for SoftwareAuth {
    fn digest(&self, algorithm: HashAlgorithm, data: &[u8]) -> Result<Vec<u8>> {
        Ok(match algorithm {
            HashAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
            HashAlgorithm::Sha384 => Sha384::digest(data).to_vec(),
        })
    }

    fn verify_signature(
        &self,
        data: &[u8],
        algorithm: SignatureAlgorithm,
        public_key: &[u8],
        signature: &[u8],
    ) -> Result<()> {
        match algorithm {
            SignatureAlgorithm::Ed25519 => {
                let key_bytes: [u8; PUBLIC_KEY_LEN] = public_key.try_into().map_err(|_| {
                    BootError::SecurityViolation("malformed Ed25519 public key".to_string())
                })?;
                let sig_bytes: [u8; SIGNATURE_LEN] = signature.try_into().map_err(|_| {
                    BootError::SecurityViolation("malformed Ed25519 signature".to_string())
                })?;

                let key = VerifyingKey::from_bytes(&key_bytes).map_err(|e| {
                    BootError::SecurityViolation(format!("invalid Ed25519 public key: {}", e))
                })?;
                let signature = Signature::from_bytes(&sig_bytes);

                key.verify(data, &signature).map_err(|e| {
                    BootError::SecurityViolation(format!("signature verification failed: {}", e))
                })
            }
        }
    }
}

/// Trust anchors supplied by the environment
///
/// Holds expected digests keyed by tag (containers authenticated by hash,
/// flat components) and the SHA-256 digests of public keys allowed to sign.
#[derive(Debug, Clone, Default)]
pub struct HashStore {
    digests: HashMap<Tag, Vec<u8>>,
    trusted_keys: HashSet<[u8; 32]>,
}

impl HashStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_digest(&mut self, tag: Tag, digest: Vec<u8>) {
        self.digests.insert(tag, digest);
    }

    pub fn digest(&self, tag: Tag) -> Option<&[u8]> {
        self.digests.get(&tag).map(Vec::as_slice)
    }

    /// Trust a public key by its SHA-256 digest
    pub fn trust_key_digest(&mut self, digest: [u8; 32]) {
        self.trusted_keys.insert(digest);
    }

    /// Trust a raw public key
    pub fn trust_public_key(&mut self, public_key: &[u8]) {
        self.trusted_keys.insert(Sha256::digest(public_key).into());
    }

    pub fn is_trusted_key(&self, digest: &[u8]) -> bool {
        <[u8; 32]>::try_from(digest)
            .map(|d| self.trusted_keys.contains(&d))
            .unwrap_or(false)
    }

    pub fn from_config(config: &HashStoreConfig) -> Result<Self> {
        let mut store = HashStore::new();
        for (tag, digest) in &config.digests {
            let bytes = hex::decode(digest).map_err(|e| {
                BootError::Config(format!("digest for {} is not hex: {}", tag, e))
            })?;
            store.insert_digest(*tag, bytes);
        }
        for key in &config.trusted_keys {
            let bytes = hex::decode(key)
                .map_err(|e| BootError::Config(format!("trusted key digest is not hex: {}", e)))?;
            let digest: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
                BootError::Config(format!(
                    "trusted key digest must be 32 bytes, got {}",
                    bytes.len()
                ))
            })?;
            store.trust_key_digest(digest);
        }
        Ok(store)
    }
}

/// `[hash_store]` section of the loader configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HashStoreConfig {
    /// Hex SHA-256 digests of trusted public keys
    #[serde(default)]
    pub trusted_keys: Vec<String>,

    /// Tag → hex digest
    #[serde(default)]
    pub digests: HashMap<Tag, String>,
}

/// Dispatches a declared auth type to the matching check
pub struct Authenticator<'a> {
    engine: &'a dyn AuthEngine,
    store: &'a HashStore,
    verified_boot: bool,
}

impl<'a> Authenticator<'a> {
    pub fn new(engine: &'a dyn AuthEngine, store: &'a HashStore, verified_boot: bool) -> Self {
        Authenticator {
            engine,
            store,
            verified_boot,
        }
    }

    /// Authenticate `data`
    ///
    /// * `auth_type` - raw auth type byte as declared on storage
    /// * `auth_tag` - bytes following the aligned span (signature kinds)
    /// * `expected_digest` - reference digest for hash kinds, if one exists
    pub fn authenticate(
        &self,
        data: &[u8],
        auth_type: u8,
        auth_tag: &[u8],
        expected_digest: Option<&[u8]>,
    ) -> Result<()> {
        let auth_type = AuthType::from_u8(auth_type)
            .ok_or_else(|| BootError::Unsupported(format!("auth type {}", auth_type)))?;

        if auth_type == AuthType::None && self.verified_boot {
            warn!("Rejecting unauthenticated span while verified boot is enabled");
            return Err(BootError::SecurityViolation(
                "authentication type None is not allowed with verified boot".to_string(),
            ));
        }

        match auth_type.kind() {
            AuthKind::None => Ok(()),
            AuthKind::Hash => {
                let algorithm = match auth_type {
                    AuthType::Sha384 => HashAlgorithm::Sha384,
                    _ => HashAlgorithm::Sha256,
                };
                let expected = expected_digest.filter(|d| !d.is_empty()).ok_or_else(|| {
                    BootError::SecurityViolation(format!(
                        "no reference digest for {:?} authentication",
                        algorithm
                    ))
                })?;
                if expected.len() != algorithm.digest_len() {
                    return Err(BootError::SecurityViolation(format!(
                        "{:?} reference digest is {} bytes",
                        algorithm,
                        expected.len()
                    )));
                }
                self.engine.verify_hash(data, algorithm, expected)?;
                debug!(?algorithm, len = data.len(), "Hash verified");
                Ok(())
            }
            AuthKind::Signature => {
                if auth_tag.len() < SIGNATURE_TAG_LEN {
                    return Err(BootError::SecurityViolation(format!(
                        "signature tag is {} bytes, need {}",
                        auth_tag.len(),
                        SIGNATURE_TAG_LEN
                    )));
                }
                let (public_key, rest) = auth_tag.split_at(PUBLIC_KEY_LEN);
                let signature = &rest[..SIGNATURE_LEN];

                let key_digest = self.engine.digest(HashAlgorithm::Sha256, public_key)?;
                if !self.store.is_trusted_key(&key_digest) {
                    return Err(BootError::SecurityViolation(format!(
                        "public key {} is not trusted",
                        hex::encode(&key_digest[..8])
                    )));
                }

                self.engine
                    .verify_signature(data, SignatureAlgorithm::Ed25519, public_key, signature)?;
                debug!(len = data.len(), "Signature verified");
                Ok(())
            }
        }
    }
}
