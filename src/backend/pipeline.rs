//! Reversible byte transformations applied to every persisted page.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;

use crate::types::{Result, StratumError};

/// One reversible stage of the byte pipeline.
pub trait ByteHandler: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;
    /// Forward transformation applied on write.
    fn serialize(&self, input: Vec<u8>) -> Result<Vec<u8>>;
    /// Inverse transformation applied on read.
    fn deserialize(&self, input: Vec<u8>) -> Result<Vec<u8>>;
}

/// Ordered stages; writes run them first to last, reads last to first.
#[derive(Default)]
pub struct ByteHandlerPipeline {
    stages: Vec<Box<dyn ByteHandler>>,
}

impl ByteHandlerPipeline {
    /// A pipeline with no stages; bytes pass through untouched.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage.
    pub fn with(mut self, stage: impl ByteHandler + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Appends a boxed stage.
    pub fn push(&mut self, stage: Box<dyn ByteHandler>) {
        self.stages.push(stage);
    }

    /// Stage names in write order.
    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Runs every stage forward.
    pub fn serialize(&self, bytes: Vec<u8>) -> Result<Vec<u8>> {
        self.stages
            .iter()
            .try_fold(bytes, |acc, stage| stage.serialize(acc))
    }

    /// Runs every stage backward.
    pub fn deserialize(&self, bytes: Vec<u8>) -> Result<Vec<u8>> {
        self.stages
            .iter()
            .rev()
            .try_fold(bytes, |acc, stage| stage.deserialize(acc))
    }
}

impl std::fmt::Debug for ByteHandlerPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Snappy block compression.
#[derive(Clone, Copy, Debug, Default)]
pub struct SnappyCompressor;

impl ByteHandler for SnappyCompressor {
    fn name(&self) -> &'static str {
        "snappy"
    }

    fn serialize(&self, input: Vec<u8>) -> Result<Vec<u8>> {
        snap::raw::Encoder::new()
            .compress_vec(&input)
            .map_err(|err| StratumError::ByteHandling(format!("snappy compress: {err}")))
    }

    fn deserialize(&self, input: Vec<u8>) -> Result<Vec<u8>> {
        snap::raw::Decoder::new()
            .decompress_vec(&input)
            .map_err(|err| StratumError::ByteHandling(format!("snappy decompress: {err}")))
    }
}

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// ChaCha20-Poly1305 authenticated encryption with a per-page random nonce.
///
/// Output layout is `[nonce 12 bytes][ciphertext][tag 16 bytes]`. Any
/// tampering or a wrong key fails authentication.
#[derive(Clone)]
pub struct ChaChaEncryptor {
    cipher: ChaCha20Poly1305,
}

impl ChaChaEncryptor {
    /// Encryptor using the given 256-bit key.
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key)),
        }
    }

    /// Parses a 64-character hex key.
    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let raw = hex::decode(hex_key.trim())
            .map_err(|err| StratumError::Config(format!("encryption key is not hex: {err}")))?;
        let key: [u8; 32] = raw.try_into().map_err(|raw: Vec<u8>| {
            StratumError::Config(format!(
                "encryption key must be 32 bytes, got {}",
                raw.len()
            ))
        })?;
        Ok(Self::new(key))
    }
}

impl std::fmt::Debug for ChaChaEncryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChaChaEncryptor").finish_non_exhaustive()
    }
}

impl ByteHandler for ChaChaEncryptor {
    fn name(&self) -> &'static str {
        "chacha20"
    }

    fn serialize(&self, input: Vec<u8>) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), input.as_slice())
            .map_err(|_| StratumError::ByteHandling("page encryption failed".into()))?;
        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn deserialize(&self, input: Vec<u8>) -> Result<Vec<u8>> {
        if input.len() < NONCE_LEN + TAG_LEN {
            return Err(StratumError::ByteHandling(format!(
                "ciphertext of {} bytes is shorter than its nonce and tag",
                input.len()
            )));
        }
        let (nonce, sealed) = input.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| StratumError::ByteHandling("ciphertext failed authentication".into()))
    }
}
