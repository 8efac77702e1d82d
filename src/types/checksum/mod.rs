#![forbid(unsafe_code)]
//! Checksums guarding persisted frames.

/// Incremental 32-bit checksum.
pub trait Checksum {
    /// Starts over.
    fn reset(&mut self);
    /// Feeds `bytes`.
    fn update(&mut self, bytes: &[u8]);
    /// Checksum of everything fed so far; feeding may continue.
    fn finalize(&self) -> u32;
}

/// CRC32 (IEEE) backed by `crc32fast`.
pub struct Crc32Fast {
    inner: crc32fast::Hasher,
}

impl Default for Crc32Fast {
    fn default() -> Self {
        Self {
            inner: crc32fast::Hasher::new(),
        }
    }
}

impl Checksum for Crc32Fast {
    fn reset(&mut self) {
        self.inner.reset();
    }

    fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    fn finalize(&self) -> u32 {
        self.inner.clone().finalize()
    }
}

/// CRC32 over a stored frame: the key it is filed under, then its payload.
pub fn frame_crc32(key: u64, payload: &[u8]) -> u32 {
    let mut hasher = Crc32Fast::default();
    hasher.update(&key.to_be_bytes());
    hasher.update(&(payload.len() as u32).to_be_bytes());
    hasher.update(payload);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_trait_roundtrip() {
        let mut c = Crc32Fast::default();
        c.update(b"bucket");
        let first = c.finalize();
        c.update(b" payload");
        let second = c.finalize();
        assert_ne!(first, second);
        c.reset();
        c.update(b"bucket payload");
        assert_eq!(c.finalize(), second);
    }

    #[test]
    fn frame_crc32_binds_key_and_payload() {
        let payload = vec![0u8; 16];
        let crc_a = frame_crc32(1, &payload);
        assert_eq!(crc_a, frame_crc32(1, &payload));

        let mut different = payload.clone();
        different[0] = 1;
        assert_ne!(crc_a, frame_crc32(1, &different));
        assert_ne!(crc_a, frame_crc32(2, &payload));
        assert_ne!(crc_a, frame_crc32(1, &payload[..15]));
    }
}
