//! The payload transform shared by the writer and the reader.
//!
//! The digest always covers plaintext.  On the way out a chunk is hashed
//! and then compressed; on the way in a block is decompressed and then
//! hashed.  Both directions go through [`PayloadPipeline`] so the ordering
//! lives in exactly one place.

use crate::codec::{get_codec, Codec, CodecId, DEFAULT_COMPRESSION_LEVEL};
use crate::error::Result;
use crate::hash::{HashAlgorithm, Hasher};

pub struct PayloadPipeline {
    codec:     Box<dyn Codec>,
    level:     i32,
    hasher:    Option<Hasher>,
    plaintext: u64,
}

impl PayloadPipeline {
    pub fn new(codec: CodecId, hash: Option<HashAlgorithm>) -> Self {
        Self::with_level(codec, hash, DEFAULT_COMPRESSION_LEVEL)
    }

    pub fn with_level(codec: CodecId, hash: Option<HashAlgorithm>, level: i32) -> Self {
        Self {
            codec:     get_codec(codec),
            level,
            hasher:    hash.map(Hasher::new),
            plaintext: 0,
        }
    }

    /// Hash `plain`, then return the bytes to put on the wire.
    pub fn encode(&mut self, plain: &[u8]) -> Result<Vec<u8>> {
        self.observe(plain);
        Ok(self.codec.compress(plain, self.level)?)
    }

    /// Recover plaintext from a wire payload, then hash it.
    pub fn decode(&mut self, wire: Vec<u8>) -> Result<Vec<u8>> {
        let plain = if self.codec.codec_id().is_compressed() {
            self.codec.decompress(&wire)?
        } else {
            wire
        };
        self.observe(&plain);
        Ok(plain)
    }

    fn observe(&mut self, plain: &[u8]) {
        if let Some(h) = self.hasher.as_mut() {
            h.update(plain);
        }
        self.plaintext += plain.len() as u64;
    }

    /// Plaintext bytes seen so far.
    pub fn plaintext_len(&self) -> u64 {
        self.plaintext
    }

    pub fn hash_algorithm(&self) -> Option<HashAlgorithm> {
        self.hasher.as_ref().map(Hasher::algorithm)
    }

    /// Finalize the running digest.  `None` when hashing is disabled.
    pub fn finalize(&mut self) -> Option<Vec<u8>> {
        self.hasher.take().map(Hasher::finalize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::digest;

    #[test]
    fn digest_is_over_plaintext_regardless_of_compression() {
        let chunks: [&[u8]; 3] = [b"hello ", b"compressed ", b"world"];
        let mut plain = PayloadPipeline::new(CodecId::None, Some(HashAlgorithm::Sha256));
        let mut packed = PayloadPipeline::new(CodecId::Zstd, Some(HashAlgorithm::Sha256));
        for c in chunks {
            plain.encode(c).unwrap();
            packed.encode(c).unwrap();
        }
        let expected = digest(HashAlgorithm::Sha256, &chunks.concat());
        assert_eq!(plain.finalize().unwrap(), expected);
        assert_eq!(packed.finalize().unwrap(), expected);
    }

    #[test]
    fn encode_then_decode_agree() {
        let mut out = PayloadPipeline::new(CodecId::Zstd, Some(HashAlgorithm::Blake3));
        let mut inp = PayloadPipeline::new(CodecId::Zstd, Some(HashAlgorithm::Blake3));
        let data = b"0123456789".repeat(100);
        let wire = out.encode(&data).unwrap();
        assert_ne!(wire, data);
        assert_eq!(inp.decode(wire).unwrap(), data);
        assert_eq!(out.plaintext_len(), 1000);
        assert_eq!(inp.plaintext_len(), 1000);
        assert_eq!(out.finalize(), inp.finalize());
    }

    #[test]
    fn no_hasher_means_no_digest() {
        let mut p = PayloadPipeline::new(CodecId::None, None);
        assert_eq!(p.encode(b"abc").unwrap(), b"abc");
        assert!(p.hash_algorithm().is_none());
        assert!(p.finalize().is_none());
        assert_eq!(p.plaintext_len(), 3);
    }

    #[test]
    fn finalize_is_taken_once() {
        let mut p = PayloadPipeline::new(CodecId::None, Some(HashAlgorithm::Sha256));
        assert!(p.finalize().is_some());
        assert!(p.finalize().is_none());
    }
}
