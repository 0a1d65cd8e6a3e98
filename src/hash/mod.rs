//! Streaming digests over part plaintext.
//!
//! The algorithm is named by the `hashalgo` field of a BEGIN block.  Names
//! are parsed case-insensitively and always written in lowercase.  `sha1`
//! and `md5` are kept for containers from older writers.

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

use crate::error::{Error, Result};

/// Algorithm used when hashing is requested without naming one.
pub const DEFAULT_HASH_ALGORITHM: HashAlgorithm = HashAlgorithm::Sha256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha224,
    Sha256,
    Sha384,
    Sha512,
    Blake3,
    Sha1,
    Md5,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 7] = [
        HashAlgorithm::Sha224,
        HashAlgorithm::Sha256,
        HashAlgorithm::Sha384,
        HashAlgorithm::Sha512,
        HashAlgorithm::Blake3,
        HashAlgorithm::Sha1,
        HashAlgorithm::Md5,
    ];

    /// Name as written into the BEGIN block.
    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Sha224 => "sha224",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha384 => "sha384",
            HashAlgorithm::Sha512 => "sha512",
            HashAlgorithm::Blake3 => "blake3",
            HashAlgorithm::Sha1   => "sha1",
            HashAlgorithm::Md5    => "md5",
        }
    }

    /// Parse a BEGIN block or CLI name.
    pub fn from_name(s: &str) -> Option<Self> {
        let lower = s.to_ascii_lowercase();
        Self::ALL.into_iter().find(|a| a.name() == lower)
    }

    /// Like [`from_name`](Self::from_name) but reports unknown names as errors.
    pub fn parse(s: &str) -> Result<Self> {
        Self::from_name(s).ok_or_else(|| Error::UnsupportedHashAlgorithm(s.to_owned()))
    }

    /// Digest length in bytes.
    pub fn digest_len(self) -> usize {
        match self {
            HashAlgorithm::Sha224 => 28,
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
            HashAlgorithm::Blake3 => blake3::OUT_LEN,
            HashAlgorithm::Sha1   => 20,
            HashAlgorithm::Md5    => 16,
        }
    }

    pub fn hasher(self) -> Hasher {
        Hasher::new(self)
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for HashAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

// ── Hasher ───────────────────────────────────────────────────────────────────

/// Running hash context for one of the supported algorithms.
#[derive(Clone)]
pub enum Hasher {
    Sha224(Sha224),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
    Blake3(Box<blake3::Hasher>),
    Sha1(Sha1),
    Md5(Md5),
}

impl Hasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha224 => Hasher::Sha224(Sha224::new()),
            HashAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            HashAlgorithm::Sha384 => Hasher::Sha384(Sha384::new()),
            HashAlgorithm::Sha512 => Hasher::Sha512(Sha512::new()),
            HashAlgorithm::Blake3 => Hasher::Blake3(Box::new(blake3::Hasher::new())),
            HashAlgorithm::Sha1   => Hasher::Sha1(Sha1::new()),
            HashAlgorithm::Md5    => Hasher::Md5(Md5::new()),
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        match self {
            Hasher::Sha224(_) => HashAlgorithm::Sha224,
            Hasher::Sha256(_) => HashAlgorithm::Sha256,
            Hasher::Sha384(_) => HashAlgorithm::Sha384,
            Hasher::Sha512(_) => HashAlgorithm::Sha512,
            Hasher::Blake3(_) => HashAlgorithm::Blake3,
            Hasher::Sha1(_)   => HashAlgorithm::Sha1,
            Hasher::Md5(_)    => HashAlgorithm::Md5,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha224(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha384(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
            Hasher::Blake3(h) => {
                h.update(data);
            }
            Hasher::Sha1(h)   => h.update(data),
            Hasher::Md5(h)    => h.update(data),
        }
    }

    pub fn finalize(self) -> Vec<u8> {
        match self {
            Hasher::Sha224(h) => h.finalize().to_vec(),
            Hasher::Sha256(h) => h.finalize().to_vec(),
            Hasher::Sha384(h) => h.finalize().to_vec(),
            Hasher::Sha512(h) => h.finalize().to_vec(),
            Hasher::Blake3(h) => h.finalize().as_bytes().to_vec(),
            Hasher::Sha1(h)   => h.finalize().to_vec(),
            Hasher::Md5(h)    => h.finalize().to_vec(),
        }
    }
}

/// One-shot digest of `data`.
pub fn digest(algorithm: HashAlgorithm, data: &[u8]) -> Vec<u8> {
    let mut h = Hasher::new(algorithm);
    h.update(data);
    h.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        assert_eq!(
            hex::encode(digest(HashAlgorithm::Sha256, b"hello world")),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn sha256_of_empty_input() {
        assert_eq!(
            hex::encode(digest(HashAlgorithm::Sha256, b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn legacy_algorithms_known_vectors() {
        assert_eq!(
            hex::encode(digest(HashAlgorithm::Sha1, b"hello world")),
            "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"
        );
        assert_eq!(
            hex::encode(digest(HashAlgorithm::Md5, b"hello world")),
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
    }

    #[test]
    fn incremental_matches_one_shot() {
        for algo in HashAlgorithm::ALL {
            let mut h = algo.hasher();
            h.update(b"hello ");
            h.update(b"world");
            let out = h.finalize();
            assert_eq!(out, digest(algo, b"hello world"), "{algo}");
            assert_eq!(out.len(), algo.digest_len(), "{algo}");
        }
    }

    #[test]
    fn names_roundtrip_case_insensitively() {
        for algo in HashAlgorithm::ALL {
            assert_eq!(HashAlgorithm::from_name(algo.name()), Some(algo));
            assert_eq!(HashAlgorithm::from_name(&algo.name().to_uppercase()), Some(algo));
        }
        assert_eq!("SHA512".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha512);
    }

    #[test]
    fn unknown_name_is_an_error() {
        assert!(HashAlgorithm::from_name("md4").is_none());
        match HashAlgorithm::parse("md4") {
            Err(Error::UnsupportedHashAlgorithm(name)) => assert_eq!(name, "md4"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
