//! Block codec.
//!
//! Every block is a single CBOR map carrying a `blktype` discriminator plus
//! the fields of its kind.  Blocks are self-delimiting, so a container is
//! nothing more than blocks written back to back:
//!
//! ```text
//! part 0: BEGIN [METADATA] DATA* END
//! part 1: BEGIN [METADATA] DATA* END
//! ...
//! ```
//!
//! | blktype | kind     | fields                                   |
//! |---------|----------|------------------------------------------|
//! | 0       | BEGIN    | version, name?, hashalgo?, compress?     |
//! | 1       | METADATA | metadata (text → text)                   |
//! | 2       | DATA     | data (byte string)                       |
//! | 3       | END      | size, digest? (byte string)              |
//!
//! The codec knows nothing about block ordering; that is the job of the
//! writer and reader state machines.

use std::collections::BTreeMap;
use std::io::{self, BufRead, BufReader, Read, Write};

use serde::{Deserialize, Serialize};
use serde_bytes::{ByteBuf, Bytes};

use crate::error::{Error, Result};

/// Format version written into every BEGIN block.
pub const FORMAT_VERSION: u32 = 1;

pub const BLKTYPE_BOS:      u8 = 0;
pub const BLKTYPE_METADATA: u8 = 1;
pub const BLKTYPE_DATA:     u8 = 2;
pub const BLKTYPE_EOS:      u8 = 3;

/// Per-part key/value metadata.  Keys are unique; iteration is sorted.
pub type Metadata = BTreeMap<String, String>;

// ── Block types ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Begin,
    Metadata,
    Data,
    End,
}

impl BlockKind {
    pub fn blktype(self) -> u8 {
        match self {
            BlockKind::Begin    => BLKTYPE_BOS,
            BlockKind::Metadata => BLKTYPE_METADATA,
            BlockKind::Data     => BLKTYPE_DATA,
            BlockKind::End      => BLKTYPE_EOS,
        }
    }

    pub fn from_blktype(t: u8) -> Option<Self> {
        match t {
            BLKTYPE_BOS      => Some(BlockKind::Begin),
            BLKTYPE_METADATA => Some(BlockKind::Metadata),
            BLKTYPE_DATA     => Some(BlockKind::Data),
            BLKTYPE_EOS      => Some(BlockKind::End),
            _                => None,
        }
    }
}

/// Fields of a BEGIN block.  Fixed for the lifetime of a part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeginBlock {
    pub version:        u32,
    pub name:           Option<String>,
    pub hash_algorithm: Option<String>,
    pub compressed:     Option<bool>,
}

impl BeginBlock {
    pub fn new() -> Self {
        Self { version: FORMAT_VERSION, name: None, hash_algorithm: None, compressed: None }
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed.unwrap_or(false)
    }
}

impl Default for BeginBlock {
    fn default() -> Self {
        Self::new()
    }
}

/// Fields of an END block: the part trailer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trailer {
    /// Total plaintext bytes across all DATA blocks of the part.
    pub size:   u64,
    /// Digest of the concatenated plaintext, when hashing was enabled.
    pub digest: Option<Vec<u8>>,
}

impl Trailer {
    pub fn digest_hex(&self) -> Option<String> {
        self.digest.as_ref().map(hex::encode)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Begin(BeginBlock),
    Metadata(Metadata),
    Data(Vec<u8>),
    End(Trailer),
}

impl Block {
    pub fn kind(&self) -> BlockKind {
        match self {
            Block::Begin(_)    => BlockKind::Begin,
            Block::Metadata(_) => BlockKind::Metadata,
            Block::Data(_)     => BlockKind::Data,
            Block::End(_)      => BlockKind::End,
        }
    }

    /// Serialize this block onto `writer`.
    pub fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        ciborium::ser::into_writer(&WireOut::from(self), &mut writer).map_err(|e| match e {
            ciborium::ser::Error::Io(io) => Error::Io(io),
            other => Error::Encode(other.to_string()),
        })
    }
}

// ── Wire representation ──────────────────────────────────────────────────────

#[derive(Serialize)]
struct WireOut<'a> {
    blktype: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hashalgo: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    compress: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a Metadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a Bytes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    digest: Option<&'a Bytes>,
}

impl<'a> WireOut<'a> {
    fn empty(kind: BlockKind) -> Self {
        WireOut {
            blktype:  kind.blktype(),
            version:  None,
            name:     None,
            hashalgo: None,
            compress: None,
            metadata: None,
            data:     None,
            size:     None,
            digest:   None,
        }
    }
}

impl<'a> From<&'a Block> for WireOut<'a> {
    fn from(block: &'a Block) -> Self {
        let mut out = WireOut::empty(block.kind());
        match block {
            Block::Begin(b) => {
                out.version  = Some(b.version);
                out.name     = b.name.as_deref();
                out.hashalgo = b.hash_algorithm.as_deref();
                out.compress = b.compressed;
            }
            Block::Metadata(m) => out.metadata = Some(m),
            Block::Data(d)     => out.data = Some(Bytes::new(d)),
            Block::End(t) => {
                out.size   = Some(t.size);
                out.digest = t.digest.as_deref().map(Bytes::new);
            }
        }
        out
    }
}

#[derive(Deserialize)]
struct WireIn {
    blktype:  u8,
    #[serde(default)]
    version:  Option<u32>,
    #[serde(default)]
    name:     Option<String>,
    #[serde(default)]
    hashalgo: Option<String>,
    #[serde(default)]
    compress: Option<bool>,
    #[serde(default)]
    metadata: Option<Metadata>,
    #[serde(default)]
    data:     Option<ByteBuf>,
    #[serde(default)]
    size:     Option<u64>,
    #[serde(default)]
    digest:   Option<ByteBuf>,
}

impl TryFrom<WireIn> for Block {
    type Error = Error;

    fn try_from(w: WireIn) -> Result<Self> {
        let kind = BlockKind::from_blktype(w.blktype)
            .ok_or_else(|| Error::invalid_block(None, format!("unknown blktype {}", w.blktype)))?;
        let missing = |field: &str| Error::invalid_block(None, format!("{kind:?} block without `{field}`"));

        Ok(match kind {
            BlockKind::Begin => Block::Begin(BeginBlock {
                version:        w.version.ok_or_else(|| missing("version"))?,
                name:           w.name,
                hash_algorithm: w.hashalgo,
                compressed:     w.compress,
            }),
            BlockKind::Metadata => Block::Metadata(w.metadata.ok_or_else(|| missing("metadata"))?),
            BlockKind::Data     => Block::Data(w.data.ok_or_else(|| missing("data"))?.into_vec()),
            BlockKind::End => Block::End(Trailer {
                size:   w.size.ok_or_else(|| missing("size"))?,
                digest: w.digest.map(ByteBuf::into_vec),
            }),
        })
    }
}

// ── Encode / decode ──────────────────────────────────────────────────────────

/// Encode one block to bytes.
pub fn encode_block(block: &Block) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    block.write(&mut out)?;
    Ok(out)
}

/// Decode exactly one block from the front of `bytes`.
pub fn decode_block(bytes: &[u8]) -> Result<Block> {
    BlockDecoder::new(bytes)
        .decode_next()?
        .ok_or_else(|| Error::Decode("empty input".to_owned()))
}

/// Streaming block decoder over a byte source.
///
/// Distinguishes a clean end of input (no bytes left before a block starts)
/// from a malformed or truncated block.
pub struct BlockDecoder<R: Read> {
    inner:       BufReader<R>,
    blocks_read: u64,
}

impl<R: Read> BlockDecoder<R> {
    pub fn new(source: R) -> Self {
        Self { inner: BufReader::new(source), blocks_read: 0 }
    }

    /// Decode the next block, or `Ok(None)` when the source is exhausted.
    pub fn decode_next(&mut self) -> Result<Option<Block>> {
        if self.inner.fill_buf()?.is_empty() {
            return Ok(None);
        }

        let wire: WireIn = ciborium::de::from_reader(&mut self.inner).map_err(|e| match e {
            ciborium::de::Error::Io(io) if io.kind() == io::ErrorKind::UnexpectedEof => {
                Error::Decode(format!("truncated block after {} complete blocks", self.blocks_read))
            }
            ciborium::de::Error::Io(io) => Error::Io(io),
            other => Error::Decode(other.to_string()),
        })?;

        let block = Block::try_from(wire)?;
        self.blocks_read += 1;
        Ok(Some(block))
    }

    /// Number of blocks decoded so far.
    pub fn blocks_read(&self) -> u64 {
        self.blocks_read
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ciborium::value::Value;

    fn begin() -> Block {
        Block::Begin(BeginBlock {
            version:        FORMAT_VERSION,
            name:           Some("greeting".into()),
            hash_algorithm: Some("sha256".into()),
            compressed:     None,
        })
    }

    #[test]
    fn each_kind_survives_the_wire() {
        let mut meta = Metadata::new();
        meta.insert("owner".into(), "root".into());
        let blocks = vec![
            begin(),
            Block::Metadata(meta),
            Block::Data(b"payload".to_vec()),
            Block::Data(Vec::new()),
            Block::End(Trailer { size: 7, digest: Some(vec![1, 2, 3]) }),
            Block::End(Trailer { size: 0, digest: None }),
        ];
        for block in blocks {
            assert_eq!(decode_block(&encode_block(&block).unwrap()).unwrap(), block);
        }
    }

    #[test]
    fn wire_form_is_a_cbor_map_with_byte_strings() {
        let bytes = encode_block(&Block::Data(b"abc".to_vec())).unwrap();
        let value: Value = ciborium::de::from_reader(&bytes[..]).unwrap();
        let map = value.as_map().expect("block is a map");
        assert_eq!(map.len(), 2);
        assert!(map.contains(&(Value::Text("blktype".into()), Value::Integer(BLKTYPE_DATA.into()))));
        assert!(map.contains(&(Value::Text("data".into()), Value::Bytes(b"abc".to_vec()))));
    }

    #[test]
    fn absent_optionals_are_omitted() {
        let bytes = encode_block(&Block::Begin(BeginBlock::new())).unwrap();
        let value: Value = ciborium::de::from_reader(&bytes[..]).unwrap();
        assert_eq!(value.as_map().unwrap().len(), 2);
    }

    #[test]
    fn back_to_back_blocks_then_clean_end() {
        let mut stream = Vec::new();
        begin().write(&mut stream).unwrap();
        Block::Data(b"x".to_vec()).write(&mut stream).unwrap();
        Block::End(Trailer { size: 1, digest: None }).write(&mut stream).unwrap();

        let mut dec = BlockDecoder::new(&stream[..]);
        assert_eq!(dec.decode_next().unwrap().unwrap().kind(), BlockKind::Begin);
        assert_eq!(dec.decode_next().unwrap().unwrap().kind(), BlockKind::Data);
        assert_eq!(dec.decode_next().unwrap().unwrap().kind(), BlockKind::End);
        assert!(dec.decode_next().unwrap().is_none());
        assert!(dec.decode_next().unwrap().is_none());
        assert_eq!(dec.blocks_read(), 3);
    }

    #[test]
    fn empty_source_is_a_clean_end() {
        let mut dec = BlockDecoder::new(io::empty());
        assert!(dec.decode_next().unwrap().is_none());
    }

    #[test]
    fn truncated_block_is_malformed() {
        let bytes = encode_block(&Block::Data(vec![7u8; 64])).unwrap();
        let mut dec = BlockDecoder::new(&bytes[..bytes.len() - 5]);
        assert!(matches!(dec.decode_next(), Err(Error::Decode(_))));
    }

    #[test]
    fn garbage_is_malformed() {
        // 0xff is a CBOR "break" outside of an indefinite-length item.
        let mut dec = BlockDecoder::new(&[0xffu8, 0x00, 0x01][..]);
        assert!(matches!(dec.decode_next(), Err(Error::Decode(_))));
    }

    #[test]
    fn unknown_blktype_is_invalid() {
        let mut bytes = Vec::new();
        let value = Value::Map(vec![(Value::Text("blktype".into()), Value::Integer(9.into()))]);
        ciborium::ser::into_writer(&value, &mut bytes).unwrap();
        assert!(matches!(decode_block(&bytes), Err(Error::InvalidBlock { .. })));
    }

    #[test]
    fn missing_required_field_is_invalid() {
        let mut bytes = Vec::new();
        let value = Value::Map(vec![(
            Value::Text("blktype".into()),
            Value::Integer(BLKTYPE_EOS.into()),
        )]);
        ciborium::ser::into_writer(&value, &mut bytes).unwrap();
        match decode_block(&bytes) {
            Err(Error::InvalidBlock { message, .. }) => assert!(message.contains("size")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let mut bytes = Vec::new();
        let value = Value::Map(vec![
            (Value::Text("blktype".into()), Value::Integer(BLKTYPE_BOS.into())),
            (Value::Text("version".into()), Value::Integer(2.into())),
            (Value::Text("future".into()),  Value::Bool(true)),
        ]);
        ciborium::ser::into_writer(&value, &mut bytes).unwrap();
        match decode_block(&bytes).unwrap() {
            Block::Begin(b) => assert_eq!(b.version, 2),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
