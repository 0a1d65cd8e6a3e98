//! Demultiplexer: iterates the parts of a container.
//!
//! [`StreamReader::next_part`] hands out one [`PartReader`] per BEGIN block.
//! The part reader borrows the stream reader mutably, so only one part can
//! be live at a time and a part cannot outlive the position it was opened
//! at.  It yields plaintext chunks lazily and verifies the END block once it
//! reaches it:
//!
//! ```rust
//! use muxdemux::{StreamReader, StreamWriter};
//!
//! let mut container = Vec::new();
//! let mut w = StreamWriter::new(&mut container);
//! w.write(b"hello")?;
//! w.finish()?;
//!
//! let mut reader = StreamReader::new(&container[..]);
//! while let Some(mut part) = reader.next_part()? {
//!     for chunk in &mut part {
//!         let chunk = chunk?;
//!         assert_eq!(chunk, b"hello");
//!     }
//!     assert_eq!(part.trailer().map(|t| t.size), Some(5));
//! }
//! # Ok::<(), muxdemux::Error>(())
//! ```
//!
//! # Draining
//! A part must be consumed up to its END block before the next part is
//! requested.  Asking for the next part while the previous one is still
//! open fails with [`Error::PartNotDrained`]; use [`PartReader::drain`] to
//! skip a part.
//!
//! # Errors
//! Integrity failures surface at the END block, after every chunk of the
//! part has been yielded.  They do not affect sibling parts and iteration
//! may continue.  A DATA block whose payload fails to decompress is still a
//! well-framed block, so it counts as an integrity failure too: the rest of
//! the part is skipped and the error is raised at its END block.  Any other
//! error (malformed or misplaced blocks, truncated input) leaves the block
//! cursor at an unknown position; the container is then finished and
//! `next_part` returns `Ok(None)`.

use std::io::Read;

use tracing::{debug, error, info, warn};

use crate::block::{BeginBlock, Block, BlockDecoder, Metadata, Trailer, FORMAT_VERSION};
use crate::codec::CodecId;
use crate::error::{Error, IntegrityFailure, Result};
use crate::hash::HashAlgorithm;
use crate::pipeline::PayloadPipeline;

// ── StreamReader ──────────────────────────────────────────────────────────────

pub struct StreamReader<R: Read> {
    decoder:      BlockDecoder<R>,
    parts_opened: usize,
    /// Index of a part that has not reached its END block yet.
    open_part:    Option<usize>,
    poisoned:     bool,
}

impl<R: Read> StreamReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            decoder:      BlockDecoder::new(source),
            parts_opened: 0,
            open_part:    None,
            poisoned:     false,
        }
    }

    /// Open the next part, or `Ok(None)` at the end of the container.
    pub fn next_part(&mut self) -> Result<Option<PartReader<'_, R>>> {
        if self.poisoned {
            debug!("container iteration stopped after an earlier error");
            return Ok(None);
        }
        if let Some(part) = self.open_part {
            return Err(Error::PartNotDrained { part });
        }

        let block = match self.decoder.decode_next() {
            Ok(Some(block)) => block,
            Ok(None)        => return Ok(None),
            Err(e)          => return Err(self.poison(e)),
        };
        let begin = match block {
            Block::Begin(b) => b,
            other => {
                let e = Error::invalid_block(
                    None,
                    format!("expected a begin block between parts, found {:?}", other.kind()),
                );
                return Err(self.poison(e));
            }
        };

        let index = self.parts_opened;
        self.parts_opened += 1;
        self.open_part = Some(index);
        debug!(part = index, name = ?begin.name, "reading part");

        PartReader::open(self, index, begin).map(Some)
    }

    /// Run `f` on every part in order.  `f` should consume the part; any
    /// part it leaves open fails the next iteration with `PartNotDrained`.
    pub fn for_each_part<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(&mut PartReader<'_, R>) -> Result<()>,
    {
        while let Some(mut part) = self.next_part()? {
            f(&mut part)?;
        }
        Ok(())
    }

    /// Number of BEGIN blocks seen so far.
    pub fn parts_opened(&self) -> usize {
        self.parts_opened
    }

    /// Whether an earlier error ended container iteration.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    fn poison(&mut self, e: Error) -> Error {
        self.poisoned = true;
        e
    }

    /// Next block inside part `part`; running out of input is an error here.
    fn next_block_in(&mut self, part: usize) -> Result<Block> {
        self.decoder
            .decode_next()?
            .ok_or(Error::UnexpectedEof { part })
    }
}

// ── PartReader ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PartState {
    Streaming,
    Done,
    Failed,
}

/// Lazy, single-pass iterator over the plaintext chunks of one part.
///
/// Yields `Err` at most once; after that, or after the END block, it only
/// returns `None`.
pub struct PartReader<'a, R: Read> {
    reader:       &'a mut StreamReader<R>,
    index:        usize,
    begin:        BeginBlock,
    metadata:     Metadata,
    has_metadata: bool,
    hash:         Option<HashAlgorithm>,
    trailer:      Option<Trailer>,
    pipeline:     PayloadPipeline,
    /// Block read ahead while opening the part.
    pending:      Option<Block>,
    seen_data:    bool,
    /// First decompression failure; later DATA blocks are skipped.
    undecodable:  Option<String>,
    state:        PartState,
}

impl<'a, R: Read> PartReader<'a, R> {
    fn open(reader: &'a mut StreamReader<R>, index: usize, begin: BeginBlock) -> Result<Self> {
        if begin.version > FORMAT_VERSION {
            warn!(part = index, version = begin.version, "newer format version; reading best-effort");
        }
        let hash = match begin.hash_algorithm.as_deref().map(HashAlgorithm::parse).transpose() {
            Ok(hash) => hash,
            Err(e)   => return Err(reader.poison(e)),
        };
        let pipeline = PayloadPipeline::new(CodecId::from_flag(begin.is_compressed()), hash);

        // Metadata may only sit directly after BEGIN; pull it in now so it is
        // available before the first chunk.
        let lookahead = match reader.next_block_in(index) {
            Ok(block) => block,
            Err(e)    => return Err(reader.poison(e)),
        };
        let (metadata, has_metadata, pending) = match lookahead {
            Block::Metadata(m) => (m, true, None),
            other              => (Metadata::new(), false, Some(other)),
        };

        Ok(Self {
            reader,
            index,
            begin,
            metadata,
            has_metadata,
            hash,
            trailer: None,
            pipeline,
            pending,
            seen_data: false,
            undecodable: None,
            state: PartState::Streaming,
        })
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    /// Zero-based position of this part in the container.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> Option<&str> {
        self.begin.name.as_deref()
    }

    pub fn version(&self) -> u32 {
        self.begin.version
    }

    pub fn compressed(&self) -> bool {
        self.begin.is_compressed()
    }

    pub fn hash_algorithm(&self) -> Option<HashAlgorithm> {
        self.hash
    }

    /// Part metadata; empty when the part carried no METADATA block.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// The END block, once it has been reached.
    pub fn trailer(&self) -> Option<&Trailer> {
        self.trailer.as_ref()
    }

    /// Plaintext bytes yielded so far.
    pub fn bytes_read(&self) -> u64 {
        self.pipeline.plaintext_len()
    }

    /// Whether the END block has been consumed.
    pub fn is_finished(&self) -> bool {
        self.trailer.is_some()
    }

    // ── Consumption helpers ───────────────────────────────────────────────────

    /// Consume the rest of the part, discarding data.  Returns the total
    /// plaintext size of the part.
    pub fn drain(&mut self) -> Result<u64> {
        for chunk in self.by_ref() {
            chunk?;
        }
        Ok(self.bytes_read())
    }

    /// Collect the rest of the part into one buffer.
    pub fn read_to_vec(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for chunk in self.by_ref() {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    // ── Block handling ────────────────────────────────────────────────────────

    fn step(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            let block = match self.pending.take() {
                Some(b) => b,
                None    => self.reader.next_block_in(self.index)?,
            };
            match block {
                Block::Data(wire) => {
                    self.seen_data = true;
                    if self.undecodable.is_some() {
                        continue;
                    }
                    match self.pipeline.decode(wire) {
                        Ok(plain) => return Ok(Some(plain)),
                        Err(Error::Codec(e)) => {
                            warn!(part = self.index, "undecodable data block, skipping to end of part: {e}");
                            self.undecodable = Some(e.to_string());
                        }
                        Err(e) => return Err(e),
                    }
                }
                Block::End(trailer) => {
                    self.finish(trailer)?;
                    return Ok(None);
                }
                Block::Metadata(_) => {
                    let why = if self.has_metadata {
                        "second metadata block"
                    } else if self.seen_data {
                        "metadata block after data"
                    } else {
                        "misplaced metadata block"
                    };
                    return Err(Error::invalid_block(Some(self.index), why));
                }
                Block::Begin(_) => {
                    return Err(Error::invalid_block(Some(self.index), "begin block before end of part"));
                }
            }
        }
    }

    /// Record the END block and verify it against what was read.
    fn finish(&mut self, trailer: Trailer) -> Result<()> {
        self.reader.open_part = None;
        self.state = PartState::Done;

        let result = match self.undecodable.take() {
            Some(reason) => Err(Error::Integrity {
                part:    self.index,
                failure: IntegrityFailure::Undecodable { reason },
            }),
            None => self.verify(&trailer),
        };

        match &result {
            Ok(()) if trailer.digest.is_some() && self.hash.is_some() => {
                info!(part = self.index, size = trailer.size, "integrity check successful")
            }
            Ok(())  => debug!(part = self.index, size = trailer.size, "end of part"),
            Err(e)  => error!(part = self.index, "{e}"),
        }

        self.trailer = Some(trailer);
        result
    }

    /// Compare digest and size in `trailer` with the plaintext read.
    fn verify(&mut self, trailer: &Trailer) -> Result<()> {
        let calculated = self.pipeline.finalize();
        match (calculated, trailer.digest.as_deref()) {
            (Some(calc), Some(expected)) if calc != expected => {
                return Err(Error::digest_mismatch(self.index, expected, &calc));
            }
            (Some(_), None) => {
                return Err(Error::Integrity {
                    part:    self.index,
                    failure: IntegrityFailure::MissingDigest,
                });
            }
            (None, Some(_)) => {
                warn!(part = self.index, "digest present but no hash algorithm declared; not verified");
            }
            _ => {}
        }

        let actual = self.pipeline.plaintext_len();
        if trailer.size != actual {
            return Err(Error::Integrity {
                part:    self.index,
                failure: IntegrityFailure::SizeMismatch { declared: trailer.size, actual },
            });
        }
        Ok(())
    }
}

impl<'a, R: Read> Iterator for PartReader<'a, R> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state != PartState::Streaming {
            return None;
        }
        match self.step() {
            Ok(Some(chunk)) => Some(Ok(chunk)),
            Ok(None)        => None,
            Err(e) => {
                self.state = PartState::Failed;
                if !e.is_integrity() {
                    self.reader.poisoned = true;
                }
                Some(Err(e))
            }
        }
    }
}
