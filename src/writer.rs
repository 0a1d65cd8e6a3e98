//! Multiplexer: writes one part of a container.
//!
//! A [`StreamWriter`] walks a forward-only state machine:
//!
//! ```text
//! AwaitingBegin ──▶ AwaitingMetadata ──▶ WritingData ──▶ Finished
//! ```
//!
//! A failure while emitting a block leaves the writer in `Failed`, from
//! which every operation returns [`Error::InvalidState`].
//!
//! The BEGIN block (and the METADATA block, if any metadata was added) is
//! emitted lazily by the first `write`, or by `finish` for an empty part.
//! One writer produces exactly one part; to build a multi-part container,
//! write parts one after another onto the same sink, e.g. via
//! [`StreamWriter::into_inner`] or by handing each writer `&mut sink`.

use std::io::{self, Read, Write};

use tracing::debug;

use crate::block::{BeginBlock, Block, Metadata, Trailer, FORMAT_VERSION};
use crate::codec::{CodecId, DEFAULT_COMPRESSION_LEVEL};
use crate::error::{Error, Result};
use crate::hash::{HashAlgorithm, DEFAULT_HASH_ALGORITHM};
use crate::pipeline::PayloadPipeline;

/// Default chunk size used by [`StreamWriter::copy_from`] callers.
pub const DEFAULT_BLOCK_SIZE: usize = 1024;

// ── WriterOptions ─────────────────────────────────────────────────────────────

/// Per-part configuration, fixed once the BEGIN block is written.
#[derive(Debug, Clone)]
pub struct WriterOptions {
    pub name:              Option<String>,
    /// Algorithm to hash with.  Only used when `write_hash` is set; defaults
    /// to SHA-256 in that case.
    pub hash_algorithm:    Option<HashAlgorithm>,
    pub write_hash:        bool,
    /// Compress every DATA block with Zstd.
    pub compress:          bool,
    pub compression_level: i32,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            name:              None,
            hash_algorithm:    None,
            write_hash:        false,
            compress:          false,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

impl WriterOptions {
    /// The algorithm that will actually be used, if any.
    pub fn effective_hash(&self) -> Option<HashAlgorithm> {
        if self.write_hash {
            Some(self.hash_algorithm.unwrap_or(DEFAULT_HASH_ALGORITHM))
        } else {
            None
        }
    }

    fn begin_block(&self) -> BeginBlock {
        BeginBlock {
            version:        FORMAT_VERSION,
            name:           self.name.clone(),
            hash_algorithm: self.effective_hash().map(|a| a.name().to_owned()),
            compressed:     self.compress.then_some(true),
        }
    }

    fn pipeline(&self) -> PayloadPipeline {
        PayloadPipeline::with_level(
            CodecId::from_flag(self.compress),
            self.effective_hash(),
            self.compression_level,
        )
    }
}

// ── WriterState ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    AwaitingBegin,
    AwaitingMetadata,
    WritingData,
    Finished,
    Failed,
}

impl WriterState {
    fn accepts_metadata(self) -> bool {
        matches!(self, WriterState::AwaitingBegin | WriterState::AwaitingMetadata)
    }
}

// ── StreamWriter ──────────────────────────────────────────────────────────────

pub struct StreamWriter<W: Write> {
    writer:   W,
    options:  WriterOptions,
    state:    WriterState,
    metadata: Metadata,
    pipeline: PayloadPipeline,
}

impl<W: Write> StreamWriter<W> {
    pub fn new(writer: W) -> Self {
        Self::with_options(writer, WriterOptions::default())
    }

    pub fn with_options(writer: W, options: WriterOptions) -> Self {
        let pipeline = options.pipeline();
        Self {
            writer,
            options,
            state: WriterState::AwaitingBegin,
            metadata: Metadata::new(),
            pipeline,
        }
    }

    /// Replace the part configuration.  Only valid before the first write.
    pub fn configure(&mut self, options: WriterOptions) -> Result<()> {
        if self.state != WriterState::AwaitingBegin {
            return Err(Error::invalid_state("configure", self.state));
        }
        self.pipeline = options.pipeline();
        self.options  = options;
        Ok(())
    }

    /// Add a metadata entry.  A later value for the same key replaces the
    /// earlier one.  Fails once data has started.
    pub fn add_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        if !self.state.accepts_metadata() {
            return Err(Error::invalid_state("add_metadata", self.state));
        }
        self.metadata.insert(key.into(), value.into());
        Ok(())
    }

    /// Append one chunk of plaintext as a DATA block.
    pub fn write(&mut self, chunk: &[u8]) -> Result<()> {
        self.enter_data("write")?;
        let wire = match self.pipeline.encode(chunk) {
            Ok(wire) => wire,
            Err(e)   => return Err(self.fail(e)),
        };
        debug!(plain = chunk.len(), wire = wire.len(), "writing data block");
        self.emit(&Block::Data(wire))
    }

    /// Write every chunk of `chunks` in order, stopping at the first failure.
    pub fn write_from_sequence<I, B>(&mut self, chunks: I) -> Result<()>
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        for chunk in chunks {
            self.write(chunk.as_ref())?;
        }
        Ok(())
    }

    /// Read `source` to exhaustion, emitting a DATA block for every
    /// `block_size` bytes (the last block may be shorter).  Returns the
    /// number of plaintext bytes copied.
    pub fn copy_from<R: Read>(&mut self, mut source: R, block_size: usize) -> Result<u64> {
        if block_size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "block size must be non-zero").into());
        }
        let mut buf = vec![0u8; block_size];
        let mut total = 0u64;
        loop {
            let n = fill(&mut source, &mut buf)?;
            if n == 0 {
                break;
            }
            self.write(&buf[..n])?;
            total += n as u64;
            if n < block_size {
                break;
            }
        }
        Ok(total)
    }

    /// Emit the END block and close the part.
    ///
    /// An empty part still gets its BEGIN (and METADATA) block first.
    pub fn finish(&mut self) -> Result<Trailer> {
        self.enter_data("finish")?;
        let trailer = Trailer {
            size:   self.pipeline.plaintext_len(),
            digest: self.pipeline.finalize(),
        };
        debug!(size = trailer.size, digest = ?trailer.digest_hex(), "writing end block");
        self.emit(&Block::End(trailer.clone()))?;
        if let Err(e) = self.writer.flush() {
            return Err(self.fail(e.into()));
        }
        self.state = WriterState::Finished;
        Ok(trailer)
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn state(&self) -> WriterState {
        self.state
    }

    /// Plaintext bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.pipeline.plaintext_len()
    }

    /// Consumes the writer, returning the underlying sink.
    pub fn into_inner(self) -> W {
        self.writer
    }

    // ── State transitions ─────────────────────────────────────────────────────

    fn write_begin(&mut self) -> Result<()> {
        let begin = self.options.begin_block();
        debug!(name = ?begin.name, hashalgo = ?begin.hash_algorithm, compressed = self.options.compress,
               "writing begin block");
        self.emit(&Block::Begin(begin))?;
        self.state = WriterState::AwaitingMetadata;
        Ok(())
    }

    fn write_metadata(&mut self) -> Result<()> {
        if !self.metadata.is_empty() {
            debug!(entries = self.metadata.len(), "writing metadata block");
            self.emit(&Block::Metadata(self.metadata.clone()))?;
        }
        self.state = WriterState::WritingData;
        Ok(())
    }

    /// Drive the state machine forward to `WritingData`.
    fn enter_data(&mut self, operation: &'static str) -> Result<()> {
        if self.state == WriterState::AwaitingBegin {
            self.write_begin()?;
        }
        if self.state == WriterState::AwaitingMetadata {
            self.write_metadata()?;
        }
        if self.state != WriterState::WritingData {
            return Err(Error::invalid_state(operation, self.state));
        }
        Ok(())
    }

    fn emit(&mut self, block: &Block) -> Result<()> {
        match block.write(&mut self.writer) {
            Ok(())  => Ok(()),
            Err(e)  => Err(self.fail(e)),
        }
    }

    /// The digest and size may already count bytes that never reached the
    /// sink, so no further block may be written.
    fn fail(&mut self, e: Error) -> Error {
        debug!(state = ?self.state, "writer failed: {e}");
        self.state = WriterState::Failed;
        e
    }
}

/// Read until `buf` is full or the source is exhausted.
fn fill<R: Read>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
