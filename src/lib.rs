//! Multiplex independent byte streams into one linear container and back.
//!
//! A container is a sequence of parts; each part is framed by a BEGIN and
//! an END block with its payload carried in DATA blocks in between.  There
//! is no index and no seeking: the writer emits blocks as data arrives and
//! the reader decodes them in a single pass.
//!
//! ```rust
//! use muxdemux::{HashAlgorithm, StreamReader, StreamWriter, WriterOptions};
//!
//! let mut container = Vec::new();
//! for name in ["a", "b"] {
//!     let opts = WriterOptions {
//!         name:       Some(name.into()),
//!         write_hash: true,
//!         compress:   true,
//!         ..WriterOptions::default()
//!     };
//!     let mut w = StreamWriter::with_options(&mut container, opts);
//!     w.add_metadata("origin", "doc")?;
//!     w.write(name.as_bytes())?;
//!     w.finish()?;
//! }
//!
//! let mut reader = StreamReader::new(&container[..]);
//! while let Some(mut part) = reader.next_part()? {
//!     assert_eq!(part.hash_algorithm(), Some(HashAlgorithm::Sha256));
//!     let body = part.read_to_vec()?;
//!     assert_eq!(part.name().map(str::as_bytes), Some(&body[..]));
//! }
//! # Ok::<(), muxdemux::Error>(())
//! ```

pub mod block;
pub mod codec;
pub mod error;
pub mod hash;
pub mod pipeline;
pub mod reader;
pub mod writer;

pub use block::{encode_block, decode_block, BeginBlock, Block, BlockDecoder, BlockKind, Metadata, Trailer};
pub use codec::CodecId;
pub use error::{Error, IntegrityFailure, Result};
pub use hash::HashAlgorithm;
pub use reader::{PartReader, StreamReader};
pub use writer::{StreamWriter, WriterOptions, WriterState};
