//! Incremental zlib-stream inflation.
//!
//! The gateway's `compress=zlib-stream` mode concatenates deflate blocks
//! across every BINARY frame of a single logical message; a message is
//! complete once the accumulated compressed bytes end with the four-byte
//! sentinel `00 00 FF FF`. [`ZlibStream::feed`] hides that bookkeeping: feed
//! it chunks as they arrive over the wire and it yields a decoded string
//! only once a message is complete, regardless of how the caller chose to
//! split the chunks.

use crate::error::{CompressionError, CompressionErrorType};
use flate2::{Decompress, FlushDecompress, Status};
use std::time::{Duration, Instant};

/// Sentinel appended by zlib to the end of every complete message under
/// stream-mode flushing.
const ZLIB_SUFFIX: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

/// Size, in bytes, of the scratch buffer `decompress_vec` is given per call.
/// Large enough that most messages inflate in a single pass.
const CHUNK_SIZE: usize = 32 * 1024;

/// How long the buffers must sit unused below their high-water mark before
/// [`ZlibStream::shrink`] releases the spare capacity.
const SHRINK_AFTER: Duration = Duration::from_secs(60);

/// An incremental zlib-stream inflater bound to one gateway connection.
pub struct ZlibStream {
    decompress: Decompress,
    compressed: Vec<u8>,
    output: Vec<u8>,
    last_resize: Instant,
}

impl ZlibStream {
    /// Create a fresh inflater. A new connection attempt always starts a new
    /// zlib stream; reusing one across reconnects would desync the
    /// decompressor against the new stream's dictionary.
    #[must_use]
    pub fn new() -> Self {
        Self {
            decompress: Decompress::new(true),
            compressed: Vec::new(),
            output: Vec::new(),
            last_resize: Instant::now(),
        }
    }

    /// Append a chunk of a BINARY frame to the buffered message.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.compressed.extend_from_slice(chunk);
    }

    /// If the buffered bytes make up a complete message (end with the zlib
    /// stream sentinel), inflate and return the decoded string, clearing the
    /// compressed buffer. Otherwise returns `Ok(None)` without touching the
    /// decompressor, so partial frames can simply accumulate.
    pub fn message(&mut self) -> Result<Option<String>, CompressionError> {
        if self.compressed.len() < ZLIB_SUFFIX.len()
            || self.compressed[self.compressed.len() - ZLIB_SUFFIX.len()..] != ZLIB_SUFFIX
        {
            return Ok(None);
        }

        self.output.clear();
        let mut input_offset = 0usize;

        // `decompress_vec` writes into the *spare capacity* of `output`,
        // growing it as needed; it consumes as much of the given input
        // slice as fits in one call, reporting how much via `total_in`. The
        // underlying `Decompress` is never reset between messages: Discord's
        // zlib-stream mode is one continuous stream for the connection's
        // lifetime, only flushed (not reset) at each `00 00 ff ff` boundary.
        loop {
            let before_in = self.decompress.total_in();
            let before_out = self.decompress.total_out();

            if self.output.len() == self.output.capacity() {
                self.output.reserve(CHUNK_SIZE);
            }

            let status = self
                .decompress
                .decompress_vec(&self.compressed[input_offset..], &mut self.output, FlushDecompress::Sync)
                .map_err(|source| CompressionError {
                    kind: CompressionErrorType::Decompressing,
                    source: Some(Box::new(source)),
                })?;

            input_offset += (self.decompress.total_in() - before_in) as usize;
            let produced = self.decompress.total_out() - before_out;

            match status {
                Status::StreamEnd => break,
                _ if produced == 0 && input_offset >= self.compressed.len() => break,
                _ => {},
            }
        }

        self.compressed.clear();

        let decoded = String::from_utf8(std::mem::take(&mut self.output)).map_err(|source| CompressionError {
            kind: CompressionErrorType::NotUtf8,
            source: Some(Box::new(source.utf8_error())),
        })?;

        Ok(Some(decoded))
    }

    /// Release scratch capacity grown for a large message, once the stream
    /// has been idle at that size for a while. Mirrors the amortized-shrink
    /// discipline production inflaters use so a single huge payload doesn't
    /// permanently inflate memory use for the rest of the connection.
    pub fn shrink(&mut self) {
        if self.last_resize.elapsed() < SHRINK_AFTER {
            return;
        }
        self.compressed.shrink_to_fit();
        self.output.shrink_to(CHUNK_SIZE);
        self.last_resize = Instant::now();
    }
}

impl Default for ZlibStream {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ZlibStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZlibStream")
            .field("compressed_len", &self.compressed.len())
            .finish()
    }
}
