//! Snappy framing-format streams over pooled block codecs.
//!
//! Streams follow the snappy framing format: a stream identifier chunk,
//! then one chunk per block of at most 64 KiB, each carrying a masked
//! CRC-32C of the uncompressed bytes. The pooled state is the block codec
//! together with its block-sized buffers.

use std::io::{self, Read, Write};

use super::{invalid_data, read_retrying, truncated};

const MAX_BLOCK_SIZE: usize = 1 << 16;

/// Largest compressed data chunk body: checksum plus a worst-case block.
fn max_compressed_chunk_len() -> usize {
    snap::raw::max_compress_len(MAX_BLOCK_SIZE) + 4
}

const STREAM_IDENTIFIER: &[u8; 10] = b"\xff\x06\x00\x00sNaPpY";
const STREAM_MAGIC: &[u8; 6] = b"sNaPpY";

const CHUNK_COMPRESSED: u8 = 0x00;
const CHUNK_UNCOMPRESSED: u8 = 0x01;
const CHUNK_STREAM_IDENTIFIER: u8 = 0xff;

fn masked_crc(data: &[u8]) -> u32 {
    let crc = crc32c::crc32c(data);
    ((crc >> 15) | (crc << 17)).wrapping_add(0xa282_ead8)
}

fn chunk_header(ty: u8, len: usize) -> [u8; 4] {
    [ty, len as u8, (len >> 8) as u8, (len >> 16) as u8]
}

/// Reusable block encoder and block buffers for [`SnappyWriter`].
pub struct SnappyEncoderState {
    encoder: snap::raw::Encoder,
    block: Vec<u8>,
    compressed: Vec<u8>,
}

impl SnappyEncoderState {
    pub(crate) fn new() -> Self {
        Self {
            encoder: snap::raw::Encoder::new(),
            block: Vec::with_capacity(MAX_BLOCK_SIZE),
            compressed: vec![0; snap::raw::max_compress_len(MAX_BLOCK_SIZE)],
        }
    }

    pub(crate) fn reset(&mut self) {
        self.block.clear();
    }
}

/// Snappy writer bound to a sink, backed by pooled state.
///
/// Input is buffered per block; [`flush`](Write::flush) and
/// [`finish`](SnappyWriter::finish) emit the pending partial block.
pub struct SnappyWriter<W: Write> {
    sink: W,
    state: SnappyEncoderState,
    wrote_identifier: bool,
}

impl<W: Write> SnappyWriter<W> {
    pub(crate) fn new(sink: W, state: SnappyEncoderState) -> Self {
        Self {
            sink,
            state,
            wrote_identifier: false,
        }
    }

    pub(crate) fn into_state(self) -> SnappyEncoderState {
        self.state
    }

    fn write_identifier(&mut self) -> io::Result<()> {
        if !self.wrote_identifier {
            self.sink.write_all(STREAM_IDENTIFIER)?;
            self.wrote_identifier = true;
        }
        Ok(())
    }

    fn emit_block(&mut self) -> io::Result<()> {
        let state = &mut self.state;
        if state.block.is_empty() {
            return Ok(());
        }

        let crc = masked_crc(&state.block).to_le_bytes();
        let n = state
            .encoder
            .compress(&state.block, &mut state.compressed)
            .map_err(invalid_data)?;

        // Blocks that barely shrink are stored as-is.
        if n >= state.block.len() - state.block.len() / 8 {
            self.sink
                .write_all(&chunk_header(CHUNK_UNCOMPRESSED, state.block.len() + 4))?;
            self.sink.write_all(&crc)?;
            self.sink.write_all(&state.block)?;
        } else {
            self.sink
                .write_all(&chunk_header(CHUNK_COMPRESSED, n + 4))?;
            self.sink.write_all(&crc)?;
            self.sink.write_all(&state.compressed[..n])?;
        }

        state.block.clear();
        Ok(())
    }

    /// Emits any buffered data. Snappy streams have no trailer, so a
    /// finished stream is simply a fully flushed one.
    pub fn finish(&mut self) -> io::Result<()> {
        self.flush()
    }

    /// The bound sink.
    pub fn get_ref(&self) -> &W {
        &self.sink
    }

    /// The bound sink, mutably. Writing to it directly corrupts the stream.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.sink
    }
}

impl<W: Write> Write for SnappyWriter<W> {
    fn write(&mut self, mut data: &[u8]) -> io::Result<usize> {
        self.write_identifier()?;

        let total = data.len();
        while !data.is_empty() {
            let room = MAX_BLOCK_SIZE - self.state.block.len();
            let take = room.min(data.len());
            self.state.block.extend_from_slice(&data[..take]);
            data = &data[take..];

            if self.state.block.len() == MAX_BLOCK_SIZE {
                self.emit_block()?;
            }
        }
        Ok(total)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.write_identifier()?;
        self.emit_block()?;
        self.sink.flush()
    }
}

/// Reusable block decoder and buffers for [`SnappyReader`].
///
/// Chunk lengths are checked before anything is buffered, so the buffers
/// never grow past one maximal chunk however corrupt the input is.
pub struct SnappyDecoderState {
    decoder: snap::raw::Decoder,
    chunk: Vec<u8>,
    block: Vec<u8>,
    pos: usize,
}

impl SnappyDecoderState {
    pub(crate) fn new() -> Self {
        Self {
            decoder: snap::raw::Decoder::new(),
            chunk: Vec::with_capacity(max_compressed_chunk_len()),
            block: Vec::with_capacity(MAX_BLOCK_SIZE),
            pos: 0,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.block.clear();
        self.pos = 0;
    }

    fn verify(&self, expected: u32) -> io::Result<()> {
        if masked_crc(&self.block) != expected {
            return Err(invalid_data("snappy block checksum mismatch"));
        }
        Ok(())
    }
}

/// Snappy reader bound to a source, backed by pooled state.
pub struct SnappyReader<R: Read> {
    source: R,
    state: SnappyDecoderState,
    read_identifier: bool,
}

impl<R: Read> SnappyReader<R> {
    pub(crate) fn new(source: R, state: SnappyDecoderState) -> Self {
        Self {
            source,
            state,
            read_identifier: false,
        }
    }

    pub(crate) fn into_state(self) -> SnappyDecoderState {
        self.state
    }

    /// The bound source.
    pub fn get_ref(&self) -> &R {
        &self.source
    }

    /// Reads the chunk header, returning `None` on a clean end of stream.
    fn chunk_header(&mut self) -> io::Result<Option<(u8, usize)>> {
        let mut header = [0u8; 4];
        let mut filled = 0;
        while filled < header.len() {
            let n = read_retrying(&mut self.source, &mut header[filled..])?;
            if n == 0 {
                return if filled == 0 {
                    Ok(None)
                } else {
                    Err(truncated("snappy"))
                };
            }
            filled += n;
        }

        let len = header[1] as usize | (header[2] as usize) << 8 | (header[3] as usize) << 16;
        Ok(Some((header[0], len)))
    }

    /// Discards a chunk body without buffering it.
    fn skip_chunk_body(&mut self, len: usize) -> io::Result<()> {
        let skipped = io::copy(&mut (&mut self.source).take(len as u64), &mut io::sink())?;
        if skipped < len as u64 {
            return Err(truncated("snappy"));
        }
        Ok(())
    }

    fn read_chunk_body(&mut self, len: usize) -> io::Result<()> {
        self.state.chunk.resize(len, 0);
        self.source
            .read_exact(&mut self.state.chunk)
            .map_err(|err| match err.kind() {
                io::ErrorKind::UnexpectedEof => truncated("snappy"),
                _ => err,
            })
    }

    /// Decodes the next data chunk into the block buffer.
    ///
    /// Returns `false` at the end of the stream.
    fn next_block(&mut self) -> io::Result<bool> {
        loop {
            let Some((ty, len)) = self.chunk_header()? else {
                return Ok(false);
            };

            if !self.read_identifier && ty != CHUNK_STREAM_IDENTIFIER {
                return Err(invalid_data("snappy stream identifier missing"));
            }

            match ty {
                CHUNK_STREAM_IDENTIFIER => {
                    if len != STREAM_MAGIC.len() {
                        return Err(invalid_data("invalid snappy stream identifier"));
                    }
                    self.read_chunk_body(len)?;
                    if self.state.chunk[..] != STREAM_MAGIC[..] {
                        return Err(invalid_data("invalid snappy stream identifier"));
                    }
                    self.read_identifier = true;
                }
                CHUNK_COMPRESSED => {
                    if len < 4 || len > max_compressed_chunk_len() {
                        return Err(invalid_data("invalid snappy chunk length"));
                    }
                    self.read_chunk_body(len)?;

                    let state = &mut self.state;
                    let expected = u32::from_le_bytes([
                        state.chunk[0],
                        state.chunk[1],
                        state.chunk[2],
                        state.chunk[3],
                    ]);
                    let payload = &state.chunk[4..];
                    let decoded = snap::raw::decompress_len(payload).map_err(invalid_data)?;
                    if decoded > MAX_BLOCK_SIZE {
                        return Err(invalid_data("snappy block too large"));
                    }
                    state.block.resize(decoded, 0);
                    state
                        .decoder
                        .decompress(payload, &mut state.block)
                        .map_err(invalid_data)?;
                    state.verify(expected)?;
                    state.pos = 0;
                    return Ok(true);
                }
                CHUNK_UNCOMPRESSED => {
                    if len < 4 || len - 4 > MAX_BLOCK_SIZE {
                        return Err(invalid_data("invalid snappy chunk length"));
                    }
                    self.read_chunk_body(len)?;

                    let state = &mut self.state;
                    let expected = u32::from_le_bytes([
                        state.chunk[0],
                        state.chunk[1],
                        state.chunk[2],
                        state.chunk[3],
                    ]);
                    state.block.clear();
                    state.block.extend_from_slice(&state.chunk[4..]);
                    state.verify(expected)?;
                    state.pos = 0;
                    return Ok(true);
                }
                0x02..=0x7f => {
                    return Err(invalid_data("unskippable snappy chunk"));
                }
                // Padding and reserved skippable chunks.
                _ => self.skip_chunk_body(len)?,
            }
        }
    }
}

impl<R: Read> Read for SnappyReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        loop {
            let pending = &self.state.block[self.state.pos..];
            if !pending.is_empty() {
                let n = pending.len().min(out.len());
                out[..n].copy_from_slice(&pending[..n]);
                self.state.pos += n;
                return Ok(n);
            }

            if out.is_empty() || !self.next_block()? {
                return Ok(0);
            }
        }
    }
}
