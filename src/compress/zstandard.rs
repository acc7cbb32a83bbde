//! Zstandard streams over pooled raw contexts.
//!
//! Building a zstd context allocates its window and match tables, so the
//! pools keep contexts alive and only reinitialize the session when a
//! stream is rebound.

use std::io::{self, Read, Write};

use zstd::stream::{
    raw::{Decoder, Encoder, Operation},
    zio,
};

use super::{read_retrying, truncated};

const SCRATCH_LEN: usize = 64 * 1024;

/// Reusable compression context for [`ZstdWriter`].
pub struct ZstdEncoderState {
    encoder: Encoder<'static>,
}

impl ZstdEncoderState {
    pub(crate) fn new(level: i32) -> io::Result<Self> {
        Ok(Self {
            encoder: Encoder::new(level)?,
        })
    }

    /// Starts a new frame, keeping parameters and allocations.
    pub(crate) fn reset(&mut self) -> io::Result<()> {
        self.encoder.reinit()
    }
}

/// Zstd writer bound to a sink, backed by a pooled context.
///
/// Call [`finish`](ZstdWriter::finish) before returning the writer to its
/// pool; the pool never ends a frame on the caller's behalf.
pub struct ZstdWriter<W: Write> {
    inner: zio::Writer<W, Encoder<'static>>,
    finished: bool,
}

impl<W: Write> ZstdWriter<W> {
    pub(crate) fn new(sink: W, state: ZstdEncoderState) -> Self {
        Self {
            inner: zio::Writer::new(sink, state.encoder),
            finished: false,
        }
    }

    pub(crate) fn into_state(self) -> ZstdEncoderState {
        let (_, encoder) = self.inner.into_inner();
        ZstdEncoderState { encoder }
    }

    /// Ends the frame and flushes the sink. Calling it again is a no-op.
    pub fn finish(&mut self) -> io::Result<()> {
        if self.finished {
            return Ok(());
        }

        self.inner.finish()?;
        self.finished = true;
        self.inner.writer_mut().flush()
    }

    /// The bound sink.
    pub fn get_ref(&self) -> &W {
        self.inner.writer()
    }

    /// The bound sink, mutably. Writing to it directly corrupts the frame.
    pub fn get_mut(&mut self) -> &mut W {
        self.inner.writer_mut()
    }
}

impl<W: Write> Write for ZstdWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.finished {
            return Err(io::Error::other("zstd frame already finished"));
        }
        self.inner.write(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.finished {
            return self.inner.writer_mut().flush();
        }
        self.inner.flush()
    }
}

/// Reusable decompression context and input buffer for [`ZstdReader`].
pub struct ZstdDecoderState {
    decoder: Decoder<'static>,
    input: Vec<u8>,
    pos: usize,
    end: usize,
}

impl ZstdDecoderState {
    pub(crate) fn new() -> io::Result<Self> {
        Ok(Self {
            decoder: Decoder::new()?,
            input: vec![0; SCRATCH_LEN],
            pos: 0,
            end: 0,
        })
    }

    pub(crate) fn reset(&mut self) -> io::Result<()> {
        self.pos = 0;
        self.end = 0;
        self.decoder.reinit()
    }
}

/// Zstd reader bound to a source, backed by a pooled context.
///
/// Consecutive frames are decoded back to back. Corrupt frames and input
/// that ends mid-frame surface as `io::Error`s from `read`.
pub struct ZstdReader<R: Read> {
    source: R,
    state: ZstdDecoderState,
    eof: bool,
    in_frame: bool,
}

impl<R: Read> ZstdReader<R> {
    pub(crate) fn new(source: R, state: ZstdDecoderState) -> Self {
        Self {
            source,
            state,
            eof: false,
            in_frame: false,
        }
    }

    pub(crate) fn into_state(self) -> ZstdDecoderState {
        self.state
    }

    /// The bound source.
    pub fn get_ref(&self) -> &R {
        &self.source
    }
}

impl<R: Read> Read for ZstdReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }

        loop {
            if self.state.pos == self.state.end && !self.eof {
                let n = read_retrying(&mut self.source, &mut self.state.input)?;
                self.state.pos = 0;
                self.state.end = n;
                self.eof = n == 0;
            }

            let state = &mut self.state;
            let status = state
                .decoder
                .run_on_buffers(&state.input[state.pos..state.end], out)?;
            state.pos += status.bytes_read;

            if status.bytes_read > 0 || status.bytes_written > 0 {
                self.in_frame = status.remaining != 0;
            }
            if status.bytes_written > 0 {
                return Ok(status.bytes_written);
            }
            if self.eof && self.state.pos == self.state.end {
                return if self.in_frame {
                    Err(truncated("zstd"))
                } else {
                    Ok(0)
                };
            }
        }
    }
}
