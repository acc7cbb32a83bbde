//! Gzip streams over pooled deflate state.
//!
//! The pooled part is the raw deflate/inflate context plus the CRC and the
//! scratch buffers; the member header and trailer are produced and checked
//! here so one context can serve any number of independent streams.

use std::io::{self, Read, Write};

use flate2::{
    Compress, Compression, Crc, Decompress, FlushCompress, FlushDecompress, Status,
};

use super::{invalid_data, read_retrying, truncated};

const SCRATCH_LEN: usize = 32 * 1024;

/// Member header: deflate, no flags, no mtime, unknown OS.
const HEADER: [u8; 10] = [0x1f, 0x8b, 0x08, 0x00, 0, 0, 0, 0, 0x00, 0xff];

const FHCRC: u8 = 0x02;
const FEXTRA: u8 = 0x04;
const FNAME: u8 = 0x08;
const FCOMMENT: u8 = 0x10;

/// Reusable compression context for [`GzipWriter`].
pub struct GzipEncoderState {
    deflate: Compress,
    crc: Crc,
    scratch: Vec<u8>,
}

impl GzipEncoderState {
    pub(crate) fn new(level: Compression) -> Self {
        Self {
            deflate: Compress::new(level, false),
            crc: Crc::new(),
            scratch: vec![0; SCRATCH_LEN],
        }
    }

    pub(crate) fn reset(&mut self) {
        self.deflate.reset();
        self.crc.reset();
    }

    /// Runs one deflate call into the scratch buffer, returning
    /// `(consumed, produced, status)`.
    fn deflate(&mut self, input: &[u8], flush: FlushCompress) -> io::Result<(usize, usize, Status)> {
        let in_before = self.deflate.total_in();
        let out_before = self.deflate.total_out();
        let status = self
            .deflate
            .compress(input, &mut self.scratch, flush)
            .map_err(io::Error::other)?;
        Ok((
            (self.deflate.total_in() - in_before) as usize,
            (self.deflate.total_out() - out_before) as usize,
            status,
        ))
    }
}

/// Gzip writer bound to a sink, backed by pooled state.
///
/// Call [`finish`](GzipWriter::finish) before returning the writer to its
/// pool; the pool never finalizes a stream on the caller's behalf.
pub struct GzipWriter<W: Write> {
    sink: W,
    state: GzipEncoderState,
    header_written: bool,
    finished: bool,
}

impl<W: Write> GzipWriter<W> {
    pub(crate) fn new(sink: W, state: GzipEncoderState) -> Self {
        Self {
            sink,
            state,
            header_written: false,
            finished: false,
        }
    }

    pub(crate) fn into_state(self) -> GzipEncoderState {
        self.state
    }

    fn write_header(&mut self) -> io::Result<()> {
        if !self.header_written {
            self.sink.write_all(&HEADER)?;
            self.header_written = true;
        }
        Ok(())
    }

    /// Writes the final deflate block and the CRC/size trailer.
    ///
    /// Calling it again is a no-op.
    pub fn finish(&mut self) -> io::Result<()> {
        if self.finished {
            return Ok(());
        }
        self.write_header()?;

        loop {
            let (_, produced, status) = self.state.deflate(&[], FlushCompress::Finish)?;
            self.sink.write_all(&self.state.scratch[..produced])?;
            if status == Status::StreamEnd {
                break;
            }
        }

        self.sink.write_all(&self.state.crc.sum().to_le_bytes())?;
        self.sink.write_all(&self.state.crc.amount().to_le_bytes())?;
        self.finished = true;
        self.sink.flush()
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

impl<W: Write> Write for GzipWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.finished {
            return Err(io::Error::other("gzip stream already finished"));
        }
        self.write_header()?;

        let mut consumed = 0;
        while consumed < data.len() {
            let (read, produced, _) = self.state.deflate(&data[consumed..], FlushCompress::None)?;
            self.sink.write_all(&self.state.scratch[..produced])?;
            consumed += read;
        }

        self.state.crc.update(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.finished {
            self.write_header()?;
            loop {
                let (_, produced, _) = self.state.deflate(&[], FlushCompress::Sync)?;
                self.sink.write_all(&self.state.scratch[..produced])?;
                if produced < self.state.scratch.len() {
                    break;
                }
            }
        }
        self.sink.flush()
    }
}

/// Reusable decompression context for [`GzipReader`].
pub struct GzipDecoderState {
    inflate: Decompress,
    crc: Crc,
    input: Vec<u8>,
    pos: usize,
    end: usize,
}

impl GzipDecoderState {
    pub(crate) fn new() -> Self {
        Self {
            inflate: Decompress::new(false),
            crc: Crc::new(),
            input: vec![0; SCRATCH_LEN],
            pos: 0,
            end: 0,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.next_member();
        self.pos = 0;
        self.end = 0;
    }

    /// Prepares for another member, keeping any input already buffered.
    fn next_member(&mut self) {
        self.inflate.reset(false);
        self.crc.reset();
    }

    fn inflate(&mut self, out: &mut [u8]) -> io::Result<(usize, usize, Status)> {
        let in_before = self.inflate.total_in();
        let out_before = self.inflate.total_out();
        let status = self
            .inflate
            .decompress(&self.input[self.pos..self.end], out, FlushDecompress::None)
            .map_err(invalid_data)?;
        Ok((
            (self.inflate.total_in() - in_before) as usize,
            (self.inflate.total_out() - out_before) as usize,
            status,
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Header,
    Body,
    Done,
}

/// Gzip reader bound to a source, backed by pooled state.
///
/// Concatenated members are decoded back to back as one stream. Header,
/// checksum, and truncation problems surface as `io::Error`s from `read`,
/// as does trailing data that is not another member.
pub struct GzipReader<R: Read> {
    source: R,
    state: GzipDecoderState,
    phase: Phase,
}

impl<R: Read> GzipReader<R> {
    pub(crate) fn new(source: R, state: GzipDecoderState) -> Self {
        Self {
            source,
            state,
            phase: Phase::Header,
        }
    }

    pub(crate) fn into_state(self) -> GzipDecoderState {
        self.state
    }

    /// The bound source.
    pub fn get_ref(&self) -> &R {
        &self.source
    }

    /// Makes sure unread input is buffered; `false` means the source is exhausted.
    fn fill(&mut self) -> io::Result<bool> {
        if self.state.pos < self.state.end {
            return Ok(true);
        }
        let n = read_retrying(&mut self.source, &mut self.state.input)?;
        self.state.pos = 0;
        self.state.end = n;
        Ok(n > 0)
    }

    fn next_byte(&mut self) -> io::Result<u8> {
        if !self.fill()? {
            return Err(truncated("gzip"));
        }
        let b = self.state.input[self.state.pos];
        self.state.pos += 1;
        Ok(b)
    }

    fn skip_cstr(&mut self) -> io::Result<()> {
        while self.next_byte()? != 0 {}
        Ok(())
    }

    fn read_u32_le(&mut self) -> io::Result<u32> {
        let mut bytes = [0u8; 4];
        for b in bytes.iter_mut() {
            *b = self.next_byte()?;
        }
        Ok(u32::from_le_bytes(bytes))
    }

    fn read_header(&mut self) -> io::Result<()> {
        let mut fixed = [0u8; 10];
        for b in fixed.iter_mut() {
            *b = self.next_byte()?;
        }
        if fixed[0] != 0x1f || fixed[1] != 0x8b {
            return Err(invalid_data("invalid gzip header"));
        }
        if fixed[2] != 0x08 {
            return Err(invalid_data("unsupported gzip compression method"));
        }

        let flags = fixed[3];
        if flags & FEXTRA != 0 {
            let xlen = u16::from_le_bytes([self.next_byte()?, self.next_byte()?]);
            for _ in 0..xlen {
                self.next_byte()?;
            }
        }
        if flags & FNAME != 0 {
            self.skip_cstr()?;
        }
        if flags & FCOMMENT != 0 {
            self.skip_cstr()?;
        }
        if flags & FHCRC != 0 {
            self.next_byte()?;
            self.next_byte()?;
        }
        Ok(())
    }

    fn read_trailer(&mut self) -> io::Result<()> {
        let crc = self.read_u32_le()?;
        let size = self.read_u32_le()?;
        if crc != self.state.crc.sum() || size != self.state.crc.amount() {
            return Err(invalid_data("gzip checksum mismatch"));
        }
        Ok(())
    }
}

impl<R: Read> Read for GzipReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }

        loop {
            match self.phase {
                Phase::Done => return Ok(0),
                Phase::Header => {
                    self.read_header()?;
                    self.phase = Phase::Body;
                }
                Phase::Body => {
                    let more = self.fill()?;
                    let (read, produced, status) = self.state.inflate(out)?;
                    self.state.pos += read;
                    self.state.crc.update(&out[..produced]);

                    if status == Status::StreamEnd {
                        self.read_trailer()?;
                        self.phase = if self.fill()? {
                            self.state.next_member();
                            Phase::Header
                        } else {
                            Phase::Done
                        };
                    }
                    if produced > 0 {
                        return Ok(produced);
                    }
                    if !more && read == 0 && self.phase == Phase::Body {
                        return Err(truncated("gzip"));
                    }
                }
            }
        }
    }
}
