//! Chunked transfer encoding support
//!
//! This module provides encoding and decoding for HTTP chunked transfer
//! encoding. The decoder is incremental and enforces a body size limit
//! before it buffers a chunk's data.

use super::{Error, Result, CRLF};
use std::io::Write;

/// Longest chunk-size line (size plus extensions) or trailer line accepted
const MAX_LINE_LENGTH: usize = 4096;

/// Total trailer bytes accepted after the last chunk
const MAX_TRAILER_BYTES: usize = 16 * 1024;

/// Chunked encoder
///
/// Encodes data in HTTP chunked transfer encoding format
pub struct ChunkedEncoder<W: Write> {
    writer: W,
}

impl<W: Write> ChunkedEncoder<W> {
    /// Create a new chunked encoder
    pub fn new(writer: W) -> Self {
        ChunkedEncoder { writer }
    }

    /// Write a chunk of data
    ///
    /// Empty input writes nothing; a zero-size chunk would end the body.
    pub fn write_chunk(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        write!(self.writer, "{:x}{}", data.len(), CRLF)?;
        self.writer.write_all(data)?;
        self.writer.write_all(CRLF.as_bytes())?;

        Ok(())
    }

    /// Write the final chunk (0-sized chunk)
    pub fn finish(&mut self) -> Result<()> {
        write!(self.writer, "0{}{}", CRLF, CRLF)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Chunked decoder
///
/// Decodes HTTP chunked transfer encoding format. Input may arrive in
/// arbitrary pieces; [`decode`](Self::decode) consumes what it can and
/// reports how much, so the caller keeps the rest for the next call.
#[derive(Debug)]
pub struct ChunkedDecoder {
    state: DecoderState,
    chunk_size: usize,
    chunk_read: usize,
    body_len: usize,
    trailer_len: usize,
    max_body: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum DecoderState {
    ChunkSize,
    ChunkData,
    ChunkEnd,
    Trailer,
    Complete,
}

impl ChunkedDecoder {
    /// Decoder without a body size limit
    pub fn new() -> Self {
        Self::with_limit(usize::MAX)
    }

    /// Decoder that fails once the decoded body would exceed `max_body` bytes
    pub fn with_limit(max_body: usize) -> Self {
        ChunkedDecoder {
            state: DecoderState::ChunkSize,
            chunk_size: 0,
            chunk_read: 0,
            body_len: 0,
            trailer_len: 0,
            max_body,
        }
    }

    /// Decode as much of `input` as possible, appending data to `output`
    ///
    /// Returns (bytes_consumed, is_complete). Bytes after the terminating
    /// empty line are not consumed.
    pub fn decode(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<(usize, bool)> {
        let mut pos = 0;

        loop {
            match self.state {
                DecoderState::ChunkSize => {
                    let Some(line_len) = find_line(&input[pos..], MAX_LINE_LENGTH)? else {
                        break;
                    };
                    let size = parse_chunk_size(&input[pos..pos + line_len])?;
                    pos += line_len + 2;

                    let total = self.body_len as u64 + size;
                    if total > self.max_body as u64 {
                        return Err(Error::BodyTooLarge {
                            limit: self.max_body,
                            declared: total,
                        });
                    }

                    // bounded by max_body, which is a usize
                    self.chunk_size = size as usize;
                    self.chunk_read = 0;
                    self.state = if size == 0 {
                        DecoderState::Trailer
                    } else {
                        DecoderState::ChunkData
                    };
                }

                DecoderState::ChunkData => {
                    let wanted = self.chunk_size - self.chunk_read;
                    let to_copy = wanted.min(input.len() - pos);
                    if to_copy == 0 {
                        break;
                    }
                    output.extend_from_slice(&input[pos..pos + to_copy]);
                    pos += to_copy;
                    self.chunk_read += to_copy;
                    self.body_len += to_copy;

                    if self.chunk_read == self.chunk_size {
                        self.state = DecoderState::ChunkEnd;
                    }
                }

                DecoderState::ChunkEnd => {
                    if input.len() - pos < 2 {
                        break;
                    }
                    if &input[pos..pos + 2] != CRLF.as_bytes() {
                        return Err(Error::Protocol("expected CRLF after chunk data".to_string()));
                    }
                    pos += 2;
                    self.state = DecoderState::ChunkSize;
                }

                DecoderState::Trailer => {
                    // trailer fields are consumed and discarded
                    let Some(line_len) = find_line(&input[pos..], MAX_LINE_LENGTH)? else {
                        break;
                    };
                    pos += line_len + 2;
                    if line_len == 0 {
                        self.state = DecoderState::Complete;
                        break;
                    }
                    self.trailer_len += line_len + 2;
                    if self.trailer_len > MAX_TRAILER_BYTES {
                        return Err(Error::HeadersTooLarge {
                            limit: MAX_TRAILER_BYTES,
                        });
                    }
                }

                DecoderState::Complete => break,
            }
        }

        Ok((pos, self.state == DecoderState::Complete))
    }

    /// Check if decoding is complete
    pub fn is_complete(&self) -> bool {
        self.state == DecoderState::Complete
    }

    /// Decoded body bytes so far
    pub fn body_len(&self) -> usize {
        self.body_len
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Length of the line at the start of `buf`, without its CRLF
///
/// `None` means the CRLF has not arrived yet.
fn find_line(buf: &[u8], max: usize) -> Result<Option<usize>> {
    match find_crlf(buf) {
        Some(len) if len > max => Err(Error::Protocol(format!("line exceeds {} bytes", max))),
        Some(len) => Ok(Some(len)),
        None if buf.len() > max + 1 => Err(Error::Protocol(format!("line exceeds {} bytes", max))),
        None => Ok(None),
    }
}

/// Hex chunk size, ignoring extensions after `;`
fn parse_chunk_size(line: &[u8]) -> Result<u64> {
    let digits = line.split(|&b| b == b';').next().unwrap_or_default();
    let digits = trim_ows(digits);
    if digits.is_empty() {
        return Err(Error::InvalidChunkSize(String::from_utf8_lossy(line).into_owned()));
    }

    digits.iter().try_fold(0u64, |size, &b| {
        let digit = (b as char)
            .to_digit(16)
            .ok_or_else(|| Error::InvalidChunkSize(String::from_utf8_lossy(line).into_owned()))?;
        size.checked_mul(16)
            .and_then(|s| s.checked_add(u64::from(digit)))
            .ok_or_else(|| Error::InvalidChunkSize(String::from_utf8_lossy(line).into_owned()))
    })
}

fn trim_ows(mut s: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = s {
        s = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = s {
        s = rest;
    }
    s
}

/// Find CRLF in buffer
pub(crate) fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Decode complete chunked body from bytes
pub fn decode_chunked_body(input: &[u8], max_body: usize) -> Result<Vec<u8>> {
    let mut decoder = ChunkedDecoder::with_limit(max_body);
    let mut output = Vec::new();

    let (_, complete) = decoder.decode(input, &mut output)?;
    if !complete {
        return Err(Error::Incomplete);
    }

    Ok(output)
}

/// Encode data as chunked body
pub fn encode_chunked_body(data: &[u8], chunk_size: usize) -> Result<Vec<u8>> {
    if chunk_size == 0 {
        return Err(Error::InvalidChunkSize("chunk size must be at least 1".to_string()));
    }

    let mut output = Vec::with_capacity(data.len() + 16);
    let mut encoder = ChunkedEncoder::new(&mut output);

    for chunk in data.chunks(chunk_size) {
        encoder.write_chunk(chunk)?;
    }

    encoder.finish()?;

    Ok(output)
}
