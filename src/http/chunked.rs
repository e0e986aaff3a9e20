//! Chunked transfer encoding support
//!
//! This module provides encoding and decoding for HTTP chunked transfer encoding.

use super::{Error, Result, CRLF, MAX_LINE_LEN};
use bytes::BytesMut;
use std::io::Write;

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
    /// Empty chunks are skipped; a zero-size chunk would end the body.
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

/// Parse a chunk-size line, ignoring any `;` extension
pub fn parse_chunk_size(line: &[u8]) -> Result<usize> {
    let line = String::from_utf8_lossy(line);
    let size = line.split(';').next().unwrap_or_default().trim();

    if size.is_empty() || !size.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::Protocol(format!("Invalid chunk size: {:?}", size)));
    }

    usize::from_str_radix(size, 16)
        .map_err(|_| Error::Protocol(format!("Chunk size out of range: {}", size)))
}

/// Chunked decoder
///
/// Decodes HTTP chunked transfer encoding incrementally: feed it whatever
/// bytes are buffered and it consumes as much as it can.
#[derive(Debug)]
pub struct ChunkedDecoder {
    state: DecoderState,
    remaining: usize,
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
    /// Create a new chunked decoder
    pub fn new() -> Self {
        ChunkedDecoder {
            state: DecoderState::ChunkSize,
            remaining: 0,
        }
    }

    /// Decode from `input`, appending body bytes to `output`
    ///
    /// Returns (bytes_consumed, is_complete). Bytes after the terminating
    /// empty line are left unconsumed.
    pub fn decode(&mut self, input: &[u8], output: &mut BytesMut) -> Result<(usize, bool)> {
        let mut pos = 0;

        loop {
            match self.state {
                DecoderState::ChunkSize => {
                    let Some(line) = next_line(&input[pos..])? else {
                        break;
                    };
                    self.remaining = parse_chunk_size(line.content)?;
                    pos += line.consumed;

                    self.state = if self.remaining == 0 {
                        DecoderState::Trailer
                    } else {
                        DecoderState::ChunkData
                    };
                }

                DecoderState::ChunkData => {
                    let n = self.remaining.min(input.len() - pos);
                    if n == 0 {
                        break;
                    }

                    output.extend_from_slice(&input[pos..pos + n]);
                    pos += n;
                    self.remaining -= n;

                    if self.remaining > 0 {
                        break;
                    }
                    self.state = DecoderState::ChunkEnd;
                }

                DecoderState::ChunkEnd => {
                    let rest = &input[pos..];
                    if rest.starts_with(b"\r\n") {
                        pos += 2;
                    } else if rest.starts_with(b"\n") {
                        pos += 1;
                    } else if rest.is_empty() || rest == b"\r" {
                        break;
                    } else {
                        return Err(Error::Protocol("Expected CRLF after chunk".to_string()));
                    }
                    self.state = DecoderState::ChunkSize;
                }

                DecoderState::Trailer => {
                    // Trailer fields are read and dropped.
                    let Some(line) = next_line(&input[pos..])? else {
                        break;
                    };
                    pos += line.consumed;

                    if line.content.is_empty() {
                        self.state = DecoderState::Complete;
                    }
                }

                DecoderState::Complete => break,
            }
        }

        Ok((pos, self.is_complete()))
    }

    /// Check if decoding is complete
    pub fn is_complete(&self) -> bool {
        self.state == DecoderState::Complete
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

struct Line<'a> {
    content: &'a [u8],
    consumed: usize,
}

/// Next LF-terminated line with any trailing CR stripped
fn next_line(buf: &[u8]) -> Result<Option<Line<'_>>> {
    match buf.iter().position(|&b| b == b'\n') {
        Some(lf) => {
            let content = &buf[..lf];
            let content = content.strip_suffix(b"\r").unwrap_or(content);
            Ok(Some(Line {
                content,
                consumed: lf + 1,
            }))
        }
        None if buf.len() > MAX_LINE_LEN => Err(Error::Protocol(format!(
            "Chunk line exceeds {} bytes",
            MAX_LINE_LEN
        ))),
        None => Ok(None),
    }
}

/// Decode complete chunked body from bytes
pub fn decode_chunked_body(input: &[u8]) -> Result<BytesMut> {
    let mut decoder = ChunkedDecoder::new();
    let mut output = BytesMut::new();

    let (_, complete) = decoder.decode(input, &mut output)?;
    if !complete {
        return Err(Error::Protocol("Incomplete chunked body".to_string()));
    }

    Ok(output)
}
