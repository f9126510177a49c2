//! Streaming base64 decoder
//!
//! Network reads arrive in arbitrarily sized pieces, so up to three encoded
//! characters are carried over between chunks. Whole quartets are decoded as
//! soon as they are complete and written straight to the sink, which can be a
//! file on the photo volume or a pre-sized buffer for preview rendering.
//!
//! The total encoded length is declared up front and must be a multiple of
//! four. Padding is only accepted at the end of the final quartet.

use std::io::Write;

use base64::engine::general_purpose::STANDARD;
use base64::{DecodeSliceError, Engine as _};
use thiserror::Error;

const PAD: u8 = b'=';

/// Quartets decoded per sink write
const QUARTETS_PER_WRITE: usize = 256;

/// Decoder error types
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("encoded length {0} is not a multiple of 4")]
    InvalidLength(usize),

    #[error("invalid symbol 0x{symbol:02x} at offset {offset}")]
    InvalidSymbol { symbol: u8, offset: usize },

    #[error("misplaced padding at offset {0}")]
    MisplacedPadding(usize),

    #[error("malformed base64 at offset {offset}: {source}")]
    Malformed {
        offset: usize,
        source: DecodeSliceError,
    },

    #[error("received more than the declared {0} bytes")]
    Overflow(usize),

    #[error("stream ended after {received} of {expected} bytes")]
    Truncated { expected: usize, received: usize },

    #[error("sink write failed: {0}")]
    Sink(#[from] std::io::Error),
}

impl DecodeError {
    /// Whether the input itself was malformed, as opposed to the sink failing
    pub fn is_malformed(&self) -> bool {
        !matches!(self, DecodeError::Sink(_))
    }
}

/// Upper bound of decoded bytes for an encoded length
pub fn decoded_capacity(encoded_len: usize) -> usize {
    encoded_len / 4 * 3
}

/// Chunked base64 decoder writing into `W`
pub struct StreamDecoder<W: Write> {
    sink: W,
    expected: usize,
    received: usize,
    decoded: usize,
    carry: [u8; 4],
    carry_len: usize,
    written: usize,
    out: Vec<u8>,
}

impl<W: Write> StreamDecoder<W> {
    /// Create a decoder for a stream of `encoded_len` characters
    pub fn new(encoded_len: usize, sink: W) -> Result<Self, DecodeError> {
        if encoded_len % 4 != 0 {
            return Err(DecodeError::InvalidLength(encoded_len));
        }

        Ok(Self {
            sink,
            expected: encoded_len,
            received: 0,
            decoded: 0,
            carry: [0; 4],
            carry_len: 0,
            written: 0,
            out: Vec::with_capacity(QUARTETS_PER_WRITE * 3),
        })
    }

    /// Decoded bytes written to the sink so far
    pub fn written(&self) -> usize {
        self.written
    }

    /// Sink holding what has been decoded so far
    pub fn sink_mut(&mut self) -> &mut W {
        &mut self.sink
    }

    /// Feed the next chunk of encoded characters
    pub fn push(&mut self, mut chunk: &[u8]) -> Result<(), DecodeError> {
        if self.received + chunk.len() > self.expected {
            return Err(DecodeError::Overflow(self.expected));
        }
        self.received += chunk.len();

        // Complete the carried-over quartet first
        if self.carry_len > 0 {
            let take = (4 - self.carry_len).min(chunk.len());
            self.carry[self.carry_len..self.carry_len + take].copy_from_slice(&chunk[..take]);
            self.carry_len += take;
            chunk = &chunk[take..];

            if self.carry_len < 4 {
                return Ok(());
            }

            let quartet = self.carry;
            self.carry_len = 0;
            self.decode_run(&quartet)?;
        }

        let whole = chunk.len() - chunk.len() % 4;
        let (body, rest) = chunk.split_at(whole);

        for run in body.chunks(QUARTETS_PER_WRITE * 4) {
            self.decode_run(run)?;
            self.flush_out()?;
        }
        self.flush_out()?;

        self.carry[..rest.len()].copy_from_slice(rest);
        self.carry_len = rest.len();
        Ok(())
    }

    /// Check the stream is complete and hand back the sink
    pub fn finish(mut self) -> Result<W, DecodeError> {
        let received = self.received;
        if self.carry_len != 0 || received != self.expected {
            return Err(DecodeError::Truncated {
                expected: self.expected,
                received,
            });
        }

        self.flush_out()?;
        self.sink.flush()?;
        Ok(self.sink)
    }

    /// Decode a run of whole quartets into the output buffer
    fn decode_run(&mut self, run: &[u8]) -> Result<(), DecodeError> {
        let offset = self.decoded;

        // Padding ends the stream, so a run that stops short of the end cannot carry any
        if offset + run.len() != self.expected && run.last() == Some(&PAD) {
            let padding = run.iter().rev().take_while(|&&b| b == PAD).count();
            return Err(DecodeError::MisplacedPadding(offset + run.len() - padding));
        }

        let start = self.out.len();
        self.out.resize(start + decoded_capacity(run.len()), 0);
        let len = STANDARD
            .decode_slice(run, &mut self.out[start..])
            .map_err(|e| malformed(e, offset))?;
        self.out.truncate(start + len);

        self.decoded += run.len();
        Ok(())
    }

    fn flush_out(&mut self) -> Result<(), DecodeError> {
        if !self.out.is_empty() {
            self.sink.write_all(&self.out)?;
            self.written += self.out.len();
            self.out.clear();
        }
        Ok(())
    }
}

/// Translate an engine error into a stream offset
fn malformed(err: DecodeSliceError, offset: usize) -> DecodeError {
    match err {
        DecodeSliceError::DecodeError(base64::DecodeError::InvalidByte(i, PAD)) => {
            DecodeError::MisplacedPadding(offset + i)
        }
        DecodeSliceError::DecodeError(base64::DecodeError::InvalidByte(i, symbol)) => {
            DecodeError::InvalidSymbol {
                symbol,
                offset: offset + i,
            }
        }
        source => DecodeError::Malformed { offset, source },
    }
}
