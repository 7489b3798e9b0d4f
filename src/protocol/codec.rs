//! Newline-delimited JSON framing for envelopes.
//!
//! Each envelope is one compact JSON object followed by `\n`. Compact JSON
//! never contains a raw newline, so a corrupt frame costs exactly one line:
//! the reader reports it and resynchronises at the next newline.

use crate::error::{PeerError, Result};
use crate::protocol::Envelope;
use std::io::{BufRead, Read, Write};

/// Default upper bound for one encoded envelope
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

/// Encode one envelope as a complete frame, trailing newline included
pub fn encode_frame(envelope: &Envelope) -> Result<Vec<u8>> {
    let mut frame = serde_json::to_vec(envelope)?;
    frame.push(b'\n');
    Ok(frame)
}

pub struct EnvelopeWriter<W> {
    inner: W,
}

impl<W: Write> EnvelopeWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn write(&mut self, envelope: &Envelope) -> Result<()> {
        let frame = encode_frame(envelope)?;
        self.write_frame(&frame)
    }

    /// Write an already encoded frame (see [`encode_frame`])
    pub fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.inner.write_all(frame)?;
        self.inner.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

pub struct EnvelopeReader<R> {
    inner: R,
    max_frame_len: usize,
    buf: Vec<u8>,
}

impl<R: BufRead> EnvelopeReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_max_frame_len(inner, DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(inner: R, max_frame_len: usize) -> Self {
        Self {
            inner,
            max_frame_len,
            buf: Vec::new(),
        }
    }

    /// Read the next envelope.
    ///
    /// - `Ok(Some(_))`: a decoded envelope (not yet verified)
    /// - `Ok(None)`: the peer closed the stream cleanly
    /// - `Err(PeerError::Serialization(_))`: corrupt, truncated or oversized
    ///   frame; the stream is positioned at the start of the next frame
    /// - any other `Err`: the stream itself failed
    pub fn read_envelope(&mut self) -> Result<Option<Envelope>> {
        loop {
            self.buf.clear();
            let limit = self.max_frame_len as u64 + 1;
            let read = (&mut self.inner)
                .take(limit)
                .read_until(b'\n', &mut self.buf)?;

            if read == 0 {
                return Ok(None);
            }

            if self.buf.last() != Some(&b'\n') {
                if read as u64 >= limit {
                    self.discard_line()?;
                    return Err(PeerError::Serialization(format!(
                        "frame exceeds {} bytes",
                        self.max_frame_len
                    )));
                }
                return Err(PeerError::Serialization(
                    "truncated frame at end of stream".to_string(),
                ));
            }

            self.buf.pop();
            if self.buf.last() == Some(&b'\r') {
                self.buf.pop();
            }
            if self.buf.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            return serde_json::from_slice(&self.buf)
                .map(Some)
                .map_err(|e| PeerError::Serialization(format!("Failed to decode envelope: {e}")));
        }
    }

    /// Skip the rest of an oversized frame without buffering it
    fn discard_line(&mut self) -> Result<()> {
        loop {
            let available = self.inner.fill_buf()?;
            if available.is_empty() {
                return Ok(());
            }
            match available.iter().position(|b| *b == b'\n') {
                Some(pos) => {
                    self.inner.consume(pos + 1);
                    return Ok(());
                }
                None => {
                    let len = available.len();
                    self.inner.consume(len);
                }
            }
        }
    }
}

impl<R: BufRead> Iterator for EnvelopeReader<R> {
    type Item = Result<Envelope>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_envelope().transpose()
    }
}
