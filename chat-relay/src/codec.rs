//! Newline-delimited framing for the inbound byte stream.
//!
//! [`FrameCodec`] buffers partial reads, yields every complete line already
//! in the buffer before asking for more bytes, and turns bad input into a
//! per-frame [`DecodeError`] instead of a stream error, so a single garbled
//! slice never ends the connection.

use std::{io, str};

use bytes::{Buf, BytesMut};
use tokio::io::AsyncRead;
use tokio_util::codec::{Decoder, FramedRead};

use crate::error::DecodeError;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;

/// Outcome of decoding one slice of the stream.
pub type DecodedFrame = Result<String, DecodeError>;

/// Lazy sequence of frames read from one connection.
pub type FrameReader<R> = FramedRead<R, FrameCodec>;

pub fn frame_reader<R: AsyncRead>(reader: R, max_frame_bytes: usize) -> FrameReader<R> {
    FramedRead::new(reader, FrameCodec::new(max_frame_bytes))
}

#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_bytes: usize,
    // Offset up to which the buffer is known to contain no newline.
    next_index: usize,
    // Prefix of the pending partial frame already known to be valid UTF-8.
    valid_utf8: usize,
    // Set after an oversized frame; input is dropped until the next newline.
    discarding: bool,
}

impl FrameCodec {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            next_index: 0,
            valid_utf8: 0,
            discarding: false,
        }
    }

    fn finish_line(&self, raw: &[u8]) -> Option<DecodedFrame> {
        let line = raw.strip_suffix(b"\r").unwrap_or(raw);
        if line.len() > self.max_frame_bytes {
            return Some(Err(DecodeError::FrameTooLong {
                limit: self.max_frame_bytes,
            }));
        }
        match str::from_utf8(line) {
            Ok(text) if text.trim().is_empty() => None,
            Ok(text) => Some(Ok(text.to_string())),
            Err(_) => Some(Err(DecodeError::InvalidUtf8)),
        }
    }

    fn reset(&mut self, buf: &mut BytesMut) {
        buf.clear();
        self.rewind();
    }

    fn rewind(&mut self) {
        self.next_index = 0;
        self.valid_utf8 = 0;
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl Decoder for FrameCodec {
    type Item = DecodedFrame;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<DecodedFrame>, io::Error> {
        loop {
            let newline = buf[self.next_index..]
                .iter()
                .position(|byte| *byte == b'\n')
                .map(|offset| self.next_index + offset);

            match (self.discarding, newline) {
                (true, Some(end)) => {
                    buf.advance(end + 1);
                    self.rewind();
                    self.discarding = false;
                }
                (true, None) => {
                    self.reset(buf);
                    return Ok(None);
                }
                (false, Some(end)) => {
                    self.rewind();
                    let line = buf.split_to(end + 1);
                    if let Some(frame) = self.finish_line(&line[..end]) {
                        return Ok(Some(frame));
                    }
                }
                (false, None) => {
                    if buf.len() > self.max_frame_bytes {
                        self.reset(buf);
                        self.discarding = true;
                        return Ok(Some(Err(DecodeError::FrameTooLong {
                            limit: self.max_frame_bytes,
                        })));
                    }
                    // A pending partial frame that can never become valid UTF-8 is
                    // dropped now rather than poisoning whatever arrives next.
                    // Only the bytes after the last validated prefix are scanned.
                    let checked = str::from_utf8(&buf[self.valid_utf8..]).map(str::len);
                    match checked {
                        Ok(len) => self.valid_utf8 += len,
                        Err(err) if err.error_len().is_some() => {
                            self.reset(buf);
                            return Ok(Some(Err(DecodeError::InvalidUtf8)));
                        }
                        Err(err) => self.valid_utf8 += err.valid_up_to(),
                    }
                    self.next_index = buf.len();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<DecodedFrame>, io::Error> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        if buf.is_empty() || self.discarding {
            self.reset(buf);
            return Ok(None);
        }
        let rest = buf.split();
        self.rewind();
        Ok(self.finish_line(&rest))
    }
}
