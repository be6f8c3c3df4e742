//! Framing codecs.
//!
//! [`JsonLineCodec`] frames one JSON document per line. It is used for the job
//! handoff and for JSON-RPC traffic between host and agent.
//!
//! [`ContentLengthCodec`] implements the LSP base protocol framing
//! (`Content-Length: N\r\n\r\n` followed by N bytes of JSON) spoken by the
//! language server inside the sandbox.

use crate::error::{ProtocolError, Result};
use crate::jsonrpc::Message;
use bytes::{BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

/// Upper bound for a single framed message (16 MiB).
pub const MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

/// Upper bound for an LSP header section.
const MAX_HEADER_BYTES: usize = 8 * 1024;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Newline-delimited JSON codec for any serde type.
///
/// Blank lines are skipped.
#[derive(Debug)]
pub struct JsonLineCodec<T> {
    lines: LinesCodec,
    max_length: usize,
    _item: PhantomData<fn() -> T>,
}

impl<T> JsonLineCodec<T> {
    /// Create a codec with the default size limit.
    pub fn new() -> Self {
        Self::with_max_length(MAX_MESSAGE_BYTES)
    }

    /// Create a codec rejecting lines longer than `max_length` bytes.
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_length),
            max_length,
            _item: PhantomData,
        }
    }

    fn map_err(&self, err: LinesCodecError, buffered: usize) -> ProtocolError {
        match err {
            LinesCodecError::MaxLineLengthExceeded => ProtocolError::TooLarge {
                size: buffered,
                limit: self.max_length,
            },
            LinesCodecError::Io(e) => ProtocolError::Io(e),
        }
    }
}

impl<T> Default for JsonLineCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> Decoder for JsonLineCodec<T> {
    type Item = T;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<T>> {
        loop {
            let buffered = src.len();
            match self.lines.decode(src) {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => return Ok(Some(serde_json::from_str(&line)?)),
                Ok(None) => return Ok(None),
                Err(e) => return Err(self.map_err(e, buffered)),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<T>> {
        loop {
            let buffered = src.len();
            match self.lines.decode_eof(src) {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => return Ok(Some(serde_json::from_str(&line)?)),
                Ok(None) => return Ok(None),
                Err(e) => return Err(self.map_err(e, buffered)),
            }
        }
    }
}

impl<T: Serialize> Encoder<T> for JsonLineCodec<T> {
    type Error = ProtocolError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<()> {
        let json = serde_json::to_vec(&item)?;
        if json.len() > self.max_length {
            return Err(ProtocolError::TooLarge {
                size: json.len(),
                limit: self.max_length,
            });
        }
        dst.reserve(json.len() + 1);
        dst.put_slice(&json);
        dst.put_u8(b'\n');
        Ok(())
    }
}

/// LSP base protocol codec carrying validated JSON-RPC messages.
#[derive(Debug)]
pub struct ContentLengthCodec {
    max_length: usize,
    /// Body length of a frame whose header has already been consumed.
    pending: Option<usize>,
}

impl ContentLengthCodec {
    /// Create a codec with the default size limit.
    pub fn new() -> Self {
        Self::with_max_length(MAX_MESSAGE_BYTES)
    }

    /// Create a codec rejecting bodies longer than `max_length` bytes.
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            pending: None,
        }
    }
}

impl Default for ContentLengthCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_content_length(header: &[u8]) -> Result<usize> {
    let header = std::str::from_utf8(header)
        .map_err(|_| ProtocolError::Header("header is not valid UTF-8".into()))?;

    let mut length = None;
    for line in header.split("\r\n") {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ProtocolError::Header(format!("malformed header line {line:?}")))?;
        // Content-Type and unknown headers are accepted and ignored
        if name.trim().eq_ignore_ascii_case("content-length") {
            let parsed = value
                .trim()
                .parse::<usize>()
                .map_err(|_| ProtocolError::Header(format!("bad Content-Length {value:?}")))?;
            length = Some(parsed);
        }
    }
    length.ok_or_else(|| ProtocolError::Header("missing Content-Length".into()))
}

impl Decoder for ContentLengthCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        let length = match self.pending {
            Some(length) => length,
            None => {
                let Some(end) = src
                    .windows(HEADER_TERMINATOR.len())
                    .position(|w| w == HEADER_TERMINATOR)
                else {
                    if src.len() > MAX_HEADER_BYTES {
                        return Err(ProtocolError::Header("header section too long".into()));
                    }
                    return Ok(None);
                };
                // Consume the header section including the blank line
                let header = src.split_to(end + HEADER_TERMINATOR.len());
                let length = parse_content_length(&header[..end])?;
                if length > self.max_length {
                    return Err(ProtocolError::TooLarge {
                        size: length,
                        limit: self.max_length,
                    });
                }
                self.pending = Some(length);
                length
            }
        };

        // Wait for the full body
        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        self.pending = None;
        let body = src.split_to(length);
        Message::decode(&body).map(Some)
    }
}

impl Encoder<Message> for ContentLengthCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        let body = item.encode()?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        dst.reserve(header.len() + body.len());
        dst.put_slice(header.as_bytes());
        dst.put_slice(&body);
        Ok(())
    }
}
