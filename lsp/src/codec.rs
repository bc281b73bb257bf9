//! JSON-RPC framing codec for LSP communication.
//!
//! LSP uses `Content-Length: N\r\n\r\n{json}` framing over stdin/stdout.
//! [`FrameDecoder`] reassembles frames from arbitrarily chunked input,
//! [`FrameReader`] drives a decoder from an async reader, and
//! [`encode_frame`] produces outgoing frames.

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Frames above this size are treated as garbage and skipped.
const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// A header block that has not terminated after this many bytes is garbage.
const MAX_HEADER_BYTES: usize = 8 * 1024;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Incremental decoder over a growing receive buffer.
///
/// Bytes are appended with [`push`](Self::push) as they arrive; complete
/// frames are taken out with [`next_frame`](Self::next_frame). A partial
/// frame stays buffered until the rest of its body arrives. Header blocks
/// without a usable `Content-Length` and bodies that are not valid JSON are
/// skipped so the stream resynchronizes on the next frame.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of bytes waiting to be decoded.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Extract the next complete frame, if one is fully buffered.
    pub fn next_frame(&mut self) -> Option<serde_json::Value> {
        loop {
            let Some(header_end) = find_subslice(&self.buf, HEADER_TERMINATOR) else {
                self.discard_runaway_header();
                return None;
            };
            let body_start = header_end + HEADER_TERMINATOR.len();

            let content_length = match parse_content_length(&self.buf[..header_end]) {
                Some(len) if len <= MAX_FRAME_BYTES => len,
                Some(len) => {
                    tracing::warn!(len, "Skipping oversized LSP frame header");
                    self.buf.drain(..body_start);
                    continue;
                }
                None => {
                    tracing::debug!("Skipping LSP header block without Content-Length");
                    self.buf.drain(..body_start);
                    continue;
                }
            };

            let frame_end = body_start + content_length;
            if self.buf.len() < frame_end {
                return None;
            }

            let parsed = serde_json::from_slice(&self.buf[body_start..frame_end]);
            self.buf.drain(..frame_end);
            match parsed {
                Ok(value) => return Some(value),
                Err(e) => {
                    tracing::debug!("Dropping LSP frame with invalid JSON body: {e}");
                }
            }
        }
    }

    /// Garbage with no header terminator must not pin the buffer forever.
    /// Keep only the tail that could still be the start of a terminator.
    fn discard_runaway_header(&mut self) {
        if self.buf.len() <= MAX_HEADER_BYTES {
            return;
        }
        let keep = HEADER_TERMINATOR.len() - 1;
        let cut = self.buf.len() - keep;
        tracing::debug!(bytes = cut, "Discarding unterminated LSP header bytes");
        self.buf.drain(..cut);
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Parse the `Content-Length` value out of a header block.
///
/// The field name is matched case-insensitively; other headers (e.g.
/// `Content-Type`) are ignored.
fn parse_content_length(header: &[u8]) -> Option<usize> {
    let header = String::from_utf8_lossy(header);
    header.split("\r\n").find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if key.trim().eq_ignore_ascii_case("Content-Length") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

/// Serialize a message and prepend its `Content-Length` header.
///
/// The length is the encoded byte length of the JSON body.
pub fn encode_frame<T: Serialize + ?Sized>(msg: &T) -> serde_json::Result<Vec<u8>> {
    let body = serde_json::to_vec(msg)?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    let mut frame = Vec::with_capacity(header.len() + body.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Reads JSON-RPC frames from an async reader.
pub struct FrameReader<R> {
    reader: R,
    decoder: FrameDecoder,
    chunk: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            decoder: FrameDecoder::new(),
            chunk: vec![0u8; READ_CHUNK_BYTES],
        }
    }

    /// Read the next JSON-RPC frame.
    ///
    /// Returns `Ok(None)` on EOF. A partial frame left in the buffer at EOF
    /// is discarded.
    pub async fn read_frame(&mut self) -> Result<Option<serde_json::Value>> {
        loop {
            if let Some(frame) = self.decoder.next_frame() {
                return Ok(Some(frame));
            }

            let n = self
                .reader
                .read(&mut self.chunk)
                .await
                .context("reading from language server stdout")?;
            if n == 0 {
                if self.decoder.buffered() > 0 {
                    tracing::debug!(
                        bytes = self.decoder.buffered(),
                        "EOF with a partial LSP frame buffered"
                    );
                }
                return Ok(None);
            }
            self.decoder.push(&self.chunk[..n]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_bytes(msg: &serde_json::Value) -> Vec<u8> {
        encode_frame(msg).unwrap()
    }

    #[test]
    fn test_single_frame() {
        let msg = serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": null});
        let mut decoder = FrameDecoder::new();
        decoder.push(&frame_bytes(&msg));
        assert_eq!(decoder.next_frame(), Some(msg));
        assert_eq!(decoder.next_frame(), None);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_reassembles_across_every_split_point() {
        let first = serde_json::json!({"jsonrpc": "2.0", "method": "a", "params": {"k": "é∑"}});
        let second = serde_json::json!({"jsonrpc": "2.0", "id": 7, "result": [1, 2, 3]});
        let mut stream = frame_bytes(&first);
        stream.extend(frame_bytes(&second));

        for split in 0..=stream.len() {
            let mut decoder = FrameDecoder::new();
            let mut out = Vec::new();
            decoder.push(&stream[..split]);
            while let Some(frame) = decoder.next_frame() {
                out.push(frame);
            }
            decoder.push(&stream[split..]);
            while let Some(frame) = decoder.next_frame() {
                out.push(frame);
            }
            assert_eq!(out, vec![first.clone(), second.clone()], "split at {split}");
        }
    }

    #[test]
    fn test_byte_at_a_time_delivery() {
        let msg = serde_json::json!({"jsonrpc": "2.0", "method": "x", "params": {"text": "\\section{Ünïcödé}"}});
        let bytes = frame_bytes(&msg);
        let mut decoder = FrameDecoder::new();
        let mut out = Vec::new();
        for b in &bytes {
            decoder.push(std::slice::from_ref(b));
            if let Some(frame) = decoder.next_frame() {
                out.push(frame);
            }
        }
        assert_eq!(out, vec![msg]);
    }

    #[test]
    fn test_partial_body_waits() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"Content-Length: 10\r\n\r\n{\"a\":");
        assert_eq!(decoder.next_frame(), None);
        decoder.push(b"true}");
        assert_eq!(decoder.next_frame(), Some(serde_json::json!({"a": true})));
    }

    #[test]
    fn test_missing_content_length_is_skipped() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"Content-Type: application/json\r\n\r\n");
        decoder.push(&frame_bytes(&serde_json::json!({"id": 2})));
        assert_eq!(decoder.next_frame(), Some(serde_json::json!({"id": 2})));
    }

    #[test]
    fn test_invalid_content_length_value_is_skipped() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"Content-Length: not_a_number\r\n\r\n");
        decoder.push(&frame_bytes(&serde_json::json!({"id": 3})));
        assert_eq!(decoder.next_frame(), Some(serde_json::json!({"id": 3})));
    }

    #[test]
    fn test_invalid_json_body_dropped() {
        let mut decoder = FrameDecoder::new();
        let garbage = b"not valid json!!!";
        decoder.push(format!("Content-Length: {}\r\n\r\n", garbage.len()).as_bytes());
        decoder.push(garbage);
        decoder.push(&frame_bytes(&serde_json::json!({"id": 4})));
        assert_eq!(decoder.next_frame(), Some(serde_json::json!({"id": 4})));
    }

    #[test]
    fn test_case_insensitive_content_length() {
        let body = r#"{"jsonrpc":"2.0","id":1}"#;
        let frame = format!("content-length: {}\r\n\r\n{body}", body.len());
        let mut decoder = FrameDecoder::new();
        decoder.push(frame.as_bytes());
        assert_eq!(decoder.next_frame().unwrap()["id"], 1);
    }

    #[test]
    fn test_ignores_extra_headers() {
        let body = r#"{"jsonrpc":"2.0","id":1}"#;
        let frame = format!(
            "Content-Type: application/vscode-jsonrpc; charset=utf-8\r\nContent-Length: {}\r\n\r\n{body}",
            body.len(),
        );
        let mut decoder = FrameDecoder::new();
        decoder.push(frame.as_bytes());
        assert_eq!(decoder.next_frame().unwrap()["id"], 1);
    }

    #[test]
    fn test_multibyte_utf8_content_length_counts_bytes() {
        // "é" is 2 bytes in UTF-8, so {"k":"é"} is 10 bytes.
        let body = r#"{"k":"é"}"#;
        assert_eq!(body.len(), 10);
        let frame = format!("Content-Length: {}\r\n\r\n{body}", body.len());
        let mut decoder = FrameDecoder::new();
        decoder.push(frame.as_bytes());
        assert_eq!(decoder.next_frame().unwrap()["k"], "é");
    }

    #[test]
    fn test_unterminated_garbage_is_discarded() {
        let mut decoder = FrameDecoder::new();
        decoder.push(&vec![b'x'; MAX_HEADER_BYTES + 100]);
        assert_eq!(decoder.next_frame(), None);
        assert!(decoder.buffered() < HEADER_TERMINATOR.len());
        // The leftover garbage becomes an ignored line of the next header block.
        decoder.push(b"\r\n");
        decoder.push(&frame_bytes(&serde_json::json!({"id": 5})));
        assert_eq!(decoder.next_frame(), Some(serde_json::json!({"id": 5})));
    }

    #[test]
    fn test_write_content_length_is_byte_count() {
        let msg = serde_json::json!({"k": "é"});
        let output = String::from_utf8(frame_bytes(&msg)).unwrap();
        let body = serde_json::to_string(&msg).unwrap();
        assert_eq!(body.len(), 10);
        assert_eq!(output, format!("Content-Length: 10\r\n\r\n{body}"));
    }

    #[tokio::test]
    async fn test_reader_multiple_frames() {
        let msg1 = serde_json::json!({"jsonrpc": "2.0", "id": 1});
        let msg2 = serde_json::json!({"jsonrpc": "2.0", "id": 2});
        let mut buf = frame_bytes(&msg1);
        buf.extend(frame_bytes(&msg2));

        let mut reader = FrameReader::new(buf.as_slice());
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), msg1);
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), msg2);
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reader_eof_returns_none() {
        let buf: &[u8] = b"";
        let mut reader = FrameReader::new(buf);
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reader_eof_mid_body_returns_none() {
        let buf: &[u8] = b"Content-Length: 100\r\n\r\nhello";
        let mut reader = FrameReader::new(buf);
        assert!(reader.read_frame().await.unwrap().is_none());
    }
}
