//! Delimits SIP messages in a TCP/TLS byte stream.
//!
//! SIP over a stream transport is framed by the CRLF CRLF header terminator
//! plus the Content-Length header (RFC 3261 §18.3). Peers may additionally
//! send CRLF keep-alives between messages; any leading byte below 0x41
//! (ASCII 'A') cannot start a SIP start line and is skipped.

use bytes::{Bytes, BytesMut};

use crate::error::{Error, Result};

/// Incremental SIP stream framer.
///
/// Feed raw stream bytes with [`extend`](StreamFramer::extend) and drain
/// complete messages with [`next_message`](StreamFramer::next_message).
#[derive(Debug)]
pub struct StreamFramer {
    buffer: BytesMut,
    max_message_size: usize,
}

impl StreamFramer {
    /// Create a framer that tolerates messages up to `max_message_size` bytes
    pub fn new(max_message_size: usize) -> Self {
        Self {
            // Room for one maximum message plus the start of the next.
            buffer: BytesMut::with_capacity(2 * max_message_size.min(16 * 1024)),
            max_message_size,
        }
    }

    /// Append raw bytes read from the stream
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes currently buffered
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Extract the next complete SIP message, if the buffer holds one.
    ///
    /// Returns `Ok(None)` when more bytes are needed. Errors only when the
    /// buffer grows past the maximum message size without producing a
    /// message, which the caller must treat as a poisoned connection.
    pub fn next_message(&mut self) -> Result<Option<Bytes>> {
        // Skip keep-alive and inter-message noise. Every SIP start line
        // begins with an ASCII letter ('A'..) for both requests and
        // "SIP/2.0" status lines.
        let skip = self
            .buffer
            .iter()
            .position(|&b| b >= 0x41)
            .unwrap_or(self.buffer.len());
        if skip > 0 {
            let _ = self.buffer.split_to(skip);
        }
        if self.buffer.is_empty() {
            return Ok(None);
        }

        let header_end = match find_crlf_crlf(&self.buffer) {
            Some(pos) => pos,
            None => {
                if self.buffer.len() > self.max_message_size {
                    return Err(Error::FramerOverflow {
                        size: self.buffer.len(),
                    });
                }
                return Ok(None);
            }
        };

        let content_length = scan_content_length(&self.buffer[..header_end]);
        let total = header_end + 4 + content_length;
        if total > self.max_message_size + 4 {
            return Err(Error::FramerOverflow { size: total });
        }
        if self.buffer.len() < total {
            return Ok(None);
        }

        let message = self.buffer.split_to(total).freeze();
        Ok(Some(message))
    }
}

fn find_crlf_crlf(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Scan the header section for Content-Length (or its compact form `l`).
///
/// Case-insensitive, tolerates whitespace before the colon, and takes decimal
/// digits up to the first non-digit. Absent or unparseable headers count as
/// zero.
fn scan_content_length(head: &[u8]) -> usize {
    for line in head.split(|&b| b == b'\n') {
        let line = match line.last() {
            Some(b'\r') => &line[..line.len() - 1],
            _ => line,
        };
        let colon = match line.iter().position(|&b| b == b':') {
            Some(pos) => pos,
            None => continue,
        };
        let name = trim_ascii(&line[..colon]);
        let is_content_length = name.eq_ignore_ascii_case(b"content-length")
            || (name.len() == 1 && name[0].to_ascii_lowercase() == b'l');
        if !is_content_length {
            continue;
        }
        let value = trim_ascii(&line[colon + 1..]);
        let digits: usize = value
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .fold(0usize, |acc, &b| {
                acc.saturating_mul(10).saturating_add((b - b'0') as usize)
            });
        return digits;
    }
    0
}

fn trim_ascii(mut data: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = data {
        if first.is_ascii_whitespace() {
            data = rest;
        } else {
            break;
        }
    }
    while let [rest @ .., last] = data {
        if last.is_ascii_whitespace() {
            data = rest;
        } else {
            break;
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(body: &str) -> Vec<u8> {
        format!(
            "OPTIONS sip:b@example.com SIP/2.0\r\nCall-ID: f1\r\nCSeq: 1 OPTIONS\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        )
        .into_bytes()
    }

    fn drain(framer: &mut StreamFramer) -> Vec<Bytes> {
        let mut out = Vec::new();
        while let Some(msg) = framer.next_message().unwrap() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn test_single_message() {
        let mut framer = StreamFramer::new(65535);
        let msg = message("hello");
        framer.extend(&msg);
        let out = drain(&mut framer);
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0][..], &msg[..]);
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_zero_content_length() {
        let mut framer = StreamFramer::new(65535);
        let msg = message("");
        framer.extend(&msg);
        let out = drain(&mut framer);
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0][..], &msg[..]);
    }

    #[test]
    fn test_two_messages_single_read() {
        let mut framer = StreamFramer::new(65535);
        let first = message(&"x".repeat(142));
        let second = message("");
        let mut stream = first.clone();
        stream.extend_from_slice(&second);
        framer.extend(&stream);
        let out = drain(&mut framer);
        assert_eq!(out.len(), 2);
        assert_eq!(&out[0][..], &first[..]);
        assert_eq!(&out[1][..], &second[..]);
        assert!(out[1].starts_with(b"OPTIONS sip:"));
    }

    #[test]
    fn test_split_at_every_byte_boundary() {
        let msg = message("twelve bytes");
        for split in 1..msg.len() {
            let mut framer = StreamFramer::new(65535);
            framer.extend(&msg[..split]);
            // Possibly incomplete - no message may be produced yet.
            let early = drain(&mut framer);
            framer.extend(&msg[split..]);
            let mut out = early;
            out.extend(drain(&mut framer));
            assert_eq!(out.len(), 1, "split at {}", split);
            assert_eq!(&out[0][..], &msg[..], "split at {}", split);
        }
    }

    #[test]
    fn test_keepalive_bytes_skipped() {
        let mut framer = StreamFramer::new(65535);
        let msg = message("payload");
        framer.extend(b"\r\n\r\n");
        framer.extend(&msg);
        framer.extend(b"\r\n");
        framer.extend(&msg);
        let out = drain(&mut framer);
        assert_eq!(out.len(), 2);
        assert_eq!(&out[0][..], &msg[..]);
        assert_eq!(&out[1][..], &msg[..]);
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_interleaved_noise_between_n_messages() {
        let mut framer = StreamFramer::new(65535);
        let messages: Vec<Vec<u8>> = (0..5).map(|i| message(&format!("body-{}", i))).collect();
        for msg in &messages {
            framer.extend(b"\r\n\r\n\r\n");
            framer.extend(msg);
        }
        let out = drain(&mut framer);
        assert_eq!(out.len(), messages.len());
        for (got, want) in out.iter().zip(&messages) {
            assert_eq!(&got[..], &want[..]);
        }
    }

    #[test]
    fn test_compact_content_length_and_whitespace() {
        let raw = b"MESSAGE sip:b@example.com SIP/2.0\r\nl : 4\r\n\r\nbody";
        let mut framer = StreamFramer::new(65535);
        framer.extend(raw);
        let out = drain(&mut framer);
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0][..], &raw[..]);
    }

    #[test]
    fn test_content_length_digits_up_to_non_digit() {
        // Trailing parameters after the digits are ignored.
        let raw = b"MESSAGE sip:b@example.com SIP/2.0\r\nContent-Length: 4;x\r\n\r\nbody";
        let mut framer = StreamFramer::new(65535);
        framer.extend(raw);
        let out = drain(&mut framer);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_oversize_header_is_error() {
        let mut framer = StreamFramer::new(128);
        framer.extend(&b"OPTIONS ".repeat(64));
        assert!(framer.next_message().is_err());
    }
}
