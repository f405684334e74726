use std::fmt;
use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::headers::Headers;
use crate::method::Method;
use crate::status::StatusCode;

/// A SIP request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Request method
    pub method: Method,
    /// Request-URI as it appeared on the start line
    pub uri: String,
    /// Message headers
    pub headers: Headers,
    /// Message body bytes
    pub body: Bytes,
}

/// A SIP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Status code
    pub status: StatusCode,
    /// Reason phrase as received (or canonical when built locally)
    pub reason: String,
    /// Message headers
    pub headers: Headers,
    /// Message body bytes
    pub body: Bytes,
}

/// Either a request or a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Request {
    /// Create a request with empty headers and body
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Serialize to wire form with CRLF line endings and a correct
    /// Content-Length header
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(256 + self.body.len());
        buf.put_slice(self.method.as_str().as_bytes());
        buf.put_u8(b' ');
        buf.put_slice(self.uri.as_bytes());
        buf.put_slice(b" SIP/2.0\r\n");
        serialize_headers(&self.headers, self.body.len(), &mut buf);
        buf.put_slice(&self.body);
        buf.freeze()
    }
}

impl Response {
    /// Create a response with the canonical reason phrase
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            reason: status.reason_phrase().to_string(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Serialize to wire form
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(256 + self.body.len());
        buf.put_slice(b"SIP/2.0 ");
        buf.put_slice(self.status.as_u16().to_string().as_bytes());
        buf.put_u8(b' ');
        buf.put_slice(self.reason.as_bytes());
        buf.put_slice(b"\r\n");
        serialize_headers(&self.headers, self.body.len(), &mut buf);
        buf.put_slice(&self.body);
        buf.freeze()
    }
}

impl Message {
    /// Serialize either variant to wire form
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Message::Request(r) => r.to_bytes(),
            Message::Response(r) => r.to_bytes(),
        }
    }

    /// The headers of either variant
    pub fn headers(&self) -> &Headers {
        match self {
            Message::Request(r) => &r.headers,
            Message::Response(r) => &r.headers,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, Message::Request(_))
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Request(r) => write!(f, "{} {}", r.method, r.uri),
            Message::Response(r) => write!(f, "{} {}", r.status, r.reason),
        }
    }
}

fn serialize_headers(headers: &Headers, body_len: usize, buf: &mut BytesMut) {
    let mut wrote_content_length = false;
    for (name, value) in headers.iter() {
        if name.eq_ignore_ascii_case("Content-Length") {
            // Always emit the actual body length, whatever the stored value.
            buf.put_slice(b"Content-Length: ");
            buf.put_slice(body_len.to_string().as_bytes());
            buf.put_slice(b"\r\n");
            wrote_content_length = true;
            continue;
        }
        buf.put_slice(name.as_bytes());
        buf.put_slice(b": ");
        buf.put_slice(value.as_bytes());
        buf.put_slice(b"\r\n");
    }
    if !wrote_content_length {
        buf.put_slice(b"Content-Length: ");
        buf.put_slice(body_len.to_string().as_bytes());
        buf.put_slice(b"\r\n");
    }
    buf.put_slice(b"\r\n");
}

/// Parse a complete SIP message from bytes.
///
/// The header section must be complete (terminated by CRLF CRLF); the body is
/// taken from Content-Length when present, otherwise the remainder of the
/// buffer. Line folding is tolerated by joining continuation lines.
pub fn parse_message(data: &[u8]) -> Result<Message> {
    let header_end = find_header_end(data).ok_or_else(|| {
        Error::InvalidFormat("missing header terminator".to_string())
    })?;

    let head = std::str::from_utf8(&data[..header_end]).map_err(|_| Error::InvalidUtf8)?;
    let mut lines = unfold_lines(head);

    let start_line = loop {
        match lines.next() {
            Some(line) if line.trim().is_empty() => continue,
            Some(line) => break line,
            None => return Err(Error::InvalidFormat("empty message".to_string())),
        }
    };

    let mut headers = Headers::new();
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        // Whitespace is permitted between the header name and the colon.
        let colon = line
            .find(':')
            .ok_or_else(|| Error::InvalidHeader(line.to_string()))?;
        let name = line[..colon].trim_end();
        if name.is_empty() {
            return Err(Error::InvalidHeader(line.to_string()));
        }
        headers.push(name, &line[colon + 1..]);
    }

    let body_start = header_end + 4;
    let body = match headers.content_length() {
        Some(len) => {
            if data.len() < body_start + len {
                return Err(Error::InvalidFormat(format!(
                    "short body: have {}, Content-Length {}",
                    data.len().saturating_sub(body_start),
                    len
                )));
            }
            Bytes::copy_from_slice(&data[body_start..body_start + len])
        }
        None => Bytes::copy_from_slice(&data[body_start..]),
    };

    if let Some(rest) = start_line.strip_prefix("SIP/2.0 ") {
        // Status line: SIP/2.0 SP code SP reason
        let mut parts = rest.splitn(2, ' ');
        let code = parts
            .next()
            .and_then(|c| c.parse::<u16>().ok())
            .ok_or_else(|| Error::InvalidFormat("bad status line".to_string()))?;
        let status = StatusCode::new(code)?;
        let reason = parts.next().unwrap_or("").trim().to_string();
        Ok(Message::Response(Response {
            status,
            reason,
            headers,
            body,
        }))
    } else {
        // Request line: method SP uri SP SIP/2.0
        let mut parts = start_line.split_whitespace();
        let method = Method::from_str(
            parts
                .next()
                .ok_or_else(|| Error::InvalidFormat("empty start line".to_string()))?,
        )?;
        let uri = parts
            .next()
            .ok_or_else(|| Error::InvalidFormat("missing request URI".to_string()))?
            .to_string();
        match parts.next() {
            Some("SIP/2.0") => {}
            _ => return Err(Error::InvalidVersion),
        }
        Ok(Message::Request(Request {
            method,
            uri,
            headers,
            body,
        }))
    }
}

/// Offset of the CRLF CRLF header terminator, if present
pub fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Split the header section into logical lines, joining folded continuations
fn unfold_lines(head: &str) -> impl Iterator<Item = String> + '_ {
    let mut logical: Vec<String> = Vec::new();
    for raw in head.split("\r\n") {
        match logical.last_mut() {
            Some(last) if raw.starts_with(' ') || raw.starts_with('\t') => {
                last.push(' ');
                last.push_str(raw.trim_start());
            }
            _ => logical.push(raw.to_string()),
        }
    }
    logical.into_iter()
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPTIONS: &[u8] = b"OPTIONS sip:bob@198.51.100.2 SIP/2.0\r\n\
Via: SIP/2.0/UDP 198.51.100.1:5060;branch=z9hG4bK-t1\r\n\
From: <sip:alice@198.51.100.1>;tag=abc\r\n\
To: <sip:bob@198.51.100.2>\r\n\
Call-ID: test-call-1\r\n\
CSeq: 1 OPTIONS\r\n\
Content-Length: 0\r\n\r\n";

    #[test]
    fn test_parse_request() {
        let msg = parse_message(OPTIONS).unwrap();
        let Message::Request(req) = msg else {
            panic!("expected request");
        };
        assert_eq!(req.method, Method::Options);
        assert_eq!(req.uri, "sip:bob@198.51.100.2");
        assert_eq!(req.headers.top_via_branch(), Some("z9hG4bK-t1"));
        assert_eq!(req.headers.cseq(), Some((1, Method::Options)));
        assert!(req.body.is_empty());
    }

    #[test]
    fn test_parse_response() {
        let raw = b"SIP/2.0 200 OK\r\n\
Via: SIP/2.0/UDP 198.51.100.1:5060;branch=z9hG4bK-t1\r\n\
CSeq: 1 OPTIONS\r\n\
Content-Length: 0\r\n\r\n";
        let Message::Response(res) = parse_message(raw).unwrap() else {
            panic!("expected response");
        };
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.reason, "OK");
    }

    #[test]
    fn test_parse_with_body() {
        let raw = b"MESSAGE sip:bob@example.com SIP/2.0\r\n\
Call-ID: x\r\n\
CSeq: 2 MESSAGE\r\n\
Content-Length: 5\r\n\r\nhello";
        let Message::Request(req) = parse_message(raw).unwrap() else {
            panic!("expected request");
        };
        assert_eq!(&req.body[..], b"hello");
    }

    #[test]
    fn test_parse_short_body_rejected() {
        let raw = b"MESSAGE sip:bob@example.com SIP/2.0\r\n\
Content-Length: 10\r\n\r\nhello";
        assert!(parse_message(raw).is_err());
    }

    #[test]
    fn test_parse_compact_and_whitespace_before_colon() {
        let raw = b"INVITE sip:bob@example.com SIP/2.0\r\n\
v: SIP/2.0/TCP host;branch=z9hG4bK-x\r\n\
Content-Length : 0\r\n\r\n";
        let Message::Request(req) = parse_message(raw).unwrap() else {
            panic!("expected request");
        };
        assert_eq!(req.headers.top_via_branch(), Some("z9hG4bK-x"));
        assert_eq!(req.headers.content_length(), Some(0));
    }

    #[test]
    fn test_parse_folded_header() {
        let raw = b"INVITE sip:bob@example.com SIP/2.0\r\n\
Subject: first part\r\n second part\r\n\
Content-Length: 0\r\n\r\n";
        let Message::Request(req) = parse_message(raw).unwrap() else {
            panic!("expected request");
        };
        assert_eq!(req.headers.get("Subject"), Some("first part second part"));
    }

    #[test]
    fn test_serialize_round_trip() {
        let msg = parse_message(OPTIONS).unwrap();
        let bytes = msg.to_bytes();
        let again = parse_message(&bytes).unwrap();
        assert_eq!(msg, again);
    }

    #[test]
    fn test_serialize_fixes_content_length() {
        let mut req = Request::new(Method::Message, "sip:bob@example.com");
        req.headers.push("Call-ID", "y");
        req.headers.push("CSeq", "1 MESSAGE");
        req.headers.push("Content-Length", "999");
        req.body = Bytes::from_static(b"abc");
        let bytes = req.to_bytes();
        let Message::Request(parsed) = parse_message(&bytes).unwrap() else {
            panic!("expected request");
        };
        assert_eq!(parsed.headers.content_length(), Some(3));
        assert_eq!(&parsed.body[..], b"abc");
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(parse_message(b"\r\n\r\n").is_err());
        assert!(parse_message(b"not sip at all").is_err());
        assert!(parse_message(b"FOO BAR BAZ\r\n\r\n").is_err());
    }
}
