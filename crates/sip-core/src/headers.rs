use std::str::FromStr;

use crate::error::{Error, Result};
use crate::method::Method;

/// An ordered SIP header collection.
///
/// Headers keep their arrival order (significant for Via and Route) and are
/// looked up case-insensitively. Compact forms are normalized to the long
/// form on insertion so `get("via")` finds a header that arrived as `v:`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

/// Expand a compact header name to its long form (RFC 3261 §7.3.3)
fn expand_compact(name: &str) -> &str {
    if name.len() != 1 {
        return name;
    }
    match name.as_bytes()[0].to_ascii_lowercase() {
        b'v' => "Via",
        b'f' => "From",
        b't' => "To",
        b'i' => "Call-ID",
        b'm' => "Contact",
        b'l' => "Content-Length",
        b'c' => "Content-Type",
        b'e' => "Content-Encoding",
        b's' => "Subject",
        b'k' => "Supported",
        _ => name,
    }
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header, normalizing compact names
    pub fn push(&mut self, name: &str, value: &str) {
        self.entries
            .push((expand_compact(name.trim()).to_string(), value.trim().to_string()));
    }

    /// First value for `name`, if present
    pub fn get(&self, name: &str) -> Option<&str> {
        let name = expand_compact(name);
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for `name` in arrival order
    pub fn get_all<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> {
        let name = expand_compact(name).to_string();
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(&name))
            .map(|(_, v)| v.as_str())
    }

    /// Replace the first occurrence of `name`, or append if absent
    pub fn set(&mut self, name: &str, value: &str) {
        let canonical = expand_compact(name);
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(canonical))
        {
            entry.1 = value.trim().to_string();
        } else {
            self.push(name, value);
        }
    }

    /// Remove every occurrence of `name`
    pub fn remove(&mut self, name: &str) {
        let canonical = expand_compact(name);
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(canonical));
    }

    /// Number of header lines
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over (name, value) pairs in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    // Typed accessors consumed by the transport and transaction layers.

    /// Top (first) Via header value
    pub fn top_via(&self) -> Option<&str> {
        // Multiple Via values may share one header line; only the first
        // comma-separated element is the topmost.
        self.get("Via").map(|v| v.split(',').next().unwrap_or(v).trim())
    }

    /// `branch` parameter of the top Via
    pub fn top_via_branch(&self) -> Option<&str> {
        param_value(self.top_via()?, "branch")
    }

    /// sent-by (host[:port]) of the top Via
    pub fn top_via_sent_by(&self) -> Option<&str> {
        let via = self.top_via()?;
        // "SIP/2.0/UDP host:port;params" - sent-by is the token after the
        // transport, up to the first semicolon.
        let after_proto = via.split_whitespace().nth(1)?;
        Some(after_proto.split(';').next().unwrap_or(after_proto).trim())
    }

    /// CSeq sequence number and method
    pub fn cseq(&self) -> Option<(u32, Method)> {
        let value = self.get("CSeq")?;
        let mut parts = value.split_whitespace();
        let seq = parts.next()?.parse::<u32>().ok()?;
        let method = Method::from_str(parts.next()?).ok()?;
        Some((seq, method))
    }

    /// Call-ID value
    pub fn call_id(&self) -> Option<&str> {
        self.get("Call-ID")
    }

    /// `tag` parameter of the From header
    pub fn from_tag(&self) -> Option<&str> {
        param_value(self.get("From")?, "tag")
    }

    /// `tag` parameter of the To header
    pub fn to_tag(&self) -> Option<&str> {
        param_value(self.get("To")?, "tag")
    }

    /// Parsed Content-Length, if present and numeric
    pub fn content_length(&self) -> Option<usize> {
        self.get("Content-Length")?.trim().parse().ok()
    }

    /// CSeq accessor that errors when absent, for transaction key derivation
    pub fn require_cseq(&self) -> Result<(u32, Method)> {
        self.cseq().ok_or(Error::MissingHeader("CSeq"))
    }

    /// Via branch accessor that errors when absent
    pub fn require_branch(&self) -> Result<&str> {
        self.top_via_branch().ok_or(Error::MissingHeader("Via branch"))
    }
}

/// Extract a `;name=value` parameter from a header value
fn param_value<'a>(value: &'a str, name: &str) -> Option<&'a str> {
    for param in value.split(';').skip(1) {
        let mut kv = param.splitn(2, '=');
        let key = kv.next()?.trim();
        if key.eq_ignore_ascii_case(name) {
            return Some(kv.next().unwrap_or("").trim());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Headers {
        let mut h = Headers::new();
        h.push("Via", "SIP/2.0/UDP 198.51.100.1:5060;branch=z9hG4bK-t1");
        h.push("From", "Alice <sip:alice@example.com>;tag=1928301774");
        h.push("To", "Bob <sip:bob@example.com>");
        h.push("i", "a84b4c76e66710");
        h.push("CSeq", "314159 INVITE");
        h.push("l", "0");
        h
    }

    #[test]
    fn test_compact_form_normalization() {
        let h = sample();
        assert_eq!(h.call_id(), Some("a84b4c76e66710"));
        assert_eq!(h.content_length(), Some(0));
        assert_eq!(h.get("call-id"), Some("a84b4c76e66710"));
    }

    #[test]
    fn test_via_branch_and_sent_by() {
        let h = sample();
        assert_eq!(h.top_via_branch(), Some("z9hG4bK-t1"));
        assert_eq!(h.top_via_sent_by(), Some("198.51.100.1:5060"));
    }

    #[test]
    fn test_via_comma_folding() {
        let mut h = Headers::new();
        h.push(
            "Via",
            "SIP/2.0/UDP a.example.com;branch=z9hG4bK-top, SIP/2.0/UDP b.example.com;branch=z9hG4bK-bot",
        );
        assert_eq!(h.top_via_branch(), Some("z9hG4bK-top"));
        assert_eq!(h.top_via_sent_by(), Some("a.example.com"));
    }

    #[test]
    fn test_cseq() {
        let h = sample();
        assert_eq!(h.cseq(), Some((314159, Method::Invite)));
    }

    #[test]
    fn test_tags() {
        let h = sample();
        assert_eq!(h.from_tag(), Some("1928301774"));
        assert_eq!(h.to_tag(), None);
    }

    #[test]
    fn test_set_replaces_first() {
        let mut h = sample();
        h.set("To", "Bob <sip:bob@example.com>;tag=a6c85cf");
        assert_eq!(h.to_tag(), Some("a6c85cf"));
        assert_eq!(h.get_all("To").count(), 1);
    }

    #[test]
    fn test_ordering_preserved() {
        let mut h = Headers::new();
        h.push("Via", "SIP/2.0/UDP first");
        h.push("Via", "SIP/2.0/UDP second");
        let vias: Vec<_> = h.get_all("Via").collect();
        assert_eq!(vias, vec!["SIP/2.0/UDP first", "SIP/2.0/UDP second"]);
    }
}
