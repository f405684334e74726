//! Builders for requests, responses, and the ACKs the transaction layer
//! generates itself.

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::message::{Request, Response};
use crate::method::Method;
use crate::status::StatusCode;

/// Fluent builder for SIP requests
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    request: Request,
}

impl RequestBuilder {
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            request: Request::new(method, uri),
        }
    }

    /// Add a Via header: `SIP/2.0/<transport> <sent_by>;branch=<branch>`
    pub fn via(mut self, sent_by: &str, transport: &str, branch: &str) -> Self {
        self.request.headers.push(
            "Via",
            &format!("SIP/2.0/{} {};branch={}", transport.to_uppercase(), sent_by, branch),
        );
        self
    }

    pub fn from(mut self, uri: &str, tag: Option<&str>) -> Self {
        let value = match tag {
            Some(tag) => format!("<{}>;tag={}", uri, tag),
            None => format!("<{}>", uri),
        };
        self.request.headers.push("From", &value);
        self
    }

    pub fn to(mut self, uri: &str, tag: Option<&str>) -> Self {
        let value = match tag {
            Some(tag) => format!("<{}>;tag={}", uri, tag),
            None => format!("<{}>", uri),
        };
        self.request.headers.push("To", &value);
        self
    }

    pub fn call_id(mut self, call_id: &str) -> Self {
        self.request.headers.push("Call-ID", call_id);
        self
    }

    pub fn cseq(mut self, seq: u32) -> Self {
        let method = self.request.method.clone();
        self.request
            .headers
            .push("CSeq", &format!("{} {}", seq, method));
        self
    }

    pub fn max_forwards(mut self, hops: u32) -> Self {
        self.request.headers.push("Max-Forwards", &hops.to_string());
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.request.headers.push(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.request.body = body.into();
        self
    }

    pub fn build(self) -> Request {
        self.request
    }
}

/// Fluent builder for SIP responses
#[derive(Debug, Clone)]
pub struct ResponseBuilder {
    response: Response,
}

impl ResponseBuilder {
    pub fn new(status: StatusCode) -> Self {
        Self {
            response: Response::new(status),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.response.headers.push(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.response.body = body.into();
        self
    }

    pub fn build(self) -> Response {
        self.response
    }
}

/// Build a response to `request` per RFC 3261 §8.2.6: Via, From, Call-ID and
/// CSeq are copied; To is copied and, for non-100 responses, given `to_tag`
/// when the request carried none.
pub fn response_for(request: &Request, status: StatusCode, to_tag: Option<&str>) -> Response {
    let mut response = Response::new(status);
    for via in request.headers.get_all("Via") {
        response.headers.push("Via", via);
    }
    if let Some(from) = request.headers.get("From") {
        response.headers.push("From", from);
    }
    if let Some(to) = request.headers.get("To") {
        let value = match (request.headers.to_tag(), to_tag) {
            (None, Some(tag)) if status != StatusCode::TRYING => {
                format!("{};tag={}", to, tag)
            }
            _ => to.to_string(),
        };
        response.headers.push("To", &value);
    }
    if let Some(call_id) = request.headers.call_id() {
        response.headers.push("Call-ID", call_id);
    }
    if let Some(cseq) = request.headers.get("CSeq") {
        response.headers.push("CSeq", cseq);
    }
    response
}

/// Build the ACK for a non-2xx final response per RFC 3261 §17.1.1.3.
///
/// The ACK reuses the INVITE's Request-URI, top Via (same branch), From and
/// Call-ID; To is taken from the response so the To-tag matches; CSeq keeps
/// the INVITE's sequence number with method ACK.
pub fn ack_for_non_2xx(invite: &Request, response: &Response) -> Result<Request> {
    if invite.method != Method::Invite {
        return Err(Error::InvalidFormat("ACK source must be an INVITE".to_string()));
    }
    let mut ack = Request::new(Method::Ack, invite.uri.clone());

    let via = invite
        .headers
        .top_via()
        .ok_or(Error::MissingHeader("Via"))?;
    ack.headers.push("Via", via);

    if let Some(route) = invite.headers.get("Route") {
        ack.headers.push("Route", route);
    }
    if let Some(from) = invite.headers.get("From") {
        ack.headers.push("From", from);
    }
    let to = response
        .headers
        .get("To")
        .or_else(|| invite.headers.get("To"))
        .ok_or(Error::MissingHeader("To"))?;
    ack.headers.push("To", to);

    let call_id = invite.headers.call_id().ok_or(Error::MissingHeader("Call-ID"))?;
    ack.headers.push("Call-ID", call_id);

    let (seq, _) = invite.headers.require_cseq()?;
    ack.headers.push("CSeq", &format!("{} ACK", seq));
    ack.headers.push("Max-Forwards", "70");
    Ok(ack)
}
