use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// SIP request methods
///
/// Covers the RFC 3261 core set plus the common extension methods. Any other
/// token is preserved verbatim in the `Extension` variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    /// REGISTER - bind an address-of-record to contact addresses
    Register,
    /// INVITE - initiate a session
    Invite,
    /// ACK - acknowledge a final response to an INVITE
    Ack,
    /// BYE - terminate a session
    Bye,
    /// CANCEL - cancel a pending request
    Cancel,
    /// OPTIONS - query capabilities
    Options,
    /// MESSAGE - instant message (RFC 3428)
    Message,
    /// INFO - mid-session information (RFC 6086)
    Info,
    /// UPDATE - modify session state (RFC 3311)
    Update,
    /// PRACK - provisional response acknowledgement (RFC 3262)
    Prack,
    /// SUBSCRIBE - request event notification (RFC 6665)
    Subscribe,
    /// NOTIFY - event notification (RFC 6665)
    Notify,
    /// REFER - ask the peer to issue a request (RFC 3515)
    Refer,
    /// Any other method token
    Extension(String),
}

impl Method {
    /// Canonical (upper-case) method token
    pub fn as_str(&self) -> &str {
        match self {
            Method::Register => "REGISTER",
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Bye => "BYE",
            Method::Cancel => "CANCEL",
            Method::Options => "OPTIONS",
            Method::Message => "MESSAGE",
            Method::Info => "INFO",
            Method::Update => "UPDATE",
            Method::Prack => "PRACK",
            Method::Subscribe => "SUBSCRIBE",
            Method::Notify => "NOTIFY",
            Method::Refer => "REFER",
            Method::Extension(s) => s.as_str(),
        }
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Method tokens are case-sensitive per RFC 3261; the well-known ones
        // are always upper-case on the wire.
        match s {
            "REGISTER" => Ok(Method::Register),
            "INVITE" => Ok(Method::Invite),
            "ACK" => Ok(Method::Ack),
            "BYE" => Ok(Method::Bye),
            "CANCEL" => Ok(Method::Cancel),
            "OPTIONS" => Ok(Method::Options),
            "MESSAGE" => Ok(Method::Message),
            "INFO" => Ok(Method::Info),
            "UPDATE" => Ok(Method::Update),
            "PRACK" => Ok(Method::Prack),
            "SUBSCRIBE" => Ok(Method::Subscribe),
            "NOTIFY" => Ok(Method::Notify),
            "REFER" => Ok(Method::Refer),
            other => {
                if !other.is_empty()
                    && other
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '!')
                {
                    Ok(Method::Extension(other.to_string()))
                } else {
                    Err(Error::InvalidMethod(other.to_string()))
                }
            }
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_methods() {
        assert_eq!("INVITE".parse::<Method>().unwrap(), Method::Invite);
        assert_eq!("OPTIONS".parse::<Method>().unwrap(), Method::Options);
        assert_eq!("ACK".parse::<Method>().unwrap(), Method::Ack);
    }

    #[test]
    fn test_parse_extension_method() {
        let m = "PUBLISH".parse::<Method>().unwrap();
        assert_eq!(m, Method::Extension("PUBLISH".to_string()));
        assert_eq!(m.as_str(), "PUBLISH");
    }

    #[test]
    fn test_parse_invalid_method() {
        assert!("IN VITE".parse::<Method>().is_err());
        assert!("".parse::<Method>().is_err());
    }

    #[test]
    fn test_display_round_trip() {
        for token in ["REGISTER", "INVITE", "BYE", "CANCEL", "NOTIFY"] {
            let m: Method = token.parse().unwrap();
            assert_eq!(m.to_string(), token);
        }
    }
}
