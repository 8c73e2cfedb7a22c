//! Header composition for STOMP frames

use std::collections::BTreeMap;
use std::time::Duration;

pub const AUTHORIZATION: &str = "Authorization";
pub const CONTENT_TYPE: &str = "content-type";
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";
pub const ACCEPT_VERSION: &str = "1.2,1.1,1.0";

/// `Authorization` value for a token, adding the `Bearer ` prefix when absent
pub fn bearer(token: &str) -> String {
    let token = token.trim();
    if token.starts_with("Bearer ") {
        token.to_string()
    } else {
        format!("Bearer {}", token)
    }
}

fn remove_ignore_case(headers: &mut BTreeMap<String, String>, name: &str) {
    headers.retain(|k, _| !k.eq_ignore_ascii_case(name));
}

fn contains_ignore_case(headers: &BTreeMap<String, String>, name: &str) -> bool {
    headers.keys().any(|k| k.eq_ignore_ascii_case(name))
}

/// User headers for a CONNECT frame, with `Authorization` present exactly
/// once when a token is configured
pub fn connect_headers(
    custom: &BTreeMap<String, String>,
    token: Option<&str>,
) -> BTreeMap<String, String> {
    let mut headers = custom.clone();
    if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
        remove_ignore_case(&mut headers, AUTHORIZATION);
        headers.insert(AUTHORIZATION.to_string(), bearer(token));
    }
    headers
}

/// Headers for a SEND frame.
///
/// Stored connection headers are overridden by per-call headers; the
/// content type defaults to JSON and the stored token is applied last.
pub fn send_headers(
    stored: &BTreeMap<String, String>,
    per_call: &BTreeMap<String, String>,
    token: Option<&str>,
) -> BTreeMap<String, String> {
    let mut headers = stored.clone();
    for (name, value) in per_call {
        remove_ignore_case(&mut headers, name);
        headers.insert(name.clone(), value.clone());
    }
    if !contains_ignore_case(&headers, CONTENT_TYPE) {
        headers.insert(CONTENT_TYPE.to_string(), DEFAULT_CONTENT_TYPE.to_string());
    }
    connect_headers(&headers, token)
}

/// Heart-beat intervals from one side, in milliseconds.
///
/// `send` is how often that side can send, `receive` how often it wants
/// to receive. Zero means "not at all".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartBeat {
    pub send: u64,
    pub receive: u64,
}

impl HeartBeat {
    pub fn new(send: u64, receive: u64) -> Self {
        Self { send, receive }
    }

    /// Parse a `heart-beat:cx,cy` header value
    pub fn parse(value: &str) -> Option<Self> {
        let (send, receive) = value.split_once(',')?;
        Some(Self {
            send: send.trim().parse().ok()?,
            receive: receive.trim().parse().ok()?,
        })
    }

    pub fn header_value(&self) -> String {
        format!("{},{}", self.send, self.receive)
    }
}

/// Negotiated heart-beat timing for an established session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Negotiated {
    /// How often we must send something; `None` disables it
    pub outgoing: Option<Duration>,
    /// How often the server promised to send something
    pub incoming: Option<Duration>,
}

/// Combine our offer with the server's answer
pub fn negotiate(client: HeartBeat, server: HeartBeat) -> Negotiated {
    let pick = |ours: u64, theirs: u64| {
        if ours == 0 || theirs == 0 {
            None
        } else {
            Some(Duration::from_millis(ours.max(theirs)))
        }
    };
    Negotiated {
        outgoing: pick(client.send, server.receive),
        incoming: pick(client.receive, server.send),
    }
}

/// Suggest a fix for a broker ERROR frame, based on its text
pub fn error_hint(text: &str) -> Option<&'static str> {
    let lower = text.to_ascii_lowercase();
    if ["auth", "token", "unauthorized", "forbidden", "credential"]
        .iter()
        .any(|word| lower.contains(word))
    {
        Some("Check that the authentication token is valid and not expired")
    } else if lower.contains("destination") {
        Some("Check that the destination exists and is spelled correctly")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_bearer_prefix_added_once() {
        assert_eq!(bearer("abc"), "Bearer abc");
        assert_eq!(bearer("Bearer abc"), "Bearer abc");
    }

    #[test]
    fn test_connect_headers_single_authorization() {
        let custom = map(&[("authorization", "Bearer stale"), ("X-Client", "wstester")]);
        let headers = connect_headers(&custom, Some("fresh"));
        let auth: Vec<_> = headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("authorization"))
            .collect();
        assert_eq!(auth.len(), 1);
        assert_eq!(auth[0].1, "Bearer fresh");
        assert_eq!(headers.get("X-Client").map(String::as_str), Some("wstester"));
    }

    #[test]
    fn test_connect_headers_without_token_keep_custom() {
        let custom = map(&[("Authorization", "Basic xyz")]);
        assert_eq!(connect_headers(&custom, None), custom);
        assert_eq!(connect_headers(&custom, Some("  ")), custom);
    }

    #[test]
    fn test_send_headers_merge_order() {
        let stored = map(&[("X-Tenant", "a"), ("X-Trace", "stored")]);
        let per_call = map(&[("x-trace", "call")]);
        let headers = send_headers(&stored, &per_call, Some("t"));

        assert_eq!(headers.get("X-Tenant").map(String::as_str), Some("a"));
        assert_eq!(headers.get("x-trace").map(String::as_str), Some("call"));
        assert!(!headers.contains_key("X-Trace"));
        assert_eq!(
            headers.get(CONTENT_TYPE).map(String::as_str),
            Some(DEFAULT_CONTENT_TYPE)
        );
        assert_eq!(
            headers.get(AUTHORIZATION).map(String::as_str),
            Some("Bearer t")
        );
    }

    #[test]
    fn test_send_headers_keep_explicit_content_type() {
        let per_call = map(&[("Content-Type", "text/plain")]);
        let headers = send_headers(&BTreeMap::new(), &per_call, None);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("Content-Type").map(String::as_str), Some("text/plain"));
    }

    #[test]
    fn test_negotiate() {
        let client = HeartBeat::new(10_000, 10_000);
        let n = negotiate(client, HeartBeat::new(20_000, 5_000));
        assert_eq!(n.outgoing, Some(Duration::from_millis(10_000)));
        assert_eq!(n.incoming, Some(Duration::from_millis(20_000)));

        let n = negotiate(client, HeartBeat::new(0, 0));
        assert_eq!(n, Negotiated::default());
    }

    #[test]
    fn test_parse_heart_beat() {
        assert_eq!(HeartBeat::parse("0, 4000"), Some(HeartBeat::new(0, 4000)));
        assert_eq!(HeartBeat::parse("x,1"), None);
        assert_eq!(HeartBeat::new(1, 2).header_value(), "1,2");
    }

    #[test]
    fn test_error_hint() {
        assert!(error_hint("Invalid token").unwrap().contains("token"));
        assert!(error_hint("Unknown destination /x").unwrap().contains("destination"));
        assert_eq!(error_hint("broker busy"), None);
    }
}
