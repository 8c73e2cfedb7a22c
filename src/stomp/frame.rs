//! STOMP frame codec
//!
//! A frame is a command line, header lines, a blank line and a body
//! terminated by NUL:
//! ```text
//! SEND\n
//! destination:/queue/a\n
//! content-length:5\n
//! \n
//! hello\0
//! ```
//! A lone end-of-line between frames is a heart-beat.

use std::fmt;
use std::str::FromStr;

use crate::common::Error;

/// Frame commands understood by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Message,
    Receipt,
    Error,
    Disconnect,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
            Self::Disconnect => "DISCONNECT",
        }
    }

    /// CONNECT and CONNECTED headers are never escaped
    fn escapes_headers(&self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONNECT" | "STOMP" => Ok(Self::Connect),
            "CONNECTED" => Ok(Self::Connected),
            "SEND" => Ok(Self::Send),
            "SUBSCRIBE" => Ok(Self::Subscribe),
            "UNSUBSCRIBE" => Ok(Self::Unsubscribe),
            "MESSAGE" => Ok(Self::Message),
            "RECEIPT" => Ok(Self::Receipt),
            "ERROR" => Ok(Self::Error),
            "DISCONNECT" => Ok(Self::Disconnect),
            other => Err(Error::Frame(format!("unknown command '{}'", other))),
        }
    }
}

/// A single STOMP frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    /// Headers in wire order; repeated names are allowed
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of a header. Later repeats are ignored, as STOMP 1.2 requires.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Encode for the wire, adding `content-length` when there is a body
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');

        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }

        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }

        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

/// One item decoded from a WebSocket message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Heartbeat,
    Frame(Frame),
}

/// Decode every frame carried in one WebSocket text message
pub fn decode(text: &str) -> Result<Vec<Decoded>, Error> {
    let mut items = Vec::new();
    let mut rest = text;

    loop {
        let trimmed = rest.trim_start_matches(['\r', '\n']);
        if trimmed.len() != rest.len() && trimmed.is_empty() && items.is_empty() {
            items.push(Decoded::Heartbeat);
        }
        if trimmed.is_empty() {
            break;
        }
        let (frame, remaining) = decode_one(trimmed)?;
        items.push(Decoded::Frame(frame));
        rest = remaining;
    }

    Ok(items)
}

fn decode_one(text: &str) -> Result<(Frame, &str), Error> {
    let (command_line, mut rest) = split_line(text)
        .ok_or_else(|| Error::Frame("frame has no command line".to_string()))?;
    let command: Command = command_line.parse()?;
    let unescape = command.escapes_headers();

    let mut headers = Vec::new();
    loop {
        let (line, after) = split_line(rest)
            .ok_or_else(|| Error::Frame(format!("{} frame ends inside headers", command)))?;
        rest = after;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::Frame(format!("header line without ':' in {}", command)))?;
        if unescape {
            headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .map(|(_, v)| {
            v.trim()
                .parse::<usize>()
                .map_err(|_| Error::Frame(format!("invalid content-length '{}'", v)))
        })
        .transpose()?;

    let (body, after) = match content_length {
        Some(len) => {
            let body = rest.get(..len).ok_or_else(|| {
                Error::Frame(format!("body shorter than content-length {}", len))
            })?;
            let after = rest[len..].strip_prefix('\0').ok_or_else(|| {
                Error::Frame("body not followed by NUL".to_string())
            })?;
            (body, after)
        }
        None => match rest.find('\0') {
            Some(end) => (&rest[..end], &rest[end + 1..]),
            None => return Err(Error::Frame(format!("{} frame is not NUL-terminated", command))),
        },
    };

    Ok((
        Frame {
            command,
            headers,
            body: body.to_string(),
        },
        after,
    ))
}

/// Split off one line, accepting both `\n` and `\r\n`
fn split_line(text: &str) -> Option<(&str, &str)> {
    let end = text.find('\n')?;
    let line = &text[..end];
    Some((line.strip_suffix('\r').unwrap_or(line), &text[end + 1..]))
}

fn escape_header(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_header(value: &str) -> Result<String, Error> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            Some(other) => {
                return Err(Error::Frame(format!("undefined escape '\\{}' in header", other)))
            }
            None => return Err(Error::Frame("dangling '\\' in header".to_string())),
        }
    }
    Ok(out)
}
