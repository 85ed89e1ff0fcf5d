//! Minimal STOMP 1.2 text-frame codec.
//!
//! The service publishes pushes through a STOMP broker reached over a
//! WebSocket. Only the subset a subscribing client needs is implemented:
//! `CONNECT`/`CONNECTED`, `SUBSCRIBE`/`UNSUBSCRIBE`, `DISCONNECT`,
//! `MESSAGE`, `RECEIPT` and `ERROR`. A single WebSocket text message may
//! carry zero frames (heart-beat EOLs) or several.

use std::fmt;

use crate::error::{ReversiError, Result};

/// STOMP frame commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    fn parse(raw: &str) -> Result<Self> {
        Ok(match raw {
            "CONNECT" | "STOMP" => Self::Connect,
            "CONNECTED" => Self::Connected,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "DISCONNECT" => Self::Disconnect,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            other => return Err(ReversiError::Frame(format!("unknown command {other:?}"))),
        })
    }

    /// CONNECT and CONNECTED headers are never escaped.
    fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
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

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of header `name`; repeated headers keep the first, per STOMP 1.2.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// `CONNECT` for a 1.2 broker without heart-beating.
    pub fn connect(host: &str) -> Self {
        Self::new(Command::Connect)
            .with_header("accept-version", "1.2,1.1")
            .with_header("host", host)
            .with_header("heart-beat", "0,0")
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(Command::Subscribe)
            .with_header("id", id)
            .with_header("destination", destination)
            .with_header("ack", "auto")
    }

    pub fn unsubscribe(id: &str) -> Self {
        Self::new(Command::Unsubscribe).with_header("id", id)
    }

    pub fn disconnect(receipt: &str) -> Self {
        Self::new(Command::Disconnect).with_header("receipt", receipt)
    }

    /// Serialize to wire text, NUL-terminated.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(32 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if self.command.escapes_headers() {
                out.push_str(&escape(name));
                out.push(':');
                out.push_str(&escape(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

/// Decode every frame in `text`, skipping heart-beat EOLs between frames.
///
/// # Errors
///
/// Returns [`ReversiError::Frame`] on an unknown command, a header line
/// without `:`, a bad escape, or a frame missing its NUL terminator.
pub fn decode(text: &str) -> Result<Vec<Frame>> {
    let mut frames = Vec::new();
    let mut rest = text;
    loop {
        rest = rest.trim_start_matches(|c| c == '\r' || c == '\n');
        if rest.is_empty() {
            return Ok(frames);
        }
        let (frame, after) = decode_one(rest)?;
        frames.push(frame);
        rest = after;
    }
}

fn decode_one(input: &str) -> Result<(Frame, &str)> {
    let (command_line, mut rest) = split_line(input)?;
    let command = Command::parse(command_line)?;

    let mut headers = Vec::new();
    loop {
        let (line, after) = split_line(rest)?;
        rest = after;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ReversiError::Frame(format!("header without ':' {line:?}")))?;
        if command.escapes_headers() {
            headers.push((unescape(name)?, unescape(value)?));
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
                .map_err(|_| ReversiError::Frame(format!("bad content-length {v:?}")))
        })
        .transpose()?;

    let body_end = match content_length {
        Some(len) => {
            if rest.as_bytes().get(len) != Some(&0) {
                return Err(ReversiError::Frame(
                    "body does not end at content-length".into(),
                ));
            }
            len
        }
        None => rest
            .find('\0')
            .ok_or_else(|| ReversiError::Frame("unterminated frame".into()))?,
    };
    let body = rest
        .get(..body_end)
        .ok_or_else(|| ReversiError::Frame("content-length splits a character".into()))?;
    let after = rest.get(body_end + 1..).unwrap_or_default();

    Ok((
        Frame {
            command,
            headers,
            body: body.to_string(),
        },
        after,
    ))
}

fn split_line(input: &str) -> Result<(&str, &str)> {
    let (line, rest) = input
        .split_once('\n')
        .ok_or_else(|| ReversiError::Frame("truncated frame".into()))?;
    Ok((line.strip_suffix('\r').unwrap_or(line), rest))
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape(raw: &str) -> Result<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
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
            other => {
                return Err(ReversiError::Frame(format!(
                    "undefined escape sequence \\{}",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn encodes_subscribe() {
        let text = Frame::subscribe("sub-0", "/topic/game-progress/g1").encode();
        assert_eq!(
            text,
            "SUBSCRIBE\nid:sub-0\ndestination:/topic/game-progress/g1\nack:auto\n\n\0"
        );
    }

    #[test]
    fn decodes_message_with_json_body() {
        let text = "MESSAGE\ndestination:/topic/matchmaking/t1\nsubscription:sub-0\nmessage-id:7\n\n{\"status\":\"FOUND\"}\0";
        let frames = decode(text).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, Command::Message);
        assert_eq!(frames[0].header("subscription"), Some("sub-0"));
        assert_eq!(frames[0].body, "{\"status\":\"FOUND\"}");
    }

    #[test]
    fn skips_heartbeats_and_reads_several_frames() {
        let text = "\n\r\nCONNECTED\nversion:1.2\n\n\0\nRECEIPT\nreceipt-id:bye\n\n\0\n";
        let frames = decode(text).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].command, Command::Connected);
        assert_eq!(frames[1].header("receipt-id"), Some("bye"));
        assert!(decode("\n\n").unwrap().is_empty());
    }

    #[test]
    fn honours_content_length_with_embedded_nul() {
        let text = "MESSAGE\ncontent-length:3\n\na\0b\0";
        let frames = decode(text).unwrap();
        assert_eq!(frames[0].body, "a\0b");
    }

    #[test]
    fn escapes_round_trip_in_headers() {
        let frame = Frame::new(Command::Send).with_header("k:1", "line\nbreak\\");
        let encoded = frame.encode();
        assert!(encoded.contains("k\\c1:line\\nbreak\\\\"));
        assert_eq!(decode(&encoded).unwrap()[0], frame);
    }

    #[test]
    fn connected_headers_are_not_unescaped() {
        let frames = decode("CONNECTED\nserver:a\\cb\n\n\0").unwrap();
        assert_eq!(frames[0].header("server"), Some("a\\cb"));
    }

    #[test]
    fn repeated_header_keeps_first() {
        let frames = decode("MESSAGE\nfoo:1\nfoo:2\n\n\0").unwrap();
        assert_eq!(frames[0].header("foo"), Some("1"));
    }

    #[test]
    fn rejects_garbage() {
        assert!(decode("HELLO\n\n\0").is_err());
        assert!(decode("MESSAGE\nnocolon\n\n\0").is_err());
        assert!(decode("MESSAGE\n\nbody without nul").is_err());
        assert!(decode("MESSAGE\nx:\\t\n\n\0").is_err());
        assert!(decode("MESSAGE\ncontent-length:9\n\nab\0").is_err());
    }
}
