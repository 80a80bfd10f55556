//! Line-oriented IRC codec: `\r\n`-delimited, tolerant of a bare `\n`
//! (spec §6), grounded on the teacher's `tokio_util::codec` usage.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::AppError;

const MAX_LINE: usize = 8192;

/// Splits a byte stream into IRC lines and joins outgoing lines with `\r\n`.
#[derive(Debug, Default)]
pub struct IrcCodec;

impl Decoder for IrcCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> std::result::Result<Option<String>, AppError> {
        let Some(pos) = src.iter().position(|&b| b == b'\n') else {
            if src.len() > MAX_LINE {
                return Err(AppError::MalformedEvent("irc line exceeded max length without a terminator".into()));
            }
            return Ok(None);
        };

        let mut line = src.split_to(pos + 1);
        line.truncate(line.len() - 1); // drop \n
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1); // drop optional \r
        }
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }
}

impl Encoder<String> for IrcCodec {
    type Error = AppError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> std::result::Result<(), AppError> {
        dst.extend_from_slice(item.as_bytes());
        dst.extend_from_slice(b"\r\n");
        Ok(())
    }
}

/// A parsed IRC line: optional prefix, command verb, and parameters (the
/// last of which may be the colon-prefixed trailing parameter).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcMessage {
    /// `:nick!user@host` or `:server`, without the leading colon.
    pub prefix: Option<String>,
    /// Command verb, upper-cased.
    pub command: String,
    /// Positional and trailing parameters, in order.
    pub params: Vec<String>,
}

impl IrcMessage {
    /// Parse one already-dechunked line (no `\r\n`).
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line;
        let mut prefix = None;

        if let Some(stripped) = rest.strip_prefix(':') {
            let (p, r) = stripped.split_once(' ')?;
            prefix = Some(p.to_owned());
            rest = r.trim_start_matches(' ');
        }

        let (command, mut rest) = match rest.split_once(' ') {
            Some((c, r)) => (c.to_owned(), r),
            None => (rest.to_owned(), ""),
        };
        if command.is_empty() {
            return None;
        }

        let mut params = Vec::new();
        loop {
            rest = rest.trim_start_matches(' ');
            if rest.is_empty() {
                break;
            }
            if let Some(trailing) = rest.strip_prefix(':') {
                params.push(trailing.to_owned());
                break;
            }
            match rest.split_once(' ') {
                Some((p, r)) => {
                    params.push(p.to_owned());
                    rest = r;
                }
                None => {
                    params.push(rest.to_owned());
                    break;
                }
            }
        }

        Some(Self {
            prefix,
            command: command.to_uppercase(),
            params,
        })
    }

    /// Render a line from its parts. `trailing`, if given, is always
    /// colon-prefixed regardless of whether it contains spaces.
    #[must_use]
    pub fn format(prefix: Option<&str>, command: &str, params: &[&str], trailing: Option<&str>) -> String {
        let mut out = String::new();
        if let Some(p) = prefix {
            out.push(':');
            out.push_str(p);
            out.push(' ');
        }
        out.push_str(command);
        for param in params {
            out.push(' ');
            out.push_str(param);
        }
        if let Some(t) = trailing {
            out.push_str(" :");
            out.push_str(t);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_prefixed_command_with_trailing() {
        let msg = IrcMessage::parse(":bob!bob@slack PRIVMSG #general :hi there").unwrap();
        assert_eq!(msg.prefix.as_deref(), Some("bob!bob@slack"));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#general".to_owned(), "hi there".to_owned()]);
    }

    #[test]
    fn parses_unprefixed_command_without_trailing() {
        let msg = IrcMessage::parse("JOIN #general").unwrap();
        assert!(msg.prefix.is_none());
        assert_eq!(msg.command, "JOIN");
        assert_eq!(msg.params, vec!["#general".to_owned()]);
    }

    #[test]
    fn format_round_trips_trailing_param() {
        let line = IrcMessage::format(Some("bob!bob@slack"), "PRIVMSG", &["#general"], Some("hi there"));
        assert_eq!(line, ":bob!bob@slack PRIVMSG #general :hi there");
        let parsed = IrcMessage::parse(&line).unwrap();
        assert_eq!(parsed.params[1], "hi there");
    }

    #[test]
    fn decoder_tolerates_bare_lf() {
        let mut codec = IrcCodec;
        let mut buf = BytesMut::from(&b"NICK alice\n"[..]);
        let line = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(line, "NICK alice");
    }

    #[test]
    fn decoder_strips_crlf() {
        let mut codec = IrcCodec;
        let mut buf = BytesMut::from(&b"NICK alice\r\n"[..]);
        let line = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(line, "NICK alice");
    }

    #[test]
    fn decoder_returns_none_without_terminator() {
        let mut codec = IrcCodec;
        let mut buf = BytesMut::from(&b"NICK alice"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }
}
