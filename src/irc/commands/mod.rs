//! IRC command vocabulary (spec §4.5): parsing inbound lines into a typed
//! dispatch table. Grounded on the teacher's `mcp::tools::*`
//! one-file-per-command layout, adapted into a flat enum since this
//! protocol's commands are simpler than MCP's tool schema.

pub mod ext;

use crate::irc::proto::IrcMessage;

/// One parsed client command from the vocabulary spec.md names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// `NICK <nick>`.
    Nick(String),
    /// `USER <user> <mode> <unused> :<realname>`.
    User {
        /// Username field.
        user: String,
        /// Realname (trailing parameter).
        realname: String,
    },
    /// `CAP ...` — negotiation is acknowledged but never changes behaviour.
    Cap,
    /// `PASS <password>`.
    Pass(String),
    /// `JOIN <chan1,chan2,...>`.
    Join(Vec<String>),
    /// `PART <chan1,chan2,...> [:reason]`.
    Part(Vec<String>, Option<String>),
    /// `PRIVMSG <target> :<text>`.
    Privmsg {
        /// Message target: a channel or nick.
        target: String,
        /// Message body.
        text: String,
    },
    /// `NOTICE <target> :<text>`.
    Notice {
        /// Message target.
        target: String,
        /// Message body.
        text: String,
    },
    /// `TOPIC <channel> [:text]`.
    Topic {
        /// Target channel.
        channel: String,
        /// New topic, or `None` to query the current one.
        text: Option<String>,
    },
    /// `LIST`.
    List,
    /// `WHO [mask]`.
    Who(Option<String>),
    /// `WHOIS <nick>`.
    Whois(String),
    /// `NAMES [channel]`.
    Names(Option<String>),
    /// `MODE <target> [modestring]` — only the channel-topic-protection bit is meaningful.
    Mode {
        /// Target channel or nick.
        target: String,
        /// Raw mode string, if given.
        modestring: Option<String>,
    },
    /// `PING <token>`.
    Ping(String),
    /// `PONG <token>`.
    Pong(String),
    /// `QUIT [:reason]`.
    Quit(Option<String>),
    /// `KICK <channel> <nick> [:reason]`.
    Kick {
        /// Target channel.
        channel: String,
        /// Nick to kick.
        nick: String,
        /// Optional reason.
        reason: Option<String>,
    },
    /// `INVITE <nick> <channel>`.
    Invite {
        /// Nick to invite.
        nick: String,
        /// Target channel.
        channel: String,
    },
    /// `AWAY [:message]`.
    Away(Option<String>),
    /// `USERHOST <nick1> [nick2...]`.
    Userhost(Vec<String>),
    /// A command outside the vocabulary spec.md names.
    Unknown(String),
}

/// Translate a parsed [`IrcMessage`] into a [`ClientCommand`].
#[must_use]
pub fn parse(msg: &IrcMessage) -> ClientCommand {
    let p = |i: usize| msg.params.get(i).cloned();
    let split_list = |s: String| s.split(',').map(str::to_owned).collect::<Vec<_>>();

    match msg.command.as_str() {
        "NICK" => ClientCommand::Nick(p(0).unwrap_or_default()),
        "USER" => ClientCommand::User {
            user: p(0).unwrap_or_default(),
            realname: p(3).unwrap_or_default(),
        },
        "CAP" => ClientCommand::Cap,
        "PASS" => ClientCommand::Pass(p(0).unwrap_or_default()),
        "JOIN" => ClientCommand::Join(p(0).map(split_list).unwrap_or_default()),
        "PART" => ClientCommand::Part(p(0).map(split_list).unwrap_or_default(), p(1)),
        "PRIVMSG" => ClientCommand::Privmsg {
            target: p(0).unwrap_or_default(),
            text: p(1).unwrap_or_default(),
        },
        "NOTICE" => ClientCommand::Notice {
            target: p(0).unwrap_or_default(),
            text: p(1).unwrap_or_default(),
        },
        "TOPIC" => ClientCommand::Topic {
            channel: p(0).unwrap_or_default(),
            text: p(1),
        },
        "LIST" => ClientCommand::List,
        "WHO" => ClientCommand::Who(p(0)),
        "WHOIS" => ClientCommand::Whois(p(0).unwrap_or_default()),
        "NAMES" => ClientCommand::Names(p(0)),
        "MODE" => ClientCommand::Mode {
            target: p(0).unwrap_or_default(),
            modestring: p(1),
        },
        "PING" => ClientCommand::Ping(p(0).unwrap_or_default()),
        "PONG" => ClientCommand::Pong(p(0).unwrap_or_default()),
        "QUIT" => ClientCommand::Quit(p(0)),
        "KICK" => ClientCommand::Kick {
            channel: p(0).unwrap_or_default(),
            nick: p(1).unwrap_or_default(),
            reason: p(2),
        },
        "INVITE" => ClientCommand::Invite {
            nick: p(0).unwrap_or_default(),
            channel: p(1).unwrap_or_default(),
        },
        "AWAY" => ClientCommand::Away(p(0)),
        "USERHOST" => ClientCommand::Userhost(msg.params.clone()),
        other => ClientCommand::Unknown(other.to_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_join_with_multiple_channels() {
        let msg = IrcMessage::parse("JOIN #general,#random").unwrap();
        assert_eq!(parse(&msg), ClientCommand::Join(vec!["#general".into(), "#random".into()]));
    }

    #[test]
    fn parses_privmsg() {
        let msg = IrcMessage::parse("PRIVMSG #general :hello there").unwrap();
        assert_eq!(
            parse(&msg),
            ClientCommand::Privmsg { target: "#general".into(), text: "hello there".into() }
        );
    }

    #[test]
    fn unrecognised_command_is_unknown() {
        let msg = IrcMessage::parse("FOOBAR baz").unwrap();
        assert_eq!(parse(&msg), ClientCommand::Unknown("FOOBAR".into()));
    }
}
