//! Extension slash-commands carried inside `PRIVMSG` text (spec §4.5).

/// One parsed extension command.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtCommand {
    /// `/sendfile <target> <path>`.
    SendFile {
        /// IRC-visible target.
        target: String,
        /// Path to the file to upload.
        path: String,
    },
    /// `/annoy <user> [minutes]`.
    Annoy {
        /// Target user's nick.
        user: String,
        /// Rule lifetime in minutes, default chosen by the caller if absent.
        minutes: Option<u64>,
    },
    /// `/dropannoy <user>`.
    DropAnnoy {
        /// Target user's nick.
        user: String,
    },
    /// `/listannoy`.
    ListAnnoy,
    /// `/autoreact <user> <probability> [reaction] [minutes]`.
    Autoreact {
        /// Target user's nick.
        user: String,
        /// Probability in `[0.0, 1.0]`.
        probability: f64,
        /// Reaction shortcode, default chosen by the caller if absent.
        reaction: Option<String>,
        /// Rule lifetime in minutes, default chosen by the caller if absent.
        minutes: Option<u64>,
    },
    /// `/dropautoreact <user>`.
    DropAutoreact {
        /// Target user's nick.
        user: String,
    },
    /// `/listautoreact`.
    ListAutoreact,
    /// `/me <text>`.
    Me {
        /// Action text.
        text: String,
    },
    /// `/topic <text>`.
    SetTopic {
        /// New topic text.
        text: String,
    },
    /// `/invite <nick>`.
    Invite {
        /// Nick to invite into the current channel.
        nick: String,
    },
    /// `/kick <nick>`.
    Kick {
        /// Nick to kick from the current channel.
        nick: String,
    },
    /// `/whois <nick>`.
    Whois {
        /// Target nick.
        nick: String,
    },
}

/// Parse `text` (a `PRIVMSG` body) as an extension command.
///
/// Returns `None` for plain messages and for a recognised leading `/` that
/// doesn't match any known verb or is missing required arguments — callers
/// should fall through to a normal Slack post in the former case and report
/// a command error in the latter; distinguishing the two is this module's
/// caller's job (it already has the leading `/` to tell them apart).
#[must_use]
pub fn parse(text: &str) -> Option<ExtCommand> {
    let rest = text.trim().strip_prefix('/')?;
    let mut parts = rest.split_whitespace();
    let verb = parts.next()?;
    let args: Vec<&str> = parts.collect();

    match verb {
        "sendfile" => Some(ExtCommand::SendFile {
            target: (*args.first()?).to_owned(),
            path: (*args.get(1)?).to_owned(),
        }),
        "annoy" => Some(ExtCommand::Annoy {
            user: (*args.first()?).to_owned(),
            minutes: args.get(1).and_then(|m| m.parse().ok()),
        }),
        "dropannoy" => Some(ExtCommand::DropAnnoy { user: (*args.first()?).to_owned() }),
        "listannoy" => Some(ExtCommand::ListAnnoy),
        "autoreact" => Some(ExtCommand::Autoreact {
            user: (*args.first()?).to_owned(),
            probability: args.get(1)?.parse().ok()?,
            reaction: args.get(2).map(|s| (*s).to_owned()),
            minutes: args.get(3).and_then(|m| m.parse().ok()),
        }),
        "dropautoreact" => Some(ExtCommand::DropAutoreact { user: (*args.first()?).to_owned() }),
        "listautoreact" => Some(ExtCommand::ListAutoreact),
        "me" => Some(ExtCommand::Me { text: args.join(" ") }),
        "topic" => Some(ExtCommand::SetTopic { text: args.join(" ") }),
        "invite" => Some(ExtCommand::Invite { nick: (*args.first()?).to_owned() }),
        "kick" => Some(ExtCommand::Kick { nick: (*args.first()?).to_owned() }),
        "whois" => Some(ExtCommand::Whois { nick: (*args.first()?).to_owned() }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sendfile() {
        assert_eq!(
            parse("/sendfile #general /tmp/report.pdf"),
            Some(ExtCommand::SendFile { target: "#general".into(), path: "/tmp/report.pdf".into() })
        );
    }

    #[test]
    fn parses_annoy_with_default_minutes() {
        assert_eq!(parse("/annoy bob"), Some(ExtCommand::Annoy { user: "bob".into(), minutes: None }));
    }

    #[test]
    fn parses_autoreact_full_form() {
        assert_eq!(
            parse("/autoreact bob 0.5 tada 30"),
            Some(ExtCommand::Autoreact {
                user: "bob".into(),
                probability: 0.5,
                reaction: Some("tada".into()),
                minutes: Some(30),
            })
        );
    }

    #[test]
    fn plain_message_is_not_a_command() {
        assert_eq!(parse("hello everyone"), None);
    }

    #[test]
    fn unknown_verb_is_none() {
        assert_eq!(parse("/frobnicate"), None);
    }
}
