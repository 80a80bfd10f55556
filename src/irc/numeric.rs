//! Numeric reply constants used by this bridge (spec §4.5).

use crate::irc::proto::IrcMessage;

/// Start of the registration block.
pub const RPL_WELCOME: u16 = 1;
/// Registration block.
pub const RPL_YOURHOST: u16 = 2;
/// Registration block.
pub const RPL_CREATED: u16 = 3;
/// Registration block.
pub const RPL_MYINFO: u16 = 4;
/// Registration block / `ISUPPORT`.
pub const RPL_ISUPPORT: u16 = 5;
/// No MOTD file; sent instead of a MOTD block.
pub const ERR_NOMOTD: u16 = 422;
/// User is marked away.
pub const RPL_AWAY: u16 = 301;
/// USERHOST reply.
pub const RPL_USERHOST: u16 = 302;
/// WHO: one matching entry.
pub const RPL_WHOREPLY: u16 = 352;
/// WHO: end marker.
pub const RPL_ENDOFWHO: u16 = 315;
/// WHOIS: user/host/realname line.
pub const RPL_WHOISUSER: u16 = 311;
/// WHOIS: server line.
pub const RPL_WHOISSERVER: u16 = 312;
/// WHOIS: idle time.
pub const RPL_WHOISIDLE: u16 = 317;
/// WHOIS: end marker.
pub const RPL_ENDOFWHOIS: u16 = 318;
/// WHOIS: channel list.
pub const RPL_WHOISCHANNELS: u16 = 319;
/// LIST: one channel entry.
pub const RPL_LIST: u16 = 322;
/// LIST: end marker.
pub const RPL_LISTEND: u16 = 323;
/// TOPIC: current topic.
pub const RPL_TOPIC: u16 = 332;
/// TOPIC: who/when set it.
pub const RPL_TOPICWHOTIME: u16 = 333;
/// NAMES: one batch of names.
pub const RPL_NAMREPLY: u16 = 353;
/// NAMES: end marker.
pub const RPL_ENDOFNAMES: u16 = 366;
/// No such nick/channel.
pub const ERR_NOSUCHNICK: u16 = 401;
/// No such channel.
pub const ERR_NOSUCHCHANNEL: u16 = 403;
/// Unknown command.
pub const ERR_UNKNOWNCOMMAND: u16 = 421;
/// Erroneous nickname during registration.
pub const ERR_ERRONEUSNICKNAME: u16 = 432;
/// Not enough parameters for the command.
pub const ERR_NEEDMOREPARAMS: u16 = 461;

/// Build a numeric reply line: `:server <NNN> <nick> [params...] [:trailing]`.
#[must_use]
pub fn reply(server: &str, numeric: u16, nick: &str, params: &[&str], trailing: Option<&str>) -> String {
    let code = format!("{numeric:03}");
    let mut all_params = Vec::with_capacity(params.len() + 1);
    all_params.push(nick);
    all_params.extend_from_slice(params);
    IrcMessage::format(Some(server), &code, &all_params, trailing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn welcome_line_contains_nick() {
        let line = reply("irslackd", RPL_WELCOME, "alice", &[], Some("Welcome to the Internet Relay Network alice"));
        assert_eq!(line, ":irslackd 001 alice :Welcome to the Internet Relay Network alice");
    }

    #[test]
    fn no_motd_has_no_trailing_params() {
        let line = reply("irslackd", ERR_NOMOTD, "alice", &[], Some("MOTD File is missing"));
        assert_eq!(line, ":irslackd 422 alice :MOTD File is missing");
    }
}
