//! Message parser (C2): tokenize Slack's markup into a typed span sequence
//! and render it to/from IRC-safe text (spec §4.2).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::models::room::RoomIndex;
use crate::models::user::Roster;
use crate::{AppError, Result};

/// One token of Slack's message grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Span {
    /// Plain text, copied verbatim.
    Text(String),
    /// `<@U…|label>` — a user mention.
    Mention {
        /// Slack user id.
        id: String,
        /// Optional fallback label.
        label: Option<String>,
    },
    /// `<#C…|label>` — a room mention.
    RoomMention {
        /// Slack room id.
        id: String,
        /// Optional fallback label.
        label: Option<String>,
    },
    /// `<!here|…>`, `<!channel|…>`, `<!everyone|…>`, `<!subteam^…|…>`.
    Special {
        /// `here`, `channel`, `everyone`, or `subteam^<id>`.
        keyword: String,
        /// Optional fallback label.
        label: Option<String>,
    },
    /// `<url|label>` or `<url>`.
    Link {
        /// Target URL.
        url: String,
        /// Optional display label.
        label: Option<String>,
    },
    /// `:shortcode:`.
    Emoji {
        /// Shortcode without surrounding colons.
        name: String,
    },
    /// Formatting or code markers (`*bold*`, `` `code` ``, ```` ```fence``` ````);
    /// copied verbatim since IRC has no equivalent (spec §4.2).
    Raw(String),
}

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"(?P<mention><@(?P<mention_id>[A-Za-z0-9]+)(?:\|(?P<mention_label>[^>]+))?>)",
            r"|(?P<room><#(?P<room_id>[A-Za-z0-9]+)(?:\|(?P<room_label>[^>]+))?>)",
            r"|(?P<special><!(?P<special_kw>here|channel|everyone|subteam\^[A-Za-z0-9]+)(?:\|(?P<special_label>[^>]+))?>)",
            r"|(?P<link><(?P<link_url>(?:https?|mailto):[^>|]+)(?:\|(?P<link_label>[^>]+))?>)",
            r"|(?P<fence>```[\s\S]*?```)",
            r"|(?P<code>`[^`\n]+`)",
            r"|(?P<bold>\*[^*\n]+\*)",
            r"|(?P<italic>_[^_\n]+_)",
            r"|(?P<strike>~[^~\n]+~)",
            r"|(?P<emoji>:[a-zA-Z0-9_+\-]+:)",
        ))
        .expect("markup token regex is a compile-time constant")
    })
}

/// Tokenize Slack message text into a flat list of [`Span`]s.
#[must_use]
pub fn tokenize(text: &str) -> Vec<Span> {
    let re = token_re();
    let mut spans = Vec::new();
    let mut last = 0;

    for mat in re.find_iter(text) {
        if mat.start() > last {
            spans.push(Span::Text(text[last..mat.start()].to_owned()));
        }
        let caps = re.captures(&text[mat.start()..mat.end()]).expect("find_iter match must also capture");
        spans.push(span_from_captures(&caps));
        last = mat.end();
    }
    if last < text.len() {
        spans.push(Span::Text(text[last..].to_owned()));
    }
    spans
}

fn span_from_captures(caps: &regex::Captures<'_>) -> Span {
    if let Some(id) = caps.name("mention_id") {
        return Span::Mention {
            id: id.as_str().to_owned(),
            label: caps.name("mention_label").map(|m| m.as_str().to_owned()),
        };
    }
    if let Some(id) = caps.name("room_id") {
        return Span::RoomMention {
            id: id.as_str().to_owned(),
            label: caps.name("room_label").map(|m| m.as_str().to_owned()),
        };
    }
    if let Some(kw) = caps.name("special_kw") {
        return Span::Special {
            keyword: kw.as_str().to_owned(),
            label: caps.name("special_label").map(|m| m.as_str().to_owned()),
        };
    }
    if let Some(url) = caps.name("link_url") {
        return Span::Link {
            url: url.as_str().to_owned(),
            label: caps.name("link_label").map(|m| m.as_str().to_owned()),
        };
    }
    if let Some(emoji) = caps.name("emoji") {
        let raw = emoji.as_str();
        return Span::Emoji {
            name: raw[1..raw.len() - 1].to_owned(),
        };
    }
    // fence / code / bold / italic / strike all pass through verbatim.
    Span::Raw(caps.get(0).expect("outer group always matches").as_str().to_owned())
}

/// What an outgoing IRC line needs to know about the room it's being
/// delivered to, so that mentions and the silenced-yeller rule can be
/// applied correctly (spec §4.2).
pub struct RenderContext<'a> {
    /// The full roster, for id → nick lookups.
    pub roster: &'a Roster,
    /// The full room index, for id → name lookups.
    pub rooms: &'a RoomIndex,
    /// Slack ids of members of the IRC channel this message is being delivered to.
    pub channel_member_ids: &'a HashSet<String>,
    /// True when the sender is in the silenced-yellers set for this room.
    pub sender_is_silenced_yeller: bool,
}

/// Render a span sequence to IRC-safe text (spec §4.2 rendering rules).
#[must_use]
pub fn render_to_irc(spans: &[Span], ctx: &RenderContext<'_>) -> String {
    let mut out = String::new();
    for span in spans {
        match span {
            Span::Text(t) | Span::Raw(t) => out.push_str(t),
            Span::Mention { id, label } => render_mention(&mut out, id, label.as_deref(), ctx),
            Span::RoomMention { id, label } => render_room_mention(&mut out, id, label.as_deref(), ctx),
            Span::Special { keyword, label } => render_special(&mut out, keyword, label.as_deref(), ctx),
            Span::Link { url, label } => render_link(&mut out, url, label.as_deref()),
            Span::Emoji { name } => out.push_str(&render_emoji(name)),
        }
    }
    out
}

fn render_mention(out: &mut String, id: &str, label: Option<&str>, ctx: &RenderContext<'_>) {
    if let Some(user) = ctx.roster.by_id(id) {
        if ctx.channel_member_ids.contains(id) {
            out.push('@');
        }
        out.push_str(&user.login_name);
    } else if let Some(label) = label {
        out.push_str(label);
    } else {
        out.push_str(id);
    }
}

fn render_room_mention(out: &mut String, id: &str, _label: Option<&str>, ctx: &RenderContext<'_>) {
    out.push('#');
    match ctx.rooms.by_id(id) {
        Some(room) => out.push_str(&room.name),
        None => out.push_str(id),
    }
}

fn render_special(out: &mut String, keyword: &str, label: Option<&str>, ctx: &RenderContext<'_>) {
    if keyword.starts_with("subteam^") {
        out.push('@');
        out.push_str(label.unwrap_or(keyword));
        return;
    }
    if ctx.sender_is_silenced_yeller {
        out.push_str("yelling ");
        out.push_str(keyword);
    } else {
        out.push('@');
        out.push_str(keyword);
    }
}

/// Open question (spec §9): the URL/label boundary is a literal string-prefix
/// heuristic in the source — a label counts as "just the URL" if it equals
/// the URL, or the URL with one trailing `/` appended. Reimplemented
/// literally rather than with a smarter comparison.
fn label_is_trivial(url: &str, label: &str) -> bool {
    label == url || label == format!("{url}/")
}

fn render_link(out: &mut String, url: &str, label: Option<&str>) {
    match label {
        Some(label) if !label_is_trivial(url, label) => {
            out.push_str(label);
            out.push_str(" (");
            out.push_str(url);
            out.push(')');
        }
        _ => out.push_str(url),
    }
}

fn render_emoji(name: &str) -> String {
    emoji_unicode(name).map_or_else(|| format!(":{name}:"), str::to_owned)
}

fn emoji_unicode(name: &str) -> Option<&'static str> {
    Some(match name {
        "smile" | "slightly_smiling_face" => "\u{1F642}",
        "grin" | "grinning" => "\u{1F600}",
        "laughing" | "satisfied" => "\u{1F606}",
        "joy" => "\u{1F602}",
        "wink" => "\u{1F609}",
        "thumbsup" | "+1" => "\u{1F44D}",
        "thumbsdown" | "-1" => "\u{1F44E}",
        "wave" => "\u{1F44B}",
        "tada" => "\u{1F389}",
        "fire" => "\u{1F525}",
        "heart" => "\u{2764}\u{FE0F}",
        "eyes" => "\u{1F440}",
        "rocket" => "\u{1F680}",
        "100" => "\u{1F4AF}",
        "thinking_face" | "thinking" => "\u{1F914}",
        _ => return None,
    })
}

/// What happened when rendering a full message body to IRC.
pub enum DeliveryText {
    /// Rendered inline text.
    Inline(String),
    /// The message exceeded `formatted-max-lines` inside a code fence and
    /// was instead written to `path`.
    Overflowed {
        /// Path the full body was written to under the downloads directory.
        path: PathBuf,
    },
}

/// Render a whole message, diverting to a file when a code fence inside it
/// exceeds `max_lines` (spec §4.2).
///
/// # Errors
///
/// Returns `AppError::Io` if the overflow file cannot be written.
pub fn render_message(
    text: &str,
    ctx: &RenderContext<'_>,
    downloads_dir: &Path,
    room: &str,
    ts: &str,
    max_lines: usize,
) -> Result<DeliveryText> {
    let spans = tokenize(text);
    let exceeds = spans.iter().any(|span| match span {
        Span::Raw(raw) if raw.starts_with("```") => raw.lines().count() > max_lines,
        _ => false,
    });

    if !exceeds {
        return Ok(DeliveryText::Inline(render_to_irc(&spans, ctx)));
    }

    std::fs::create_dir_all(downloads_dir)?;
    let safe_ts = ts.replace('.', "-");
    let path = downloads_dir.join(format!("{room}-{safe_ts}.txt"));
    std::fs::write(&path, text).map_err(|err| {
        AppError::Io(format!("failed to write overflow file {}: {err}", path.display()))
    })?;
    Ok(DeliveryText::Overflowed { path })
}

/// Reverse translation: IRC text → Slack markup (spec §4.2).
///
/// Nick tokens preceded by `@` or followed by `:` become `<@id>` when the
/// nick matches a known user; `#name` tokens become `<#id|name>` when they
/// match a known channel. Everything else — including URLs, which Slack
/// auto-linkifies — passes through verbatim.
#[must_use]
pub fn render_irc_to_slack(text: &str, roster: &Roster, rooms: &RoomIndex) -> String {
    let re = reverse_token_re();
    let mut out = String::new();
    let mut last = 0;

    for mat in re.find_iter(text) {
        out.push_str(&text[last..mat.start()]);
        let caps = re.captures(mat.as_str()).expect("find_iter match must also capture");
        out.push_str(&reverse_replacement(&caps, roster, rooms));
        last = mat.end();
    }
    out.push_str(&text[last..]);
    out
}

fn reverse_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"(?P<at_nick>@[\w.\-]+)",
            r"|(?P<chan>#[\w.\-]+)",
            r"|(?P<colon_nick>\b[\w.\-]+:)",
        ))
        .expect("reverse markup regex is a compile-time constant")
    })
}

fn reverse_replacement(caps: &regex::Captures<'_>, roster: &Roster, rooms: &RoomIndex) -> String {
    if let Some(m) = caps.name("at_nick") {
        let nick = &m.as_str()[1..];
        return roster
            .by_name(nick)
            .map_or_else(|| m.as_str().to_owned(), |u| format!("<@{}>", u.id));
    }
    if let Some(m) = caps.name("chan") {
        let name = &m.as_str()[1..];
        return rooms
            .iter()
            .find(|r| r.name == name)
            .map_or_else(|| m.as_str().to_owned(), |r| format!("<#{}|{}>", r.id, r.name));
    }
    if let Some(m) = caps.name("colon_nick") {
        let raw = m.as_str();
        let nick = &raw[..raw.len() - 1];
        return roster
            .by_name(nick)
            .map_or_else(|| raw.to_owned(), |u| format!("<@{}>:", u.id));
    }
    unreachable!("regex match must hit one named group")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::room::{Room, RoomIndex, RoomKind};
    use crate::models::user::{Roster, User};

    fn carol_roster() -> Roster {
        let mut roster = Roster::new();
        roster.upsert(User::new("U02", "carol"));
        roster
    }

    #[test]
    fn mention_gets_at_prefix_only_when_in_channel() {
        let roster = carol_roster();
        let rooms = RoomIndex::new();
        let mut members = HashSet::new();
        members.insert("U02".to_owned());

        let spans = tokenize("<@U02> see <https://x.y|docs>");
        let ctx = RenderContext {
            roster: &roster,
            rooms: &rooms,
            channel_member_ids: &members,
            sender_is_silenced_yeller: false,
        };
        assert_eq!(render_to_irc(&spans, &ctx), "@carol see docs (https://x.y)");
    }

    #[test]
    fn mention_has_no_at_prefix_when_not_in_channel() {
        let roster = carol_roster();
        let rooms = RoomIndex::new();
        let members = HashSet::new();

        let spans = tokenize("<@U02> see <https://x.y|docs>");
        let ctx = RenderContext {
            roster: &roster,
            rooms: &rooms,
            channel_member_ids: &members,
            sender_is_silenced_yeller: false,
        };
        assert_eq!(render_to_irc(&spans, &ctx), "carol see docs (https://x.y)");
    }

    #[test]
    fn silenced_yeller_strips_notification_injection() {
        let roster = Roster::new();
        let rooms = RoomIndex::new();
        let members = HashSet::new();

        let spans = tokenize("<!here> lunch?");
        let ctx = RenderContext {
            roster: &roster,
            rooms: &rooms,
            channel_member_ids: &members,
            sender_is_silenced_yeller: true,
        };
        assert_eq!(render_to_irc(&spans, &ctx), "yelling here lunch?");
    }

    #[test]
    fn link_with_trivial_label_renders_url_alone() {
        let roster = Roster::new();
        let rooms = RoomIndex::new();
        let members = HashSet::new();
        let ctx = RenderContext {
            roster: &roster,
            rooms: &rooms,
            channel_member_ids: &members,
            sender_is_silenced_yeller: false,
        };

        let spans = tokenize("<https://x.y|https://x.y>");
        assert_eq!(render_to_irc(&spans, &ctx), "https://x.y");

        let spans = tokenize("<https://x.y|https://x.y/>");
        assert_eq!(render_to_irc(&spans, &ctx), "https://x.y");
    }

    #[test]
    fn unknown_emoji_passes_through() {
        let spans = tokenize(":this_is_not_real:");
        assert_eq!(spans, vec![Span::Emoji { name: "this_is_not_real".into() }]);
    }

    #[test]
    fn known_emoji_renders_unicode() {
        let spans = tokenize(":tada:");
        let roster = Roster::new();
        let rooms = RoomIndex::new();
        let members = HashSet::new();
        let ctx = RenderContext {
            roster: &roster,
            rooms: &rooms,
            channel_member_ids: &members,
            sender_is_silenced_yeller: false,
        };
        assert_eq!(render_to_irc(&spans, &ctx), "\u{1F389}");
    }

    #[test]
    fn reverse_translation_substitutes_known_nick() {
        let roster = carol_roster();
        let rooms = RoomIndex::new();
        let slack_text = render_irc_to_slack("hey @carol", &roster, &rooms);
        assert_eq!(slack_text, "hey <@U02>");
    }

    #[test]
    fn reverse_translation_leaves_unknown_nick_alone() {
        let roster = carol_roster();
        let rooms = RoomIndex::new();
        let slack_text = render_irc_to_slack("hey @dave", &roster, &rooms);
        assert_eq!(slack_text, "hey @dave");
    }

    #[test]
    fn reverse_translation_substitutes_known_channel() {
        let roster = Roster::new();
        let mut rooms = RoomIndex::new();
        rooms.upsert(Room::new("C01", "general", RoomKind::Channel), &roster);
        let slack_text = render_irc_to_slack("see #general", &roster, &rooms);
        assert_eq!(slack_text, "see <#C01|general>");
    }

    #[test]
    fn overflow_writes_file_for_long_code_fence() {
        let roster = Roster::new();
        let rooms = RoomIndex::new();
        let members = HashSet::new();
        let ctx = RenderContext {
            roster: &roster,
            rooms: &rooms,
            channel_member_ids: &members,
            sender_is_silenced_yeller: false,
        };

        let tmp = tempfile::tempdir().unwrap();
        let body = format!("```\n{}\n```", "line\n".repeat(30));
        let result = render_message(&body, &ctx, tmp.path(), "C01", "1700000000.000100", 5).unwrap();
        match result {
            DeliveryText::Overflowed { path } => assert!(path.exists()),
            DeliveryText::Inline(_) => panic!("expected overflow"),
        }
    }
}
