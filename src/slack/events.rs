//! Typed decode of RTM frames (spec §4.1, §9 "dynamic dispatch becomes a
//! tagged-variant decode").
//!
//! Unknown `type` values are logged and dropped, never coerced — the event
//! loop never panics on an RTM frame it doesn't recognise.

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

/// A Slack message payload, shared by `message`, `message_changed`, and history fetches.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagePayload {
    /// Room the message belongs to.
    pub channel: String,
    /// Author's Slack id.
    #[serde(default)]
    pub user: String,
    /// Raw Slack markup text.
    #[serde(default)]
    pub text: String,
    /// Message `ts`, used as identity.
    pub ts: String,
    /// Present when the message is a thread reply.
    pub thread_ts: Option<String>,
    /// Present on `message_changed`: the previous version of the message.
    pub previous_message: Option<Box<MessagePayload>>,
    /// Subtype, e.g. `message_changed`, `message_deleted`, `bot_message`.
    pub subtype: Option<String>,
}

/// A typing indicator event.
#[derive(Debug, Clone, Deserialize)]
pub struct TypingPayload {
    /// Room the typing event occurred in.
    pub channel: String,
    /// The typing user's Slack id.
    pub user: String,
}

/// A reaction add/remove event.
#[derive(Debug, Clone, Deserialize)]
pub struct ReactionPayload {
    /// Reacting user's Slack id.
    pub user: String,
    /// Reaction name, without colons.
    pub reaction: String,
    /// Identity of the reacted-to message.
    pub item: ReactionItem,
}

/// The `item` sub-object of a reaction event, naming the target message.
#[derive(Debug, Clone, Deserialize)]
pub struct ReactionItem {
    /// Room id.
    pub channel: String,
    /// Message `ts`.
    pub ts: String,
}

/// Membership-change events (`channel_joined`, `member_joined_channel`, …).
#[derive(Debug, Clone, Deserialize)]
pub struct MembershipPayload {
    /// Room affected.
    pub channel: String,
    /// User affected, when present.
    pub user: Option<String>,
}

/// A file-shared event.
#[derive(Debug, Clone, Deserialize)]
pub struct FileSharedPayload {
    /// Room the file was shared into.
    pub channel_id: String,
    /// Slack file id, to be resolved via `files.info` if needed.
    pub file_id: String,
}

/// Fully decoded, tagged RTM event. Unknown tags surface as `Unknown`.
#[derive(Debug, Clone)]
pub enum SlackEvent {
    /// A new message.
    Message(MessagePayload),
    /// A message was edited; `previous_message` carries the prior text.
    MessageChanged(MessagePayload),
    /// A message was deleted.
    MessageDeleted { channel: String, ts: String },
    /// A user started typing.
    UserTyping(TypingPayload),
    /// A reaction was added.
    ReactionAdded(ReactionPayload),
    /// A reaction was removed.
    ReactionRemoved(ReactionPayload),
    /// The roster needs a refresh for this user (`user_change`/`team_join`).
    UserChange { user_id: String },
    /// The room cache needs a refresh for this room (`channel_*`).
    ChannelUpdated { channel: String },
    /// The bridge observed itself being added to a channel from the Slack side.
    ChannelJoined(MembershipPayload),
    /// A member joined a channel the bridge already knows about.
    MemberJoinedChannel(MembershipPayload),
    /// A file was shared.
    FileShared(FileSharedPayload),
    /// Presence for a user changed.
    PresenceChange { user_id: String, active: bool },
    /// Server is about to close the connection; reconnect.
    Goodbye,
    /// Recognised but intentionally ignored tag (e.g. `hello`).
    Ignored(&'static str),
    /// A tag this bridge does not recognise.
    Unknown(String),
}

/// Decode a raw RTM frame into a [`SlackEvent`].
///
/// Returns `None` (after logging) on a malformed event — per spec §7, a
/// malformed event is dropped, never fatal.
#[must_use]
pub fn decode(raw: &Value) -> Option<SlackEvent> {
    let kind = raw.get("type").and_then(Value::as_str)?;

    let decoded = match kind {
        "message" => {
            let payload: MessagePayload = serde_json::from_value(raw.clone()).ok()?;
            match payload.subtype.as_deref() {
                Some("message_changed") => SlackEvent::MessageChanged(payload),
                Some("message_deleted") => SlackEvent::MessageDeleted {
                    channel: payload.channel,
                    ts: payload.ts,
                },
                _ => SlackEvent::Message(payload),
            }
        }
        "user_typing" => SlackEvent::UserTyping(serde_json::from_value(raw.clone()).ok()?),
        "reaction_added" => SlackEvent::ReactionAdded(serde_json::from_value(raw.clone()).ok()?),
        "reaction_removed" => SlackEvent::ReactionRemoved(serde_json::from_value(raw.clone()).ok()?),
        "user_change" | "team_join" => SlackEvent::UserChange {
            user_id: raw
                .get("user")
                .and_then(|u| u.get("id").or(Some(u)))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
        },
        "channel_rename" | "channel_created" | "channel_deleted" | "channel_archive"
        | "channel_unarchive" | "group_rename" => SlackEvent::ChannelUpdated {
            channel: raw
                .get("channel")
                .and_then(|c| c.get("id").or(Some(c)))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
        },
        "channel_joined" => SlackEvent::ChannelJoined(serde_json::from_value(raw.clone()).ok()?),
        "member_joined_channel" => {
            SlackEvent::MemberJoinedChannel(serde_json::from_value(raw.clone()).ok()?)
        }
        "file_shared" => SlackEvent::FileShared(serde_json::from_value(raw.clone()).ok()?),
        "presence_change" => SlackEvent::PresenceChange {
            user_id: raw.get("user").and_then(Value::as_str).unwrap_or_default().to_owned(),
            active: raw.get("presence").and_then(Value::as_str) == Some("active"),
        },
        "goodbye" => SlackEvent::Goodbye,
        "hello" | "pong" => SlackEvent::Ignored("hello/pong"),
        other => {
            warn!(kind = other, "unrecognised rtm event type; dropped");
            SlackEvent::Unknown(other.to_owned())
        }
    };

    Some(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_plain_message() {
        let raw = serde_json::json!({
            "type": "message",
            "channel": "C01",
            "user": "U01",
            "text": "hi",
            "ts": "1700000000.000100",
        });
        match decode(&raw) {
            Some(SlackEvent::Message(payload)) => {
                assert_eq!(payload.channel, "C01");
                assert_eq!(payload.text, "hi");
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn decodes_message_changed_subtype() {
        let raw = serde_json::json!({
            "type": "message",
            "subtype": "message_changed",
            "channel": "C01",
            "ts": "1700000000.000200",
            "message": {},
            "previous_message": {
                "channel": "C01",
                "user": "U01",
                "text": "the quick brown fox",
                "ts": "1700000000.000100",
            },
        });
        assert!(matches!(decode(&raw), Some(SlackEvent::MessageChanged(_))));
    }

    #[test]
    fn unknown_type_is_logged_and_dropped_not_crashed() {
        let raw = serde_json::json!({ "type": "some_future_event" });
        assert!(matches!(decode(&raw), Some(SlackEvent::Unknown(_))));
    }

    #[test]
    fn missing_type_field_yields_none() {
        let raw = serde_json::json!({ "channel": "C01" });
        assert!(decode(&raw).is_none());
    }
}
