//! Cross-module scenario tests that exercise the translation layers the way
//! the bridge core actually chains them: thread materialisation feeding a
//! rendered delivery, and room-membership changes feeding mention rendering
//! (spec §8, scenarios 3 and 5).

use std::collections::HashSet;

use irslackd::bridge::threads::{self, MaterialisedThread};
use irslackd::models::room::{Room, RoomIndex, RoomKind};
use irslackd::models::thread::{ThreadKey, ThreadRegistry};
use irslackd::models::user::{Roster, User};
use irslackd::slack::markup::{render_to_irc, tokenize, RenderContext};

fn workspace() -> (Roster, RoomIndex) {
    let mut roster = Roster::new();
    roster.upsert(User::new("U01", "alice"));
    roster.upsert(User::new("U02", "bob"));

    let mut rooms = RoomIndex::new();
    let mut general = Room::new("C01", "general", RoomKind::Channel);
    general.members.insert("U01".into());
    general.members.insert("U02".into());
    rooms.upsert(general, &roster);

    (roster, rooms)
}

/// Scenario 5: the first reply in a thread materialises a synthetic channel
/// and brings every parent-channel member into it via `JOIN`, with a
/// `TOPIC` line pointing back at the parent.
#[test]
fn first_thread_reply_materialises_channel_with_join_and_topic() {
    let (roster, rooms) = workspace();
    let mut registry = ThreadRegistry::new();
    let key = ThreadKey::new("C01", "1700000000.000100");

    let MaterialisedThread { irc_name, join_lines, topic_line } =
        threads::materialise(&mut registry, &rooms, &roster, "C01", key.clone()).expect("first reply materialises");

    assert!(irc_name.starts_with("#general-0x"));
    assert_eq!(join_lines.len(), 2, "both parent-channel members should be brought in");
    assert!(join_lines.iter().any(|l| l.contains("alice") && l.ends_with(&irc_name)));
    assert!(join_lines.iter().any(|l| l.contains("bob") && l.ends_with(&irc_name)));
    assert!(topic_line.contains(&irc_name));
    assert!(topic_line.contains("general"));

    // A second reply in the same thread must not re-materialise it.
    assert!(threads::materialise(&mut registry, &rooms, &roster, "C01", key).is_none());
}

/// Scenario 3: a mention is rendered with a notifying `@` prefix only while
/// the mentioned user is actually a member of the channel the message is
/// delivered into; membership changes must be picked up via `RoomIndex::reindex`.
#[test]
fn mention_rendering_tracks_room_membership_changes() {
    let (roster, mut rooms) = workspace();
    let spans = tokenize("hey <@U02> check this");

    let members_before: HashSet<String> = rooms.by_id("C01").unwrap().members.clone();
    let ctx = RenderContext {
        roster: &roster,
        rooms: &rooms,
        channel_member_ids: &members_before,
        sender_is_silenced_yeller: false,
    };
    assert_eq!(render_to_irc(&spans, &ctx), "hey @bob check this");

    // bob leaves the channel.
    rooms.by_id_mut("C01").unwrap().members.remove("U02");
    rooms.reindex("C01", &roster);

    let members_after: HashSet<String> = rooms.by_id("C01").unwrap().members.clone();
    let ctx = RenderContext {
        roster: &roster,
        rooms: &rooms,
        channel_member_ids: &members_after,
        sender_is_silenced_yeller: false,
    };
    assert_eq!(render_to_irc(&spans, &ctx), "hey bob check this");
}
