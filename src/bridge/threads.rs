//! Thread-to-synthetic-channel materialisation (spec §3, scenario 5): the
//! first observed reply in a Slack thread turns it into an IRC channel the
//! attached client is auto-joined to.

use crate::models::room::RoomIndex;
use crate::models::thread::{ThreadKey, ThreadRegistry};
use crate::models::user::Roster;

/// IRC lines needed to bring a freshly materialised thread into view.
pub struct MaterialisedThread {
    /// Synthetic IRC channel name, e.g. `#general-0x1a2b3c`.
    pub irc_name: String,
    /// One `JOIN` line per current member of the parent channel.
    pub join_lines: Vec<String>,
    /// The `TOPIC` line pointing back to the parent channel.
    pub topic_line: String,
}

/// Materialise `key` as a synthetic IRC channel, unless it already exists or
/// the client explicitly left it this session (spec invariant 2 and the
/// left-threads suppression in [`ThreadRegistry`]).
///
/// Returns `None` when no materialisation is needed: already materialised,
/// or the parent room isn't cached yet.
pub fn materialise(
    threads: &mut ThreadRegistry,
    rooms: &RoomIndex,
    roster: &Roster,
    parent_room_id: &str,
    key: ThreadKey,
) -> Option<MaterialisedThread> {
    if threads.get(&key).is_some() || threads.is_left(&key) {
        return None;
    }
    let parent = rooms.by_id(parent_room_id)?;
    let parent_irc_name = parent.irc_channel_name(roster);
    let (irc_name, topic) = threads.propose(&parent_irc_name, &key);

    let join_lines = parent
        .members
        .iter()
        .map(|id| {
            let nick = roster.by_id(id).map_or(id.as_str(), |u| u.login_name.as_str());
            format!(":{nick}!{nick}@slack JOIN {irc_name}")
        })
        .collect();
    let topic_line = format!(":irslackd TOPIC {irc_name} :{topic}");

    threads.materialise(key, irc_name.clone(), topic.clone());

    Some(MaterialisedThread { irc_name, join_lines, topic_line })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::room::{Room, RoomKind};
    use crate::models::user::User;

    #[test]
    fn materialises_once_and_lists_members() {
        let mut roster = Roster::new();
        roster.upsert(User::new("U01", "alice"));
        let mut rooms = RoomIndex::new();
        let mut room = Room::new("C01", "general", RoomKind::Channel);
        room.members.insert("U01".into());
        rooms.upsert(room, &roster);

        let mut threads = ThreadRegistry::new();
        let key = ThreadKey::new("C01", "1700000000.000100");

        let first = materialise(&mut threads, &rooms, &roster, "C01", key.clone()).unwrap();
        assert!(first.irc_name.starts_with("#general-0x"));
        assert_eq!(first.join_lines, vec![":alice!alice@slack JOIN ".to_owned() + &first.irc_name]);

        assert!(materialise(&mut threads, &rooms, &roster, "C01", key).is_none());
    }

    #[test]
    fn left_thread_is_not_rematerialised() {
        let roster = Roster::new();
        let mut rooms = RoomIndex::new();
        rooms.upsert(Room::new("C01", "general", RoomKind::Channel), &roster);

        let mut threads = ThreadRegistry::new();
        let key = ThreadKey::new("C01", "1700000000.000100");
        threads.mark_left(key.clone());

        assert!(materialise(&mut threads, &rooms, &roster, "C01", key).is_none());
    }
}
