//! Rooms: channels, MPIMs, and IMs, unified behind one shape (spec §3).

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// The three Slack conversation surfaces, unified behind one capability set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoomKind {
    /// Named channel or private group (`C…`/`G…`); maps to IRC `#<slack-name>`.
    Channel,
    /// Multi-party IM; maps to IRC `&<sorted-comma-joined-nicks>`.
    Mpim,
    /// Direct IM; maps to IRC private messages, never to a channel.
    Im,
}

/// A Slack conversation surface, id-keyed, holding no references to other entities.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Room {
    /// Slack conversation id.
    pub id: String,
    /// Display name, as used to build the IRC channel name for `Channel` rooms.
    pub name: String,
    /// Conversation kind.
    pub kind: RoomKind,
    /// Room topic.
    pub topic: String,
    /// Room purpose.
    pub purpose: String,
    /// Member Slack ids.
    pub members: HashSet<String>,
    /// Last-read `ts`, used as the history-fetch resume cursor.
    pub last_read_ts: Option<String>,
    /// Whether the bridge is subscribed to this room on Slack.
    pub joined_on_slack: bool,
    /// Whether the attached IRC client currently has the channel joined.
    ///
    /// Distinct from `joined_on_slack`: an IRC `/part` clears this flag
    /// without unsubscribing from Slack (spec §3).
    pub joined_on_irc: bool,
}

impl Room {
    /// Construct a room not yet joined on either side.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: RoomKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            topic: String::new(),
            purpose: String::new(),
            members: HashSet::new(),
            last_read_ts: None,
            joined_on_slack: false,
            joined_on_irc: false,
        }
    }

    /// The IRC channel name for `Channel` rooms. Not meaningful for `Im`.
    #[must_use]
    pub fn irc_channel_name(&self, roster: &super::user::Roster) -> String {
        match self.kind {
            RoomKind::Channel => format!("#{}", self.name),
            RoomKind::Mpim => {
                let mut nicks: Vec<&str> = self
                    .members
                    .iter()
                    .map(|id| roster.by_id(id).map_or(id.as_str(), |u| u.login_name.as_str()))
                    .collect();
                nicks.sort_unstable();
                format!("&{}", nicks.join(","))
            }
            RoomKind::Im => format!("={}", self.name),
        }
    }
}

/// Room cache with O(1) lookup by id and by IRC-visible name.
#[derive(Debug, Default)]
pub struct RoomIndex {
    by_id: HashMap<String, Room>,
    /// Maps the current IRC-visible name (see [`Room::irc_channel_name`]) to the room id.
    /// Rebuilt on every mutation since MPIM names shift as membership changes.
    name_to_id: HashMap<String, String>,
}

impl RoomIndex {
    /// Construct an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a room, rebuilding its name index entry.
    pub fn upsert(&mut self, room: Room, roster: &super::user::Roster) {
        let name = room.irc_channel_name(roster);
        self.name_to_id.insert(name, room.id.clone());
        self.by_id.insert(room.id.clone(), room);
    }

    /// Remove a room by id.
    pub fn evict(&mut self, id: &str) -> Option<Room> {
        let room = self.by_id.remove(id)?;
        self.name_to_id.retain(|_, v| v != id);
        Some(room)
    }

    /// Look up by Slack room id.
    #[must_use]
    pub fn by_id(&self, id: &str) -> Option<&Room> {
        self.by_id.get(id)
    }

    /// Mutable lookup by Slack room id.
    pub fn by_id_mut(&mut self, id: &str) -> Option<&mut Room> {
        self.by_id.get_mut(id)
    }

    /// Look up by the room's current IRC-visible name (case-sensitive).
    #[must_use]
    pub fn by_irc_name(&self, name: &str) -> Option<&Room> {
        self.name_to_id.get(name).and_then(|id| self.by_id.get(id))
    }

    /// Refresh the name index for a room whose membership or name changed.
    pub fn reindex(&mut self, id: &str, roster: &super::user::Roster) {
        if let Some(room) = self.by_id.get(id) {
            let name = room.irc_channel_name(roster);
            self.name_to_id.retain(|_, v| v != id);
            self.name_to_id.insert(name, id.to_owned());
        }
    }

    /// Iterate over all cached rooms.
    pub fn iter(&self) -> impl Iterator<Item = &Room> {
        self.by_id.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::{Roster, User};

    #[test]
    fn channel_name_is_hash_prefixed() {
        let roster = Roster::new();
        let room = Room::new("C01", "general", RoomKind::Channel);
        assert_eq!(room.irc_channel_name(&roster), "#general");
    }

    #[test]
    fn mpim_name_is_sorted_nick_list() {
        let mut roster = Roster::new();
        roster.upsert(User::new("U02", "bob"));
        roster.upsert(User::new("U01", "alice"));

        let mut room = Room::new("G01", "", RoomKind::Mpim);
        room.members.insert("U01".into());
        room.members.insert("U02".into());

        assert_eq!(room.irc_channel_name(&roster), "&alice,bob");
    }

    #[test]
    fn index_lookup_by_id_and_name() {
        let roster = Roster::new();
        let mut idx = RoomIndex::new();
        idx.upsert(Room::new("C01", "general", RoomKind::Channel), &roster);

        assert_eq!(idx.by_id("C01").unwrap().name, "general");
        assert_eq!(idx.by_irc_name("#general").unwrap().id, "C01");
    }
}
