//! Workspace roster: Slack users and the two O(1) lookup indices over them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Presence as last reported by Slack.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    /// User is online.
    Active,
    /// User is away.
    Away,
    /// No presence event observed yet.
    Unknown,
}

/// A single Slack workspace member.
///
/// `id` is immutable; `login_name` is assumed stable within a session and
/// is used verbatim as the IRC nick (spec §3 invariant 3 for the self user).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    /// Opaque Slack id, e.g. `U0123ABCD`.
    pub id: String,
    /// Login name — used as the IRC nick.
    pub login_name: String,
    /// Human display name.
    pub display_name: String,
    /// Full name, when set.
    pub real_name: String,
    /// True once Slack reports the account deactivated.
    pub deleted: bool,
    /// True for bot users/apps.
    pub is_bot: bool,
    /// UTC offset in seconds, as reported by Slack.
    pub tz_offset: i32,
    /// Last known presence.
    pub presence: Presence,
}

impl User {
    /// Construct a user with `Unknown` presence, the common case for a fresh roster entry.
    #[must_use]
    pub fn new(id: impl Into<String>, login_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            login_name: login_name.into(),
            display_name: String::new(),
            real_name: String::new(),
            deleted: false,
            is_bot: false,
            tz_offset: 0,
            presence: Presence::Unknown,
        }
    }
}

/// Roster cache with O(1) lookup by id and by login name.
///
/// Per spec invariant 1, a miss never panics: callers get `None` and are
/// expected to trigger [`crate::slack::session::SlackSession`]'s
/// singleflight refresh.
#[derive(Debug, Default)]
pub struct Roster {
    by_id: HashMap<String, User>,
    name_to_id: HashMap<String, String>,
}

impl Roster {
    /// Construct an empty roster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a user, keeping both indices consistent.
    pub fn upsert(&mut self, user: User) {
        if let Some(prior) = self.by_id.get(&user.id) {
            if prior.login_name != user.login_name {
                self.name_to_id.remove(&prior.login_name);
            }
        }
        self.name_to_id.insert(user.login_name.clone(), user.id.clone());
        self.by_id.insert(user.id.clone(), user);
    }

    /// Remove a user from both indices, returning it if present.
    pub fn evict(&mut self, id: &str) -> Option<User> {
        let user = self.by_id.remove(id)?;
        self.name_to_id.remove(&user.login_name);
        Some(user)
    }

    /// Look up a user by Slack id.
    #[must_use]
    pub fn by_id(&self, id: &str) -> Option<&User> {
        self.by_id.get(id)
    }

    /// Look up a user by IRC nick / Slack login name.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<&User> {
        self.name_to_id.get(name).and_then(|id| self.by_id.get(id))
    }

    /// Number of users currently cached.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// True when the roster has no cached users.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Iterate over all cached users.
    pub fn iter(&self) -> impl Iterator<Item = &User> {
        self.by_id.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_id_and_name_agree() {
        let mut roster = Roster::new();
        roster.upsert(User::new("U01", "alice"));

        assert_eq!(roster.by_id("U01").unwrap().login_name, "alice");
        assert_eq!(roster.by_name("alice").unwrap().id, "U01");
        assert!(roster.by_id("U02").is_none());
        assert!(roster.by_name("bob").is_none());
    }

    #[test]
    fn rename_updates_name_index() {
        let mut roster = Roster::new();
        roster.upsert(User::new("U01", "alice"));
        roster.upsert(User::new("U01", "alice2"));

        assert!(roster.by_name("alice").is_none());
        assert_eq!(roster.by_name("alice2").unwrap().id, "U01");
    }

    #[test]
    fn evict_drops_both_indices() {
        let mut roster = Roster::new();
        roster.upsert(User::new("U01", "alice"));
        let removed = roster.evict("U01").unwrap();
        assert_eq!(removed.login_name, "alice");
        assert!(roster.by_id("U01").is_none());
        assert!(roster.by_name("alice").is_none());
    }
}
