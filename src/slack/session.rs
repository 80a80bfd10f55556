//! Slack session (C4): typed operations over transport, with the
//! user/room caches and lookup-miss singleflight collapsing (spec §4.4).

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::{mpsc, OnceCell};

use crate::models::room::{Room, RoomIndex, RoomKind};
use crate::models::user::{Presence, Roster, User};
use crate::slack::events::{MessagePayload, SlackEvent};
use crate::slack::transport::SlackHttpClient;
use crate::{AppError, Result};

/// Collapses concurrent lookups for the same key into a single fetch.
///
/// Cloned and shared with the bounded history-fetch pool (spec §4.6): those
/// tasks dedupe their own Slack API calls through this, then report results
/// back to the session owner over a channel rather than mutating the
/// roster/room caches directly.
#[derive(Clone)]
pub struct LookupCollapser<T> {
    inflight: Arc<Mutex<HashMap<String, Arc<OnceCell<T>>>>>,
}

impl<T: Clone> LookupCollapser<T> {
    /// Construct an empty collapser.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run `fetch` for `key`, collapsing concurrent calls for the same key
    /// onto a single in-flight future.
    pub async fn collapse<F, Fut>(&self, key: &str, fetch: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let cell = {
            let mut guard = self.inflight.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            Arc::clone(guard.entry(key.to_owned()).or_insert_with(|| Arc::new(OnceCell::new())))
        };

        let result = cell.get_or_init(fetch).await.clone();

        let mut guard = self.inflight.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.remove(key);
        result
    }
}

impl<T: Clone> Default for LookupCollapser<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the roster and room caches plus the Slack call surface; single
/// owner, no internal locking on the caches themselves (spec §3).
pub struct SlackSession {
    http: Arc<SlackHttpClient>,
    roster: Roster,
    rooms: RoomIndex,
    user_lookups: LookupCollapser<Option<User>>,
    room_lookups: LookupCollapser<Option<Room>>,
    outbound: Option<mpsc::Sender<Value>>,
}

impl SlackSession {
    /// Construct a session over `http` with empty caches.
    #[must_use]
    pub fn new(http: Arc<SlackHttpClient>) -> Self {
        Self {
            http,
            roster: Roster::new(),
            rooms: RoomIndex::new(),
            user_lookups: LookupCollapser::new(),
            room_lookups: LookupCollapser::new(),
            outbound: None,
        }
    }

    /// Attach the RTM outbound frame sender, used only for `typing` (spec §4.4
    /// — legacy RTM sends typing indicators as a raw frame, not a REST call).
    pub fn set_outbound(&mut self, tx: mpsc::Sender<Value>) {
        self.outbound = Some(tx);
    }

    /// Read-only view of the cached roster.
    #[must_use]
    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Read-only view of the cached rooms.
    #[must_use]
    pub fn rooms(&self) -> &RoomIndex {
        &self.rooms
    }

    /// Resolve a user by id, serving from cache and falling back to
    /// `users.info` on a miss (singleflight-collapsed).
    pub async fn resolve_user(&mut self, id: &str) -> Option<User> {
        if let Some(user) = self.roster.by_id(id) {
            return Some(user.clone());
        }
        let http = Arc::clone(&self.http);
        let id_owned = id.to_owned();
        let fetched = self.user_lookups.collapse(id, || fetch_user(http, id_owned)).await;
        if let Some(ref user) = fetched {
            self.roster.upsert(user.clone());
        }
        fetched
    }

    /// Resolve a room by id, serving from cache and falling back to
    /// `conversations.info` on a miss (singleflight-collapsed).
    pub async fn resolve_room(&mut self, id: &str) -> Option<Room> {
        if let Some(room) = self.rooms.by_id(id) {
            return Some(room.clone());
        }
        let http = Arc::clone(&self.http);
        let id_owned = id.to_owned();
        let fetched = self.room_lookups.collapse(id, || fetch_room(http, id_owned)).await;
        if let Some(ref room) = fetched {
            self.rooms.upsert(room.clone(), &self.roster);
        }
        fetched
    }

    /// Subscribe to a room on the Slack side (`conversations.join`).
    ///
    /// # Errors
    ///
    /// Propagates transport/Slack errors; does not mutate the cache on failure.
    pub async fn join(&mut self, room_id: &str) -> Result<()> {
        self.http.post("conversations.join", &[("channel", room_id)]).await?;
        if let Some(room) = self.rooms.by_id_mut(room_id) {
            room.joined_on_slack = true;
        }
        Ok(())
    }

    /// Unsubscribe from a room on the Slack side (`conversations.leave`).
    ///
    /// # Errors
    ///
    /// Propagates transport/Slack errors.
    pub async fn leave(&mut self, room_id: &str) -> Result<()> {
        self.http.post("conversations.leave", &[("channel", room_id)]).await?;
        if let Some(room) = self.rooms.by_id_mut(room_id) {
            room.joined_on_slack = false;
        }
        Ok(())
    }

    /// Post a message, optionally into a thread, returning the new `ts`.
    ///
    /// # Errors
    ///
    /// Propagates transport/Slack errors, or `AppError::MalformedEvent` if
    /// Slack's response is missing `ts`.
    pub async fn post(&self, room_id: &str, text: &str, thread_ts: Option<&str>) -> Result<String> {
        let mut form = vec![("channel", room_id), ("text", text)];
        if let Some(ts) = thread_ts {
            form.push(("thread_ts", ts));
        }
        let body = self.http.post("chat.postMessage", &form).await?;
        body.get("ts")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| AppError::MalformedEvent("chat.postMessage: response missing ts".into()))
    }

    /// Upload a file to a room (`files.upload`).
    ///
    /// # Errors
    ///
    /// Propagates transport/Slack/IO errors.
    pub async fn upload(&self, room_id: &str, path: &Path) -> Result<()> {
        self.http.upload(room_id, path).await?;
        Ok(())
    }

    /// Fetch up to `limit` messages for a room, resuming from `oldest` when
    /// given, newest-first, cursor-paginated the same way as
    /// [`Self::load_roster`]/[`Self::load_rooms`] (spec §4.4).
    ///
    /// Messages older than [`crate::config::DEFAULT_HISTORY_CAP_HOURS`] and
    /// messages from deleted users are discarded (spec §4.6). A page fetch
    /// failure ends pagination and returns whatever was collected so far
    /// with a logged warning, rather than discarding the whole backfill —
    /// callers should treat the result as best-effort, not a hard failure.
    pub async fn history(&self, room_id: &str, oldest: Option<&str>, limit: usize) -> Vec<MessagePayload> {
        let cutoff = (chrono::Utc::now() - chrono::Duration::hours(crate::config::DEFAULT_HISTORY_CAP_HOURS)).timestamp() as f64;
        let mut cursor = String::new();
        let mut collected = Vec::new();

        loop {
            let limit_str = limit.to_string();
            let mut form: Vec<(&str, &str)> = vec![("channel", room_id), ("limit", &limit_str)];
            if let Some(ts) = oldest {
                form.push(("oldest", ts));
            }
            if !cursor.is_empty() {
                form.push(("cursor", cursor.as_str()));
            }

            let body = match self.http.post("conversations.history", &form).await {
                Ok(body) => body,
                Err(err) => {
                    tracing::warn!(%err, room_id, "conversations.history failed; returning partial history");
                    break;
                }
            };

            for raw in body.get("messages").and_then(Value::as_array).into_iter().flatten() {
                let Ok(payload) = serde_json::from_value::<MessagePayload>(raw.clone()) else { continue };
                let in_window = payload.ts.parse::<f64>().is_ok_and(|ts| ts >= cutoff);
                if !in_window {
                    continue;
                }
                if self.roster.by_id(&payload.user).is_some_and(|u| u.deleted) {
                    continue;
                }
                collected.push(payload);
                if collected.len() >= limit {
                    break;
                }
            }

            if collected.len() >= limit {
                break;
            }
            match body.pointer("/response_metadata/next_cursor").and_then(Value::as_str) {
                Some(next) if !next.is_empty() => cursor = next.to_owned(),
                _ => break,
            }
        }

        collected
    }

    /// Mark a room read up to `ts` (`conversations.mark`).
    ///
    /// # Errors
    ///
    /// Propagates transport/Slack errors.
    pub async fn mark(&self, room_id: &str, ts: &str) -> Result<()> {
        self.http.post("conversations.mark", &[("channel", room_id), ("ts", ts)]).await?;
        Ok(())
    }

    /// Send a typing indicator over the RTM socket.
    ///
    /// # Errors
    ///
    /// Returns `AppError::TransportTerminal` if no outbound sender is
    /// attached, or if the RTM connection has dropped.
    pub async fn typing(&self, room_id: &str) -> Result<()> {
        let tx = self
            .outbound
            .as_ref()
            .ok_or_else(|| AppError::TransportTerminal("rtm outbound sender not attached".into()))?;
        tx.send(serde_json::json!({ "type": "typing", "channel": room_id }))
            .await
            .map_err(|_| AppError::TransportTerminal("rtm outbound channel closed".into()))
    }

    /// Set a room's topic (`conversations.setTopic`).
    ///
    /// # Errors
    ///
    /// Propagates transport/Slack errors.
    pub async fn set_topic(&mut self, room_id: &str, topic: &str) -> Result<()> {
        self.http.post("conversations.setTopic", &[("channel", room_id), ("topic", topic)]).await?;
        if let Some(room) = self.rooms.by_id_mut(room_id) {
            room.topic = topic.to_owned();
        }
        Ok(())
    }

    /// Invite a user into a room (`conversations.invite`).
    ///
    /// # Errors
    ///
    /// Propagates transport/Slack errors.
    pub async fn invite(&self, room_id: &str, user_id: &str) -> Result<()> {
        self.http.post("conversations.invite", &[("channel", room_id), ("users", user_id)]).await?;
        Ok(())
    }

    /// Remove a user from a room (`conversations.kick`).
    ///
    /// # Errors
    ///
    /// Propagates transport/Slack errors.
    pub async fn kick(&self, room_id: &str, user_id: &str) -> Result<()> {
        self.http.post("conversations.kick", &[("channel", room_id), ("user", user_id)]).await?;
        Ok(())
    }

    /// Resolve a Slack file id to its private download URL and name (`files.info`).
    ///
    /// # Errors
    ///
    /// Propagates transport/Slack errors, or `AppError::MalformedEvent` if
    /// the response is missing the expected fields.
    pub async fn file_info(&self, file_id: &str) -> Result<(String, String)> {
        let body = self.http.post("files.info", &[("file", file_id)]).await?;
        let url = body
            .pointer("/file/url_private")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::MalformedEvent("files.info: missing url_private".into()))?
            .to_owned();
        let name = body
            .pointer("/file/name")
            .and_then(Value::as_str)
            .unwrap_or("upload")
            .to_owned();
        Ok((url, name))
    }

    /// Download a previously resolved file URL to `dest`.
    ///
    /// # Errors
    ///
    /// Propagates transport/IO errors.
    pub async fn download_file(&self, url: &str, dest: &Path) -> Result<()> {
        self.http.download(url, dest).await
    }

    /// Mark whether the attached IRC client currently has `room_id` joined,
    /// independent of the Slack-side subscription (spec §3).
    pub fn set_joined_on_irc(&mut self, room_id: &str, joined: bool) {
        if let Some(room) = self.rooms.by_id_mut(room_id) {
            room.joined_on_irc = joined;
        }
    }

    /// Set the bridge user's own presence (`users.setPresence`), used for `AWAY`.
    ///
    /// # Errors
    ///
    /// Propagates transport/Slack errors.
    pub async fn set_presence(&self, away: bool) -> Result<()> {
        let presence = if away { "away" } else { "auto" };
        self.http.post("users.setPresence", &[("presence", presence)]).await?;
        Ok(())
    }

    /// Add a reaction to a message (`reactions.add`).
    ///
    /// Slack's duplicate-reaction code has changed spelling historically
    /// (spec §9); any non-ok response whose code mentions "react"/"duplicate"
    /// is treated as an already-applied reaction, not a failure.
    ///
    /// # Errors
    ///
    /// Propagates transport/Slack errors other than a duplicate reaction.
    pub async fn react(&self, room_id: &str, ts: &str, reaction: &str) -> Result<()> {
        match self
            .http
            .post("reactions.add", &[("channel", room_id), ("timestamp", ts), ("name", reaction)])
            .await
        {
            Ok(_) => Ok(()),
            Err(AppError::Command(msg)) if is_duplicate_reaction_error(&msg) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Bulk-load the workspace roster (`users.list`), replacing the cache.
    /// Used once during the bridge's `SYNCING` phase (spec §4.6).
    ///
    /// # Errors
    ///
    /// Propagates transport/Slack errors.
    pub async fn load_roster(&mut self) -> Result<()> {
        let mut cursor = String::new();
        let mut roster = Roster::new();
        loop {
            let form: Vec<(&str, &str)> = if cursor.is_empty() { vec![] } else { vec![("cursor", cursor.as_str())] };
            let body = self.http.post("users.list", &form).await?;
            for member in body.get("members").and_then(Value::as_array).into_iter().flatten() {
                if let Some(user) = parse_user(member) {
                    roster.upsert(user);
                }
            }
            match body.pointer("/response_metadata/next_cursor").and_then(Value::as_str) {
                Some(next) if !next.is_empty() => cursor = next.to_owned(),
                _ => break,
            }
        }
        self.roster = roster;
        Ok(())
    }

    /// Bulk-load joined conversations (`conversations.list`), replacing the
    /// room cache. Used once during the bridge's `SYNCING` phase.
    ///
    /// # Errors
    ///
    /// Propagates transport/Slack errors.
    pub async fn load_rooms(&mut self) -> Result<()> {
        let mut cursor = String::new();
        let mut rooms = RoomIndex::new();
        loop {
            let mut form: Vec<(&str, &str)> = vec![("types", "public_channel,private_channel,mpim,im")];
            if !cursor.is_empty() {
                form.push(("cursor", cursor.as_str()));
            }
            let body = self.http.post("conversations.list", &form).await?;
            for entry in body.get("channels").and_then(Value::as_array).into_iter().flatten() {
                if let Some(room) = parse_room(entry) {
                    rooms.upsert(room, &self.roster);
                }
            }
            match body.pointer("/response_metadata/next_cursor").and_then(Value::as_str) {
                Some(next) if !next.is_empty() => cursor = next.to_owned(),
                _ => break,
            }
        }
        self.rooms = rooms;
        Ok(())
    }

    /// Apply an RTM event's cache-invalidation effects (spec §4.4).
    pub fn apply_event(&mut self, event: &SlackEvent) {
        match event {
            SlackEvent::UserChange { user_id } => {
                self.roster.evict(user_id);
            }
            SlackEvent::ChannelUpdated { channel } => {
                self.rooms.evict(channel);
            }
            SlackEvent::ChannelJoined(payload) => {
                if let Some(room) = self.rooms.by_id_mut(&payload.channel) {
                    room.joined_on_slack = true;
                }
            }
            SlackEvent::MemberJoinedChannel(payload) => {
                if let Some(user_id) = payload.user.clone() {
                    if let Some(room) = self.rooms.by_id_mut(&payload.channel) {
                        room.members.insert(user_id);
                    }
                    self.rooms.reindex(&payload.channel, &self.roster);
                }
            }
            SlackEvent::PresenceChange { user_id, active } => {
                if let Some(user) = self.roster.by_id(user_id) {
                    let mut updated = user.clone();
                    updated.presence = if *active { Presence::Active } else { Presence::Away };
                    self.roster.upsert(updated);
                }
            }
            _ => {}
        }
    }
}

/// True when a `reactions.add` error code names a duplicate/already-applied
/// reaction, whose exact spelling Slack has changed historically (spec §9).
fn is_duplicate_reaction_error(message: &str) -> bool {
    let code = message.rsplit(": ").next().unwrap_or(message).to_lowercase();
    code.contains("react") || code.contains("duplicate")
}

async fn fetch_user(http: Arc<SlackHttpClient>, id: String) -> Option<User> {
    let body = http.post("users.info", &[("user", &id)]).await.ok()?;
    parse_user(body.get("user")?)
}

/// Parse one member object, shared by `users.info` (`user`) and `users.list`
/// (`members[]`) — Slack uses the same shape for both.
fn parse_user(info: &Value) -> Option<User> {
    Some(User {
        id: info.get("id").and_then(Value::as_str)?.to_owned(),
        login_name: info.get("name").and_then(Value::as_str).unwrap_or_default().to_owned(),
        display_name: info
            .pointer("/profile/display_name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        real_name: info
            .pointer("/profile/real_name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        deleted: info.get("deleted").and_then(Value::as_bool).unwrap_or(false),
        is_bot: info.get("is_bot").and_then(Value::as_bool).unwrap_or(false),
        tz_offset: info
            .get("tz_offset")
            .and_then(Value::as_i64)
            .and_then(|n| i32::try_from(n).ok())
            .unwrap_or(0),
        presence: Presence::Unknown,
    })
}

async fn fetch_room(http: Arc<SlackHttpClient>, id: String) -> Option<Room> {
    let body = http.post("conversations.info", &[("channel", &id)]).await.ok()?;
    parse_room(body.get("channel")?)
}

/// Parse one conversation object, shared by `conversations.info` (`channel`)
/// and `conversations.list` (`channels[]`).
fn parse_room(info: &Value) -> Option<Room> {
    let kind = if info.get("is_im").and_then(Value::as_bool).unwrap_or(false) {
        RoomKind::Im
    } else if info.get("is_mpim").and_then(Value::as_bool).unwrap_or(false) {
        RoomKind::Mpim
    } else {
        RoomKind::Channel
    };

    let name = info.get("name").and_then(Value::as_str).unwrap_or_default().to_owned();
    let mut room = Room::new(info.get("id").and_then(Value::as_str)?.to_owned(), name, kind);
    room.topic = info
        .pointer("/topic/value")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    room.purpose = info
        .pointer("/purpose/value")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    room.joined_on_slack = info.get("is_member").and_then(Value::as_bool).unwrap_or(false);
    if let Some(members) = info.get("members").and_then(Value::as_array) {
        room.members = members.iter().filter_map(Value::as_str).map(str::to_owned).collect();
    }
    Some(room)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collapser_runs_fetch_once_per_key() {
        let collapser: LookupCollapser<u32> = LookupCollapser::new();
        let a = collapser.collapse("k", || async { 1 }).await;
        let b = collapser.collapse("k", || async { 2 }).await;
        assert_eq!(a, 1);
        // Second call runs its own fetch since the first already completed
        // and was evicted from the in-flight map; collapsing only applies
        // to truly concurrent callers.
        assert_eq!(b, 2);
    }

    #[test]
    fn apply_event_user_change_evicts_cached_user() {
        let http = Arc::new(SlackHttpClient::new("xoxb-test", None).unwrap());
        let mut session = SlackSession::new(http);
        session.roster.upsert(User::new("U01", "alice"));
        session.apply_event(&SlackEvent::UserChange { user_id: "U01".into() });
        assert!(session.roster().by_id("U01").is_none());
    }

    #[test]
    fn duplicate_reaction_error_codes_are_recognised() {
        assert!(is_duplicate_reaction_error("reactions.add: already_reacted"));
        assert!(is_duplicate_reaction_error("reactions.add: duplicate_reaction"));
    }

    #[test]
    fn unrelated_reaction_errors_are_not_swallowed() {
        assert!(!is_duplicate_reaction_error("reactions.add: channel_not_found"));
        assert!(!is_duplicate_reaction_error("reactions.add: invalid_name"));
    }
}
