//! Bridge core (C6): the `DORMANT/CONNECTING/SYNCING/RUNNING/RECONNECTING`
//! state machine, the bounded history-fetch pool, and the three background
//! timers, all driven from one `tokio::select!` (spec §4.6, §5). Grounded on
//! the teacher's `orchestrator` module plus the `CancellationToken` plumbing
//! throughout its `main.rs`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bridge::threads;
use crate::config::Config;
use crate::diff::edit;
use crate::ipc::{self, BridgeCommand};
use crate::irc::commands::{self, ext::ExtCommand, ClientCommand};
use crate::irc::numeric::{self, *};
use crate::irc::proto::{IrcCodec, IrcMessage};
use crate::irc::server::Listener;
use crate::models::room::RoomKind;
use crate::models::rules::AutoreactRule;
use crate::models::thread::ThreadKey;
use crate::models::thread::ThreadRegistry;
use crate::slack::events::{self, SlackEvent};
use crate::slack::markup::{self, RenderContext};
use crate::slack::session::SlackSession;
use crate::slack::transport::{RtmFrame, SlackHttpClient, SlackRtmClient};
use crate::errors::is_fatal;
use crate::{persistence::state_file, AppError, Result};

const MAX_CONCURRENT_HISTORY_FETCHES: usize = 4;
const RULE_SWEEP_INTERVAL: Duration = Duration::from_secs(30);
const TYPING_DEBOUNCE: Duration = Duration::from_secs(3);
const HISTORY_PAGE_LIMIT: usize = 200;
const SERVER_NAME: &str = "irslackd";

/// The bridge's top-level lifecycle state (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// No IRC client attached; waiting on the listener.
    Dormant,
    /// IRC client registered; establishing the Slack RTM connection.
    Connecting,
    /// RTM connected; bulk-loading the roster and room cache.
    Syncing,
    /// Steady state: the single event loop is live.
    Running,
    /// The RTM connection dropped; waiting for the transport to reconnect.
    Reconnecting,
    /// Shutting down.
    Exit,
}

/// Owns every long-lived resource the bridge needs across its lifecycle.
pub struct Bridge {
    config: Config,
    listener: Listener,
    http: Arc<SlackHttpClient>,
    session: SlackSession,
    threads: ThreadRegistry,
    persisted: state_file::PersistedState,
    state: BridgeState,
    self_user_id: String,
    self_nick: String,
    history_semaphore: Arc<Semaphore>,
    typing_last_sent: HashMap<String, Instant>,
    /// Messages received for a channel the IRC client hasn't joined, held
    /// until an explicit `/join` (spec §8 scenario 2).
    pending_messages: HashMap<String, Vec<crate::slack::events::MessagePayload>>,
    /// Set when a session ends fatally, so `run()` can report it as the
    /// process exit code (spec §6).
    exit_code: i32,
}

impl Bridge {
    /// Build a bridge over `config`, binding the IRC listener and loading
    /// any persisted state. Does not yet talk to Slack.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the IRC port cannot be bound.
    pub async fn new(config: Config) -> Result<Self> {
        let addr = SocketAddr::new(config.bind_ip, config.port);
        let listener = Listener::bind(addr).await?;
        let http = Arc::new(SlackHttpClient::new(config.token.clone(), config.cookie.clone())?);
        let session = SlackSession::new(Arc::clone(&http));
        let mut persisted = state_file::load(&config.status_file).await;
        persisted.silenced_yellers = config.silenced_yellers.iter().cloned().collect();

        Ok(Self {
            config,
            listener,
            http,
            session,
            threads: ThreadRegistry::new(),
            persisted,
            state: BridgeState::Dormant,
            self_user_id: String::new(),
            self_nick: String::new(),
            history_semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_HISTORY_FETCHES)),
            typing_last_sent: HashMap::new(),
            pending_messages: HashMap::new(),
            exit_code: 0,
        })
    }

    /// Run the bridge until a fatal error occurs (spec §4.6, §7). Between
    /// IRC client sessions the bridge always returns to `DORMANT`; the only
    /// way out of the loop is `EXIT`, reached when a session ends with a
    /// `Config`/`Auth` error (exit 1) or a terminal transport failure
    /// (exit 2).
    pub async fn run(mut self) -> Result<i32> {
        loop {
            match self.state {
                BridgeState::Dormant => self.run_dormant().await,
                BridgeState::Exit => return Ok(self.exit_code),
                _ => unreachable!("DORMANT and EXIT are the only states observed between sessions"),
            }
        }
    }

    async fn run_dormant(&mut self) {
        let (framed, peer) = match self.listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(%err, "irc listener accept failed");
                return;
            }
        };
        info!(%peer, "irc client connected; beginning registration");

        let fatal_code = match self.register_session(framed).await {
            Ok(()) => {
                info!("irc client quit; returning to dormant");
                None
            }
            Err(err) if is_fatal(&err) => {
                tracing::error!(%err, "fatal error; shutting down");
                Some(1)
            }
            Err(err @ AppError::TransportTerminal(_)) => {
                tracing::error!(%err, "unrecoverable slack transport failure; shutting down");
                Some(2)
            }
            Err(err) => {
                warn!(%err, "session ended");
                None
            }
        };

        self.listener.release();
        self.session = SlackSession::new(Arc::clone(&self.http));
        self.threads = ThreadRegistry::new();
        self.pending_messages.clear();

        match fatal_code {
            Some(code) => {
                self.exit_code = code;
                self.state = BridgeState::Exit;
                info!(code, "bridge exiting");
            }
            None => {
                self.state = BridgeState::Dormant;
                info!("irc client detached; returning to dormant");
            }
        }
    }

    /// Run the full registration → connect → sync → run lifecycle for one
    /// attached IRC client.
    async fn register_session(&mut self, mut irc: Framed<TcpStream, IrcCodec>) -> Result<()> {
        self.perform_registration(&mut irc).await?;
        self.state = BridgeState::Connecting;

        let ct = CancellationToken::new();
        let (rtm_tx, mut rtm_rx) = mpsc::channel::<RtmFrame>(256);
        let (outbound_tx, outbound_rx) = mpsc::channel::<Value>(64);
        self.session.set_outbound(outbound_tx);

        let rtm_client = SlackRtmClient::new(Arc::clone(&self.http));
        let rtm_task = rtm_client.spawn(rtm_tx, outbound_rx, ct.clone());

        // Wait for the first frame to confirm the socket is live before
        // proceeding to SYNCING (spec §4.6).
        match rtm_rx.recv().await {
            Some(frame) => self.handle_rtm_frame(&mut irc, frame).await?,
            None => {
                ct.cancel();
                return Err(AppError::TransportTerminal("rtm client exited before first frame".into()));
            }
        }

        self.state = BridgeState::Syncing;
        self.sync(&mut irc).await?;

        self.state = BridgeState::Running;
        let ipc_ct = ct.child_token();
        let (cmd_tx, cmd_rx) = mpsc::channel::<BridgeCommand>(32);
        let ipc_handle = ipc::server::spawn(
            self.config.control_socket.to_string_lossy().into_owned(),
            cmd_tx,
            ipc_ct.clone(),
        )
        .ok();

        let outcome = self.run_event_loop(&mut irc, &mut rtm_rx, cmd_rx).await;

        ct.cancel();
        ipc_ct.cancel();
        rtm_task.abort();
        if let Some(handle) = ipc_handle {
            handle.abort();
        }
        state_file::save(&self.config.status_file, &self.persisted).await;

        outcome
    }

    async fn perform_registration(&mut self, irc: &mut Framed<TcpStream, IrcCodec>) -> Result<()> {
        let mut nick = String::new();
        let mut user_seen = false;

        while nick.is_empty() || !user_seen {
            let line = irc
                .next()
                .await
                .ok_or_else(|| AppError::Io("irc client disconnected during registration".into()))??;
            let Some(msg) = IrcMessage::parse(&line) else { continue };
            match commands::parse(&msg) {
                ClientCommand::Nick(n) if !n.is_empty() => nick = n,
                ClientCommand::User { .. } => user_seen = true,
                ClientCommand::Cap | ClientCommand::Pass(_) => {}
                _ => {
                    irc.send(numeric::reply(
                        SERVER_NAME,
                        ERR_NEEDMOREPARAMS,
                        "*",
                        &[&msg.command],
                        Some("Register with NICK and USER first"),
                    ))
                    .await?;
                }
            }
        }

        self.self_nick = nick.clone();
        let welcome = [
            numeric::reply(SERVER_NAME, RPL_WELCOME, &nick, &[], Some(&format!("Welcome to irslackd, {nick}"))),
            numeric::reply(SERVER_NAME, RPL_YOURHOST, &nick, &[], Some(&format!("Your host is {SERVER_NAME}"))),
            numeric::reply(SERVER_NAME, RPL_CREATED, &nick, &[], Some("This server was started moments ago")),
            numeric::reply(SERVER_NAME, RPL_MYINFO, &nick, &[SERVER_NAME, "irslackd-0.1", "o", "o"], None),
            numeric::reply(SERVER_NAME, RPL_ISUPPORT, &nick, &["CHANTYPES=#&=", "PREFIX=(o)@"], Some("are supported by this server")),
            numeric::reply(SERVER_NAME, ERR_NOMOTD, &nick, &[], Some("MOTD File is missing")),
        ];
        for line in welcome {
            irc.send(line).await?;
        }
        Ok(())
    }

    async fn sync(&mut self, irc: &mut Framed<TcpStream, IrcCodec>) -> Result<()> {
        let identity = self.http.post("auth.test", &[]).await?;
        self.self_user_id = identity.get("user_id").and_then(Value::as_str).unwrap_or_default().to_owned();

        if !self.config.no_userlist {
            self.session.load_roster().await?;
        }
        self.session.load_rooms().await?;

        if self.config.autojoin {
            let joinable: Vec<String> = self
                .session
                .rooms()
                .iter()
                .filter(|r| r.kind != RoomKind::Im)
                .filter(|r| !self.config.ignored_channels.contains(&r.name))
                .map(|r| r.id.clone())
                .collect();
            for room_id in joinable {
                let oldest = self.persisted.last_seen_ts.get(&room_id).cloned();
                self.backfill_and_join(irc, &room_id, oldest.as_deref()).await?;
            }
        }
        Ok(())
    }

    async fn backfill_and_join(
        &mut self,
        irc: &mut Framed<TcpStream, IrcCodec>,
        room_id: &str,
        oldest: Option<&str>,
    ) -> Result<()> {
        let permit = Arc::clone(&self.history_semaphore).acquire_owned().await;
        let history = self.session.history(room_id, oldest, HISTORY_PAGE_LIMIT).await;
        drop(permit);

        let Some(room) = self.session.rooms().by_id(room_id).cloned() else {
            return Ok(());
        };
        let irc_name = room.irc_channel_name(self.session.roster());
        self.session.set_joined_on_irc(room_id, true);
        self.announce_join(irc, &irc_name, &room).await?;

        for payload in history.into_iter().rev() {
            self.deliver_message(irc, &payload, false).await?;
            self.persisted.last_seen_ts.insert(room_id.to_owned(), payload.ts.clone());
        }
        Ok(())
    }

    /// Emit the `JOIN`/`TOPIC`/`NAMES` sequence for a room the IRC client is
    /// entering, whether from an explicit `/join`, autojoin backfill, or a
    /// synthesized join on message receipt (spec §8 scenario 2).
    async fn announce_join(&self, irc: &mut Framed<TcpStream, IrcCodec>, irc_name: &str, room: &crate::models::room::Room) -> Result<()> {
        irc.send(format!(":{}!{}@slack JOIN {irc_name}", self.self_nick, self.self_nick)).await?;
        irc.send(numeric::reply(SERVER_NAME, RPL_TOPIC, &self.self_nick, &[irc_name], Some(&room.topic)))
            .await?;
        self.send_names(irc, irc_name, &room.members).await?;
        Ok(())
    }

    async fn send_names(
        &self,
        irc: &mut Framed<TcpStream, IrcCodec>,
        irc_name: &str,
        member_ids: &std::collections::HashSet<String>,
    ) -> Result<()> {
        let nicks: Vec<&str> = member_ids
            .iter()
            .map(|id| self.session.roster().by_id(id).map_or(id.as_str(), |u| u.login_name.as_str()))
            .collect();
        irc.send(numeric::reply(SERVER_NAME, RPL_NAMREPLY, &self.self_nick, &["=", irc_name], Some(&nicks.join(" "))))
            .await?;
        irc.send(numeric::reply(SERVER_NAME, RPL_ENDOFNAMES, &self.self_nick, &[irc_name], Some("End of /NAMES list")))
            .await?;
        Ok(())
    }

    async fn run_event_loop(
        &mut self,
        irc: &mut Framed<TcpStream, IrcCodec>,
        rtm_rx: &mut mpsc::Receiver<RtmFrame>,
        mut cmd_rx: mpsc::Receiver<BridgeCommand>,
    ) -> Result<()> {
        let mut sweep = tokio::time::interval(RULE_SWEEP_INTERVAL);

        loop {
            tokio::select! {
                line = irc.next() => {
                    match line {
                        Some(Ok(line)) => {
                            if !self.handle_irc_line(irc, &line).await? {
                                return Ok(());
                            }
                        }
                        Some(Err(err)) => return Err(err),
                        None => return Ok(()),
                    }
                }
                frame = rtm_rx.recv() => {
                    match frame {
                        Some(frame) => self.handle_rtm_frame(irc, frame).await?,
                        None => {
                            warn!("rtm channel closed; ending session");
                            return Ok(());
                        }
                    }
                }
                cmd = cmd_rx.recv() => {
                    if let Some(cmd) = cmd {
                        self.handle_control_command(cmd).await;
                    }
                }
                _ = sweep.tick() => {
                    let now = Utc::now();
                    let expired = self.persisted.annoy_rules.sweep_expired(now);
                    if !expired.is_empty() {
                        info!(?expired, "annoy rules expired");
                    }
                    let dropped = self.persisted.autoreact_rules.sweep_expired(now);
                    if dropped > 0 {
                        info!(dropped, "autoreact rules expired");
                    }
                }
            }
        }
    }

    /// Returns `false` when the connection should close (client `QUIT` or disconnect).
    async fn handle_irc_line(&mut self, irc: &mut Framed<TcpStream, IrcCodec>, line: &str) -> Result<bool> {
        let Some(msg) = IrcMessage::parse(line) else { return Ok(true) };
        let cmd = commands::parse(&msg);

        match cmd {
            ClientCommand::Ping(token) => {
                irc.send(IrcMessage::format(Some(SERVER_NAME), "PONG", &[SERVER_NAME], Some(&token))).await?;
            }
            ClientCommand::Pong(_) => {}
            ClientCommand::Join(channels) => {
                for channel in channels {
                    self.join_channel(irc, &channel).await?;
                }
            }
            ClientCommand::Part(channels, _reason) => {
                for channel in channels {
                    self.part_channel(&channel).await?;
                }
            }
            ClientCommand::Privmsg { target, text } | ClientCommand::Notice { target, text } => {
                self.handle_outgoing_message(irc, &target, &text).await?;
            }
            ClientCommand::Topic { channel, text: Some(text) } => {
                if let Some((room_id, _)) = self.resolve_target(&channel) {
                    self.session.set_topic(&room_id, &text).await.ok();
                }
            }
            ClientCommand::Topic { channel, text: None } => {
                if let Some(room) = self.session.rooms().by_irc_name(&channel) {
                    irc.send(numeric::reply(SERVER_NAME, RPL_TOPIC, &self.self_nick, &[&channel], Some(&room.topic)))
                        .await?;
                }
            }
            ClientCommand::List => self.handle_list(irc).await?,
            ClientCommand::Who(mask) => self.handle_who(irc, mask.as_deref()).await?,
            ClientCommand::Whois(nick) => self.handle_whois(irc, &nick).await?,
            ClientCommand::Names(channel) => {
                if let Some(channel) = channel {
                    if let Some(room) = self.session.rooms().by_irc_name(&channel).cloned() {
                        self.send_names(irc, &channel, &room.members).await?;
                    }
                }
            }
            ClientCommand::Mode { .. } => {}
            ClientCommand::Kick { channel, nick, .. } => {
                if let (Some((room_id, _)), Some(user)) =
                    (self.resolve_target(&channel), self.session.roster().by_name(&nick).cloned())
                {
                    self.session.kick(&room_id, &user.id).await.ok();
                }
            }
            ClientCommand::Invite { nick, channel } => {
                if let (Some((room_id, _)), Some(user)) =
                    (self.resolve_target(&channel), self.session.roster().by_name(&nick).cloned())
                {
                    self.session.invite(&room_id, &user.id).await.ok();
                }
            }
            ClientCommand::Away(message) => {
                self.session.set_presence(message.is_some()).await.ok();
            }
            ClientCommand::Userhost(nicks) => self.handle_userhost(irc, &nicks).await?,
            ClientCommand::Quit(_) => return Ok(false),
            ClientCommand::Nick(_) | ClientCommand::User { .. } | ClientCommand::Cap | ClientCommand::Pass(_) => {}
            ClientCommand::Unknown(raw) => {
                irc.send(numeric::reply(SERVER_NAME, ERR_UNKNOWNCOMMAND, &self.self_nick, &[&raw], Some("Unknown command")))
                    .await?;
            }
        }
        Ok(true)
    }

    async fn join_channel(&mut self, irc: &mut Framed<TcpStream, IrcCodec>, channel: &str) -> Result<()> {
        if let Some(thread) = self.threads.by_irc_name(channel).cloned() {
            self.threads.mark_rejoined(&thread.key);
            return Ok(());
        }

        let Some(room) = self.session.rooms().by_irc_name(channel).cloned() else {
            irc.send(numeric::reply(SERVER_NAME, ERR_NOSUCHCHANNEL, &self.self_nick, &[channel], Some("No such channel")))
                .await?;
            return Ok(());
        };

        if !room.joined_on_slack {
            self.session.join(&room.id).await.ok();
        }
        self.session.set_joined_on_irc(&room.id, true);
        self.announce_join(irc, channel, &room).await?;

        if let Some(queued) = self.pending_messages.remove(&room.id) {
            for payload in queued {
                self.deliver_message(irc, &payload, false).await?;
            }
        }
        Ok(())
    }

    async fn part_channel(&mut self, channel: &str) -> Result<()> {
        if let Some(thread) = self.threads.by_irc_name(channel).cloned() {
            self.threads.mark_left(thread.key);
            return Ok(());
        }
        if let Some(room_id) = self.session.rooms().by_irc_name(channel).map(|r| r.id.clone()) {
            self.session.set_joined_on_irc(&room_id, false);
        }
        Ok(())
    }

    async fn handle_outgoing_message(
        &mut self,
        irc: &mut Framed<TcpStream, IrcCodec>,
        target: &str,
        text: &str,
    ) -> Result<()> {
        if let Some(ext_cmd) = text.trim().starts_with('/').then(|| crate::irc::commands::ext::parse(text)).flatten() {
            return self.handle_ext_command(irc, target, ext_cmd).await;
        }

        let Some((room_id, thread_ts)) = self.resolve_target(target) else {
            irc.send(numeric::reply(SERVER_NAME, ERR_NOSUCHNICK, &self.self_nick, &[target], Some("No such nick/channel")))
                .await?;
            return Ok(());
        };

        let slack_text = markup::render_irc_to_slack(text, self.session.roster(), self.session.rooms());
        match self.session.post(&room_id, &slack_text, thread_ts.as_deref()).await {
            Ok(ts) => {
                self.persisted.last_seen_ts.insert(room_id, ts);
            }
            Err(err) => warn!(%err, "failed to post message to slack"),
        }
        Ok(())
    }

    async fn handle_ext_command(
        &mut self,
        irc: &mut Framed<TcpStream, IrcCodec>,
        target: &str,
        cmd: ExtCommand,
    ) -> Result<()> {
        match cmd {
            ExtCommand::SendFile { target, path } => {
                if let Some((room_id, _)) = self.resolve_target(&target) {
                    self.session.upload(&room_id, std::path::Path::new(&path)).await.ok();
                }
            }
            ExtCommand::Annoy { user, minutes } => {
                let expiry = Utc::now() + chrono::Duration::minutes(i64::try_from(minutes.unwrap_or(30)).unwrap_or(30));
                self.persisted.annoy_rules.set(user, expiry);
            }
            ExtCommand::DropAnnoy { user } => {
                self.persisted.annoy_rules.drop_rule(&user);
            }
            ExtCommand::ListAnnoy => {
                let list = self.persisted.annoy_rules.list();
                let summary = list.iter().map(|(u, exp)| format!("{u} until {exp}")).collect::<Vec<_>>().join(", ");
                irc.send(IrcMessage::format(Some(SERVER_NAME), "NOTICE", &[&self.self_nick], Some(&summary))).await?;
            }
            ExtCommand::Autoreact { user, probability, reaction, minutes } => {
                let expiry = Utc::now() + chrono::Duration::minutes(i64::try_from(minutes.unwrap_or(60)).unwrap_or(60));
                self.persisted.autoreact_rules.add(
                    user,
                    AutoreactRule {
                        room_scope: self.resolve_target(target).map(|(room_id, _)| room_id),
                        probability,
                        reaction: reaction.unwrap_or_else(|| "thumbsup".to_owned()),
                        expiry,
                    },
                );
            }
            ExtCommand::DropAutoreact { user } => {
                self.persisted.autoreact_rules.drop_all(&user);
            }
            ExtCommand::ListAutoreact => {
                let list = self.persisted.autoreact_rules.list();
                let summary = list
                    .iter()
                    .map(|(u, r)| format!("{u}: {} @ {:.2}", r.reaction, r.probability))
                    .collect::<Vec<_>>()
                    .join(", ");
                irc.send(IrcMessage::format(Some(SERVER_NAME), "NOTICE", &[&self.self_nick], Some(&summary))).await?;
            }
            ExtCommand::Me { text } => {
                if let Some((room_id, thread_ts)) = self.resolve_target(target) {
                    let slack_text = format!("_{text}_");
                    self.session.post(&room_id, &slack_text, thread_ts.as_deref()).await.ok();
                }
            }
            ExtCommand::SetTopic { text } => {
                if let Some((room_id, _)) = self.resolve_target(target) {
                    self.session.set_topic(&room_id, &text).await.ok();
                }
            }
            ExtCommand::Invite { nick } => {
                if let (Some((room_id, _)), Some(user)) =
                    (self.resolve_target(target), self.session.roster().by_name(&nick).cloned())
                {
                    self.session.invite(&room_id, &user.id).await.ok();
                }
            }
            ExtCommand::Kick { nick } => {
                if let (Some((room_id, _)), Some(user)) =
                    (self.resolve_target(target), self.session.roster().by_name(&nick).cloned())
                {
                    self.session.kick(&room_id, &user.id).await.ok();
                }
            }
            ExtCommand::Whois { nick } => self.handle_whois(irc, &nick).await?,
        }
        Ok(())
    }

    async fn handle_list(&self, irc: &mut Framed<TcpStream, IrcCodec>) -> Result<()> {
        for room in self.session.rooms().iter().filter(|r| r.kind != RoomKind::Im) {
            let name = room.irc_channel_name(self.session.roster());
            let count = room.members.len().to_string();
            irc.send(numeric::reply(SERVER_NAME, RPL_LIST, &self.self_nick, &[&name, &count], Some(&room.topic)))
                .await?;
        }
        irc.send(numeric::reply(SERVER_NAME, RPL_LISTEND, &self.self_nick, &[], Some("End of /LIST"))).await?;
        Ok(())
    }

    async fn handle_who(&self, irc: &mut Framed<TcpStream, IrcCodec>, mask: Option<&str>) -> Result<()> {
        let Some(mask) = mask else { return Ok(()) };
        if let Some(room) = self.session.rooms().by_irc_name(mask) {
            for id in &room.members {
                let nick = self.session.roster().by_id(id).map_or(id.as_str(), |u| u.login_name.as_str());
                irc.send(numeric::reply(
                    SERVER_NAME,
                    RPL_WHOREPLY,
                    &self.self_nick,
                    &[mask, nick, "slack", SERVER_NAME, nick, "H"],
                    Some("0 -"),
                ))
                .await?;
            }
        }
        irc.send(numeric::reply(SERVER_NAME, RPL_ENDOFWHO, &self.self_nick, &[mask], Some("End of /WHO list")))
            .await?;
        Ok(())
    }

    async fn handle_whois(&self, irc: &mut Framed<TcpStream, IrcCodec>, nick: &str) -> Result<()> {
        let Some(user) = self.session.roster().by_name(nick) else {
            irc.send(numeric::reply(SERVER_NAME, ERR_NOSUCHNICK, &self.self_nick, &[nick], Some("No such nick")))
                .await?;
            return Ok(());
        };
        irc.send(numeric::reply(
            SERVER_NAME,
            RPL_WHOISUSER,
            &self.self_nick,
            &[nick, nick, "slack", "*"],
            Some(&user.real_name),
        ))
        .await?;
        irc.send(numeric::reply(SERVER_NAME, RPL_WHOISSERVER, &self.self_nick, &[nick, SERVER_NAME], Some("irslackd bridge")))
            .await?;
        irc.send(numeric::reply(SERVER_NAME, RPL_ENDOFWHOIS, &self.self_nick, &[nick], Some("End of /WHOIS list")))
            .await?;
        Ok(())
    }

    async fn handle_userhost(&self, irc: &mut Framed<TcpStream, IrcCodec>, nicks: &[String]) -> Result<()> {
        let replies: Vec<String> = nicks
            .iter()
            .filter(|n| self.session.roster().by_name(n).is_some())
            .map(|n| format!("{n}=+{n}@slack"))
            .collect();
        irc.send(numeric::reply(SERVER_NAME, RPL_USERHOST, &self.self_nick, &[], Some(&replies.join(" "))))
            .await?;
        Ok(())
    }

    /// Map an IRC-visible target (channel, thread channel, or nick) to a
    /// Slack room id and optional thread `ts` (spec §3).
    fn resolve_target(&self, target: &str) -> Option<(String, Option<String>)> {
        if let Some(thread) = self.threads.by_irc_name(target) {
            return Some((thread.key.room_id.clone(), Some(thread.key.parent_ts.clone())));
        }
        if let Some(room) = self.session.rooms().by_irc_name(target) {
            return Some((room.id.clone(), None));
        }
        let user = self.session.roster().by_name(target)?;
        let room = self
            .session
            .rooms()
            .iter()
            .find(|r| r.kind == RoomKind::Im && r.members.contains(&user.id))?;
        Some((room.id.clone(), None))
    }

    async fn handle_rtm_frame(&mut self, irc: &mut Framed<TcpStream, IrcCodec>, frame: RtmFrame) -> Result<()> {
        match frame {
            RtmFrame::Reconnected => {
                let was_running = self.state == BridgeState::Running;
                if was_running {
                    self.state = BridgeState::Reconnecting;
                }
                info!("rtm reconnected; refreshing roster and rooms");
                self.session.load_roster().await.ok();
                self.session.load_rooms().await.ok();
                if was_running {
                    self.state = BridgeState::Syncing;
                    self.state = BridgeState::Running;
                }
            }
            RtmFrame::Event(raw) => {
                let Some(event) = events::decode(&raw) else { return Ok(()) };
                self.handle_slack_event(irc, event).await?;
            }
        }
        Ok(())
    }

    async fn handle_slack_event(&mut self, irc: &mut Framed<TcpStream, IrcCodec>, event: SlackEvent) -> Result<()> {
        match &event {
            SlackEvent::Message(payload) => {
                if payload.user == self.self_user_id {
                    return Ok(());
                }
                self.deliver_message(irc, payload, true).await?;
                self.maybe_autoreact(payload).await;
            }
            SlackEvent::MessageChanged(payload) => {
                if let Some(prev) = &payload.previous_message {
                    if let Some(rendered) = edit::render_edit(&prev.text, &payload.text) {
                        self.deliver_text(irc, &payload.channel, payload.thread_ts.as_deref(), &payload.user, &rendered)
                            .await?;
                    }
                }
            }
            SlackEvent::MessageDeleted { channel, ts: _ } => {
                self.deliver_text(irc, channel, None, &self.self_user_id.clone(), "[deleted]").await?;
            }
            SlackEvent::UserTyping(payload) => self.maybe_forward_typing(payload.user.clone(), payload.channel.clone()).await,
            SlackEvent::ReactionAdded(payload) | SlackEvent::ReactionRemoved(payload) => {
                let verb = if matches!(event, SlackEvent::ReactionAdded(_)) { "reacted" } else { "un-reacted" };
                let nick = self.session.roster().by_id(&payload.user).map_or(payload.user.as_str(), |u| u.login_name.as_str());
                let text = format!("{nick} {verb} with :{}:", payload.reaction);
                self.deliver_text(irc, &payload.item.channel, None, &payload.user, &text).await?;
            }
            SlackEvent::FileShared(payload) => self.deliver_file(irc, payload.channel_id.clone(), payload.file_id.clone()).await,
            SlackEvent::ChannelJoined(payload) => {
                let channel = payload.channel.clone();
                self.session.apply_event(&event);
                // Spec §4.4: this must behave as if the IRC client had
                // issued /join, not merely update the room cache.
                if let Some(room) = self.session.rooms().by_id(&channel).cloned() {
                    if !room.joined_on_irc {
                        let irc_name = room.irc_channel_name(self.session.roster());
                        self.session.set_joined_on_irc(&channel, true);
                        self.announce_join(irc, &irc_name, &room).await?;
                    }
                }
            }
            SlackEvent::UserChange { .. }
            | SlackEvent::ChannelUpdated { .. }
            | SlackEvent::MemberJoinedChannel(_)
            | SlackEvent::PresenceChange { .. } => {
                self.session.apply_event(&event);
            }
            SlackEvent::Goodbye | SlackEvent::Ignored(_) | SlackEvent::Unknown(_) => {}
        }
        Ok(())
    }

    async fn deliver_message(
        &mut self,
        irc: &mut Framed<TcpStream, IrcCodec>,
        payload: &crate::slack::events::MessagePayload,
        track_cursor: bool,
    ) -> Result<()> {
        // Channel join on receipt (spec §8 scenario 2): a plain (non-thread)
        // message into a channel the IRC client hasn't joined either joins
        // it on the fly, or queues the message for the next explicit /join,
        // depending on autojoin/no-rejoin-on-mention configuration.
        if payload.thread_ts.is_none() {
            if let Some(room) = self.session.rooms().by_id(&payload.channel).cloned() {
                if room.kind != RoomKind::Im && !room.joined_on_irc {
                    if self.config.autojoin && !self.config.no_rejoin_on_mention {
                        let irc_name = room.irc_channel_name(self.session.roster());
                        self.session.set_joined_on_irc(&room.id, true);
                        self.announce_join(irc, &irc_name, &room).await?;
                    } else {
                        self.pending_messages.entry(payload.channel.clone()).or_default().push(payload.clone());
                        return Ok(());
                    }
                }
            }
        }

        let target_irc_name = self.materialise_target(&payload.channel, payload.thread_ts.as_deref(), irc).await?;

        let room = self.session.rooms().by_id(&payload.channel).cloned();
        let channel_member_ids = room.as_ref().map(|r| r.members.clone()).unwrap_or_default();
        let silenced = self.config.silenced_yellers.contains(&payload.user);
        let ctx = RenderContext {
            roster: self.session.roster(),
            rooms: self.session.rooms(),
            channel_member_ids: &channel_member_ids,
            sender_is_silenced_yeller: silenced,
        };

        let rendered = markup::render_message(
            &payload.text,
            &ctx,
            &self.config.downloads_dir,
            &payload.channel,
            &payload.ts,
            self.config.formatted_max_lines,
        )?;
        let text = match rendered {
            markup::DeliveryText::Inline(text) => text,
            markup::DeliveryText::Overflowed { path } => format!("[message too long, written to {}]", path.display()),
        };

        let nick = self.session.roster().by_id(&payload.user).map_or(payload.user.as_str(), |u| u.login_name.as_str());
        irc.send(IrcMessage::format(
            Some(&format!("{nick}!{nick}@slack")),
            "PRIVMSG",
            &[&target_irc_name],
            Some(&text),
        ))
        .await?;

        if track_cursor {
            self.persisted.last_seen_ts.insert(payload.channel.clone(), payload.ts.clone());
        }
        Ok(())
    }

    async fn deliver_text(
        &mut self,
        irc: &mut Framed<TcpStream, IrcCodec>,
        channel: &str,
        thread_ts: Option<&str>,
        user_id: &str,
        text: &str,
    ) -> Result<()> {
        let target_irc_name = self.materialise_target(channel, thread_ts, irc).await?;
        let nick = self.session.roster().by_id(user_id).map_or(user_id, |u| u.login_name.as_str());
        irc.send(IrcMessage::format(Some(&format!("{nick}!{nick}@slack")), "PRIVMSG", &[&target_irc_name], Some(text)))
            .await?;
        Ok(())
    }

    async fn deliver_file(&mut self, irc: &mut Framed<TcpStream, IrcCodec>, channel: String, file_id: String) {
        let Ok((url, name)) = self.session.file_info(&file_id).await else { return };
        let dest = self.config.downloads_dir.join(&name);
        if self.session.download_file(&url, &dest).await.is_ok() {
            let text = format!("[file] {} saved to {}", name, dest.display());
            let _ = self.deliver_text(irc, &channel, None, &self.self_user_id.clone(), &text).await;
        }
    }

    /// Materialise a thread channel if `thread_ts` is set and return the IRC
    /// name the message should be delivered under.
    async fn materialise_target(
        &mut self,
        channel: &str,
        thread_ts: Option<&str>,
        irc: &mut Framed<TcpStream, IrcCodec>,
    ) -> Result<String> {
        let Some(parent_ts) = thread_ts else {
            return Ok(self
                .session
                .rooms()
                .by_id(channel)
                .map_or_else(|| channel.to_owned(), |r| r.irc_channel_name(self.session.roster())));
        };

        let key = ThreadKey::new(channel, parent_ts);
        if let Some(existing) = self.threads.get(&key) {
            return Ok(existing.irc_name.clone());
        }

        let materialised = threads::materialise(&mut self.threads, self.session.rooms(), self.session.roster(), channel, key);
        if let Some(materialised) = materialised {
            for line in &materialised.join_lines {
                irc.send(line.clone()).await?;
            }
            irc.send(materialised.topic_line.clone()).await?;
            return Ok(materialised.irc_name);
        }
        Ok(channel.to_owned())
    }

    async fn maybe_forward_typing(&mut self, user_id: String, channel: String) {
        if !self.persisted.annoy_rules.is_active(&user_id, Utc::now()) {
            return;
        }
        let now = Instant::now();
        if let Some(last) = self.typing_last_sent.get(&channel) {
            if now.duration_since(*last) < TYPING_DEBOUNCE {
                return;
            }
        }
        self.typing_last_sent.insert(channel.clone(), now);
        let _ = self.session.typing(&channel).await;
    }

    async fn maybe_autoreact(&mut self, payload: &crate::slack::events::MessagePayload) {
        let now = Utc::now();
        let rules: Vec<AutoreactRule> = self
            .persisted
            .autoreact_rules
            .matching(&payload.user, &payload.channel, now)
            .into_iter()
            .cloned()
            .collect();
        for rule in rules {
            if deterministic_roll(&payload.ts) < rule.probability {
                let _ = self.session.react(&payload.channel, &payload.ts, &rule.reaction).await;
            }
        }
    }

    async fn handle_control_command(&mut self, cmd: BridgeCommand) {
        match cmd {
            BridgeCommand::SendMessage { target, text, reply } => {
                let outcome = match self.resolve_target(&target) {
                    Some((room_id, thread_ts)) => self.session.post(&room_id, &text, thread_ts.as_deref()).await.map(|_| ()),
                    None => Err(AppError::NotFound(format!("no such target '{target}'"))),
                };
                let _ = reply.send(outcome);
            }
            BridgeCommand::SendFile { target, path, reply } => {
                let outcome = match self.resolve_target(&target) {
                    Some((room_id, _)) => self.session.upload(&room_id, std::path::Path::new(&path)).await,
                    None => Err(AppError::NotFound(format!("no such target '{target}'"))),
                };
                let _ = reply.send(outcome);
            }
            BridgeCommand::GetConfig { reply } => {
                let _ = reply.send(serde_json::json!({
                    "port": self.config.port,
                    "autojoin": self.config.autojoin,
                    "downloads_dir": self.config.downloads_dir,
                }));
            }
        }
    }
}

/// Deterministic `[0.0, 1.0)` pseudo-random roll from a message `ts`, so
/// autoreact probability checks don't need a dedicated RNG dependency.
/// Reuses the FNV-1a construction from [`crate::models::thread::short_hash`].
fn deterministic_roll(seed: &str) -> f64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in seed.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01B3);
    }
    (hash % 1_000_000) as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_roll_is_stable_and_bounded() {
        let a = deterministic_roll("1700000000.000100");
        let b = deterministic_roll("1700000000.000100");
        assert_eq!(a, b);
        assert!((0.0..1.0).contains(&a));
    }

    #[test]
    fn deterministic_roll_varies_by_seed() {
        assert_ne!(deterministic_roll("1700000000.000100"), deterministic_roll("1700000000.000200"));
    }
}
