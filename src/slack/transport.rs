//! Slack transport (C1): authenticated HTTPS calls plus the RTM WebSocket.
//!
//! Two channels, one process, matching spec §4.1: a call surface
//! (`SlackHttpClient::post`) and an event surface (`SlackRtmClient`) that
//! decodes frames only as far as type-tagging and leaves interpretation to
//! [`crate::slack::session`].

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::{AppError, Result};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const PING_TIMEOUT: Duration = Duration::from_secs(40);
const PING_INTERVAL: Duration = Duration::from_secs(15);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// `ok=false` Slack API response, typed by method and error code (spec §4.1).
#[derive(Debug, Clone)]
pub struct SlackCallError {
    /// The REST method invoked, e.g. `chat.postMessage`.
    pub method: String,
    /// Slack's `error` field.
    pub code: String,
}

impl std::fmt::Display for SlackCallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.method, self.code)
    }
}

/// Authenticated HTTPS call surface to `slack.com/api/<method>`.
pub struct SlackHttpClient {
    http: reqwest::Client,
    token: String,
    cookie: Option<String>,
}

impl SlackHttpClient {
    /// Build a client for `token`, attaching `cookie` to every request when
    /// the token is of the browser-extracted (`xoxc-…`) kind.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the underlying HTTPS client cannot be built.
    pub fn new(token: impl Into<String>, cookie: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|err| AppError::Config(format!("failed to build http client: {err}")))?;
        Ok(Self {
            http,
            token: token.into(),
            cookie,
        })
    }

    fn cookie_header(&self) -> Option<String> {
        self.cookie.as_ref().map(|c| format!("d={c};"))
    }

    /// Call a Slack Web API method with a form-encoded body.
    ///
    /// # Errors
    ///
    /// Returns `AppError::TransportTransient` for network failures (the
    /// caller decides whether to retry), or an error carrying
    /// [`SlackCallError`] rendered into the message when Slack itself
    /// returns `ok: false`.
    #[instrument(skip(self, form), fields(method = %method))]
    pub async fn post(&self, method: &str, form: &[(&str, &str)]) -> Result<Value> {
        let url = format!("https://slack.com/api/{method}");
        let mut request = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .form(&append_token(form, &self.token));

        if let Some(cookie) = self.cookie_header() {
            request = request.header(reqwest::header::COOKIE, cookie);
        }

        let response = request
            .send()
            .await
            .map_err(|err| AppError::TransportTransient(format!("{method}: {err}")))?;

        let body: Value = response
            .json()
            .await
            .map_err(|err| AppError::MalformedEvent(format!("{method}: invalid json: {err}")))?;

        if body.get("ok").and_then(Value::as_bool) == Some(false) {
            let code = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown_error")
                .to_owned();
            return Err(slack_call_error(method, code));
        }

        Ok(body)
    }

    /// Upload a file via multipart to `files.upload`, scoped to a room or user id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Command` if `path` is unreadable (never crashes
    /// the bridge, per spec §4.4), or a transport/Slack error otherwise.
    #[instrument(skip(self), fields(method = "files.upload"))]
    pub async fn upload(&self, channel_or_user: &str, path: &std::path::Path) -> Result<Value> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|err| AppError::Command(format!("cannot read file '{}': {err}", path.display())))?;
        let filename = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_owned());

        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename);
        let form = reqwest::multipart::Form::new()
            .text("channels", channel_or_user.to_owned())
            .part("file", part);

        let mut request = self
            .http
            .post("https://slack.com/api/files.upload")
            .bearer_auth(&self.token)
            .multipart(form);

        if let Some(cookie) = self.cookie_header() {
            request = request.header(reqwest::header::COOKIE, cookie);
        }

        let response = request
            .send()
            .await
            .map_err(|err| AppError::TransportTransient(format!("files.upload: {err}")))?;
        let body: Value = response
            .json()
            .await
            .map_err(|err| AppError::MalformedEvent(format!("files.upload: invalid json: {err}")))?;

        if body.get("ok").and_then(Value::as_bool) == Some(false) {
            let code = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown_error")
                .to_owned();
            return Err(slack_call_error("files.upload", code));
        }

        Ok(body)
    }
}

impl SlackHttpClient {
    /// Download a private file URL (e.g. `files.info`'s `url_private`) to
    /// `dest`, authenticating with the bot token the same way as a REST call.
    ///
    /// # Errors
    ///
    /// Returns `AppError::TransportTransient` on a network failure, or
    /// `AppError::Io` if the response body cannot be written to `dest`.
    pub async fn download(&self, url: &str, dest: &std::path::Path) -> Result<()> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|err| AppError::TransportTransient(format!("file download: {err}")))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|err| AppError::TransportTransient(format!("file download body: {err}")))?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, bytes).await?;
        Ok(())
    }
}

fn slack_call_error(method: &str, code: String) -> AppError {
    let err = SlackCallError {
        method: method.to_owned(),
        code,
    };
    AppError::Command(err.to_string())
}

fn append_token<'a>(form: &[(&'a str, &'a str)], token: &'a str) -> Vec<(&'a str, &'a str)> {
    let mut out = Vec::with_capacity(form.len() + 1);
    out.push(("token", token));
    out.extend_from_slice(form);
    out
}

/// An RTM frame, decoded only as far as type-tagging. Interpretation is
/// [`crate::slack::session`]'s job.
#[derive(Debug, Clone)]
pub enum RtmFrame {
    /// A normal JSON event frame from the WebSocket.
    Event(Value),
    /// Synthetic event: the session was transparently re-established.
    /// Upper layers should refresh rosters and backfill gaps (spec §4.1).
    Reconnected,
}

/// Owns the RTM WebSocket connection and its reconnect-with-backoff loop.
pub struct SlackRtmClient {
    http: Arc<SlackHttpClient>,
}

impl SlackRtmClient {
    /// Wrap an [`SlackHttpClient`] for use by the RTM connection loop.
    #[must_use]
    pub fn new(http: Arc<SlackHttpClient>) -> Self {
        Self { http }
    }

    /// Spawn the reconnect-with-backoff loop, emitting decoded frames on `tx`
    /// and forwarding anything received on `outbound_rx` (e.g. typing
    /// indicators, spec §4.4) onto the live socket.
    ///
    /// Reconnects transparently on TCP loss, a close frame, a
    /// ping-timeout (no server frame for longer than 40s), or a Slack
    /// `goodbye` event, with exponential backoff capped at 30s. Each
    /// reconnection also emits [`RtmFrame::Reconnected`] so the session
    /// layer can refresh rosters and backfill gaps.
    pub fn spawn(
        self,
        tx: mpsc::Sender<RtmFrame>,
        mut outbound_rx: mpsc::Receiver<Value>,
        ct: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut backoff = INITIAL_BACKOFF;
            let mut first_connect = true;

            loop {
                if ct.is_cancelled() {
                    break;
                }

                match self.connect_once().await {
                    Ok(ws) => {
                        backoff = INITIAL_BACKOFF;
                        if !first_connect {
                            if tx.send(RtmFrame::Reconnected).await.is_err() {
                                break;
                            }
                        }
                        first_connect = false;

                        match run_connection(ws, &tx, &mut outbound_rx, &ct).await {
                            ConnectionExit::Cancelled => break,
                            ConnectionExit::Dropped(reason) => {
                                warn!(%reason, "rtm connection dropped; reconnecting");
                            }
                        }
                    }
                    Err(err) => {
                        warn!(%err, "rtm.connect failed; retrying");
                    }
                }

                tokio::select! {
                    () = ct.cancelled() => break,
                    () = sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
            info!("rtm client loop exiting");
        })
    }

    async fn connect_once(&self) -> Result<WsStream> {
        let response = self.http.post("rtm.connect", &[]).await?;
        let url = response
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::TransportTransient("rtm.connect: missing url".into()))?;

        let (ws, _response) = connect_async(url)
            .await
            .map_err(|err| AppError::TransportTransient(format!("websocket connect failed: {err}")))?;
        Ok(ws)
    }
}

enum ConnectionExit {
    Cancelled,
    Dropped(&'static str),
}

async fn run_connection(
    ws: WsStream,
    tx: &mpsc::Sender<RtmFrame>,
    outbound_rx: &mut mpsc::Receiver<Value>,
    ct: &CancellationToken,
) -> ConnectionExit {
    let (mut write, mut read) = ws.split();
    let mut last_frame = Instant::now();
    let mut watchdog = tokio::time::interval(Duration::from_secs(5));
    let mut ping_ticker = tokio::time::interval(PING_INTERVAL);
    ping_ticker.tick().await;

    loop {
        tokio::select! {
            () = ct.cancelled() => {
                let _ = write.send(WsMessage::Close(None)).await;
                return ConnectionExit::Cancelled;
            }
            _ = watchdog.tick() => {
                if last_frame.elapsed() > PING_TIMEOUT {
                    return ConnectionExit::Dropped("ping-timeout");
                }
            }
            _ = ping_ticker.tick() => {
                if write.send(WsMessage::Ping(Vec::new())).await.is_err() {
                    return ConnectionExit::Dropped("tcp-loss");
                }
            }
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(value) => {
                        if write.send(WsMessage::Text(value.to_string())).await.is_err() {
                            return ConnectionExit::Dropped("tcp-loss");
                        }
                    }
                    None => return ConnectionExit::Cancelled,
                }
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        last_frame = Instant::now();
                        match serde_json::from_str::<Value>(&text) {
                            Ok(value) => {
                                if value.get("type").and_then(Value::as_str) == Some("goodbye") {
                                    return ConnectionExit::Dropped("goodbye");
                                }
                                if tx.send(RtmFrame::Event(value)).await.is_err() {
                                    return ConnectionExit::Cancelled;
                                }
                            }
                            Err(err) => {
                                warn!(%err, "malformed rtm frame; dropped");
                            }
                        }
                    }
                    Some(Ok(WsMessage::Ping(payload))) => {
                        last_frame = Instant::now();
                        let _ = write.send(WsMessage::Pong(payload)).await;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        return ConnectionExit::Dropped("tcp-loss");
                    }
                    Some(Ok(_)) => {
                        last_frame = Instant::now();
                    }
                    Some(Err(err)) => {
                        warn!(%err, "rtm read error");
                        return ConnectionExit::Dropped("tcp-loss");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slack_call_error_display_includes_method_and_code() {
        let err = SlackCallError {
            method: "chat.postMessage".into(),
            code: "channel_not_found".into(),
        };
        assert_eq!(err.to_string(), "chat.postMessage: channel_not_found");
    }

    #[test]
    fn append_token_prepends_token_field() {
        let form = [("channel", "C01")];
        let with_token = append_token(&form, "xoxb-abc");
        assert_eq!(with_token[0], ("token", "xoxb-abc"));
        assert_eq!(with_token[1], ("channel", "C01"));
    }
}
