//! Configuration record consumed by the bridge core.
//!
//! The outer CLI parser and environment-variable loader are treated as an
//! external launcher (spec §1); this module only defines the resulting
//! record and the env-override rules so tests can build one without a
//! real process, and so `main` has somewhere to put `clap`'s output.

use std::collections::HashSet;
use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use clap::Parser;

use crate::{AppError, Result};

/// Default IRC listen port (spec §6).
pub const DEFAULT_PORT: u16 = 9007;

/// Default history backfill cap when no cursor is persisted (spec §4.6).
pub const DEFAULT_HISTORY_CAP_HOURS: i64 = 24;

/// Default code-fence line count above which a message is diverted to a file (spec §4.2).
pub const DEFAULT_FORMATTED_MAX_LINES: usize = 20;

/// `clap`-derived CLI surface. Every field is overridable by an environment
/// variable of the same name (upper-snake-case), env taking precedence per
/// spec §6.
#[derive(Debug, Parser)]
#[command(name = "irslackd", about = "Slack-to-IRC bridge", version, long_about = None)]
pub struct Cli {
    /// TCP port the IRC front-end listens on.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Bind IP. Anything outside 127.0.0.0/8 is refused unless `OVERRIDE_LOCAL_IP` is set.
    #[arg(long, default_value = "127.0.0.1")]
    pub bind_ip: String,

    /// Path to a file containing the Slack token.
    #[arg(long)]
    pub token_file: PathBuf,

    /// Path to a file containing the browser-extracted cookie, if any.
    #[arg(long)]
    pub cookie_file: Option<PathBuf>,

    /// Auto-join every channel the session is a member of on Slack.
    #[arg(long)]
    pub autojoin: bool,

    /// Suppress full user-list population (large workspaces).
    #[arg(long)]
    pub no_userlist: bool,

    /// Channel names never auto-joined or surfaced.
    #[arg(long, value_delimiter = ',')]
    pub ignored_channels: Vec<String>,

    /// Directory for downloaded files and overflowed long messages.
    #[arg(long, default_value = "./downloads")]
    pub downloads_dir: PathBuf,

    /// Lines of code-fence content above which a message is written to a file instead.
    #[arg(long, default_value_t = DEFAULT_FORMATTED_MAX_LINES)]
    pub formatted_max_lines: usize,

    /// Path to the persisted status file (§4.7).
    #[arg(long, default_value = "./irslackd.state")]
    pub status_file: PathBuf,

    /// Nicks/channels for which `@here`/`@channel`/`@everyone` is rendered without notification.
    #[arg(long, value_delimiter = ',')]
    pub silenced_yellers: Vec<String>,

    /// Disable auto-rejoin of a channel on a new mention.
    #[arg(long)]
    pub no_rejoin_on_mention: bool,

    /// Path to the control-socket (§4.8), created only while an IRC client is attached.
    #[arg(long, default_value = "./irslackd.sock")]
    pub control_socket: PathBuf,

    /// Verbose logging.
    #[arg(long)]
    pub debug: bool,

    /// Suffix appended to the log identity (useful when running more than one instance).
    #[arg(long, default_value = "")]
    pub log_suffix: String,
}

/// Fully resolved configuration record, after env overrides and validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// TCP port the IRC front-end listens on.
    pub port: u16,
    /// Validated bind address.
    pub bind_ip: IpAddr,
    /// Slack token, read from `token_file`.
    pub token: String,
    /// Optional `d=...` cookie, read from `cookie_file`.
    pub cookie: Option<String>,
    /// Auto-join every channel the session is a member of on Slack.
    pub autojoin: bool,
    /// Suppress full user-list population.
    pub no_userlist: bool,
    /// Channel names never auto-joined or surfaced.
    pub ignored_channels: HashSet<String>,
    /// Directory for downloaded files and overflowed long messages.
    pub downloads_dir: PathBuf,
    /// Lines of code-fence content above which a message is written to a file instead.
    pub formatted_max_lines: usize,
    /// Path to the persisted status file.
    pub status_file: PathBuf,
    /// Nicks/channels for which yelling mentions are de-fanged.
    pub silenced_yellers: HashSet<String>,
    /// Disable auto-rejoin of a channel on a new mention.
    pub no_rejoin_on_mention: bool,
    /// Path to the control-socket.
    pub control_socket: PathBuf,
    /// Verbose logging.
    pub debug: bool,
    /// Suffix appended to the log identity.
    pub log_suffix: String,
}

fn env_override(name: &str, default: Option<String>) -> Option<String> {
    env::var(name).ok().or(default)
}

impl Config {
    /// Build a [`Config`] from parsed CLI args plus environment overrides.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the token file is missing/unreadable,
    /// the bind address is invalid, or a non-loopback bind is requested
    /// without `OVERRIDE_LOCAL_IP` set.
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let bind_ip_raw = env_override("BIND_IP", Some(cli.bind_ip)).unwrap_or_default();
        let bind_ip: IpAddr = bind_ip_raw
            .parse()
            .map_err(|err| AppError::Config(format!("invalid bind_ip '{bind_ip_raw}': {err}")))?;

        let override_set = env::var("OVERRIDE_LOCAL_IP").is_ok();
        if !is_loopback(bind_ip) && !override_set {
            return Err(AppError::Config(format!(
                "refusing to bind non-loopback address {bind_ip} without OVERRIDE_LOCAL_IP"
            )));
        }

        let port: u16 = env_override("PORT", Some(cli.port.to_string()))
            .unwrap_or_default()
            .parse()
            .map_err(|err| AppError::Config(format!("invalid port: {err}")))?;

        let token_file = env_override(
            "TOKEN_FILE",
            Some(cli.token_file.to_string_lossy().into_owned()),
        )
        .unwrap_or_default();
        let token = std::fs::read_to_string(&token_file)
            .map_err(|err| AppError::Config(format!("cannot read token file '{token_file}': {err}")))?
            .trim()
            .to_owned();
        if token.is_empty() {
            return Err(AppError::Config("token file is empty".into()));
        }

        let cookie_file = env_override(
            "COOKIE_FILE",
            cli.cookie_file.map(|p| p.to_string_lossy().into_owned()),
        );
        let cookie = match cookie_file {
            Some(path) if !path.is_empty() => Some(
                std::fs::read_to_string(&path)
                    .map_err(|err| {
                        AppError::Config(format!("cannot read cookie file '{path}': {err}"))
                    })?
                    .trim()
                    .to_owned(),
            ),
            _ => None,
        };

        // `xoxc-` tokens are browser-extracted and require the cookie on every call.
        if token.starts_with("xoxc-") && cookie.is_none() {
            return Err(AppError::Config(
                "token looks browser-extracted (xoxc-...) but no cookie file was provided".into(),
            ));
        }

        let autojoin = env_bool("AUTOJOIN", cli.autojoin);
        let no_userlist = env_bool("NO_USERLIST", cli.no_userlist);
        let no_rejoin_on_mention = env_bool("NO_REJOIN_ON_MENTION", cli.no_rejoin_on_mention);
        let debug = env_bool("DEBUG", cli.debug);

        let ignored_channels = env_list("IGNORED_CHANNELS", cli.ignored_channels);
        let silenced_yellers = env_list("SILENCED_YELLERS", cli.silenced_yellers);

        let downloads_dir = PathBuf::from(
            env_override(
                "DOWNLOADS_DIR",
                Some(cli.downloads_dir.to_string_lossy().into_owned()),
            )
            .unwrap_or_default(),
        );
        let status_file = PathBuf::from(
            env_override(
                "STATUS_FILE",
                Some(cli.status_file.to_string_lossy().into_owned()),
            )
            .unwrap_or_default(),
        );
        let control_socket = PathBuf::from(
            env_override(
                "CONTROL_SOCKET",
                Some(cli.control_socket.to_string_lossy().into_owned()),
            )
            .unwrap_or_default(),
        );

        let formatted_max_lines = env_override(
            "FORMATTED_MAX_LINES",
            Some(cli.formatted_max_lines.to_string()),
        )
        .unwrap_or_default()
        .parse()
        .map_err(|err| AppError::Config(format!("invalid formatted_max_lines: {err}")))?;

        let log_suffix = env_override("LOG_SUFFIX", Some(cli.log_suffix)).unwrap_or_default();

        Ok(Self {
            port,
            bind_ip,
            token,
            cookie,
            autojoin,
            no_userlist,
            ignored_channels,
            downloads_dir,
            formatted_max_lines,
            status_file,
            silenced_yellers,
            no_rejoin_on_mention,
            control_socket,
            debug,
            log_suffix,
        })
    }
}

fn is_loopback(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4 == Ipv4Addr::LOCALHOST || v4.octets()[0] == 127,
        IpAddr::V6(v6) => v6.is_loopback(),
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => matches!(v.as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_list(name: &str, default: Vec<String>) -> HashSet<String> {
    match env::var(name) {
        Ok(v) => v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect(),
        Err(_) => default.into_iter().collect(),
    }
}
