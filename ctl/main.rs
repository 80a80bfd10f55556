#![forbid(unsafe_code)]

//! `irslackd-ctl` — local CLI companion for `irslackd`.
//!
//! Thin client over the control socket (spec §4.8): encodes one request,
//! prints the response, exits. No logic beyond that.

use clap::{Parser, Subcommand};
use irslackd::ipc::{client, ControlRequest};

#[derive(Debug, Parser)]
#[command(name = "irslackd-ctl", about = "Local CLI for irslackd", version, long_about = None)]
struct Cli {
    /// Control socket name (must match the server's `control-socket` config).
    #[arg(long, default_value = "irslackd")]
    socket_name: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Post a message to a room or thread.
    SendMessage {
        /// IRC-visible target: a channel name or synthetic thread channel.
        target: String,
        /// Message body.
        text: String,
    },
    /// Upload a file to a room.
    SendFile {
        /// IRC-visible target.
        target: String,
        /// Path to the file to upload.
        path: String,
    },
    /// Print the bridge's resolved configuration.
    GetConfig,
}

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    let request = match args.command {
        Command::SendMessage { target, text } => ControlRequest::SendMessage { target, text },
        Command::SendFile { target, path } => ControlRequest::SendFile { target, path },
        Command::GetConfig => ControlRequest::GetConfig,
    };

    match client::send(&args.socket_name, &request).await {
        Ok(response) if response.ok => {
            match response.data {
                Some(data) => println!("{}", serde_json::to_string_pretty(&data).unwrap_or_default()),
                None => println!("OK"),
            }
        }
        Ok(response) => {
            eprintln!("Error: {}", response.error.unwrap_or_else(|| "unknown error".to_owned()));
            std::process::exit(1);
        }
        Err(err) => {
            eprintln!("Failed to reach control socket: {err}");
            eprintln!("Is irslackd running with control-socket '{}'?", args.socket_name);
            std::process::exit(1);
        }
    }
}
