#![forbid(unsafe_code)]

pub mod errors;
pub use errors::{AppError, Result};

pub mod bridge;
pub mod config;
pub mod diff;
pub mod irc;
pub mod ipc;
pub mod models;
pub mod persistence;
pub mod slack;
