//! Bridge (C6 + thread materialisation): the lifecycle state machine that
//! owns the IRC listener, the Slack session, and the thread registry for one
//! attached client at a time (spec §3, §4.6).

pub mod core;
pub mod threads;

pub use core::{Bridge, BridgeState};
