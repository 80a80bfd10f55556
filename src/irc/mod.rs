//! IRC front-end (C5): wire protocol, numerics, and the command vocabulary
//! (spec §4.5).

pub mod commands;
pub mod numeric;
pub mod proto;
pub mod server;
