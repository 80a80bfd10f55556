//! Diff utilities: word-level edit rendering for IRC (spec §4.3).

pub mod edit;
