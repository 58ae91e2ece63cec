//! # mllp-server
//!
//! Service wrapper around `mllp-core`: loads a TOML configuration, opens
//! the audit store and runs the listener until Ctrl-C.

pub mod config;
