#![forbid(unsafe_code)]

//! Wine prefix management for Roblox Player and Studio
//!
//! Prefixes are described by a versioned settings document, resolved by product hint,
//! prepared with recipes and used to launch the products under a process supervisor.

pub mod config;
pub mod constants;
pub mod environment;
pub mod errors;
pub mod hardware;
pub mod launch_uri;
pub mod launcher;
pub mod main_loop;
pub mod net;
pub mod process;
pub mod products;
pub mod recipes;
pub mod resolve;
pub mod tasks;
pub mod wine;
