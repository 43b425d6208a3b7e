//! Marksync: real-time bookmark synchronization core.
//!
//! Keeps a signed-in user's bookmark list consistent across every open client
//! by re-reading the collection whenever a local write lands or the push
//! channel announces a remote one. This library crate exposes all modules for
//! use by the binaries and integration tests.

pub mod app;
pub mod database;
pub mod logging;
pub mod managers;
pub mod platform;
pub mod rpc_handler;
pub mod services;
pub mod types;
