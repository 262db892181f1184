//! Real-time chat relay over newline-delimited JSON.
//!
//! Clients register, log in, fetch recent history and send messages that are
//! fanned out to every connected peer. Each module owns one concern:
//!
//! - [`codec`] turns the inbound byte stream into frames, surviving bad UTF-8.
//! - [`protocol`] defines the request/response shapes and line encoding.
//! - [`session`] holds per-connection authentication state.
//! - [`registry`] tracks live connections and hands out snapshots.
//! - [`broadcast`] writes one encoded message to many connections.
//! - [`dispatch`] routes frames to the stores and builds replies.
//! - [`hub`] bundles the state shared by every connection task.
//! - [`connection`] drives one connection from registration to release.
//! - [`server`] runs the accept loop and graceful shutdown.
//! - [`store`] provides the credential directory and message log.
//! - [`cli`], [`config`] and [`client`] cover the binary's two modes.

pub mod broadcast;
pub mod cli;
pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod hub;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod store;
