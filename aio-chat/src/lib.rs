//! Multi-user TCP chat room with unique display names.
//!
//! Clients log in with a name, then either broadcast to everyone or send a
//! direct message to one named user. The wire protocol wraps each request in
//! kind-specific markers (see [`codec`]). Each module focuses on a concrete
//! responsibility:
//!
//! - [`codec`] encodes and decodes the marker-delimited messages.
//! - [`frame`] splits a byte stream into protocol units.
//! - [`registry`] maps logged-in names to live connections.
//! - [`router`] delivers direct messages and broadcasts through the registry.
//! - [`session`] runs one connection's login state machine and I/O loop.
//! - [`listener`] accepts TCP connections and spawns a session for each.
//! - [`client`] is a terminal client for the same protocol.
//! - [`cli`] and [`config`] parse and hold command-line settings.
//!
//! Integration tests drive a real listener over TCP; the end-to-end test runs
//! the compiled binary as a server and two clients.

pub mod cli;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod frame;
pub mod listener;
pub mod registry;
pub mod router;
pub mod session;
