//! Async, WebSocket-wire-compatible bidirectional messaging on top of Tokio.
//!
//! Speaks RFC 6455 on the wire (so it interoperates with any standard WebSocket peer)
//! while layering two non-standard extensions negotiated during the upgrade: logical
//! stream multiplexing over a single connection (`Webson-Max-Streams`), and
//! `permessage-deflate` compression. A [`Connection`](connection::Connection) is
//! obtained by dialing out with [`handshake::connect_async`] or taking over an
//! accepted socket with [`handshake::accept_async`]; a [`pool::Pool`] groups many
//! connections under names and roles for broadcast/group routing and client
//! auto-reconnect.

mod compression;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
mod extensions;
pub mod frame;
pub mod handshake;
pub mod message;
pub mod pool;
mod request;
mod streamid;
mod transport;
mod utils;
