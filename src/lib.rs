//! cmdrelay - shell command sessions streamed over HTTP
//!
//! The HTTP API and server bootstrap. Session mechanics live in
//! `cmdrelay-core`.

#![forbid(unsafe_code)]

pub mod api;
pub mod server;
