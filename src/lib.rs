//! Courier - presence-aware message routing
//!
//! Routes chat messages between users connected to different instances of a
//! horizontally scaled gateway tier: a receiver persists each message and
//! fans it out to the instances currently serving the other conversation
//! members; a per-instance streamer forwards its inbound topic down to
//! attached clients.

pub mod bus;
pub mod config;
pub mod dispatch;
pub mod registry;
pub mod services;
pub mod storage;
pub mod transport;
pub mod utils;
pub mod validation;

pub mod proto {
    tonic::include_proto!("courier");
}
