//! Three-channel WebSocket transport
//!
//! Control (request/response), binary (framed payloads), and event
//! (server push) run on three TCP ports, one upgrade path each.

mod server;

pub use server::{BinaryInHandler, TransportOptions, TransportServer};
