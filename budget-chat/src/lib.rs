//! Line-oriented chat relay ("budgetchat") over TCP.
//!
//! Clients connect, pick a unique name and every line they send afterwards is
//! relayed to everyone else in the room. Each module owns one concern:
//!
//! - [`room`] is the shared registry of members. Joins, leaves and chat lines
//!   are serialized behind one lock and fanned out into bounded per-member
//!   queues; a member that cannot keep up is disconnected.
//! - [`session`] runs one connection through `AwaitingName -> Active ->
//!   Terminated`, with a writer task per member draining its queue.
//! - [`server`] accepts TCP connections and spawns a session for each.
//! - [`transport`] reads and writes newline-terminated text.
//! - [`message`] renders the lines the server sends.
//! - [`cli`] and [`client`] make up the command-line binary.

pub mod cli;
pub mod client;
pub mod message;
pub mod room;
pub mod server;
pub mod session;
pub mod transport;
