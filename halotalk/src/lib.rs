//! Real-time presence and chat broadcast server.
//!
//! Participants connect over a WebSocket, announce a display name with a
//! `join` event, and from then on every chat message, typing indicator and
//! departure is fanned out to the other connected participants. Membership
//! lives only as long as the connection does.
//!
//! - [`registry`] maps live connection ids to display names.
//! - [`hub`] owns the registry and the broadcast channel, and implements the
//!   join/message/typing/leave handlers.
//! - [`session`] is the per-connection `Connected -> Joined -> Disconnected`
//!   state machine.
//! - [`message`] defines the JSON event frames and their normalization rules.
//! - [`connection`] pumps one WebSocket between the client and the hub.
//! - [`server`] serves the static entry page and `/ws` on a single port.
//! - [`cli`] parses the command line for server and client modes.
//! - [`client`] is a terminal participant used for manual testing.

pub mod cli;
pub mod client;
pub mod connection;
pub mod hub;
pub mod message;
pub mod registry;
pub mod server;
pub mod session;
