//! Live progress for connected clients.
//!
//! The [`Broadcaster`] polls the progress store and pushes a snapshot to
//! every WebSocket client whenever it changes. The server module mounts it
//! next to the JSON status and validation routes.

pub mod hub;
pub mod protocol;
pub mod server;

pub use hub::{Broadcaster, ClientId};
pub use protocol::{ClientMessage, ServerMessage, ServerPayload};
pub use server::{router, serve, AppState};
