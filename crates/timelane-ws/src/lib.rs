//! WebSocket transport for the timelane hub.
//!
//! Each connected client is registered with the hub as its own listener, so
//! the hub's recent-message replay reaches late joiners the same way it does
//! any other listener. Frames are JSON text:
//! `{"event":"timeline_event",...}` and `{"event":"state_change",...}`.

mod listener;
mod server;

pub use listener::{FRAME_QUEUE_LIMIT, WsListener};
pub use server::WsServer;
