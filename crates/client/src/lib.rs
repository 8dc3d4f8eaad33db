//! Job-progress synchronization client.
//!
//! Tracks a long-running server-side job over two transports: a
//! WebSocket push channel (best-effort accelerant) and an HTTP status
//! poll (reliability floor). [`tracker::ProgressTracker`] is the facade
//! rendering layers use; everything else is plumbing behind it.

pub mod api;
pub mod callbacks;
pub mod client;
pub mod config;
pub mod events;
pub mod messages;
pub mod reconnect;
pub mod reporter;
pub mod retry;
pub mod tracker;
pub mod transport;
