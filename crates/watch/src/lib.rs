//! `jobpulse-watch` library crate.
//!
//! Re-exports the terminal renderer for integration testing. The binary
//! entrypoint lives in `main.rs`.

pub mod render;
