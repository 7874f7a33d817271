//! Rogue - intercepting proxy core
//!
//! Root CA lifecycle, request/response recording hooks for a MITM proxy
//! engine, append-only session documents and Markdown session reports.

pub mod app;
pub mod error;
pub mod proxy;
pub mod reporting;
pub mod session;

pub use error::{ConfigError, Result, RogueError, UserHint};
