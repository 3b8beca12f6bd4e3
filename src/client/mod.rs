//! Reload client
//!
//! The Rust side of the page reload contract: subscribes to the proxy's
//! event stream and reloads its host whenever a `refresh` arrives.

pub mod host;
pub mod listener;

pub use host::{CommandHost, LogHost, PageHost};
pub use listener::ReloadListener;
