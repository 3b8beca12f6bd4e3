//! Browser reload proxy
//!
//! Sits in front of the application, injects the reload script into HTML
//! pages and pushes `refresh` events to them over server-sent events.

pub mod inject;
pub mod refresh;
pub mod server;

pub use inject::{RELOAD_SCRIPT, inject_script};
pub use refresh::{REFRESH_SIGNAL, Refresher};
pub use server::{Proxy, ProxyHandle, SSE_PATH};
