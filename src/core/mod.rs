pub mod debounce;
pub mod excluder;
pub mod manager;
pub mod paths;
pub mod shell;
pub mod watcher;

pub use debounce::Debouncer;
pub use excluder::Excluder;
pub use manager::{ControlMessage, EventManager};
pub use shell::Shell;
pub use watcher::Watcher;
