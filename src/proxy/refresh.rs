use tokio::sync::broadcast;

/// Payload sent to connected pages when they should reload.
pub const REFRESH_SIGNAL: &str = "refresh";

/// Fan-out of refresh signals to every connected page.
///
/// Each subscriber holds a single-slot receiver, so a page that has not yet
/// consumed a pending refresh is not sent a second one.
#[derive(Debug, Clone)]
pub struct Refresher {
    sender: broadcast::Sender<()>,
}

impl Refresher {
    pub fn new() -> Self {
        let (sender, _receiver) = broadcast::channel(1);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Broadcasts a refresh to all current subscribers.
    pub fn refresh(&self) {
        match self.sender.send(()) {
            Ok(count) => tracing::info!("refreshing {count} page(s)"),
            Err(_) => tracing::debug!("refresh requested with no pages connected"),
        }
    }
}

impl Default for Refresher {
    fn default() -> Self {
        Self::new()
    }
}
