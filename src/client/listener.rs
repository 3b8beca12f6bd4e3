use super::host::PageHost;
use crate::proxy::{REFRESH_SIGNAL, SSE_PATH};

use anyhow::Context;
use eventsource_client::{self as es, Client};
use futures::StreamExt;

/// Event type of unnamed server-sent events.
const MESSAGE_EVENT: &str = "message";

/// Dispatches reload stream events to a [`PageHost`].
pub struct ReloadListener<H: PageHost> {
    host: H,
}

impl<H: PageHost> ReloadListener<H> {
    pub fn new(host: H) -> Self {
        Self { host }
    }

    /// Reloads the host when `data` is exactly `refresh`; anything else is
    /// ignored. Returns whether a reload happened.
    pub async fn handle_message(&mut self, data: &str) -> bool {
        if data != REFRESH_SIGNAL {
            return false;
        }

        self.host.reload().await;
        true
    }

    pub fn handle_error(&mut self, err: &str) {
        self.host.log_error(err);
    }

    /// Subscribes to `<url>/eavesdrop_sse` and dispatches events until the
    /// stream ends. Reconnection is left to the event source client.
    pub async fn listen(&mut self, url: &str) -> anyhow::Result<()> {
        let endpoint = format!("{}{SSE_PATH}", url.trim_end_matches('/'));
        let client = es::ClientBuilder::for_url(&endpoint)
            .with_context(|| format!("invalid reload url '{endpoint}'"))?
            .build();

        tracing::info!("listening for reloads on {endpoint}");
        let mut stream = client.stream();

        while let Some(event) = stream.next().await {
            match event {
                // named events never reach a page's `onmessage`
                Ok(es::SSE::Event(event)) if event.event_type != MESSAGE_EVENT => {
                    tracing::debug!("ignoring '{}' event", event.event_type);
                }
                Ok(es::SSE::Event(event)) => {
                    let data = event.data.strip_suffix('\n').unwrap_or(&event.data);
                    self.handle_message(data).await;
                }
                // keep-alive comments and connection notices
                Ok(_) => {}
                Err(e) => self.handle_error(&e.to_string()),
            }
        }

        tracing::debug!("reload stream ended");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyConfig;
    use crate::proxy::{Proxy, Refresher};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct RecordingHost {
        reloads: Arc<AtomicUsize>,
        errors: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl PageHost for RecordingHost {
        async fn reload(&mut self) {
            self.reloads.fetch_add(1, Ordering::SeqCst);
        }

        fn log_error(&mut self, err: &str) {
            self.errors.lock().unwrap().push(err.to_string());
        }
    }

    #[tokio::test]
    async fn test_refresh_reloads_exactly_once() {
        let host = RecordingHost::default();
        let mut listener = ReloadListener::new(host.clone());

        assert!(listener.handle_message("refresh").await);
        assert_eq!(host.reloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_other_messages_are_ignored() {
        let host = RecordingHost::default();
        let mut listener = ReloadListener::new(host.clone());

        for data in ["", "Refresh", "refresh ", "reload", "{\"refresh\":true}"] {
            assert!(!listener.handle_message(data).await);
        }
        assert_eq!(host.reloads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_errors_reach_the_host() {
        let host = RecordingHost::default();
        let mut listener = ReloadListener::new(host.clone());

        listener.handle_error("connection reset");
        assert_eq!(*host.errors.lock().unwrap(), vec!["connection reset".to_string()]);
        assert_eq!(host.reloads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_listen_reloads_on_proxy_refresh() {
        let refresher = Refresher::new();
        let tcp = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy = Proxy::new(&ProxyConfig::default(), refresher.clone())
            .spawn_on(tcp)
            .unwrap();
        let url = format!("http://{}", proxy.local_addr());

        let host = RecordingHost::default();
        let mut listener = ReloadListener::new(host.clone());
        let listening = tokio::spawn(async move { listener.listen(&url).await });

        let subscribed = tokio::time::timeout(Duration::from_secs(5), async {
            while refresher.subscriber_count() == 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(subscribed.is_ok(), "listener never subscribed");

        refresher.refresh();

        let reloaded = tokio::time::timeout(Duration::from_secs(5), async {
            while host.reloads.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(reloaded.is_ok(), "no reload after refresh");
        assert_eq!(host.reloads.load(Ordering::SeqCst), 1);

        listening.abort();
        proxy.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_listen_ignores_named_events() {
        use axum::response::sse::{Event, Sse};
        use std::convert::Infallible;

        let app = axum::Router::new().route(
            SSE_PATH,
            axum::routing::get(|| async {
                let events = futures::stream::iter([
                    Ok::<_, Infallible>(Event::default().event("ping").data("refresh")),
                    Ok(Event::default().data("refresh")),
                ])
                .chain(futures::stream::pending());
                Sse::new(events)
            }),
        );
        let tcp = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", tcp.local_addr().unwrap());
        tokio::spawn(async move { axum::serve(tcp, app).await });

        let host = RecordingHost::default();
        let mut listener = ReloadListener::new(host.clone());
        let listening = tokio::spawn(async move { listener.listen(&url).await });

        // the unnamed refresh comes after the named one
        let reloaded = tokio::time::timeout(Duration::from_secs(5), async {
            while host.reloads.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(reloaded.is_ok(), "no reload for the unnamed refresh");

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(host.reloads.load(Ordering::SeqCst), 1);

        listening.abort();
    }

    #[tokio::test]
    async fn test_listen_reports_transport_errors() {
        let closed = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", closed.local_addr().unwrap());
        drop(closed);

        let host = RecordingHost::default();
        let mut listener = ReloadListener::new(host.clone());
        let listening = tokio::spawn(async move { listener.listen(&url).await });

        let reported = tokio::time::timeout(Duration::from_secs(5), async {
            while host.errors.lock().unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(reported.is_ok(), "connection failure never reached the host");
        assert_eq!(host.reloads.load(Ordering::SeqCst), 0);

        listening.abort();
    }

    #[tokio::test]
    async fn test_listen_rejects_invalid_url() {
        let mut listener = ReloadListener::new(RecordingHost::default());
        assert!(listener.listen("not a url").await.is_err());
    }
}
