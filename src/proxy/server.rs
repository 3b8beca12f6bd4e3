use super::inject::inject_script;
use super::refresh::{REFRESH_SIGNAL, Refresher};
use crate::config::ProxyConfig;

use anyhow::{Context, anyhow};
use axum::Router;
use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{
    ACCEPT_ENCODING, ACCESS_CONTROL_ALLOW_ORIGIN, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST,
    TRANSFER_ENCODING, VIA,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Path of the server-sent event stream the reload script subscribes to.
pub const SSE_PATH: &str = "/eavesdrop_sse";

/// Attempts made to reach the application before giving up.
const RETRIES: usize = 10;

/// Constant backoff between attempts.
const BACKOFF_RETRY: Duration = Duration::from_millis(100);

/// Grace period for open connections on shutdown.
const CLOSE_DELAY: Duration = Duration::from_secs(5);

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

#[derive(Clone)]
struct ProxyState {
    app_port: u16,
    client: reqwest::Client,
    refresher: Refresher,
    shutdown: watch::Receiver<bool>,
}

/// Reverse proxy in front of the application.
///
/// HTML responses get the reload script injected and [`SSE_PATH`] streams a
/// `refresh` event to every page whenever the [`Refresher`] fires.
pub struct Proxy {
    app_port: u16,
    proxy_port: u16,
    refresher: Refresher,
}

impl Proxy {
    pub fn new(config: &ProxyConfig, refresher: Refresher) -> Self {
        Self {
            app_port: config.app_port,
            proxy_port: config.proxy_port,
            refresher,
        }
    }

    /// Binds `0.0.0.0:<proxy_port>` and serves in the background.
    pub async fn spawn(self) -> anyhow::Result<ProxyHandle> {
        let address = SocketAddr::from(([0, 0, 0, 0], self.proxy_port));
        let listener = TcpListener::bind(address)
            .await
            .with_context(|| format!("proxy error: failed to bind {address}"))?;

        self.spawn_on(listener)
    }

    /// Serves on an already bound listener in the background.
    pub fn spawn_on(self, listener: TcpListener) -> anyhow::Result<ProxyHandle> {
        let local_addr = listener.local_addr()?;
        let (shutdown, shutdown_rx) = watch::channel(false);

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("proxy error: failed to build http client")?;

        let state = ProxyState {
            app_port: self.app_port,
            client,
            refresher: self.refresher,
            shutdown: shutdown_rx.clone(),
        };

        let router = Router::new()
            .route(SSE_PATH, get(client_events))
            .fallback(forward_request)
            .with_state(state);

        let mut stop = shutdown_rx;
        let task = tokio::spawn(async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                while !*stop.borrow() {
                    if stop.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await
        });

        tracing::info!("proxy server listening on :{}", local_addr.port());

        Ok(ProxyHandle {
            local_addr,
            shutdown,
            task,
        })
    }
}

/// A running proxy.
pub struct ProxyHandle {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<std::io::Result<()>>,
}

impl ProxyHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Ends every event stream and shuts the server down, aborting it if
    /// connections are still open after the grace period.
    pub async fn close(self) -> anyhow::Result<()> {
        let _ = self.shutdown.send(true);

        let mut task = self.task;
        match tokio::time::timeout(CLOSE_DELAY, &mut task).await {
            Ok(Ok(result)) => result.context("proxy error: server failed"),
            Ok(Err(e)) => Err(anyhow!("proxy error: server task failed: {e}")),
            Err(_) => {
                task.abort();
                Err(anyhow!(
                    "proxy error: server still busy after {}s, aborted",
                    CLOSE_DELAY.as_secs()
                ))
            }
        }
    }
}

/// Streams one `refresh` event per refresh signal until the page goes away
/// or the proxy shuts down.
async fn client_events(State(state): State<ProxyState>) -> impl IntoResponse {
    let mut refreshes = state.refresher.subscribe();
    let mut shutdown = state.shutdown;
    tracing::debug!("page subscribed to refreshes");

    let stream = async_stream::stream! {
        loop {
            let signal = tokio::select! {
                signal = refreshes.recv() => signal,
                _ = shutdown.changed() => break,
            };

            match signal {
                Ok(()) => {}
                // the refresh still pending after the lag is delivered next
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }

            yield Ok::<Event, Infallible>(Event::default().data(REFRESH_SIGNAL));
        }
    };

    (
        [(ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
        Sse::new(stream).keep_alive(KeepAlive::default()),
    )
}

async fn forward_request(
    State(state): State<ProxyState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();

    let host = parts
        .headers
        .get(HOST)
        .and_then(|host| host.to_str().ok())
        .map(str::to_string)
        .or_else(|| parts.uri.authority().map(|authority| authority.to_string()))
        .unwrap_or_default();
    let via = match HeaderValue::from_str(&format!("{:?} {host}", parts.version)) {
        Ok(via) => via,
        Err(e) => return proxy_error(StatusCode::BAD_REQUEST, e),
    };

    let body = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(body) => body,
        Err(e) => return proxy_error(StatusCode::INTERNAL_SERVER_ERROR, e),
    };

    let path = parts
        .uri
        .path_and_query()
        .map(|path| path.as_str())
        .unwrap_or("/");
    let url = format!("http://127.0.0.1:{}{path}", state.app_port);

    let mut headers = parts.headers;
    headers.remove(HOST);
    // pages must come back uncompressed for the script to be injected
    headers.remove(ACCEPT_ENCODING);
    headers.insert(VIA, via.clone());
    if let Ok(remote) = HeaderValue::from_str(&remote.ip().to_string()) {
        headers.insert(X_FORWARDED_FOR, remote);
    }

    let mut attempt = 0;
    let upstream = loop {
        attempt += 1;
        let sent = state
            .client
            .request(parts.method.clone(), &url)
            .headers(headers.clone())
            .body(body.clone())
            .send()
            .await;

        match sent {
            Ok(upstream) => break upstream,
            Err(e) if attempt >= RETRIES => {
                tracing::error!("proxy error: {e}");
                return (StatusCode::BAD_GATEWAY, "proxy error: application unresponsive")
                    .into_response();
            }
            Err(e) => {
                tracing::debug!("proxy: attempt {attempt} to reach the application failed: {e}");
                tokio::time::sleep(BACKOFF_RETRY).await;
            }
        }
    };

    let status = upstream.status();
    let mut response_headers = HeaderMap::new();
    for (name, value) in upstream.headers() {
        if name == CONTENT_LENGTH || name == TRANSFER_ENCODING || name == CONNECTION {
            continue;
        }
        response_headers.append(name.clone(), value.clone());
    }
    response_headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response_headers.insert(VIA, via);

    let is_html = upstream
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|content_type| content_type.to_str().ok())
        .is_some_and(|content_type| content_type.contains("text/html"));

    let body = if is_html {
        let page = match upstream.bytes().await {
            Ok(page) => inject_script(&page),
            Err(e) => return proxy_error(StatusCode::INTERNAL_SERVER_ERROR, e),
        };
        response_headers.insert(CONTENT_LENGTH, HeaderValue::from(page.len()));
        Body::from(page)
    } else {
        if let Some(length) = upstream.headers().get(CONTENT_LENGTH) {
            response_headers.insert(CONTENT_LENGTH, length.clone());
        }
        Body::from_stream(upstream.bytes_stream())
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    response
}

fn proxy_error<E: std::fmt::Display>(status: StatusCode, error: E) -> Response {
    tracing::error!("proxy error: {error}");
    (status, format!("proxy error: {error}")).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::inject::RELOAD_SCRIPT;
    use axum::http::header::LOCATION;
    use axum::response::Html;

    const PAGE: &str = "<html><body><h1>app</h1></body></html>";

    async fn spawn_app() -> u16 {
        let app = Router::new()
            .route("/", get(|| async { Html(PAGE) }))
            .route("/plain", get(|| async { "plain text" }))
            .route(
                "/echo",
                get(|request: Request| async move {
                    let forwarded = request
                        .headers()
                        .get("x-forwarded-for")
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    format!("{} {}", request.uri(), forwarded)
                }),
            )
            .route(
                "/redirect",
                get(|| async { (StatusCode::FOUND, [(LOCATION, "/plain")]) }),
            );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move { axum::serve(listener, app).await });
        port
    }

    async fn spawn_proxy(app_port: u16, refresher: Refresher) -> ProxyHandle {
        let config = ProxyConfig {
            enabled: true,
            app_port,
            proxy_port: 0,
        };
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Proxy::new(&config, refresher).spawn_on(listener).unwrap()
    }

    fn client() -> reqwest::Client {
        reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_html_gets_reload_script() {
        let proxy = spawn_proxy(spawn_app().await, Refresher::new()).await;
        let url = format!("http://{}/", proxy.local_addr());

        let response = client().get(url).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert!(response.headers().contains_key(VIA));

        let length: usize = response.headers()[CONTENT_LENGTH].to_str().unwrap().parse().unwrap();
        let body = response.text().await.unwrap();
        assert_eq!(length, body.len());
        assert_eq!(
            body,
            format!("<html><body><h1>app</h1><script>{RELOAD_SCRIPT}</script></body></html>")
        );

        proxy.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_other_content_passes_through() {
        let proxy = spawn_proxy(spawn_app().await, Refresher::new()).await;
        let url = format!("http://{}/plain", proxy.local_addr());

        let response = client().get(url).send().await.unwrap();
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(response.text().await.unwrap(), "plain text");

        proxy.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_query_and_forwarded_for_reach_the_app() {
        let proxy = spawn_proxy(spawn_app().await, Refresher::new()).await;
        let url = format!("http://{}/echo?page=2&sort=asc", proxy.local_addr());

        let body = client().get(url).send().await.unwrap().text().await.unwrap();
        assert_eq!(body, "/echo?page=2&sort=asc 127.0.0.1");

        proxy.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_redirects_are_not_followed() {
        let proxy = spawn_proxy(spawn_app().await, Refresher::new()).await;
        let url = format!("http://{}/redirect", proxy.local_addr());

        let response = client().get(url).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[LOCATION], "/plain");

        proxy.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_app_is_bad_gateway() {
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let app_port = closed.local_addr().unwrap().port();
        drop(closed);

        let proxy = spawn_proxy(app_port, Refresher::new()).await;
        let url = format!("http://{}/", proxy.local_addr());

        let response = client().get(url).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(response.text().await.unwrap(), "proxy error: application unresponsive");

        proxy.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_event_stream_delivers_refresh() {
        let refresher = Refresher::new();
        let proxy = spawn_proxy(spawn_app().await, refresher.clone()).await;
        let url = format!("http://{}{SSE_PATH}", proxy.local_addr());

        let mut response = client().get(url).send().await.unwrap();
        assert_eq!(response.headers()[CONTENT_TYPE], "text/event-stream");
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");

        for _ in 0..50 {
            if refresher.subscriber_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        refresher.refresh();

        let mut received = String::new();
        let read = tokio::time::timeout(Duration::from_secs(2), async {
            while !received.contains("data: refresh\n\n") {
                match response.chunk().await.unwrap() {
                    Some(chunk) => received.push_str(&String::from_utf8_lossy(&chunk)),
                    None => break,
                }
            }
        })
        .await;

        assert!(read.is_ok(), "refresh event not received: {received:?}");
        assert!(received.contains("data: refresh\n\n"));

        // open event streams end on shutdown instead of holding it up
        proxy.close().await.unwrap();
    }
}
