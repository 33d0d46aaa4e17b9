//! HTTP listener loop
//!
//! Accepts connections until shutdown is requested and serves each one on its
//! own task through the request gate. A failing connection is logged and never
//! stops the loop. On shutdown the listening socket is closed, open
//! connections finish their in-flight request, and the loop joins them.

use crate::context::stopped;
use crate::gate::{GateOutcome, RequestGate};
use axum::Router;
use axum::extract::State;
use axum::http::header::{CONTENT_TYPE, HeaderName};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use hyper::server::conn::http1;
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::service::TowerToHyperService;
use session_host_agent::OrchestrationAgent;
use session_host_core::keys::TOKEN_HEADER;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Per-connection limits
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Time allowed for a client to send complete request headers
    pub header_read_timeout: Duration,
    /// Pause after a failed accept before trying again
    pub accept_backoff: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            header_read_timeout: Duration::from_secs(30),
            accept_backoff: Duration::from_millis(50),
        }
    }
}

/// Router sending every path and method through the gate
pub fn router<A: OrchestrationAgent>(gate: Arc<RequestGate<A>>) -> Router {
    Router::new().fallback(serve_config::<A>).with_state(gate)
}

async fn serve_config<A: OrchestrationAgent>(
    State(gate): State<Arc<RequestGate<A>>>,
    headers: HeaderMap,
) -> Response {
    debug!("HTTP:Received {:?}", headers);

    let raw = headers.get(TOKEN_HEADER);
    // Non-UTF-8 tokens cannot match the roster
    let token = raw.and_then(|value| value.to_str().ok());

    match gate.evaluate(token) {
        GateOutcome::Admitted { snapshot, .. } => match snapshot.to_json() {
            Ok(body) => ([(CONTENT_TYPE, "application/json")], body).into_response(),
            Err(e) => {
                error!("Failed to render config snapshot: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        },
        GateOutcome::Rejected => {
            let echo = raw.cloned().unwrap_or_else(|| HeaderValue::from_static(""));
            (
                StatusCode::FORBIDDEN,
                [(HeaderName::from_static(TOKEN_HEADER), echo)],
            )
                .into_response()
        }
    }
}

/// Run the accept loop until `shutdown` flips to true
pub async fn serve<A: OrchestrationAgent>(
    listener: TcpListener,
    gate: Arc<RequestGate<A>>,
    config: ListenerConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let app = router(gate);
    let mut connections = JoinSet::new();

    match listener.local_addr() {
        Ok(addr) => info!("HTTP listener accepting on {}", addr),
        Err(e) => warn!("HTTP listener started, local address unknown: {}", e),
    }

    loop {
        tokio::select! {
            _ = stopped(&mut shutdown) => {
                info!("Listener shutting down, no longer accepting connections");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("Accepted connection from {}", peer);
                    let service = TowerToHyperService::new(app.clone());
                    let mut stop = shutdown.clone();
                    let header_read_timeout = config.header_read_timeout;

                    connections.spawn(async move {
                        let mut builder = http1::Builder::new();
                        builder
                            .timer(TokioTimer::new())
                            .header_read_timeout(header_read_timeout);
                        let conn = builder.serve_connection(TokioIo::new(stream), service);
                        tokio::pin!(conn);

                        let result = tokio::select! {
                            res = conn.as_mut() => res,
                            _ = stopped(&mut stop) => {
                                conn.as_mut().graceful_shutdown();
                                conn.await
                            }
                        };
                        if let Err(e) = result {
                            warn!("Connection from {} failed: {}", peer, e);
                        }
                    });
                }
                Err(e) => {
                    if *shutdown.borrow() {
                        info!("Accept interrupted by shutdown: {}", e);
                        break;
                    }
                    warn!("Accept failed: {}", e);
                    tokio::time::sleep(config.accept_backoff).await;
                }
            },
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = joined {
                    error!("Connection task failed: {}", e);
                }
            }
        }
    }

    // Closing the socket makes later connection attempts fail at the transport
    drop(listener);

    if !connections.is_empty() {
        info!("Waiting for {} open connections", connections.len());
    }
    while let Some(joined) = connections.join_next().await {
        if let Err(e) = joined {
            error!("Connection task failed: {}", e);
        }
    }
    info!("HTTP listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HostContext;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use session_host_agent::{LocalAgent, LocalAgentConfig};
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tower::ServiceExt;

    async fn gate(authorized: &[&str]) -> Arc<RequestGate<LocalAgent>> {
        let agent = Arc::new(LocalAgent::with_config(LocalAgentConfig::default()));
        agent.start().await.unwrap();
        let context = Arc::new(HostContext::default());
        context.set_authorized(authorized.iter().map(|s| s.to_string()).collect());
        Arc::new(RequestGate::new(context, agent))
    }

    fn request(token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/");
        if let Some(token) = token {
            builder = builder.header(TOKEN_HEADER, token);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_router_scenario() {
        let app = router(gate(&["p1", "p2"]).await);

        let response = app.clone().oneshot(request(Some("p1"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(body_json(response).await["ConnectedPlayers"], "p1");

        let response = app.clone().oneshot(request(Some("p3"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.headers()[TOKEN_HEADER], "p3");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(body.is_empty());

        let response = app.oneshot(request(Some("p2"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["ConnectedPlayers"], "p1, p2");
        assert_eq!(json["InitialPlayers"], "p1, p2");
        assert_eq!(json["isActivated"], "false");
    }

    #[tokio::test]
    async fn test_missing_token_echoes_empty_header() {
        let app = router(gate(&["p1"]).await);
        let response = app.oneshot(request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.headers()[TOKEN_HEADER], "");
    }

    #[tokio::test]
    async fn test_any_path_and_method_is_gated() {
        let app = router(gate(&["p1"]).await);
        let request = Request::builder()
            .method("POST")
            .uri("/status/anything")
            .header(TOKEN_HEADER, "p1")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    async fn raw_get(addr: SocketAddr, token: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET / HTTP/1.1\r\nHost: localhost\r\ntoken: {}\r\nConnection: close\r\n\r\n",
            token
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_serve_over_socket_until_shutdown() {
        let gate = gate(&["p1"]).await;
        let context = gate.context().clone();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(serve(
            listener,
            gate,
            ListenerConfig::default(),
            context.shutdown_signal(),
        ));

        let ok = raw_get(addr, "p1").await;
        assert!(ok.starts_with("HTTP/1.1 200"), "{ok}");
        assert!(ok.contains(r#""ConnectedPlayers":"p1""#));

        let denied = raw_get(addr, "intruder").await;
        assert!(denied.starts_with("HTTP/1.1 403"), "{denied}");
        assert!(denied.contains("token: intruder"));

        context.request_shutdown();
        task.await.unwrap();

        assert!(TcpStream::connect(addr).await.is_err());
        assert_eq!(context.request_count(), 1);
    }

    #[tokio::test]
    async fn test_non_utf8_token_is_rejected_and_echoed() {
        let gate = gate(&["p1"]).await;
        let context = gate.context().clone();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(serve(
            listener,
            gate,
            ListenerConfig::default(),
            context.shutdown_signal(),
        ));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\ntoken: p\xff1\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();

        assert!(response.starts_with(b"HTTP/1.1 403"));
        assert!(response.windows(10).any(|w| w == b"token: p\xff1"));
        assert_eq!(context.request_count(), 0);
        assert!(context.roster().connected.is_empty());

        context.request_shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_slow_header_connection_is_closed() {
        let gate = gate(&["p1"]).await;
        let context = gate.context().clone();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = ListenerConfig {
            header_read_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let task = tokio::spawn(serve(listener, gate, config, context.shutdown_signal()));

        // Request line only, the headers never arrive
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();

        let mut response = Vec::new();
        let closed =
            tokio::time::timeout(Duration::from_secs(3), stream.read_to_end(&mut response)).await;
        assert!(closed.is_ok(), "connection still open after header timeout");
        assert!(!response.starts_with(b"HTTP/1.1 200"));
        assert_eq!(context.request_count(), 0);

        context.request_shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_open_connection_drains_on_shutdown() {
        let gate = gate(&["p1"]).await;
        let context = gate.context().clone();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(serve(
            listener,
            gate,
            ListenerConfig::default(),
            context.shutdown_signal(),
        ));

        // Keep-alive request: the server holds the connection open afterwards
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\ntoken: p1\r\n\r\n")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        context.request_shutdown();

        // The answered request is delivered, then the server closes the connection
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");

        task.await.unwrap();
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
