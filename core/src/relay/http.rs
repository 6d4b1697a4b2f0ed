//! HTTP listener — node list endpoint and WebSocket upgrades on one port
//!
//! `GET /discover` (first path segment, any case) answers the node list as
//! plain text. Any request asking for a WebSocket upgrade becomes a link.
//! Everything else is a 404.

use super::server::RelayServer;
use crate::transport::link;
use hyper::header::{self, HeaderValue};
use hyper::server::conn::Http;
use hyper::service::service_fn;
use hyper::{Body, Method, Request, Response, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;

pub(crate) async fn serve_connection(relay: RelayServer, stream: TcpStream, peer: SocketAddr) {
    let service = service_fn(move |req| {
        let relay = relay.clone();
        async move { Ok::<_, Infallible>(handle_request(relay, req, peer)) }
    });

    if let Err(e) = Http::new()
        .serve_connection(stream, service)
        .with_upgrades()
        .await
    {
        tracing::debug!("Connection from {} ended: {}", peer, e);
    }
}

fn handle_request(relay: RelayServer, req: Request<Body>, peer: SocketAddr) -> Response<Body> {
    if is_websocket_upgrade(&req) {
        return upgrade(relay, req, peer);
    }

    if req.method() == Method::GET && is_discover_path(req.uri().path()) {
        let mut response = Response::new(Body::from(relay.nodes().encode()));
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        return response;
    }

    status(StatusCode::NOT_FOUND)
}

fn is_discover_path(path: &str) -> bool {
    path.trim_start_matches('/')
        .split('/')
        .next()
        .map_or(false, |segment| segment.eq_ignore_ascii_case("discover"))
}

fn is_websocket_upgrade(req: &Request<Body>) -> bool {
    req.headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |v| v.eq_ignore_ascii_case("websocket"))
}

fn upgrade(relay: RelayServer, mut req: Request<Body>, peer: SocketAddr) -> Response<Body> {
    let accept = match req
        .headers()
        .get(header::SEC_WEBSOCKET_KEY)
        .map(|key| derive_accept_key(key.as_bytes()))
        .and_then(|accept| HeaderValue::from_str(&accept).ok())
    {
        Some(accept) => accept,
        None => return status(StatusCode::BAD_REQUEST),
    };

    let on_upgrade = hyper::upgrade::on(&mut req);
    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => {
                let stream = WebSocketStream::from_raw_socket(upgraded, Role::Server, None).await;
                let (link, events) = link::spawn(stream);
                tracing::debug!("{} opened by {}", link.id(), peer);
                relay.accept_link(link, events, peer).await;
            }
            Err(e) => tracing::debug!("WebSocket upgrade from {} failed: {}", peer, e),
        }
    });

    let mut response = status(StatusCode::SWITCHING_PROTOCOLS);
    let headers = response.headers_mut();
    headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(header::SEC_WEBSOCKET_ACCEPT, accept);
    response
}

fn status(code: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = code;
    response
}
