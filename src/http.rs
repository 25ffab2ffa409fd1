use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use http_body_util::Full;
use hyper::{
    Method, Request, Response, StatusCode,
    body::{Bytes, Incoming},
    server::conn::http1,
    service::service_fn,
};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use crate::exporter::Exporter;

const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Binds the metrics endpoint.
pub async fn bind_metrics(addr: SocketAddr) -> anyhow::Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind metrics endpoint {addr}"))?;
    log::info!("metrics endpoint listening on http://{}/metrics", addr);
    Ok(listener)
}

/// Serves `GET /metrics` from `exporter` until accepting fails.
///
/// Each HTTP connection runs in its own task. Connection-level errors
/// are logged and do not stop the server.
pub async fn serve_metrics(listener: TcpListener, exporter: Arc<Exporter>) -> anyhow::Result<()> {
    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .context("failed to accept metrics connection")?;

        let exporter = exporter.clone();
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(move |req: Request<Incoming>| {
                let exporter = exporter.clone();
                async move { Ok::<_, Infallible>(handle_request(&req, &exporter)) }
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                log::debug!("metrics connection error from {}: {}", peer, err);
            }
        });
    }
}

fn handle_request(req: &Request<Incoming>, exporter: &Exporter) -> Response<Full<Bytes>> {
    if *req.method() != Method::GET || req.uri().path() != "/metrics" {
        return plain(StatusCode::NOT_FOUND, Bytes::from_static(b"not found\n"));
    }

    match exporter.render() {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header("content-type", CONTENT_TYPE)
            .body(Full::new(Bytes::from(body)))
            .unwrap_or_else(|err| {
                log::warn!("failed to build metrics response: {}", err);
                internal_error()
            }),
        Err(err) => {
            log::warn!("failed to render metrics: {:#}", err);
            internal_error()
        }
    }
}

fn internal_error() -> Response<Full<Bytes>> {
    plain(
        StatusCode::INTERNAL_SERVER_ERROR,
        Bytes::from_static(b"metrics unavailable\n"),
    )
}

fn plain(status: StatusCode, body: Bytes) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::Collector;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    async fn start() -> (SocketAddr, Arc<Collector>) {
        let collector = Arc::new(Collector::new(&[30]));
        let exporter = Arc::new(Exporter::new(collector.clone()).unwrap());
        let listener = bind_metrics(SocketAddr::from(([127, 0, 0, 1], 0))).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_metrics(listener, exporter));
        (addr, collector)
    }

    #[tokio::test]
    async fn metrics_path_returns_exposition_text() {
        let (addr, collector) = start().await;
        collector.process("a");

        let response = get(addr, "/metrics").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains(CONTENT_TYPE));
        assert!(response.contains("unique_users_total 1"));
        assert!(response.contains("active_users{segment_seconds=\"30\"} 0"));
    }

    #[test]
    fn internal_error_is_a_500() {
        let response = internal_error();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn other_paths_are_not_found() {
        let (addr, _) = start().await;
        let response = get(addr, "/").await;
        assert!(response.starts_with("HTTP/1.1 404"));
    }
}
