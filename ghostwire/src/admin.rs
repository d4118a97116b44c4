//! The observability endpoint: `/metrics` and `/healthz`.

use futures::future;
use hyper::{Body, Method, Request, Response, StatusCode};
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::{metrics::Metrics, readiness::Readiness};

const OPENMETRICS_CONTENT_TYPE: &str =
    "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Serves the admin endpoint until the shutdown receiver fires.
pub async fn serve(
    addr: SocketAddr,
    metrics: Arc<Metrics>,
    readiness: Arc<Readiness>,
    shutdown: oneshot::Receiver<()>,
) -> Result<(), hyper::Error> {
    let server = hyper::server::Server::try_bind(&addr)?.serve(hyper::service::make_service_fn(
        move |_conn| {
            let metrics = metrics.clone();
            let readiness = readiness.clone();
            future::ok::<_, hyper::Error>(hyper::service::service_fn(
                move |req: Request<Body>| {
                    future::ok::<_, hyper::Error>(handle(&metrics, &readiness, &req))
                },
            ))
        },
    ));

    let addr = server.local_addr();
    info!(%addr, "http admin server listening");
    server
        .with_graceful_shutdown(async move {
            let _ = shutdown.await;
        })
        .await
}

fn handle(metrics: &Metrics, readiness: &Readiness, req: &Request<Body>) -> Response<Body> {
    match *req.method() {
        Method::GET | Method::HEAD => match req.uri().path() {
            "/metrics" => handle_metrics(metrics),
            "/healthz" => handle_healthz(readiness),
            _ => status_response(StatusCode::NOT_FOUND),
        },
        _ => status_response(StatusCode::METHOD_NOT_ALLOWED),
    }
}

fn handle_metrics(metrics: &Metrics) -> Response<Body> {
    match metrics.encode() {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header(hyper::header::CONTENT_TYPE, OPENMETRICS_CONTENT_TYPE)
            .body(body.into())
            .unwrap(),
        Err(error) => {
            warn!(%error, "failed to encode metrics");
            status_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn handle_healthz(readiness: &Readiness) -> Response<Body> {
    let (chain_verified, labels_read) = readiness.snapshot();
    if chain_verified && labels_read {
        return Response::builder()
            .status(StatusCode::OK)
            .header(hyper::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body("OK\n".into())
            .unwrap();
    }

    warn!(chain_verified, labels_read, "health check not yet passing");
    Response::builder()
        .status(StatusCode::SERVICE_UNAVAILABLE)
        .header(hyper::header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body("Service Unavailable\n".into())
        .unwrap()
}

fn status_response(status: StatusCode) -> Response<Body> {
    Response::builder().status(status).body(Body::default()).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ErrorKind;

    fn request(method: Method, path: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(path)
            .body(Body::default())
            .unwrap()
    }

    async fn body_text(response: Response<Body>) -> String {
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn healthz_reports_unavailable_until_both_flags_set() {
        let metrics = Metrics::new();
        let readiness = Readiness::new();

        let response = handle(&metrics, &readiness, &request(Method::GET, "/healthz"));
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_text(response).await, "Service Unavailable\n");

        readiness.set_chain_verified();
        let response = handle(&metrics, &readiness, &request(Method::GET, "/healthz"));
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        readiness.set_labels_read();
        let response = handle(&metrics, &readiness, &request(Method::GET, "/healthz"));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "OK\n");
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_exposition() {
        let metrics = Metrics::new();
        metrics.incr_error(ErrorKind::ChainVerify);
        let readiness = Readiness::new();

        let response = handle(&metrics, &readiness, &request(Method::GET, "/metrics"));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(hyper::header::CONTENT_TYPE)
                .unwrap()
                .to_str()
                .unwrap(),
            OPENMETRICS_CONTENT_TYPE
        );
        let text = body_text(response).await;
        assert!(
            text.contains("ghostwire_errors_total{kind=\"chain_verify\"} 1"),
            "{text}"
        );
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let metrics = Metrics::new();
        let readiness = Readiness::new();
        let response = handle(&metrics, &readiness, &request(Method::GET, "/nope"));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn non_get_is_rejected() {
        let metrics = Metrics::new();
        let readiness = Readiness::new();
        let response = handle(&metrics, &readiness, &request(Method::POST, "/healthz"));
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
