use std::net::SocketAddr;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use fi_prometheus::encode_text;
use prometheus::Registry;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::error::ExporterError;

const INDEX: &str = "<html>
<head><title>Slurm Exporter</title></head>
<body>
<h1>Slurm Exporter</h1>
<p><a href=\"/metrics\">Metrics</a></p>
</body>
</html>
";

pub fn router(registry: Registry) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/metrics", get(metrics))
        .with_state(registry)
        .layer(TraceLayer::new_for_http())
}

async fn index() -> Html<&'static str> {
    Html(INDEX)
}

async fn metrics(State(registry): State<Registry>) -> Response {
    // every scrape runs the scheduler commands, off the async workers
    match tokio::task::spawn_blocking(move || encode_text(&registry)).await {
        Ok(Ok(body)) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Ok(Err(error)) => {
            tracing::error!(%error, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Err(error) => {
            tracing::error!(%error, "metrics task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "failed to listen for shutdown signal");
    }
    tracing::info!("shutting down");
}

pub async fn serve(listen: SocketAddr, registry: Registry) -> Result<(), ExporterError> {
    let listener = TcpListener::bind(listen)
        .await
        .map_err(|source| ExporterError::Bind {
            addr: listen,
            source,
        })?;
    tracing::info!(addr = %listen, "listening");

    axum::serve(listener, router(registry))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(ExporterError::Serve)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use fi_prometheus::build_registry;
    use fi_slurm::source::StaticSource;
    use fi_slurm::{Domain, DomainCollector};
    use tower::ServiceExt;

    fn registry() -> Registry {
        let collector = DomainCollector::new(
            Domain::FairShare,
            StaticSource::new("teamA|0.42|cpu=100,mem=2048\n"),
        );
        build_registry(vec![Box::new(collector)]).unwrap().0
    }

    async fn get_body(uri: &str) -> (StatusCode, String) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = router(registry()).oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let (status, body) = get_body("/metrics").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("slurm_account_effectv_usage{account=\"teamA\"} 0.42"));
        assert!(body.contains("slurm_exporter_poll_errors_total{collector=\"fairshare\"}"));
    }

    #[tokio::test]
    async fn test_index_links_metrics() {
        let (status, body) = get_body("/").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("href=\"/metrics\""));
    }

    #[tokio::test]
    async fn test_unknown_path() {
        let (status, _) = get_body("/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
