use axum::{
    body::Body,
    http::{Request, Response},
};
use std::time::Duration;
use tower_http::classify::{ServerErrorsAsFailures, ServerErrorsFailureClass, SharedClassifier};
use tower_http::trace::{DefaultOnBodyChunk, DefaultOnEos, MakeSpan, TraceLayer};
use tracing::{Span, debug, error, info};

use crate::middleware::request_context::RequestContext;

type TraceLayerType = TraceLayer<
    SharedClassifier<ServerErrorsAsFailures>,
    HttpMakeSpan,
    fn(&Request<Body>, &Span),
    fn(&Response<Body>, Duration, &Span),
    DefaultOnBodyChunk,
    DefaultOnEos,
    fn(ServerErrorsFailureClass, Duration, &Span),
>;

#[derive(Clone, Debug, Default)]
pub(crate) struct HttpMakeSpan;

impl<B> MakeSpan<B> for HttpMakeSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let request_id = request
            .extensions()
            .get::<RequestContext>()
            .map_or_else(|| "n/a".to_string(), |ctx| ctx.request_id.clone());

        tracing::info_span!(
            "http_request",
            method = %request.method(),
            path = %request.uri().path(),
            request_id = %request_id,
            status_code = tracing::field::Empty
        )
    }
}

pub(crate) fn on_request_handler(req: &Request<Body>, span: &Span) {
    span.in_scope(|| {
        debug!(
            method = %req.method(),
            uri = %req.uri(),
            version = ?req.version(),
            "request received"
        );
    });
}

pub(crate) fn on_response_handler(response: &Response<Body>, latency: Duration, span: &Span) {
    let status = response.status();
    span.record("status_code", status.as_u16());
    span.in_scope(|| {
        info!(status = status.as_u16(), latency_ms = latency.as_millis(), "request completed");
    });
}

pub(crate) fn on_failure_handler(error: ServerErrorsFailureClass, latency: Duration, span: &Span) {
    span.in_scope(|| {
        error!(error = %error, latency = ?latency, "request failed");
    });
}

/// Request tracing with the request id attached to every span.
pub(crate) fn create_trace_layer() -> TraceLayerType {
    TraceLayer::new_for_http()
        .make_span_with(HttpMakeSpan)
        .on_request(on_request_handler as fn(&Request<Body>, &Span))
        .on_response(on_response_handler as fn(&Response<Body>, Duration, &Span))
        .on_failure(on_failure_handler as fn(ServerErrorsFailureClass, Duration, &Span))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Method, StatusCode};
    use tracing::Level;
    use tracing_subscriber::util::SubscriberInitExt;

    #[test]
    fn span_carries_request_id_from_context() {
        let _guard = tracing_subscriber::fmt()
            .with_max_level(Level::TRACE)
            .set_default();

        let mut request = Request::builder()
            .method(Method::GET)
            .uri("/api/replay/state?x=1")
            .body(Body::empty())
            .unwrap();
        request.extensions_mut().insert(RequestContext {
            request_id: "req-42".into(),
        });

        let span = HttpMakeSpan.make_span(&request);
        assert_eq!(span.metadata().map(|m| m.name()), Some("http_request"));
        assert!(span.field("request_id").is_some());
        assert!(span.field("status_code").is_some());
    }

    #[test]
    fn handlers_run_inside_any_span() {
        let _guard = tracing_subscriber::fmt()
            .with_max_level(Level::TRACE)
            .set_default();
        let span = tracing::info_span!("test");

        let request = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
        on_request_handler(&request, &span);

        let response = Response::builder()
            .status(StatusCode::OK)
            .body(Body::empty())
            .unwrap();
        on_response_handler(&response, Duration::from_millis(3), &span);
        on_failure_handler(
            ServerErrorsFailureClass::StatusCode(StatusCode::BAD_GATEWAY),
            Duration::from_millis(3),
            &span,
        );
    }
}
