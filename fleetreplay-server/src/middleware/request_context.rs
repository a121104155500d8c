use std::str::FromStr;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use shared::config::Config;
use uuid::Uuid;

/// Per-request data shared with handlers and the trace span.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    pub request_id: String,
}

#[derive(Clone, Debug)]
pub struct RequestIdState {
    header: HeaderName,
}

impl RequestIdState {
    pub fn from_config(config: &Config) -> Self {
        let header = HeaderName::from_str(&config.server.request_id_header)
            .unwrap_or_else(|_| HeaderName::from_static("x-request-id"));
        Self { header }
    }
}

/// Reuses the caller's request id when it is usable, otherwise mints one,
/// and echoes it on the response.
pub async fn assign_request_id(
    State(state): State<RequestIdState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let (request_id, value) = extract_request_id(request.headers(), &state.header)
        .unwrap_or_else(|| {
            let id = Uuid::new_v4().to_string();
            let value = HeaderValue::from_str(&id).unwrap_or(HeaderValue::from_static("invalid"));
            (id, value)
        });

    request.extensions_mut().insert(RequestContext {
        request_id: request_id.clone(),
    });
    request.headers_mut().insert(state.header.clone(), value.clone());

    let mut response = next.run(request).await;
    response.headers_mut().insert(state.header, value);
    response
}

fn extract_request_id(headers: &HeaderMap, header: &HeaderName) -> Option<(String, HeaderValue)> {
    let id = headers
        .get(header)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())?;
    let value = HeaderValue::from_str(id).ok()?;
    Some((id.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Extension, Router, routing::get};
    use tower::ServiceExt;

    fn app() -> Router {
        let state = RequestIdState::from_config(&Config::with_defaults());
        Router::new()
            .route(
                "/",
                get(|Extension(ctx): Extension<RequestContext>| async move { ctx.request_id }),
            )
            .layer(axum::middleware::from_fn_with_state(state, assign_request_id))
    }

    #[tokio::test]
    async fn echoes_incoming_request_id() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header("x-request-id", " abc-123 ")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers()["x-request-id"], "abc-123");
        let body = axum::body::to_bytes(response.into_body(), 64).await.unwrap();
        assert_eq!(&body[..], b"abc-123");
    }

    #[tokio::test]
    async fn generates_an_id_when_missing() {
        let response = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let id = response.headers()["x-request-id"].to_str().unwrap();
        assert!(Uuid::parse_str(id).is_ok());
    }

    #[test]
    fn invalid_header_name_falls_back_to_default() {
        let mut config = Config::with_defaults();
        config.server.request_id_header = "bad header".into();
        assert_eq!(RequestIdState::from_config(&config).header, "x-request-id");
    }
}
