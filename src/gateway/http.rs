//! Axum surface for the gateway: POST plus OPTIONS preflight, CORS from
//! the configured origin, correlation id echoed on every response.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::Response;
use axum::routing::post;
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::config;

use super::{Gateway, RequestHeaders};

pub const GATEWAY_PATH: &str = "/api-gateway";

fn cors_layer() -> CorsLayer {
    let allow_headers = [
        header::AUTHORIZATION,
        header::CONTENT_TYPE,
        HeaderName::from_static("x-agent-key"),
        HeaderName::from_static("x-scheduler-secret"),
        HeaderName::from_static("x-signature"),
        HeaderName::from_static("x-correlation-id"),
    ];
    let layer = CorsLayer::new()
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers(allow_headers);

    let origin = config::allowed_origin();
    if origin == "*" {
        layer.allow_origin(Any)
    } else {
        match origin.parse::<HeaderValue>() {
            Ok(value) => layer.allow_origin(AllowOrigin::exact(value)),
            Err(_) => {
                log::warn!("ALLOWED_ORIGIN is not a valid header value, falling back to *");
                layer.allow_origin(Any)
            }
        }
    }
}

pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route(GATEWAY_PATH, post(handle_post).options(handle_options))
        .with_state(gateway)
        .layer(cors_layer())
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn handle_post(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_headers = RequestHeaders {
        content_type: header_string(&headers, "content-type"),
        agent_key: header_string(&headers, "x-agent-key"),
        scheduler_secret: header_string(&headers, "x-scheduler-secret"),
        provisioning_secret: header_string(&headers, "x-provisioning-secret"),
        signature: header_string(&headers, "x-signature"),
        correlation_id: header_string(&headers, "x-correlation-id"),
    };

    let outcome = gateway.handle(request_headers, &body).await;

    let mut builder = Response::builder()
        .status(StatusCode::from_u16(outcome.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR))
        .header(header::CONTENT_TYPE, "application/json");
    for (name, value) in &outcome.headers {
        builder = builder.header(name, value);
    }
    builder
        .body(Body::from(outcome.body.to_string()))
        .unwrap_or_else(|_| {
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::empty())
                .expect("static response builds")
        })
}

/// Bare OPTIONS gets 204 with headers only; CORS preflights are answered
/// by the layer.
async fn handle_options() -> StatusCode {
    StatusCode::NO_CONTENT
}
