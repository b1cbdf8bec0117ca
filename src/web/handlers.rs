use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

use crate::app::AppState;
use crate::snapshot::CaptureOutcome;
use crate::stream::ClientGuard;

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><title>mjpegd</title></head>
<body>
<h1>mjpegd</h1>
<ul>
<li><a href="/mjpg">/mjpg</a> - live MJPEG stream</li>
<li><a href="/full_res">/full_res</a> - full-resolution snapshot</li>
</ul>
<img src="/mjpg" alt="live stream" />
</body>
</html>
"#;

pub async fn index() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/html")], INDEX_HTML)
}

/// `GET /mjpg`: registers the caller as a streaming client, starts the
/// Capture Loop if this is the first client, and streams multipart parts
/// for as long as the connection stays open. The client is unregistered
/// automatically when the body stream (and its `ClientGuard`) is dropped.
pub async fn mjpg(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let was_empty = state.registry().is_empty();
    let (guard, mut rx) = ClientGuard::register(state.registry_handle());

    if was_empty {
        state.ensure_capture_loop_running();
    }

    let body_stream = async_stream::stream! {
        let _guard = guard;
        while let Some(part) = rx.recv().await {
            yield Ok::<Bytes, Infallible>(part);
        }
    };

    let mut response = Response::new(Body::from_stream(body_stream));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("multipart/x-mixed-replace;boundary=--boundary"),
    );
    headers.append(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.append(header::CACHE_CONTROL, HeaderValue::from_static("private"));
    response
}

/// `GET /full_res`: requests one full-resolution JPEG from the Snapshot
/// Rendezvous. Busy and Timeout both surface as a 500, matching the
/// synchronous original's single failure path for this endpoint.
pub async fn full_res(State(state): State<Arc<AppState>>) -> Response {
    match state.capture_full_res().await {
        CaptureOutcome::Ok(jpeg) => {
            let mut response = Response::new(Body::from(jpeg));
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("image/jpeg"),
            );
            response
        }
        CaptureOutcome::Busy => {
            (StatusCode::INTERNAL_SERVER_ERROR, "snapshot capture busy").into_response()
        }
        CaptureOutcome::Timeout => {
            (StatusCode::INTERNAL_SERVER_ERROR, "snapshot capture timed out").into_response()
        }
    }
}
