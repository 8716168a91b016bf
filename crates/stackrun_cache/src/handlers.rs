//! Registry protocol handlers.

use std::time::Duration;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::provider::{EntryState, ProviderKey};
use crate::server::CacheState;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl ToString) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

#[derive(Debug, Default, Deserialize)]
pub struct DownloadQuery {
    /// Seconds to hold the request open while the artifact is fetched
    pub download_wait: Option<u64>,
}

/// GET /.well-known/terraform.json
pub async fn discovery() -> Json<Value> {
    Json(json!({ "providers.v1": "/v1/providers" }))
}

/// GET /v1/providers/{registry}/{namespace}/{name}/versions
pub async fn versions(
    State(state): State<CacheState>,
    Path((registry, namespace, name)): Path<(String, String, String)>,
) -> Response {
    match state.service.versions(&registry, &namespace, &name).await {
        Ok(doc) => Json(doc).into_response(),
        Err(e) => {
            warn!(registry = %registry, provider = %format!("{}/{}", namespace, name), error = %e, "Versions lookup failed");
            error_response(StatusCode::BAD_GATEWAY, e)
        }
    }
}

/// GET /v1/providers/{registry}/{namespace}/{name}/{version}/download/{os}/{arch}
///
/// 423 while the archive is being cached, 200 with the upstream metadata
/// and a local `download_url` once it is ready.
pub async fn download(
    State(state): State<CacheState>,
    Path((registry, namespace, name, version, os, arch)): Path<(
        String,
        String,
        String,
        String,
        String,
        String,
    )>,
    Query(query): Query<DownloadQuery>,
) -> Response {
    let key = match ProviderKey::new(registry, namespace, name, version, os, arch) {
        Ok(key) => key,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };

    let mut rx = state.service.request_artifact(&key);
    let wait = query
        .download_wait
        .map(Duration::from_secs)
        .or(state.download_wait);
    if let Some(wait) = wait {
        // A client disconnect drops this future; the fetch keeps running.
        let _ = tokio::time::timeout(wait, rx.wait_for(|s| s.is_terminal())).await;
    }

    let current = rx.borrow().clone();
    match current {
        EntryState::Ready(artifact) => {
            let mut body = artifact.info.extra.clone();
            body.insert("os".into(), Value::String(key.os.clone()));
            body.insert("arch".into(), Value::String(key.arch.clone()));
            body.insert("filename".into(), Value::String(artifact.info.filename.clone()));
            body.insert("shasum".into(), Value::String(artifact.info.shasum.clone()));
            body.insert(
                "download_url".into(),
                Value::String(format!(
                    "{}/downloads/{}/{}",
                    state.base_url,
                    key.prefix(),
                    artifact.info.filename
                )),
            );
            Json(Value::Object(body)).into_response()
        }
        EntryState::Failed(message) => error_response(StatusCode::BAD_GATEWAY, message),
        _ => {
            debug!(provider = %key, "Provider not cached yet");
            error_response(
                StatusCode::LOCKED,
                format!("{} is being cached, retry shortly", key),
            )
        }
    }
}

/// GET /downloads/{registry}/{namespace}/{name}/{version}/{platform}/{filename}
pub async fn archive(
    State(state): State<CacheState>,
    Path((registry, namespace, name, version, platform, filename)): Path<(
        String,
        String,
        String,
        String,
        String,
        String,
    )>,
) -> Response {
    let Some((os, arch)) = platform.split_once('_') else {
        return error_response(StatusCode::NOT_FOUND, "unknown platform");
    };
    let Ok(key) = ProviderKey::new(registry, namespace, name, version, os, arch) else {
        return error_response(StatusCode::NOT_FOUND, "unknown provider");
    };
    let Some(path) = state.service.ready_file(&key, &filename) else {
        return error_response(StatusCode::NOT_FOUND, "not cached");
    };

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    };
    let length = match file.metadata().await {
        Ok(metadata) => metadata.len(),
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    };
    debug!(file = ?path, bytes = length, "Serving cached archive");
    (
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_LENGTH, length.to_string()),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response()
}
