//! HTTP request handlers for the uplink server

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::header::{CONTENT_TYPE, ETAG};
use hyper::{Method, Request, Response, StatusCode};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uplink_core::auth::{uri_decode, PARTS_PATH_PREFIX};
use uplink_core::{dispatch, ObjectKey, PartGrant, Status, UploadError};

use crate::server::AppState;

const OPERATION_PATH_PREFIX: &str = "/s3/multipart/";
const OBJECTS_PATH_PREFIX: &str = "/objects/";

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main request handler
pub async fn handle_request<B>(
    req: Request<B>,
    state: Arc<AppState>,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!("Handling {} {}", method, path);

    let response = match (&method, path.as_str()) {
        (&Method::GET, "/health") => handle_health(&state),

        (&Method::POST, p) if p.starts_with(OPERATION_PATH_PREFIX) => {
            let operation = &p[OPERATION_PATH_PREFIX.len()..];
            handle_operation(req, &state, operation).await
        }

        (&Method::PUT, p) if p.starts_with(PARTS_PATH_PREFIX) => handle_put_part(req, &state).await,

        (&Method::GET, p) if p.starts_with(OBJECTS_PATH_PREFIX) => {
            handle_get_object(&state, &p[OBJECTS_PATH_PREFIX.len()..])
        }

        _ => json_response(StatusCode::NOT_FOUND, json!({"error": "Not found"})),
    };

    info!("{} {} -> {}", method, path, response.status());
    Ok(response)
}

fn handle_health(state: &AppState) -> Response<Full<Bytes>> {
    let config = state.orchestrator.config();
    json_response(
        StatusCode::OK,
        json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "service": "uplink",
            "uploads": {
                "defaultChunkSizeBytes": config.default_chunk_size_bytes,
                "maxPartCount": config.max_part_count,
                "maxConcurrentParts": config.max_concurrent_parts,
            }
        }),
    )
}

/// Run one of the named multipart operations
async fn handle_operation<B>(
    req: Request<B>,
    state: &AppState,
    operation: &str,
) -> Response<Full<Bytes>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let payload = match read_body(req.into_body(), state.max_request_bytes).await {
        Ok(payload) => payload,
        Err(response) => return response,
    };

    let response = dispatch(&state.orchestrator, operation, &payload).await;
    json_response(status_code(response.status), response.body)
}

/// Accept one part body under a presigned grant
async fn handle_put_part<B>(req: Request<B>, state: &AppState) -> Response<Full<Bytes>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let grant = match PartGrant::from_request(req.uri().path(), req.uri().query()) {
        Ok(grant) => grant,
        Err(err) => return error_response(&err),
    };
    if let Err(err) = state.signer.verify(&grant) {
        warn!(
            upload_id = %grant.upload_id,
            part_number = grant.part_number,
            error = %err,
            "rejected part upload"
        );
        return error_response(&err);
    }

    let limit = usize::try_from(state.max_part_bytes()).unwrap_or(usize::MAX);
    let body = match read_body(req.into_body(), limit).await {
        Ok(body) => body,
        Err(response) => return response,
    };

    match state
        .store
        .upload_part(&grant.upload_id, &grant.key, grant.part_number, &body)
    {
        Ok(etag) => {
            debug!(
                upload_id = %grant.upload_id,
                part_number = grant.part_number,
                size = body.len(),
                "stored part"
            );
            let mut response = json_response(StatusCode::OK, json!({"ETag": etag}));
            if let Ok(value) = format!("\"{}\"", etag).parse() {
                response.headers_mut().insert(ETAG, value);
            }
            response
        }
        Err(err) => error_response(&UploadError::from(err)),
    }
}

fn handle_get_object(state: &AppState, encoded_key: &str) -> Response<Full<Bytes>> {
    let key = match uri_decode(encoded_key)
        .ok_or_else(|| UploadError::MissingInput("key encoding".to_string()))
        .and_then(|key| ObjectKey::new(&key))
    {
        Ok(key) => key,
        Err(err) => return error_response(&err),
    };

    match state.store.read_object(&key) {
        Ok(Some(object)) => {
            let content_type = if object.content_type.is_empty() {
                "application/octet-stream".to_string()
            } else {
                object.content_type
            };
            Response::builder()
                .status(StatusCode::OK)
                .header(CONTENT_TYPE, content_type)
                .header("server", concat!("uplink/", env!("CARGO_PKG_VERSION")))
                .body(Full::new(Bytes::from(object.body)))
                .unwrap_or_else(internal_error)
        }
        Ok(None) => json_response(StatusCode::NOT_FOUND, json!({"error": "Object not found"})),
        Err(err) => {
            error!("Failed to read object {}: {}", key, err);
            error_response(&UploadError::from(err))
        }
    }
}

/// Collect a request body, answering 413 past `limit` bytes
async fn read_body<B>(body: B, limit: usize) -> Result<Bytes, Response<Full<Bytes>>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => Err(json_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            json!({"error": format!("body exceeds {} bytes", limit)}),
        )),
        Err(err) => Err(json_response(
            StatusCode::BAD_REQUEST,
            json!({"error": format!("failed to read request body: {}", err)}),
        )),
    }
}

pub fn status_code(status: Status) -> StatusCode {
    match status {
        Status::Ok => StatusCode::OK,
        Status::BadRequest => StatusCode::BAD_REQUEST,
        Status::Forbidden => StatusCode::FORBIDDEN,
        Status::NotFound => StatusCode::NOT_FOUND,
        Status::Conflict => StatusCode::CONFLICT,
        Status::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        Status::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: &UploadError) -> Response<Full<Bytes>> {
    let response = uplink_core::Response::from_error(err);
    json_response(status_code(response.status), response.body)
}

fn json_response(status: StatusCode, body: Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .header("server", concat!("uplink/", env!("CARGO_PKG_VERSION")))
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap_or_else(internal_error)
}

fn internal_error(err: hyper::http::Error) -> Response<Full<Bytes>> {
    error!("Failed to build response: {}", err);
    let body = Bytes::from_static(b"{\"error\":\"Internal server error\"}");
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use uplink_core::{content_addressed_namer, Ed25519UrlSigner, KeyPair, UploadConfig};
    use uplink_engine::{LocalStore, StoreLimits};

    fn test_state() -> (Arc<AppState>, tempfile::TempDir) {
        let config = UploadConfig {
            default_chunk_size_bytes: 1024,
            min_part_size_bytes: 1024,
            ..UploadConfig::default()
        };
        let limits = StoreLimits {
            max_part_size: 4096,
            ..StoreLimits::from_config(&config)
        };
        let (store, temp) = LocalStore::temp(limits).unwrap();
        let signer = Ed25519UrlSigner::new(KeyPair::generate(), "http://test.local");
        let state = AppState::new(store, signer, content_addressed_namer("t"), config).unwrap();
        (Arc::new(state), temp)
    }

    fn request(method: Method, uri: &str, body: impl Into<Bytes>) -> Request<Full<Bytes>> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Full::new(body.into()))
            .unwrap()
    }

    async fn call(state: &Arc<AppState>, req: Request<Full<Bytes>>) -> (StatusCode, Bytes) {
        let response = handle_request(req, state.clone()).await.unwrap();
        let status = response.status();
        (status, response.into_body().collect().await.unwrap().to_bytes())
    }

    async fn call_json(state: &Arc<AppState>, req: Request<Full<Bytes>>) -> (StatusCode, Value) {
        let (status, body) = call(state, req).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (state, _temp) = test_state();
        let (status, body) = call_json(&state, request(Method::GET, "/health", "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["uploads"]["defaultChunkSizeBytes"], 1024);
        assert_eq!(body["uploads"]["maxConcurrentParts"], 5);
    }

    #[tokio::test]
    async fn test_unknown_operation_is_404() {
        let (state, _temp) = test_state();
        let (status, body) =
            call_json(&state, request(Method::POST, "/s3/multipart/uploadEverything", "{}")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["err"]["message"], "Endpoint could not be found: uploadEverything");
    }

    #[tokio::test]
    async fn test_unrouted_path_is_404() {
        let (state, _temp) = test_state();
        let (status, _) = call(&state, request(Method::DELETE, "/objects/x", "")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_part_upload_requires_valid_grant() {
        let (state, _temp) = test_state();

        let unsigned = "/parts/k?uploadId=u&partNumber=1";
        let (status, _) = call(&state, request(Method::PUT, unsigned, "x")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let forged = "/parts/k?uploadId=u&partNumber=1&expires=99999999999&keyId=abc&signature=00";
        let (status, body) = call_json(&state, request(Method::PUT, forged, "x")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["err"]["kind"], "PermissionDenied");
    }

    #[tokio::test]
    async fn test_multipart_flow_over_http() {
        let (state, _temp) = test_state();
        let data: Vec<u8> = (0..2500u32).map(|i| (i % 251) as u8).collect();

        let create = json!({
            "file": {"name": "blob.bin", "type": "application/x-test", "size": data.len()}
        });
        let (status, created) = call_json(
            &state,
            request(Method::POST, "/s3/multipart/createMultipartUpload", create.to_string()),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", created);
        assert_eq!(created["plan"]["partCount"], 3);
        let key = created["key"].as_str().unwrap().to_string();
        let upload_id = created["uploadId"].as_str().unwrap().to_string();

        let prepare = json!({
            "partData": {"uploadId": upload_id, "key": key, "partNumbers": [1, 2, 3]}
        });
        let (status, prepared) = call_json(
            &state,
            request(Method::POST, "/s3/multipart/prepareUploadParts", prepare.to_string()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let mut parts = Vec::new();
        for (index, chunk) in data.chunks(1024).enumerate() {
            let n = index + 1;
            let url = prepared["presignedUrls"][n.to_string()].as_str().unwrap();
            let uri = url.strip_prefix("http://test.local").unwrap();
            let response = handle_request(request(Method::PUT, uri, chunk.to_vec()), state.clone())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let etag = response.headers()[ETAG].to_str().unwrap().trim_matches('"').to_string();
            parts.push(json!({"PartNumber": n, "ETag": etag}));
        }

        let complete = json!({"uploadId": upload_id, "key": key, "parts": parts});
        let (status, completed) = call_json(
            &state,
            request(Method::POST, "/s3/multipart/completeMultipartUpload", complete.to_string()),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", completed);

        let location = completed["location"].as_str().unwrap();
        let response = handle_request(request(Method::GET, location, ""), state.clone())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/x-test");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), data.as_slice());
    }

    #[tokio::test]
    async fn test_oversized_part_is_413() {
        let (state, _temp) = test_state();
        let create = json!({"file": {"name": "big.bin"}});
        let (_, created) = call_json(
            &state,
            request(Method::POST, "/s3/multipart/createMultipartUpload", create.to_string()),
        )
        .await;
        let prepare = json!({"partData": {
            "uploadId": created["uploadId"], "key": created["key"], "partNumbers": [1]
        }});
        let (_, prepared) = call_json(
            &state,
            request(Method::POST, "/s3/multipart/prepareUploadParts", prepare.to_string()),
        )
        .await;

        let url = prepared["presignedUrls"]["1"].as_str().unwrap();
        let uri = url.strip_prefix("http://test.local").unwrap();
        let (status, _) = call(&state, request(Method::PUT, uri, vec![0u8; 5000])).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }
}
