//! HTTP client for the multipart operation endpoint

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{CONTENT_TYPE, ETAG};
use hyper::{Method, Request, StatusCode, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HttpClient;
use hyper_util::rt::TokioExecutor;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use uplink_core::{
    CompletedPart, Completion, FileDescriptor, Operation, PartNumber, PartPlan, PartRecord,
    PartUrls,
};

use crate::{ClientError, Result};

/// A session returned by `createMultipartUpload`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSession {
    pub key: String,
    pub upload_id: String,
    #[serde(default)]
    pub plan: Option<PartPlan>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AbortReply {
    #[serde(default)]
    already_finalized: bool,
}

/// uplink client
#[derive(Clone)]
pub struct Client {
    base_url: String,
    http: HttpClient<HttpConnector, Full<Bytes>>,
}

impl Client {
    /// Create new client for the server at `base_url`
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let _uri: Uri = base_url
            .parse()
            .map_err(|e| ClientError::Connection(format!("Invalid URL: {}", e)))?;

        let http = HttpClient::builder(TokioExecutor::new()).build_http();
        Ok(Client { base_url, http })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Start an upload for `file`
    pub async fn create_multipart_upload(
        &self,
        file: &FileDescriptor,
        filename_params: &Value,
    ) -> Result<CreatedSession> {
        self.operation(
            Operation::CreateMultipartUpload,
            json!({"file": file, "filenameParams": filename_params}),
        )
        .await
    }

    /// Presigned URLs for `part_numbers`, optionally valid for `expires` seconds
    pub async fn prepare_upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        part_numbers: &[PartNumber],
        expires: Option<u64>,
    ) -> Result<PartUrls> {
        let mut part_data = json!({"uploadId": upload_id, "key": key, "partNumbers": part_numbers});
        if let Some(expires) = expires {
            part_data["expires"] = json!(expires);
        }
        self.operation(Operation::PrepareUploadParts, json!({"partData": part_data}))
            .await
    }

    /// The store's authoritative part listing
    pub async fn list_parts(&self, key: &str, upload_id: &str) -> Result<Vec<PartRecord>> {
        self.operation(Operation::ListParts, json!({"uploadId": upload_id, "key": key}))
            .await
    }

    pub async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<Completion> {
        self.operation(
            Operation::CompleteMultipartUpload,
            json!({"uploadId": upload_id, "key": key, "parts": parts}),
        )
        .await
    }

    /// Abort the upload; returns true if it had already been finalized
    pub async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<bool> {
        let reply: AbortReply = self
            .operation(
                Operation::AbortMultipartUpload,
                json!({"uploadId": upload_id, "key": key}),
            )
            .await?;
        Ok(reply.already_finalized)
    }

    /// PUT one part body to its presigned URL, returning the ETag
    pub async fn put_part(
        &self,
        url: &str,
        part_number: PartNumber,
        body: Bytes,
    ) -> Result<String> {
        let uri: Uri = url
            .parse()
            .map_err(|e| ClientError::InvalidResponse(format!("bad presigned URL: {}", e)))?;
        let request = Request::builder()
            .method(Method::PUT)
            .uri(uri)
            .body(Full::new(body))?;

        let response = self.http.request(request).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::PartUpload {
                part_number,
                status: status.as_u16(),
            });
        }

        response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_matches('"').to_string())
            .ok_or_else(|| {
                ClientError::InvalidResponse(format!("part {} response has no ETag", part_number))
            })
    }

    /// Fetch a completed object by the location returned from completion
    pub async fn get_object(&self, location: &str) -> Result<Option<Bytes>> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(self.url(location)?)
            .body(Full::new(Bytes::new()))?;

        let response = self.http.request(request).await?;
        match response.status() {
            StatusCode::OK => Ok(Some(response.into_body().collect().await?.to_bytes())),
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(ClientError::InvalidResponse(format!(
                "GET {} returned {}",
                location, status
            ))),
        }
    }

    /// Server health report
    pub async fn health(&self) -> Result<Value> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(self.url("/health")?)
            .body(Full::new(Bytes::new()))?;
        let response = self.http.request(request).await?;
        let body = response.into_body().collect().await?.to_bytes();
        serde_json::from_slice(&body).map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }

    async fn operation<T: DeserializeOwned>(
        &self,
        operation: Operation,
        payload: Value,
    ) -> Result<T> {
        let request = Request::builder()
            .method(Method::POST)
            .uri(self.url(&format!("/s3/multipart/{}", operation))?)
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(payload.to_string())))?;

        let response = self.http.request(request).await?;
        let status = response.status();
        let body = response.into_body().collect().await?.to_bytes();

        if status.is_success() {
            return serde_json::from_slice(&body).map_err(|e| {
                ClientError::InvalidResponse(format!("{} reply: {}", operation, e))
            });
        }

        Err(api_error(status, &body))
    }

    fn url(&self, path: &str) -> Result<Uri> {
        format!("{}{}", self.base_url, path)
            .parse()
            .map_err(|e| ClientError::Connection(format!("Invalid URL: {}", e)))
    }
}

fn api_error(status: StatusCode, body: &[u8]) -> ClientError {
    let parsed: Option<Value> = serde_json::from_slice(body).ok();
    let err = parsed.as_ref().and_then(|v| v.get("err"));

    ClientError::Api {
        status: status.as_u16(),
        kind: err
            .and_then(|e| e["kind"].as_str())
            .unwrap_or("Unknown")
            .to_string(),
        message: err
            .and_then(|e| e["message"].as_str())
            .map(str::to_string)
            .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned()),
    }
}
