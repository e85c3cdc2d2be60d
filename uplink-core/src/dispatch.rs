//! Named-operation dispatch
//!
//! Maps the closed set of five operation names onto the orchestrator and
//! renders results as a status classification plus a JSON payload. Failures
//! carry only `{err: {kind, message}}`, never partial results.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::{
    AbortOutcome, CompletedPart, ErrorKind, FileDescriptor, PartNumber, PartPlan, Result,
    UploadError, UploadOrchestrator, UploadSession,
};

/// The operations exposed to upload drivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateMultipartUpload,
    ListParts,
    PrepareUploadParts,
    AbortMultipartUpload,
    CompleteMultipartUpload,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::CreateMultipartUpload,
        Operation::ListParts,
        Operation::PrepareUploadParts,
        Operation::AbortMultipartUpload,
        Operation::CompleteMultipartUpload,
    ];

    /// Wire name of the operation
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::CreateMultipartUpload => "createMultipartUpload",
            Operation::ListParts => "listParts",
            Operation::PrepareUploadParts => "prepareUploadParts",
            Operation::AbortMultipartUpload => "abortMultipartUpload",
            Operation::CompleteMultipartUpload => "completeMultipartUpload",
        }
    }
}

impl FromStr for Operation {
    type Err = UploadError;

    fn from_str(name: &str) -> Result<Self> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == name)
            .ok_or_else(|| UploadError::UnknownOperation(name.to_string()))
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome classification, independent of the payload shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    BadRequest,
    Forbidden,
    NotFound,
    Conflict,
    Unavailable,
    Internal,
}

impl Status {
    pub fn for_error(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::MissingInput | ErrorKind::InvalidDestination => Status::BadRequest,
            ErrorKind::PermissionDenied => Status::Forbidden,
            ErrorKind::UnknownOperation => Status::NotFound,
            ErrorKind::PartMismatch
            | ErrorKind::AlreadyFinalized
            | ErrorKind::InvalidTransition => Status::Conflict,
            ErrorKind::StoreUnavailable => Status::Unavailable,
            ErrorKind::InvalidPartRecord
            | ErrorKind::SigningFailed
            | ErrorKind::InvalidConfig
            | ErrorKind::Internal => Status::Internal,
        }
    }
}

/// A classified response ready for a transport to serialize
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: Status,
    pub body: Value,
}

impl Response {
    fn ok(body: Value) -> Self {
        Response { status: Status::Ok, body }
    }

    pub fn from_error(err: &UploadError) -> Self {
        let kind = err.kind();
        Response {
            status: Status::for_error(kind),
            body: json!({ "err": { "kind": kind, "message": err.to_string() } }),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRequest {
    file: Option<FileDescriptor>,
    #[serde(default)]
    filename_params: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateResponse {
    key: String,
    upload_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    plan: Option<PartPlan>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionRequest {
    upload_id: Option<String>,
    key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrepareRequest {
    part_data: Option<PartData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartData {
    upload_id: Option<String>,
    key: Option<String>,
    #[serde(default)]
    part_numbers: Vec<PartNumber>,
    expires: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompleteRequest {
    upload_id: Option<String>,
    key: Option<String>,
    parts: Option<Vec<CompletedPart>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AbortResponse {
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    already_finalized: bool,
}

/// Run the operation named `operation` with a JSON `payload`
pub async fn dispatch(
    orchestrator: &UploadOrchestrator,
    operation: &str,
    payload: &[u8],
) -> Response {
    match run(orchestrator, operation, payload).await {
        Ok(body) => Response::ok(body),
        Err(err) => {
            debug!(operation, error = %err, "operation failed");
            Response::from_error(&err)
        }
    }
}

async fn run(orchestrator: &UploadOrchestrator, operation: &str, payload: &[u8]) -> Result<Value> {
    let operation: Operation = operation.parse()?;

    match operation {
        Operation::CreateMultipartUpload => {
            let req: CreateRequest = parse(payload)?;
            let started = orchestrator
                .start_upload(req.file.as_ref(), &req.filename_params)
                .await?;
            to_json(&CreateResponse {
                key: started.session.key().to_string(),
                upload_id: started.session.upload_id().to_string(),
                plan: started.plan,
            })
        }
        Operation::ListParts => {
            let req: SessionRequest = parse(payload)?;
            let mut session = UploadSession::attach(req.key.as_deref(), req.upload_id.as_deref())?;
            to_json(&orchestrator.list_parts(&mut session).await?)
        }
        Operation::PrepareUploadParts => {
            let req: PrepareRequest = parse(payload)?;
            let data = req
                .part_data
                .ok_or_else(|| UploadError::MissingInput("partData".to_string()))?;
            let mut session =
                UploadSession::attach(data.key.as_deref(), data.upload_id.as_deref())?;
            let expiry = data.expires.map(Duration::from_secs);
            let urls = orchestrator
                .issue_part_urls(&mut session, &data.part_numbers, expiry)
                .await?;
            to_json(&urls)
        }
        Operation::AbortMultipartUpload => {
            let req: SessionRequest = parse(payload)?;
            let mut session = UploadSession::attach(req.key.as_deref(), req.upload_id.as_deref())?;
            let outcome = orchestrator.abort_upload(&mut session).await?;
            to_json(&AbortResponse {
                already_finalized: outcome == AbortOutcome::AlreadyFinalized,
            })
        }
        Operation::CompleteMultipartUpload => {
            let req: CompleteRequest = parse(payload)?;
            let mut session = UploadSession::attach(req.key.as_deref(), req.upload_id.as_deref())?;
            let parts = req
                .parts
                .ok_or_else(|| UploadError::MissingInput("parts".to_string()))?;
            to_json(&orchestrator.complete_upload(&mut session, &parts).await?)
        }
    }
}

fn parse<T: for<'de> Deserialize<'de>>(payload: &[u8]) -> Result<T> {
    let payload = if payload.iter().all(u8::is_ascii_whitespace) {
        b"{}".as_slice()
    } else {
        payload
    };
    serde_json::from_slice(payload)
        .map_err(|e| UploadError::MissingInput(format!("malformed request: {}", e)))
}

fn to_json<T: Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_names_are_exactly_the_five() {
        let names: Vec<_> = Operation::ALL.iter().map(|op| op.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "createMultipartUpload",
                "listParts",
                "prepareUploadParts",
                "abortMultipartUpload",
                "completeMultipartUpload",
            ]
        );
        for op in Operation::ALL {
            assert_eq!(op.as_str().parse::<Operation>().unwrap(), op);
        }
    }

    #[test]
    fn unknown_operation_is_not_found() {
        let err = "uploadPart".parse::<Operation>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownOperation);
        assert_eq!(err.to_string(), "Endpoint could not be found: uploadPart");

        let response = Response::from_error(&err);
        assert_eq!(response.status, Status::NotFound);
        assert_eq!(response.body["err"]["kind"], "UnknownOperation");
    }

    #[test]
    fn names_are_case_sensitive() {
        assert!("ListParts".parse::<Operation>().is_err());
        assert!("listparts".parse::<Operation>().is_err());
    }

    #[test]
    fn abort_response_shapes() {
        let fresh = serde_json::to_value(AbortResponse { already_finalized: false }).unwrap();
        assert_eq!(fresh, json!({}));
        let repeat = serde_json::to_value(AbortResponse { already_finalized: true }).unwrap();
        assert_eq!(repeat, json!({"alreadyFinalized": true}));
    }

    #[test]
    fn empty_payload_parses_as_empty_object() {
        let req: SessionRequest = parse(b"  ").unwrap();
        assert!(req.upload_id.is_none());
        assert!(parse::<SessionRequest>(b"{not json").is_err());
    }
}
