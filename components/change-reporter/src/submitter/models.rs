// External crates
use bytes::Bytes;
use hyper::StatusCode;
use serde::Deserialize;

/// Path prefix of the admin server's changeset endpoint.
pub const SUBMIT_PATH: &str = "/submit_change/";

/// A named unit of configuration-change data.
///
/// The payload is opaque serialized JSON; it is never parsed on the way out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Changeset {
    pub namespace: String,
    pub payload: Bytes,
}

impl Changeset {
    pub fn new(namespace: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            namespace: namespace.into(),
            payload: payload.into(),
        }
    }
}

/// What the admin server answered for one submission. Only ever logged.
#[derive(Debug, Clone)]
pub struct SubmissionOutcome {
    pub status: StatusCode,
    pub body: Bytes,
}

/// Shape of the admin server's `{"status": "..."}` replies.
#[derive(Debug, Deserialize)]
struct StatusReply {
    status: String,
}

impl SubmissionOutcome {
    pub fn is_success(&self) -> bool {
        self.status == StatusCode::OK
    }

    /// Response body for log lines: the `status` message when the server sent
    /// one, otherwise the raw body.
    pub fn describe_body(&self) -> String {
        match serde_json::from_slice::<StatusReply>(&self.body) {
            Ok(reply) => reply.status,
            Err(_) => String::from_utf8_lossy(&self.body).into_owned(),
        }
    }
}

/// Failures of a single submission. These never leave the completion task.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("namespace {0:?} cannot be used as a path segment")]
    InvalidNamespace(String),
    #[error("invalid admin server address {authority}")]
    InvalidAuthority {
        authority: String,
        #[source]
        source: hyper::http::uri::InvalidUri,
    },
    #[error("could not build submission request")]
    Request(#[from] hyper::http::Error),
    #[error("could not reach admin server")]
    Transport(#[from] hyper_util::client::legacy::Error),
    #[error("could not read admin server response")]
    Body(#[from] hyper::Error),
    #[error("admin server answered {}: {}", .0.status, .0.describe_body())]
    Status(SubmissionOutcome),
}

/// Turn a namespace into a single, safe URL path segment.
///
/// Empty, `.` and `..` would address a different resource and are rejected;
/// anything else outside the unreserved set is percent-encoded.
pub fn encode_namespace(namespace: &str) -> Result<String, SubmitError> {
    match namespace {
        "" | "." | ".." => Err(SubmitError::InvalidNamespace(namespace.to_string())),
        _ => Ok(urlencoding::encode(namespace).into_owned()),
    }
}

/// Request path for `namespace`: `/submit_change/{namespace}`.
pub fn submit_path(namespace: &str) -> Result<String, SubmitError> {
    Ok(format!("{SUBMIT_PATH}{}", encode_namespace(namespace)?))
}
