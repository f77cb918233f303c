use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pin::Status;

/// Errors surfaced by the pin lifecycle.
///
/// Retrieval and storage failures inside a pickup never reach a caller; the
/// worker records them on the pin as a failure reason instead.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PinError {
    #[error("invalid request: {details}")]
    Validation { details: String },

    #[error("pin request not found")]
    NotFound,

    #[error("illegal transition for {request_id}: {current} -> {requested}")]
    Conflict {
        request_id: String,
        current: Status,
        requested: Status,
    },

    #[error("stale generation for {request_id}: expected {expected}, record is at {current}")]
    StaleGeneration {
        request_id: String,
        expected: u64,
        current: u64,
    },

    #[error("dispatch failed for {request_id}: {source}")]
    Dispatch {
        request_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("operation {0} is not implemented")]
    NotImplemented(&'static str),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl PinError {
    pub fn validation(details: impl Into<String>) -> Self {
        Self::Validation {
            details: details.into(),
        }
    }

    /// Wire reason for this error at the API boundary.
    pub fn reason(&self) -> ErrorReason {
        match self {
            PinError::Validation { .. } => ErrorReason::BadRequest,
            PinError::NotFound => ErrorReason::NotFound,
            _ => ErrorReason::InternalServerError,
        }
    }

    /// The response body for this error. Only validation errors carry details.
    pub fn body(&self) -> ErrorBody {
        let details = match self {
            PinError::Validation { details } => Some(details.clone()),
            _ => None,
        };
        ErrorBody::new(self.reason(), details)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorReason {
    BadRequest,
    Unauthorized,
    NotFound,
    InternalServerError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetails,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub reason: ErrorReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorBody {
    pub fn new(reason: ErrorReason, details: Option<String>) -> Self {
        Self {
            error: ErrorDetails { reason, details },
        }
    }
}
