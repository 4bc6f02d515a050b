//! Boundary error taxonomy and its Kubernetes-style status rendering.

use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Status, StatusCause, StatusDetails};
use serde::{Deserialize, Serialize};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldErrorType {
    Required,
    Invalid,
}

/// One violated field, reported inside [`Error::Invalid`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub error_type: FieldErrorType,
    pub value: String,
    pub detail: String,
}

impl FieldError {
    pub fn required(field: impl Into<String>) -> Self {
        Self { field: field.into(), error_type: FieldErrorType::Required, value: String::new(), detail: String::new() }
    }

    pub fn invalid(field: impl Into<String>, value: impl Into<String>, detail: impl Into<String>) -> Self {
        Self { field: field.into(), error_type: FieldErrorType::Invalid, value: value.into(), detail: detail.into() }
    }

    fn reason(&self) -> &'static str {
        match self.error_type {
            FieldErrorType::Required => "FieldValueRequired",
            FieldErrorType::Invalid => "FieldValueInvalid",
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.error_type {
            FieldErrorType::Required => write!(f, "{}: required value", self.field),
            FieldErrorType::Invalid if self.detail.is_empty() => {
                write!(f, "{}: invalid value '{}'", self.field, self.value)
            }
            FieldErrorType::Invalid => write!(f, "{}: invalid value '{}': {}", self.field, self.value, self.detail),
        }
    }
}

fn join_causes(causes: &[FieldError]) -> String {
    causes.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

/// Every failure a registry, REST binding or rollback can surface.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum Error {
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: String, name: String },

    /// Optimistic-lock loss, or a watch resumed from a compacted index.
    #[error("{message}")]
    Conflict { kind: String, name: String, message: String },

    #[error("{kind}.Namespace does not match the provided context")]
    NamespaceConflict { kind: String },

    #[error("{kind} {name:?} is invalid: {}", join_causes(.causes))]
    Invalid { kind: String, name: String, causes: Vec<FieldError> },

    #[error("namespace is required to address a {kind}")]
    NamespaceRequired { kind: String },

    #[error("{0}")]
    BadRequest(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("{0}")]
    DecodeFailure(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(kind: &str, name: &str) -> Self {
        Self::NotFound { kind: kind.to_string(), name: name.to_string() }
    }

    pub fn already_exists(kind: &str, name: &str) -> Self {
        Self::AlreadyExists { kind: kind.to_string(), name: name.to_string() }
    }

    pub fn conflict(kind: &str, name: &str, reason: impl fmt::Display) -> Self {
        Self::Conflict {
            kind: kind.to_string(),
            name: name.to_string(),
            message: format!("{kind} {name} cannot be updated: {reason}"),
        }
    }

    /// A watch asked to resume from a version the store no longer retains.
    pub fn watch_expired(kind: &str, resource_version: &str) -> Self {
        Self::Conflict {
            kind: kind.to_string(),
            name: String::new(),
            message: format!("{kind} watch: resource version {resource_version} is too old"),
        }
    }

    pub fn namespace_conflict(kind: &str) -> Self {
        Self::NamespaceConflict { kind: kind.to_string() }
    }

    pub fn invalid(kind: &str, name: &str, causes: Vec<FieldError>) -> Self {
        Self::Invalid { kind: kind.to_string(), name: name.to_string(), causes }
    }

    /// HTTP-flavored status code for this error.
    pub fn code(&self) -> u16 {
        match self {
            Error::NotFound { .. } => 404,
            Error::AlreadyExists { .. } | Error::Conflict { .. } | Error::NamespaceConflict { .. } => 409,
            Error::Invalid { .. } | Error::DecodeFailure(_) => 422,
            Error::NamespaceRequired { .. } | Error::BadRequest(_) => 400,
            Error::StoreUnavailable(_) => 503,
            Error::Internal(_) => 500,
        }
    }

    /// Machine-readable reason, as carried in `Status.reason`.
    pub fn reason(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "NotFound",
            Error::AlreadyExists { .. } => "AlreadyExists",
            Error::Conflict { .. } | Error::NamespaceConflict { .. } => "Conflict",
            Error::Invalid { .. } | Error::DecodeFailure(_) => "Invalid",
            Error::NamespaceRequired { .. } | Error::BadRequest(_) => "BadRequest",
            Error::StoreUnavailable(_) => "ServiceUnavailable",
            Error::Internal(_) => "InternalError",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. } | Error::NamespaceConflict { .. })
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, Error::Invalid { .. } | Error::DecodeFailure(_))
    }

    /// Failure status for this error.
    pub fn to_status(&self) -> Status {
        let details = match self {
            Error::NotFound { kind, name } | Error::AlreadyExists { kind, name } | Error::Conflict { kind, name, .. } => {
                Some(StatusDetails { kind: Some(kind.clone()), name: Some(name.clone()), ..Default::default() })
            }
            Error::NamespaceConflict { kind } | Error::NamespaceRequired { kind } => {
                Some(StatusDetails { kind: Some(kind.clone()), ..Default::default() })
            }
            Error::Invalid { kind, name, causes } => Some(StatusDetails {
                kind: Some(kind.clone()),
                name: Some(name.clone()),
                causes: Some(
                    causes
                        .iter()
                        .map(|c| StatusCause {
                            field: Some(c.field.clone()),
                            message: Some(c.to_string()),
                            reason: Some(c.reason().to_string()),
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            _ => None,
        };
        Status {
            status: Some(STATUS_FAILURE.to_string()),
            code: Some(i32::from(self.code())),
            reason: Some(self.reason().to_string()),
            message: Some(self.to_string()),
            details,
            ..Default::default()
        }
    }
}

pub const STATUS_SUCCESS: &str = "Success";
pub const STATUS_FAILURE: &str = "Failure";

/// Status returned by operations that have no object to hand back (e.g. delete).
pub fn success_status() -> Status {
    Status { status: Some(STATUS_SUCCESS.to_string()), code: Some(200), ..Default::default() }
}
