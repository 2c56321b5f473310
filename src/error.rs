use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// The backend call that produced a [`StoreError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreOperation {
    CreateListing,
    UpdateListing,
    FetchListing,
    InsertAttachment,
    DeleteAttachment,
    Upload,
    Remove,
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StoreOperation::CreateListing => "create_listing",
            StoreOperation::UpdateListing => "update_listing",
            StoreOperation::FetchListing => "fetch_listing",
            StoreOperation::InsertAttachment => "insert_attachment",
            StoreOperation::DeleteAttachment => "delete_attachment",
            StoreOperation::Upload => "upload",
            StoreOperation::Remove => "remove",
        };
        f.write_str(name)
    }
}

/// Failure reported by the relational or blob backend
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("{operation} failed: {message}")]
pub struct StoreError {
    pub operation: StoreOperation,
    pub message: String,
}

impl StoreError {
    pub fn new(operation: StoreOperation, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }
}

/// Errors that stop a submission as a whole
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SubmissionError {
    #[error("Invalid {field}: {rule}")]
    Validation { field: &'static str, rule: String },

    #[error("Too many images: at most {limit} per listing")]
    Capacity { limit: usize },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Listing not found or not owned by caller")]
    NotFound,

    #[error("Unauthorized: {reason}")]
    Unauthorized { reason: String },

    #[error("A submission is already in progress")]
    Busy,

    #[error("Display order out of range: the listing's highest order is already at the limit")]
    OrderOverflow,
}

impl SubmissionError {
    pub fn validation(field: &'static str, rule: impl Into<String>) -> Self {
        SubmissionError::Validation {
            field,
            rule: rule.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SubmissionError>;
pub type StoreResult<T> = std::result::Result<T, StoreError>;
