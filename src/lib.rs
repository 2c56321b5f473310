pub mod config;
pub mod error;
pub mod gateways;
pub mod models;
pub mod orchestrator;
pub mod reconciler;
pub mod stager;
pub mod validation;

pub use error::{StoreError, StoreOperation, SubmissionError};
pub use orchestrator::{
    EditRequest, FailureKind, SubmissionOrchestrator, SubmissionReport, SubmissionState,
};
pub use stager::{ImageStager, MAX_IMAGES};
pub use validation::{validate, validate_form, ListingDraft, ListingForm};
