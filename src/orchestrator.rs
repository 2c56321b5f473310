//! Create and edit flows spanning the relational and blob stores.
//!
//! The two stores share no transaction. Each step reports its own outcome:
//! a failed listing write aborts the submission, while failures of single
//! attachments are collected into the [`SubmissionReport`] and left for the
//! caller to retry or clean up.

use crate::error::{Result, StoreError, StoreOperation, SubmissionError};
use crate::gateways::{BlobGateway, BlobKey, RecordGateway};
use crate::models::{
    AttachmentId, AttachmentRef, AuthContext, ImageAttachment, ListingId, ListingWithImages, Role,
    StagedFile,
};
use crate::reconciler;
use crate::stager::MAX_IMAGES;
use crate::validation::{validate_form, ListingForm};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn, Span};

/// Why a submission ended unsuccessfully
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// The listing was written but some attachment steps failed
    Partial,
    /// Nothing was written, or the primary write failed
    Total,
}

/// Progress of the current submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SubmissionState {
    Idle,
    Validating,
    Writing,
    Uploading { done: usize, total: usize },
    Done,
    Failed(FailureKind),
}

impl SubmissionState {
    /// True while a submission is running
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            SubmissionState::Validating | SubmissionState::Writing | SubmissionState::Uploading { .. }
        )
    }
}

/// One staged file that did not become an attachment
#[derive(Debug, Clone, Serialize)]
pub struct AttachmentFailure {
    pub file_name: String,
    pub display_order: u32,
    pub error: StoreError,
    /// Uploaded blob left without a record, when the insert failed
    pub orphaned_blob: Option<BlobKey>,
    /// The file itself, handed back so it can be offered again
    #[serde(skip)]
    pub file: StagedFile,
}

/// One step of removing an existing attachment that failed
#[derive(Debug, Clone, Serialize)]
pub struct RemovalFailure {
    pub attachment: AttachmentId,
    pub error: StoreError,
}

/// Outcome of a submission whose listing write succeeded
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionReport {
    pub listing_id: ListingId,
    pub attached: Vec<AttachmentRef>,
    pub failures: Vec<AttachmentFailure>,
    pub removed: Vec<AttachmentId>,
    pub removal_failures: Vec<RemovalFailure>,
}

impl SubmissionReport {
    fn new(listing_id: ListingId) -> Self {
        Self {
            listing_id,
            attached: Vec::new(),
            failures: Vec::new(),
            removed: Vec::new(),
            removal_failures: Vec::new(),
        }
    }

    /// True when any attachment or removal step failed
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty() || !self.removal_failures.is_empty()
    }

    /// Blobs uploaded without a matching record
    pub fn orphaned_blobs(&self) -> Vec<BlobKey> {
        self.failures
            .iter()
            .filter_map(|f| f.orphaned_blob.clone())
            .collect()
    }

    /// Files to offer again through [`SubmissionOrchestrator::retry_attachments`]
    pub fn failed_files(&self) -> Vec<StagedFile> {
        self.failures.iter().map(|f| f.file.clone()).collect()
    }

    fn absorb(&mut self, outcomes: Vec<std::result::Result<AttachmentRef, AttachmentFailure>>) {
        for outcome in outcomes {
            match outcome {
                Ok(attached) => self.attached.push(attached),
                Err(failure) => self.failures.push(failure),
            }
        }
    }
}

/// Edit of an existing listing
#[derive(Debug, Clone)]
pub struct EditRequest {
    pub listing_id: ListingId,
    pub form: ListingForm,
    /// Existing attachments to delete
    pub remove: Vec<AttachmentId>,
    /// New files, in selection order
    pub files: Vec<StagedFile>,
}

/// Drives listing submissions against both stores
pub struct SubmissionOrchestrator {
    records: Arc<dyn RecordGateway>,
    blobs: Arc<dyn BlobGateway>,
    state: watch::Sender<SubmissionState>,
}

impl SubmissionOrchestrator {
    pub fn new(records: Arc<dyn RecordGateway>, blobs: Arc<dyn BlobGateway>) -> Self {
        let (state, _) = watch::channel(SubmissionState::Idle);
        Self {
            records,
            blobs,
            state,
        }
    }

    pub fn state(&self) -> SubmissionState {
        *self.state.borrow()
    }

    /// Receiver for state changes, e.g. to drive a progress indicator
    pub fn subscribe(&self) -> watch::Receiver<SubmissionState> {
        self.state.subscribe()
    }

    /// Create a listing and attach `files` in selection order
    #[instrument(skip_all, fields(owner = %auth.user_id, listing_id = tracing::field::Empty))]
    pub async fn create(
        &self,
        auth: &AuthContext,
        form: &ListingForm,
        files: Vec<StagedFile>,
    ) -> Result<SubmissionReport> {
        let guard = self.begin()?;
        let result = self.run_create(auth, form, files).await;
        self.settle(guard, &result);
        result
    }

    /// Update a listing, remove the marked attachments and attach new files
    #[instrument(skip_all, fields(owner = %auth.user_id, listing_id = %request.listing_id))]
    pub async fn edit(&self, auth: &AuthContext, request: EditRequest) -> Result<SubmissionReport> {
        let guard = self.begin()?;
        let result = self.run_edit(auth, request).await;
        self.settle(guard, &result);
        result
    }

    /// Attach files again after a partial failure.
    ///
    /// Orders continue after the listing's current attachments.
    #[instrument(skip_all, fields(owner = %auth.user_id, listing_id = %listing_id))]
    pub async fn retry_attachments(
        &self,
        auth: &AuthContext,
        listing_id: &ListingId,
        files: Vec<StagedFile>,
    ) -> Result<SubmissionReport> {
        let guard = self.begin()?;
        let result = self.run_retry(auth, listing_id, files).await;
        self.settle(guard, &result);
        result
    }

    /// Remove blobs that were uploaded but never recorded.
    ///
    /// Returns the keys that could not be removed.
    pub async fn discard_orphans(&self, keys: &[BlobKey]) -> Vec<(BlobKey, StoreError)> {
        let removals = keys.iter().map(|key| async move {
            match self.blobs.remove(key).await {
                Ok(()) => {
                    debug!("Discarded orphaned blob {}", key);
                    None
                }
                Err(e) => {
                    warn!("Could not discard orphaned blob {}: {}", key, e);
                    Some((key.clone(), e))
                }
            }
        });
        join_all(removals).await.into_iter().flatten().collect()
    }

    async fn run_create(
        &self,
        auth: &AuthContext,
        form: &ListingForm,
        files: Vec<StagedFile>,
    ) -> Result<SubmissionReport> {
        require_seller(auth)?;
        let fields = validate_form(form)?;
        if files.len() > MAX_IMAGES {
            return Err(SubmissionError::Capacity { limit: MAX_IMAGES });
        }
        let orders = reconciler::assign_orders(&[], files.len())?;
        debug!("Listing fields valid");

        self.state.send_replace(SubmissionState::Writing);
        let listing_id = self.records.create_listing(&auth.user_id, &fields).await?;
        Span::current().record("listing_id", tracing::field::display(&listing_id));
        info!("Created listing {}", listing_id);

        let mut report = SubmissionReport::new(listing_id);
        let outcomes = self.fan_out(&report.listing_id, files, orders).await;
        report.absorb(outcomes);
        Ok(report)
    }

    async fn run_edit(&self, auth: &AuthContext, request: EditRequest) -> Result<SubmissionReport> {
        require_seller(auth)?;
        let fields = validate_form(&request.form)?;

        self.state.send_replace(SubmissionState::Writing);
        let existing = self.fetch_owned(auth, &request.listing_id).await?;

        if let Some(unknown) = request
            .remove
            .iter()
            .find(|id| !existing.images.iter().any(|img| &img.id == *id))
        {
            return Err(SubmissionError::validation(
                "remove",
                format!("attachment {} does not belong to this listing", unknown),
            ));
        }
        let planned = reconciler::survivors(&existing.images, &request.remove);
        if planned.len() + request.files.len() > MAX_IMAGES {
            return Err(SubmissionError::Capacity { limit: MAX_IMAGES });
        }
        // Actual survivors are a subset of the current images, so this
        // bounds every order assigned below.
        reconciler::assign_orders(&existing.images, request.files.len())?;

        self.records
            .update_listing(&request.listing_id, &fields)
            .await?;
        info!("Updated listing {}", request.listing_id);

        let mut report = SubmissionReport::new(request.listing_id.clone());
        let to_remove: Vec<&ImageAttachment> = existing
            .images
            .iter()
            .filter(|img| request.remove.contains(&img.id))
            .collect();
        for (attachment, failures) in join_all(to_remove.into_iter().map(|a| self.detach(a))).await {
            if !failures.iter().any(|f| f.error.operation == StoreOperation::DeleteAttachment) {
                report.removed.push(attachment);
            }
            report.removal_failures.extend(failures);
        }

        // Orders are assigned against what actually survived, so a failed
        // record delete can never share an order with a new file.
        let survivors = reconciler::survivors(&existing.images, &report.removed);
        let room = MAX_IMAGES.saturating_sub(survivors.len());
        let mut files = request.files;
        let overflow = if files.len() > room {
            files.split_off(room)
        } else {
            Vec::new()
        };

        let orders = reconciler::assign_orders(&survivors, files.len())?;
        let outcomes = self.fan_out(&request.listing_id, files, orders).await;
        report.absorb(outcomes);

        let next = report
            .attached
            .iter()
            .map(|a| a.display_order.saturating_add(1))
            .chain(survivors.iter().map(|s| s.display_order.saturating_add(1)))
            .max()
            .unwrap_or(0);
        for (i, file) in overflow.into_iter().enumerate() {
            warn!("Skipping {}: a failed removal left no room", file.file_name);
            report.failures.push(AttachmentFailure {
                file_name: file.file_name.clone(),
                display_order: next.saturating_add(i as u32),
                error: StoreError::new(
                    StoreOperation::InsertAttachment,
                    format!(
                        "not attempted: listing would exceed {} images because a removal failed",
                        MAX_IMAGES
                    ),
                ),
                orphaned_blob: None,
                file,
            });
        }
        Ok(report)
    }

    async fn run_retry(
        &self,
        auth: &AuthContext,
        listing_id: &ListingId,
        files: Vec<StagedFile>,
    ) -> Result<SubmissionReport> {
        require_seller(auth)?;
        self.state.send_replace(SubmissionState::Writing);
        let existing = self.fetch_owned(auth, listing_id).await?;
        if existing.images.len() + files.len() > MAX_IMAGES {
            return Err(SubmissionError::Capacity { limit: MAX_IMAGES });
        }

        let orders = reconciler::assign_orders(&existing.images, files.len())?;
        let mut report = SubmissionReport::new(listing_id.clone());
        let outcomes = self.fan_out(listing_id, files, orders).await;
        report.absorb(outcomes);
        Ok(report)
    }

    async fn fetch_owned(&self, auth: &AuthContext, id: &ListingId) -> Result<ListingWithImages> {
        match self.records.fetch_listing(id, &auth.user_id).await? {
            Some(listing) => Ok(listing),
            None => {
                warn!("Listing {} not found for {}", id, auth.user_id);
                Err(SubmissionError::NotFound)
            }
        }
    }

    /// Upload and record every file concurrently; one result per file, in order
    async fn fan_out(
        &self,
        listing_id: &ListingId,
        files: Vec<StagedFile>,
        orders: Vec<u32>,
    ) -> Vec<std::result::Result<AttachmentRef, AttachmentFailure>> {
        let total = files.len();
        if total == 0 {
            return Vec::new();
        }
        self.state
            .send_replace(SubmissionState::Uploading { done: 0, total });
        debug!("Uploading {} file(s) to {}", total, self.blobs.backend_name());

        let tasks = files.into_iter().zip(orders).map(|(file, order)| async move {
            let outcome = self.attach(listing_id, file, order).await;
            self.state.send_modify(|state| {
                if let SubmissionState::Uploading { done, .. } = state {
                    *done += 1;
                }
            });
            outcome
        });
        join_all(tasks).await
    }

    /// Upload, resolve, insert: strictly in that order for one file
    async fn attach(
        &self,
        listing_id: &ListingId,
        file: StagedFile,
        display_order: u32,
    ) -> std::result::Result<AttachmentRef, AttachmentFailure> {
        let key = BlobKey::for_file(listing_id, &file.file_name);

        if let Err(error) = self.blobs.upload(&key, file.bytes.clone()).await {
            warn!("Upload of {} failed: {}", file.file_name, error);
            return Err(AttachmentFailure {
                file_name: file.file_name.clone(),
                display_order,
                error,
                orphaned_blob: None,
                file,
            });
        }

        let url = self.blobs.resolve_public_url(&key);
        if let Err(error) = self
            .records
            .insert_attachment(listing_id, &url, display_order)
            .await
        {
            warn!("Recording {} failed, blob {} orphaned: {}", file.file_name, key, error);
            return Err(AttachmentFailure {
                file_name: file.file_name.clone(),
                display_order,
                error,
                orphaned_blob: Some(key),
                file,
            });
        }

        debug!("Attached {} at order {}", file.file_name, display_order);
        Ok(AttachmentRef {
            file_name: file.file_name,
            url,
            display_order,
        })
    }

    /// Delete the blob, then the record. A failed blob delete does not
    /// stop the record delete; the blob is then leaked.
    async fn detach(&self, attachment: &ImageAttachment) -> (AttachmentId, Vec<RemovalFailure>) {
        let mut failures = Vec::new();

        match self.blobs.key_for_url(&attachment.url) {
            Some(key) => {
                if let Err(error) = self.blobs.remove(&key).await {
                    warn!("Blob {} not removed, leaking it: {}", key, error);
                    failures.push(RemovalFailure {
                        attachment: attachment.id.clone(),
                        error,
                    });
                }
            }
            None => warn!(
                "No blob key for {}, skipping blob delete",
                attachment.url
            ),
        }

        if let Err(error) = self.records.delete_attachment(&attachment.id).await {
            warn!("Attachment {} not deleted: {}", attachment.id, error);
            failures.push(RemovalFailure {
                attachment: attachment.id.clone(),
                error,
            });
        } else {
            debug!("Removed attachment {}", attachment.id);
        }

        (attachment.id.clone(), failures)
    }

    /// Claim the orchestrator for a new submission
    fn begin(&self) -> Result<SubmissionGuard<'_>> {
        let claimed = self.state.send_if_modified(|state| {
            if state.is_busy() {
                false
            } else {
                *state = SubmissionState::Validating;
                true
            }
        });
        if claimed {
            Ok(SubmissionGuard {
                state: &self.state,
                armed: true,
            })
        } else {
            warn!("Rejecting submission while another is in progress");
            Err(SubmissionError::Busy)
        }
    }

    fn settle(&self, mut guard: SubmissionGuard<'_>, result: &Result<SubmissionReport>) {
        guard.armed = false;
        let end = match result {
            Ok(report) if report.is_partial() => {
                warn!(
                    failed = report.failures.len(),
                    removal_failures = report.removal_failures.len(),
                    "Submission partially failed"
                );
                SubmissionState::Failed(FailureKind::Partial)
            }
            Ok(report) => {
                info!(attached = report.attached.len(), "Submission complete");
                SubmissionState::Done
            }
            Err(e) => {
                warn!("Submission failed: {}", e);
                SubmissionState::Failed(FailureKind::Total)
            }
        };
        self.state.send_replace(end);
    }
}

/// Held for the length of one submission.
///
/// A submission future dropped mid-flight never reaches `settle`, so the
/// guard moves the state out of its busy phase instead.
struct SubmissionGuard<'a> {
    state: &'a watch::Sender<SubmissionState>,
    armed: bool,
}

impl Drop for SubmissionGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!("Submission dropped before completion");
            self.state
                .send_replace(SubmissionState::Failed(FailureKind::Total));
        }
    }
}

fn require_seller(auth: &AuthContext) -> Result<()> {
    match auth.role {
        Role::Seller => Ok(()),
        Role::Buyer => Err(SubmissionError::Unauthorized {
            reason: "only sellers can manage listings".to_string(),
        }),
    }
}
