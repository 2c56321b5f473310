//! End-to-end submission flows against the in-memory stores.

use assert_matches::assert_matches;
use futures::FutureExt;
use listing_desk::gateways::{MemoryBlobStore, MemoryRecordStore, RecordGateway};
use listing_desk::models::{AttachmentId, AuthContext, ListingId, ListingKind, Role, StagedFile};
use listing_desk::{
    EditRequest, FailureKind, ImageStager, ListingForm, StoreOperation, SubmissionError,
    SubmissionOrchestrator, SubmissionState,
};
use std::sync::Arc;

// ============================================================================
// Fixtures
// ============================================================================

struct Harness {
    records: Arc<MemoryRecordStore>,
    blobs: Arc<MemoryBlobStore>,
    orchestrator: SubmissionOrchestrator,
}

impl Harness {
    fn new() -> Self {
        let records = Arc::new(MemoryRecordStore::new());
        let blobs = Arc::new(MemoryBlobStore::default());
        let orchestrator = SubmissionOrchestrator::new(records.clone(), blobs.clone());
        Self {
            records,
            blobs,
            orchestrator,
        }
    }

    /// Create a listing for `seller` with `n` photos and return its id
    async fn listing_with_photos(&self, seller: &AuthContext, n: usize) -> ListingId {
        let report = self
            .orchestrator
            .create(seller, &form(), photos(n))
            .await
            .unwrap();
        assert!(!report.is_partial());
        report.listing_id
    }

    async fn orders(&self, id: &ListingId) -> Vec<u32> {
        let listing = self.records.snapshot(id).await.unwrap();
        listing.images.iter().map(|i| i.display_order).collect()
    }

    async fn attachment_ids(&self, id: &ListingId) -> Vec<AttachmentId> {
        let listing = self.records.snapshot(id).await.unwrap();
        listing.images.into_iter().map(|i| i.id).collect()
    }
}

fn seller() -> AuthContext {
    AuthContext::seller("seller-1")
}

fn form() -> ListingForm {
    ListingForm {
        title: "Sunny two room flat".into(),
        description: "Bright corner flat with a balcony facing the park.".into(),
        kind: Some(ListingKind::Rent),
        price: "1450".into(),
        location: "Götgatan 120, Stockholm".into(),
        bedrooms: "2".into(),
        bathrooms: "1".into(),
        area: "70".into(),
        available_from: "2026-11-01".into(),
        available_to: "".into(),
    }
}

fn photos(n: usize) -> Vec<StagedFile> {
    (0..n)
        .map(|i| StagedFile::new(format!("photo{}.jpg", i), vec![i as u8; 8]))
        .collect()
}

// ============================================================================
// Create path
// ============================================================================

#[tokio::test]
async fn create_without_photos_persists_exact_values() {
    let h = Harness::new();
    let report = h.orchestrator.create(&seller(), &form(), vec![]).await.unwrap();

    assert!(report.attached.is_empty());
    assert!(!report.is_partial());
    assert_eq!(h.records.listing_count().await, 1);

    let stored = h.records.snapshot(&report.listing_id).await.unwrap();
    let expected = listing_desk::validate_form(&form()).unwrap();
    assert_eq!(stored.listing.fields, expected);
    assert_eq!(stored.listing.owner_id, "seller-1");
    assert!(stored.images.is_empty());
    assert_eq!(h.blobs.calls(StoreOperation::Upload).await, 0);
    assert_eq!(h.orchestrator.state(), SubmissionState::Done);
}

#[tokio::test]
async fn create_assigns_orders_in_selection_order() {
    let h = Harness::new();
    let report = h.orchestrator.create(&seller(), &form(), photos(5)).await.unwrap();

    let orders: Vec<(String, u32)> = report
        .attached
        .iter()
        .map(|a| (a.file_name.clone(), a.display_order))
        .collect();
    assert_eq!(
        orders,
        (0..5).map(|i| (format!("photo{}.jpg", i), i as u32)).collect::<Vec<_>>()
    );
    assert_eq!(h.orders(&report.listing_id).await, vec![0, 1, 2, 3, 4]);
    assert_eq!(h.blobs.object_count().await, 5);

    for attached in &report.attached {
        assert!(attached
            .url
            .starts_with(&format!("memory://listing-images/{}/", report.listing_id)));
        assert!(attached.url.ends_with(".jpg"));
    }
}

#[tokio::test]
async fn validation_failure_makes_no_calls() {
    let h = Harness::new();
    let mut bad = form();
    bad.price = "0".into();

    let result = h.orchestrator.create(&seller(), &bad, photos(2)).await;
    assert_matches!(result, Err(SubmissionError::Validation { field: "price", .. }));
    assert_eq!(h.records.calls(StoreOperation::CreateListing).await, 0);
    assert_eq!(h.blobs.calls(StoreOperation::Upload).await, 0);
    assert_eq!(
        h.orchestrator.state(),
        SubmissionState::Failed(FailureKind::Total)
    );
}

#[tokio::test]
async fn too_many_files_rejected_before_writing() {
    let h = Harness::new();
    let result = h.orchestrator.create(&seller(), &form(), photos(6)).await;
    assert_matches!(result, Err(SubmissionError::Capacity { limit: 5 }));
    assert_eq!(h.records.listing_count().await, 0);
}

#[tokio::test]
async fn failed_listing_write_skips_uploads() {
    let h = Harness::new();
    h.records.fail(StoreOperation::CreateListing).await;

    let result = h.orchestrator.create(&seller(), &form(), photos(3)).await;
    assert_matches!(
        result,
        Err(SubmissionError::Store(e)) if e.operation == StoreOperation::CreateListing
    );
    assert_eq!(h.blobs.calls(StoreOperation::Upload).await, 0);
    assert_eq!(h.records.calls(StoreOperation::InsertAttachment).await, 0);
}

#[tokio::test]
async fn one_failed_upload_leaves_others_persisted() {
    let h = Harness::new();
    h.blobs.fail_matching(StoreOperation::Upload, ".png").await;
    let files = vec![
        StagedFile::new("front.jpg", vec![1]),
        StagedFile::new("kitchen.png", vec![2]),
        StagedFile::new("garden.jpg", vec![3]),
    ];

    let report = h.orchestrator.create(&seller(), &form(), files).await.unwrap();

    assert!(report.is_partial());
    assert_eq!(report.failures.len(), 1);
    let failure = &report.failures[0];
    assert_eq!(failure.file_name, "kitchen.png");
    assert_eq!(failure.error.operation, StoreOperation::Upload);
    assert!(failure.orphaned_blob.is_none());

    let attached: Vec<(&str, u32)> = report
        .attached
        .iter()
        .map(|a| (a.file_name.as_str(), a.display_order))
        .collect();
    assert_eq!(attached, vec![("front.jpg", 0), ("garden.jpg", 2)]);
    assert_eq!(h.orders(&report.listing_id).await, vec![0, 2]);
    assert_eq!(
        h.orchestrator.state(),
        SubmissionState::Failed(FailureKind::Partial)
    );
}

#[tokio::test]
async fn failed_insert_reports_orphaned_blob() {
    let h = Harness::new();
    h.records
        .fail_matching(StoreOperation::InsertAttachment, ".png")
        .await;
    let files = vec![
        StagedFile::new("front.jpg", vec![1]),
        StagedFile::new("plan.png", vec![2]),
    ];

    let report = h.orchestrator.create(&seller(), &form(), files).await.unwrap();

    let orphans = report.orphaned_blobs();
    assert_eq!(orphans.len(), 1);
    assert!(h.blobs.contains(&orphans[0]).await);

    let leftover = h.orchestrator.discard_orphans(&orphans).await;
    assert!(leftover.is_empty());
    assert!(!h.blobs.contains(&orphans[0]).await);
}

#[tokio::test]
async fn failed_files_can_be_retried() {
    let h = Harness::new();
    h.blobs.fail_matching(StoreOperation::Upload, ".png").await;
    let files = vec![
        StagedFile::new("front.jpg", vec![1]),
        StagedFile::new("kitchen.png", vec![2]),
    ];
    let report = h.orchestrator.create(&seller(), &form(), files).await.unwrap();
    assert!(report.is_partial());

    h.blobs.clear_failures().await;
    let retry = h
        .orchestrator
        .retry_attachments(&seller(), &report.listing_id, report.failed_files())
        .await
        .unwrap();

    assert!(!retry.is_partial());
    assert_eq!(retry.attached[0].file_name, "kitchen.png");
    assert_eq!(retry.attached[0].display_order, 1);
    assert_eq!(h.orders(&report.listing_id).await, vec![0, 1]);
}

#[tokio::test]
async fn buyers_cannot_create() {
    let h = Harness::new();
    let buyer = AuthContext {
        user_id: "buyer-1".into(),
        role: Role::Buyer,
    };
    let result = h.orchestrator.create(&buyer, &form(), vec![]).await;
    assert_matches!(result, Err(SubmissionError::Unauthorized { .. }));
    assert_eq!(h.records.calls(StoreOperation::CreateListing).await, 0);
}

// ============================================================================
// Edit path
// ============================================================================

#[tokio::test]
async fn edit_appends_after_surviving_max() {
    let h = Harness::new();
    let id = h.listing_with_photos(&seller(), 4).await;
    let ids = h.attachment_ids(&id).await;

    // Survivors end up with orders 0 and 3
    let request = EditRequest {
        listing_id: id.clone(),
        form: form(),
        remove: vec![ids[1].clone(), ids[2].clone()],
        files: photos(2),
    };
    let report = h.orchestrator.edit(&seller(), request).await.unwrap();

    assert_eq!(report.removed.len(), 2);
    let new_orders: Vec<u32> = report.attached.iter().map(|a| a.display_order).collect();
    assert_eq!(new_orders, vec![4, 5]);
    assert_eq!(h.orders(&id).await, vec![0, 3, 4, 5]);
    assert_eq!(h.blobs.object_count().await, 4);
}

#[tokio::test]
async fn removal_keeps_higher_orders() {
    let h = Harness::new();
    let id = h.listing_with_photos(&seller(), 3).await;
    let ids = h.attachment_ids(&id).await;

    let request = EditRequest {
        listing_id: id.clone(),
        form: form(),
        remove: vec![ids[0].clone()],
        files: vec![],
    };
    h.orchestrator.edit(&seller(), request).await.unwrap();

    assert_eq!(h.orders(&id).await, vec![1, 2]);
}

#[tokio::test]
async fn removing_everything_restarts_orders() {
    let h = Harness::new();
    let id = h.listing_with_photos(&seller(), 2).await;
    let ids = h.attachment_ids(&id).await;

    let request = EditRequest {
        listing_id: id.clone(),
        form: form(),
        remove: ids,
        files: photos(1),
    };
    let report = h.orchestrator.edit(&seller(), request).await.unwrap();
    assert_eq!(report.attached[0].display_order, 0);
    assert_eq!(h.orders(&id).await, vec![0]);
}

#[tokio::test]
async fn edit_updates_fields() {
    let h = Harness::new();
    let id = h.listing_with_photos(&seller(), 0).await;

    let mut edited = form();
    edited.kind = Some(ListingKind::Sale);
    edited.price = "3495000".into();
    edited.bedrooms = "0".into();
    let request = EditRequest {
        listing_id: id.clone(),
        form: edited,
        remove: vec![],
        files: vec![],
    };
    h.orchestrator.edit(&seller(), request).await.unwrap();

    let stored = h.records.snapshot(&id).await.unwrap();
    assert_eq!(stored.listing.fields.kind, ListingKind::Sale);
    assert_eq!(stored.listing.fields.price, 3_495_000.0);
    assert_eq!(stored.listing.fields.bedrooms, 0);
    assert!(stored.listing.fields.availability.is_empty());
}

#[tokio::test]
async fn edit_of_foreign_listing_mutates_nothing() {
    let h = Harness::new();
    let id = h.listing_with_photos(&seller(), 2).await;
    let ids = h.attachment_ids(&id).await;
    let before = h.records.snapshot(&id).await.unwrap();

    let mut edited = form();
    edited.title = "Hijacked listing title".into();
    let request = EditRequest {
        listing_id: id.clone(),
        form: edited,
        remove: vec![ids[0].clone()],
        files: photos(1),
    };
    let result = h
        .orchestrator
        .edit(&AuthContext::seller("seller-2"), request)
        .await;

    assert_matches!(result, Err(SubmissionError::NotFound));
    assert_eq!(h.records.snapshot(&id).await.unwrap(), before);
    assert_eq!(h.records.calls(StoreOperation::UpdateListing).await, 0);
    assert_eq!(h.blobs.calls(StoreOperation::Remove).await, 0);
    assert_eq!(h.blobs.object_count().await, 2);
}

#[tokio::test]
async fn edit_of_missing_listing_is_not_found() {
    let h = Harness::new();
    let request = EditRequest {
        listing_id: ListingId("404".into()),
        form: form(),
        remove: vec![],
        files: vec![],
    };
    assert_matches!(
        h.orchestrator.edit(&seller(), request).await,
        Err(SubmissionError::NotFound)
    );
}

#[tokio::test]
async fn edit_over_capacity_rejected_before_update() {
    let h = Harness::new();
    let id = h.listing_with_photos(&seller(), 4).await;

    let request = EditRequest {
        listing_id: id.clone(),
        form: form(),
        remove: vec![],
        files: photos(2),
    };
    assert_matches!(
        h.orchestrator.edit(&seller(), request).await,
        Err(SubmissionError::Capacity { limit: 5 })
    );
    assert_eq!(h.records.calls(StoreOperation::UpdateListing).await, 0);
    assert_eq!(h.orders(&id).await, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn edit_past_highest_order_rejected_before_update() {
    let h = Harness::new();
    let id = h.listing_with_photos(&seller(), 0).await;
    h.records
        .insert_attachment(&id, "https://cdn.test/listing-images/last.jpg", u32::MAX)
        .await
        .unwrap();

    let request = EditRequest {
        listing_id: id.clone(),
        form: form(),
        remove: vec![],
        files: photos(1),
    };
    assert_matches!(
        h.orchestrator.edit(&seller(), request).await,
        Err(SubmissionError::OrderOverflow)
    );
    assert_eq!(h.records.calls(StoreOperation::UpdateListing).await, 0);
    assert_eq!(h.blobs.calls(StoreOperation::Upload).await, 0);
}

#[tokio::test]
async fn failed_blob_delete_still_deletes_record() {
    let h = Harness::new();
    let id = h.listing_with_photos(&seller(), 2).await;
    let ids = h.attachment_ids(&id).await;
    h.blobs.fail(StoreOperation::Remove).await;

    let request = EditRequest {
        listing_id: id.clone(),
        form: form(),
        remove: vec![ids[0].clone()],
        files: vec![],
    };
    let report = h.orchestrator.edit(&seller(), request).await.unwrap();

    assert_eq!(report.removed, vec![ids[0].clone()]);
    assert_eq!(report.removal_failures.len(), 1);
    assert_eq!(report.removal_failures[0].error.operation, StoreOperation::Remove);
    assert!(report.is_partial());
    assert_eq!(h.orders(&id).await, vec![1]);
    // The blob is leaked
    assert_eq!(h.blobs.object_count().await, 2);
}

#[tokio::test]
async fn failed_record_delete_keeps_order_reserved() {
    let h = Harness::new();
    let id = h.listing_with_photos(&seller(), 2).await;
    let ids = h.attachment_ids(&id).await;
    h.records
        .fail_matching(StoreOperation::DeleteAttachment, ids[1].0.clone())
        .await;

    let request = EditRequest {
        listing_id: id.clone(),
        form: form(),
        remove: vec![ids[1].clone()],
        files: photos(1),
    };
    let report = h.orchestrator.edit(&seller(), request).await.unwrap();

    assert!(report.removed.is_empty());
    assert_eq!(
        report.removal_failures[0].error.operation,
        StoreOperation::DeleteAttachment
    );
    assert_eq!(report.attached[0].display_order, 2);
    assert_eq!(h.orders(&id).await, vec![0, 1, 2]);
}

#[tokio::test]
async fn unknown_removal_is_rejected() {
    let h = Harness::new();
    let id = h.listing_with_photos(&seller(), 1).await;

    let request = EditRequest {
        listing_id: id,
        form: form(),
        remove: vec![AttachmentId("img-999".into())],
        files: vec![],
    };
    assert_matches!(
        h.orchestrator.edit(&seller(), request).await,
        Err(SubmissionError::Validation { field: "remove", .. })
    );
    assert_eq!(h.records.calls(StoreOperation::UpdateListing).await, 0);
}

// ============================================================================
// Submission state
// ============================================================================

#[tokio::test]
async fn concurrent_submission_is_rejected() {
    let h = Harness::new();
    let auth = seller();
    let form = form();

    let (first, second) = tokio::join!(
        h.orchestrator.create(&auth, &form, photos(2)),
        h.orchestrator.create(&auth, &form, vec![]),
    );

    assert!(first.is_ok());
    assert_matches!(second, Err(SubmissionError::Busy));
    assert_eq!(h.records.listing_count().await, 1);
    assert_eq!(h.orchestrator.state(), SubmissionState::Done);
}

#[tokio::test]
async fn new_submission_allowed_after_failure() {
    let h = Harness::new();
    let mut bad = form();
    bad.title = "abc".into();
    assert!(h.orchestrator.create(&seller(), &bad, vec![]).await.is_err());
    assert!(h.orchestrator.create(&seller(), &form(), vec![]).await.is_ok());
}

#[tokio::test]
async fn dropped_submission_releases_orchestrator() {
    let h = Harness::new();
    let auth = seller();
    let form = form();

    // Uploads yield before completing, so one poll leaves the create in flight
    let pending = h.orchestrator.create(&auth, &form, photos(2)).now_or_never();
    assert!(pending.is_none());
    assert_eq!(h.orchestrator.state(), SubmissionState::Failed(FailureKind::Total));

    let report = h.orchestrator.create(&auth, &form, vec![]).await.unwrap();
    assert!(!report.is_partial());
    assert_eq!(h.orchestrator.state(), SubmissionState::Done);
}

#[tokio::test]
async fn state_reports_upload_progress() {
    let h = Harness::new();
    let mut rx = h.orchestrator.subscribe();
    let watcher = tokio::spawn(async move {
        let mut seen = Vec::new();
        while rx.changed().await.is_ok() {
            let state = *rx.borrow_and_update();
            seen.push(state);
            if matches!(state, SubmissionState::Done | SubmissionState::Failed(_)) {
                break;
            }
        }
        seen
    });

    h.orchestrator.create(&seller(), &form(), photos(2)).await.unwrap();
    let seen = watcher.await.unwrap();

    assert_eq!(seen.last(), Some(&SubmissionState::Done));
    assert!(!seen.iter().any(|s| matches!(s, SubmissionState::Failed(_))));
}

#[tokio::test]
async fn stager_feeds_orchestrator() {
    let h = Harness::new();
    let mut stager = ImageStager::new();
    stager.stage(photos(3)).await.unwrap();
    stager.unstage(0);

    let report = h
        .orchestrator
        .create(&seller(), &form(), stager.take())
        .await
        .unwrap();

    let names: Vec<&str> = report.attached.iter().map(|a| a.file_name.as_str()).collect();
    assert_eq!(names, vec!["photo1.jpg", "photo2.jpg"]);
    assert!(stager.is_empty());
}
