//! In-process gateways for local runs and tests.
//!
//! Both stores record how often each operation was attempted and can be
//! told to fail specific operations.

use crate::error::{StoreError, StoreOperation, StoreResult};
use crate::gateways::traits::{BlobGateway, RecordGateway};
use crate::gateways::types::BlobKey;
use crate::models::{
    AttachmentId, ImageAttachment, Listing, ListingFields, ListingId, ListingWithImages,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use tracing::debug;

/// Injected failures and call counts shared by both memory stores
#[derive(Debug, Default)]
struct Faults {
    always: HashSet<StoreOperation>,
    matching: Vec<(StoreOperation, String)>,
    calls: HashMap<StoreOperation, usize>,
}

impl Faults {
    /// Count the attempt and fail it if a rule matches `subject`
    fn attempt(&mut self, operation: StoreOperation, subject: &str) -> StoreResult<()> {
        *self.calls.entry(operation).or_default() += 1;
        let matched = self.always.contains(&operation)
            || self
                .matching
                .iter()
                .any(|(op, suffix)| *op == operation && subject.ends_with(suffix.as_str()));
        if matched {
            debug!("Injected failure for {} on {}", operation, subject);
            return Err(StoreError::new(operation, format!("injected failure for {}", subject)));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct RecordState {
    listings: HashMap<ListingId, Listing>,
    images: Vec<ImageAttachment>,
    next_id: u64,
    faults: Faults,
}

impl RecordState {
    fn next_id(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }
}

/// Relational store kept in memory
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    state: Mutex<RecordState>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call of `operation` fail
    pub async fn fail(&self, operation: StoreOperation) {
        self.state.lock().await.faults.always.insert(operation);
    }

    /// Fail `operation` when its subject ends with `suffix`.
    ///
    /// The subject is the image URL for inserts and the attachment id for deletes.
    pub async fn fail_matching(&self, operation: StoreOperation, suffix: impl Into<String>) {
        let mut state = self.state.lock().await;
        state.faults.matching.push((operation, suffix.into()));
    }

    pub async fn clear_failures(&self) {
        let mut state = self.state.lock().await;
        state.faults.always.clear();
        state.faults.matching.clear();
    }

    /// Number of attempted calls of `operation`, failed ones included
    pub async fn calls(&self, operation: StoreOperation) -> usize {
        let state = self.state.lock().await;
        state.faults.calls.get(&operation).copied().unwrap_or(0)
    }

    pub async fn listing_count(&self) -> usize {
        self.state.lock().await.listings.len()
    }

    /// Listing and images regardless of owner
    pub async fn snapshot(&self, id: &ListingId) -> Option<ListingWithImages> {
        let state = self.state.lock().await;
        let listing = state.listings.get(id)?.clone();
        Some(ListingWithImages {
            images: images_of(&state.images, id),
            listing,
        })
    }
}

fn images_of(images: &[ImageAttachment], id: &ListingId) -> Vec<ImageAttachment> {
    let mut found: Vec<ImageAttachment> = images
        .iter()
        .filter(|i| &i.listing_id == id)
        .cloned()
        .collect();
    found.sort_by_key(|i| i.display_order);
    found
}

#[async_trait]
impl RecordGateway for MemoryRecordStore {
    async fn create_listing(&self, owner_id: &str, fields: &ListingFields) -> StoreResult<ListingId> {
        let mut state = self.state.lock().await;
        state.faults.attempt(StoreOperation::CreateListing, owner_id)?;

        let id = ListingId(state.next_id());
        state.listings.insert(
            id.clone(),
            Listing {
                id: id.clone(),
                owner_id: owner_id.to_string(),
                fields: fields.clone(),
            },
        );
        Ok(id)
    }

    async fn update_listing(&self, id: &ListingId, fields: &ListingFields) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.faults.attempt(StoreOperation::UpdateListing, &id.0)?;

        match state.listings.get_mut(id) {
            Some(listing) => {
                listing.fields = fields.clone();
                Ok(())
            }
            None => Err(StoreError::new(
                StoreOperation::UpdateListing,
                format!("no listing {}", id),
            )),
        }
    }

    async fn fetch_listing(
        &self,
        id: &ListingId,
        owner_id: &str,
    ) -> StoreResult<Option<ListingWithImages>> {
        let mut state = self.state.lock().await;
        state.faults.attempt(StoreOperation::FetchListing, &id.0)?;

        let listing = match state.listings.get(id) {
            Some(listing) if listing.owner_id == owner_id => listing.clone(),
            _ => return Ok(None),
        };
        Ok(Some(ListingWithImages {
            images: images_of(&state.images, id),
            listing,
        }))
    }

    async fn insert_attachment(&self, listing_id: &ListingId, url: &str, order: u32) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.faults.attempt(StoreOperation::InsertAttachment, url)?;

        if !state.listings.contains_key(listing_id) {
            return Err(StoreError::new(
                StoreOperation::InsertAttachment,
                format!("foreign key violation: no listing {}", listing_id),
            ));
        }
        let id = AttachmentId(format!("img-{}", state.next_id()));
        state.images.push(ImageAttachment {
            id,
            listing_id: listing_id.clone(),
            url: url.to_string(),
            display_order: order,
        });
        Ok(())
    }

    async fn delete_attachment(&self, id: &AttachmentId) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.faults.attempt(StoreOperation::DeleteAttachment, &id.0)?;
        state.images.retain(|i| &i.id != id);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct BlobState {
    objects: HashMap<BlobKey, Bytes>,
    faults: Faults,
}

/// Object store kept in memory
#[derive(Debug)]
pub struct MemoryBlobStore {
    bucket: String,
    state: Mutex<BlobState>,
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_BUCKET)
    }
}

impl MemoryBlobStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            state: Mutex::new(BlobState::default()),
        }
    }

    pub async fn fail(&self, operation: StoreOperation) {
        self.state.lock().await.faults.always.insert(operation);
    }

    /// Fail `operation` for keys ending with `suffix`, e.g. an extension
    pub async fn fail_matching(&self, operation: StoreOperation, suffix: impl Into<String>) {
        let mut state = self.state.lock().await;
        state.faults.matching.push((operation, suffix.into()));
    }

    pub async fn clear_failures(&self) {
        let mut state = self.state.lock().await;
        state.faults.always.clear();
        state.faults.matching.clear();
    }

    pub async fn calls(&self, operation: StoreOperation) -> usize {
        let state = self.state.lock().await;
        state.faults.calls.get(&operation).copied().unwrap_or(0)
    }

    pub async fn contains(&self, key: &BlobKey) -> bool {
        self.state.lock().await.objects.contains_key(key)
    }

    pub async fn object_count(&self) -> usize {
        self.state.lock().await.objects.len()
    }

    fn url_prefix(&self) -> String {
        format!("memory://{}/", self.bucket)
    }
}

#[async_trait]
impl BlobGateway for MemoryBlobStore {
    async fn upload(&self, key: &BlobKey, bytes: Bytes) -> StoreResult<()> {
        // Let sibling uploads interleave the way network calls would
        tokio::task::yield_now().await;

        let mut state = self.state.lock().await;
        state.faults.attempt(StoreOperation::Upload, key.as_str())?;
        if state.objects.contains_key(key) {
            return Err(StoreError::new(
                StoreOperation::Upload,
                format!("object {} already exists", key),
            ));
        }
        state.objects.insert(key.clone(), bytes);
        Ok(())
    }

    fn resolve_public_url(&self, key: &BlobKey) -> String {
        format!("{}{}", self.url_prefix(), key)
    }

    async fn remove(&self, key: &BlobKey) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.faults.attempt(StoreOperation::Remove, key.as_str())?;
        state.objects.remove(key);
        Ok(())
    }

    fn key_for_url(&self, url: &str) -> Option<BlobKey> {
        let key = url.strip_prefix(&self.url_prefix())?;
        if key.is_empty() {
            return None;
        }
        Some(BlobKey(key.to_string()))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Availability, ListingKind};
    use assert_matches::assert_matches;

    fn fields() -> ListingFields {
        ListingFields {
            title: "Sunny two room flat".into(),
            description: "Bright corner flat with a balcony facing the park.".into(),
            kind: ListingKind::Rent,
            price: 1450.0,
            location: "Götgatan 120".into(),
            bedrooms: 2,
            bathrooms: 1,
            area: None,
            availability: Availability::default(),
        }
    }

    #[tokio::test]
    async fn fetch_hides_foreign_listings() {
        let store = MemoryRecordStore::new();
        let id = store.create_listing("seller-1", &fields()).await.unwrap();
        assert!(store.fetch_listing(&id, "seller-1").await.unwrap().is_some());
        assert!(store.fetch_listing(&id, "seller-2").await.unwrap().is_none());
        assert!(store
            .fetch_listing(&ListingId("missing".into()), "seller-1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn attachment_requires_listing() {
        let store = MemoryRecordStore::new();
        assert_matches!(
            store
                .insert_attachment(&ListingId("missing".into()), "memory://x/a.jpg", 0)
                .await,
            Err(StoreError { operation: StoreOperation::InsertAttachment, .. })
        );
    }

    #[tokio::test]
    async fn injected_failures_are_counted() {
        let store = MemoryRecordStore::new();
        store.fail(StoreOperation::CreateListing).await;
        assert!(store.create_listing("seller-1", &fields()).await.is_err());
        assert_eq!(store.calls(StoreOperation::CreateListing).await, 1);
        assert_eq!(store.listing_count().await, 0);

        store.clear_failures().await;
        assert!(store.create_listing("seller-1", &fields()).await.is_ok());
    }

    #[tokio::test]
    async fn blob_url_maps_back_to_key() {
        let blobs = MemoryBlobStore::default();
        let key = BlobKey("1/abc.png".into());
        blobs.upload(&key, Bytes::from_static(b"png")).await.unwrap();
        let url = blobs.resolve_public_url(&key);
        assert_eq!(url, "memory://listing-images/1/abc.png");
        assert_eq!(blobs.key_for_url(&url), Some(key.clone()));

        blobs.remove(&key).await.unwrap();
        assert!(!blobs.contains(&key).await);
    }

    #[tokio::test]
    async fn blob_failures_match_by_suffix() {
        let blobs = MemoryBlobStore::default();
        blobs.fail_matching(StoreOperation::Upload, ".png").await;
        assert!(blobs
            .upload(&BlobKey("1/a.png".into()), Bytes::new())
            .await
            .is_err());
        assert!(blobs
            .upload(&BlobKey("1/a.jpg".into()), Bytes::new())
            .await
            .is_ok());
        assert_eq!(blobs.calls(StoreOperation::Upload).await, 2);
        assert_eq!(blobs.object_count().await, 1);
    }
}
