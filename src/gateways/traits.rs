use crate::error::StoreResult;
use crate::gateways::types::BlobKey;
use crate::models::{AttachmentId, ListingFields, ListingId, ListingWithImages};
use async_trait::async_trait;
use bytes::Bytes;

/// Relational store holding the `listings` and `listing_images` tables.
///
/// Every call is its own unit of work; nothing spans two calls.
#[async_trait]
pub trait RecordGateway: Send + Sync {
    /// Insert a listing row and return the id the store assigned
    async fn create_listing(&self, owner_id: &str, fields: &ListingFields) -> StoreResult<ListingId>;

    async fn update_listing(&self, id: &ListingId, fields: &ListingFields) -> StoreResult<()>;

    /// Fetch a listing with its images, only if `owner_id` owns it.
    ///
    /// `Ok(None)` covers both a missing listing and a foreign one.
    async fn fetch_listing(
        &self,
        id: &ListingId,
        owner_id: &str,
    ) -> StoreResult<Option<ListingWithImages>>;

    async fn insert_attachment(&self, listing_id: &ListingId, url: &str, order: u32) -> StoreResult<()>;

    async fn delete_attachment(&self, id: &AttachmentId) -> StoreResult<()>;
}

/// Key-addressed object storage with public URLs
#[async_trait]
pub trait BlobGateway: Send + Sync {
    async fn upload(&self, key: &BlobKey, bytes: Bytes) -> StoreResult<()>;

    fn resolve_public_url(&self, key: &BlobKey) -> String;

    async fn remove(&self, key: &BlobKey) -> StoreResult<()>;

    /// Recover the key behind a URL from [`BlobGateway::resolve_public_url`]
    fn key_for_url(&self, url: &str) -> Option<BlobKey>;

    /// Name of the backend, for logging
    fn backend_name(&self) -> &'static str;
}
