use crate::config::StoreConfig;
use crate::error::{StoreError, StoreOperation, StoreResult};
use crate::gateways::traits::{BlobGateway, RecordGateway};
use crate::gateways::types::{BlobKey, ImageRow, ListingRow, ListingUpdate};
use crate::models::{AttachmentId, ListingFields, ListingId, ListingWithImages};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, Response};
use tracing::{debug, warn};

const LISTINGS_TABLE: &str = "listings";
const IMAGES_TABLE: &str = "listing_images";

/// Build the shared HTTP client for both gateways
pub fn build_client(config: &StoreConfig) -> Result<Client> {
    Client::builder()
        .timeout(config.timeout)
        .user_agent(concat!("listing-desk/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to create HTTP client")
}

fn authed(config: &StoreConfig, request: RequestBuilder) -> RequestBuilder {
    request
        .header("apikey", &config.api_key)
        .bearer_auth(&config.api_key)
}

/// Turn transport errors and non-2xx responses into a [`StoreError`]
async fn check(
    operation: StoreOperation,
    sent: reqwest::Result<Response>,
) -> StoreResult<Response> {
    let response = sent.map_err(|e| StoreError::new(operation, e.to_string()))?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    warn!("{} returned status {}: {}", operation, status, body);
    Err(StoreError::new(operation, format!("{}: {}", status, body)))
}

/// Relational gateway speaking the PostgREST dialect
pub struct RestRecordGateway {
    client: Client,
    config: StoreConfig,
}

impl RestRecordGateway {
    pub fn new(client: Client, config: StoreConfig) -> Self {
        Self { client, config }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.config.base_url, table)
    }
}

#[async_trait]
impl RecordGateway for RestRecordGateway {
    async fn create_listing(&self, owner_id: &str, fields: &ListingFields) -> StoreResult<ListingId> {
        let op = StoreOperation::CreateListing;
        let request = self
            .client
            .post(self.table_url(LISTINGS_TABLE))
            .header("Prefer", "return=representation")
            .json(&ListingRow::new(owner_id, fields));
        let response = check(op, authed(&self.config, request).send().await).await?;

        let rows: Vec<ListingRow> = response
            .json()
            .await
            .map_err(|e| StoreError::new(op, e.to_string()))?;
        let id = rows
            .into_iter()
            .next()
            .and_then(|row| row.id)
            .ok_or_else(|| StoreError::new(op, "insert returned no row"))?;
        debug!("Created listing {}", id);
        Ok(ListingId(id))
    }

    async fn update_listing(&self, id: &ListingId, fields: &ListingFields) -> StoreResult<()> {
        let request = self
            .client
            .patch(self.table_url(LISTINGS_TABLE))
            .query(&[("id", format!("eq.{}", id))])
            .json(&ListingUpdate::from(fields));
        check(
            StoreOperation::UpdateListing,
            authed(&self.config, request).send().await,
        )
        .await?;
        Ok(())
    }

    async fn fetch_listing(
        &self,
        id: &ListingId,
        owner_id: &str,
    ) -> StoreResult<Option<ListingWithImages>> {
        let op = StoreOperation::FetchListing;
        let request = self.client.get(self.table_url(LISTINGS_TABLE)).query(&[
            ("select", "*,listing_images(*)".to_string()),
            ("id", format!("eq.{}", id)),
            ("owner_id", format!("eq.{}", owner_id)),
        ]);
        let response = check(op, authed(&self.config, request).send().await).await?;

        let rows: Vec<ListingRow> = response
            .json()
            .await
            .map_err(|e| StoreError::new(op, e.to_string()))?;
        rows.into_iter().next().map(ListingRow::into_listing).transpose()
    }

    async fn insert_attachment(&self, listing_id: &ListingId, url: &str, order: u32) -> StoreResult<()> {
        let row = ImageRow {
            id: None,
            listing_id: listing_id.0.clone(),
            url: url.to_string(),
            display_order: order,
        };
        let request = self.client.post(self.table_url(IMAGES_TABLE)).json(&row);
        check(
            StoreOperation::InsertAttachment,
            authed(&self.config, request).send().await,
        )
        .await?;
        Ok(())
    }

    async fn delete_attachment(&self, id: &AttachmentId) -> StoreResult<()> {
        let request = self
            .client
            .delete(self.table_url(IMAGES_TABLE))
            .query(&[("id", format!("eq.{}", id))]);
        check(
            StoreOperation::DeleteAttachment,
            authed(&self.config, request).send().await,
        )
        .await?;
        Ok(())
    }
}

/// Object-store gateway for a single public bucket
pub struct RestBlobGateway {
    client: Client,
    config: StoreConfig,
}

impl RestBlobGateway {
    pub fn new(client: Client, config: StoreConfig) -> Self {
        Self { client, config }
    }

    fn object_url(&self, key: &BlobKey) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.config.base_url, self.config.bucket, key
        )
    }
}

#[async_trait]
impl BlobGateway for RestBlobGateway {
    async fn upload(&self, key: &BlobKey, bytes: Bytes) -> StoreResult<()> {
        let content_type = mime_guess::from_path(key.as_str())
            .first_or_octet_stream()
            .to_string();
        debug!("Uploading {} ({} bytes, {})", key, bytes.len(), content_type);

        let request = self
            .client
            .post(self.object_url(key))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header("x-upsert", "false")
            .body(bytes);
        check(
            StoreOperation::Upload,
            authed(&self.config, request).send().await,
        )
        .await?;
        Ok(())
    }

    fn resolve_public_url(&self, key: &BlobKey) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.config.base_url, self.config.bucket, key
        )
    }

    async fn remove(&self, key: &BlobKey) -> StoreResult<()> {
        let request = self.client.delete(self.object_url(key));
        check(
            StoreOperation::Remove,
            authed(&self.config, request).send().await,
        )
        .await?;
        Ok(())
    }

    fn key_for_url(&self, url: &str) -> Option<BlobKey> {
        let marker = format!("/{}/", self.config.bucket);
        let (_, key) = url.split_once(&marker)?;
        if key.is_empty() {
            return None;
        }
        Some(BlobKey(key.to_string()))
    }

    fn backend_name(&self) -> &'static str {
        "rest"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob_gateway() -> RestBlobGateway {
        let config = StoreConfig::new("https://store.example.com", "key");
        RestBlobGateway::new(Client::new(), config)
    }

    #[test]
    fn public_url_round_trips_to_key() {
        let gateway = blob_gateway();
        let key = BlobKey("42/abc.jpg".into());
        let url = gateway.resolve_public_url(&key);
        assert_eq!(
            url,
            "https://store.example.com/storage/v1/object/public/listing-images/42/abc.jpg"
        );
        assert_eq!(gateway.key_for_url(&url), Some(key));
    }

    #[test]
    fn foreign_url_has_no_key() {
        let gateway = blob_gateway();
        assert_eq!(gateway.key_for_url("https://elsewhere.test/x.jpg"), None);
        assert_eq!(
            gateway.key_for_url("https://store.example.com/storage/v1/object/public/listing-images/"),
            None
        );
    }

    #[test]
    fn record_urls() {
        let config = StoreConfig::new("https://store.example.com", "key");
        let gateway = RestRecordGateway::new(Client::new(), config);
        assert_eq!(
            gateway.table_url(IMAGES_TABLE),
            "https://store.example.com/rest/v1/listing_images"
        );
    }
}
