use crate::error::{StoreError, StoreOperation, StoreResult};
use crate::models::{
    Availability, AttachmentId, ImageAttachment, Listing, ListingFields, ListingId, ListingKind,
    ListingWithImages,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;
use uuid::Uuid;

/// Object-store key of an uploaded image: `{listing_id}/{random}.{ext}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobKey(pub String);

impl BlobKey {
    /// Fresh key for a file of `listing_id`.
    ///
    /// The random part keeps concurrent uploads from colliding; the
    /// file's extension is kept as given.
    pub fn for_file(listing_id: &ListingId, file_name: &str) -> Self {
        let suffix = Uuid::new_v4();
        match extension(file_name) {
            Some(ext) => Self(format!("{}/{}.{}", listing_id, suffix, ext)),
            None => Self(format!("{}/{}", listing_id, suffix)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn extension(file_name: &str) -> Option<String> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.contains('/') {
        return None;
    }
    Some(ext.to_string())
}

/// Row of the `listings` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub owner_id: String,
    pub title: String,
    pub description: String,
    pub kind: ListingKind,
    pub price: f64,
    pub location: String,
    pub bedrooms: u32,
    pub bathrooms: u32,
    pub area: Option<u32>,
    pub available_from: Option<NaiveDate>,
    pub available_to: Option<NaiveDate>,
    #[serde(default, skip_serializing)]
    pub listing_images: Vec<ImageRow>,
}

/// Row of the `listing_images` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub listing_id: String,
    pub url: String,
    pub display_order: u32,
}

impl ListingRow {
    pub fn new(owner_id: &str, fields: &ListingFields) -> Self {
        Self {
            id: None,
            owner_id: owner_id.to_string(),
            title: fields.title.clone(),
            description: fields.description.clone(),
            kind: fields.kind,
            price: fields.price,
            location: fields.location.clone(),
            bedrooms: fields.bedrooms,
            bathrooms: fields.bathrooms,
            area: fields.area,
            available_from: fields.availability.from,
            available_to: fields.availability.to,
            listing_images: Vec::new(),
        }
    }

    /// Convert a fetched row; images are sorted by display order.
    ///
    /// A row without an id cannot be counted, ordered or deleted, so it
    /// fails the whole fetch.
    pub fn into_listing(self) -> StoreResult<ListingWithImages> {
        let op = StoreOperation::FetchListing;
        let id = ListingId(
            self.id
                .ok_or_else(|| StoreError::new(op, "listing row has no id"))?,
        );
        let mut images = Vec::with_capacity(self.listing_images.len());
        for row in self.listing_images {
            let Some(image_id) = row.id else {
                warn!("Image row of listing {} has no id: {}", id, row.url);
                return Err(StoreError::new(
                    op,
                    format!("image row of listing {} has no id", id),
                ));
            };
            images.push(ImageAttachment {
                id: AttachmentId(image_id),
                listing_id: ListingId(row.listing_id),
                url: row.url,
                display_order: row.display_order,
            });
        }
        images.sort_by_key(|a| a.display_order);

        Ok(ListingWithImages {
            listing: Listing {
                id,
                owner_id: self.owner_id,
                fields: ListingFields {
                    title: self.title,
                    description: self.description,
                    kind: self.kind,
                    price: self.price,
                    location: self.location,
                    bedrooms: self.bedrooms,
                    bathrooms: self.bathrooms,
                    area: self.area,
                    availability: Availability {
                        from: self.available_from,
                        to: self.available_to,
                    },
                },
            },
            images,
        })
    }
}

/// Fields written on update; ownership and id never change
#[derive(Debug, Clone, Serialize)]
pub struct ListingUpdate<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub kind: ListingKind,
    pub price: f64,
    pub location: &'a str,
    pub bedrooms: u32,
    pub bathrooms: u32,
    pub area: Option<u32>,
    pub available_from: Option<NaiveDate>,
    pub available_to: Option<NaiveDate>,
}

impl<'a> From<&'a ListingFields> for ListingUpdate<'a> {
    fn from(fields: &'a ListingFields) -> Self {
        Self {
            title: &fields.title,
            description: &fields.description,
            kind: fields.kind,
            price: fields.price,
            location: &fields.location,
            bedrooms: fields.bedrooms,
            bathrooms: fields.bathrooms,
            area: fields.area,
            available_from: fields.availability.from,
            available_to: fields.availability.to,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_keeps_extension() {
        let listing = ListingId("42".into());
        let key = BlobKey::for_file(&listing, "Living Room.JPG");
        assert!(key.as_str().starts_with("42/"));
        assert!(key.as_str().ends_with(".JPG"));
        assert_ne!(key, BlobKey::for_file(&listing, "Living Room.JPG"));
    }

    #[test]
    fn key_without_extension() {
        let listing = ListingId("42".into());
        let key = BlobKey::for_file(&listing, "scan");
        assert!(!key.as_str()[3..].contains('.'));
        let hidden = BlobKey::for_file(&listing, ".profile");
        assert!(!hidden.as_str()[3..].contains('.'));
    }

    #[test]
    fn fetched_row_sorts_images() {
        let row: ListingRow = serde_json::from_value(json!({
            "id": "7",
            "owner_id": "seller-1",
            "title": "Sunny two room flat",
            "description": "Bright corner flat with a balcony facing the park.",
            "kind": "sale",
            "price": 5195000.0,
            "location": "Götgatan 120",
            "bedrooms": 2,
            "bathrooms": 1,
            "area": null,
            "available_from": null,
            "available_to": null,
            "listing_images": [
                {"id": "b", "listing_id": "7", "url": "u2", "display_order": 3},
                {"id": "a", "listing_id": "7", "url": "u1", "display_order": 0}
            ]
        }))
        .unwrap();

        let listing = row.into_listing().unwrap();
        assert_eq!(listing.listing.id, ListingId("7".into()));
        assert_eq!(listing.listing.fields.kind, ListingKind::Sale);
        let orders: Vec<u32> = listing.images.iter().map(|i| i.display_order).collect();
        assert_eq!(orders, vec![0, 3]);
    }

    #[test]
    fn image_row_without_id_fails_fetch() {
        let row: ListingRow = serde_json::from_value(json!({
            "id": "7",
            "owner_id": "seller-1",
            "title": "Sunny two room flat",
            "description": "Bright corner flat with a balcony facing the park.",
            "kind": "rent",
            "price": 1450.0,
            "location": "Götgatan 120",
            "bedrooms": 2,
            "bathrooms": 1,
            "area": null,
            "available_from": null,
            "available_to": null,
            "listing_images": [
                {"id": "a", "listing_id": "7", "url": "u1", "display_order": 0},
                {"listing_id": "7", "url": "u2", "display_order": 4}
            ]
        }))
        .unwrap();

        let err = row.into_listing().unwrap_err();
        assert_eq!(err.operation, StoreOperation::FetchListing);
    }

    #[test]
    fn new_row_omits_id_and_images() {
        let fields = ListingFields {
            title: "Sunny two room flat".into(),
            description: "Bright corner flat with a balcony facing the park.".into(),
            kind: ListingKind::Rent,
            price: 1450.0,
            location: "Götgatan 120".into(),
            bedrooms: 2,
            bathrooms: 1,
            area: Some(70),
            availability: Availability::default(),
        };
        let value = serde_json::to_value(ListingRow::new("seller-1", &fields)).unwrap();
        assert!(value.get("id").is_none());
        assert!(value.get("listing_images").is_none());
        assert_eq!(value["kind"], "rent");
        assert_eq!(value["owner_id"], "seller-1");
    }
}
