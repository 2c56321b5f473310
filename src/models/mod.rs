use bytes::Bytes;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque listing id, assigned by the relational store on insert
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListingId(pub String);

/// Opaque attachment id, assigned by the relational store on insert
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttachmentId(pub String);

impl fmt::Display for ListingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether the property is offered for rent or for sale
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ListingKind {
    Rent,
    Sale,
}

/// Optional rent availability window
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Availability {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl Availability {
    pub fn is_empty(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }
}

/// Validated, normalized listing attributes as written to the store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListingFields {
    pub title: String,
    pub description: String,
    pub kind: ListingKind,
    pub price: f64,
    pub location: String,
    pub bedrooms: u32,
    pub bathrooms: u32,
    pub area: Option<u32>,
    pub availability: Availability,
}

/// Core listing data model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Listing {
    pub id: ListingId,
    pub owner_id: String,
    #[serde(flatten)]
    pub fields: ListingFields,
}

/// One persisted photo of a listing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageAttachment {
    pub id: AttachmentId,
    pub listing_id: ListingId,
    pub url: String,
    pub display_order: u32,
}

/// A listing together with its attachments, sorted by display order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListingWithImages {
    #[serde(flatten)]
    pub listing: Listing,
    pub images: Vec<ImageAttachment>,
}

/// Attachment produced by a successful upload and insert
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttachmentRef {
    pub file_name: String,
    pub url: String,
    pub display_order: u32,
}

/// Role tag supplied by the auth collaborator
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Seller,
    Buyer,
}

/// Identity of the caller, trusted as given
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: String,
    pub role: Role,
}

impl AuthContext {
    pub fn seller(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: Role::Seller,
        }
    }
}

/// Client-side preview of a staged image, in data URL form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preview {
    pub mime: String,
    pub data_url: String,
}

/// An image selected by the seller but not yet uploaded.
///
/// The preview is stored alongside the bytes so that a file and its
/// preview are always added and removed together.
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub file_name: String,
    pub bytes: Bytes,
    pub preview: Option<Preview>,
}

impl StagedFile {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
            preview: None,
        }
    }
}
