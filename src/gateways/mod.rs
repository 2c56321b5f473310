pub mod memory;
pub mod rest;
pub mod traits;
pub mod types;

pub use memory::{MemoryBlobStore, MemoryRecordStore};
pub use rest::{RestBlobGateway, RestRecordGateway};
pub use traits::{BlobGateway, RecordGateway};
pub use types::BlobKey;
