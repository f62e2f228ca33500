//! DSE storage layer.
//!
//! Backend-agnostic storage abstractions for the DSE engine:
//! content-addressed blobs, immutable compiled-artifact rows, the mutable
//! active pointer per signature, and write-once predict receipts.
//!
//! In-memory fakes live in [`fakes`]; a filesystem blob backend in [`fs`].

pub mod error;
pub mod fakes;
pub mod fs;
pub mod traits;

pub use error::StorageError;
pub use fs::FsBlobStore;
pub use traits::{
    ActivePointerStore, ArtifactStore, BlobRef, BlobStore, ContentHash, PointerChange, ReceiptRow,
    ReceiptSink, StorageResult,
};
