//! Local content-addressable store for onmetal images.
//!
//! The store is an OCI image layout on disk. Blobs are addressed by digest and
//! written through a verify-then-rename ingest path; the [`Indexer`] maps tags
//! and digests to root descriptors.
//!
//! Many processes may share one store directory. Blob writes are safe to race
//! since a blob's content is fixed by its digest; index writes are serialized
//! with an advisory lock.

mod error;
mod index;
mod layout;
mod lock;
mod store;

pub use error::StoreError;
pub use index::{IndexEntry, Indexer};
pub use layout::Layout;
pub use store::{GcReport, Store};
