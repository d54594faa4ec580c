//! # onmetal-oci
//!
//! Content model shared by the onmetal image store and registry sync.
//!
//! ## Contents
//!
//! - [`Digest`]: `algorithm:encoded` content hash with strict parsing
//! - [`Descriptor`]: digest + size + media type; the digest is its identity
//! - [`Manifest`] / [`ImageIndex`]: the manifest graph that links blobs
//! - [`Matcher`]: predicates used to search a store index
//! - [`Reference`]: `name[:tag][@digest]` container references
//!
//! ## Media types
//!
//! An onmetal image is an OCI manifest with one config blob and three layers:
//!
//! ```text
//! manifest ─┬─ config     application/vnd.onmetal.image.config.v1alpha1+json
//!           ├─ rootfs     application/vnd.onmetal.image.rootfs.v1alpha1.rootfs
//!           ├─ initramfs  application/vnd.onmetal.image.initramfs.v1alpha1.initramfs
//!           └─ kernel     application/vnd.onmetal.image.vmlinuz.v1alpha1.vmlinuz
//! ```

mod descriptor;
mod digest;
mod error;
mod manifest;
mod matcher;
mod reference;

pub mod media_type;

pub use descriptor::{ArtifactKind, Descriptor};
pub use digest::{Algorithm, Digest, Digester};
pub use error::{DigestError, ManifestError, ReferenceError};
pub use manifest::{Content, ImageIndex, Manifest, OnmetalImage};
pub use matcher::{DescriptorMatcher, Matcher};
pub use reference::{Reference, DEFAULT_DOMAIN, DEFAULT_TAG};

/// Streamed blob content, as read from a store or received from a registry.
pub type BlobStream = std::pin::Pin<
    Box<dyn futures_core::Stream<Item = std::io::Result<bytes::Bytes>> + Send + 'static>,
>;

/// Annotation carrying the tag of an image layout index entry.
pub const ANNOTATION_REF_NAME: &str = "org.opencontainers.image.ref.name";
