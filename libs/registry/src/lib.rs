//! Remote registry access for onmetal images.
//!
//! [`RegistryClient`] speaks the OCI distribution API and authenticates with
//! credentials resolved from docker config files ([`CredentialStore`]). The
//! sync layer only depends on the [`Registry`] trait.

mod auth;
mod client;
mod error;
mod registry;

pub mod credentials;

pub use client::{RegistryClient, RegistryConfig};
pub use credentials::{Credential, CredentialStore};
pub use error::{CredentialLoadError, RegistryError};
pub use registry::Registry;
