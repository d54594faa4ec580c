//! Test support for onmetal image crates.
//!
//! - [`FakeRegistry`]: in-memory [`Registry`](onmetal_registry::Registry)
//!   with fetch counters and failure injection
//! - [`ImageFixture`] / [`IndexFixture`]: onmetal images with known content

mod fixtures;
mod registry;

pub use fixtures::{ImageFixture, IndexFixture};
pub use registry::FakeRegistry;
