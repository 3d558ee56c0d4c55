//! # Syncer Testing Utils
//!
//! Shared testing utilities for the sync scheduler crates: mock drivers,
//! recording storages, a fault-injecting store and a pre-wired fixture.
//!
//! ```toml
//! [dev-dependencies]
//! syncer-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
