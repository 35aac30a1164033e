//! fleetscale-state: policy model and storage for fleetscale.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for scaling policies, latest metric samples, and instance counts,
//! plus the parsing and validation rules every policy must pass.
//!
//! # Architecture
//!
//! Policies are stored as the raw JSON document the operator submitted and
//! are validated on the way in and on the way out. The [`PolicyStore`] trait
//! is the seam the scaling engine consumes; [`StateStore`] implements it,
//! and the `fakes` feature adds a recording test double.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
#[cfg(any(test, feature = "fakes"))]
pub mod fake;
pub mod policy_store;
pub mod store;
pub mod tables;
pub mod types;
pub mod validate;

pub use error::{StateError, StateResult};
pub use policy_store::PolicyStore;
pub use store::StateStore;
pub use types::*;
pub use validate::{PolicyWarning, lint, parse_policy, validate};
