//! fedcluster-state: the member cluster registry.
//!
//! Backed by [redb](https://docs.rs/redb), stores one `ClusterRegistration`
//! per member cluster plus the credential secrets those registrations
//! reference.
//!
//! # Ownership
//!
//! A registration has two disjoint writers. Operators own `spec` and write
//! whole records through [`StateStore::create_cluster`] (insert if absent)
//! or [`StateStore::put_cluster`]; the reconciler owns
//! `status` and writes it through [`StateStore::update_cluster_status`],
//! which replaces the status subtree in a single write transaction. Readers
//! therefore always see every status field from the same reconciliation
//! pass.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
