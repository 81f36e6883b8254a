//! Persistence of managed entities.
//!
//! # Responsibility
//! - Define the `EntityStore` contract used by services.
//! - Translate predicates and sort descriptors into SQLite queries.
//!
//! # Invariants
//! - Every write goes through the owning `Context` and stays staged until
//!   that context commits.
//! - Attribute names are checked against the entity schema before they
//!   reach SQL.

pub mod entity_store;
