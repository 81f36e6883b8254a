//! Entity model: values, schemas, handles, records and filters.
//!
//! # Responsibility
//! - Define how a Rust type declares its attributes and identity.
//! - Define the storage-independent input and query shapes.
//!
//! # Invariants
//! - Every managed instance is identified by a permanent `ObjectId`.
//! - Identity attributes have a single fixed kind per entity.

pub mod entity;
pub mod predicate;
pub mod record;
pub mod schema;
pub mod value;
