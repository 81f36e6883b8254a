//! Use-case services over the entity store.
//!
//! # Responsibility
//! - Get-or-create by attribute (`upsert`).
//! - Batch import and sync of raw records (`import`).
//! - Background execution with a single completion (`dispatch`, `result`).
//!
//! # Invariants
//! - Services stage writes through the store and commit at most once per
//!   call; `StageOnly` imports never commit.

pub mod dispatch;
pub mod import;
pub mod result;
pub mod upsert;
