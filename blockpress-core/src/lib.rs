#![doc = "blockpress-core: core pipeline library for blockpress."]

//! This crate holds the synchronisation pipeline: paginated block-tree retrieval,
//! rendering to HTML with list grouping, media relay with validation and
//! fallback, and the orchestration loop with retry, per-document failure
//! isolation and checkpointing.
//!
//! Remote services are reached only through the traits in [`contract`]; concrete
//! API clients live in the `blockpress` binary crate.
//!
//! # Usage
//! Build a [`synchronise::Synchroniser`] from client handles and a
//! [`config::SyncConfig`], then call `run()`.

pub mod backoff;
pub mod config;
pub mod contract;
pub mod error;
pub mod fetch;
pub mod media;
pub mod model;
pub mod render;
pub mod schema;
pub mod synchronise;
