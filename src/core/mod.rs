//! Controller internals
//!
//! - [`uid`] - UID blocks and ranges with their string forms
//! - [`mcs`] - MCS security labels derived from blocks
//! - [`allocator`] - Bitmap and block allocator over a UID range
//! - [`store`] - Versioned range allocation record
//! - [`namespace`] - Namespace objects, annotations and the namespace API
//! - [`patch`] - JSON merge patches for namespace writes
//! - [`audit`] - Events for operators
//! - [`engine`] - Allocation of a block to one namespace
//! - [`repair`] - Rebuilding the allocation record from namespaces
//! - [`queue`] - Work queue with de-duplication and backoff
//! - [`controller`] - The single-worker loop tying it together
//! - [`config`] - TOML configuration

pub mod allocator;
pub mod audit;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod mcs;
pub mod namespace;
pub mod patch;
pub mod queue;
pub mod repair;
pub mod store;
pub mod uid;

#[cfg(test)]
mod integration_tests;
