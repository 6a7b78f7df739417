//! # annotation-extractor
//!
//! Collects the distinct annotation types used by the most depended-upon
//! packages of a Maven ecosystem.
//!
//! ## Architecture
//!
//! - **source**: Ranked package lists from a Neo4j dependency graph or a file
//! - **limiter**: Process-wide QPS throttle for the remote repository
//! - **repository**: Remote repository boundary and its Maven-over-HTTP implementation
//! - **retriever**: Version resolution and the fault-classifying download loop
//! - **classfile**: Streaming class-file reader that visits annotation attributes
//! - **scanner**: Archive walk collecting annotation descriptors, with optional caching
//! - **cache**: Persistent storage using LMDB for per-archive scan results
//! - **scan**: Local archive discovery
//! - **pipeline**: Top-N packages to one merged descriptor set
//! - **coordinate** / **version**: Maven coordinates, version ordering and ranges
//! - **descriptor**: Ordered descriptor set with union
//! - **shutdown**: Cooperative cancellation for waits and cooldowns

pub mod cache;
pub mod classfile;
pub mod cli;
pub mod config;
pub mod coordinate;
pub mod descriptor;
pub mod limiter;
pub mod logging;
pub mod pipeline;
pub mod repository;
pub mod retriever;
pub mod scan;
pub mod scanner;
pub mod shutdown;
pub mod source;
pub mod version;

#[cfg(test)]
mod testing;
