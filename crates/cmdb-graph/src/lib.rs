//! cmdb-graph: Storage for GraphCMDB.
//!
//! All node, relationship, audit, and feature-pack persistence flows
//! through the [`NodeStore`] trait. [`GraphClient`] implements it on Neo4j
//! with ad-hoc Cypher; [`MemoryStore`] keeps everything in process.

pub mod client;
pub mod memory;
pub mod mutations;
mod neo4j_store;
pub mod queries;
pub mod store;

pub use client::{GraphClient, GraphConfig, GraphError};
pub use memory::MemoryStore;
pub use store::{NodeStore, StoreAuditHook};
