//! cmdb-core: Shared types, type registry, feature packs, RBAC, and
//! configuration for GraphCMDB.
//!
//! - Node, label, and relationship types with runtime type definitions
//! - The [`TypeRegistry`](registry::TypeRegistry) populated from feature packs
//! - Feature-pack discovery, manifests, and dependency checks
//! - Permission catalog, users, and groups
//! - Configuration management and the shared error type

pub mod config;
pub mod error;
pub mod packs;
pub mod rbac;
pub mod registry;
pub mod types;

pub use error::CmdbError;
