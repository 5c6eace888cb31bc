//! Relationship-based access control engine for RelayHub
//!
//! This crate answers one question for the rest of the platform (may
//! subject S perform permission P on object (type, id)?) and administers
//! the roles, grants and groups behind that answer. It combines:
//!
//! - Relationship-based access control (ReBAC): per-object tuples relating
//!   user and group subjects to role names
//! - Role inheritance (RBAC-style): per-type role graphs expanded to full
//!   permission sets, tolerating cycles
//! - Group membership: grants to a group reach all of its members
//! - Time-bounded grants: epoch-millisecond expiries, filtered at read
//!   time (soft expiry)
//! - Multi-tier caching: per-kind TTLs with explicit point invalidation
//!   on writes, and a `bypass_cache` escape hatch for strong reads
//!
//! # Consistency
//!
//! The engine is not linearizable: a write followed immediately by a read
//! from a different caller may observe cached data for up to the relevant
//! TTL. Callers that need read-your-writes pass `bypass_cache` and accept
//! the added latency.
//!
//! # Example
//!
//! ```rust
//! use auth_rebac::{AccessEngine, Permission};
//! use kv_store::MemoryStore;
//! use std::collections::BTreeSet;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), auth_rebac::AccessError> {
//!     let engine = AccessEngine::new(Arc::new(MemoryStore::new()));
//!
//!     // Define roles: editors inherit everything viewers can do
//!     engine
//!         .define_role("blog", "viewer", BTreeSet::from([Permission::View]), vec![])
//!         .await?;
//!     engine
//!         .define_role(
//!             "blog",
//!             "editor",
//!             BTreeSet::from([Permission::Edit]),
//!             vec!["viewer".to_string()],
//!         )
//!         .await?;
//!
//!     // Grant and check
//!     engine
//!         .grant_role("user:alice", "blog", "b1", "editor", None)
//!         .await?;
//!
//!     let decision = engine
//!         .check_permission("user:alice", "blog", "b1", Permission::View, false)
//!         .await?;
//!     assert!(decision.allowed);
//!
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod check;
pub mod config;
pub mod engine;
pub mod error;
pub mod expand;
pub mod keys;
pub mod models;

pub use cache::{AuthzCache, GroupPermissionMap};
pub use config::{CacheConfig, EngineConfig};
pub use engine::AccessEngine;
pub use error::{AccessError, Result};
pub use models::{
    AccessDecision, CachedDecision, ObjectRole, Permission, RelationshipTuple, RoleDefinition,
    RoleEntry, Subject,
};
