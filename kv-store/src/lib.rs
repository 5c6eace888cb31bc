//! Key-value storage adapter for the RelayHub access engine
//!
//! This crate provides the narrow storage contract the authorization engine
//! is written against: typed read/write/scan access to a durable key-value
//! store. Keys and values are opaque strings (serialized records); the
//! adapter performs no validation and no retries; transport failures
//! propagate to the caller, who decides whether to retry.
//!
//! Two backends are provided:
//!
//! - [`MemoryStore`]: a process-local store backed by a concurrent map,
//!   used by tests and development setups
//! - [`RedisStore`]: a Redis-backed store for production deployments,
//!   using a shared connection manager that is safe for concurrent use
//!
//! # Example
//!
//! ```rust
//! use kv_store::{KeyValueStore, MemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), kv_store::StoreError> {
//!     let store = MemoryStore::new();
//!
//!     store.put("rel:blog:b1", "{}").await?;
//!     assert_eq!(store.get("rel:blog:b1").await?.as_deref(), Some("{}"));
//!
//!     let keys = store.list_by_prefix("rel:blog:").await?;
//!     assert_eq!(keys, vec!["rel:blog:b1".to_string()]);
//!
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod memory;
pub mod redis;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use crate::redis::RedisStore;

use async_trait::async_trait;

/// Storage contract used by the authorization engine.
///
/// All calls are asynchronous and may fail with a transport error. A
/// missing key is not an error: `get` returns `None` and the caller
/// substitutes its empty default.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch the value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value` under `key`, replacing any previous value.
    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove `key`. Removing an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// List all keys starting with `prefix`, in lexicographic order.
    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}
