use crate::cache::AuthzCache;
use crate::error::{AccessError, Result};
use crate::keys;
use crate::models::{Permission, RoleDefinition};
use kv_store::KeyValueStore;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

/// Expands a set of directly-held role names into the full permission set
/// reachable through the per-type inheritance graph.
///
/// The walk is breadth-first with a visited set, so it terminates even
/// when role definitions inherit from each other in a cycle. A role name
/// with no definition contributes nothing: deleting a role's definition
/// revokes the meaning of every tuple that still references it.
pub struct RoleExpander {
    store: Arc<dyn KeyValueStore>,
    cache: Arc<AuthzCache>,
}

impl RoleExpander {
    pub fn new(store: Arc<dyn KeyValueStore>, cache: Arc<AuthzCache>) -> Self {
        Self { store, cache }
    }

    /// De-duplicated union of all permissions reachable from `roles`.
    pub async fn expand<I>(&self, resource_type: &str, roles: I) -> Result<BTreeSet<Permission>>
    where
        I: IntoIterator<Item = String>,
    {
        let mut permissions = BTreeSet::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = roles.into_iter().collect();

        while let Some(role) = queue.pop_front() {
            if !visited.insert(role.clone()) {
                continue;
            }

            let Some(def) = self.role_definition(resource_type, &role).await? else {
                debug!(resource_type, role, "role has no definition, skipping");
                continue;
            };

            permissions.extend(def.permissions.iter().copied());
            queue.extend(def.inherits.iter().cloned());
        }

        Ok(permissions)
    }

    /// Read-through fetch of one role definition.
    pub(crate) async fn role_definition(
        &self,
        resource_type: &str,
        role: &str,
    ) -> Result<Option<RoleDefinition>> {
        let key = keys::role_definition(resource_type, role);

        if let Some(def) = self.cache.role_definition(&key).await {
            return Ok(Some(def));
        }

        let Some(raw) = self.store.get(&key).await? else {
            return Ok(None);
        };

        let def: RoleDefinition = serde_json::from_str(&raw).map_err(|source| {
            warn!(%key, "malformed role definition in store");
            AccessError::Codec {
                key: key.clone(),
                source,
            }
        })?;

        self.cache.store_role_definition(key, def.clone()).await;
        Ok(Some(def))
    }
}
