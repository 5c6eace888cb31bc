use crate::cache::AuthzCache;
use crate::error::{AccessError, Result};
use crate::expand::RoleExpander;
use crate::keys;
use crate::models::{now_millis, AccessDecision, CachedDecision, Permission, RelationshipTuple, Subject};
use kv_store::KeyValueStore;
use std::sync::Arc;
use tracing::{debug, warn};

/// Orchestrates a single permission check: decision-cache probe, group
/// membership and tuple fetch, candidate-role collection with soft
/// expiry, role expansion, and decision caching.
pub struct PermissionChecker {
    store: Arc<dyn KeyValueStore>,
    cache: Arc<AuthzCache>,
    expander: Arc<RoleExpander>,
}

impl PermissionChecker {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        cache: Arc<AuthzCache>,
        expander: Arc<RoleExpander>,
    ) -> Self {
        Self {
            store,
            cache,
            expander,
        }
    }

    /// May `user` perform `permission` on `(resource_type, object_id)`?
    ///
    /// With `bypass_cache` the decision cache is skipped and the answer
    /// reflects the current store contents; without it a previously
    /// computed decision may be served for up to the decision TTL.
    pub async fn check(
        &self,
        user: &Subject,
        resource_type: &str,
        object_id: &str,
        permission: Permission,
        bypass_cache: bool,
    ) -> Result<AccessDecision> {
        let decision_key = AuthzCache::decision_key(user, resource_type, object_id, permission);
        let now = now_millis();

        if !bypass_cache {
            if let Some(hit) = self.cache.fresh_decision(&decision_key, now).await {
                debug!(%user, resource_type, object_id, %permission, "decision cache hit");
                return Ok(AccessDecision {
                    allowed: hit.allowed,
                    permissions: hit.permissions,
                    cached: true,
                });
            }
        }

        // The two inputs are independent; fetch them concurrently.
        let (memberships, tuple) = tokio::try_join!(
            self.memberships(user),
            self.tuple(resource_type, object_id),
        )?;

        let mut candidates: Vec<String> = Vec::new();
        if let Some(role) = tuple.role_for(user, now) {
            candidates.push(role.to_string());
        }
        for group in &memberships {
            if let Some(role) = tuple.role_for(group, now) {
                candidates.push(role.to_string());
            }
        }

        let permissions = self.expander.expand(resource_type, candidates).await?;
        let allowed = permissions.contains(&permission);

        debug!(
            %user,
            resource_type,
            object_id,
            %permission,
            allowed,
            "permission check computed"
        );

        self.cache
            .store_decision(
                decision_key,
                CachedDecision {
                    allowed,
                    permissions: permissions.clone(),
                    computed_at: now,
                },
            )
            .await;

        Ok(AccessDecision {
            allowed,
            permissions,
            cached: false,
        })
    }

    /// Read-through fetch of an object's relationship tuple. An absent
    /// tuple is an empty tuple: no implicit access.
    pub(crate) async fn tuple(
        &self,
        resource_type: &str,
        object_id: &str,
    ) -> Result<RelationshipTuple> {
        let key = keys::relationship(resource_type, object_id);

        if let Some(tuple) = self.cache.tuple(&key).await {
            return Ok(tuple);
        }

        let Some(raw) = self.store.get(&key).await? else {
            return Ok(RelationshipTuple::default());
        };

        let tuple: RelationshipTuple = serde_json::from_str(&raw).map_err(|source| {
            warn!(%key, "malformed relationship tuple in store");
            AccessError::Codec {
                key: key.clone(),
                source,
            }
        })?;

        self.cache.store_tuple(key, tuple.clone()).await;
        Ok(tuple)
    }

    /// Read-through fetch of a user's group memberships. An absent list
    /// is an empty list.
    pub(crate) async fn memberships(&self, user: &Subject) -> Result<Vec<Subject>> {
        let key = keys::membership(user);

        if let Some(groups) = self.cache.membership(&key).await {
            return Ok(groups);
        }

        let Some(raw) = self.store.get(&key).await? else {
            return Ok(Vec::new());
        };

        let groups: Vec<Subject> = serde_json::from_str(&raw).map_err(|source| {
            warn!(%key, "malformed membership list in store");
            AccessError::Codec {
                key: key.clone(),
                source,
            }
        })?;

        self.cache.store_membership(key, groups.clone()).await;
        Ok(groups)
    }
}
