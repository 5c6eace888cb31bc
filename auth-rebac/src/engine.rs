use crate::cache::{AuthzCache, GroupPermissionMap};
use crate::check::PermissionChecker;
use crate::config::EngineConfig;
use crate::error::{AccessError, Result};
use crate::expand::RoleExpander;
use crate::keys;
use crate::models::{
    now_millis, AccessDecision, ObjectRole, Permission, RelationshipTuple, RoleDefinition,
    RoleEntry, Subject,
};
use futures::future::try_join_all;
use kv_store::KeyValueStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

/// Core access-control engine.
///
/// Owns the store handle, the cache layer and the check/expansion
/// collaborators. Safe for concurrent use from any number of call-sites;
/// constructed once, never torn down.
pub struct AccessEngine {
    store: Arc<dyn KeyValueStore>,
    cache: Arc<AuthzCache>,
    expander: Arc<RoleExpander>,
    checker: Arc<PermissionChecker>,
    config: EngineConfig,
}

impl AccessEngine {
    /// Create an engine over `store` with the default configuration.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    /// Create an engine with explicit configuration.
    pub fn with_config(store: Arc<dyn KeyValueStore>, config: EngineConfig) -> Self {
        let cache = Arc::new(AuthzCache::new(&config.cache));
        let expander = Arc::new(RoleExpander::new(store.clone(), cache.clone()));
        let checker = Arc::new(PermissionChecker::new(
            store.clone(),
            cache.clone(),
            expander.clone(),
        ));

        Self {
            store,
            cache,
            expander,
            checker,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // =============================================================================
    // Permission checks
    // =============================================================================

    /// May `user` perform `permission` on `(resource_type, object_id)`?
    ///
    /// Without `bypass_cache`, a previously computed decision may be
    /// served for up to the decision TTL; with it, the answer reflects
    /// the current store contents at the cost of extra latency.
    ///
    /// # Errors
    ///
    /// Validation failures (`user` not a well-formed user subject, unknown
    /// resource type, empty object id) are raised before any I/O; store
    /// and codec failures propagate unchanged.
    pub async fn check_permission(
        &self,
        user: &str,
        resource_type: &str,
        object_id: &str,
        permission: Permission,
        bypass_cache: bool,
    ) -> Result<AccessDecision> {
        let user = parse_user(user)?;
        self.ensure_known_type(resource_type)?;
        validate_object_id(object_id)?;

        self.checker
            .check(&user, resource_type, object_id, permission, bypass_cache)
            .await
    }

    // =============================================================================
    // Role administration
    // =============================================================================

    /// Define or replace a role for a resource type. Idempotent.
    pub async fn define_role(
        &self,
        resource_type: &str,
        role: &str,
        permissions: BTreeSet<Permission>,
        inherits: Vec<String>,
    ) -> Result<()> {
        self.ensure_known_type(resource_type)?;
        validate_role_name(role)?;
        for parent in &inherits {
            validate_role_name(parent)?;
        }

        let key = keys::role_definition(resource_type, role);
        let def = RoleDefinition {
            permissions,
            inherits,
        };
        self.write_json(&key, &def).await?;
        self.cache.invalidate_role(&key, resource_type).await;

        info!(resource_type, role, "role defined");
        Ok(())
    }

    /// Delete a role definition. Deleting an absent role is a successful
    /// no-op. Relationship tuples still naming the role are untouched;
    /// they resolve to zero permissions from now on.
    pub async fn delete_role(&self, resource_type: &str, role: &str) -> Result<()> {
        self.ensure_known_type(resource_type)?;
        validate_role_name(role)?;

        let key = keys::role_definition(resource_type, role);
        if self.store.get(&key).await?.is_none() {
            return Ok(());
        }

        self.store.delete(&key).await?;
        self.cache.invalidate_role(&key, resource_type).await;

        info!(resource_type, role, "role deleted");
        Ok(())
    }

    /// All roles defined for a resource type, sorted by name.
    pub async fn list_roles(&self, resource_type: &str) -> Result<Vec<RoleEntry>> {
        self.ensure_known_type(resource_type)?;

        let cache_key = AuthzCache::role_list_key(resource_type);
        if let Some(roles) = self.cache.role_list(&cache_key).await {
            return Ok(roles);
        }

        let def_keys = self
            .store
            .list_by_prefix(&keys::role_definition_prefix(resource_type))
            .await?;

        let fetches = def_keys.iter().map(|key| async move {
            let def = self.read_json::<RoleDefinition>(key).await?;
            Ok::<_, AccessError>(def.map(|d| (key.as_str(), d)))
        });

        let mut roles: Vec<RoleEntry> = try_join_all(fetches)
            .await?
            .into_iter()
            .flatten()
            .filter_map(|(key, def)| {
                let name = keys::role_name(key, resource_type)?;
                Some(RoleEntry {
                    name: name.to_string(),
                    permissions: def.permissions,
                    inherits: def.inherits,
                })
            })
            .collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));

        self.cache.store_role_list(cache_key, roles.clone()).await;
        Ok(roles)
    }

    // =============================================================================
    // Grants
    // =============================================================================

    /// Grant `role` on one object to a user or group subject, optionally
    /// expiring at `expires_at` (epoch milliseconds). A subject holds at
    /// most one role per object; a new grant overwrites the previous one.
    /// The object id `"*"` is accepted as an all-objects marker, though
    /// the check path does not consult wildcard tuples.
    pub async fn grant_role(
        &self,
        subject: &str,
        resource_type: &str,
        object_id: &str,
        role: &str,
        expires_at: Option<i64>,
    ) -> Result<()> {
        let subject = Subject::parse(subject)?;
        self.ensure_known_type(resource_type)?;
        validate_object_id(object_id)?;
        validate_role_name(role)?;

        self.apply_grant(&subject, resource_type, object_id, role, expires_at)
            .await
    }

    /// Revoke whatever role `subject` holds on the object. Revoking from
    /// an object with no tuple is a no-op; revoking the last grant leaves
    /// an empty tuple in storage, which confers no access.
    pub async fn revoke_role(
        &self,
        subject: &str,
        resource_type: &str,
        object_id: &str,
    ) -> Result<()> {
        let subject = Subject::parse(subject)?;
        self.ensure_known_type(resource_type)?;
        validate_object_id(object_id)?;

        let key = keys::relationship(resource_type, object_id);
        let Some(mut tuple) = self.read_json::<RelationshipTuple>(&key).await? else {
            self.cache.invalidate_tuple(&key).await;
            return Ok(());
        };

        tuple.revoke(&subject);
        self.write_json(&key, &tuple).await?;
        self.cache.invalidate_tuple(&key).await;

        info!(%subject, resource_type, object_id, "role revoked");
        Ok(())
    }

    /// Fan the single-object grant out concurrently across `object_ids`.
    ///
    /// Best-effort: there is no atomicity across objects and no
    /// compensation. When one grant fails, grants already applied stay
    /// applied, and the caller receives the first error with no per-id
    /// breakdown.
    pub async fn grant_role_to_many(
        &self,
        subject: &str,
        resource_type: &str,
        object_ids: &[String],
        role: &str,
        expires_at: Option<i64>,
    ) -> Result<()> {
        let subject = Subject::parse(subject)?;
        self.ensure_known_type(resource_type)?;
        validate_role_name(role)?;
        for object_id in object_ids {
            validate_object_id(object_id)?;
        }

        let grants = object_ids
            .iter()
            .map(|object_id| self.apply_grant(&subject, resource_type, object_id, role, expires_at));
        try_join_all(grants).await?;

        info!(
            %subject,
            resource_type,
            count = object_ids.len(),
            "bulk grant applied"
        );
        Ok(())
    }

    async fn apply_grant(
        &self,
        subject: &Subject,
        resource_type: &str,
        object_id: &str,
        role: &str,
        expires_at: Option<i64>,
    ) -> Result<()> {
        let key = keys::relationship(resource_type, object_id);
        let mut tuple = self
            .read_json::<RelationshipTuple>(&key)
            .await?
            .unwrap_or_default();

        tuple.grant(subject.clone(), role, expires_at);
        self.write_json(&key, &tuple).await?;
        self.cache.invalidate_tuple(&key).await;

        info!(%subject, resource_type, object_id, role, "role granted");
        Ok(())
    }

    // =============================================================================
    // Group membership
    // =============================================================================

    /// Add `user` to `group`, de-duplicating. Invalidates only that
    /// user's membership cache entry; decisions already cached for the
    /// user age out within the decision TTL.
    pub async fn add_to_group(&self, user: &str, group: &str) -> Result<()> {
        let user = parse_user(user)?;
        let group = parse_group(group)?;

        let key = keys::membership(&user);
        let mut groups = self
            .read_json::<Vec<Subject>>(&key)
            .await?
            .unwrap_or_default();

        if !groups.contains(&group) {
            groups.push(group.clone());
            self.write_json(&key, &groups).await?;
        }
        self.cache.invalidate_membership(&key).await;

        info!(%user, %group, "user added to group");
        Ok(())
    }

    /// Remove `user` from `group`. Removing a non-member is a no-op.
    pub async fn remove_from_group(&self, user: &str, group: &str) -> Result<()> {
        let user = parse_user(user)?;
        let group = parse_group(group)?;

        let key = keys::membership(&user);
        let Some(mut groups) = self.read_json::<Vec<Subject>>(&key).await? else {
            self.cache.invalidate_membership(&key).await;
            return Ok(());
        };

        let before = groups.len();
        groups.retain(|g| g != &group);
        if groups.len() != before {
            self.write_json(&key, &groups).await?;
        }
        self.cache.invalidate_membership(&key).await;

        info!(%user, %group, "user removed from group");
        Ok(())
    }

    /// Every group that appears in any user's membership list, sorted.
    /// Implemented as a full scan of the membership key-space.
    pub async fn list_groups(&self) -> Result<Vec<Subject>> {
        if let Some(groups) = self.cache.group_scan(AuthzCache::GROUPS_KEY).await {
            return Ok(groups);
        }

        let membership_keys = self.store.list_by_prefix(keys::MEMBERSHIP_PREFIX).await?;
        let fetches = membership_keys
            .iter()
            .map(|key| async move { self.read_json::<Vec<Subject>>(key).await });

        let mut seen: BTreeSet<Subject> = BTreeSet::new();
        for groups in try_join_all(fetches).await?.into_iter().flatten() {
            seen.extend(groups);
        }

        let groups: Vec<Subject> = seen.into_iter().collect();
        self.cache
            .store_group_scan(AuthzCache::GROUPS_KEY.to_string(), groups.clone())
            .await;
        Ok(groups)
    }

    /// Every user whose membership list contains `group`, sorted.
    /// Implemented as a full scan of the membership key-space.
    pub async fn get_group_members(&self, group: &str) -> Result<Vec<Subject>> {
        let group = parse_group(group)?;

        let cache_key = AuthzCache::group_members_key(&group);
        if let Some(members) = self.cache.group_scan(&cache_key).await {
            return Ok(members);
        }

        let membership_keys = self.store.list_by_prefix(keys::MEMBERSHIP_PREFIX).await?;
        let fetches = membership_keys.iter().map(|key| async move {
            let groups = self.read_json::<Vec<Subject>>(key).await?;
            Ok::<_, AccessError>((key.as_str(), groups.unwrap_or_default()))
        });

        let mut members: Vec<Subject> = Vec::new();
        for (key, groups) in try_join_all(fetches).await? {
            if !groups.contains(&group) {
                continue;
            }
            match keys::membership_user(key).map(Subject::parse) {
                Some(Ok(user)) => members.push(user),
                _ => warn!(key, "skipping malformed membership key"),
            }
        }
        members.sort();

        self.cache
            .store_group_scan(cache_key, members.clone())
            .await;
        Ok(members)
    }

    /// Expanded permission sets per group, keyed by group-subject string,
    /// optionally filtered to one group. Aggregated by scanning the
    /// entire relationship key-space and expanding each group's role
    /// under the object's type; expired grants are skipped.
    pub async fn get_group_permissions(&self, group: Option<&str>) -> Result<GroupPermissionMap> {
        let filter = group.map(parse_group).transpose()?;

        let cache_key = AuthzCache::group_permissions_key(filter.as_ref());
        if let Some(map) = self.cache.group_permissions(&cache_key).await {
            return Ok(map);
        }

        let rel_keys = self.store.list_by_prefix(keys::REL_PREFIX).await?;
        let fetches = rel_keys.iter().map(|key| async move {
            let tuple = self.read_json::<RelationshipTuple>(key).await?;
            Ok::<_, AccessError>((key.as_str(), tuple))
        });

        let now = now_millis();
        let mut map: GroupPermissionMap = HashMap::new();
        if let Some(ref group) = filter {
            map.entry(group.to_string()).or_default();
        }

        for (key, tuple) in try_join_all(fetches).await? {
            let Some(tuple) = tuple else { continue };
            let Some((resource_type, _)) = keys::split_relationship(key) else {
                continue;
            };

            for group in tuple.groups.keys() {
                if filter.as_ref().is_some_and(|f| f != group) {
                    continue;
                }
                let Some(role) = tuple.role_for(group, now) else {
                    continue;
                };
                let permissions = self
                    .expander
                    .expand(resource_type, vec![role.to_string()])
                    .await?;
                map.entry(group.to_string()).or_default().extend(permissions);
            }
        }

        self.cache
            .store_group_permissions(cache_key, map.clone())
            .await;
        Ok(map)
    }

    /// Direct (non-group) grants `user` holds across all objects of a
    /// type, sorted by object id. Uncached; scans the type's relationship
    /// key-space.
    pub async fn get_user_roles(&self, user: &str, resource_type: &str) -> Result<Vec<ObjectRole>> {
        let user = parse_user(user)?;
        self.ensure_known_type(resource_type)?;

        let rel_keys = self
            .store
            .list_by_prefix(&keys::relationship_prefix(resource_type))
            .await?;
        let fetches = rel_keys.iter().map(|key| async move {
            let tuple = self.read_json::<RelationshipTuple>(key).await?;
            Ok::<_, AccessError>((key.as_str(), tuple))
        });

        let mut roles: Vec<ObjectRole> = Vec::new();
        for (key, tuple) in try_join_all(fetches).await? {
            let Some(tuple) = tuple else { continue };
            let Some(role) = tuple.direct.get(&user) else {
                continue;
            };
            let Some((_, object_id)) = keys::split_relationship(key) else {
                continue;
            };
            roles.push(ObjectRole {
                object_id: object_id.to_string(),
                role: role.clone(),
                expires_at: tuple.expires_at.get(&user).copied(),
            });
        }
        roles.sort_by(|a, b| a.object_id.cmp(&b.object_id));
        Ok(roles)
    }

    // =============================================================================
    // Validation and codecs
    // =============================================================================

    fn ensure_known_type(&self, resource_type: &str) -> Result<()> {
        if self.config.is_known_type(resource_type) {
            Ok(())
        } else {
            Err(AccessError::UnknownResourceType(resource_type.to_string()))
        }
    }

    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(None);
        };
        let value = serde_json::from_str(&raw).map_err(|source| {
            warn!(key, "malformed record in store");
            AccessError::Codec {
                key: key.to_string(),
                source,
            }
        })?;
        Ok(Some(value))
    }

    async fn write_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value).map_err(|source| AccessError::Codec {
            key: key.to_string(),
            source,
        })?;
        self.store.put(key, &raw).await?;
        Ok(())
    }
}

fn parse_user(s: &str) -> Result<Subject> {
    let subject = Subject::parse(s)?;
    if !subject.is_user() {
        return Err(AccessError::InvalidSubject(format!(
            "expected a user subject, got: {s}"
        )));
    }
    Ok(subject)
}

fn parse_group(s: &str) -> Result<Subject> {
    let subject = Subject::parse(s)?;
    if !subject.is_group() {
        return Err(AccessError::InvalidSubject(format!(
            "expected a group subject, got: {s}"
        )));
    }
    Ok(subject)
}

fn validate_role_name(role: &str) -> Result<()> {
    let valid = !role.is_empty()
        && role
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'));
    if valid {
        Ok(())
    } else {
        Err(AccessError::InvalidRole(role.to_string()))
    }
}

fn validate_object_id(object_id: &str) -> Result<()> {
    if object_id.is_empty() {
        return Err(AccessError::InvalidObjectId(
            "object id must not be empty".to_string(),
        ));
    }
    Ok(())
}
