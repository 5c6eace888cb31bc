//! Read-through cache layer.
//!
//! One cache per cached kind, each with its own TTL, all constructed once
//! and shared by the engine's collaborators. Entries are stored under
//! deterministic keys namespaced by kind; administrative writes delete the
//! exact entries they can affect. Computed decisions carry their own
//! timestamp and pass an explicit freshness check before being trusted,
//! guarding against a backend that returns entries slightly past their
//! nominal max-age.

use crate::config::CacheConfig;
use crate::models::{
    CachedDecision, Permission, RelationshipTuple, RoleDefinition, RoleEntry, Subject,
};
use moka::future::Cache;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Aggregated per-group permission sets, keyed by group-subject string.
pub type GroupPermissionMap = HashMap<String, BTreeSet<Permission>>;

pub struct AuthzCache {
    tuples: Cache<String, RelationshipTuple>,
    memberships: Cache<String, Vec<Subject>>,
    role_defs: Cache<String, RoleDefinition>,
    role_lists: Cache<String, Vec<RoleEntry>>,
    decisions: Cache<String, CachedDecision>,
    group_scans: Cache<String, Vec<Subject>>,
    group_permissions: Cache<String, GroupPermissionMap>,
    decision_ttl_ms: i64,
}

fn build<V: Clone + Send + Sync + 'static>(
    config: &CacheConfig,
    ttl: std::time::Duration,
) -> Cache<String, V> {
    Cache::builder()
        .max_capacity(config.max_entries)
        .time_to_live(ttl)
        .build()
}

impl AuthzCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            tuples: build(config, config.relationship_ttl),
            memberships: build(config, config.membership_ttl),
            role_defs: build(config, config.role_ttl),
            role_lists: build(config, config.role_ttl),
            decisions: build(config, config.decision_ttl),
            group_scans: build(config, config.group_scan_ttl),
            group_permissions: build(config, config.group_permissions_ttl),
            decision_ttl_ms: config.decision_ttl.as_millis() as i64,
        }
    }

    // =========================================================================
    // Cache keys
    // =========================================================================

    pub fn decision_key(
        user: &Subject,
        resource_type: &str,
        object_id: &str,
        permission: Permission,
    ) -> String {
        format!("perm:{user}:{resource_type}:{object_id}:{permission}")
    }

    pub fn role_list_key(resource_type: &str) -> String {
        format!("roles:{resource_type}")
    }

    pub const GROUPS_KEY: &'static str = "groups:all";

    pub fn group_members_key(group: &Subject) -> String {
        format!("group_members:{group}")
    }

    pub fn group_permissions_key(group: Option<&Subject>) -> String {
        match group {
            Some(group) => format!("group_permissions:{group}"),
            None => "group_permissions:*".to_string(),
        }
    }

    // =========================================================================
    // Relationship tuples (store key doubles as cache key)
    // =========================================================================

    pub async fn tuple(&self, key: &str) -> Option<RelationshipTuple> {
        self.tuples.get(key).await
    }

    pub async fn store_tuple(&self, key: String, tuple: RelationshipTuple) {
        self.tuples.insert(key, tuple).await;
    }

    pub async fn invalidate_tuple(&self, key: &str) {
        debug!(key, "invalidating relationship cache entry");
        self.tuples.invalidate(key).await;
    }

    // =========================================================================
    // Group memberships
    // =========================================================================

    pub async fn membership(&self, key: &str) -> Option<Vec<Subject>> {
        self.memberships.get(key).await
    }

    pub async fn store_membership(&self, key: String, groups: Vec<Subject>) {
        self.memberships.insert(key, groups).await;
    }

    pub async fn invalidate_membership(&self, key: &str) {
        debug!(key, "invalidating membership cache entry");
        self.memberships.invalidate(key).await;
    }

    // =========================================================================
    // Role definitions and listings
    // =========================================================================

    pub async fn role_definition(&self, key: &str) -> Option<RoleDefinition> {
        self.role_defs.get(key).await
    }

    pub async fn store_role_definition(&self, key: String, def: RoleDefinition) {
        self.role_defs.insert(key, def).await;
    }

    pub async fn role_list(&self, key: &str) -> Option<Vec<RoleEntry>> {
        self.role_lists.get(key).await
    }

    pub async fn store_role_list(&self, key: String, roles: Vec<RoleEntry>) {
        self.role_lists.insert(key, roles).await;
    }

    /// Drop both the definition entry and the per-type listing after a
    /// role write or delete.
    pub async fn invalidate_role(&self, def_key: &str, resource_type: &str) {
        debug!(def_key, resource_type, "invalidating role cache entries");
        self.role_defs.invalidate(def_key).await;
        self.role_lists
            .invalidate(&Self::role_list_key(resource_type))
            .await;
    }

    // =========================================================================
    // Computed decisions
    // =========================================================================

    /// A cached decision, only if it passes the explicit freshness check.
    pub async fn fresh_decision(&self, key: &str, now_ms: i64) -> Option<CachedDecision> {
        let decision = self.decisions.get(key).await?;
        if decision.is_fresh(now_ms, self.decision_ttl_ms) {
            Some(decision)
        } else {
            debug!(key, "cached decision past its ttl, discarding");
            None
        }
    }

    pub async fn store_decision(&self, key: String, decision: CachedDecision) {
        self.decisions.insert(key, decision).await;
    }

    // =========================================================================
    // Scan-derived group views
    // =========================================================================

    pub async fn group_scan(&self, key: &str) -> Option<Vec<Subject>> {
        self.group_scans.get(key).await
    }

    pub async fn store_group_scan(&self, key: String, subjects: Vec<Subject>) {
        self.group_scans.insert(key, subjects).await;
    }

    pub async fn group_permissions(&self, key: &str) -> Option<GroupPermissionMap> {
        self.group_permissions.get(key).await
    }

    pub async fn store_group_permissions(&self, key: String, map: GroupPermissionMap) {
        self.group_permissions.insert(key, map).await;
    }
}
