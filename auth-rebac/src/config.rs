use std::collections::HashSet;
use std::time::Duration;

/// Per-kind TTLs for the cache layer.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Relationship tuples.
    pub relationship_ttl: Duration,
    /// Group membership lists.
    pub membership_ttl: Duration,
    /// Role definitions and per-type role listings.
    pub role_ttl: Duration,
    /// Computed permission decisions.
    pub decision_ttl: Duration,
    /// Scan-derived group views (group listing, group members).
    pub group_scan_ttl: Duration,
    /// Aggregated per-group permission sets.
    pub group_permissions_ttl: Duration,
    /// Capacity bound applied to every cache.
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            relationship_ttl: Duration::from_secs(60),
            membership_ttl: Duration::from_secs(60),
            role_ttl: Duration::from_secs(300),
            decision_ttl: Duration::from_secs(120),
            group_scan_ttl: Duration::from_secs(60),
            group_permissions_ttl: Duration::from_secs(120),
            max_entries: 100_000,
        }
    }
}

/// Engine configuration: the closed resource-type namespace plus cache
/// tuning.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// The deployment-time set of object types the engine accepts.
    pub resource_types: HashSet<String>,
    pub cache: CacheConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let resource_types = ["user", "blog", "post", "media", "workspace"]
            .iter()
            .map(|t| t.to_string())
            .collect();
        Self {
            resource_types,
            cache: CacheConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Replace the resource-type namespace.
    pub fn with_resource_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resource_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_known_type(&self, resource_type: &str) -> bool {
        self.resource_types.contains(resource_type)
    }
}
