use crate::error::AccessError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

/// Current wall-clock time as epoch milliseconds.
pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// A subject eligible to hold a role: a user or a group.
///
/// Canonical string forms are `user:<id>` and `group:<name>`; parsing
/// enforces that shape, so a `Subject` value is always well-formed.
/// Serde round-trips through the string form, which lets subjects key the
/// JSON maps inside [`RelationshipTuple`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Subject {
    User(String),
    Group(String),
}

impl Subject {
    pub fn user(id: &str) -> Self {
        Subject::User(id.to_string())
    }

    pub fn group(name: &str) -> Self {
        Subject::Group(name.to_string())
    }

    /// Parse and validate a subject string (`user:<id>` or `group:<name>`).
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::InvalidSubject`] when the tag or the
    /// identifier does not match the expected shape.
    pub fn parse(s: &str) -> Result<Self, AccessError> {
        s.parse()
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Subject::User(_))
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Subject::Group(_))
    }

    /// The identifier without its tag.
    pub fn id(&self) -> &str {
        match self {
            Subject::User(id) | Subject::Group(id) => id,
        }
    }
}

fn valid_identifier(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'))
}

impl FromStr for Subject {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let subject = if let Some(id) = s.strip_prefix("user:") {
            Subject::User(id.to_string())
        } else if let Some(name) = s.strip_prefix("group:") {
            Subject::Group(name.to_string())
        } else {
            return Err(AccessError::InvalidSubject(s.to_string()));
        };

        if !valid_identifier(subject.id()) {
            return Err(AccessError::InvalidSubject(s.to_string()));
        }
        Ok(subject)
    }
}

impl TryFrom<String> for Subject {
    type Error = AccessError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Subject> for String {
    fn from(subject: Subject) -> Self {
        subject.to_string()
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::User(id) => write!(f, "user:{id}"),
            Subject::Group(name) => write!(f, "group:{name}"),
        }
    }
}

/// The fixed permission vocabulary.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    View,
    Create,
    Edit,
    Delete,
    Publish,
    Share,
    ManageRoles,
    ManageMembers,
}

impl Permission {
    pub const ALL: [Permission; 8] = [
        Permission::View,
        Permission::Create,
        Permission::Edit,
        Permission::Delete,
        Permission::Publish,
        Permission::Share,
        Permission::ManageRoles,
        Permission::ManageMembers,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::View => "view",
            Permission::Create => "create",
            Permission::Edit => "edit",
            Permission::Delete => "delete",
            Permission::Publish => "publish",
            Permission::Share => "share",
            Permission::ManageRoles => "manage_roles",
            Permission::ManageMembers => "manage_members",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .iter()
            .find(|p| p.as_str() == s)
            .copied()
            .ok_or_else(|| AccessError::UnknownPermission(s.to_string()))
    }
}

/// The per-object record of which subjects hold which roles.
///
/// `direct` maps user subjects to role names, `groups` maps group subjects
/// to role names; a subject holds at most one role per object and a new
/// grant overwrites the previous one. `expires_at` carries optional
/// epoch-millisecond expiries; an absent entry means the grant never
/// expires. Expired entries are filtered at read time, never purged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationshipTuple {
    #[serde(default)]
    pub direct: HashMap<Subject, String>,
    #[serde(default)]
    pub groups: HashMap<Subject, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub expires_at: HashMap<Subject, i64>,
}

impl RelationshipTuple {
    /// Record a grant, overwriting any previous role held by `subject`.
    pub fn grant(&mut self, subject: Subject, role: &str, expires_at: Option<i64>) {
        match expires_at {
            Some(at) => {
                self.expires_at.insert(subject.clone(), at);
            }
            None => {
                self.expires_at.remove(&subject);
            }
        }
        let map = match subject {
            Subject::User(_) => &mut self.direct,
            Subject::Group(_) => &mut self.groups,
        };
        map.insert(subject, role.to_string());
    }

    /// Remove any grant held by `subject`.
    pub fn revoke(&mut self, subject: &Subject) {
        self.direct.remove(subject);
        self.groups.remove(subject);
        self.expires_at.remove(subject);
    }

    /// The role `subject` holds on this object, if any and not expired
    /// as of `now_ms`.
    pub fn role_for(&self, subject: &Subject, now_ms: i64) -> Option<&str> {
        if self.is_expired(subject, now_ms) {
            return None;
        }
        let map = match subject {
            Subject::User(_) => &self.direct,
            Subject::Group(_) => &self.groups,
        };
        map.get(subject).map(String::as_str)
    }

    fn is_expired(&self, subject: &Subject, now_ms: i64) -> bool {
        match self.expires_at.get(subject) {
            Some(at) => *at <= now_ms,
            None => false,
        }
    }

    /// True when no subject holds any grant. An empty tuple may remain in
    /// storage; it confers no access.
    pub fn is_empty(&self) -> bool {
        self.direct.is_empty() && self.groups.is_empty()
    }
}

/// A named bundle of permissions plus the roles it inherits from, scoped
/// to one resource type. The inheritance graph may contain cycles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleDefinition {
    #[serde(default)]
    pub permissions: BTreeSet<Permission>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inherits: Vec<String>,
}

/// One role in a [`list_roles`](crate::AccessEngine::list_roles) listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleEntry {
    pub name: String,
    pub permissions: BTreeSet<Permission>,
    pub inherits: Vec<String>,
}

/// One grant in a [`get_user_roles`](crate::AccessEngine::get_user_roles)
/// listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRole {
    pub object_id: String,
    pub role: String,
    pub expires_at: Option<i64>,
}

/// Outcome of a permission check: the allow/deny decision plus the full
/// permission set the subject resolves to on the object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub allowed: bool,
    pub permissions: BTreeSet<Permission>,
    /// True when the decision was served from the result cache.
    pub cached: bool,
}

/// Cached form of a computed decision. Not authoritative: always
/// re-derivable from tuples and role definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedDecision {
    pub allowed: bool,
    pub permissions: BTreeSet<Permission>,
    /// Epoch milliseconds at computation time.
    pub computed_at: i64,
}

impl CachedDecision {
    /// Explicit freshness check layered over the cache's own expiry: the
    /// entry is trusted only while younger than `ttl_ms`.
    pub fn is_fresh(&self, now_ms: i64, ttl_ms: i64) -> bool {
        now_ms.saturating_sub(self.computed_at) < ttl_ms
    }
}
