//! Persisted key scheme for the durable store.
//!
//! | Key | Value |
//! |---|---|
//! | `rel:{type}:{id}` | [`RelationshipTuple`](crate::RelationshipTuple) |
//! | `role_def:{type}:{role}` | [`RoleDefinition`](crate::RoleDefinition) |
//! | `group_membership:user:{id}` | array of group-subject strings |
//!
//! Listing operations scan these prefixes; there are no secondary indexes.

use crate::models::Subject;

pub const REL_PREFIX: &str = "rel:";
pub const ROLE_DEF_PREFIX: &str = "role_def:";
pub const MEMBERSHIP_PREFIX: &str = "group_membership:";

pub fn relationship(resource_type: &str, object_id: &str) -> String {
    format!("{REL_PREFIX}{resource_type}:{object_id}")
}

pub fn relationship_prefix(resource_type: &str) -> String {
    format!("{REL_PREFIX}{resource_type}:")
}

pub fn role_definition(resource_type: &str, role: &str) -> String {
    format!("{ROLE_DEF_PREFIX}{resource_type}:{role}")
}

pub fn role_definition_prefix(resource_type: &str) -> String {
    format!("{ROLE_DEF_PREFIX}{resource_type}:")
}

pub fn membership(user: &Subject) -> String {
    format!("{MEMBERSHIP_PREFIX}{user}")
}

/// Split a `rel:{type}:{id}` key into `(type, id)`.
pub fn split_relationship(key: &str) -> Option<(&str, &str)> {
    key.strip_prefix(REL_PREFIX)?.split_once(':')
}

/// Extract the role name from a `role_def:{type}:{role}` key.
pub fn role_name<'a>(key: &'a str, resource_type: &str) -> Option<&'a str> {
    key.strip_prefix(ROLE_DEF_PREFIX)?
        .strip_prefix(resource_type)?
        .strip_prefix(':')
}

/// Extract the user-subject string from a `group_membership:...` key.
pub fn membership_user(key: &str) -> Option<&str> {
    key.strip_prefix(MEMBERSHIP_PREFIX)
}
