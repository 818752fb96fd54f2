//! Records exchanged with the stores: users, roles and activations

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::permissions::{PermissionMap, PermissionSet};
use crate::traits::Principal;

/// Default user record used by the in-memory stores
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    /// Unique user identifier
    pub id: String,

    /// Login name
    pub email: String,

    /// Stored password hash
    #[serde(skip_serializing, default)]
    pub password: String,

    /// Assigned role ids, highest precedence first
    #[serde(default)]
    pub roles: Vec<String>,

    /// The user's own permissions
    #[serde(default)]
    pub permissions: PermissionMap,

    pub first_name: Option<String>,

    pub last_name: Option<String>,

    pub last_login: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(id: impl Into<String>, email: impl Into<String>, password_hash: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            email: email.into(),
            password: password_hash.into(),
            roles: vec![],
            permissions: PermissionMap::new(),
            first_name: None,
            last_name: None,
            last_login: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Assign a role (no-op when already assigned)
    pub fn add_role(&mut self, role_id: impl Into<String>) {
        let role_id = role_id.into();
        if !self.roles.contains(&role_id) {
            self.roles.push(role_id);
            self.updated_at = Utc::now();
        }
    }

    pub fn remove_role(&mut self, role_id: &str) {
        if let Some(pos) = self.roles.iter().position(|r| r == role_id) {
            self.roles.remove(pos);
            self.updated_at = Utc::now();
        }
    }
}

impl Principal for User {
    fn id(&self) -> &str {
        &self.id
    }

    fn login(&self) -> &str {
        &self.email
    }

    fn credential_hash(&self) -> &str {
        &self.password
    }

    fn role_ids(&self) -> Vec<String> {
        self.roles.clone()
    }

    fn permissions(&self) -> PermissionMap {
        self.permissions.clone()
    }
}

/// Represents a role whose permissions are inherited by its users
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Role {
    /// Unique role identifier
    pub id: String,

    /// URL-safe role name used for lookups
    pub slug: String,

    /// Human-readable role name
    pub name: String,

    /// Permissions granted or revoked for every user in the role
    #[serde(default)]
    pub permissions: PermissionMap,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Role {
    /// Create a new role
    pub fn new(id: impl Into<String>, slug: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            slug: slug.into(),
            name: name.into(),
            permissions: PermissionMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder-style permission insert
    pub fn with_permission(mut self, key: impl Into<String>, value: bool) -> Self {
        self.permissions.insert(key, value);
        self
    }

    /// Add a permission unless it is already present
    pub fn add_permission(&mut self, key: impl Into<String>, value: bool) {
        let key = key.into();
        if !self.permissions.contains_key(&key) {
            self.permissions.insert(key, value);
            self.updated_at = Utc::now();
        }
    }

    /// Change an existing permission, or create it when `create` is set
    pub fn update_permission(&mut self, key: impl Into<String>, value: bool, create: bool) {
        let key = key.into();
        if self.permissions.contains_key(&key) || create {
            self.permissions.insert(key, value);
            self.updated_at = Utc::now();
        }
    }

    /// Remove a permission from this role
    pub fn remove_permission(&mut self, key: &str) {
        if self.permissions.remove(key).is_some() {
            self.updated_at = Utc::now();
        }
    }

    /// Check the role's own permissions
    pub fn has_access<I, S>(&self, keys: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        PermissionSet::new(self.permissions.clone(), vec![]).has_access(keys)
    }
}

/// An account activation record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Activation {
    pub user_id: String,

    /// Code the user must present to complete activation
    pub code: String,

    pub completed: bool,

    pub completed_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

impl Activation {
    pub fn new(user_id: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            code: code.into(),
            completed: false,
            completed_at: None,
            created_at: Utc::now(),
        }
    }

    /// Whether a pending activation is older than `expires` seconds
    ///
    /// An expiry too large to represent never elapses.
    pub fn is_expired(&self, expires: u64) -> bool {
        let Some(expires) = i64::try_from(expires).ok().and_then(Duration::try_seconds) else {
            return false;
        };
        !self.completed && Utc::now().signed_duration_since(self.created_at) > expires
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_permission_management() {
        let mut role = Role::new("2", "editor", "Content Editor");

        role.add_permission("articles.create", true);
        role.add_permission("articles.edit", true);
        assert!(role.has_access(["articles.create", "articles.edit"]));
        assert!(!role.has_access(["articles.delete"]));

        role.update_permission("articles.edit", false, false);
        assert!(!role.has_access(["articles.edit"]));

        role.remove_permission("articles.edit");
        assert!(!role.permissions.contains_key("articles.edit"));
    }

    #[test]
    fn test_user_role_assignment() {
        let mut user = User::new("1", "jane@example.com", "hash");
        user.add_role("admin");
        user.add_role("admin");
        user.add_role("editor");
        assert_eq!(user.role_ids(), vec!["admin", "editor"]);

        user.remove_role("admin");
        assert_eq!(user.role_ids(), vec!["editor"]);
    }

    #[test]
    fn test_user_serialization_hides_password() {
        let user = User::new("1", "jane@example.com", "$argon2id$secret");
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("argon2id"));
    }

    #[test]
    fn test_activation_expiry() {
        let mut activation = Activation::new("1", "code");
        assert!(!activation.is_expired(60));

        activation.created_at = Utc::now() - Duration::seconds(120);
        assert!(activation.is_expired(60));

        activation.completed = true;
        assert!(!activation.is_expired(60));
    }

    #[test]
    fn test_unbounded_expiry_never_elapses() {
        let mut activation = Activation::new("1", "code");
        activation.created_at = Utc::now() - Duration::days(365);

        assert!(!activation.is_expired(u64::MAX));
        assert!(!activation.is_expired(i64::MAX as u64));
        assert!(activation.is_expired(60));
    }
}
