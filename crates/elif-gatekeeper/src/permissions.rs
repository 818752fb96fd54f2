//! Permission maps and their resolution into a single decision table
//!
//! A principal carries its own [`PermissionMap`]; each of its roles carries
//! another. [`PermissionSet`] folds them together and answers access queries
//! against keys such as `"user.create"`, wildcard keys such as `"user.*"` and
//! class-method groups such as `"Posts@create,update"`.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;
use wildmatch::WildMatchPattern;

/// `*` matches any run of characters; there is no single-character wildcard
type KeyPattern = WildMatchPattern<'*', '\0'>;

/// How the principal's own permissions combine with role permissions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionMode {
    /// The principal's own map has the final say for every key it defines
    #[default]
    Standard,
    /// A denial coming from any role cannot be re-opened by the principal
    Strict,
}

/// Ordered mapping of permission keys to grant (`true`) or revoke (`false`)
///
/// Absent keys are neither granted nor revoked. Re-inserting a key keeps its
/// original position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionMap {
    entries: Vec<(String, bool)>,
}

impl PermissionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: bool) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: bool) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<bool> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| *v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &str) -> Option<bool> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, bool)> for PermissionMap {
    fn from_iter<T: IntoIterator<Item = (K, bool)>>(iter: T) -> Self {
        let mut map = PermissionMap::new();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

impl<K: Into<String>, const N: usize> From<[(K, bool); N]> for PermissionMap {
    fn from(entries: [(K, bool); N]) -> Self {
        entries.into_iter().collect()
    }
}

impl Serialize for PermissionMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for PermissionMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PermissionMapVisitor;

        impl<'de> Visitor<'de> for PermissionMapVisitor {
            type Value = PermissionMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of permission keys to booleans")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut map = PermissionMap::new();
                while let Some((key, value)) = access.next_entry::<String, bool>()? {
                    map.insert(key, value);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(PermissionMapVisitor)
    }
}

/// Expand `"Name@m1,m2"` into `["Name@m1", "Name@m2"]`; other keys pass through
pub fn expand_class_permissions(key: &str) -> Vec<String> {
    match key.split_once('@') {
        Some((class, methods)) => methods
            .split(',')
            .map(|method| format!("{}@{}", class, method))
            .collect(),
        None => vec![key.to_string()],
    }
}

/// Fold `permissions` into `prepared`: absent keys opt in, present keys can
/// only be overridden by an explicit `false`.
fn prepare_permissions(prepared: &mut HashMap<String, bool>, permissions: &PermissionMap) {
    for (keys, value) in permissions.iter() {
        for key in expand_class_permissions(keys) {
            match prepared.get_mut(&key) {
                None => {
                    prepared.insert(key, value);
                }
                Some(existing) => {
                    if !value {
                        *existing = false;
                    }
                }
            }
        }
    }
}

/// A principal's own permissions merged with its role permissions
#[derive(Debug, Default)]
pub struct PermissionSet {
    permissions: PermissionMap,
    secondary: Vec<PermissionMap>,
    mode: PermissionMode,
    resolved: OnceLock<HashMap<String, bool>>,
}

impl Clone for PermissionSet {
    fn clone(&self) -> Self {
        Self::with_mode(self.permissions.clone(), self.secondary.clone(), self.mode)
    }
}

impl PermissionSet {
    /// Create a standard permission set
    pub fn new(permissions: PermissionMap, secondary: Vec<PermissionMap>) -> Self {
        Self::with_mode(permissions, secondary, PermissionMode::Standard)
    }

    /// Create a permission set with an explicit merge mode
    pub fn with_mode(
        permissions: PermissionMap,
        secondary: Vec<PermissionMap>,
        mode: PermissionMode,
    ) -> Self {
        Self {
            permissions,
            secondary,
            mode,
            resolved: OnceLock::new(),
        }
    }

    pub fn mode(&self) -> PermissionMode {
        self.mode
    }

    pub fn permissions(&self) -> &PermissionMap {
        &self.permissions
    }

    pub fn secondary_permissions(&self) -> &[PermissionMap] {
        &self.secondary
    }

    /// Returns true only if every key passes
    pub fn has_access<I, S>(&self, keys: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let prepared = self.resolved();
        keys.into_iter()
            .all(|key| Self::check_prepared(prepared, key.as_ref()))
    }

    /// Returns true if at least one key passes
    pub fn has_any_access<I, S>(&self, keys: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let prepared = self.resolved();
        keys.into_iter()
            .any(|key| Self::check_prepared(prepared, key.as_ref()))
    }

    /// Check a single key against the resolved table
    pub fn check_permission(&self, key: &str) -> bool {
        Self::check_prepared(self.resolved(), key)
    }

    /// The merged decision table, computed on first use
    pub fn resolved(&self) -> &HashMap<String, bool> {
        self.resolved.get_or_init(|| self.create_prepared_permissions())
    }

    pub fn set_permissions(&mut self, permissions: PermissionMap) {
        self.permissions = permissions;
        self.invalidate();
    }

    pub fn set_secondary_permissions(&mut self, secondary: Vec<PermissionMap>) {
        self.secondary = secondary;
        self.invalidate();
    }

    /// Add a key to the principal's own map unless it is already present
    pub fn add_permission(&mut self, key: impl Into<String>, value: bool) {
        let key = key.into();
        if !self.permissions.contains_key(&key) {
            self.permissions.insert(key, value);
            self.invalidate();
        }
    }

    /// Change an existing key, or create it when `create` is set
    pub fn update_permission(&mut self, key: impl Into<String>, value: bool, create: bool) {
        let key = key.into();
        if self.permissions.contains_key(&key) || create {
            self.permissions.insert(key, value);
            self.invalidate();
        }
    }

    pub fn remove_permission(&mut self, key: &str) {
        if self.permissions.remove(key).is_some() {
            self.invalidate();
        }
    }

    fn invalidate(&mut self) {
        self.resolved = OnceLock::new();
    }

    fn create_prepared_permissions(&self) -> HashMap<String, bool> {
        let mut prepared = HashMap::new();

        for permissions in &self.secondary {
            prepare_permissions(&mut prepared, permissions);
        }

        match self.mode {
            PermissionMode::Standard => {
                let mut own = HashMap::new();
                prepare_permissions(&mut own, &self.permissions);
                prepared.extend(own);
            }
            PermissionMode::Strict => prepare_permissions(&mut prepared, &self.permissions),
        }

        prepared
    }

    fn check_prepared(prepared: &HashMap<String, bool>, permission: &str) -> bool {
        if prepared.get(permission) == Some(&true) {
            return true;
        }

        prepared.iter().any(|(key, value)| {
            *value
                && (KeyPattern::new(permission).matches(key) || KeyPattern::new(key).matches(permission))
        })
    }
}
