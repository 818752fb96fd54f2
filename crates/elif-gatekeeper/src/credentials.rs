//! Login and registration credentials

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::{AuthError, AuthResult};

/// Key holding the plaintext password
pub const PASSWORD_FIELD: &str = "password";

/// A bag of credential fields, e.g. `{"email": ..., "password": ...}`
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials {
    fields: BTreeMap<String, String>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field insert
    pub fn with(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn password(&self) -> Option<&str> {
        self.get(PASSWORD_FIELD)
    }

    /// Password, or an `InvalidArgument` error when it is missing
    pub fn require_password(&self) -> AuthResult<&str> {
        self.password()
            .ok_or_else(|| AuthError::invalid_argument("You have not passed a [password]"))
    }

    /// First login field present in the credentials, as `(field, value)`
    pub fn login_field<'a>(&'a self, login_fields: &'a [String]) -> Option<(&'a str, &'a str)> {
        login_fields
            .iter()
            .find_map(|field| self.get(field).map(|value| (field.as_str(), value)))
    }

    /// Like [`Credentials::login_field`], failing when no login field is present
    pub fn require_login<'a>(&'a self, login_fields: &'a [String]) -> AuthResult<(&'a str, &'a str)> {
        self.login_field(login_fields).ok_or_else(|| {
            AuthError::invalid_argument(format!(
                "No [{}] credential was passed",
                login_fields.join("|")
            ))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for Credentials {
    fn from(fields: [(K, V); N]) -> Self {
        let mut credentials = Credentials::new();
        for (field, value) in fields {
            credentials.insert(field, value);
        }
        credentials
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (field, value) in &self.fields {
            if field == PASSWORD_FIELD {
                map.entry(field, &"[REDACTED]");
            } else {
                map.entry(field, value);
            }
        }
        map.finish()
    }
}
