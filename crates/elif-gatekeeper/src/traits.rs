//! Contracts the engine consumes from its collaborators
//!
//! User lookup, session persistence, activation records, throttle events and
//! roles are owned by the surrounding application. Implementations are
//! injected into [`crate::AuthSession`] and the checkpoints at construction.

use async_trait::async_trait;
use std::fmt::Debug;

use crate::credentials::Credentials;
use crate::models::{Activation, Role};
use crate::permissions::PermissionMap;
use crate::throttle::ThrottleEvent;
use crate::{AuthResult, ThrottleScope};
use chrono::{DateTime, Utc};

/// An identity the engine can make decisions about
pub trait Principal: Clone + Send + Sync + Debug + 'static {
    /// Stable unique identifier
    fn id(&self) -> &str;

    /// Login name (email, username...)
    fn login(&self) -> &str;

    /// Stored credential hash
    fn credential_hash(&self) -> &str;

    /// Identifiers of the roles assigned to this principal, in precedence order
    fn role_ids(&self) -> Vec<String> {
        vec![]
    }

    /// The principal's own permission map
    fn permissions(&self) -> PermissionMap {
        PermissionMap::new()
    }
}

/// User lookup and bookkeeping
#[async_trait]
pub trait UserStore<P: Principal>: Send + Sync {
    /// Find a user by its identifier
    async fn find_by_id(&self, id: &str) -> AuthResult<Option<P>>;

    /// Find a user by the login fields in the credentials
    async fn find_by_credentials(&self, credentials: &Credentials) -> AuthResult<Option<P>>;

    /// Find the user a persisted session token belongs to
    async fn find_by_session_token(&self, token: &str) -> AuthResult<Option<P>>;

    /// Check the credentials' password against the user's stored hash
    async fn validate_credentials(&self, principal: &P, credentials: &Credentials) -> AuthResult<bool>;

    /// Check that the credentials carry everything needed to create a user
    async fn valid_for_creation(&self, credentials: &Credentials) -> AuthResult<bool>;

    /// Create a user from registration credentials
    async fn create(&self, credentials: &Credentials) -> AuthResult<P>;

    /// Called after a successful login
    async fn record_login(&self, principal: &P) -> AuthResult<()>;

    /// Called after a logout
    async fn record_logout(&self, principal: &P) -> AuthResult<()>;
}

/// Session/cookie token persistence
#[async_trait]
pub trait PersistenceStore<P: Principal>: Send + Sync {
    /// Token carried by the current session, if any
    async fn current_token(&self) -> AuthResult<Option<String>>;

    /// Persist a new token for the principal and make it current
    async fn persist(&self, principal: &P, remember: bool) -> AuthResult<String>;

    /// Drop the current token
    async fn forget(&self) -> AuthResult<()>;

    /// Drop every token belonging to the principal
    async fn flush_all(&self, principal: &P) -> AuthResult<()>;
}

/// Account activation records
#[async_trait]
pub trait ActivationStore<P: Principal>: Send + Sync {
    /// Whether the principal has a completed activation
    async fn is_completed(&self, principal: &P) -> AuthResult<bool>;

    /// Start a new activation for the principal
    async fn create(&self, principal: &P) -> AuthResult<Activation>;

    /// Find a pending, unexpired activation, optionally matching a code
    async fn exists(&self, principal: &P, code: Option<&str>) -> AuthResult<Option<Activation>>;

    /// Complete a pending activation; false when the code does not match
    async fn complete(&self, principal: &P, code: &str) -> AuthResult<bool>;

    /// Remove the principal's activation records
    async fn remove(&self, principal: &P) -> AuthResult<bool>;

    /// Remove pending activations past their expiry
    async fn remove_expired(&self) -> AuthResult<usize>;
}

/// Failed-attempt event log
#[async_trait]
pub trait ThrottleStore: Send + Sync {
    /// Events of one scope recorded at or after `since`, oldest first.
    /// `key` is the IP address or user id for keyed scopes.
    async fn events_in_window(
        &self,
        scope: ThrottleScope,
        key: Option<&str>,
        since: DateTime<Utc>,
    ) -> AuthResult<Vec<ThrottleEvent>>;

    /// Append one event
    async fn append(&self, event: ThrottleEvent) -> AuthResult<()>;
}

/// Role lookup
#[async_trait]
pub trait RoleStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> AuthResult<Option<Role>>;

    async fn find_by_slug(&self, slug: &str) -> AuthResult<Option<Role>>;
}

/// External second-factor verification (TOTP, WebAuthn, ...)
#[async_trait]
pub trait SecondFactorVerifier<P: Principal>: Send + Sync {
    /// Whether the principal has satisfied its second factor for this attempt
    async fn is_satisfied(&self, principal: &P) -> AuthResult<bool>;
}

/// Password hasher trait for different hashing algorithms
pub trait Hasher: Send + Sync {
    /// Hash a plaintext value
    fn hash(&self, plaintext: &str) -> AuthResult<String>;

    /// Verify a plaintext value against its hash
    fn check(&self, plaintext: &str, hash: &str) -> AuthResult<bool>;

    /// Get the hasher name
    fn hasher_name(&self) -> &str;
}
