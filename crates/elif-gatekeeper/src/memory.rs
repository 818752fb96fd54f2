//! In-memory store implementations
//!
//! Suitable for tests, prototypes and single-process embedding. Each store is
//! internally synchronized and can be shared behind an `Arc`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::config::{ActivationConfig, PersistenceConfig};
use crate::credentials::Credentials;
use crate::hashing::generate_token;
use crate::models::{Activation, Role, User};
use crate::throttle::ThrottleEvent;
use crate::traits::{
    ActivationStore, Hasher, PersistenceStore, Principal, RoleStore, ThrottleStore, UserStore,
};
use crate::{AuthError, AuthResult, ThrottleScope};

/// A persisted login
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user_id: String,
    /// Whether the login should outlive the browser session
    pub remember: bool,
    pub created_at: DateTime<Utc>,
}

type SessionTable = Arc<RwLock<HashMap<String, Session>>>;

/// Session token persistence
///
/// Holds the token of the "current" session the way a cookie or server-side
/// session would for one client.
#[derive(Debug)]
pub struct InMemoryPersistenceStore {
    sessions: SessionTable,
    current: Mutex<Option<String>>,
    single: bool,
    token_length: usize,
}

impl Default for InMemoryPersistenceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPersistenceStore {
    pub fn new() -> Self {
        Self::with_config(&PersistenceConfig::default())
    }

    pub fn with_config(config: &PersistenceConfig) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            current: Mutex::new(None),
            single: config.single,
            token_length: config.token_length,
        }
    }

    /// Replace the current token, as an incoming request cookie would
    pub fn set_current_token(&self, token: Option<String>) {
        *self.current.lock() = token;
    }

    /// Active sessions for a user
    pub fn sessions_for(&self, user_id: &str) -> Vec<Session> {
        self.sessions
            .read()
            .values()
            .filter(|session| session.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl<P: Principal> PersistenceStore<P> for InMemoryPersistenceStore {
    async fn current_token(&self) -> AuthResult<Option<String>> {
        Ok(self.current.lock().clone())
    }

    async fn persist(&self, principal: &P, remember: bool) -> AuthResult<String> {
        let token = generate_token(self.token_length);
        let session = Session {
            token: token.clone(),
            user_id: principal.id().to_string(),
            remember,
            created_at: Utc::now(),
        };

        {
            let mut sessions = self.sessions.write();
            if self.single {
                sessions.retain(|_, s| s.user_id != principal.id());
            }
            sessions.insert(token.clone(), session);
        }
        *self.current.lock() = Some(token.clone());

        Ok(token)
    }

    async fn forget(&self) -> AuthResult<()> {
        if let Some(token) = self.current.lock().take() {
            self.sessions.write().remove(&token);
        }
        Ok(())
    }

    async fn flush_all(&self, principal: &P) -> AuthResult<()> {
        self.sessions.write().retain(|_, s| s.user_id != principal.id());

        let mut current = self.current.lock();
        if current
            .as_deref()
            .is_some_and(|token| !self.sessions.read().contains_key(token))
        {
            *current = None;
        }
        Ok(())
    }
}

/// User records with password validation through a [`Hasher`]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<String, User>>,
    hasher: Arc<dyn Hasher>,
    login_fields: Vec<String>,
    sessions: Option<SessionTable>,
}

impl std::fmt::Debug for InMemoryUserStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryUserStore")
            .field("users", &self.users.read().len())
            .field("hasher", &self.hasher.hasher_name())
            .field("login_fields", &self.login_fields)
            .finish()
    }
}

impl InMemoryUserStore {
    pub fn new(hasher: Arc<dyn Hasher>) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            hasher,
            login_fields: vec!["email".to_string()],
            sessions: None,
        }
    }

    /// Credential fields that identify a user
    pub fn with_login_fields(mut self, login_fields: Vec<String>) -> Self {
        self.login_fields = login_fields;
        self
    }

    /// Resolve session tokens against the given persistence store
    pub fn with_persistence(mut self, persistence: &InMemoryPersistenceStore) -> Self {
        self.sessions = Some(persistence.sessions.clone());
        self
    }

    /// Insert or replace a user record
    pub fn insert(&self, user: User) {
        self.users.write().insert(user.id.clone(), user);
    }

    pub fn get(&self, id: &str) -> Option<User> {
        self.users.read().get(id).cloned()
    }

    fn find_by_login(&self, login: &str) -> Option<User> {
        self.users
            .read()
            .values()
            .find(|user| user.login() == login)
            .cloned()
    }
}

#[async_trait]
impl UserStore<User> for InMemoryUserStore {
    async fn find_by_id(&self, id: &str) -> AuthResult<Option<User>> {
        Ok(self.get(id))
    }

    async fn find_by_credentials(&self, credentials: &Credentials) -> AuthResult<Option<User>> {
        let (_, login) = credentials.require_login(&self.login_fields)?;
        Ok(self.find_by_login(login))
    }

    async fn find_by_session_token(&self, token: &str) -> AuthResult<Option<User>> {
        let user_id = self
            .sessions
            .as_ref()
            .and_then(|sessions| sessions.read().get(token).map(|s| s.user_id.clone()));

        Ok(user_id.and_then(|id| self.get(&id)))
    }

    async fn validate_credentials(&self, principal: &User, credentials: &Credentials) -> AuthResult<bool> {
        let password = credentials.require_password()?;
        self.hasher.check(password, principal.credential_hash())
    }

    async fn valid_for_creation(&self, credentials: &Credentials) -> AuthResult<bool> {
        let (_, login) = credentials.require_login(&self.login_fields)?;
        credentials.require_password()?;
        Ok(self.find_by_login(login).is_none())
    }

    async fn create(&self, credentials: &Credentials) -> AuthResult<User> {
        if !self.valid_for_creation(credentials).await? {
            return Err(AuthError::invalid_argument("A user with this login already exists"));
        }

        let (_, login) = credentials.require_login(&self.login_fields)?;
        let hash = self.hasher.hash(credentials.require_password()?)?;

        let mut user = User::new(Uuid::new_v4().to_string(), login, hash);
        user.first_name = credentials.get("first_name").map(str::to_string);
        user.last_name = credentials.get("last_name").map(str::to_string);

        debug!("Created user {} ({})", user.id, user.email);
        self.insert(user.clone());
        Ok(user)
    }

    async fn record_login(&self, principal: &User) -> AuthResult<()> {
        if let Some(user) = self.users.write().get_mut(principal.id()) {
            let now = Utc::now();
            user.last_login = Some(now);
            user.updated_at = now;
        }
        Ok(())
    }

    async fn record_logout(&self, principal: &User) -> AuthResult<()> {
        if let Some(user) = self.users.write().get_mut(principal.id()) {
            user.updated_at = Utc::now();
        }
        Ok(())
    }
}

/// Activation records with expiry
#[derive(Debug)]
pub struct InMemoryActivationStore {
    activations: RwLock<Vec<Activation>>,
    expires: u64,
    code_length: usize,
}

impl Default for InMemoryActivationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryActivationStore {
    pub fn new() -> Self {
        Self::with_config(&ActivationConfig::default())
    }

    pub fn with_config(config: &ActivationConfig) -> Self {
        Self {
            activations: RwLock::new(Vec::new()),
            expires: config.expires,
            code_length: config.code_length,
        }
    }

    /// Insert a raw activation record
    pub fn insert(&self, activation: Activation) {
        self.activations.write().push(activation);
    }

    fn pending(&self, user_id: &str, code: Option<&str>) -> Option<Activation> {
        self.activations
            .read()
            .iter()
            .find(|a| {
                a.user_id == user_id
                    && !a.completed
                    && !a.is_expired(self.expires)
                    && code.map_or(true, |code| a.code == code)
            })
            .cloned()
    }
}

#[async_trait]
impl<P: Principal> ActivationStore<P> for InMemoryActivationStore {
    async fn is_completed(&self, principal: &P) -> AuthResult<bool> {
        Ok(self
            .activations
            .read()
            .iter()
            .any(|a| a.user_id == principal.id() && a.completed))
    }

    async fn create(&self, principal: &P) -> AuthResult<Activation> {
        let activation = Activation::new(principal.id(), generate_token(self.code_length));
        self.insert(activation.clone());
        Ok(activation)
    }

    async fn exists(&self, principal: &P, code: Option<&str>) -> AuthResult<Option<Activation>> {
        Ok(self.pending(principal.id(), code))
    }

    async fn complete(&self, principal: &P, code: &str) -> AuthResult<bool> {
        let expires = self.expires;
        let mut activations = self.activations.write();

        let pending = activations.iter_mut().find(|a| {
            a.user_id == principal.id() && !a.completed && !a.is_expired(expires) && a.code == code
        });

        match pending {
            Some(activation) => {
                activation.completed = true;
                activation.completed_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove(&self, principal: &P) -> AuthResult<bool> {
        let mut activations = self.activations.write();
        let before = activations.len();
        activations.retain(|a| a.user_id != principal.id());
        Ok(activations.len() != before)
    }

    async fn remove_expired(&self) -> AuthResult<usize> {
        let mut activations = self.activations.write();
        let before = activations.len();
        activations.retain(|a| !a.is_expired(self.expires));
        Ok(before - activations.len())
    }
}

/// Append-only throttle event log
#[derive(Debug, Default)]
pub struct InMemoryThrottleStore {
    events: RwLock<Vec<ThrottleEvent>>,
}

impl InMemoryThrottleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every recorded event
    pub fn events(&self) -> Vec<ThrottleEvent> {
        self.events.read().clone()
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }
}

#[async_trait]
impl ThrottleStore for InMemoryThrottleStore {
    async fn events_in_window(
        &self,
        scope: ThrottleScope,
        key: Option<&str>,
        since: DateTime<Utc>,
    ) -> AuthResult<Vec<ThrottleEvent>> {
        let mut events: Vec<ThrottleEvent> = self
            .events
            .read()
            .iter()
            .filter(|e| e.scope == scope && e.occurred_at >= since)
            .filter(|e| scope == ThrottleScope::Global || e.key() == key)
            .cloned()
            .collect();

        events.sort_by_key(|e| e.occurred_at);
        Ok(events)
    }

    async fn append(&self, event: ThrottleEvent) -> AuthResult<()> {
        self.events.write().push(event);
        Ok(())
    }
}

/// Role records
#[derive(Debug, Default)]
pub struct InMemoryRoleStore {
    roles: RwLock<HashMap<String, Role>>,
}

impl InMemoryRoleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a role
    pub fn insert(&self, role: Role) {
        self.roles.write().insert(role.id.clone(), role);
    }
}

#[async_trait]
impl RoleStore for InMemoryRoleStore {
    async fn find_by_id(&self, id: &str) -> AuthResult<Option<Role>> {
        Ok(self.roles.read().get(id).cloned())
    }

    async fn find_by_slug(&self, slug: &str) -> AuthResult<Option<Role>> {
        Ok(self.roles.read().values().find(|r| r.slug == slug).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::BcryptHasher;
    use chrono::Duration;

    fn user_store(persistence: &InMemoryPersistenceStore) -> InMemoryUserStore {
        InMemoryUserStore::new(Arc::new(BcryptHasher::development())).with_persistence(persistence)
    }

    fn credentials() -> Credentials {
        Credentials::from([("email", "jane@example.com"), ("password", "secret")])
    }

    #[tokio::test]
    async fn test_user_creation_and_lookup() {
        let persistence = InMemoryPersistenceStore::new();
        let users = user_store(&persistence);

        assert!(users.valid_for_creation(&credentials()).await.unwrap());
        let user = users.create(&credentials()).await.unwrap();
        assert_eq!(user.email, "jane@example.com");
        assert_ne!(user.password, "secret");

        assert!(!users.valid_for_creation(&credentials()).await.unwrap());
        assert!(users.create(&credentials()).await.is_err());

        let found = users.find_by_credentials(&credentials()).await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert!(users.validate_credentials(&found, &credentials()).await.unwrap());

        let wrong = Credentials::from([("email", "jane@example.com"), ("password", "nope")]);
        assert!(!users.validate_credentials(&found, &wrong).await.unwrap());

        let missing_login = Credentials::from([("password", "secret")]);
        assert!(users.find_by_credentials(&missing_login).await.is_err());
    }

    #[tokio::test]
    async fn test_session_tokens_resolve_users() {
        let persistence = InMemoryPersistenceStore::new();
        let users = user_store(&persistence);
        let user = users.create(&credentials()).await.unwrap();

        let token = persistence.persist(&user, true).await.unwrap();
        assert_eq!(
            PersistenceStore::<User>::current_token(&persistence).await.unwrap(),
            Some(token.clone())
        );
        assert_eq!(users.find_by_session_token(&token).await.unwrap().unwrap().id, user.id);

        PersistenceStore::<User>::forget(&persistence).await.unwrap();
        assert!(PersistenceStore::<User>::current_token(&persistence).await.unwrap().is_none());
        assert!(users.find_by_session_token(&token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_single_persistence_and_flush() {
        let persistence = InMemoryPersistenceStore::with_config(&PersistenceConfig {
            single: true,
            ..PersistenceConfig::default()
        });
        let user = User::new("1", "jane@example.com", "");

        persistence.persist(&user, false).await.unwrap();
        persistence.persist(&user, false).await.unwrap();
        assert_eq!(persistence.sessions_for("1").len(), 1);

        persistence.flush_all(&user).await.unwrap();
        assert!(persistence.sessions_for("1").is_empty());
        assert!(PersistenceStore::<User>::current_token(&persistence).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_activation_lifecycle() {
        let activations = InMemoryActivationStore::new();
        let user = User::new("1", "jane@example.com", "");

        assert!(!activations.is_completed(&user).await.unwrap());
        let activation = activations.create(&user).await.unwrap();
        assert!(activations.exists(&user, Some(&activation.code)).await.unwrap().is_some());
        assert!(activations.exists(&user, Some("wrong")).await.unwrap().is_none());

        assert!(!activations.complete(&user, "wrong").await.unwrap());
        assert!(activations.complete(&user, &activation.code).await.unwrap());
        assert!(activations.is_completed(&user).await.unwrap());
        assert!(activations.exists(&user, None).await.unwrap().is_none());

        assert!(activations.remove(&user).await.unwrap());
        assert!(!activations.is_completed(&user).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_activations() {
        let activations = InMemoryActivationStore::new();
        let user = User::new("1", "jane@example.com", "");

        let mut stale = Activation::new("1", "old");
        stale.created_at = Utc::now() - Duration::days(4);
        activations.insert(stale);

        assert!(!activations.complete(&user, "old").await.unwrap());
        assert_eq!(ActivationStore::<User>::remove_expired(&activations).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_throttle_window_filtering() {
        let store = InMemoryThrottleStore::new();
        let old = Utc::now() - Duration::seconds(60);

        store.append(ThrottleEvent::ip("10.0.0.1").at(old)).await.unwrap();
        store.append(ThrottleEvent::ip("10.0.0.1")).await.unwrap();
        store.append(ThrottleEvent::ip("10.0.0.2")).await.unwrap();
        store.append(ThrottleEvent::global()).await.unwrap();

        let since = Utc::now() - Duration::seconds(30);
        let events = store
            .events_in_window(ThrottleScope::Ip, Some("10.0.0.1"), since)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);

        let events = store
            .events_in_window(ThrottleScope::Global, None, since)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);

        // the window includes its start
        let events = store
            .events_in_window(ThrottleScope::Ip, Some("10.0.0.1"), old)
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_role_lookup() {
        let roles = InMemoryRoleStore::new();
        roles.insert(Role::new("1", "admin", "Administrator"));

        assert_eq!(roles.find_by_slug("admin").await.unwrap().unwrap().id, "1");
        assert!(roles.find_by_id("1").await.unwrap().is_some());
        assert!(roles.find_by_slug("editor").await.unwrap().is_none());
    }
}
