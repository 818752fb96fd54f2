//! Authentication session: registration, login, session checks and logout
//!
//! An [`AuthSession`] is the entry point applications talk to. It resolves
//! principals through the injected stores, runs the [`CheckpointPipeline`]
//! and caches the authenticated principal for the lifetime of the instance.
//! One instance serves one logical client (typically one request).

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, info};

use crate::checkpoints::{ActivationCheckpoint, Checkpoint, SecondFactorCheckpoint, ThrottleCheckpoint};
use crate::config::GatekeeperConfig;
use crate::credentials::Credentials;
use crate::models::Role;
use crate::permissions::{PermissionMode, PermissionSet};
use crate::pipeline::CheckpointPipeline;
use crate::throttle::ThrottleLedger;
use crate::traits::{
    ActivationStore, PersistenceStore, Principal, RoleStore, SecondFactorVerifier, ThrottleStore,
    UserStore,
};
use crate::{AuthError, AuthResult};

/// What an authentication attempt starts from
#[derive(Debug, Clone)]
pub enum LoginAttempt<P: Principal> {
    /// Credentials to look up and validate
    Credentials(Credentials),
    /// An already resolved principal
    Principal(P),
}

impl<P: Principal> From<Credentials> for LoginAttempt<P> {
    fn from(credentials: Credentials) -> Self {
        LoginAttempt::Credentials(credentials)
    }
}

/// Authentication state for one client
pub struct AuthSession<P: Principal> {
    users: Arc<dyn UserStore<P>>,
    persistence: Arc<dyn PersistenceStore<P>>,
    activations: Arc<dyn ActivationStore<P>>,
    roles: Option<Arc<dyn RoleStore>>,
    pipeline: CheckpointPipeline<P>,
    permission_mode: PermissionMode,
    user: Mutex<Option<P>>,
}

impl<P: Principal> std::fmt::Debug for AuthSession<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("pipeline", &self.pipeline)
            .field("permission_mode", &self.permission_mode)
            .field("user", &*self.user.lock())
            .finish_non_exhaustive()
    }
}

impl<P: Principal> AuthSession<P> {
    /// Create a session with an empty checkpoint pipeline
    pub fn new(
        users: Arc<dyn UserStore<P>>,
        persistence: Arc<dyn PersistenceStore<P>>,
        activations: Arc<dyn ActivationStore<P>>,
    ) -> Self {
        Self {
            users,
            persistence,
            activations,
            roles: None,
            pipeline: CheckpointPipeline::new(),
            permission_mode: PermissionMode::Standard,
            user: Mutex::new(None),
        }
    }

    /// Start building a session from configuration
    pub fn builder(config: GatekeeperConfig) -> AuthSessionBuilder<P> {
        AuthSessionBuilder::new(config)
    }

    pub fn with_roles(mut self, roles: Arc<dyn RoleStore>) -> Self {
        self.roles = Some(roles);
        self
    }

    pub fn with_pipeline(mut self, pipeline: CheckpointPipeline<P>) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_permission_mode(mut self, mode: PermissionMode) -> Self {
        self.permission_mode = mode;
        self
    }

    // Registration and activation

    /// Create a user from credentials, optionally activating it
    ///
    /// Returns `None` when the user store rejects the credentials.
    pub async fn register(&self, credentials: &Credentials, activate: bool) -> AuthResult<Option<P>> {
        if !self.users.valid_for_creation(credentials).await? {
            debug!("Registration rejected by the user store");
            return Ok(None);
        }

        let principal = self.users.create(credentials).await?;
        info!("Registered principal {}", principal.id());

        if activate {
            self.activate(&principal).await?;
        }

        Ok(Some(principal))
    }

    pub async fn register_and_activate(&self, credentials: &Credentials) -> AuthResult<Option<P>> {
        self.register(credentials, true).await
    }

    /// Create and immediately complete an activation
    pub async fn activate(&self, principal: &P) -> AuthResult<bool> {
        let activation = self.activations.create(principal).await?;
        let completed = self.activations.complete(principal, &activation.code).await?;

        if completed {
            info!("Activated principal {}", principal.id());
        }
        Ok(completed)
    }

    // Authentication

    /// Resolve, gate and optionally persist a login
    ///
    /// Lookup and credential mismatches run the `fail` event and return
    /// `None`. A checkpoint denying the `login` event also returns `None`;
    /// typed denials propagate as errors.
    pub async fn authenticate(
        &self,
        attempt: impl Into<LoginAttempt<P>>,
        remember: bool,
        persist_login: bool,
    ) -> AuthResult<Option<P>> {
        let principal = match attempt.into() {
            LoginAttempt::Principal(principal) => principal,
            LoginAttempt::Credentials(credentials) => {
                match self.resolve_credentials(&credentials).await? {
                    Ok(principal) => principal,
                    Err(found) => {
                        debug!("Authentication failed for {:?}", credentials);
                        self.pipeline.fail(found.as_ref()).await?;
                        return Ok(None);
                    }
                }
            }
        };

        if !self.pipeline.login(&principal).await? {
            debug!("Login denied for principal {}", principal.id());
            return Ok(None);
        }

        if persist_login {
            self.login(&principal, remember).await?;
        } else {
            *self.user.lock() = Some(principal.clone());
        }

        Ok(Some(principal))
    }

    /// The validated principal, or whatever the lookup found on mismatch
    async fn resolve_credentials(&self, credentials: &Credentials) -> AuthResult<Result<P, Option<P>>> {
        let Some(principal) = self.users.find_by_credentials(credentials).await? else {
            return Ok(Err(None));
        };

        if self.users.validate_credentials(&principal, credentials).await? {
            Ok(Ok(principal))
        } else {
            Ok(Err(Some(principal)))
        }
    }

    pub async fn authenticate_and_remember(&self, attempt: impl Into<LoginAttempt<P>>) -> AuthResult<Option<P>> {
        self.authenticate(attempt, true, true).await
    }

    /// Authenticate with every checkpoint bypassed
    pub async fn force_authenticate(
        &mut self,
        attempt: impl Into<LoginAttempt<P>>,
        remember: bool,
    ) -> AuthResult<Option<P>> {
        let attempt = attempt.into();
        self.bypass_checkpoints(&[], move |session| {
            Box::pin(async move { session.authenticate(attempt, remember, true).await })
        })
        .await
    }

    pub async fn force_authenticate_and_remember(
        &mut self,
        attempt: impl Into<LoginAttempt<P>>,
    ) -> AuthResult<Option<P>> {
        self.force_authenticate(attempt, true).await
    }

    /// Authenticate for this instance only, without persisting a session
    pub async fn stateless(&self, attempt: impl Into<LoginAttempt<P>>) -> AuthResult<Option<P>> {
        self.authenticate(attempt, false, false).await
    }

    /// Persist a session for the principal and cache it, returning the token
    pub async fn login(&self, principal: &P, remember: bool) -> AuthResult<String> {
        let token = self.persistence.persist(principal, remember).await?;
        self.users.record_login(principal).await?;
        *self.user.lock() = Some(principal.clone());

        info!("Principal {} logged in (remember: {})", principal.id(), remember);
        Ok(token)
    }

    pub async fn login_and_remember(&self, principal: &P) -> AuthResult<String> {
        self.login(principal, true).await
    }

    /// The authenticated principal, resolving the persisted session once
    pub async fn check(&self) -> AuthResult<Option<P>> {
        let cached = self.user.lock().clone();
        if cached.is_some() {
            return Ok(cached);
        }

        let Some(token) = self.persistence.current_token().await? else {
            return Ok(None);
        };

        let Some(principal) = self.users.find_by_session_token(&token).await? else {
            debug!("No principal found for the persisted session");
            return Ok(None);
        };

        if !self.pipeline.check(&principal).await? {
            return Ok(None);
        }

        *self.user.lock() = Some(principal.clone());
        Ok(Some(principal))
    }

    pub async fn guest(&self) -> AuthResult<bool> {
        Ok(self.check().await?.is_none())
    }

    /// Same as [`AuthSession::check`]
    pub async fn user(&self) -> AuthResult<Option<P>> {
        self.check().await
    }

    /// The cached principal, without consulting the persistence store
    pub fn cached_user(&self) -> Option<P> {
        self.user.lock().clone()
    }

    /// Log out the current principal, or flush every session of another one
    pub async fn logout(&self, principal: Option<&P>, everywhere: bool) -> AuthResult<()> {
        let current = self.check().await?;

        if let Some(principal) = principal {
            let is_current = current.as_ref().is_some_and(|c| c.id() == principal.id());
            if !is_current {
                self.persistence.flush_all(principal).await?;
                info!("Flushed every session of principal {}", principal.id());
                return Ok(());
            }
        }

        let Some(target) = principal.cloned().or(current) else {
            return Ok(());
        };

        if everywhere {
            self.persistence.flush_all(&target).await?;
        } else {
            self.persistence.forget().await?;
        }
        *self.user.lock() = None;
        self.users.record_logout(&target).await?;

        info!("Principal {} logged out (everywhere: {})", target.id(), everywhere);
        Ok(())
    }

    // Checkpoints

    /// Run `callback` with the given checkpoints removed (all when `keys` is
    /// empty), restoring the registry afterwards even on error or panic
    pub async fn bypass_checkpoints<T, F>(&mut self, keys: &[&str], callback: F) -> AuthResult<T>
    where
        F: for<'a> FnOnce(&'a Self) -> BoxFuture<'a, AuthResult<T>>,
    {
        let suspended = self.pipeline.suspend(keys)?;

        let this = &*self;
        let result = AssertUnwindSafe(async move { callback(this).await })
            .catch_unwind()
            .await;

        self.pipeline.restore(suspended);

        match result {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    pub fn enable_checkpoints(&mut self) {
        self.pipeline.enable();
    }

    pub fn disable_checkpoints(&mut self) {
        self.pipeline.disable();
    }

    pub fn checkpoints_enabled(&self) -> bool {
        self.pipeline.is_enabled()
    }

    pub fn add_checkpoint(&mut self, key: impl Into<String>, checkpoint: Arc<dyn Checkpoint<P>>) {
        self.pipeline.add_checkpoint(key, checkpoint);
    }

    pub fn remove_checkpoint(&mut self, key: &str) -> Option<Arc<dyn Checkpoint<P>>> {
        self.pipeline.remove_checkpoint(key)
    }

    pub fn get_checkpoint(&self, key: &str) -> Option<Arc<dyn Checkpoint<P>>> {
        self.pipeline.get_checkpoint(key)
    }

    pub fn pipeline(&self) -> &CheckpointPipeline<P> {
        &self.pipeline
    }

    // Permissions

    /// The principal's own permissions merged with those of its roles
    pub async fn permissions_for(&self, principal: &P) -> AuthResult<PermissionSet> {
        let mut secondary = Vec::new();

        if let Some(roles) = &self.roles {
            for role_id in principal.role_ids() {
                match roles.find_by_id(&role_id).await? {
                    Some(role) => secondary.push(role.permissions),
                    None => debug!("Principal {} references unknown role {}", principal.id(), role_id),
                }
            }
        }

        Ok(PermissionSet::with_mode(
            principal.permissions(),
            secondary,
            self.permission_mode,
        ))
    }

    /// Whether the authenticated principal holds every given permission
    pub async fn has_access<I, S>(&self, keys: I) -> AuthResult<bool>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        match self.check().await? {
            Some(principal) => Ok(self.permissions_for(&principal).await?.has_access(keys)),
            None => Ok(false),
        }
    }

    /// Whether the authenticated principal holds any of the given permissions
    pub async fn has_any_access<I, S>(&self, keys: I) -> AuthResult<bool>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        match self.check().await? {
            Some(principal) => Ok(self.permissions_for(&principal).await?.has_any_access(keys)),
            None => Ok(false),
        }
    }

    /// Whether the authenticated principal is assigned the role
    pub async fn in_role(&self, slug: &str) -> AuthResult<bool> {
        let Some(principal) = self.check().await? else {
            return Ok(false);
        };
        let Some(role) = self.find_role_by_slug(slug).await? else {
            return Ok(false);
        };

        Ok(principal.role_ids().contains(&role.id))
    }

    // Stores

    pub fn user_store(&self) -> &Arc<dyn UserStore<P>> {
        &self.users
    }

    pub fn persistence_store(&self) -> &Arc<dyn PersistenceStore<P>> {
        &self.persistence
    }

    pub fn activation_store(&self) -> &Arc<dyn ActivationStore<P>> {
        &self.activations
    }

    pub fn role_store(&self) -> Option<&Arc<dyn RoleStore>> {
        self.roles.as_ref()
    }

    pub async fn find_by_id(&self, id: &str) -> AuthResult<Option<P>> {
        self.users.find_by_id(id).await
    }

    pub async fn find_by_credentials(&self, credentials: &Credentials) -> AuthResult<Option<P>> {
        self.users.find_by_credentials(credentials).await
    }

    pub async fn find_role_by_slug(&self, slug: &str) -> AuthResult<Option<Role>> {
        match &self.roles {
            Some(roles) => roles.find_by_slug(slug).await,
            None => Ok(None),
        }
    }
}

/// Builds an [`AuthSession`] whose checkpoints follow
/// [`GatekeeperConfig::checkpoints`]
pub struct AuthSessionBuilder<P: Principal> {
    config: GatekeeperConfig,
    users: Option<Arc<dyn UserStore<P>>>,
    persistence: Option<Arc<dyn PersistenceStore<P>>>,
    activations: Option<Arc<dyn ActivationStore<P>>>,
    roles: Option<Arc<dyn RoleStore>>,
    throttle: Option<Arc<dyn ThrottleStore>>,
    second_factor: Option<Arc<dyn SecondFactorVerifier<P>>>,
    ip: Option<String>,
}

impl<P: Principal> AuthSessionBuilder<P> {
    pub fn new(config: GatekeeperConfig) -> Self {
        Self {
            config,
            users: None,
            persistence: None,
            activations: None,
            roles: None,
            throttle: None,
            second_factor: None,
            ip: None,
        }
    }

    pub fn users(mut self, users: Arc<dyn UserStore<P>>) -> Self {
        self.users = Some(users);
        self
    }

    pub fn persistence(mut self, persistence: Arc<dyn PersistenceStore<P>>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn activations(mut self, activations: Arc<dyn ActivationStore<P>>) -> Self {
        self.activations = Some(activations);
        self
    }

    pub fn roles(mut self, roles: Arc<dyn RoleStore>) -> Self {
        self.roles = Some(roles);
        self
    }

    pub fn throttle(mut self, throttle: Arc<dyn ThrottleStore>) -> Self {
        self.throttle = Some(throttle);
        self
    }

    pub fn second_factor(mut self, verifier: Arc<dyn SecondFactorVerifier<P>>) -> Self {
        self.second_factor = Some(verifier);
        self
    }

    /// Client address the throttle checkpoint is bound to
    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn build(self) -> AuthResult<AuthSession<P>> {
        self.config.validate()?;

        let users = self.users.ok_or_else(|| missing("user"))?;
        let persistence = self.persistence.ok_or_else(|| missing("persistence"))?;
        let activations = self.activations.ok_or_else(|| missing("activation"))?;

        let mut pipeline = CheckpointPipeline::new();
        for key in &self.config.checkpoints {
            let checkpoint: Arc<dyn Checkpoint<P>> = match key.as_str() {
                "throttle" => {
                    let store = self.throttle.clone().ok_or_else(|| missing("throttle"))?;
                    let ledger = ThrottleLedger::new(store, self.config.throttle.clone());
                    Arc::new(ThrottleCheckpoint::new(Arc::new(ledger), self.ip.clone()))
                }
                "activation" => Arc::new(ActivationCheckpoint::new(activations.clone())),
                "second_factor" => {
                    let verifier = self
                        .second_factor
                        .clone()
                        .ok_or_else(|| AuthError::config_error("A second factor verifier is required"))?;
                    Arc::new(SecondFactorCheckpoint::new(verifier))
                }
                other => return Err(AuthError::config_error(format!("Unknown checkpoint: {}", other))),
            };
            pipeline.add_checkpoint(key.clone(), checkpoint);
        }

        let mut session = AuthSession::new(users, persistence, activations)
            .with_pipeline(pipeline)
            .with_permission_mode(self.config.permissions.mode);
        if let Some(roles) = self.roles {
            session = session.with_roles(roles);
        }

        Ok(session)
    }
}

fn missing(store: &str) -> AuthError {
    AuthError::config_error(format!("A {} store is required", store))
}
