//! # elif-gatekeeper: Authentication decisions for elif.rs
//!
//! This crate decides whether a principal may log in, whether a persisted
//! session is still acceptable, and what the principal is allowed to do:
//! checkpoints (activation, login throttling, second factor) evaluated by an
//! ordered pipeline, a failed-attempt ledger, and wildcard-aware permission
//! resolution. Storage is injected through async store traits; in-memory
//! implementations live in [`memory`].

pub mod checkpoints;
pub mod config;
pub mod credentials;
pub mod error;
pub mod hashing;
pub mod memory;
pub mod models;
pub mod permissions;
pub mod pipeline;
pub mod session;
pub mod throttle;
pub mod traits;

// Error handling
pub use error::{AuthError, ThrottleScope};

// Core contracts
pub use traits::{
    ActivationStore, Hasher, PersistenceStore, Principal, RoleStore, SecondFactorVerifier,
    ThrottleStore, UserStore,
};

// Configuration
pub use config::{
    ActivationConfig, GatekeeperConfig, PasswordConfig, PermissionsConfig, PersistenceConfig,
    ThrottleConfig, ThrottleRule, Thresholds,
};

// Decision engine
pub use checkpoints::{
    ActivationCheckpoint, Checkpoint, CheckpointEvent, SecondFactorCheckpoint, ThrottleCheckpoint,
};
pub use credentials::Credentials;
pub use models::{Activation, Role, User};
pub use permissions::{PermissionMap, PermissionMode, PermissionSet};
pub use pipeline::CheckpointPipeline;
pub use session::{AuthSession, AuthSessionBuilder, LoginAttempt};
pub use throttle::{ThrottleEvent, ThrottleLedger};

/// Authentication result type alias
pub type AuthResult<T> = Result<T, AuthError>;

/// Gatekeeper version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
