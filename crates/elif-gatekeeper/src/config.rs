//! Gatekeeper configuration types and utilities

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::permissions::PermissionMode;
use crate::{AuthError, AuthResult};

/// Checkpoint keys the engine knows how to build
pub const KNOWN_CHECKPOINTS: &[&str] = &["throttle", "activation", "second_factor"];

/// Upper bound for any configured duration in seconds (100 years)
pub const MAX_DURATION_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// Main gatekeeper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    /// Credential fields that identify a user, tried in order
    #[serde(default = "default_login_fields")]
    pub login_fields: Vec<String>,

    /// Checkpoints to register, in evaluation order
    #[serde(default = "default_checkpoints")]
    pub checkpoints: Vec<String>,

    /// Failed-login throttling
    #[serde(default)]
    pub throttle: ThrottleConfig,

    /// Account activation
    #[serde(default)]
    pub activation: ActivationConfig,

    /// Permission resolution
    #[serde(default)]
    pub permissions: PermissionsConfig,

    /// Session persistence
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Password hashing
    #[serde(default)]
    pub password: PasswordConfig,
}

/// Throttling rules per scope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Site-wide rule
    #[serde(default = "default_global_rule")]
    pub global: ThrottleRule,

    /// Per client address rule
    #[serde(default = "default_ip_rule")]
    pub ip: ThrottleRule,

    /// Per account rule
    #[serde(default = "default_user_rule")]
    pub user: ThrottleRule,
}

/// Lookback interval and thresholds for one throttle scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleRule {
    /// Lookback window in seconds
    pub interval: u64,

    /// Lockout limit or escalating delays
    pub thresholds: Thresholds,
}

impl ThrottleRule {
    /// Hard lockout after `limit` attempts within `interval` seconds
    pub fn limit(interval: u64, limit: u32) -> Self {
        Self {
            interval,
            thresholds: Thresholds::Limit(limit),
        }
    }

    /// Escalating `attempts => delay seconds` buckets within `interval` seconds
    pub fn escalating<I>(interval: u64, buckets: I) -> Self
    where
        I: IntoIterator<Item = (u32, u64)>,
    {
        Self {
            interval,
            thresholds: Thresholds::Escalating(buckets.into_iter().collect()),
        }
    }
}

/// Either a hard attempt limit or an escalating attempts → delay map
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Thresholds {
    /// Locked out once attempts in the interval exceed this count
    Limit(u32),
    /// Delay in seconds once attempts exceed the bucket's count
    Escalating(BTreeMap<u32, u64>),
}

impl<'de> Deserialize<'de> for Thresholds {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ThresholdsVisitor;

        impl<'de> Visitor<'de> for ThresholdsVisitor {
            type Value = Thresholds;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an attempt limit or a map of attempts to delay seconds")
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
                u32::try_from(value)
                    .map(Thresholds::Limit)
                    .map_err(|_| E::custom("attempt limit out of range"))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
                u32::try_from(value)
                    .map(Thresholds::Limit)
                    .map_err(|_| E::custom("attempt limit out of range"))
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut buckets = BTreeMap::new();
                while let Some((attempts, delay)) = access.next_entry::<u32, u64>()? {
                    buckets.insert(attempts, delay);
                }
                Ok(Thresholds::Escalating(buckets))
            }
        }

        deserializer.deserialize_any(ThresholdsVisitor)
    }
}

/// Activation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationConfig {
    /// Seconds a pending activation stays valid
    #[serde(default = "default_activation_expiry")]
    pub expires: u64,

    /// Length of generated activation codes
    #[serde(default = "default_code_length")]
    pub code_length: usize,
}

/// Permission resolution configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionsConfig {
    /// Standard or strict merge of own and role permissions
    #[serde(default)]
    pub mode: PermissionMode,
}

/// Session persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Keep a single session per user; persisting drops the others
    #[serde(default = "default_false")]
    pub single: bool,

    /// Length of generated session tokens
    #[serde(default = "default_token_length")]
    pub token_length: usize,
}

/// Password hashing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordConfig {
    /// Password hashing algorithm (argon2, bcrypt)
    #[serde(default = "default_hash_algorithm")]
    pub hash_algorithm: String,

    /// Bcrypt cost factor (if using bcrypt)
    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,

    /// Argon2 memory cost in KB (if using argon2)
    #[serde(default = "default_argon2_memory")]
    pub argon2_memory: u32,

    /// Argon2 time cost (iterations)
    #[serde(default = "default_argon2_iterations")]
    pub argon2_iterations: u32,

    /// Argon2 parallelism factor
    #[serde(default = "default_argon2_parallelism")]
    pub argon2_parallelism: u32,
}

// Default value functions
fn default_login_fields() -> Vec<String> {
    vec!["email".to_string()]
}
fn default_checkpoints() -> Vec<String> {
    vec!["throttle".to_string(), "activation".to_string()]
}
fn default_global_rule() -> ThrottleRule {
    ThrottleRule::escalating(
        15 * 60,
        [(10, 1), (20, 2), (30, 4), (40, 8), (50, 16), (60, 12)],
    )
}
fn default_ip_rule() -> ThrottleRule {
    ThrottleRule::limit(15 * 60, 5)
}
fn default_user_rule() -> ThrottleRule {
    ThrottleRule::limit(15 * 60, 5)
}
fn default_activation_expiry() -> u64 {
    3 * 24 * 60 * 60
} // 3 days
fn default_code_length() -> usize {
    32
}
fn default_token_length() -> usize {
    32
}
fn default_hash_algorithm() -> String {
    "argon2".to_string()
}
fn default_bcrypt_cost() -> u32 {
    12
}
fn default_argon2_memory() -> u32 {
    65536
} // 64MB
fn default_argon2_iterations() -> u32 {
    3
}
fn default_argon2_parallelism() -> u32 {
    4
}
fn default_false() -> bool {
    false
}

impl Default for GatekeeperConfig {
    fn default() -> Self {
        Self {
            login_fields: default_login_fields(),
            checkpoints: default_checkpoints(),
            throttle: ThrottleConfig::default(),
            activation: ActivationConfig::default(),
            permissions: PermissionsConfig::default(),
            persistence: PersistenceConfig::default(),
            password: PasswordConfig::default(),
        }
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global: default_global_rule(),
            ip: default_ip_rule(),
            user: default_user_rule(),
        }
    }
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            expires: default_activation_expiry(),
            code_length: default_code_length(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            single: default_false(),
            token_length: default_token_length(),
        }
    }
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            hash_algorithm: default_hash_algorithm(),
            bcrypt_cost: default_bcrypt_cost(),
            argon2_memory: default_argon2_memory(),
            argon2_iterations: default_argon2_iterations(),
            argon2_parallelism: default_argon2_parallelism(),
        }
    }
}

impl GatekeeperConfig {
    /// Create a development configuration with fast hashing
    pub fn development() -> Self {
        let mut config = Self::default();
        config.password.hash_algorithm = "bcrypt".to_string();
        config.password.bcrypt_cost = 4;
        config
    }

    /// Create a production configuration with strict security
    pub fn production() -> Self {
        let mut config = Self::default();
        config.persistence.single = true;
        config.password.argon2_iterations = 4;
        config
    }

    /// Parse a JSON configuration document
    pub fn from_json_str(source: &str) -> AuthResult<Self> {
        let config: Self = serde_json::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML configuration document
    pub fn from_yaml_str(source: &str) -> AuthResult<Self> {
        let config: Self = serde_yaml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> AuthResult<()> {
        if self.login_fields.is_empty() {
            return Err(AuthError::config_error("At least one login field is required"));
        }

        if let Some(unknown) = self
            .checkpoints
            .iter()
            .find(|key| !KNOWN_CHECKPOINTS.contains(&key.as_str()))
        {
            return Err(AuthError::config_error(format!("Unknown checkpoint: {}", unknown)));
        }

        for (scope, rule) in [
            ("global", &self.throttle.global),
            ("ip", &self.throttle.ip),
            ("user", &self.throttle.user),
        ] {
            if rule.interval == 0 {
                return Err(AuthError::config_error(format!(
                    "Throttle interval for [{}] must be greater than zero",
                    scope
                )));
            }
            if rule.interval > MAX_DURATION_SECS {
                return Err(AuthError::config_error(format!(
                    "Throttle interval for [{}] cannot exceed {} seconds",
                    scope, MAX_DURATION_SECS
                )));
            }
            if let Thresholds::Escalating(buckets) = &rule.thresholds {
                if buckets.is_empty() {
                    return Err(AuthError::config_error(format!(
                        "Escalating thresholds for [{}] cannot be empty",
                        scope
                    )));
                }
                if buckets.values().any(|delay| *delay > MAX_DURATION_SECS) {
                    return Err(AuthError::config_error(format!(
                        "Throttle delays for [{}] cannot exceed {} seconds",
                        scope, MAX_DURATION_SECS
                    )));
                }
            }
        }

        if self.activation.expires > MAX_DURATION_SECS {
            return Err(AuthError::config_error(format!(
                "Activation expiry cannot exceed {} seconds",
                MAX_DURATION_SECS
            )));
        }

        if self.persistence.token_length < 16 {
            return Err(AuthError::config_error("Session tokens must be at least 16 characters"));
        }

        match self.password.hash_algorithm.as_str() {
            "argon2" if cfg!(feature = "argon2") => {}
            "bcrypt" if cfg!(feature = "bcrypt") => {}
            "argon2" | "bcrypt" => {
                return Err(AuthError::config_error(format!(
                    "Password hashing algorithm {} requires the `{}` feature",
                    self.password.hash_algorithm, self.password.hash_algorithm
                )));
            }
            _ => return Err(AuthError::config_error("Invalid password hashing algorithm")),
        }

        if !(4..=31).contains(&self.password.bcrypt_cost) {
            return Err(AuthError::config_error("Bcrypt cost must be between 4 and 31"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GatekeeperConfig::default();
        assert_eq!(config.login_fields, vec!["email"]);
        assert_eq!(config.checkpoints, vec!["throttle", "activation"]);
        assert_eq!(config.throttle.ip, ThrottleRule::limit(900, 5));
        assert_eq!(config.throttle.user, ThrottleRule::limit(900, 5));
        assert_eq!(config.activation.expires, 259200);
        assert_eq!(config.permissions.mode, PermissionMode::Standard);
        assert!(config.validate().is_ok());

        match &config.throttle.global.thresholds {
            Thresholds::Escalating(buckets) => {
                assert_eq!(buckets.len(), 6);
                assert_eq!(buckets.get(&10), Some(&1));
            }
            other => panic!("unexpected global thresholds: {:?}", other),
        }
    }

    #[test]
    fn test_presets() {
        let config = GatekeeperConfig::development();
        assert_eq!(config.password.hash_algorithm, "bcrypt");
        assert_eq!(config.password.bcrypt_cost, 4);
        assert!(config.validate().is_ok());

        let config = GatekeeperConfig::production();
        assert!(config.persistence.single);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_thresholds() {
        let config = GatekeeperConfig::from_json_str(
            r#"{
                "throttle": {
                    "global": {"interval": 60, "thresholds": {"5": 3, "10": 10}},
                    "user": {"interval": 600, "thresholds": 3}
                },
                "permissions": {"mode": "strict"}
            }"#,
        )
        .unwrap();

        assert_eq!(config.throttle.global, ThrottleRule::escalating(60, [(5, 3), (10, 10)]));
        assert_eq!(config.throttle.user, ThrottleRule::limit(600, 3));
        assert_eq!(config.throttle.ip, ThrottleRule::limit(900, 5));
        assert_eq!(config.permissions.mode, PermissionMode::Strict);
    }

    #[test]
    fn test_yaml_config() {
        let config = GatekeeperConfig::from_yaml_str(
            "login_fields: [email, username]\n\
             checkpoints: [activation]\n\
             throttle:\n  ip:\n    interval: 120\n    thresholds:\n      3: 5\n      6: 30\n",
        )
        .unwrap();

        assert_eq!(config.login_fields, vec!["email", "username"]);
        assert_eq!(config.checkpoints, vec!["activation"]);
        assert_eq!(config.throttle.ip, ThrottleRule::escalating(120, [(3, 5), (6, 30)]));
    }

    #[test]
    fn test_config_validation() {
        let mut config = GatekeeperConfig::default();

        config.checkpoints.push("captcha".to_string());
        assert!(config.validate().is_err());
        config.checkpoints.pop();

        config.throttle.user.interval = 0;
        assert!(config.validate().is_err());
        config.throttle.user.interval = 900;

        config.throttle.global.thresholds = Thresholds::Escalating(BTreeMap::new());
        assert!(config.validate().is_err());
        config.throttle.global = default_global_rule();

        config.password.hash_algorithm = "md5".to_string();
        assert!(config.validate().is_err());
        config.password.hash_algorithm = "argon2".to_string();

        config.login_fields.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_durations_are_bounded() {
        let err = GatekeeperConfig::from_json_str(
            r#"{"throttle":{"global":{"interval":100000000000000,"thresholds":5}}}"#,
        )
        .unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");

        let mut config = GatekeeperConfig::default();
        config.throttle.ip.interval = MAX_DURATION_SECS;
        assert!(config.validate().is_ok());

        config.throttle.ip = ThrottleRule::escalating(60, [(3, u64::MAX)]);
        assert!(config.validate().is_err());
        config.throttle.ip = default_ip_rule();

        config.activation.expires = MAX_DURATION_SECS + 1;
        assert!(config.validate().is_err());
    }

    #[cfg(not(feature = "argon2"))]
    #[test]
    fn test_disabled_hasher_is_rejected() {
        let mut config = GatekeeperConfig::default();
        config.password.hash_algorithm = "argon2".to_string();
        assert!(config.validate().is_err());
    }

    #[cfg(not(feature = "bcrypt"))]
    #[test]
    fn test_disabled_bcrypt_is_rejected() {
        assert!(GatekeeperConfig::development().validate().is_err());
    }
}
