//! Failed-attempt ledger and delay computation
//!
//! Every failed login appends events to a [`ThrottleStore`]. Delays are
//! computed from the events inside each scope's lookback interval:
//!
//! - a [`Thresholds::Limit`] locks the scope out once the count exceeds the
//!   limit, until the interval has elapsed since the **first** event;
//! - [`Thresholds::Escalating`] picks the highest bucket the count has passed
//!   and delays relative to the **last** event.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{ThrottleConfig, ThrottleRule, Thresholds};
use crate::traits::{Principal, ThrottleStore};
use crate::{AuthError, AuthResult, ThrottleScope};

/// One recorded failed attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleEvent {
    pub scope: ThrottleScope,
    pub ip: Option<String>,
    pub user_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl ThrottleEvent {
    /// A site-wide event
    pub fn global() -> Self {
        Self {
            scope: ThrottleScope::Global,
            ip: None,
            user_id: None,
            occurred_at: Utc::now(),
        }
    }

    /// An event against a client address
    pub fn ip(ip: impl Into<String>) -> Self {
        Self {
            scope: ThrottleScope::Ip,
            ip: Some(ip.into()),
            user_id: None,
            occurred_at: Utc::now(),
        }
    }

    /// An event against an account
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            scope: ThrottleScope::User,
            ip: None,
            user_id: Some(user_id.into()),
            occurred_at: Utc::now(),
        }
    }

    /// Override the recording time
    pub fn at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }

    /// The address or user id this event is keyed by
    pub fn key(&self) -> Option<&str> {
        match self.scope {
            ThrottleScope::Global => None,
            ThrottleScope::Ip => self.ip.as_deref(),
            ThrottleScope::User => self.user_id.as_deref(),
        }
    }
}

#[derive(Debug, Default)]
struct LedgerCache {
    global: Option<Vec<ThrottleEvent>>,
    ip: HashMap<String, Vec<ThrottleEvent>>,
    user: HashMap<String, Vec<ThrottleEvent>>,
}

impl LedgerCache {
    fn get(&self, scope: ThrottleScope, key: Option<&str>) -> Option<Vec<ThrottleEvent>> {
        match (scope, key) {
            (ThrottleScope::Global, _) => self.global.clone(),
            (ThrottleScope::Ip, Some(key)) => self.ip.get(key).cloned(),
            (ThrottleScope::User, Some(key)) => self.user.get(key).cloned(),
            _ => None,
        }
    }

    fn put(&mut self, scope: ThrottleScope, key: Option<&str>, events: Vec<ThrottleEvent>) {
        match (scope, key) {
            (ThrottleScope::Global, _) => self.global = Some(events),
            (ThrottleScope::Ip, Some(key)) => {
                self.ip.insert(key.to_string(), events);
            }
            (ThrottleScope::User, Some(key)) => {
                self.user.insert(key.to_string(), events);
            }
            _ => {}
        }
    }

    fn invalidate(&mut self, scope: ThrottleScope, key: Option<&str>) {
        match (scope, key) {
            (ThrottleScope::Global, _) => self.global = None,
            (ThrottleScope::Ip, Some(key)) => {
                self.ip.remove(key);
            }
            (ThrottleScope::User, Some(key)) => {
                self.user.remove(key);
            }
            _ => {}
        }
    }
}

/// Throttling ledger over a [`ThrottleStore`]
///
/// Window queries are cached per scope (and per address/user) for the
/// lifetime of the ledger, so several checkpoint invocations within one
/// request share a single query. Logging invalidates the entries it touches.
pub struct ThrottleLedger {
    store: Arc<dyn ThrottleStore>,
    config: ThrottleConfig,
    cache: Mutex<LedgerCache>,
}

impl std::fmt::Debug for ThrottleLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThrottleLedger")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ThrottleLedger {
    pub fn new(store: Arc<dyn ThrottleStore>, config: ThrottleConfig) -> Self {
        Self {
            store,
            config,
            cache: Mutex::new(LedgerCache::default()),
        }
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// Seconds until logins are allowed again site-wide
    pub async fn global_delay(&self) -> AuthResult<u64> {
        self.delay(ThrottleScope::Global, None).await
    }

    /// Seconds until the given address may try again
    pub async fn ip_delay(&self, ip: &str) -> AuthResult<u64> {
        self.delay(ThrottleScope::Ip, Some(ip)).await
    }

    /// Seconds until the given account may be logged into again
    pub async fn user_delay<P: Principal>(&self, principal: &P) -> AuthResult<u64> {
        self.delay(ThrottleScope::User, Some(principal.id())).await
    }

    /// Record one failed attempt: always globally, and against the address
    /// and account when they are known.
    pub async fn log<P: Principal>(&self, ip: Option<&str>, principal: Option<&P>) -> AuthResult<()> {
        let now = Utc::now();

        let mut events = vec![ThrottleEvent::global().at(now)];
        if let Some(ip) = ip {
            events.push(ThrottleEvent::ip(ip).at(now));
        }
        if let Some(principal) = principal {
            events.push(ThrottleEvent::user(principal.id()).at(now));
        }

        for event in events {
            info!(
                "Logging failed attempt: scope={} key={}",
                event.scope,
                event.key().unwrap_or("-")
            );
            let (scope, key) = (event.scope, event.key().map(str::to_string));
            self.store.append(event).await?;
            self.cache.lock().invalidate(scope, key.as_deref());
        }

        Ok(())
    }

    /// Forget every cached window query
    pub fn clear_cache(&self) {
        *self.cache.lock() = LedgerCache::default();
    }

    fn rule(&self, scope: ThrottleScope) -> &ThrottleRule {
        match scope {
            ThrottleScope::Global => &self.config.global,
            ThrottleScope::Ip => &self.config.ip,
            ThrottleScope::User => &self.config.user,
        }
    }

    async fn events(&self, scope: ThrottleScope, key: Option<&str>) -> AuthResult<Vec<ThrottleEvent>> {
        let cached = self.cache.lock().get(scope, key);
        if let Some(events) = cached {
            return Ok(events);
        }

        let interval = self.rule(scope).interval;
        let since = i64::try_from(interval)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|interval| Utc::now().checked_sub_signed(interval))
            .ok_or_else(|| {
                AuthError::config_error(format!(
                    "Throttle interval for [{}] is out of range: {}s",
                    scope, interval
                ))
            })?;
        let events = self.store.events_in_window(scope, key, since).await?;

        self.cache.lock().put(scope, key, events.clone());
        Ok(events)
    }

    async fn delay(&self, scope: ThrottleScope, key: Option<&str>) -> AuthResult<u64> {
        let events = self.events(scope, key).await?;
        let delay = compute_delay(self.rule(scope), &events, Utc::now());

        if delay > 0 {
            debug!(
                "Throttle delay for scope={} key={}: {}s after {} attempt(s)",
                scope,
                key.unwrap_or("-"),
                delay,
                events.len()
            );
        }

        Ok(delay)
    }
}

/// Delay in seconds for a rule given the events inside its window
pub fn compute_delay(rule: &ThrottleRule, events: &[ThrottleEvent], now: DateTime<Utc>) -> u64 {
    let count = events.len();
    if count == 0 {
        return 0;
    }

    match &rule.thresholds {
        Thresholds::Limit(limit) => {
            if count <= *limit as usize {
                return 0;
            }
            events
                .iter()
                .map(|e| e.occurred_at)
                .min()
                .map_or(0, |first| seconds_to_free(first, rule.interval, now))
        }
        Thresholds::Escalating(buckets) => {
            let Some(last) = events.iter().map(|e| e.occurred_at).max() else {
                return 0;
            };

            buckets
                .iter()
                .rev()
                .find(|(attempts, _)| count > **attempts as usize)
                .map_or(0, |(_, delay)| seconds_to_free(last, *delay, now))
        }
    }
}

/// Whole seconds (rounded up) until `after` seconds have passed since `from`
fn seconds_to_free(from: DateTime<Utc>, after: u64, now: DateTime<Utc>) -> u64 {
    let elapsed = now.signed_duration_since(from).num_milliseconds().max(0) as u64;
    after.saturating_mul(1000).saturating_sub(elapsed).div_ceil(1000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryThrottleStore;
    use crate::models::User;
    use tracing_test::traced_test;

    fn ledger(store: &Arc<InMemoryThrottleStore>, config: ThrottleConfig) -> ThrottleLedger {
        ThrottleLedger::new(store.clone(), config)
    }

    fn config_with(global: ThrottleRule) -> ThrottleConfig {
        ThrottleConfig {
            global,
            ip: ThrottleRule::limit(900, 5),
            user: ThrottleRule::limit(900, 5),
        }
    }

    async fn seed(store: &InMemoryThrottleStore, events: impl IntoIterator<Item = ThrottleEvent>) {
        for event in events {
            store.append(event).await.unwrap();
        }
    }

    #[test]
    fn test_limit_counts_from_first_event() {
        let now = Utc::now();
        let rule = ThrottleRule::limit(900, 5);

        let mut events: Vec<ThrottleEvent> =
            (0..5).map(|_| ThrottleEvent::global().at(now)).collect();
        assert_eq!(compute_delay(&rule, &events, now), 0);

        events.insert(0, ThrottleEvent::global().at(now - Duration::seconds(800)));
        assert_eq!(compute_delay(&rule, &events, now), 100);
    }

    #[test]
    fn test_escalating_counts_from_last_event() {
        let now = Utc::now();
        let rule = ThrottleRule::escalating(900, [(5, 3), (10, 10)]);

        let events: Vec<ThrottleEvent> = (0..6)
            .map(|_| ThrottleEvent::global().at(now - Duration::seconds(1)))
            .collect();
        assert_eq!(compute_delay(&rule, &events, now), 2);

        let events: Vec<ThrottleEvent> = (0..11)
            .map(|_| ThrottleEvent::global().at(now - Duration::seconds(4)))
            .collect();
        assert_eq!(compute_delay(&rule, &events, now), 6);

        let events: Vec<ThrottleEvent> = (0..11)
            .map(|_| ThrottleEvent::global().at(now - Duration::seconds(11)))
            .collect();
        assert_eq!(compute_delay(&rule, &events, now), 0);

        let events: Vec<ThrottleEvent> = (0..5).map(|_| ThrottleEvent::global().at(now)).collect();
        assert_eq!(compute_delay(&rule, &events, now), 0);
    }

    #[test]
    fn test_empty_window_has_no_delay() {
        let now = Utc::now();
        assert_eq!(compute_delay(&ThrottleRule::limit(900, 0), &[], now), 0);
        assert_eq!(compute_delay(&ThrottleRule::escalating(900, [(0, 5)]), &[], now), 0);
    }

    #[test]
    fn test_oversized_delay_saturates() {
        let now = Utc::now();
        let rule = ThrottleRule::escalating(900, [(0, u64::MAX)]);
        let events = [ThrottleEvent::global().at(now)];

        assert_eq!(compute_delay(&rule, &events, now), u64::MAX.div_ceil(1000));
    }

    #[tokio::test]
    async fn test_out_of_range_interval_is_a_config_error() {
        let store = Arc::new(InMemoryThrottleStore::new());
        let ledger = ledger(&store, config_with(ThrottleRule::limit(100_000_000_000_000, 5)));

        let err = ledger.global_delay().await.unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
        assert_eq!(ledger.ip_delay("10.0.0.1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_limit_scope_delay() {
        let store = Arc::new(InMemoryThrottleStore::new());
        let ledger = ledger(&store, config_with(ThrottleRule::limit(900, 5)));

        seed(&store, (0..5).map(|_| ThrottleEvent::global())).await;
        assert_eq!(ledger.global_delay().await.unwrap(), 0);

        seed(&store, [ThrottleEvent::global()]).await;
        ledger.clear_cache();
        let delay = ledger.global_delay().await.unwrap();
        assert!(delay > 0 && delay <= 900, "unexpected delay {}", delay);
    }

    #[tokio::test]
    async fn test_escalating_scope_delay() {
        let store = Arc::new(InMemoryThrottleStore::new());
        let ledger = ledger(&store, config_with(ThrottleRule::escalating(900, [(5, 3), (10, 10)])));

        seed(&store, (0..6).map(|_| ThrottleEvent::global())).await;
        let delay = ledger.global_delay().await.unwrap();
        assert!((1..=3).contains(&delay), "unexpected delay {}", delay);

        seed(&store, (0..5).map(|_| ThrottleEvent::global())).await;
        ledger.clear_cache();
        let delay = ledger.global_delay().await.unwrap();
        assert!((4..=10).contains(&delay), "unexpected delay {}", delay);
    }

    #[tokio::test]
    async fn test_events_outside_interval_are_ignored() {
        let store = Arc::new(InMemoryThrottleStore::new());
        let ledger = ledger(&store, config_with(ThrottleRule::limit(900, 5)));

        let old = Utc::now() - Duration::seconds(1000);
        seed(&store, (0..10).map(|_| ThrottleEvent::ip("10.0.0.1").at(old))).await;

        assert_eq!(ledger.ip_delay("10.0.0.1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_keyed_scopes_are_independent() {
        let store = Arc::new(InMemoryThrottleStore::new());
        let ledger = ledger(&store, ThrottleConfig::default());

        seed(&store, (0..6).map(|_| ThrottleEvent::ip("10.0.0.1"))).await;
        seed(&store, (0..6).map(|_| ThrottleEvent::user("1"))).await;

        assert!(ledger.ip_delay("10.0.0.1").await.unwrap() > 0);
        assert_eq!(ledger.ip_delay("10.0.0.2").await.unwrap(), 0);

        let jane = User::new("1", "jane@example.com", "");
        let john = User::new("2", "john@example.com", "");
        assert!(ledger.user_delay(&jane).await.unwrap() > 0);
        assert_eq!(ledger.user_delay(&john).await.unwrap(), 0);
    }

    #[traced_test]
    #[tokio::test]
    async fn test_log_records_each_known_scope() {
        let store = Arc::new(InMemoryThrottleStore::new());
        let ledger = ledger(&store, ThrottleConfig::default());
        let user = User::new("1", "jane@example.com", "");

        ledger.log(Some("10.0.0.1"), Some(&user)).await.unwrap();
        ledger.log::<User>(None, None).await.unwrap();

        let events = store.events();
        assert_eq!(events.len(), 4);
        assert_eq!(events.iter().filter(|e| e.scope == ThrottleScope::Global).count(), 2);
        assert_eq!(events.iter().filter(|e| e.scope == ThrottleScope::Ip).count(), 1);
        assert_eq!(events.iter().filter(|e| e.scope == ThrottleScope::User).count(), 1);
        assert!(logs_contain("Logging failed attempt: scope=ip key=10.0.0.1"));
    }

    #[tokio::test]
    async fn test_window_queries_are_cached_until_logged() {
        let store = Arc::new(InMemoryThrottleStore::new());
        let ledger = ledger(&store, ThrottleConfig::default());
        let user = User::new("1", "jane@example.com", "");

        seed(&store, (0..5).map(|_| ThrottleEvent::user("1"))).await;
        assert_eq!(ledger.user_delay(&user).await.unwrap(), 0);

        // written behind the ledger's back: still served from cache
        seed(&store, [ThrottleEvent::user("1")]).await;
        assert_eq!(ledger.user_delay(&user).await.unwrap(), 0);

        // logging through the ledger refreshes the scopes it wrote to
        ledger.log(None, Some(&user)).await.unwrap();
        assert!(ledger.user_delay(&user).await.unwrap() > 0);
    }
}
