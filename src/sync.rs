//! Differential sync over changes tokens
//!
//! After a full load a token is stored per set of tracked kinds. Scheduled
//! refreshes ask the platform what changed since the token instead of
//! reloading. An expired or rejected token is a cache miss: it is cleared and
//! the caller falls back to a full reload.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::clock::{Clock, SystemClock};
use crate::error::HealthError;
use crate::platform::{Change, HealthStore};
use crate::types::RecordKind;

/// Local key/string store for sync metadata
pub trait TokenStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, HealthError>;
    fn put(&self, key: &str, value: &str) -> Result<(), HealthError>;
    fn remove(&self, key: &str) -> Result<(), HealthError>;
}

#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.values.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self, key: &str) -> Result<Option<String>, HealthError> {
        Ok(self.values().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), HealthError> {
        self.values().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), HealthError> {
        self.values().remove(key);
        Ok(())
    }
}

/// Token store persisted as a flat JSON object on disk
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>, HealthError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, values: &BTreeMap<String, String>) -> Result<(), HealthError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(values)?)?;
        Ok(())
    }

    fn update(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, String>),
    ) -> Result<(), HealthError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut values = self.load()?;
        f(&mut values);
        self.save(&values)
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self, key: &str) -> Result<Option<String>, HealthError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        Ok(self.load()?.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), HealthError> {
        self.update(|values| {
            values.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), HealthError> {
        self.update(|values| {
            values.remove(key);
        })
    }
}

/// Stable storage key for a set of tracked kinds
pub fn token_key(kinds: &[RecordKind]) -> String {
    let mut names: Vec<&str> = kinds.iter().map(|k| k.as_str()).collect();
    names.sort_unstable();
    names.dedup();
    format!("changes_token:{}", names.join(","))
}

/// What a scheduled refresh should do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// No usable token; reload everything
    FullReload,
    Changes { upserts: usize, deletions: usize },
    NoChanges,
}

impl SyncOutcome {
    pub fn needs_reload(&self) -> bool {
        !matches!(self, SyncOutcome::NoChanges)
    }
}

/// Tracks platform changes for a fixed set of kinds
pub struct ChangeTracker {
    client: Arc<dyn HealthStore>,
    tokens: Arc<dyn TokenStore>,
    kinds: Vec<RecordKind>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl ChangeTracker {
    pub fn new(
        client: Arc<dyn HealthStore>,
        tokens: Arc<dyn TokenStore>,
        kinds: &[RecordKind],
        ttl: Duration,
    ) -> Self {
        Self {
            client,
            tokens,
            kinds: kinds.to_vec(),
            ttl,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn key(&self) -> String {
        token_key(&self.kinds)
    }

    fn issued_key(&self) -> String {
        format!("{}:issued_at", self.key())
    }

    pub fn stored_token(&self) -> Result<Option<String>, HealthError> {
        self.tokens.get(&self.key())
    }

    fn store_token(&self, token: &str) -> Result<(), HealthError> {
        self.tokens.put(&self.key(), token)?;
        self.tokens
            .put(&self.issued_key(), &self.clock.now().to_rfc3339())
    }

    fn clear_token(&self) -> Result<(), HealthError> {
        self.tokens.remove(&self.key())?;
        self.tokens.remove(&self.issued_key())
    }

    fn locally_expired(&self) -> Result<bool, HealthError> {
        let Some(issued) = self.tokens.get(&self.issued_key())? else {
            return Ok(false);
        };
        match DateTime::parse_from_rfc3339(&issued) {
            Ok(issued) => Ok(self.clock.now() - issued.with_timezone(&Utc) > self.ttl),
            Err(_) => Ok(true),
        }
    }

    /// Acquire and persist a fresh token; call after a successful full load
    pub async fn reset(&self) -> Result<(), HealthError> {
        let token = self.client.changes_token(&self.kinds).await?;
        self.store_token(&token)?;
        tracing::debug!("Stored new changes token for {}", self.key());
        Ok(())
    }

    /// Best-effort reseed; failures only cost a full reload next time
    async fn reseed(&self) {
        if let Err(e) = self.reset().await {
            tracing::warn!("Could not acquire changes token: {}", e);
        }
    }

    /// Decide whether a scheduled refresh needs to reload. Never fails.
    #[tracing::instrument(name = "Differential sync", skip(self), fields(key = %self.key()))]
    pub async fn refresh(&self) -> SyncOutcome {
        let token = match self.stored_token() {
            Ok(Some(token)) => token,
            Ok(None) => {
                tracing::debug!("No changes token stored, doing full reload");
                self.reseed().await;
                return SyncOutcome::FullReload;
            }
            Err(e) => {
                tracing::warn!("Token store unreadable, doing full reload: {}", e);
                return SyncOutcome::FullReload;
            }
        };

        if self.locally_expired().unwrap_or(true) {
            tracing::info!("Changes token past its lifetime, doing full reload");
            self.expire().await;
            return SyncOutcome::FullReload;
        }

        match self.drain(token).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_token_rejection() => {
                tracing::info!("Changes token rejected ({}), doing full reload", e);
                self.expire().await;
                SyncOutcome::FullReload
            }
            Err(e) => {
                tracing::warn!("Changes request failed, doing full reload: {}", e);
                SyncOutcome::FullReload
            }
        }
    }

    async fn expire(&self) {
        if let Err(e) = self.clear_token() {
            tracing::warn!("Could not clear changes token: {}", e);
        }
        self.reseed().await;
    }

    /// Page through changes until the platform reports no more
    async fn drain(&self, mut token: String) -> Result<SyncOutcome, HealthError> {
        let mut upserts = 0;
        let mut deletions = 0;

        loop {
            let page = self.client.changes(&token).await?;
            if page.token_expired {
                return Err(HealthError::TokenExpired);
            }
            for change in &page.changes {
                match change {
                    Change::Upsert { .. } => upserts += 1,
                    Change::Deletion { .. } => deletions += 1,
                }
            }
            token = page.next_token;
            if !page.has_more {
                break;
            }
        }

        // Only persist the token once the whole run has been read.
        self.store_token(&token)?;

        if upserts == 0 && deletions == 0 {
            Ok(SyncOutcome::NoChanges)
        } else {
            tracing::debug!("{} upserts and {} deletions since last sync", upserts, deletions);
            Ok(SyncOutcome::Changes { upserts, deletions })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::LocalHealthStore;
    use crate::types::fixtures::*;
    use pretty_assertions::assert_eq;

    const KINDS: &[RecordKind] = &[RecordKind::Steps, RecordKind::SleepSession];

    fn tracker(store: Arc<LocalHealthStore>, tokens: Arc<dyn TokenStore>, clock: Arc<ManualClock>) -> ChangeTracker {
        ChangeTracker::new(store, tokens, KINDS, Duration::days(30)).with_clock(clock)
    }

    fn setup() -> (Arc<LocalHealthStore>, Arc<MemoryTokenStore>, Arc<ManualClock>) {
        let now = at("2024-01-15T12:00:00Z");
        let store = Arc::new(LocalHealthStore::new());
        store.set_now(now);
        (store, Arc::new(MemoryTokenStore::new()), Arc::new(ManualClock::new(now)))
    }

    #[test]
    fn test_token_key_is_order_independent() {
        assert_eq!(
            token_key(&[RecordKind::SleepSession, RecordKind::Steps, RecordKind::Steps]),
            token_key(&[RecordKind::Steps, RecordKind::SleepSession])
        );
    }

    #[tokio::test]
    async fn test_first_refresh_is_full_reload_and_seeds_token() {
        let (store, tokens, clock) = setup();
        let tracker = tracker(store, tokens.clone(), clock);

        assert_eq!(tracker.refresh().await, SyncOutcome::FullReload);
        assert!(tracker.stored_token().unwrap().is_some());
        assert_eq!(tracker.refresh().await, SyncOutcome::NoChanges);
    }

    #[tokio::test]
    async fn test_changes_are_counted_and_token_advances() {
        let (store, tokens, clock) = setup();
        let tracker = tracker(store.clone(), tokens, clock);
        tracker.reset().await.unwrap();
        let before = tracker.stored_token().unwrap();

        store.insert(steps("s1", "phone", "2024-01-15T08:00:00Z", "2024-01-15T09:00:00Z", 100));
        store.insert(steps("s2", "phone", "2024-01-15T09:00:00Z", "2024-01-15T10:00:00Z", 100));
        store.delete("s1");
        store.insert(instant(RecordKind::BloodGlucose, "g", "2024-01-15T07:00:00Z", 5.0));

        assert_eq!(
            tracker.refresh().await,
            SyncOutcome::Changes { upserts: 2, deletions: 1 }
        );
        assert_ne!(tracker.stored_token().unwrap(), before);
        assert_eq!(tracker.refresh().await, SyncOutcome::NoChanges);
    }

    #[tokio::test]
    async fn test_multi_page_changes() {
        let now = at("2024-01-15T12:00:00Z");
        let store = Arc::new(LocalHealthStore::new().with_page_size(2));
        store.set_now(now);
        let tracker = tracker(store.clone(), Arc::new(MemoryTokenStore::new()), Arc::new(ManualClock::new(now)));
        tracker.reset().await.unwrap();

        for i in 0..5 {
            store.insert(steps(&format!("s{i}"), "phone", "2024-01-15T08:00:00Z", "2024-01-15T09:00:00Z", 1));
        }
        assert_eq!(
            tracker.refresh().await,
            SyncOutcome::Changes { upserts: 5, deletions: 0 }
        );
    }

    #[tokio::test]
    async fn test_platform_expired_token_falls_back_silently() {
        let (store, tokens, clock) = setup();
        let tracker = tracker(store.clone(), tokens, clock);
        tracker.reset().await.unwrap();
        let stale = tracker.stored_token().unwrap();

        // The platform ages the token out before our local bookkeeping does.
        store.set_now(at("2024-03-01T00:00:00Z"));
        assert_eq!(tracker.refresh().await, SyncOutcome::FullReload);

        let fresh = tracker.stored_token().unwrap();
        assert!(fresh.is_some());
        assert_ne!(fresh, stale);
        assert_eq!(tracker.refresh().await, SyncOutcome::NoChanges);
    }

    #[tokio::test]
    async fn test_locally_expired_token_is_cleared() {
        let (store, tokens, clock) = setup();
        let tracker = tracker(store.clone(), tokens, clock.clone());
        tracker.reset().await.unwrap();
        let stale = tracker.stored_token().unwrap();

        clock.advance(Duration::days(31));
        store.set_now(clock.now());
        assert_eq!(tracker.refresh().await, SyncOutcome::FullReload);
        assert_ne!(tracker.stored_token().unwrap(), stale);
    }

    #[tokio::test]
    async fn test_steady_polling_never_ages_out() {
        let (store, tokens, clock) = setup();
        let tracker = tracker(store.clone(), tokens, clock.clone());
        tracker.reset().await.unwrap();

        for _ in 0..3 {
            clock.advance(Duration::days(25));
            store.set_now(clock.now());
            assert_eq!(tracker.refresh().await, SyncOutcome::NoChanges);
        }
    }

    #[tokio::test]
    async fn test_rejected_token_falls_back_silently() {
        let (store, tokens, clock) = setup();
        let tracker = tracker(store, tokens.clone(), clock);
        tokens.put(&tracker.key(), "not-a-token").unwrap();

        assert_eq!(tracker.refresh().await, SyncOutcome::FullReload);
        let reseeded = tracker.stored_token().unwrap().unwrap();
        assert_ne!(reseeded, "not-a-token");
    }

    #[tokio::test]
    async fn test_transient_failure_keeps_token() {
        let (store, tokens, clock) = setup();
        let tracker = tracker(store.clone(), tokens, clock);
        tracker.reset().await.unwrap();
        let token = tracker.stored_token().unwrap();

        store.fail_changes(true);
        assert_eq!(tracker.refresh().await, SyncOutcome::FullReload);
        assert_eq!(tracker.stored_token().unwrap(), token);

        store.fail_changes(false);
        assert_eq!(tracker.refresh().await, SyncOutcome::NoChanges);
    }

    #[test]
    fn test_file_token_store_persists() {
        let path = std::env::temp_dir().join(format!("healthboard-tokens-{}.json", uuid::Uuid::new_v4()));
        let store = FileTokenStore::new(&path);

        assert_eq!(store.get("k").unwrap(), None);
        store.put("k", "v1").unwrap();
        store.put("other", "v2").unwrap();

        let reopened = FileTokenStore::new(&path);
        assert_eq!(reopened.get("k").unwrap(), Some("v1".to_string()));
        reopened.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
        assert_eq!(store.get("other").unwrap(), Some("v2".to_string()));

        std::fs::remove_file(&path).ok();
    }
}
