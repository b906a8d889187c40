//! In-process implementation of the platform seam
//!
//! `LocalHealthStore` keeps records in memory, keeps a change log for
//! differential sync and can be loaded from an export file. It backs the CLI
//! and every test in this crate.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::error::HealthError;
use crate::permissions::{required_permissions, Permission};
use crate::platform::{Change, ChangesPage, HealthStore};
use crate::session::{Availability, HealthPlatform};
use crate::stats::Stats;
use crate::types::{AggregateMetric, AggregateValue, Record, RecordKind, TimeRange};

/// How long the platform keeps change history for a token
pub const DEFAULT_TOKEN_TTL_DAYS: i64 = 30;

/// Maximum number of changes returned per page
pub const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
struct TokenState {
    position: usize,
    kinds: HashSet<RecordKind>,
    issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct LogEntry {
    kind: RecordKind,
    change: Change,
}

#[derive(Debug, Default)]
struct Inner {
    records: Vec<Record>,
    log: Vec<LogEntry>,
    tokens: HashMap<String, TokenState>,
    granted: HashSet<Permission>,
    failing: HashSet<RecordKind>,
    fail_changes: bool,
    now: Option<DateTime<Utc>>,
}

/// In-memory health-data store with a change log
#[derive(Debug)]
pub struct LocalHealthStore {
    inner: Mutex<Inner>,
    token_ttl: Duration,
    page_size: usize,
    reads: AtomicUsize,
}

impl Default for LocalHealthStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Export file layout accepted by [`LocalHealthStore::from_export_json`]
#[derive(Debug, Deserialize)]
pub struct HealthExport {
    #[serde(default = "default_availability")]
    pub availability: Availability,
    /// Granted permissions; all read scopes when absent
    #[serde(default)]
    pub granted: Option<Vec<Permission>>,
    #[serde(default)]
    pub records: Vec<Record>,
}

fn default_availability() -> Availability {
    Availability::Available
}

impl LocalHealthStore {
    /// Empty store with every read scope granted (background read not granted)
    pub fn new() -> Self {
        let inner = Inner {
            granted: required_permissions(),
            ..Inner::default()
        };
        Self {
            inner: Mutex::new(inner),
            token_ttl: Duration::days(DEFAULT_TOKEN_TTL_DAYS),
            page_size: DEFAULT_PAGE_SIZE,
            reads: AtomicUsize::new(0),
        }
    }

    /// Parse an export file into a store and its reported availability
    pub fn from_export_json(json: &str) -> Result<(Self, Availability), HealthError> {
        let export: HealthExport = serde_json::from_str(json)?;
        let mut store = Self::new();
        if let Some(granted) = export.granted {
            store = store.with_granted(granted);
        }
        for record in export.records {
            store.insert(record);
        }
        Ok((store, export.availability))
    }

    pub fn with_granted(self, granted: impl IntoIterator<Item = Permission>) -> Self {
        self.set_granted(granted);
        self
    }

    pub fn with_background_read(self, granted: bool) -> Self {
        {
            let mut inner = self.lock();
            if granted {
                inner.granted.insert(Permission::BackgroundRead);
            } else {
                inner.granted.remove(&Permission::BackgroundRead);
            }
        }
        self
    }

    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn set_granted(&self, granted: impl IntoIterator<Item = Permission>) {
        self.lock().granted = granted.into_iter().collect();
    }

    /// Pin the store clock (token issue and expiry)
    pub fn set_now(&self, now: DateTime<Utc>) {
        self.lock().now = Some(now);
    }

    /// Make reads and aggregates of `kind` fail until cleared
    pub fn fail_kind(&self, kind: RecordKind) {
        self.lock().failing.insert(kind);
    }

    pub fn clear_failures(&self) {
        self.lock().failing.clear();
    }

    /// Make `changes` calls fail with a transient error
    pub fn fail_changes(&self, fail: bool) {
        self.lock().fail_changes = fail;
    }

    /// Insert or replace a record (matched by id) and log the upsert
    pub fn insert(&self, record: Record) {
        let mut inner = self.lock();
        let id = record.metadata().id.clone();
        inner.records.retain(|r| r.metadata().id != id);
        inner.log.push(LogEntry {
            kind: record.kind(),
            change: Change::Upsert {
                record: record.clone(),
            },
        });
        inner.records.push(record);
    }

    /// Delete a record by id; returns whether it existed
    pub fn delete(&self, record_id: &str) -> bool {
        let mut inner = self.lock();
        let Some(index) = inner.records.iter().position(|r| r.metadata().id == record_id) else {
            return false;
        };
        let removed = inner.records.remove(index);
        inner.log.push(LogEntry {
            kind: removed.kind(),
            change: Change::Deletion {
                record_id: record_id.to_string(),
            },
        });
        true
    }

    pub fn record_count(&self) -> usize {
        self.lock().records.len()
    }

    /// Number of changes tokens the store still honors
    pub fn live_tokens(&self) -> usize {
        self.lock().tokens.len()
    }

    /// Number of `read_records`/`aggregate` calls served
    pub fn read_calls(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn now(inner: &Inner) -> DateTime<Utc> {
        inner.now.unwrap_or_else(Utc::now)
    }

    fn check_failing(inner: &Inner, kind: RecordKind) -> Result<(), HealthError> {
        if inner.failing.contains(&kind) {
            return Err(HealthError::Read {
                kind,
                message: "remote exception: rate limited".to_string(),
            });
        }
        Ok(())
    }

    fn issue_token(inner: &mut Inner, kinds: HashSet<RecordKind>, position: usize) -> String {
        let token = Uuid::new_v4().to_string();
        let issued_at = Self::now(inner);
        inner.tokens.insert(
            token.clone(),
            TokenState {
                position,
                kinds,
                issued_at,
            },
        );
        token
    }
}

/// Portion of an interval amount that falls within `range`
fn prorated(start: DateTime<Utc>, end: DateTime<Utc>, amount: f64, range: &TimeRange) -> f64 {
    amount * range.overlap_fraction(start, end)
}

fn aggregate_records(metric: AggregateMetric, records: &[&Record], range: &TimeRange) -> Option<f64> {
    match metric {
        AggregateMetric::RestingHeartRateAvg => {
            let values = records.iter().filter_map(|r| match r {
                Record::RestingHeartRate(rhr) => Some(rhr.value),
                _ => None,
            });
            Stats::from_values(values).map(|s| s.avg)
        }
        _ => {
            let amounts: Vec<f64> = records
                .iter()
                .filter_map(|r| match r {
                    Record::Steps(s) => Some(prorated(s.start, s.end, s.count as f64, range)),
                    Record::ActiveCaloriesBurned(c)
                    | Record::TotalCaloriesBurned(c)
                    | Record::Distance(c) => Some(prorated(c.start, c.end, c.amount, range)),
                    _ => None,
                })
                .collect();
            if amounts.is_empty() {
                None
            } else {
                Some(amounts.iter().sum())
            }
        }
    }
}

#[async_trait]
impl HealthStore for LocalHealthStore {
    async fn granted_permissions(&self) -> Result<HashSet<Permission>, HealthError> {
        Ok(self.lock().granted.clone())
    }

    async fn read_records(
        &self,
        kind: RecordKind,
        range: TimeRange,
    ) -> Result<Vec<Record>, HealthError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let inner = self.lock();
        Self::check_failing(&inner, kind)?;
        let mut records: Vec<Record> = inner
            .records
            .iter()
            .filter(|r| r.kind() == kind && r.falls_in(&range))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.start());
        Ok(records)
    }

    async fn aggregate(
        &self,
        metric: AggregateMetric,
        range: TimeRange,
    ) -> Result<AggregateValue, HealthError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let inner = self.lock();
        Self::check_failing(&inner, metric.kind()).map_err(|e| HealthError::Aggregate {
            metric,
            message: e.to_string(),
        })?;
        let matching: Vec<&Record> = inner
            .records
            .iter()
            .filter(|r| r.kind() == metric.kind() && r.falls_in(&range))
            .collect();
        Ok(AggregateValue {
            metric,
            value: aggregate_records(metric, &matching, &range),
        })
    }

    async fn changes_token(&self, kinds: &[RecordKind]) -> Result<String, HealthError> {
        let mut inner = self.lock();
        let now = Self::now(&inner);
        let ttl = self.token_ttl;
        inner.tokens.retain(|_, t| now - t.issued_at <= ttl);
        let position = inner.log.len();
        let kinds = kinds.iter().copied().collect();
        Ok(Self::issue_token(&mut inner, kinds, position))
    }

    async fn changes(&self, token: &str) -> Result<ChangesPage, HealthError> {
        let mut inner = self.lock();
        if inner.fail_changes {
            return Err(HealthError::Read {
                kind: RecordKind::Steps,
                message: "changes request failed".to_string(),
            });
        }
        // A token is single use; reading from it hands out its successor.
        let state = inner
            .tokens
            .remove(token)
            .ok_or_else(|| HealthError::InvalidToken(token.to_string()))?;

        if Self::now(&inner) - state.issued_at > self.token_ttl {
            return Ok(ChangesPage {
                changes: Vec::new(),
                next_token: token.to_string(),
                has_more: false,
                token_expired: true,
            });
        }

        let mut changes = Vec::new();
        let mut position = state.position;
        while position < inner.log.len() && changes.len() < self.page_size {
            let entry = &inner.log[position];
            if state.kinds.contains(&entry.kind) {
                changes.push(entry.change.clone());
            }
            position += 1;
        }
        let has_more = inner.log[position..]
            .iter()
            .any(|e| state.kinds.contains(&e.kind));

        let next_token = Self::issue_token(&mut inner, state.kinds, position);
        Ok(ChangesPage {
            changes,
            next_token,
            has_more,
            token_expired: false,
        })
    }
}

/// Platform entry point serving a shared [`LocalHealthStore`]
pub struct LocalPlatform {
    store: Arc<LocalHealthStore>,
    status: Availability,
    created: AtomicUsize,
}

impl LocalPlatform {
    pub fn new(store: LocalHealthStore) -> Self {
        Self::from_shared(Arc::new(store))
    }

    pub fn from_shared(store: Arc<LocalHealthStore>) -> Self {
        Self {
            store,
            status: Availability::Available,
            created: AtomicUsize::new(0),
        }
    }

    /// Platform reporting `status`, backed by an empty store
    pub fn with_status(status: Availability) -> Self {
        Self::new(LocalHealthStore::new()).status(status)
    }

    pub fn status(mut self, status: Availability) -> Self {
        self.status = status;
        self
    }

    /// Load a platform from an export file
    pub fn from_export_json(json: &str) -> Result<Self, HealthError> {
        let (store, availability) = LocalHealthStore::from_export_json(json)?;
        Ok(Self::new(store).status(availability))
    }

    pub fn store(&self) -> Arc<LocalHealthStore> {
        Arc::clone(&self.store)
    }

    pub fn clients_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl HealthPlatform for LocalPlatform {
    fn sdk_status(&self) -> Availability {
        self.status
    }

    fn create_client(&self) -> Result<Arc<dyn HealthStore>, HealthError> {
        if self.status != Availability::Available {
            return Err(HealthError::Unavailable(self.status));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(self.store.clone() as Arc<dyn HealthStore>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures::*;

    fn day_range() -> TimeRange {
        TimeRange::new(at("2024-01-15T00:00:00Z"), at("2024-01-16T00:00:00Z")).unwrap()
    }

    #[tokio::test]
    async fn test_read_filters_by_kind_and_range() {
        let store = LocalHealthStore::new();
        store.insert(steps("a", "phone", "2024-01-15T08:00:00Z", "2024-01-15T09:00:00Z", 500));
        store.insert(steps("b", "phone", "2024-01-14T08:00:00Z", "2024-01-14T09:00:00Z", 700));
        store.insert(instant(RecordKind::BloodGlucose, "g", "2024-01-15T07:00:00Z", 5.1));

        let records = store.read_records(RecordKind::Steps, day_range()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].metadata().id, "a");
    }

    #[tokio::test]
    async fn test_insert_replaces_by_id() {
        let store = LocalHealthStore::new();
        store.insert(steps("a", "phone", "2024-01-15T08:00:00Z", "2024-01-15T09:00:00Z", 500));
        store.insert(steps("a", "phone", "2024-01-15T08:00:00Z", "2024-01-15T09:00:00Z", 800));
        assert_eq!(store.record_count(), 1);
    }

    #[tokio::test]
    async fn test_aggregate_prorates_straddling_intervals() {
        let store = LocalHealthStore::new();
        store.insert(steps("a", "phone", "2024-01-14T23:00:00Z", "2024-01-15T01:00:00Z", 1000));
        store.insert(steps("b", "phone", "2024-01-15T10:00:00Z", "2024-01-15T11:00:00Z", 300));

        let value = store
            .aggregate(AggregateMetric::StepsTotal, day_range())
            .await
            .unwrap();
        assert_eq!(value.value, Some(800.0));

        let empty = store
            .aggregate(AggregateMetric::DistanceTotal, day_range())
            .await
            .unwrap();
        assert_eq!(empty.value, None);
    }

    #[tokio::test]
    async fn test_injected_failure_is_per_kind() {
        let store = LocalHealthStore::new();
        store.fail_kind(RecordKind::HeartRate);

        assert!(store.read_records(RecordKind::HeartRate, day_range()).await.is_err());
        assert!(store.read_records(RecordKind::Steps, day_range()).await.is_ok());
    }

    #[tokio::test]
    async fn test_changes_scoped_to_token_kinds() {
        let store = LocalHealthStore::new();
        let token = store.changes_token(&[RecordKind::Steps]).await.unwrap();

        store.insert(steps("a", "phone", "2024-01-15T08:00:00Z", "2024-01-15T09:00:00Z", 500));
        store.insert(instant(RecordKind::BloodGlucose, "g", "2024-01-15T07:00:00Z", 5.1));
        store.delete("a");

        let page = store.changes(&token).await.unwrap();
        assert_eq!(page.changes.len(), 2);
        assert!(matches!(page.changes[1], Change::Deletion { .. }));
        assert!(!page.has_more);

        let next = store.changes(&page.next_token).await.unwrap();
        assert!(next.changes.is_empty());
    }

    #[tokio::test]
    async fn test_changes_paginate() {
        let store = LocalHealthStore::new().with_page_size(2);
        let token = store.changes_token(&[RecordKind::Steps]).await.unwrap();
        for i in 0..5 {
            store.insert(steps(&format!("s{i}"), "phone", "2024-01-15T08:00:00Z", "2024-01-15T09:00:00Z", 10));
        }

        let first = store.changes(&token).await.unwrap();
        assert_eq!(first.changes.len(), 2);
        assert!(first.has_more);
        let second = store.changes(&first.next_token).await.unwrap();
        let third = store.changes(&second.next_token).await.unwrap();
        assert_eq!(third.changes.len(), 1);
        assert!(!third.has_more);
    }

    #[tokio::test]
    async fn test_token_expiry_and_rejection() {
        let store = LocalHealthStore::new();
        store.set_now(at("2024-01-01T00:00:00Z"));
        let token = store.changes_token(&[RecordKind::Steps]).await.unwrap();

        store.set_now(at("2024-02-15T00:00:00Z"));
        let page = store.changes(&token).await.unwrap();
        assert!(page.token_expired);

        let err = store.changes("bogus").await.unwrap_err();
        assert!(err.is_token_rejection());
    }

    #[tokio::test]
    async fn test_consumed_and_expired_tokens_are_dropped() {
        let store = LocalHealthStore::new();
        store.set_now(at("2024-01-01T00:00:00Z"));
        let abandoned = store.changes_token(&[RecordKind::Steps]).await.unwrap();
        let mut token = store.changes_token(&[RecordKind::Steps]).await.unwrap();

        for _ in 0..100 {
            token = store.changes(&token).await.unwrap().next_token;
        }
        assert_eq!(store.live_tokens(), 2);

        assert!(store.changes(&abandoned).await.is_ok());
        let err = store.changes(&abandoned).await.unwrap_err();
        assert!(err.is_token_rejection());

        store.set_now(at("2024-03-01T00:00:00Z"));
        store.changes_token(&[RecordKind::Steps]).await.unwrap();
        assert_eq!(store.live_tokens(), 1);
    }

    #[test]
    fn test_export_parsing() {
        let json = r#"{
            "availability": "available",
            "granted": [{"type": "read", "kind": "steps"}, {"type": "background_read"}],
            "records": [{
                "kind": "steps",
                "metadata": {"id": "s1", "origin": "com.fitbit.FitbitMobile", "last_modified": "2024-01-15T09:00:00Z"},
                "start": "2024-01-15T08:00:00Z",
                "end": "2024-01-15T09:00:00Z",
                "count": 1200
            }]
        }"#;

        let (store, availability) = LocalHealthStore::from_export_json(json).unwrap();
        assert_eq!(availability, Availability::Available);
        assert_eq!(store.record_count(), 1);
        assert_eq!(store.lock().granted.len(), 2);
    }

    #[test]
    fn test_export_defaults_grant_all_reads() {
        let (store, _) = LocalHealthStore::from_export_json(r#"{"records": []}"#).unwrap();
        assert_eq!(store.lock().granted, required_permissions());
    }
}
