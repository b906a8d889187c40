//! Health-data platform seam
//!
//! The platform owns every record. This trait is the whole surface Healthboard
//! uses: typed reads, platform-side aggregates and "changes since token".

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::HealthError;
use crate::permissions::Permission;
use crate::types::{AggregateMetric, AggregateValue, Record, RecordKind, TimeRange};

/// A single entry of the platform change log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Change {
    Upsert { record: Record },
    Deletion { record_id: String },
}

/// One page of changes since a token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangesPage {
    pub changes: Vec<Change>,
    /// Token to pass on the next call (valid even when `has_more` is false)
    pub next_token: String,
    pub has_more: bool,
    /// The platform no longer has history for the token; a full reload is needed
    pub token_expired: bool,
}

/// Client handle to the platform health-data store
#[async_trait]
pub trait HealthStore: Send + Sync {
    /// Permissions currently granted to this app
    async fn granted_permissions(&self) -> Result<HashSet<Permission>, HealthError>;

    /// Read raw records of one kind overlapping `range`
    async fn read_records(
        &self,
        kind: RecordKind,
        range: TimeRange,
    ) -> Result<Vec<Record>, HealthError>;

    /// Platform-side aggregation over `range`
    async fn aggregate(
        &self,
        metric: AggregateMetric,
        range: TimeRange,
    ) -> Result<AggregateValue, HealthError>;

    /// Issue a changes token scoped to `kinds`
    async fn changes_token(&self, kinds: &[RecordKind]) -> Result<String, HealthError>;

    /// Changes recorded since `token` was issued. A token may be consumed by
    /// the call; continue from `next_token`.
    async fn changes(&self, token: &str) -> Result<ChangesPage, HealthError>;
}
