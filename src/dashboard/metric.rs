//! Per-metric fetch results
//!
//! Every metric in a snapshot is fetched on its own. A failure is logged and
//! leaves that metric empty; a missing grant is reported as `NoPermission`.

use serde::{Deserialize, Serialize};
use std::future::Future;

use crate::error::HealthError;
use crate::types::RecordKind;

/// Displayable state of one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum Metric<T> {
    Value(T),
    /// No data, or the fetch failed this cycle
    Empty,
    NoPermission,
}

impl<T> Default for Metric<T> {
    fn default() -> Self {
        Metric::Empty
    }
}

impl<T> Metric<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Metric::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Metric::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_value(&self) -> bool {
        matches!(self, Metric::Value(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Metric<U> {
        match self {
            Metric::Value(v) => Metric::Value(f(v)),
            Metric::Empty => Metric::Empty,
            Metric::NoPermission => Metric::NoPermission,
        }
    }
}

/// Run one fetch in isolation and turn its outcome into a [`Metric`]
pub async fn fetch_metric<T, F>(kind: RecordKind, fetch: F) -> Metric<T>
where
    F: Future<Output = Result<Option<T>, HealthError>>,
{
    match fetch.await {
        Ok(Some(value)) => Metric::Value(value),
        Ok(None) => Metric::Empty,
        Err(HealthError::PermissionDenied(_)) => {
            tracing::debug!("No read permission for {}", kind);
            Metric::NoPermission
        }
        Err(e) => {
            tracing::warn!("Failed to fetch {}: {}", kind, e);
            Metric::Empty
        }
    }
}
