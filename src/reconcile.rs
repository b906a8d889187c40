//! Source reconciliation for cumulative metrics
//!
//! Phones and wearables both write steps, so summing everything double-counts.
//! Readings are grouped by source; the first preferred source that reported
//! something wins, otherwise all sources are summed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::DataOrigin;

/// Default step source priority, wearables before the phone pedometer
pub const DEFAULT_STEP_SOURCES: &[&str] = &[
    "com.sec.android.app.shealth",
    "com.fitbit.FitbitMobile",
    "com.garmin.android.apps.connectmobile",
    "com.ouraring.oura",
    "com.google.android.apps.fitness",
];

/// Ordered list of preferred source identifiers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourcePriority(Vec<DataOrigin>);

impl Default for SourcePriority {
    fn default() -> Self {
        Self::new(DEFAULT_STEP_SOURCES.iter().copied())
    }
}

impl SourcePriority {
    pub fn new<S: Into<String>>(sources: impl IntoIterator<Item = S>) -> Self {
        Self(sources.into_iter().map(DataOrigin::new).collect())
    }

    pub fn sources(&self) -> &[DataOrigin] {
        &self.0
    }
}

/// One contribution to a cumulative total
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcedValue {
    pub origin: DataOrigin,
    pub value: f64,
}

/// Which readings the reconciled total came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "origin", rename_all = "snake_case")]
pub enum ChosenSource {
    Preferred(DataOrigin),
    /// No preferred source reported data; every source was summed
    All,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reconciled {
    pub total: f64,
    pub source: ChosenSource,
}

/// Per-source sums, ordered by source id
pub fn per_source_totals(readings: &[SourcedValue]) -> BTreeMap<DataOrigin, f64> {
    let mut totals = BTreeMap::new();
    for r in readings {
        *totals.entry(r.origin.clone()).or_insert(0.0) += r.value;
    }
    totals
}

/// Reconcile readings from several sources into one total
pub fn reconcile_cumulative(readings: &[SourcedValue], priority: &SourcePriority) -> Reconciled {
    let totals = per_source_totals(readings);

    for preferred in priority.sources() {
        if let Some(&total) = totals.get(preferred) {
            if total > 0.0 {
                return Reconciled {
                    total,
                    source: ChosenSource::Preferred(preferred.clone()),
                };
            }
        }
    }

    Reconciled {
        total: totals.values().sum(),
        source: ChosenSource::All,
    }
}
