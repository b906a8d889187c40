//! Home-screen widget updates
//!
//! The widget is fed from two places: the today screen pushes values while it
//! is in the foreground, and the OS triggers background updates. A background
//! update only queries the store when the background read grant is held;
//! otherwise the widget keeps showing the last pushed values.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use crate::clock::{Clock, SystemClock};
use crate::config::DashboardConfig;
use crate::error::HealthError;
use crate::repository::HealthRepository;
use crate::session::HealthSession;
use crate::stats::mean_of_present;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WidgetMode {
    #[default]
    SimpleCount,
    ProgressVsAverage,
}

/// Values the widget displays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetState {
    pub mode: WidgetMode,
    pub steps: u64,
    /// Average daily steps over recent days with data
    pub average: Option<f64>,
    /// `steps / average`; only in progress mode with a positive average
    pub progress: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

impl WidgetState {
    pub fn new(mode: WidgetMode, steps: u64, average: Option<f64>, updated_at: DateTime<Utc>) -> Self {
        let progress = match (mode, average) {
            (WidgetMode::ProgressVsAverage, Some(avg)) if avg > 0.0 => Some(steps as f64 / avg),
            _ => None,
        };
        Self {
            mode,
            steps,
            average,
            progress,
            updated_at,
        }
    }
}

/// Persistence for the last displayed widget state
pub trait WidgetStore: Send + Sync {
    fn load(&self) -> Option<WidgetState>;

    fn save(&self, state: &WidgetState);
}

#[derive(Debug, Default)]
pub struct MemoryWidgetStore {
    state: Mutex<Option<WidgetState>>,
}

impl MemoryWidgetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WidgetStore for MemoryWidgetStore {
    fn load(&self) -> Option<WidgetState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn save(&self, state: &WidgetState) {
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = Some(state.clone());
    }
}

/// Why a background update left the widget as it was
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoBackgroundPermission,
    QueryFailed(String),
}

/// Result of a background update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WidgetUpdate {
    Updated { state: WidgetState },
    Skipped { reason: SkipReason, last: Option<WidgetState> },
}

pub struct WidgetUpdater {
    session: Arc<HealthSession>,
    config: DashboardConfig,
    store: Arc<dyn WidgetStore>,
    mode: WidgetMode,
    clock: Arc<dyn Clock>,
}

impl WidgetUpdater {
    pub fn new(
        session: Arc<HealthSession>,
        config: DashboardConfig,
        store: Arc<dyn WidgetStore>,
        mode: WidgetMode,
    ) -> Self {
        Self {
            session,
            config,
            store,
            mode,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn mode(&self) -> WidgetMode {
        self.mode
    }

    pub fn last(&self) -> Option<WidgetState> {
        self.store.load()
    }

    /// Called by the today screen with values it already loaded
    pub fn push_from_foreground(&self, steps: u64, average: Option<f64>) -> WidgetState {
        let state = WidgetState::new(self.mode, steps, average, self.clock.now());
        self.store.save(&state);
        state
    }

    /// OS-triggered update. Never clears the widget and never fails.
    #[tracing::instrument(name = "Widget background update", skip(self))]
    pub async fn background_update(&self) -> WidgetUpdate {
        match self.session.has_background_permission().await {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!("No background read permission, keeping last widget state");
                return self.skipped(SkipReason::NoBackgroundPermission);
            }
            Err(e) => {
                tracing::warn!("Could not check background permission: {}", e);
                return self.skipped(SkipReason::QueryFailed(e.to_string()));
            }
        }

        match self.query().await {
            Ok(state) => {
                self.store.save(&state);
                WidgetUpdate::Updated { state }
            }
            Err(e) => {
                tracing::warn!("Widget query failed, keeping last state: {}", e);
                self.skipped(SkipReason::QueryFailed(e.to_string()))
            }
        }
    }

    fn skipped(&self, reason: SkipReason) -> WidgetUpdate {
        WidgetUpdate::Skipped {
            reason,
            last: self.store.load(),
        }
    }

    async fn query(&self) -> Result<WidgetState, HealthError> {
        let client = self.session.client().await?;
        let repo = HealthRepository::new(client, self.config.clone()).with_clock(Arc::clone(&self.clock));
        let today = repo.today();
        let days = self.config.widget_average_days.max(1);
        let first = today - Duration::days(i64::from(days));

        let (steps, history) = tokio::join!(repo.steps_for_day(today), repo.daily_steps(first, days));
        let steps = steps?;
        let average = mean_of_present(&history?);
        Ok(WidgetState::new(self.mode, steps.total, average, repo.now()))
    }
}
