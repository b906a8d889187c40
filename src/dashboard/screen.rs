//! Screen state containers
//!
//! A screen owns a loader and publishes its snapshot on a watch channel. The
//! snapshot is only ever replaced whole, by the task running the refresh.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::{watch, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::loaders::{HistoryLoader, SnapshotLoader, TodayLoader, TrendsLoader};
use crate::clock::{Clock, SystemClock};
use crate::config::DashboardConfig;
use crate::error::HealthError;
use crate::repository::HealthRepository;
use crate::session::{Availability, HealthSession};
use crate::sync::{ChangeTracker, TokenStore};
use crate::types::RecordKind;

/// What the UI renders for a screen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "snapshot", rename_all = "snake_case")]
pub enum ScreenState<T> {
    Loading,
    /// The platform store is missing or outdated; nothing can be shown
    Unavailable(Availability),
    /// Could not reach the platform client; `retry()` tries again
    Failed(String),
    Ready(T),
}

impl<T> ScreenState<T> {
    pub fn snapshot(&self) -> Option<&T> {
        match self {
            ScreenState::Ready(s) => Some(s),
            _ => None,
        }
    }
}

struct Connected {
    repo: HealthRepository,
    tracker: Option<ChangeTracker>,
}

struct ScreenInner<L: SnapshotLoader> {
    session: Arc<HealthSession>,
    config: DashboardConfig,
    clock: Arc<dyn Clock>,
    tokens: Option<Arc<dyn TokenStore>>,
    loader: L,
    connected: OnceCell<Connected>,
    state: watch::Sender<ScreenState<L::Snapshot>>,
    loaded_anchor: Mutex<Option<NaiveDate>>,
    cycle: tokio::sync::Mutex<()>,
}

impl<L: SnapshotLoader> ScreenInner<L> {
    async fn connect(&self) -> Result<&Connected, HealthError> {
        self.connected
            .get_or_try_init(|| async {
                let client = self.session.client().await?;
                let repo = HealthRepository::new(Arc::clone(&client), self.config.clone())
                    .with_clock(Arc::clone(&self.clock));
                let tracker = self.tokens.as_ref().map(|tokens| {
                    ChangeTracker::new(
                        client,
                        Arc::clone(tokens),
                        &RecordKind::ALL,
                        self.config.token_ttl(),
                    )
                    .with_clock(Arc::clone(&self.clock))
                });
                Ok(Connected { repo, tracker })
            })
            .await
    }

    /// Resolve the platform or publish why it cannot be used
    async fn ready(&self) -> Option<&Connected> {
        let status = self.session.availability();
        if status != Availability::Available {
            tracing::warn!("Health platform {}", status);
            self.state.send_replace(ScreenState::Unavailable(status));
            return None;
        }
        match self.connect().await {
            Ok(connected) => Some(connected),
            Err(HealthError::Unavailable(status)) => {
                self.state.send_replace(ScreenState::Unavailable(status));
                None
            }
            Err(e) => {
                tracing::error!("Could not connect to health platform: {}", e);
                // A stale snapshot beats an error screen.
                let has_snapshot = self.state.borrow().snapshot().is_some();
                if !has_snapshot {
                    self.state.send_replace(ScreenState::Failed(e.to_string()));
                }
                None
            }
        }
    }

    async fn load(&self, connected: &Connected) {
        let anchor = self.loader.anchor(&connected.repo);
        let snapshot = self.loader.load(&connected.repo).await;
        *self.loaded_anchor.lock().unwrap_or_else(|p| p.into_inner()) = Some(anchor);
        self.state.send_replace(ScreenState::Ready(snapshot));
    }

    /// Full batch reload. The changes token is taken first so writes that
    /// land while the batch runs show up on the next tick.
    async fn refresh(&self) {
        let _cycle = self.cycle.lock().await;
        let Some(connected) = self.ready().await else {
            return;
        };
        if let Some(tracker) = &connected.tracker {
            if let Err(e) = tracker.reset().await {
                tracing::warn!("Could not seed changes token: {}", e);
            }
        }
        self.load(connected).await;
    }

    /// Timer tick: reload only when the platform reports changes
    async fn scheduled_refresh(&self) {
        let _cycle = self.cycle.lock().await;
        let Some(connected) = self.ready().await else {
            return;
        };

        let anchor = self.loader.anchor(&connected.repo);
        let loaded = *self.loaded_anchor.lock().unwrap_or_else(|p| p.into_inner());
        let has_snapshot = self.state.borrow().snapshot().is_some();

        let reload = match &connected.tracker {
            _ if !has_snapshot || loaded != Some(anchor) => true,
            Some(tracker) => tracker.refresh().await.needs_reload(),
            None => true,
        };

        if reload {
            tracing::debug!("Scheduled refresh reloading snapshot");
            self.load(connected).await;
        } else {
            tracing::debug!("No changes since last refresh");
        }
    }
}

/// Observable state container for one screen
pub struct ScreenModel<L: SnapshotLoader> {
    inner: Arc<ScreenInner<L>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl<L: SnapshotLoader> ScreenModel<L> {
    pub fn new(session: Arc<HealthSession>, config: DashboardConfig, loader: L) -> Self {
        let (state, _) = watch::channel(ScreenState::Loading);
        Self {
            inner: Arc::new(ScreenInner {
                session,
                config,
                clock: Arc::new(SystemClock),
                tokens: None,
                loader,
                connected: OnceCell::new(),
                state,
                loaded_anchor: Mutex::new(None),
                cycle: tokio::sync::Mutex::new(()),
            }),
            timer: Mutex::new(None),
        }
    }

    /// Configure the screen before it is first shared with a timer task
    fn configure(mut self, apply: impl FnOnce(&mut ScreenInner<L>)) -> Self {
        self.stop();
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => {
                apply(inner);
                inner.connected = OnceCell::new();
            }
            None => tracing::warn!("Screen already running, configuration ignored"),
        }
        self
    }

    /// Use differential sync on timer ticks, persisting tokens in `tokens`
    pub fn with_token_store(self, tokens: Arc<dyn TokenStore>) -> Self {
        self.configure(|inner| inner.tokens = Some(tokens))
    }

    pub fn with_clock(self, clock: Arc<dyn Clock>) -> Self {
        self.configure(|inner| inner.clock = clock)
    }

    pub fn loader(&self) -> &L {
        &self.inner.loader
    }

    pub fn subscribe(&self) -> watch::Receiver<ScreenState<L::Snapshot>> {
        self.inner.state.subscribe()
    }

    pub fn current(&self) -> ScreenState<L::Snapshot> {
        self.inner.state.borrow().clone()
    }

    /// Reload every metric now
    #[tracing::instrument(name = "Screen refresh", skip(self))]
    pub async fn refresh(&self) {
        self.inner.refresh().await;
    }

    /// Manual retry after failures; re-runs the whole batch
    pub async fn retry(&self) {
        self.refresh().await;
    }

    /// One timer tick, exposed for hosts that drive their own scheduling
    pub async fn tick(&self) {
        self.inner.scheduled_refresh().await;
    }

    pub fn is_auto_refreshing(&self) -> bool {
        self.timer
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Screen became active: load now, then refresh on every interval
    pub fn on_foreground(&self) {
        let mut timer = self.timer.lock().unwrap_or_else(|p| p.into_inner());
        if timer.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let period = self.inner.config.refresh_interval();
        *timer = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            inner.refresh().await;
            loop {
                ticker.tick().await;
                inner.scheduled_refresh().await;
            }
        }));
    }

    /// Screen left the foreground: stop the timer unless background reads are granted
    pub async fn on_background(&self) {
        match self.inner.session.has_background_permission().await {
            Ok(true) => {
                tracing::debug!("Background read granted, keeping refresh timer");
            }
            Ok(false) => self.stop(),
            Err(e) => {
                tracing::debug!("Stopping refresh timer: {}", e);
                self.stop();
            }
        }
    }

    pub fn stop(&self) {
        if let Some(handle) = self.timer.lock().unwrap_or_else(|p| p.into_inner()).take() {
            handle.abort();
        }
    }
}

impl<L: SnapshotLoader> Drop for ScreenModel<L> {
    fn drop(&mut self) {
        self.stop();
    }
}

pub type TodayScreen = ScreenModel<TodayLoader>;
pub type HistoryScreen = ScreenModel<HistoryLoader>;
pub type TrendsScreen = ScreenModel<TrendsLoader>;

impl ScreenModel<TodayLoader> {
    pub fn today(session: Arc<HealthSession>, config: DashboardConfig) -> Self {
        Self::new(session, config, TodayLoader)
    }
}

impl ScreenModel<HistoryLoader> {
    pub fn history(session: Arc<HealthSession>, config: DashboardConfig) -> Self {
        Self::new(session, config, HistoryLoader::new())
    }

    /// Pick the day to show and reload
    pub async fn select_date(&self, date: NaiveDate) {
        self.loader().set_date(date);
        self.refresh().await;
    }
}

impl ScreenModel<TrendsLoader> {
    pub fn trends(session: Arc<HealthSession>, config: DashboardConfig) -> Self {
        let days = config.trend_days;
        Self::new(session, config, TrendsLoader::new(days))
    }

    /// Switch the period length (e.g. 7, 30, 90 days) and reload
    pub async fn select_period(&self, days: u32) {
        self.loader().set_days(days);
        self.refresh().await;
    }
}
