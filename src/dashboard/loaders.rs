//! Snapshot loaders for the today, history and trends screens

use async_trait::async_trait;
use chrono::{DateTime, Days, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use super::metric::{fetch_metric, Metric};
use crate::repository::{
    each_day, BloodPressureSummary, ExerciseSummary, HealthRepository, StepsSummary, VitalSummary,
};
use crate::sleep::{SleepSummary, SleepTrend};
use crate::stats::{count_present, mean_of_present, sum_of_present, Stats};
use crate::types::{AggregateMetric, Record, RecordKind};

/// Produces a complete snapshot from one batch of reads
#[async_trait]
pub trait SnapshotLoader: Send + Sync + 'static {
    type Snapshot: Clone + Send + Sync + 'static;

    async fn load(&self, repo: &HealthRepository) -> Self::Snapshot;

    /// Date the snapshot is anchored on; a change forces a full reload
    fn anchor(&self, repo: &HealthRepository) -> NaiveDate;
}

/// Every metric shown for a single day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaySnapshot {
    pub date: NaiveDate,
    pub loaded_at: DateTime<Utc>,
    pub steps: Metric<StepsSummary>,
    pub heart_rate: Metric<Stats>,
    pub resting_heart_rate: Metric<VitalSummary>,
    pub sleep: Metric<SleepSummary>,
    pub active_calories: Metric<f64>,
    pub total_calories: Metric<f64>,
    pub distance_meters: Metric<f64>,
    pub exercise: Metric<Vec<ExerciseSummary>>,
    pub blood_pressure: Metric<BloodPressureSummary>,
    pub body_temperature: Metric<VitalSummary>,
    pub oxygen_saturation: Metric<VitalSummary>,
    pub blood_glucose: Metric<VitalSummary>,
    pub respiratory_rate: Metric<VitalSummary>,
}

impl DaySnapshot {
    /// Number of metrics holding a value
    pub fn populated(&self) -> usize {
        [
            self.steps.is_value(),
            self.heart_rate.is_value(),
            self.resting_heart_rate.is_value(),
            self.sleep.is_value(),
            self.active_calories.is_value(),
            self.total_calories.is_value(),
            self.distance_meters.is_value(),
            self.exercise.is_value(),
            self.blood_pressure.is_value(),
            self.body_temperature.is_value(),
            self.oxygen_saturation.is_value(),
            self.blood_glucose.is_value(),
            self.respiratory_rate.is_value(),
        ]
        .iter()
        .filter(|v| **v)
        .count()
    }
}

/// Load every day metric concurrently; no fetch can fail the batch
pub async fn load_day(repo: &HealthRepository, date: NaiveDate) -> DaySnapshot {
    let (
        steps,
        heart_rate,
        resting_heart_rate,
        sleep,
        active_calories,
        total_calories,
        distance_meters,
        exercise,
        blood_pressure,
        body_temperature,
        oxygen_saturation,
        blood_glucose,
        respiratory_rate,
    ) = tokio::join!(
        fetch_metric(RecordKind::Steps, async {
            repo.steps_for_day(date).await.map(Some)
        }),
        fetch_metric(RecordKind::HeartRate, repo.heart_rate_for_day(date)),
        fetch_metric(RecordKind::RestingHeartRate, repo.resting_heart_rate_for_day(date)),
        fetch_metric(RecordKind::SleepSession, repo.sleep_for_night(date)),
        fetch_metric(RecordKind::ActiveCaloriesBurned, repo.active_calories_for_day(date)),
        fetch_metric(RecordKind::TotalCaloriesBurned, repo.total_calories_for_day(date)),
        fetch_metric(RecordKind::Distance, repo.distance_for_day(date)),
        fetch_metric(RecordKind::ExerciseSession, async {
            repo.exercise_sessions_for_day(date)
                .await
                .map(|sessions| (!sessions.is_empty()).then_some(sessions))
        }),
        fetch_metric(RecordKind::BloodPressure, repo.blood_pressure_for_day(date)),
        fetch_metric(RecordKind::BodyTemperature, repo.body_temperature_for_day(date)),
        fetch_metric(RecordKind::OxygenSaturation, repo.oxygen_saturation_for_day(date)),
        fetch_metric(RecordKind::BloodGlucose, repo.blood_glucose_for_day(date)),
        fetch_metric(RecordKind::RespiratoryRate, repo.respiratory_rate_for_day(date)),
    );

    DaySnapshot {
        date,
        loaded_at: repo.now(),
        steps,
        heart_rate,
        resting_heart_rate,
        sleep,
        active_calories,
        total_calories,
        distance_meters,
        exercise,
        blood_pressure,
        body_temperature,
        oxygen_saturation,
        blood_glucose,
        respiratory_rate,
    }
}

/// Current-day view: today's metrics plus the latest reading of each vital
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodaySnapshot {
    pub day: DaySnapshot,
    pub latest_vitals: BTreeMap<RecordKind, Metric<Record>>,
}

#[derive(Debug, Default)]
pub struct TodayLoader;

#[async_trait]
impl SnapshotLoader for TodayLoader {
    type Snapshot = TodaySnapshot;

    async fn load(&self, repo: &HealthRepository) -> TodaySnapshot {
        let today = repo.today();
        let latest = async {
            let mut latest_vitals = BTreeMap::new();
            for kind in RecordKind::VITALS {
                let metric = fetch_metric(kind, repo.latest_vital(kind)).await;
                latest_vitals.insert(kind, metric);
            }
            latest_vitals
        };
        let (day, latest_vitals) = tokio::join!(load_day(repo, today), latest);
        TodaySnapshot { day, latest_vitals }
    }

    fn anchor(&self, repo: &HealthRepository) -> NaiveDate {
        repo.today()
    }
}

/// Historical single-day view with a selectable date
#[derive(Debug)]
pub struct HistoryLoader {
    date: Mutex<Option<NaiveDate>>,
}

impl HistoryLoader {
    /// Starts on yesterday until a date is selected
    pub fn new() -> Self {
        Self {
            date: Mutex::new(None),
        }
    }

    pub fn on(date: NaiveDate) -> Self {
        Self {
            date: Mutex::new(Some(date)),
        }
    }

    pub fn set_date(&self, date: NaiveDate) {
        *self.date.lock().unwrap_or_else(|p| p.into_inner()) = Some(date);
    }

    fn selected(&self, repo: &HealthRepository) -> NaiveDate {
        self.date
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .unwrap_or_else(|| repo.today() - Duration::days(1))
    }
}

impl Default for HistoryLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotLoader for HistoryLoader {
    type Snapshot = DaySnapshot;

    async fn load(&self, repo: &HealthRepository) -> DaySnapshot {
        let date = self.selected(repo);
        load_day(repo, date).await
    }

    fn anchor(&self, repo: &HealthRepository) -> NaiveDate {
        self.selected(repo)
    }
}

/// One value of a daily series; `None` when the day has no data
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyPoint {
    pub date: NaiveDate,
    pub value: Option<f64>,
}

/// Daily series with summary statistics over the days that have data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSeries {
    pub points: Vec<DailyPoint>,
    pub average: Option<f64>,
    pub total: Option<f64>,
    pub days_with_data: usize,
}

impl TrendSeries {
    pub fn from_values(first: NaiveDate, values: Vec<Option<f64>>) -> Self {
        Self {
            average: mean_of_present(&values),
            total: sum_of_present(&values),
            days_with_data: count_present(&values),
            points: points(first, &values),
        }
    }

    fn from_nights(first: NaiveDate, nights: Vec<Option<SleepSummary>>) -> Self {
        let trend = SleepTrend::from_nights(&nights);
        let values: Vec<Option<f64>> = nights
            .iter()
            .map(|n| n.as_ref().map(|s| s.total_sleep_minutes))
            .collect();
        Self {
            points: points(first, &values),
            average: trend.average_minutes,
            total: trend.total_minutes,
            days_with_data: trend.nights_with_data,
        }
    }

    /// `None` when no day in the period had data
    fn non_empty(self) -> Option<Self> {
        (self.days_with_data > 0).then_some(self)
    }
}

fn points(first: NaiveDate, values: &[Option<f64>]) -> Vec<DailyPoint> {
    each_day(first, values.len() as u32)
        .zip(values.iter())
        .map(|(date, value)| DailyPoint {
            date,
            value: *value,
        })
        .collect()
}

/// Multi-day trend view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendsSnapshot {
    pub first: NaiveDate,
    pub last: NaiveDate,
    pub days: u32,
    pub loaded_at: DateTime<Utc>,
    pub steps: Metric<TrendSeries>,
    pub sleep_minutes: Metric<TrendSeries>,
    pub resting_heart_rate: Metric<TrendSeries>,
    pub active_calories: Metric<TrendSeries>,
    pub distance_meters: Metric<TrendSeries>,
}

/// Longest trend period a screen offers
pub const MAX_TREND_DAYS: u32 = 366;

/// Trends over the `days` days ending at an anchor date (today by default)
#[derive(Debug)]
pub struct TrendsLoader {
    days: AtomicU32,
    anchor: Mutex<Option<NaiveDate>>,
}

impl TrendsLoader {
    pub fn new(days: u32) -> Self {
        Self {
            days: AtomicU32::new(days.clamp(1, MAX_TREND_DAYS)),
            anchor: Mutex::new(None),
        }
    }

    pub fn set_days(&self, days: u32) {
        self.days.store(days.clamp(1, MAX_TREND_DAYS), Ordering::SeqCst);
    }

    pub fn days(&self) -> u32 {
        self.days.load(Ordering::SeqCst)
    }

    /// Pin the last day of the period; `None` follows today
    pub fn set_anchor(&self, anchor: Option<NaiveDate>) {
        *self.anchor.lock().unwrap_or_else(|p| p.into_inner()) = anchor;
    }

    fn last_day(&self, repo: &HealthRepository) -> NaiveDate {
        self.anchor
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .unwrap_or_else(|| repo.today())
    }
}

#[async_trait]
impl SnapshotLoader for TrendsLoader {
    type Snapshot = TrendsSnapshot;

    async fn load(&self, repo: &HealthRepository) -> TrendsSnapshot {
        let days = self.days();
        let last = self.last_day(repo);
        // An anchor at the start of the calendar leaves every series empty.
        let first = last
            .checked_sub_days(Days::new(u64::from(days - 1)))
            .unwrap_or(NaiveDate::MIN);

        let series = |values: Vec<Option<f64>>| TrendSeries::from_values(first, values).non_empty();
        let (steps, sleep_minutes, resting_heart_rate, active_calories, distance_meters) = tokio::join!(
            fetch_metric(RecordKind::Steps, async {
                repo.daily_steps(first, days).await.map(series)
            }),
            fetch_metric(RecordKind::SleepSession, async {
                repo.nightly_sleep(first, days)
                    .await
                    .map(|nights| TrendSeries::from_nights(first, nights).non_empty())
            }),
            fetch_metric(RecordKind::RestingHeartRate, async {
                repo.daily_aggregate(AggregateMetric::RestingHeartRateAvg, first, days)
                    .await
                    .map(series)
            }),
            fetch_metric(RecordKind::ActiveCaloriesBurned, async {
                repo.daily_aggregate(AggregateMetric::ActiveCaloriesTotal, first, days)
                    .await
                    .map(series)
            }),
            fetch_metric(RecordKind::Distance, async {
                repo.daily_aggregate(AggregateMetric::DistanceTotal, first, days)
                    .await
                    .map(series)
            }),
        );

        TrendsSnapshot {
            first,
            last,
            days,
            loaded_at: repo.now(),
            steps,
            sleep_minutes,
            resting_heart_rate,
            active_calories,
            distance_meters,
        }
    }

    fn anchor(&self, repo: &HealthRepository) -> NaiveDate {
        self.last_day(repo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::DashboardConfig;
    use crate::permissions::Permission;
    use crate::store::LocalHealthStore;
    use crate::types::fixtures::*;
    use crate::types::{IntervalRecord, SleepStageType};
    use std::sync::Arc;

    fn repo(store: Arc<LocalHealthStore>) -> HealthRepository {
        HealthRepository::new(store, DashboardConfig::utc())
            .with_clock(Arc::new(ManualClock::new(at("2024-01-15T18:00:00Z"))))
    }

    fn populated_store() -> Arc<LocalHealthStore> {
        let store = Arc::new(LocalHealthStore::new());
        store.insert(steps("s1", "com.fitbit.FitbitMobile", "2024-01-15T08:00:00Z", "2024-01-15T09:00:00Z", 4000));
        store.insert(instant(RecordKind::RestingHeartRate, "r1", "2024-01-15T06:00:00Z", 55.0));
        store.insert(instant(RecordKind::BloodGlucose, "g1", "2024-01-15T07:00:00Z", 5.2));
        store.insert(sleep("n1", "2024-01-14T23:00:00Z", "2024-01-15T07:00:00Z", &[
            ("2024-01-15T02:00:00Z", "2024-01-15T02:30:00Z", SleepStageType::Awake),
        ]));
        store.insert(Record::Distance(IntervalRecord {
            metadata: meta("d1", "com.fitbit.FitbitMobile"),
            start: at("2024-01-15T08:00:00Z"),
            end: at("2024-01-15T09:00:00Z"),
            amount: 3100.0,
        }));
        store
    }

    #[tokio::test]
    async fn test_day_snapshot_populates_available_metrics() {
        let snapshot = load_day(&repo(populated_store()), NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()).await;

        assert_eq!(snapshot.steps.value().unwrap().total, 4000);
        assert_eq!(snapshot.sleep.value().unwrap().total_sleep_minutes, 450.0);
        assert_eq!(snapshot.distance_meters, Metric::Value(3100.0));
        assert_eq!(snapshot.resting_heart_rate.value().unwrap().stats.avg, 55.0);
        assert_eq!(snapshot.heart_rate, Metric::Empty);
        assert_eq!(snapshot.exercise, Metric::Empty);
        assert_eq!(snapshot.populated(), 5);
    }

    #[tokio::test]
    async fn test_one_failing_fetch_does_not_block_siblings() {
        let store = populated_store();
        let healthy = load_day(&repo(store.clone()), NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()).await;

        store.fail_kind(RecordKind::Steps);
        let degraded = load_day(&repo(store), NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()).await;

        assert_eq!(degraded.steps, Metric::Empty);
        assert_eq!(degraded.populated(), healthy.populated() - 1);
        assert_eq!(degraded.sleep, healthy.sleep);
        assert_eq!(degraded.blood_glucose, healthy.blood_glucose);
    }

    #[tokio::test]
    async fn test_missing_grant_is_no_permission_not_error() {
        let store = populated_store();
        store.set_granted([Permission::Read(RecordKind::Steps)]);

        let snapshot = load_day(&repo(store), NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()).await;
        assert!(snapshot.steps.is_value());
        assert_eq!(snapshot.sleep, Metric::NoPermission);
        assert_eq!(snapshot.blood_pressure, Metric::NoPermission);
    }

    #[tokio::test]
    async fn test_today_snapshot_includes_latest_vitals() {
        let snapshot = TodayLoader.load(&repo(populated_store())).await;
        assert_eq!(snapshot.day.date, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        assert_eq!(snapshot.latest_vitals.len(), RecordKind::VITALS.len());
        assert!(snapshot.latest_vitals[&RecordKind::BloodGlucose].is_value());
        assert_eq!(snapshot.latest_vitals[&RecordKind::BloodPressure], Metric::Empty);
    }

    #[tokio::test]
    async fn test_history_defaults_to_yesterday() {
        let loader = HistoryLoader::new();
        let repo = repo(populated_store());
        assert_eq!(loader.anchor(&repo), NaiveDate::from_ymd_opt(2024, 1, 14).unwrap());

        loader.set_date(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        let snapshot = loader.load(&repo).await;
        assert!(snapshot.steps.is_value());
    }

    #[tokio::test]
    async fn test_trend_average_skips_missing_day() {
        let store = Arc::new(LocalHealthStore::new());
        // 7 days ending on the 15th, nothing on the 11th (day 3)
        for (d, count) in [(9u32, 8000u64), (10, 9000), (12, 7000), (13, 10000), (14, 6000), (15, 8000)] {
            store.insert(steps(
                &format!("s{d}"),
                "com.fitbit.FitbitMobile",
                &format!("2024-01-{d:02}T08:00:00Z"),
                &format!("2024-01-{d:02}T09:00:00Z"),
                count,
            ));
        }

        let snapshot = TrendsLoader::new(7).load(&repo(store)).await;
        let series = snapshot.steps.value().unwrap();

        assert_eq!(snapshot.first, NaiveDate::from_ymd_opt(2024, 1, 9).unwrap());
        assert_eq!(series.points.len(), 7);
        assert_eq!(series.points[2].value, None);
        assert_eq!(series.days_with_data, 6);
        assert_eq!(series.total, Some(48000.0));
        assert_eq!(series.average, Some(8000.0));
        assert_eq!(snapshot.sleep_minutes, Metric::Empty);
    }

    #[tokio::test]
    async fn test_trend_period_is_bounded() {
        let loader = TrendsLoader::new(u32::MAX);
        assert_eq!(loader.days(), MAX_TREND_DAYS);
        loader.set_days(0);
        assert_eq!(loader.days(), 1);

        loader.set_days(u32::MAX);
        let snapshot = loader.load(&repo(populated_store())).await;
        assert_eq!(snapshot.days, MAX_TREND_DAYS);
        assert_eq!(snapshot.first, NaiveDate::from_ymd_opt(2023, 1, 15).unwrap());
        assert!(snapshot.steps.is_value());

        loader.set_days(30);
        loader.set_anchor(Some(NaiveDate::MIN));
        let snapshot = loader.load(&repo(populated_store())).await;
        assert_eq!(snapshot.first, NaiveDate::MIN);
        assert_eq!(snapshot.steps, Metric::Empty);
    }

    #[tokio::test]
    async fn test_trend_sleep_average_over_present_nights() {
        let store = Arc::new(LocalHealthStore::new());
        store.insert(sleep("a", "2024-01-12T23:00:00Z", "2024-01-13T07:00:00Z", &[]));
        store.insert(sleep("b", "2024-01-14T23:00:00Z", "2024-01-15T06:00:00Z", &[]));

        let loader = TrendsLoader::new(3);
        let snapshot = loader.load(&repo(store)).await;
        let series = snapshot.sleep_minutes.value().unwrap();
        assert_eq!(series.days_with_data, 2);
        assert_eq!(series.average, Some(450.0));
    }
}
