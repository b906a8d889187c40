//! Summary repository
//!
//! Issues read and aggregate queries against the platform client and reduces
//! them to per-day summaries. Each call checks its own read scope first, so a
//! missing grant shows up as `PermissionDenied` for that metric only.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::DashboardConfig;
use crate::error::HealthError;
use crate::permissions::Permission;
use crate::platform::HealthStore;
use crate::reconcile::{per_source_totals, reconcile_cumulative, ChosenSource, SourcedValue};
use crate::sleep::SleepSummary;
use crate::stats::Stats;
use crate::types::{
    local_date, AggregateMetric, AggregateValue, DataOrigin, Record, RecordKind,
    SleepSessionRecord, TimeRange,
};

/// Longest multi-day period a single query may span
pub const MAX_PERIOD_DAYS: u32 = 3660;

/// Reconciled step count for one day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepsSummary {
    pub date: NaiveDate,
    pub total: u64,
    pub source: ChosenSource,
    pub per_source: BTreeMap<DataOrigin, f64>,
}

/// Daily statistics for a single-valued vital
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VitalSummary {
    pub kind: RecordKind,
    pub stats: Stats,
    pub latest: f64,
    pub latest_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BloodPressureSummary {
    pub systolic: Stats,
    pub diastolic: Stats,
    pub latest_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseSummary {
    pub exercise_type: String,
    pub title: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_minutes: f64,
    pub origin: DataOrigin,
}

/// Read and aggregate queries over the platform client
pub struct HealthRepository {
    client: Arc<dyn HealthStore>,
    config: DashboardConfig,
    clock: Arc<dyn Clock>,
}

impl HealthRepository {
    pub fn new(client: Arc<dyn HealthStore>, config: DashboardConfig) -> Self {
        Self {
            client,
            config,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    pub fn client(&self) -> Arc<dyn HealthStore> {
        Arc::clone(&self.client)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Local calendar date right now
    pub fn today(&self) -> NaiveDate {
        local_date(self.now(), self.config.offset())
    }

    pub fn day_range(&self, date: NaiveDate) -> TimeRange {
        TimeRange::day(date, self.config.offset())
    }

    /// `days` local days from `first`, refusing periods no screen shows
    pub fn period(&self, first: NaiveDate, days: u32) -> Result<TimeRange, HealthError> {
        if days > MAX_PERIOD_DAYS {
            return Err(HealthError::InvalidRange(format!(
                "{} days exceeds the {} day limit",
                days, MAX_PERIOD_DAYS
            )));
        }
        TimeRange::days(first, days, self.config.offset())
    }

    async fn ensure_granted(&self, kind: RecordKind) -> Result<(), HealthError> {
        let granted = self.client.granted_permissions().await?;
        if granted.contains(&Permission::Read(kind)) {
            Ok(())
        } else {
            Err(HealthError::PermissionDenied(kind))
        }
    }

    async fn read(&self, kind: RecordKind, range: TimeRange) -> Result<Vec<Record>, HealthError> {
        self.ensure_granted(kind).await?;
        self.client.read_records(kind, range).await
    }

    // ------------------------------------------------------------------
    // Steps
    // ------------------------------------------------------------------

    #[tracing::instrument(name = "Steps for day", skip(self))]
    pub async fn steps_for_day(&self, date: NaiveDate) -> Result<StepsSummary, HealthError> {
        let range = self.day_range(date);
        let records = self.read(RecordKind::Steps, range).await?;
        Ok(self.reconcile_steps(date, &records, &range))
    }

    pub async fn steps_today(&self) -> Result<StepsSummary, HealthError> {
        self.steps_for_day(self.today()).await
    }

    fn reconcile_steps(&self, date: NaiveDate, records: &[Record], range: &TimeRange) -> StepsSummary {
        let readings: Vec<SourcedValue> = records
            .iter()
            .filter_map(|r| match r {
                Record::Steps(s) => Some(SourcedValue {
                    origin: s.metadata.origin.clone(),
                    value: s.count as f64 * range.overlap_fraction(s.start, s.end),
                }),
                _ => None,
            })
            .collect();

        let reconciled = reconcile_cumulative(&readings, &self.config.preferred_step_sources);
        tracing::debug!(
            "Reconciled {} step readings for {} to {} ({:?})",
            readings.len(),
            date,
            reconciled.total,
            reconciled.source
        );
        StepsSummary {
            date,
            total: reconciled.total.round() as u64,
            source: reconciled.source,
            per_source: per_source_totals(&readings),
        }
    }

    /// Reconciled steps per day; days without any reading are `None`
    pub async fn daily_steps(
        &self,
        first: NaiveDate,
        days: u32,
    ) -> Result<Vec<Option<f64>>, HealthError> {
        let window = self.period(first, days)?;
        let records = self.read(RecordKind::Steps, window).await?;

        Ok(each_day(first, days)
            .map(|date| {
                let range = self.day_range(date);
                let in_day: Vec<Record> = records
                    .iter()
                    .filter(|r| r.falls_in(&range))
                    .cloned()
                    .collect();
                if in_day.is_empty() {
                    None
                } else {
                    Some(self.reconcile_steps(date, &in_day, &range).total as f64)
                }
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Heart rate and vitals
    // ------------------------------------------------------------------

    /// Statistics over every heart-rate sample taken during the day
    #[tracing::instrument(name = "Heart rate for day", skip(self))]
    pub async fn heart_rate_for_day(&self, date: NaiveDate) -> Result<Option<Stats>, HealthError> {
        let range = self.day_range(date);
        let records = self.read(RecordKind::HeartRate, range).await?;
        let samples = records.iter().flat_map(|r| match r {
            Record::HeartRate(hr) => hr
                .samples
                .iter()
                .filter(|s| range.contains(s.time))
                .map(|s| s.bpm)
                .collect::<Vec<_>>(),
            _ => Vec::new(),
        });
        Ok(Stats::from_values(samples))
    }

    /// Daily min/avg/max of a single-valued vital
    #[tracing::instrument(name = "Vital for day", skip(self))]
    pub async fn vital_for_day(
        &self,
        kind: RecordKind,
        date: NaiveDate,
    ) -> Result<Option<VitalSummary>, HealthError> {
        let records = self.read(kind, self.day_range(date)).await?;
        let readings: Vec<(DateTime<Utc>, f64)> = records
            .iter()
            .filter_map(|r| match r {
                Record::RestingHeartRate(v)
                | Record::BodyTemperature(v)
                | Record::OxygenSaturation(v)
                | Record::BloodGlucose(v)
                | Record::RespiratoryRate(v) => Some((v.time, v.value)),
                _ => None,
            })
            .collect();

        let Some(stats) = Stats::from_values(readings.iter().map(|(_, v)| *v)) else {
            return Ok(None);
        };
        let (latest_at, latest) = readings
            .iter()
            .copied()
            .filter(|(_, v)| v.is_finite())
            .max_by_key(|(t, _)| *t)
            .unwrap_or((readings[0].0, stats.avg));
        Ok(Some(VitalSummary {
            kind,
            stats,
            latest,
            latest_at,
        }))
    }

    pub async fn resting_heart_rate_for_day(
        &self,
        date: NaiveDate,
    ) -> Result<Option<VitalSummary>, HealthError> {
        self.vital_for_day(RecordKind::RestingHeartRate, date).await
    }

    pub async fn body_temperature_for_day(
        &self,
        date: NaiveDate,
    ) -> Result<Option<VitalSummary>, HealthError> {
        self.vital_for_day(RecordKind::BodyTemperature, date).await
    }

    pub async fn oxygen_saturation_for_day(
        &self,
        date: NaiveDate,
    ) -> Result<Option<VitalSummary>, HealthError> {
        self.vital_for_day(RecordKind::OxygenSaturation, date).await
    }

    pub async fn blood_glucose_for_day(
        &self,
        date: NaiveDate,
    ) -> Result<Option<VitalSummary>, HealthError> {
        self.vital_for_day(RecordKind::BloodGlucose, date).await
    }

    pub async fn respiratory_rate_for_day(
        &self,
        date: NaiveDate,
    ) -> Result<Option<VitalSummary>, HealthError> {
        self.vital_for_day(RecordKind::RespiratoryRate, date).await
    }

    #[tracing::instrument(name = "Blood pressure for day", skip(self))]
    pub async fn blood_pressure_for_day(
        &self,
        date: NaiveDate,
    ) -> Result<Option<BloodPressureSummary>, HealthError> {
        let records = self.read(RecordKind::BloodPressure, self.day_range(date)).await?;
        let readings: Vec<_> = records
            .iter()
            .filter_map(|r| match r {
                Record::BloodPressure(bp) => Some(bp),
                _ => None,
            })
            .collect();

        let systolic = Stats::from_values(readings.iter().map(|bp| bp.systolic_mmhg));
        let diastolic = Stats::from_values(readings.iter().map(|bp| bp.diastolic_mmhg));
        let latest_at = readings.iter().map(|bp| bp.time).max();

        Ok(match (systolic, diastolic, latest_at) {
            (Some(systolic), Some(diastolic), Some(latest_at)) => Some(BloodPressureSummary {
                systolic,
                diastolic,
                latest_at,
            }),
            _ => None,
        })
    }

    /// Most recent record of `kind` within the configured lookback window
    #[tracing::instrument(name = "Latest record", skip(self))]
    pub async fn latest_vital(&self, kind: RecordKind) -> Result<Option<Record>, HealthError> {
        let range = TimeRange::lookback(self.now(), self.config.latest_lookback_days);
        let records = self.read(kind, range).await?;
        Ok(records.into_iter().max_by_key(|r| r.end()))
    }

    // ------------------------------------------------------------------
    // Sleep
    // ------------------------------------------------------------------

    /// Sleep for the night that ends on `date`
    #[tracing::instrument(name = "Sleep for night", skip(self))]
    pub async fn sleep_for_night(&self, date: NaiveDate) -> Result<Option<SleepSummary>, HealthError> {
        let mut nights = self.nightly_sleep(date, 1).await?;
        Ok(nights.pop().flatten())
    }

    /// Sleep summaries for `days` nights starting at `first`, keyed by wake-up date
    pub async fn nightly_sleep(
        &self,
        first: NaiveDate,
        days: u32,
    ) -> Result<Vec<Option<SleepSummary>>, HealthError> {
        // Sessions ending on `first` may have started the evening before.
        let eve = first
            .pred_opt()
            .ok_or_else(|| HealthError::InvalidRange(format!("no day before {}", first)))?;
        let window = self.period(eve, days.saturating_add(1))?;
        let offset = self.config.offset();
        let records = self.read(RecordKind::SleepSession, window).await?;
        let sessions: Vec<SleepSessionRecord> = records
            .into_iter()
            .filter_map(|r| match r {
                Record::SleepSession(s) => Some(s),
                _ => None,
            })
            .collect();

        Ok(each_day(first, days)
            .map(|date| {
                let night: Vec<SleepSessionRecord> = sessions
                    .iter()
                    .filter(|s| local_date(s.end, offset) == date)
                    .cloned()
                    .collect();
                SleepSummary::from_sessions(&night)
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Platform-side aggregates
    // ------------------------------------------------------------------

    #[tracing::instrument(name = "Aggregate", skip(self))]
    pub async fn aggregate_for_window(
        &self,
        metric: AggregateMetric,
        range: TimeRange,
    ) -> Result<AggregateValue, HealthError> {
        self.ensure_granted(metric.kind()).await?;
        self.client.aggregate(metric, range).await
    }

    async fn aggregate_day(
        &self,
        metric: AggregateMetric,
        date: NaiveDate,
    ) -> Result<Option<f64>, HealthError> {
        Ok(self.aggregate_for_window(metric, self.day_range(date)).await?.value)
    }

    pub async fn active_calories_for_day(&self, date: NaiveDate) -> Result<Option<f64>, HealthError> {
        self.aggregate_day(AggregateMetric::ActiveCaloriesTotal, date).await
    }

    pub async fn total_calories_for_day(&self, date: NaiveDate) -> Result<Option<f64>, HealthError> {
        self.aggregate_day(AggregateMetric::TotalCaloriesTotal, date).await
    }

    pub async fn distance_for_day(&self, date: NaiveDate) -> Result<Option<f64>, HealthError> {
        self.aggregate_day(AggregateMetric::DistanceTotal, date).await
    }

    /// One platform aggregate per day
    pub async fn daily_aggregate(
        &self,
        metric: AggregateMetric,
        first: NaiveDate,
        days: u32,
    ) -> Result<Vec<Option<f64>>, HealthError> {
        self.period(first, days)?;
        self.ensure_granted(metric.kind()).await?;
        let mut values = Vec::with_capacity(days as usize);
        for date in each_day(first, days) {
            values.push(self.client.aggregate(metric, self.day_range(date)).await?.value);
        }
        Ok(values)
    }

    // ------------------------------------------------------------------
    // Exercise
    // ------------------------------------------------------------------

    pub async fn exercise_sessions_for_day(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<ExerciseSummary>, HealthError> {
        let records = self.read(RecordKind::ExerciseSession, self.day_range(date)).await?;
        Ok(records
            .into_iter()
            .filter_map(|r| match r {
                Record::ExerciseSession(e) => Some(ExerciseSummary {
                    duration_minutes: (e.end - e.start).num_seconds().max(0) as f64 / 60.0,
                    exercise_type: e.exercise_type,
                    title: e.title,
                    start: e.start,
                    end: e.end,
                    origin: e.metadata.origin,
                }),
                _ => None,
            })
            .collect())
    }
}

/// `days` consecutive dates starting at `first`
pub fn each_day(first: NaiveDate, days: u32) -> impl Iterator<Item = NaiveDate> {
    (0..i64::from(days)).map(move |i| first + Duration::days(i))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::LocalHealthStore;
    use crate::types::fixtures::*;
    use crate::types::{BloodPressureRecord, ExerciseSessionRecord, HeartRateRecord, HeartRateSample, IntervalRecord, SleepStageType};
    use pretty_assertions::assert_eq;

    const FITBIT: &str = "com.fitbit.FitbitMobile";
    const PHONE: &str = "com.android.phone.pedometer";

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn repo(store: Arc<LocalHealthStore>) -> HealthRepository {
        HealthRepository::new(store, DashboardConfig::utc())
            .with_clock(Arc::new(ManualClock::new(at("2024-01-15T18:00:00Z"))))
    }

    #[tokio::test]
    async fn test_steps_prefer_wearable() {
        let store = Arc::new(LocalHealthStore::new());
        store.insert(steps("p1", PHONE, "2024-01-15T08:00:00Z", "2024-01-15T09:00:00Z", 3000));
        store.insert(steps("f1", FITBIT, "2024-01-15T08:00:00Z", "2024-01-15T09:00:00Z", 2800));
        store.insert(steps("f2", FITBIT, "2024-01-15T12:00:00Z", "2024-01-15T13:00:00Z", 1200));

        let summary = repo(store).steps_today().await.unwrap();
        assert_eq!(summary.date, date(15));
        assert_eq!(summary.total, 4000);
        assert_eq!(summary.source, ChosenSource::Preferred(DataOrigin::new(FITBIT)));
        assert_eq!(summary.per_source.len(), 2);
    }

    #[tokio::test]
    async fn test_steps_fall_back_to_all_sources() {
        let store = Arc::new(LocalHealthStore::new());
        store.insert(steps("p1", PHONE, "2024-01-15T08:00:00Z", "2024-01-15T09:00:00Z", 3000));
        store.insert(steps("o1", "com.example.other", "2024-01-15T10:00:00Z", "2024-01-15T11:00:00Z", 500));

        let summary = repo(store).steps_for_day(date(15)).await.unwrap();
        assert_eq!(summary.total, 3500);
        assert_eq!(summary.source, ChosenSource::All);
    }

    #[tokio::test]
    async fn test_missing_grant_skips_platform_call() {
        let store = Arc::new(LocalHealthStore::new().with_granted([Permission::Read(RecordKind::Steps)]));
        let repo = repo(store.clone());

        let err = repo.heart_rate_for_day(date(15)).await.unwrap_err();
        assert!(matches!(err, HealthError::PermissionDenied(RecordKind::HeartRate)));
        assert_eq!(store.read_calls(), 0);

        assert!(repo.steps_for_day(date(15)).await.is_ok());
        assert_eq!(store.read_calls(), 1);
    }

    #[tokio::test]
    async fn test_heart_rate_stats_use_samples_inside_day() {
        let store = Arc::new(LocalHealthStore::new());
        store.insert(Record::HeartRate(HeartRateRecord {
            metadata: meta("hr1", FITBIT),
            start: at("2024-01-14T23:50:00Z"),
            end: at("2024-01-15T00:10:00Z"),
            samples: vec![
                HeartRateSample { time: at("2024-01-14T23:55:00Z"), bpm: 200.0 },
                HeartRateSample { time: at("2024-01-15T00:05:00Z"), bpm: 60.0 },
            ],
        }));
        store.insert(Record::HeartRate(HeartRateRecord {
            metadata: meta("hr2", FITBIT),
            start: at("2024-01-15T12:00:00Z"),
            end: at("2024-01-15T12:10:00Z"),
            samples: vec![
                HeartRateSample { time: at("2024-01-15T12:00:00Z"), bpm: 80.0 },
                HeartRateSample { time: at("2024-01-15T12:05:00Z"), bpm: 100.0 },
            ],
        }));

        let stats = repo(store).heart_rate_for_day(date(15)).await.unwrap().unwrap();
        assert_eq!(stats, Stats { min: 60.0, max: 100.0, avg: 80.0, count: 3 });
    }

    #[tokio::test]
    async fn test_vital_summary_tracks_latest() {
        let store = Arc::new(LocalHealthStore::new());
        store.insert(instant(RecordKind::BloodGlucose, "g1", "2024-01-15T07:00:00Z", 5.0));
        store.insert(instant(RecordKind::BloodGlucose, "g2", "2024-01-15T13:00:00Z", 7.0));
        store.insert(instant(RecordKind::BloodGlucose, "g3", "2024-01-15T10:00:00Z", 6.0));

        let summary = repo(store).blood_glucose_for_day(date(15)).await.unwrap().unwrap();
        assert_eq!(summary.stats.min, 5.0);
        assert_eq!(summary.stats.max, 7.0);
        assert_eq!(summary.stats.avg, 6.0);
        assert_eq!(summary.latest, 7.0);
        assert_eq!(summary.latest_at, at("2024-01-15T13:00:00Z"));
    }

    #[tokio::test]
    async fn test_blood_pressure_summary() {
        let store = Arc::new(LocalHealthStore::new());
        for (id, time, sys, dia) in [
            ("bp1", "2024-01-15T07:00:00Z", 120.0, 80.0),
            ("bp2", "2024-01-15T19:00:00Z", 130.0, 86.0),
        ] {
            store.insert(Record::BloodPressure(BloodPressureRecord {
                metadata: meta(id, "com.omron"),
                time: at(time),
                systolic_mmhg: sys,
                diastolic_mmhg: dia,
            }));
        }

        let summary = repo(store.clone()).blood_pressure_for_day(date(15)).await.unwrap().unwrap();
        assert_eq!(summary.systolic.avg, 125.0);
        assert_eq!(summary.diastolic.max, 86.0);
        assert!(repo(store).blood_pressure_for_day(date(14)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_latest_vital_within_lookback() {
        let store = Arc::new(LocalHealthStore::new());
        store.insert(instant(RecordKind::OxygenSaturation, "o1", "2024-01-01T07:00:00Z", 99.0));
        store.insert(instant(RecordKind::OxygenSaturation, "o2", "2024-01-12T07:00:00Z", 96.0));
        store.insert(instant(RecordKind::OxygenSaturation, "o3", "2024-01-13T07:00:00Z", 97.0));

        let latest = repo(store).latest_vital(RecordKind::OxygenSaturation).await.unwrap().unwrap();
        assert_eq!(latest.metadata().id, "o3");
    }

    #[tokio::test]
    async fn test_oversized_periods_are_rejected() {
        let store = Arc::new(LocalHealthStore::new());
        store.insert(steps("s1", PHONE, "2024-01-15T08:00:00Z", "2024-01-15T09:00:00Z", 3000));
        let repo = repo(store);

        for days in [MAX_PERIOD_DAYS + 1, u32::MAX] {
            assert!(matches!(repo.daily_steps(date(1), days).await, Err(HealthError::InvalidRange(_))));
            assert!(matches!(repo.nightly_sleep(date(1), days).await, Err(HealthError::InvalidRange(_))));
            assert!(matches!(
                repo.daily_aggregate(AggregateMetric::DistanceTotal, date(1), days).await,
                Err(HealthError::InvalidRange(_))
            ));
        }
        assert!(matches!(repo.nightly_sleep(NaiveDate::MIN, 1).await, Err(HealthError::InvalidRange(_))));
        assert!(matches!(repo.daily_steps(NaiveDate::MAX, 2).await, Err(HealthError::InvalidRange(_))));

        let steps = repo.daily_steps(date(9), 7).await.unwrap();
        assert_eq!(steps[6], Some(3000.0));
    }

    #[tokio::test]
    async fn test_sleep_for_night_uses_wake_date() {
        let store = Arc::new(LocalHealthStore::new());
        store.insert(sleep(
            "n1",
            "2024-01-14T23:00:00Z",
            "2024-01-15T07:00:00Z",
            &[("2024-01-15T03:00:00Z", "2024-01-15T03:30:00Z", SleepStageType::Awake)],
        ));
        store.insert(sleep("n0", "2024-01-13T23:00:00Z", "2024-01-14T06:00:00Z", &[]));

        let repo = repo(store);
        let night = repo.sleep_for_night(date(15)).await.unwrap().unwrap();
        assert_eq!(night.total_sleep_minutes, 450.0);
        assert_eq!(night.session_count, 1);

        let nights = repo.nightly_sleep(date(13), 3).await.unwrap();
        assert!(nights[0].is_none());
        assert_eq!(nights[1].as_ref().unwrap().total_sleep_minutes, 420.0);
        assert!(nights[2].is_some());
    }

    #[tokio::test]
    async fn test_calories_and_distance_use_platform_aggregate() {
        let store = Arc::new(LocalHealthStore::new());
        store.insert(Record::ActiveCaloriesBurned(IntervalRecord {
            metadata: meta("c1", FITBIT),
            start: at("2024-01-15T08:00:00Z"),
            end: at("2024-01-15T09:00:00Z"),
            amount: 250.0,
        }));
        store.insert(Record::Distance(IntervalRecord {
            metadata: meta("d1", FITBIT),
            start: at("2024-01-15T08:00:00Z"),
            end: at("2024-01-15T09:00:00Z"),
            amount: 3200.0,
        }));

        let repo = repo(store);
        assert_eq!(repo.active_calories_for_day(date(15)).await.unwrap(), Some(250.0));
        assert_eq!(repo.distance_for_day(date(15)).await.unwrap(), Some(3200.0));
        assert_eq!(repo.total_calories_for_day(date(15)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_daily_steps_marks_missing_days() {
        let store = Arc::new(LocalHealthStore::new());
        for d in [9u32, 10, 12, 13, 14, 15] {
            store.insert(steps(
                &format!("s{d}"),
                PHONE,
                &format!("2024-01-{d:02}T08:00:00Z"),
                &format!("2024-01-{d:02}T09:00:00Z"),
                1000 * u64::from(d),
            ));
        }

        let series = repo(store).daily_steps(date(9), 7).await.unwrap();
        assert_eq!(series.len(), 7);
        assert_eq!(series[2], None);
        assert_eq!(series[0], Some(9000.0));
        assert_eq!(series[6], Some(15000.0));
    }

    #[tokio::test]
    async fn test_exercise_sessions() {
        let store = Arc::new(LocalHealthStore::new());
        store.insert(Record::ExerciseSession(ExerciseSessionRecord {
            metadata: meta("e1", FITBIT),
            start: at("2024-01-15T06:00:00Z"),
            end: at("2024-01-15T06:45:00Z"),
            exercise_type: "running".to_string(),
            title: Some("Morning run".to_string()),
        }));

        let sessions = repo(store).exercise_sessions_for_day(date(15)).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].duration_minutes, 45.0);
        assert_eq!(sessions[0].exercise_type, "running");
    }

    #[tokio::test]
    async fn test_read_failure_propagates_to_caller() {
        let store = Arc::new(LocalHealthStore::new());
        store.fail_kind(RecordKind::Distance);
        let err = repo(store).distance_for_day(date(15)).await.unwrap_err();
        assert!(matches!(err, HealthError::Aggregate { .. }));
    }
}
