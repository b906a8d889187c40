//! Core record types read from the health-data platform
//!
//! Records are immutable snapshots of what other apps and devices wrote to the
//! platform. Healthboard only reads and summarizes them.

use chrono::{DateTime, Days, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::HealthError;

/// Category of health record exposed by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Steps,
    HeartRate,
    RestingHeartRate,
    SleepSession,
    BloodPressure,
    BodyTemperature,
    OxygenSaturation,
    BloodGlucose,
    RespiratoryRate,
    ActiveCaloriesBurned,
    TotalCaloriesBurned,
    Distance,
    ExerciseSession,
}

impl RecordKind {
    /// Every kind the dashboards track
    pub const ALL: [RecordKind; 13] = [
        RecordKind::Steps,
        RecordKind::HeartRate,
        RecordKind::RestingHeartRate,
        RecordKind::SleepSession,
        RecordKind::BloodPressure,
        RecordKind::BodyTemperature,
        RecordKind::OxygenSaturation,
        RecordKind::BloodGlucose,
        RecordKind::RespiratoryRate,
        RecordKind::ActiveCaloriesBurned,
        RecordKind::TotalCaloriesBurned,
        RecordKind::Distance,
        RecordKind::ExerciseSession,
    ];

    /// Kinds displayed with daily min/avg/max statistics
    pub const VITALS: [RecordKind; 6] = [
        RecordKind::BloodPressure,
        RecordKind::BloodGlucose,
        RecordKind::BodyTemperature,
        RecordKind::OxygenSaturation,
        RecordKind::RestingHeartRate,
        RecordKind::RespiratoryRate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Steps => "steps",
            RecordKind::HeartRate => "heart_rate",
            RecordKind::RestingHeartRate => "resting_heart_rate",
            RecordKind::SleepSession => "sleep_session",
            RecordKind::BloodPressure => "blood_pressure",
            RecordKind::BodyTemperature => "body_temperature",
            RecordKind::OxygenSaturation => "oxygen_saturation",
            RecordKind::BloodGlucose => "blood_glucose",
            RecordKind::RespiratoryRate => "respiratory_rate",
            RecordKind::ActiveCaloriesBurned => "active_calories_burned",
            RecordKind::TotalCaloriesBurned => "total_calories_burned",
            RecordKind::Distance => "distance",
            RecordKind::ExerciseSession => "exercise_session",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pre-aggregated values the platform can compute on its side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateMetric {
    StepsTotal,
    ActiveCaloriesTotal,
    TotalCaloriesTotal,
    DistanceTotal,
    RestingHeartRateAvg,
}

impl AggregateMetric {
    /// Record kind the aggregate is computed over (and gated by)
    pub fn kind(&self) -> RecordKind {
        match self {
            AggregateMetric::StepsTotal => RecordKind::Steps,
            AggregateMetric::ActiveCaloriesTotal => RecordKind::ActiveCaloriesBurned,
            AggregateMetric::TotalCaloriesTotal => RecordKind::TotalCaloriesBurned,
            AggregateMetric::DistanceTotal => RecordKind::Distance,
            AggregateMetric::RestingHeartRateAvg => RecordKind::RestingHeartRate,
        }
    }
}

impl fmt::Display for AggregateMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggregateMetric::StepsTotal => "steps_total",
            AggregateMetric::ActiveCaloriesTotal => "active_calories_total",
            AggregateMetric::TotalCaloriesTotal => "total_calories_total",
            AggregateMetric::DistanceTotal => "distance_total",
            AggregateMetric::RestingHeartRateAvg => "resting_heart_rate_avg",
        };
        f.write_str(name)
    }
}

/// Result of a platform-side aggregation. `None` means no contributing data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregateValue {
    pub metric: AggregateMetric,
    pub value: Option<f64>,
}

/// Identifier of the app or device that wrote a record (package name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataOrigin(pub String);

impl DataOrigin {
    pub fn new(package: impl Into<String>) -> Self {
        Self(package.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DataOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Record metadata assigned by the platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub id: String,
    pub origin: DataOrigin,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepsRecord {
    pub metadata: Metadata,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeartRateSample {
    pub time: DateTime<Utc>,
    pub bpm: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartRateRecord {
    pub metadata: Metadata,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub samples: Vec<HeartRateSample>,
}

/// Single-reading vital with one numeric value (bpm, °C, %, mmol/L, breaths/min)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstantRecord {
    pub metadata: Metadata,
    pub time: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BloodPressureRecord {
    pub metadata: Metadata,
    pub time: DateTime<Utc>,
    pub systolic_mmhg: f64,
    pub diastolic_mmhg: f64,
}

/// Sleep stage classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SleepStageType {
    Awake,
    Light,
    Deep,
    Rem,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SleepStage {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub stage: SleepStageType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepSessionRecord {
    pub metadata: Metadata,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub stages: Vec<SleepStage>,
}

/// Interval record with an energy (kcal) or distance (m) amount
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalRecord {
    pub metadata: Metadata,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseSessionRecord {
    pub metadata: Metadata,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub exercise_type: String,
    #[serde(default)]
    pub title: Option<String>,
}

/// A health record of any supported kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    Steps(StepsRecord),
    HeartRate(HeartRateRecord),
    RestingHeartRate(InstantRecord),
    SleepSession(SleepSessionRecord),
    BloodPressure(BloodPressureRecord),
    BodyTemperature(InstantRecord),
    OxygenSaturation(InstantRecord),
    BloodGlucose(InstantRecord),
    RespiratoryRate(InstantRecord),
    ActiveCaloriesBurned(IntervalRecord),
    TotalCaloriesBurned(IntervalRecord),
    Distance(IntervalRecord),
    ExerciseSession(ExerciseSessionRecord),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Steps(_) => RecordKind::Steps,
            Record::HeartRate(_) => RecordKind::HeartRate,
            Record::RestingHeartRate(_) => RecordKind::RestingHeartRate,
            Record::SleepSession(_) => RecordKind::SleepSession,
            Record::BloodPressure(_) => RecordKind::BloodPressure,
            Record::BodyTemperature(_) => RecordKind::BodyTemperature,
            Record::OxygenSaturation(_) => RecordKind::OxygenSaturation,
            Record::BloodGlucose(_) => RecordKind::BloodGlucose,
            Record::RespiratoryRate(_) => RecordKind::RespiratoryRate,
            Record::ActiveCaloriesBurned(_) => RecordKind::ActiveCaloriesBurned,
            Record::TotalCaloriesBurned(_) => RecordKind::TotalCaloriesBurned,
            Record::Distance(_) => RecordKind::Distance,
            Record::ExerciseSession(_) => RecordKind::ExerciseSession,
        }
    }

    pub fn metadata(&self) -> &Metadata {
        match self {
            Record::Steps(r) => &r.metadata,
            Record::HeartRate(r) => &r.metadata,
            Record::SleepSession(r) => &r.metadata,
            Record::BloodPressure(r) => &r.metadata,
            Record::ExerciseSession(r) => &r.metadata,
            Record::RestingHeartRate(r)
            | Record::BodyTemperature(r)
            | Record::OxygenSaturation(r)
            | Record::BloodGlucose(r)
            | Record::RespiratoryRate(r) => &r.metadata,
            Record::ActiveCaloriesBurned(r)
            | Record::TotalCaloriesBurned(r)
            | Record::Distance(r) => &r.metadata,
        }
    }

    pub fn origin(&self) -> &DataOrigin {
        &self.metadata().origin
    }

    /// Start of the record; equal to `end()` for instant readings
    pub fn start(&self) -> DateTime<Utc> {
        match self {
            Record::Steps(r) => r.start,
            Record::HeartRate(r) => r.start,
            Record::SleepSession(r) => r.start,
            Record::BloodPressure(r) => r.time,
            Record::ExerciseSession(r) => r.start,
            Record::RestingHeartRate(r)
            | Record::BodyTemperature(r)
            | Record::OxygenSaturation(r)
            | Record::BloodGlucose(r)
            | Record::RespiratoryRate(r) => r.time,
            Record::ActiveCaloriesBurned(r)
            | Record::TotalCaloriesBurned(r)
            | Record::Distance(r) => r.start,
        }
    }

    pub fn end(&self) -> DateTime<Utc> {
        match self {
            Record::Steps(r) => r.end,
            Record::HeartRate(r) => r.end,
            Record::SleepSession(r) => r.end,
            Record::BloodPressure(r) => r.time,
            Record::ExerciseSession(r) => r.end,
            Record::RestingHeartRate(r)
            | Record::BodyTemperature(r)
            | Record::OxygenSaturation(r)
            | Record::BloodGlucose(r)
            | Record::RespiratoryRate(r) => r.time,
            Record::ActiveCaloriesBurned(r)
            | Record::TotalCaloriesBurned(r)
            | Record::Distance(r) => r.end,
        }
    }

    pub fn is_instant(&self) -> bool {
        matches!(
            self,
            Record::RestingHeartRate(_)
                | Record::BodyTemperature(_)
                | Record::OxygenSaturation(_)
                | Record::BloodGlucose(_)
                | Record::RespiratoryRate(_)
                | Record::BloodPressure(_)
        )
    }

    /// Whether the record falls in `range` (instants: start <= t < end, intervals: overlap)
    pub fn falls_in(&self, range: &TimeRange) -> bool {
        if self.is_instant() {
            range.contains(self.start())
        } else {
            range.overlaps(self.start(), self.end())
        }
    }
}

/// Half-open UTC time window `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, HealthError> {
        if end < start {
            return Err(HealthError::InvalidRange(format!(
                "end {} is before start {}",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    /// The local calendar day `date` in the given offset
    pub fn day(date: NaiveDate, offset: FixedOffset) -> Self {
        let next = date.succ_opt().unwrap_or(date);
        Self {
            start: local_midnight(date, offset),
            end: local_midnight(next, offset),
        }
    }

    /// `count` consecutive local days starting at `first`
    pub fn days(first: NaiveDate, count: u32, offset: FixedOffset) -> Result<Self, HealthError> {
        let end = first
            .checked_add_days(Days::new(u64::from(count)))
            .ok_or_else(|| HealthError::InvalidRange(format!("{} days from {} is out of range", count, first)))?;
        Ok(Self {
            start: local_midnight(first, offset),
            end: local_midnight(end, offset),
        })
    }

    /// The last `days` days up to `now`
    pub fn lookback(now: DateTime<Utc>, days: u32) -> Self {
        Self {
            start: now
                .checked_sub_signed(Duration::days(i64::from(days)))
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            end: now,
        }
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t < self.end
    }

    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        if start == end {
            return self.contains(start);
        }
        start < self.end && end > self.start
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Share of `[start, end)` that lies inside this range (0-1)
    pub fn overlap_fraction(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
        let total = (end - start).num_milliseconds();
        if total <= 0 {
            return if self.contains(start) { 1.0 } else { 0.0 };
        }
        let overlap = (end.min(self.end) - start.max(self.start))
            .num_milliseconds()
            .max(0);
        overlap as f64 / total as f64
    }
}

fn local_midnight(date: NaiveDate, offset: FixedOffset) -> DateTime<Utc> {
    let naive = date.and_time(chrono::NaiveTime::MIN);
    // Fixed offsets have no gaps or folds, so the mapping is always single.
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
}

/// Local calendar date of `t` in `offset`
pub fn local_date(t: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    t.with_timezone(&offset).date_naive()
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    pub fn meta(id: &str, origin: &str) -> Metadata {
        Metadata {
            id: id.to_string(),
            origin: DataOrigin::new(origin),
            last_modified: at("2024-01-01T00:00:00Z"),
        }
    }

    pub fn steps(id: &str, origin: &str, start: &str, end: &str, count: u64) -> Record {
        Record::Steps(StepsRecord {
            metadata: meta(id, origin),
            start: at(start),
            end: at(end),
            count,
        })
    }

    pub fn instant(kind: RecordKind, id: &str, time: &str, value: f64) -> Record {
        let r = InstantRecord {
            metadata: meta(id, "com.example.vitals"),
            time: at(time),
            value,
        };
        match kind {
            RecordKind::RestingHeartRate => Record::RestingHeartRate(r),
            RecordKind::BodyTemperature => Record::BodyTemperature(r),
            RecordKind::OxygenSaturation => Record::OxygenSaturation(r),
            RecordKind::BloodGlucose => Record::BloodGlucose(r),
            RecordKind::RespiratoryRate => Record::RespiratoryRate(r),
            other => panic!("{other} is not an instant kind"),
        }
    }

    pub fn sleep(id: &str, start: &str, end: &str, stages: &[(&str, &str, SleepStageType)]) -> Record {
        Record::SleepSession(SleepSessionRecord {
            metadata: meta(id, "com.example.sleep"),
            start: at(start),
            end: at(end),
            stages: stages
                .iter()
                .map(|(s, e, stage)| SleepStage {
                    start: at(s),
                    end: at(e),
                    stage: *stage,
                })
                .collect(),
        })
    }
}
