//! Sleep aggregation
//!
//! Total sleep for a session is its span minus the awake stages. Sessions
//! without a stage breakdown count their whole span.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stats::{count_present, mean_of_present, sum_of_present};
use crate::types::{SleepSessionRecord, SleepStageType};

fn minutes_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    ((end - start).num_milliseconds().max(0)) as f64 / 60_000.0
}

/// Span of the session in minutes (time in bed)
pub fn session_minutes(session: &SleepSessionRecord) -> f64 {
    minutes_between(session.start, session.end)
}

/// Minutes of `stage` inside the session bounds
pub fn stage_minutes(session: &SleepSessionRecord, stage: SleepStageType) -> f64 {
    session
        .stages
        .iter()
        .filter(|s| s.stage == stage)
        .map(|s| minutes_between(s.start.max(session.start), s.end.min(session.end)))
        .sum()
}

/// Asleep minutes: span minus awake stages, or the raw span without stages
pub fn total_sleep_minutes(session: &SleepSessionRecord) -> f64 {
    let span = session_minutes(session);
    if session.stages.is_empty() {
        return span;
    }
    (span - stage_minutes(session, SleepStageType::Awake)).max(0.0)
}

/// Minutes per stage type
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StageBreakdown {
    pub awake_minutes: f64,
    pub light_minutes: f64,
    pub deep_minutes: f64,
    pub rem_minutes: f64,
    pub unknown_minutes: f64,
}

impl StageBreakdown {
    pub fn of(session: &SleepSessionRecord) -> Self {
        Self {
            awake_minutes: stage_minutes(session, SleepStageType::Awake),
            light_minutes: stage_minutes(session, SleepStageType::Light),
            deep_minutes: stage_minutes(session, SleepStageType::Deep),
            rem_minutes: stage_minutes(session, SleepStageType::Rem),
            unknown_minutes: stage_minutes(session, SleepStageType::Unknown),
        }
    }

    fn add(&mut self, other: &StageBreakdown) {
        self.awake_minutes += other.awake_minutes;
        self.light_minutes += other.light_minutes;
        self.deep_minutes += other.deep_minutes;
        self.rem_minutes += other.rem_minutes;
        self.unknown_minutes += other.unknown_minutes;
    }
}

/// One night of sleep, possibly made of several sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepSummary {
    pub total_sleep_minutes: f64,
    pub time_in_bed_minutes: f64,
    pub stages: StageBreakdown,
    /// Whether any session carried a stage breakdown
    pub has_stages: bool,
    pub session_count: usize,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SleepSummary {
    /// Summarize the sessions of one night; `None` when there are none
    pub fn from_sessions(sessions: &[SleepSessionRecord]) -> Option<Self> {
        let first = sessions.first()?;
        let mut summary = Self {
            total_sleep_minutes: 0.0,
            time_in_bed_minutes: 0.0,
            stages: StageBreakdown::default(),
            has_stages: false,
            session_count: 0,
            start: first.start,
            end: first.end,
        };

        for session in sessions {
            summary.total_sleep_minutes += total_sleep_minutes(session);
            summary.time_in_bed_minutes += session_minutes(session);
            summary.stages.add(&StageBreakdown::of(session));
            summary.has_stages |= !session.stages.is_empty();
            summary.session_count += 1;
            summary.start = summary.start.min(session.start);
            summary.end = summary.end.max(session.end);
        }

        Some(summary)
    }

    /// Asleep time over time in bed (0-1)
    pub fn efficiency(&self) -> Option<f64> {
        if self.time_in_bed_minutes > 0.0 {
            Some((self.total_sleep_minutes / self.time_in_bed_minutes).clamp(0.0, 1.0))
        } else {
            None
        }
    }
}

/// Sleep over a run of nights; nights without a session are left out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepTrend {
    pub average_minutes: Option<f64>,
    pub total_minutes: Option<f64>,
    pub nights_with_data: usize,
    pub nights: usize,
}

impl SleepTrend {
    pub fn from_nights(nights: &[Option<SleepSummary>]) -> Self {
        let totals: Vec<Option<f64>> = nights
            .iter()
            .map(|n| n.as_ref().map(|s| s.total_sleep_minutes))
            .collect();
        Self {
            average_minutes: mean_of_present(&totals),
            total_minutes: sum_of_present(&totals),
            nights_with_data: count_present(&totals),
            nights: nights.len(),
        }
    }
}
