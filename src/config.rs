//! Dashboard configuration
//!
//! Defaults cover every field; a config file and `HEALTHBOARD_*` environment
//! variables can override them.

use chrono::{Duration, FixedOffset, Local, Offset, Utc};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::HealthError;
use crate::reconcile::SourcePriority;
use crate::store::DEFAULT_TOKEN_TTL_DAYS;

/// Default foreground refresh period in seconds
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 60;

const MAX_OFFSET_MINUTES: u32 = 18 * 60;

/// Longest change history a platform is expected to keep
pub const MAX_TOKEN_TTL_DAYS: i64 = 365;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub refresh_interval_secs: u64,
    /// Step sources preferred over the rest, highest priority first
    pub preferred_step_sources: SourcePriority,
    /// Window for "latest reading" lookups
    pub latest_lookback_days: u32,
    pub trend_days: u32,
    /// Days averaged for the widget's progress mode
    pub widget_average_days: u32,
    pub change_token_ttl_days: i64,
    /// Offset used to cut local calendar days
    pub utc_offset_minutes: i32,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
            preferred_step_sources: SourcePriority::default(),
            latest_lookback_days: 7,
            trend_days: 7,
            widget_average_days: 7,
            change_token_ttl_days: DEFAULT_TOKEN_TTL_DAYS,
            utc_offset_minutes: Local::now().offset().local_minus_utc() / 60,
        }
    }
}

impl DashboardConfig {
    /// Load defaults, then `path` (if given), then `HEALTHBOARD_*` variables
    pub fn load(path: Option<&Path>) -> Result<Self, HealthError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix("HEALTHBOARD")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("preferred_step_sources"),
        );

        let config: DashboardConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), HealthError> {
        if self.refresh_interval_secs == 0 {
            return Err(HealthError::Config(
                "refresh_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.trend_days == 0 || self.widget_average_days == 0 {
            return Err(HealthError::Config(
                "trend_days and widget_average_days must be greater than zero".to_string(),
            ));
        }
        if !(1..=MAX_TOKEN_TTL_DAYS).contains(&self.change_token_ttl_days) {
            return Err(HealthError::Config(format!(
                "change_token_ttl_days must be between 1 and {}",
                MAX_TOKEN_TTL_DAYS
            )));
        }
        if self.utc_offset_minutes.unsigned_abs() > MAX_OFFSET_MINUTES {
            return Err(HealthError::Config(format!(
                "utc_offset_minutes {} is outside +/-18h",
                self.utc_offset_minutes
            )));
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::days(self.change_token_ttl_days.clamp(1, MAX_TOKEN_TTL_DAYS))
    }

    pub fn offset(&self) -> FixedOffset {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| Utc.fix())
    }

    /// Config pinned to UTC days, handy for deterministic runs
    pub fn utc() -> Self {
        Self {
            utc_offset_minutes: 0,
            ..Self::default()
        }
    }
}
