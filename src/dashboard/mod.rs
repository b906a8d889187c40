//! Dashboard screens
//!
//! Each screen loads every metric it shows in one concurrent batch. A single
//! failing metric never blocks the rest of the screen.

mod loaders;
mod metric;
mod screen;

pub use loaders::{
    load_day, DailyPoint, DaySnapshot, HistoryLoader, SnapshotLoader, TodayLoader, TodaySnapshot,
    TrendSeries, TrendsLoader, TrendsSnapshot,
};
pub use metric::{fetch_metric, Metric};
pub use screen::{HistoryScreen, ScreenModel, ScreenState, TodayScreen, TrendsScreen};
