//! Healthboard - health dashboard engine over a platform health-data store
//!
//! Healthboard reads records from a permissioned on-device health store and
//! turns them into dashboard snapshots: today, a single historical day, and
//! multi-day trends. It also drives home-screen widget updates.
//!
//! ## Modules
//!
//! - **Session**: platform availability, lazily created client, permissions
//! - **Repository**: per-metric reads with step source reconciliation and
//!   sleep aggregation that excludes awake time
//! - **Dashboard**: screen state containers with per-metric fault isolation
//!   and a periodic refresh gated by differential sync
//! - **Widget**: background updates gated on the background read grant

pub mod clock;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod permissions;
pub mod platform;
pub mod reconcile;
pub mod repository;
pub mod session;
pub mod sleep;
pub mod stats;
pub mod store;
pub mod sync;
pub mod types;
pub mod widget;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use config::DashboardConfig;
pub use dashboard::{
    HistoryScreen, Metric, ScreenModel, ScreenState, TodayScreen, TrendsScreen,
};
pub use error::HealthError;
pub use platform::HealthStore;
pub use repository::HealthRepository;
pub use session::{Availability, HealthPlatform, HealthSession};
pub use store::{LocalHealthStore, LocalPlatform};
pub use sync::{ChangeTracker, SyncOutcome};
pub use widget::{WidgetMode, WidgetUpdater};

/// Healthboard version
pub const HEALTHBOARD_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported by the CLI
pub const PRODUCER_NAME: &str = "healthboard";
