//! Permission & client session
//!
//! Wraps the platform client handle. The handle is created lazily on first use
//! and shared afterwards; availability is checked before creating it.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::error::HealthError;
use crate::permissions::{readable_kinds, required_permissions, Permission};
use crate::platform::HealthStore;
use crate::types::RecordKind;

/// Install status of the platform health-data store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Available,
    NotInstalled,
    /// Installed, but the provider must be updated before use
    UpdateRequired,
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Availability::Available => "available",
            Availability::NotInstalled => "not installed",
            Availability::UpdateRequired => "provider update required",
        };
        f.write_str(s)
    }
}

/// Entry point to the platform: status probe plus client factory
pub trait HealthPlatform: Send + Sync {
    fn sdk_status(&self) -> Availability;

    fn create_client(&self) -> Result<Arc<dyn HealthStore>, HealthError>;
}

/// Lazily-initialized platform session
pub struct HealthSession {
    platform: Arc<dyn HealthPlatform>,
    client: OnceCell<Arc<dyn HealthStore>>,
}

impl HealthSession {
    pub fn new(platform: Arc<dyn HealthPlatform>) -> Self {
        Self {
            platform,
            client: OnceCell::new(),
        }
    }

    pub fn availability(&self) -> Availability {
        self.platform.sdk_status()
    }

    /// The shared client handle, created on first call
    pub async fn client(&self) -> Result<Arc<dyn HealthStore>, HealthError> {
        let status = self.availability();
        if status != Availability::Available {
            return Err(HealthError::Unavailable(status));
        }
        let client = self
            .client
            .get_or_try_init(|| async {
                tracing::debug!("Creating health platform client");
                self.platform.create_client()
            })
            .await?;
        Ok(Arc::clone(client))
    }

    pub async fn granted(&self) -> Result<HashSet<Permission>, HealthError> {
        self.client().await?.granted_permissions().await
    }

    /// Whether every required read scope is granted
    pub async fn has_all_permissions(&self) -> Result<bool, HealthError> {
        let granted = self.granted().await?;
        Ok(required_permissions().is_subset(&granted))
    }

    pub async fn missing_permissions(&self) -> Result<Vec<Permission>, HealthError> {
        let granted = self.granted().await?;
        let mut missing: Vec<Permission> = required_permissions()
            .into_iter()
            .filter(|p| !granted.contains(p))
            .collect();
        missing.sort_by_key(|p| p.to_string());
        Ok(missing)
    }

    pub async fn granted_kinds(&self) -> Result<HashSet<RecordKind>, HealthError> {
        Ok(readable_kinds(&self.granted().await?))
    }

    /// Whether the separately-requested background read grant is held
    pub async fn has_background_permission(&self) -> Result<bool, HealthError> {
        Ok(self.granted().await?.contains(&Permission::BackgroundRead))
    }
}
