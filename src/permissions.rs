//! Permission catalog requested from the platform

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::types::RecordKind;

/// A single grant the app can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "kind")]
pub enum Permission {
    /// Foreground read access to one record kind
    Read(RecordKind),
    /// Read access while the app is not in the foreground (widgets, timers)
    BackgroundRead,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::Read(kind) => write!(f, "read:{}", kind),
            Permission::BackgroundRead => f.write_str("read:background"),
        }
    }
}

/// Read permissions requested once at startup
pub fn required_permissions() -> HashSet<Permission> {
    RecordKind::ALL.iter().copied().map(Permission::Read).collect()
}

/// Record kinds readable under `granted`
pub fn readable_kinds(granted: &HashSet<Permission>) -> HashSet<RecordKind> {
    granted
        .iter()
        .filter_map(|p| match p {
            Permission::Read(kind) => Some(*kind),
            Permission::BackgroundRead => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_permissions_cover_every_kind() {
        let required = required_permissions();
        assert_eq!(required.len(), RecordKind::ALL.len());
        assert!(!required.contains(&Permission::BackgroundRead));
    }

    #[test]
    fn test_readable_kinds_ignores_background_grant() {
        let granted: HashSet<Permission> = [
            Permission::Read(RecordKind::Steps),
            Permission::BackgroundRead,
        ]
        .into_iter()
        .collect();

        let kinds = readable_kinds(&granted);
        assert_eq!(kinds.len(), 1);
        assert!(kinds.contains(&RecordKind::Steps));
    }

    #[test]
    fn test_permission_serde_shape() {
        let json = serde_json::to_value(Permission::Read(RecordKind::HeartRate)).unwrap();
        assert_eq!(json["type"], "read");
        assert_eq!(json["kind"], "heart_rate");

        let bg: Permission = serde_json::from_str(r#"{"type":"background_read"}"#).unwrap();
        assert_eq!(bg, Permission::BackgroundRead);
    }
}
