//! Bounded, deduplicated alert buffer
//!
//! Alerts delivered over the push channel land here; the display layer reads
//! snapshots. The buffer holds at most [`MAX_ALERTS`] entries in arrival
//! order, evicting the oldest, and drops duplicates sharing the
//! (user id, timestamp) identity key.

use std::collections::VecDeque;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Maximum number of alerts retained
pub const MAX_ALERTS: usize = 50;

/// Alert severity as reported by the analyzer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Behavior alert pushed by the analyzer
///
/// Immutable once created. The timestamp is the analyzer's ISO-8601 string
/// and is compared verbatim for deduplication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub user_id: u64,
    #[serde(default)]
    pub username: Option<String>,
    pub message: String,
    pub severity: Severity,
    pub timestamp: String,
    #[serde(default)]
    pub behaviors: Vec<String>,
}

impl Alert {
    /// Identity key used for deduplication
    pub fn dedup_key(&self) -> (u64, &str) {
        (self.user_id, self.timestamp.as_str())
    }

    /// Name to show for the alert's subject
    pub fn display_name(&self) -> String {
        self.username
            .clone()
            .unwrap_or_else(|| format!("User {}", self.user_id))
    }
}

/// Bounded deduplicated alert buffer
pub struct AlertStore {
    alerts: RwLock<VecDeque<Alert>>,
    capacity: usize,
}

impl AlertStore {
    pub fn new() -> Self {
        Self::with_capacity(MAX_ALERTS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            alerts: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append an alert
    ///
    /// Returns `false` without modifying the buffer when an entry with the
    /// same (user id, timestamp) key is already present. Evicts the oldest
    /// entries once the capacity is exceeded.
    pub fn append(&self, alert: Alert) -> bool {
        let mut alerts = self.alerts.write();
        if alerts.iter().any(|a| a.dedup_key() == alert.dedup_key()) {
            return false;
        }
        alerts.push_back(alert);
        while alerts.len() > self.capacity {
            alerts.pop_front();
        }
        true
    }

    /// Buffer contents in arrival order (oldest first)
    pub fn snapshot(&self) -> Vec<Alert> {
        self.alerts.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.alerts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.read().is_empty()
    }

    pub fn clear(&self) {
        self.alerts.write().clear();
    }
}

impl Default for AlertStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(user_id: u64, timestamp: &str) -> Alert {
        Alert {
            user_id,
            username: Some("bob".to_string()),
            message: "Looking away".to_string(),
            severity: Severity::Medium,
            timestamp: timestamp.to_string(),
            behaviors: vec!["Eyes not visible".to_string()],
        }
    }

    #[test]
    fn test_duplicate_append_is_noop() {
        let store = AlertStore::new();
        assert!(store.append(alert(1, "2026-08-30T10:00:00")));
        let before = store.snapshot();

        assert!(!store.append(alert(1, "2026-08-30T10:00:00")));
        assert_eq!(store.len(), 1);
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn test_same_user_different_timestamp_kept() {
        let store = AlertStore::new();
        assert!(store.append(alert(1, "2026-08-30T10:00:00")));
        assert!(store.append(alert(1, "2026-08-30T10:00:05")));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_eviction_keeps_most_recent_fifty() {
        let store = AlertStore::new();
        for i in 0..60u64 {
            assert!(store.append(alert(i, &format!("2026-08-30T10:00:{:02}", i))));
        }
        assert_eq!(store.len(), 50);

        let snapshot = store.snapshot();
        // Oldest ten evicted; arrival order preserved.
        assert_eq!(snapshot.first().unwrap().user_id, 10);
        assert_eq!(snapshot.last().unwrap().user_id, 59);
    }

    #[test]
    fn test_alert_wire_format() {
        let json = r#"{
            "userId": 42,
            "username": "alice",
            "message": "Multiple faces detected",
            "severity": "high",
            "timestamp": "2026-08-30T10:15:00.123456",
            "behaviors": ["Multiple faces detected"]
        }"#;
        let alert: Alert = serde_json::from_str(json).unwrap();
        assert_eq!(alert.user_id, 42);
        assert_eq!(alert.severity, Severity::High);
        assert_eq!(alert.display_name(), "alice");
    }

    #[test]
    fn test_display_name_falls_back_to_uid() {
        let mut a = alert(7, "t");
        a.username = None;
        assert_eq!(a.display_name(), "User 7");
    }
}
