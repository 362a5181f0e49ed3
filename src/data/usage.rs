//! Persisted usage records
//!
//! One JSON file per service session plus a statistics file. The tracker in
//! `business::usage_tracker` owns the files; this module only defines the
//! shapes and the pure bookkeeping on them.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

use crate::data::{ServiceDescriptor, ServiceId};

/// A session counts as active when accessed within this many seconds
const ACTIVE_WINDOW_SECS: i64 = 3600;

/// Per-service usage record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: ServiceId,
    pub service_name: String,
    pub service_url: Url,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_url: Option<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll_position: Option<f64>,
}

impl SessionRecord {
    pub fn new(service: &ServiceDescriptor, now: DateTime<Utc>) -> Self {
        Self {
            id: service.id.clone(),
            service_name: service.name.clone(),
            service_url: service.url.clone(),
            created_at: now,
            last_accessed: now,
            access_count: 1,
            current_url: None,
            scroll_position: None,
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_accessed = now;
        self.access_count += 1;
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        (now - self.last_accessed).num_seconds() < ACTIVE_WINDOW_SECS
    }

    /// File name the record is stored under
    pub fn file_name(&self) -> String {
        format!("{}.json", self.id)
    }
}

/// Aggregate usage counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStatistics {
    #[serde(default)]
    pub total_sessions: u64,
    #[serde(default)]
    pub last_used_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub service_usage_count: BTreeMap<String, u64>,
    #[serde(default)]
    pub daily_usage: BTreeMap<NaiveDate, u64>,
}

impl UsageStatistics {
    pub fn record(&mut self, service_name: &str, now: DateTime<Utc>) {
        self.total_sessions += 1;
        self.last_used_date = Some(now);
        *self
            .service_usage_count
            .entry(service_name.to_string())
            .or_insert(0) += 1;
        *self.daily_usage.entry(now.date_naive()).or_insert(0) += 1;
    }

    pub fn usage_count(&self, service_name: &str) -> u64 {
        self.service_usage_count
            .get(service_name)
            .copied()
            .unwrap_or(0)
    }

    /// Merge an imported snapshot: max of totals, latest date, summed counts
    pub fn merge(&mut self, other: &UsageStatistics) {
        self.total_sessions = self.total_sessions.max(other.total_sessions);
        self.last_used_date = match (self.last_used_date, other.last_used_date) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        for (service, count) in &other.service_usage_count {
            *self.service_usage_count.entry(service.clone()).or_insert(0) += count;
        }
        for (day, count) in &other.daily_usage {
            *self.daily_usage.entry(*day).or_insert(0) += count;
        }
    }
}

/// Backup format produced by `export` and consumed by `import`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageExport {
    pub sessions: Vec<SessionRecord>,
    pub statistics: UsageStatistics,
    pub export_date: DateTime<Utc>,
}

/// Read-only view published to the UI thread
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageSnapshot {
    pub sessions: BTreeMap<ServiceId, SessionRecord>,
    pub statistics: UsageStatistics,
    pub last_used_service: Option<String>,
}

impl UsageSnapshot {
    /// Most recently accessed sessions first
    pub fn recently_used(&self, limit: usize) -> Vec<&SessionRecord> {
        let mut sessions: Vec<&SessionRecord> = self.sessions.values().collect();
        sessions.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));
        sessions.truncate(limit);
        sessions
    }

    /// Service name with the highest usage count; ties go to the name first in order
    pub fn most_used(&self) -> Option<&str> {
        self.statistics
            .service_usage_count
            .iter()
            .fold(None, |best: Option<(&String, u64)>, (name, count)| match best {
                Some((_, c)) if c >= *count => best,
                _ => Some((name, *count)),
            })
            .map(|(name, _)| name.as_str())
    }

    pub fn usage_count(&self, service_name: &str) -> u64 {
        self.statistics.usage_count(service_name)
    }

    pub fn active_sessions(&self, now: DateTime<Utc>) -> usize {
        self.sessions.values().filter(|s| s.is_active(now)).count()
    }

    /// Multi-line text shown in the tray's usage submenu
    pub fn summary(&self, now: DateTime<Utc>) -> String {
        let mut lines = vec![
            format!("Total sessions: {}", self.statistics.total_sessions),
            format!("Active sessions: {}", self.active_sessions(now)),
        ];
        if let Some(name) = self.most_used() {
            lines.push(format!("Most used: {} ({})", name, self.usage_count(name)));
        }
        if let Some(date) = self.statistics.last_used_date {
            lines.push(format!("Last used: {}", date.format("%Y-%m-%d %H:%M")));
        }
        lines.join("\n")
    }
}
