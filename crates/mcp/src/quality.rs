// Quality gate results and the per-user progress log they feed

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use toolhost_core::storage::{self, ListOptions, PutOptions, StorageBackend, StorageResult};

const PROGRESS_PREFIX: &str = "progress:";
const HISTORY_PAGE_SIZE: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
}

fn default_retention_days() -> u64 {
    30
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
        }
    }
}

impl ProgressConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days.saturating_mul(24 * 60 * 60))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Reported alongside a successful result
    Warning,
    /// Blocks the result when failing
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityCheck {
    pub name: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub severity: Severity,
}

impl QualityCheck {
    pub fn passed(name: impl Into<String>, severity: Severity) -> Self {
        Self {
            name: name.into(),
            passed: true,
            message: None,
            severity,
        }
    }

    pub fn failed(name: impl Into<String>, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            name: name.into(),
            passed: false,
            message: Some(message.into()),
            severity,
        }
    }

    pub fn is_blocking(&self) -> bool {
        !self.passed && self.severity == Severity::Error
    }
}

/// Output of a tool's quality gate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub checks: Vec<QualityCheck>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores: Option<HashMap<String, f64>>,
}

impl QualityReport {
    pub fn new(checks: Vec<QualityCheck>) -> Self {
        Self {
            checks,
            scores: None,
        }
    }

    pub fn with_score(mut self, name: impl Into<String>, score: f64) -> Self {
        self.scores
            .get_or_insert_with(HashMap::new)
            .insert(name.into(), score);
        self
    }

    /// Failing error-severity checks
    pub fn blocking_failures(&self) -> Vec<QualityCheck> {
        self.checks.iter().filter(|c| c.is_blocking()).cloned().collect()
    }

    /// Failing warning-severity checks
    pub fn warnings(&self) -> Vec<QualityCheck> {
        self.checks
            .iter()
            .filter(|c| !c.passed && c.severity == Severity::Warning)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEntry {
    pub tool_name: String,
    pub timestamp: DateTime<Utc>,
    pub checks: Vec<QualityCheck>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores: Option<HashMap<String, f64>>,
}

impl ProgressEntry {
    pub fn from_report(tool_name: &str, report: &QualityReport) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            timestamp: Utc::now(),
            checks: report.checks.clone(),
            scores: report.scores.clone(),
        }
    }
}

/// Append-only, expiring record of quality gate outcomes per user and tool
pub struct ProgressLog {
    storage: Arc<dyn StorageBackend>,
    retention: Duration,
}

impl ProgressLog {
    pub fn new(storage: Arc<dyn StorageBackend>, retention: Duration) -> Self {
        Self { storage, retention }
    }

    fn prefix(user_id: &str, tool_name: &str) -> String {
        format!("{}{}:{}:", PROGRESS_PREFIX, user_id, tool_name)
    }

    /// Write one entry. Keys sort by timestamp; `request_id` keeps them unique.
    pub async fn append(
        &self,
        user_id: &str,
        request_id: &str,
        entry: &ProgressEntry,
    ) -> StorageResult<String> {
        let key = format!(
            "{}{:013}-{}",
            Self::prefix(user_id, &entry.tool_name),
            entry.timestamp.timestamp_millis().max(0),
            request_id
        );
        storage::store(
            self.storage.as_ref(),
            &key,
            entry,
            PutOptions::with_ttl(self.retention),
        )
        .await?;
        Ok(key)
    }

    /// Retained entries for a user and tool, oldest first
    pub async fn history(&self, user_id: &str, tool_name: &str) -> StorageResult<Vec<ProgressEntry>> {
        let prefix = Self::prefix(user_id, tool_name);
        let mut entries = Vec::new();
        let mut cursor = None;

        loop {
            let page = self
                .storage
                .list(&prefix, ListOptions::page(HISTORY_PAGE_SIZE, cursor))
                .await?;
            for key in &page.keys {
                if let Some(entry) = storage::load::<ProgressEntry>(self.storage.as_ref(), key).await? {
                    entries.push(entry);
                }
            }
            if page.complete {
                break;
            }
            cursor = page.cursor;
        }

        Ok(entries)
    }
}
