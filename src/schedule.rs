//! Scheduled task store.
//!
//! Schedules are persisted under `schedules/{id}.json` in a [`Storage`]
//! backend: a five-field cron expression, an instruction for the agent, and
//! an enabled flag. This module owns the store/list/pause/resume contract;
//! evaluating which schedules are due and firing them belongs to the
//! hosting layer.

use crate::storage::Storage;
use crate::{Error, Result};
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Key prefix shared by every schedule entry.
const SCHEDULE_PREFIX: &str = "schedules/";

/// One persisted schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    /// 8-hex identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Five-field cron expression.
    pub cron: String,
    /// Instruction text handed to the agent when the schedule fires.
    pub task: String,
    /// Agent the schedule belongs to.
    pub agent_name: String,
    /// Paused schedules stay stored but are skipped by the runner.
    pub enabled: bool,
    /// ISO-8601 creation timestamp.
    pub created_at: String,
    /// Last firing time, if the runner recorded one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<String>,
    /// Outcome of the last firing, if recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_result: Option<String>,
}

/// Validates a five-field cron expression.
///
/// Each field is `(\*|n)(/n)?(-n)?(,n)*`; numeric values must sit inside
/// the field's range (minute 0–59, hour 0–23, day-of-month 1–31, month
/// 1–12, day-of-week 0–7 with 7 an alias for Sunday).
pub fn validate_cron(expr: &str) -> Result<()> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(Error::invalid_input(format!(
            "cron expression must have exactly 5 fields, got {}",
            fields.len()
        )));
    }
    const RANGES: [(u32, u32, &str); 5] = [
        (0, 59, "minute"),
        (0, 23, "hour"),
        (1, 31, "day-of-month"),
        (1, 12, "month"),
        (0, 7, "day-of-week"),
    ];
    for (field, (min, max, label)) in fields.iter().zip(RANGES) {
        validate_field(field, min, max)
            .map_err(|_| Error::invalid_input(format!("invalid {} field: {}", label, field)))?;
    }
    Ok(())
}

fn validate_field(field: &str, min: u32, max: u32) -> std::result::Result<(), ()> {
    if field.is_empty() {
        return Err(());
    }
    // Lists split on commas; each element carries its own step/range.
    for part in field.split(',') {
        let (base, step) = match part.split_once('/') {
            Some((base, step)) => (base, Some(step)),
            None => (part, None),
        };
        if let Some(step) = step {
            let step: u32 = step.parse().map_err(|_| ())?;
            if step == 0 {
                return Err(());
            }
        }
        if base == "*" {
            continue;
        }
        let (start, end) = match base.split_once('-') {
            Some((start, end)) => (start, Some(end)),
            None => (base, None),
        };
        let start: u32 = start.parse().map_err(|_| ())?;
        if start < min || start > max {
            return Err(());
        }
        if let Some(end) = end {
            let end: u32 = end.parse().map_err(|_| ())?;
            if end < min || end > max || end < start {
                return Err(());
            }
        }
    }
    Ok(())
}

/// CRUD over persisted schedules.
pub struct ScheduleStore {
    storage: Arc<dyn Storage>,
}

impl ScheduleStore {
    /// Wraps a storage backend.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    fn entry_key(id: &str) -> String {
        format!("{}{}.json", SCHEDULE_PREFIX, id)
    }

    /// Validates the cron expression and persists a new, enabled schedule.
    pub async fn create(
        &self,
        name: &str,
        cron: &str,
        task: &str,
        agent_name: &str,
    ) -> Result<ScheduleEntry> {
        validate_cron(cron)?;
        let id: String = {
            let mut rng = rand::thread_rng();
            (0..8)
                .map(|_| {
                    let n: u8 = rng.gen_range(0..16);
                    char::from_digit(n as u32, 16).unwrap_or('0')
                })
                .collect()
        };
        let entry = ScheduleEntry {
            id,
            name: name.to_string(),
            cron: cron.to_string(),
            task: task.to_string(),
            agent_name: agent_name.to_string(),
            enabled: true,
            created_at: Utc::now().to_rfc3339(),
            last_run: None,
            last_result: None,
        };
        self.persist(&entry).await?;
        Ok(entry)
    }

    async fn persist(&self, entry: &ScheduleEntry) -> Result<()> {
        let bytes = serde_json::to_vec(entry)?;
        self.storage.put(&Self::entry_key(&entry.id), &bytes).await
    }

    /// Loads one schedule.
    pub async fn get(&self, id: &str) -> Result<Option<ScheduleEntry>> {
        match self.storage.get(&Self::entry_key(id)).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes).ok()),
            None => Ok(None),
        }
    }

    /// Lists all schedules, skipping corrupt entries.
    pub async fn list(&self) -> Result<Vec<ScheduleEntry>> {
        let keys = self.storage.list(Some(SCHEDULE_PREFIX)).await?;
        let mut entries = Vec::new();
        for key in keys {
            let Some(bytes) = self.storage.get(&key).await? else {
                continue;
            };
            match serde_json::from_slice::<ScheduleEntry>(&bytes) {
                Ok(entry) => entries.push(entry),
                Err(_) => {
                    warn!(key, "skipping corrupt schedule entry");
                    continue;
                }
            }
        }
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(entries)
    }

    /// Removes a schedule. Removing an absent id is a no-op.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.storage.delete(&Self::entry_key(id)).await
    }

    /// Disables a schedule without removing it.
    pub async fn pause(&self, id: &str) -> Result<ScheduleEntry> {
        self.set_enabled(id, false).await
    }

    /// Re-enables a paused schedule.
    pub async fn resume(&self, id: &str) -> Result<ScheduleEntry> {
        self.set_enabled(id, true).await
    }

    async fn set_enabled(&self, id: &str, enabled: bool) -> Result<ScheduleEntry> {
        let mut entry = self
            .get(id)
            .await?
            .ok_or_else(|| Error::invalid_input(format!("schedule not found: {}", id)))?;
        entry.enabled = enabled;
        self.persist(&entry).await?;
        Ok(entry)
    }
}
