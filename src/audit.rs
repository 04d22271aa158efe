//! Append-only audit journal.
//!
//! Every policy decision lands here before the mediated action runs. Records
//! are line-delimited JSON, one file per agent identifier, appended in
//! arrival order. The journal is readable back with simple filters; it is
//! not a tamper-evident chain (the entry id is a content hash, not a link to
//! the previous entry).

use crate::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Decision recorded for an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditDecision {
    /// The action was permitted and attempted.
    Allowed,
    /// The action was refused by policy or by the tool itself.
    Blocked,
}

impl std::fmt::Display for AuditDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditDecision::Allowed => write!(f, "allowed"),
            AuditDecision::Blocked => write!(f, "blocked"),
        }
    }
}

/// One immutable journal record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// ISO-8601 UTC timestamp.
    pub timestamp: String,
    /// 16-hex prefix of SHA-256 over `timestamp:action:target`.
    pub entry_id: String,
    /// Agent the action was performed on behalf of.
    pub agent_id: String,
    /// Action kind, e.g. `command` or `vault_set`.
    pub action_type: String,
    /// Target string as seen by the policy engine.
    pub target: String,
    /// Outcome.
    pub decision: AuditDecision,
    /// Denial or failure reason, when there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Free-form context attached by the tool.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Read-back filter for [`AuditLog::entries`].
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    /// Keep only the last N matching entries.
    pub limit: Option<usize>,
    /// Restrict to one agent's file.
    pub agent_id: Option<String>,
    /// Restrict to one decision.
    pub decision: Option<AuditDecision>,
}

/// Append-only JSONL journal, one file per agent id.
///
/// File handles open lazily on first write with append semantics and stay
/// open until [`close`](AuditLog::close). Writes are one line each, flushed
/// immediately, so concurrent writers interleave at line granularity.
pub struct AuditLog {
    dir: PathBuf,
    handles: Mutex<HashMap<String, File>>,
}

impl AuditLog {
    /// Creates the journal directory if absent. No files are opened yet.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            handles: Mutex::new(HashMap::new()),
        })
    }

    fn file_path(&self, agent_id: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", sanitize(agent_id)))
    }

    /// Appends one entry and returns its id.
    ///
    /// Failures raise; callers decide whether a failed journal write should
    /// abort their own work.
    pub fn log(
        &self,
        agent_id: &str,
        action_type: &str,
        target: &str,
        decision: AuditDecision,
        reason: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> Result<String> {
        let timestamp = Utc::now().to_rfc3339();
        let entry_id = entry_id(&timestamp, action_type, target);
        let entry = AuditEntry {
            timestamp,
            entry_id: entry_id.clone(),
            agent_id: agent_id.to_string(),
            action_type: action_type.to_string(),
            target: target.to_string(),
            decision,
            reason,
            metadata,
        };

        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let mut handles = self
            .handles
            .lock()
            .map_err(|_| Error::other("audit handle lock poisoned"))?;
        if !handles.contains_key(agent_id) {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.file_path(agent_id))?;
            handles.insert(agent_id.to_string(), file);
        }
        let file = handles
            .get_mut(agent_id)
            .ok_or_else(|| Error::other("audit handle vanished"))?;
        file.write_all(line.as_bytes())?;
        file.flush()?;

        debug!(agent_id, action_type, %decision, target, "audit entry appended");
        Ok(entry_id)
    }

    /// Reads entries back, newest-last, filtered and capped.
    ///
    /// Malformed lines are skipped. A missing file yields an empty list.
    pub fn entries(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>> {
        let mut entries = Vec::new();
        match &query.agent_id {
            Some(agent_id) => read_file(&self.file_path(agent_id), &mut entries)?,
            None => {
                let mut paths: Vec<PathBuf> = match std::fs::read_dir(&self.dir) {
                    Ok(iter) => iter
                        .filter_map(|e| e.ok())
                        .map(|e| e.path())
                        .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
                        .collect(),
                    Err(_) => Vec::new(),
                };
                paths.sort();
                for path in paths {
                    read_file(&path, &mut entries)?;
                }
            }
        }

        if let Some(decision) = query.decision {
            entries.retain(|e| e.decision == decision);
        }
        if let Some(limit) = query.limit {
            if entries.len() > limit {
                entries.drain(..entries.len() - limit);
            }
        }
        Ok(entries)
    }

    /// Flushes every open handle.
    pub fn flush(&self) -> Result<()> {
        let mut handles = self
            .handles
            .lock()
            .map_err(|_| Error::other("audit handle lock poisoned"))?;
        for file in handles.values_mut() {
            file.flush()?;
        }
        Ok(())
    }

    /// Flushes and releases all handles. Safe to log again afterwards; the
    /// files reopen lazily.
    pub fn close(&self) -> Result<()> {
        self.flush()?;
        let mut handles = self
            .handles
            .lock()
            .map_err(|_| Error::other("audit handle lock poisoned"))?;
        handles.clear();
        Ok(())
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog").field("dir", &self.dir).finish()
    }
}

fn read_file(path: &Path, out: &mut Vec<AuditEntry>) -> Result<()> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err.into()),
    };
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<AuditEntry>(&line) {
            Ok(entry) => out.push(entry),
            Err(_) => continue,
        }
    }
    Ok(())
}

/// First 16 hex characters of SHA-256 over `timestamp:action:target`.
fn entry_id(timestamp: &str, action_type: &str, target: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(timestamp.as_bytes());
    hasher.update(b":");
    hasher.update(action_type.as_bytes());
    hasher.update(b":");
    hasher.update(target.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..16].to_string()
}

/// Agent ids become file names; keep them to a safe alphabet.
fn sanitize(agent_id: &str) -> String {
    agent_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn log_in(dir: &TempDir) -> AuditLog {
        AuditLog::new(dir.path().join("audit")).unwrap()
    }

    #[test]
    fn test_log_and_read_back() {
        let tmp = TempDir::new().unwrap();
        let log = log_in(&tmp);
        let id = log
            .log(
                "agent-1",
                "command",
                "echo hello",
                AuditDecision::Allowed,
                None,
                None,
            )
            .unwrap();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));

        let entries = log.entries(&AuditQuery::default()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entry_id, id);
        assert_eq!(entries[0].action_type, "command");
        assert_eq!(entries[0].decision, AuditDecision::Allowed);
    }

    #[test]
    fn test_entries_ordered_by_append() {
        let tmp = TempDir::new().unwrap();
        let log = log_in(&tmp);
        for i in 0..5 {
            log.log(
                "agent-1",
                "command",
                &format!("cmd-{}", i),
                AuditDecision::Allowed,
                None,
                None,
            )
            .unwrap();
        }
        let entries = log.entries(&AuditQuery::default()).unwrap();
        let targets: Vec<_> = entries.iter().map(|e| e.target.as_str()).collect();
        assert_eq!(targets, ["cmd-0", "cmd-1", "cmd-2", "cmd-3", "cmd-4"]);
    }

    #[test]
    fn test_limit_keeps_last_n() {
        let tmp = TempDir::new().unwrap();
        let log = log_in(&tmp);
        for i in 0..10 {
            log.log(
                "agent-1",
                "command",
                &format!("cmd-{}", i),
                AuditDecision::Allowed,
                None,
                None,
            )
            .unwrap();
        }
        let entries = log
            .entries(&AuditQuery {
                limit: Some(3),
                ..Default::default()
            })
            .unwrap();
        let targets: Vec<_> = entries.iter().map(|e| e.target.as_str()).collect();
        assert_eq!(targets, ["cmd-7", "cmd-8", "cmd-9"]);
    }

    #[test]
    fn test_decision_filter() {
        let tmp = TempDir::new().unwrap();
        let log = log_in(&tmp);
        log.log("a", "command", "ok", AuditDecision::Allowed, None, None)
            .unwrap();
        log.log(
            "a",
            "command",
            "rm -rf /",
            AuditDecision::Blocked,
            Some("pattern".to_string()),
            None,
        )
        .unwrap();

        let blocked = log
            .entries(&AuditQuery {
                decision: Some(AuditDecision::Blocked),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].target, "rm -rf /");
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let tmp = TempDir::new().unwrap();
        let log = log_in(&tmp);
        log.log("a", "command", "one", AuditDecision::Allowed, None, None)
            .unwrap();
        log.close().unwrap();

        let path = tmp.path().join("audit").join("a.jsonl");
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("this is not json\n");
        std::fs::write(&path, content).unwrap();

        log.log("a", "command", "two", AuditDecision::Allowed, None, None)
            .unwrap();
        let entries = log.entries(&AuditQuery::default()).unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_absent_file_yields_empty() {
        let tmp = TempDir::new().unwrap();
        let log = log_in(&tmp);
        let entries = log
            .entries(&AuditQuery {
                agent_id: Some("nobody".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_one_file_per_agent() {
        let tmp = TempDir::new().unwrap();
        let log = log_in(&tmp);
        log.log("alpha", "command", "x", AuditDecision::Allowed, None, None)
            .unwrap();
        log.log("beta", "command", "y", AuditDecision::Allowed, None, None)
            .unwrap();

        assert!(tmp.path().join("audit").join("alpha.jsonl").exists());
        assert!(tmp.path().join("audit").join("beta.jsonl").exists());

        let alpha = log
            .entries(&AuditQuery {
                agent_id: Some("alpha".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(alpha.len(), 1);
        assert_eq!(alpha[0].target, "x");
    }

    #[test]
    fn test_entry_id_is_content_hash() {
        let a = entry_id("2026-01-01T00:00:00Z", "command", "ls");
        let b = entry_id("2026-01-01T00:00:00Z", "command", "ls");
        let c = entry_id("2026-01-01T00:00:00Z", "command", "pwd");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
