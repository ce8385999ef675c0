use crate::snapshot::now_unix_millis;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

const HOUR_MS: i64 = 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionStatus {
    #[serde(rename = "Pending Approval")]
    PendingApproval,
    Approved,
    #[serde(rename = "Executed (Simulated)")]
    Executed,
    #[serde(rename = "Failed (Simulated)")]
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionRecord {
    pub id: String,
    pub timestamp: i64,
    pub action: String,
    pub user: String,
    pub status: ActionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewAction {
    pub action: String,
    pub user: String,
    pub status: ActionStatus,
    #[serde(default)]
    pub details: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ActionLogError {
    #[error("action {0} not found")]
    NotFound(String),
}

pub struct ActionLog {
    records: RwLock<Vec<ActionRecord>>,
    seq: AtomicU64,
}

impl ActionLog {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            seq: AtomicU64::new(0),
        }
    }

    pub fn seeded(now_ms: i64) -> Self {
        let records = vec![
            ActionRecord {
                id: "action1".to_string(),
                timestamp: now_ms - 2 * HOUR_MS,
                action: "Restart Nginx service".to_string(),
                user: "AI Suggested".to_string(),
                status: ActionStatus::Executed,
                details: Some("Nginx was restarted due to high error rate.".to_string()),
            },
            ActionRecord {
                id: "action2".to_string(),
                timestamp: now_ms - HOUR_MS,
                action: "Block IP 203.0.113.45".to_string(),
                user: "Admin".to_string(),
                status: ActionStatus::Approved,
                details: Some("IP blocked due to suspicious activity.".to_string()),
            },
        ];
        // Newest first.
        let records = records.into_iter().rev().collect();
        Self {
            records: RwLock::new(records),
            seq: AtomicU64::new(0),
        }
    }

    pub async fn list(&self) -> Vec<ActionRecord> {
        self.records.read().await.clone()
    }

    pub async fn add(&self, action: NewAction) -> ActionRecord {
        let now = now_unix_millis();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let record = ActionRecord {
            id: format!("action-{now}-{seq}"),
            timestamp: now,
            action: action.action,
            user: action.user,
            status: action.status,
            details: action.details,
        };
        info!(id = %record.id, action = %record.action, user = %record.user, "action recorded");
        self.records.write().await.insert(0, record.clone());
        record
    }

    pub async fn update_status(
        &self,
        id: &str,
        status: ActionStatus,
        details: Option<String>,
    ) -> Result<ActionRecord, ActionLogError> {
        let mut records = self.records.write().await;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| ActionLogError::NotFound(id.to_string()))?;
        record.status = status;
        if details.is_some() {
            record.details = details;
        }
        info!(id, status = ?status, "action status updated");
        Ok(record.clone())
    }
}

impl Default for ActionLog {
    fn default() -> Self {
        Self::new()
    }
}
