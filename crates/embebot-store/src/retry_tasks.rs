use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use embebot_core::ids::{ChannelId, MessageId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// A pending "recheck this message" task.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryTask {
    pub target_id: MessageId,
    pub channel_id: ChannelId,
    pub attempts: u32,
    pub created_at: String,
}

impl RetryTask {
    pub fn new(target_id: MessageId, channel_id: ChannelId) -> Self {
        Self {
            target_id,
            channel_id,
            attempts: 0,
            created_at: now(),
        }
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub struct RetryTaskRepo {
    db: Database,
    instance: String,
}

impl RetryTaskRepo {
    pub fn new(db: Database, instance: impl Into<String>) -> Self {
        Self {
            db,
            instance: instance.into(),
        }
    }

    /// Insert a task unless one already exists for the same target.
    /// Returns whether a row was written.
    #[instrument(skip(self, task), fields(instance = %self.instance, target_id = %task.target_id))]
    pub fn insert_if_absent(&self, task: &RetryTask) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT INTO retry_tasks (instance, target_id, channel_id, attempts, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(instance, target_id) DO NOTHING",
                rusqlite::params![
                    self.instance,
                    task.target_id.as_str(),
                    task.channel_id.as_str(),
                    task.attempts,
                    task.created_at,
                ],
            )?;
            Ok(changed > 0)
        })
    }

    /// All tasks, oldest first.
    #[instrument(skip(self), fields(instance = %self.instance))]
    pub fn list(&self) -> Result<Vec<RetryTask>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT target_id, channel_id, attempts, created_at
                 FROM retry_tasks WHERE instance = ?1
                 ORDER BY created_at ASC, rowid ASC",
            )?;
            let mut rows = stmt.query([&self.instance])?;
            let mut tasks = Vec::new();
            while let Some(row) = rows.next()? {
                let target: String = row_helpers::get(row, 0, "retry_tasks", "target_id")?;
                let channel: String = row_helpers::get(row, 1, "retry_tasks", "channel_id")?;
                tasks.push(RetryTask {
                    target_id: row_helpers::parse(&target, "retry_tasks", "target_id")?,
                    channel_id: row_helpers::parse(&channel, "retry_tasks", "channel_id")?,
                    attempts: row_helpers::get(row, 2, "retry_tasks", "attempts")?,
                    created_at: row_helpers::get(row, 3, "retry_tasks", "created_at")?,
                });
            }
            Ok(tasks)
        })
    }

    #[instrument(skip(self), fields(instance = %self.instance, target_id = %target_id))]
    pub fn update_attempts(&self, target_id: &MessageId, attempts: u32) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE retry_tasks SET attempts = ?1, updated_at = ?2
                 WHERE instance = ?3 AND target_id = ?4",
                rusqlite::params![attempts, now(), self.instance, target_id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("retry task {target_id}")));
            }
            Ok(())
        })
    }

    #[instrument(skip(self), fields(instance = %self.instance, target_id = %target_id))]
    pub fn delete(&self, target_id: &MessageId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM retry_tasks WHERE instance = ?1 AND target_id = ?2",
                rusqlite::params![self.instance, target_id.as_str()],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM retry_tasks WHERE instance = ?1",
                [&self.instance],
                |row| row.get(0),
            )?;
            Ok(usize::try_from(n).unwrap_or_default())
        })
    }
}
