use chrono::Utc;
use tracing::instrument;

use embebot_core::SessionState;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Single-row persistence of a gateway actor's [`SessionState`], keyed by
/// instance.
pub struct GatewayStateRepo {
    db: Database,
    instance: String,
}

impl GatewayStateRepo {
    pub fn new(db: Database, instance: impl Into<String>) -> Self {
        Self {
            db,
            instance: instance.into(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Load the stored state, or the default state when nothing was saved yet.
    #[instrument(skip(self), fields(instance = %self.instance))]
    pub fn load(&self) -> Result<SessionState, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id, sequence, resume_url, heartbeat_interval_ms, last_heartbeat_acked
                 FROM gateway_state WHERE instance = ?1",
            )?;
            let mut rows = stmt.query([&self.instance])?;
            let Some(row) = rows.next()? else {
                return Ok(SessionState::default());
            };

            let interval: Option<i64> =
                row_helpers::get_opt(row, 3, "gateway_state", "heartbeat_interval_ms")?;
            let heartbeat_interval_ms = interval
                .map(|v| {
                    u64::try_from(v).map_err(|_| StoreError::CorruptRow {
                        table: "gateway_state",
                        column: "heartbeat_interval_ms",
                        detail: format!("negative value: {v}"),
                    })
                })
                .transpose()?;

            Ok(SessionState {
                session_id: row_helpers::get_opt(row, 0, "gateway_state", "session_id")?,
                sequence: row_helpers::get_opt(row, 1, "gateway_state", "sequence")?,
                resume_url: row_helpers::get_opt(row, 2, "gateway_state", "resume_url")?,
                heartbeat_interval_ms,
                last_heartbeat_acked: row_helpers::get(
                    row,
                    4,
                    "gateway_state",
                    "last_heartbeat_acked",
                )?,
            })
        })
    }

    /// Upsert the full state.
    #[instrument(skip(self, state), fields(instance = %self.instance, sequence = ?state.sequence))]
    pub fn save(&self, state: &SessionState) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let interval = state
            .heartbeat_interval_ms
            .map(|v| i64::try_from(v).unwrap_or(i64::MAX));
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO gateway_state
                    (instance, session_id, sequence, resume_url, heartbeat_interval_ms, last_heartbeat_acked, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(instance) DO UPDATE SET
                    session_id = excluded.session_id,
                    sequence = excluded.sequence,
                    resume_url = excluded.resume_url,
                    heartbeat_interval_ms = excluded.heartbeat_interval_ms,
                    last_heartbeat_acked = excluded.last_heartbeat_acked,
                    updated_at = excluded.updated_at",
                rusqlite::params![
                    self.instance,
                    state.session_id,
                    state.sequence,
                    state.resume_url,
                    interval,
                    state.last_heartbeat_acked,
                    now,
                ],
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(instance = %self.instance))]
    pub fn delete(&self) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM gateway_state WHERE instance = ?1", [&self.instance])?;
            Ok(())
        })
    }
}
