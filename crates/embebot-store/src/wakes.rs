use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Why a wake-up was scheduled. At most one deadline is stored per purpose.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WakePurpose {
    Heartbeat,
    Reconnect,
    RetryDrain,
}

impl WakePurpose {
    pub const ALL: [WakePurpose; 3] = [Self::Heartbeat, Self::Reconnect, Self::RetryDrain];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Heartbeat => "heartbeat",
            Self::Reconnect => "reconnect",
            Self::RetryDrain => "retry_drain",
        }
    }
}

impl std::fmt::Display for WakePurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WakePurpose {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "heartbeat" => Ok(Self::Heartbeat),
            "reconnect" => Ok(Self::Reconnect),
            "retry_drain" => Ok(Self::RetryDrain),
            other => Err(format!("unknown wake purpose: {other}")),
        }
    }
}

/// Persisted `purpose -> due_at_ms` map for one actor instance.
pub struct WakeRepo {
    db: Database,
    instance: String,
}

impl WakeRepo {
    pub fn new(db: Database, instance: impl Into<String>) -> Self {
        Self {
            db,
            instance: instance.into(),
        }
    }

    /// Set the deadline for `purpose`, replacing any existing one.
    #[instrument(skip(self), fields(instance = %self.instance, purpose = %purpose))]
    pub fn arm(&self, purpose: WakePurpose, due_at_ms: u64) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO wakes (instance, purpose, due_at_ms) VALUES (?1, ?2, ?3)
                 ON CONFLICT(instance, purpose) DO UPDATE SET due_at_ms = excluded.due_at_ms",
                rusqlite::params![self.instance, purpose.as_str(), to_sql(due_at_ms)],
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(instance = %self.instance, purpose = %purpose))]
    pub fn clear(&self, purpose: WakePurpose) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM wakes WHERE instance = ?1 AND purpose = ?2",
                rusqlite::params![self.instance, purpose.as_str()],
            )?;
            Ok(())
        })
    }

    /// All pending wakes, soonest first.
    pub fn list(&self) -> Result<Vec<(WakePurpose, u64)>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT purpose, due_at_ms FROM wakes WHERE instance = ?1
                 ORDER BY due_at_ms ASC, purpose ASC",
            )?;
            let mut rows = stmt.query([&self.instance])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let raw: String = row_helpers::get(row, 0, "wakes", "purpose")?;
                let purpose = row_helpers::parse(&raw, "wakes", "purpose")?;
                let due = row_helpers::get_u64(row, 1, "wakes", "due_at_ms")?;
                out.push((purpose, due));
            }
            Ok(out)
        })
    }

    /// Remove and return every purpose due at or before `now_ms`.
    #[instrument(skip(self), fields(instance = %self.instance))]
    pub fn take_due(&self, now_ms: u64) -> Result<Vec<WakePurpose>, StoreError> {
        self.db.with_tx(|tx| {
            let due: Vec<String> = {
                let mut stmt = tx.prepare(
                    "SELECT purpose FROM wakes WHERE instance = ?1 AND due_at_ms <= ?2
                     ORDER BY due_at_ms ASC",
                )?;
                let rows = stmt.query_map(
                    rusqlite::params![self.instance, to_sql(now_ms)],
                    |row| row.get(0),
                )?;
                rows.collect::<Result<_, _>>()?
            };
            tx.execute(
                "DELETE FROM wakes WHERE instance = ?1 AND due_at_ms <= ?2",
                rusqlite::params![self.instance, to_sql(now_ms)],
            )?;
            due.iter()
                .map(|raw| row_helpers::parse(raw, "wakes", "purpose"))
                .collect()
        })
    }
}

fn to_sql(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}
