use std::collections::HashMap;

use tracing::error;

use embebot_store::{StoreError, WakePurpose, WakeRepo};

/// Per-purpose deadlines with write-through persistence.
///
/// The in-memory map is authoritative for the running actor; a failed write is
/// logged and the actor carries on.
pub struct WakeQueue {
    repo: WakeRepo,
    pending: HashMap<WakePurpose, u64>,
}

impl WakeQueue {
    pub fn load(repo: WakeRepo) -> Result<Self, StoreError> {
        let pending = repo.list()?.into_iter().collect();
        Ok(Self { repo, pending })
    }

    pub fn arm(&mut self, purpose: WakePurpose, due_at_ms: u64) {
        self.pending.insert(purpose, due_at_ms);
        if let Err(e) = self.repo.arm(purpose, due_at_ms) {
            error!(%purpose, error = %e, "failed to persist wake");
        }
    }

    /// Returns false when a deadline for `purpose` was already pending.
    pub fn arm_if_absent(&mut self, purpose: WakePurpose, due_at_ms: u64) -> bool {
        if self.pending.contains_key(&purpose) {
            return false;
        }
        self.arm(purpose, due_at_ms);
        true
    }

    pub fn clear(&mut self, purpose: WakePurpose) {
        if self.pending.remove(&purpose).is_some() {
            if let Err(e) = self.repo.clear(purpose) {
                error!(%purpose, error = %e, "failed to clear wake");
            }
        }
    }

    pub fn due_at(&self, purpose: WakePurpose) -> Option<u64> {
        self.pending.get(&purpose).copied()
    }

    /// Soonest pending deadline.
    pub fn next_due(&self) -> Option<u64> {
        self.pending.values().min().copied()
    }

    /// Remove every purpose due at `now_ms`, soonest first.
    pub fn take_due(&mut self, now_ms: u64) -> Vec<WakePurpose> {
        let mut due: Vec<(u64, WakePurpose)> = self
            .pending
            .iter()
            .filter(|(_, at)| **at <= now_ms)
            .map(|(p, at)| (*at, *p))
            .collect();
        if due.is_empty() {
            return Vec::new();
        }
        due.sort();
        for (_, purpose) in &due {
            self.pending.remove(purpose);
        }
        if let Err(e) = self.repo.take_due(now_ms) {
            error!(error = %e, "failed to persist fired wakes");
        }
        due.into_iter().map(|(_, p)| p).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embebot_store::Database;

    fn queue(db: &Database) -> WakeQueue {
        WakeQueue::load(WakeRepo::new(db.clone(), "main")).unwrap()
    }

    #[test]
    fn next_due_is_minimum() {
        let db = Database::in_memory().unwrap();
        let mut wakes = queue(&db);
        assert!(wakes.next_due().is_none());
        wakes.arm(WakePurpose::RetryDrain, 9_000);
        wakes.arm(WakePurpose::Heartbeat, 4_000);
        assert_eq!(wakes.next_due(), Some(4_000));
    }

    #[test]
    fn arm_if_absent_never_pushes_back() {
        let db = Database::in_memory().unwrap();
        let mut wakes = queue(&db);
        assert!(wakes.arm_if_absent(WakePurpose::Reconnect, 5_000));
        assert!(!wakes.arm_if_absent(WakePurpose::Reconnect, 10_000));
        assert_eq!(wakes.due_at(WakePurpose::Reconnect), Some(5_000));
    }

    #[test]
    fn heartbeat_rearm_does_not_lose_retry_drain() {
        let db = Database::in_memory().unwrap();
        let mut wakes = queue(&db);
        wakes.arm(WakePurpose::RetryDrain, 5_000);
        wakes.arm(WakePurpose::Heartbeat, 2_000);
        wakes.arm(WakePurpose::Heartbeat, 40_000);
        assert_eq!(wakes.next_due(), Some(5_000));
    }

    #[test]
    fn take_due_orders_and_persists() {
        let db = Database::in_memory().unwrap();
        let mut wakes = queue(&db);
        wakes.arm(WakePurpose::Reconnect, 3_000);
        wakes.arm(WakePurpose::Heartbeat, 1_000);
        wakes.arm(WakePurpose::RetryDrain, 8_000);

        assert_eq!(
            wakes.take_due(3_000),
            vec![WakePurpose::Heartbeat, WakePurpose::Reconnect]
        );
        assert_eq!(wakes.next_due(), Some(8_000));

        let reloaded = queue(&db);
        assert_eq!(reloaded.due_at(WakePurpose::RetryDrain), Some(8_000));
        assert!(reloaded.due_at(WakePurpose::Heartbeat).is_none());
    }

    #[test]
    fn pending_wakes_survive_reload() {
        let db = Database::in_memory().unwrap();
        {
            let mut wakes = queue(&db);
            wakes.arm(WakePurpose::Reconnect, 7_000);
        }
        assert_eq!(queue(&db).next_due(), Some(7_000));
    }
}
