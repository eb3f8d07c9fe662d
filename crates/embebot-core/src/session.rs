use serde::{Deserialize, Serialize};

/// Durable gateway session state.
///
/// `session_id` and `sequence` together form the resume point; they are only
/// ever cleared together, and a handshake resumes only when both are present.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: Option<String>,
    pub sequence: Option<i64>,
    pub resume_url: Option<String>,
    pub heartbeat_interval_ms: Option<u64>,
    pub last_heartbeat_acked: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            session_id: None,
            sequence: None,
            resume_url: None,
            heartbeat_interval_ms: None,
            last_heartbeat_acked: true,
        }
    }
}

impl SessionState {
    /// Record a sequence number seen on an inbound frame. The stored value
    /// never moves backward. Returns whether it changed.
    pub fn observe_sequence(&mut self, seq: i64) -> bool {
        match self.sequence {
            Some(current) if current >= seq => false,
            _ => {
                self.sequence = Some(seq);
                true
            }
        }
    }

    /// Session id and sequence to resume with, if both are known.
    pub fn resume_point(&self) -> Option<(&str, i64)> {
        match (&self.session_id, self.sequence) {
            (Some(id), Some(seq)) => Some((id.as_str(), seq)),
            _ => None,
        }
    }

    pub fn is_resumable(&self) -> bool {
        self.resume_point().is_some()
    }

    /// Forget the resume point (the endpoint is kept).
    pub fn clear_session(&mut self) {
        self.session_id = None;
        self.sequence = None;
    }

    /// Forget everything that identifies the remote session.
    pub fn clear_identity(&mut self) {
        self.clear_session();
        self.resume_url = None;
    }

    pub fn begin_heartbeat(&mut self, interval_ms: u64) {
        self.heartbeat_interval_ms = Some(interval_ms);
        self.last_heartbeat_acked = true;
    }

    /// Drop transient per-connection fields.
    pub fn end_heartbeat(&mut self) {
        self.heartbeat_interval_ms = None;
        self.last_heartbeat_acked = true;
    }
}
