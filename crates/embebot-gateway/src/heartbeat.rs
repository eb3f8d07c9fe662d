use rand::Rng;

use embebot_core::SessionState;

/// Delay before the first heartbeat of a connection, uniform in `[0, interval)`.
pub fn initial_delay_ms<R: Rng + ?Sized>(interval_ms: u64, rng: &mut R) -> u64 {
    if interval_ms == 0 {
        return 0;
    }
    rng.gen_range(0..interval_ms)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Beat {
    /// Send a heartbeat carrying this sequence and rearm for `next_in_ms`.
    Send {
        sequence: Option<i64>,
        next_in_ms: u64,
    },
    /// The last heartbeat was never acknowledged.
    TimedOut,
    /// No connection is heartbeating.
    Idle,
}

pub fn tick(state: &SessionState) -> Beat {
    match state.heartbeat_interval_ms {
        None => Beat::Idle,
        Some(_) if !state.last_heartbeat_acked => Beat::TimedOut,
        Some(interval) => Beat::Send {
            sequence: state.sequence,
            next_in_ms: interval,
        },
    }
}
