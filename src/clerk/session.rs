use super::message::ClientId;
use rand::{rngs::OsRng, Rng};
use std::sync::{Mutex, PoisonError};

/// Client ids are uniform in `[0, 2^62)`.
pub const CLIENT_ID_SPACE: u64 = 1 << 62;

struct Counters {
    next_seq: u64,
    leader_hint: usize,
}

/// Per-clerk identity and bookkeeping.
///
/// `next_seq` and `leader_hint` live behind one lock which is only taken for
/// the local bookkeeping step, never across a network round-trip.
pub struct Session {
    client_id: ClientId,
    counters: Mutex<Counters>,
}

/// What an operation needs to start: its dedup sequence number and the
/// server index to try first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    pub seq: u64,
    pub first_candidate: usize,
}

impl Session {
    pub fn new() -> Self {
        Self::with_client_id(OsRng.gen_range(0..CLIENT_ID_SPACE))
    }

    pub fn with_client_id(client_id: ClientId) -> Self {
        Self {
            client_id,
            counters: Mutex::new(Counters {
                next_seq: 1,
                leader_hint: 0,
            }),
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Claims the next sequence number and reads the leader hint in one
    /// critical section.
    pub fn begin(&self) -> Ticket {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let seq = counters.next_seq;
        counters.next_seq += 1;

        Ticket {
            seq,
            first_candidate: counters.leader_hint,
        }
    }

    /// Records the server that gave a definitive answer. Returns the
    /// previous hint.
    pub fn record_leader(&self, index: usize) -> usize {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut counters.leader_hint, index)
    }

    pub fn leader_hint(&self) -> usize {
        self.counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .leader_hint
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
