use super::message::{ClientId, Op};
use log::{info, warn};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub enum ClerkLogType {
    SessionStart { servers: usize },
    GetStart { key: String, seq: u64 },
    GetDone { key: String, seq: u64, found: bool, attempts: u64 },
    PutAppendStart { op: Op, key: String, seq: u64 },
    PutAppendDone { op: Op, key: String, seq: u64, attempts: u64 },
    LeaderChange { from: usize, to: usize },
    RoundExhausted { seq: u64, rounds: u64 },
}

#[derive(Serialize)]
struct ClerkLog {
    client_id: ClientId,
    log_type: ClerkLogType,
}

pub fn log_clerk(client_id: ClientId, log_type: ClerkLogType) {
    let log_entry = ClerkLog { client_id, log_type };
    match ron::to_string(&log_entry) {
        Ok(line) => info!(target: "clerk", "{}", line),
        Err(e) => warn!(target: "clerk", "failed to serialize log entry {:?}: {}", log_entry.log_type, e),
    }
}
