use crate::clerk::message::{ClientId, Op, PutAppendArgs};
use log::info;
use std::collections::{HashMap, HashSet};

/// Applies committed commands to an in-memory map, at most once per
/// `(client_id, seq)`.
#[derive(Debug, Default)]
pub struct KvStateMachine {
    store: HashMap<String, String>,
    applied: HashMap<ClientId, HashSet<u64>>,
    applied_count: usize,
}

impl KvStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.store.get(key)
    }

    /// Returns `false` when this `(client_id, seq)` was applied before; the
    /// store is left untouched in that case.
    pub fn apply(&mut self, args: &PutAppendArgs) -> bool {
        if !self
            .applied
            .entry(args.client_id)
            .or_default()
            .insert(args.seq)
        {
            info!(target: "kv_state_machine",
                "skipping duplicate {:?} from client {} seq {}", args.op, args.client_id, args.seq);
            return false;
        }

        match args.op {
            Op::Put => {
                self.store.insert(args.key.clone(), args.value.clone());
            }
            Op::Append => {
                self.store
                    .entry(args.key.clone())
                    .or_default()
                    .push_str(&args.value);
            }
        }

        self.applied_count += 1;
        true
    }

    /// Number of mutations that changed the store.
    pub fn applied_count(&self) -> usize {
        self.applied_count
    }
}
