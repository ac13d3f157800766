use serde::{Deserialize, Serialize};

/// Tags every request a clerk emits; drawn once per session.
pub type ClientId = u64;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Put,
    Append,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    NoKey,
    WrongLeader,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct GetArgs {
    pub key: String,
    pub client_id: ClientId,
    pub seq: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct GetReply {
    pub status: Status,
    pub value: Option<String>,
}

impl GetReply {
    pub fn ok(value: String) -> Self {
        Self { status: Status::Ok, value: Some(value) }
    }

    pub fn no_key() -> Self {
        Self { status: Status::NoKey, value: None }
    }

    pub fn wrong_leader() -> Self {
        Self { status: Status::WrongLeader, value: None }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PutAppendArgs {
    pub key: String,
    pub value: String,
    pub op: Op,
    pub client_id: ClientId,
    pub seq: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PutAppendReply {
    pub status: Status,
}

// wire envelopes, one per line:
// "Get((key:\"x\",client_id:7,seq:1))"
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Request {
    Get(GetArgs),
    PutAppend(PutAppendArgs),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Response {
    Get(GetReply),
    PutAppend(PutAppendReply),
}
