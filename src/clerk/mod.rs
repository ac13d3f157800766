pub mod logging;
pub mod message;
pub mod session;
pub mod transport;

use self::logging::{log_clerk, ClerkLogType};
use self::message::{ClientId, GetArgs, GetReply, Op, PutAppendArgs, PutAppendReply, Request, Status};
use self::session::{Session, Ticket};
use self::transport::{ServerEnd, TransportError};
use log::debug;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ClerkError {
    #[error("a clerk needs at least one server")]
    NoServers,
}

/// How the clerk paces itself while no server gives a definitive answer.
///
/// There is never an attempt cap: the clerk keeps rotating through the
/// servers until one answers. To give up, drop the future.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Sleep after every full rotation through the server list.
    pub round_backoff: Option<Duration>,
}

enum Outcome {
    Success(Option<String>),
    Absent,
    Recoverable,
}

struct Resolution {
    value: Option<String>,
    attempts: u64,
}

/// Client of a replicated key/value cluster with an unknown leader.
///
/// Every operation is tagged with `(client_id, seq)` and resent unchanged to
/// the next server until one of them answers definitively, so servers can
/// deduplicate retried mutations. Operations only return on a definitive
/// answer; they never fail.
pub struct Clerk<E> {
    servers: Vec<E>,
    session: Session,
    policy: RetryPolicy,
}

impl<E: ServerEnd> Clerk<E> {
    pub fn new(servers: Vec<E>) -> Result<Self, ClerkError> {
        Self::with_policy(servers, RetryPolicy::default())
    }

    pub fn with_policy(servers: Vec<E>, policy: RetryPolicy) -> Result<Self, ClerkError> {
        Self::with_session(servers, Session::new(), policy)
    }

    pub fn with_session(
        servers: Vec<E>,
        session: Session,
        policy: RetryPolicy,
    ) -> Result<Self, ClerkError> {
        if servers.is_empty() {
            return Err(ClerkError::NoServers);
        }

        log_clerk(
            session.client_id(),
            ClerkLogType::SessionStart {
                servers: servers.len(),
            },
        );

        Ok(Self {
            servers,
            session,
            policy,
        })
    }

    pub fn client_id(&self) -> ClientId {
        self.session.client_id()
    }

    pub fn leader_hint(&self) -> usize {
        self.session.leader_hint()
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    /// Fetches the current value of `key`, `None` if the cluster has no
    /// such key.
    pub async fn get(&self, key: impl Into<String>) -> Option<String> {
        let key = key.into();
        let ticket = self.session.begin();
        let client_id = self.client_id();

        log_clerk(
            client_id,
            ClerkLogType::GetStart {
                key: key.clone(),
                seq: ticket.seq,
            },
        );

        let request = Request::Get(GetArgs {
            key: key.clone(),
            client_id,
            seq: ticket.seq,
        });
        let resolution = self.dispatch(ticket, &request).await;

        log_clerk(
            client_id,
            ClerkLogType::GetDone {
                key,
                seq: ticket.seq,
                found: resolution.value.is_some(),
                attempts: resolution.attempts,
            },
        );

        resolution.value
    }

    /// Replaces the value of `key`.
    pub async fn put(&self, key: impl Into<String>, value: impl Into<String>) {
        self.put_append(key.into(), value.into(), Op::Put).await
    }

    /// Appends to the value of `key`, creating it if absent.
    pub async fn append(&self, key: impl Into<String>, value: impl Into<String>) {
        self.put_append(key.into(), value.into(), Op::Append).await
    }

    async fn put_append(&self, key: String, value: String, op: Op) {
        let ticket = self.session.begin();
        let client_id = self.client_id();

        log_clerk(
            client_id,
            ClerkLogType::PutAppendStart {
                op,
                key: key.clone(),
                seq: ticket.seq,
            },
        );

        let request = Request::PutAppend(PutAppendArgs {
            key: key.clone(),
            value,
            op,
            client_id,
            seq: ticket.seq,
        });
        let resolution = self.dispatch(ticket, &request).await;

        log_clerk(
            client_id,
            ClerkLogType::PutAppendDone {
                op,
                key,
                seq: ticket.seq,
                attempts: resolution.attempts,
            },
        );
    }

    // round-robin from the leader hint until a definitive answer
    async fn dispatch(&self, ticket: Ticket, request: &Request) -> Resolution {
        let count = self.servers.len();
        let mut candidate = ticket.first_candidate % count;
        let mut attempts = 0u64;

        loop {
            attempts += 1;

            match self.attempt(&self.servers[candidate], request).await {
                Outcome::Success(value) => {
                    self.settle(candidate);
                    return Resolution { value, attempts };
                }
                Outcome::Absent => {
                    self.settle(candidate);
                    return Resolution {
                        value: None,
                        attempts,
                    };
                }
                Outcome::Recoverable => {
                    candidate = (candidate + 1) % count;
                }
            }

            if attempts % count as u64 == 0 {
                if let Some(backoff) = self.policy.round_backoff {
                    log_clerk(
                        self.client_id(),
                        ClerkLogType::RoundExhausted {
                            seq: ticket.seq,
                            rounds: attempts / count as u64,
                        },
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn attempt(&self, server: &E, request: &Request) -> Outcome {
        match request {
            Request::Get(args) => classify_get(server.get(args.clone()).await, args.seq),
            Request::PutAppend(args) => {
                classify_put_append(server.put_append(args.clone()).await, args.seq)
            }
        }
    }

    fn settle(&self, index: usize) {
        let previous = self.session.record_leader(index);
        if previous != index {
            log_clerk(
                self.client_id(),
                ClerkLogType::LeaderChange {
                    from: previous,
                    to: index,
                },
            );
        }
    }
}

fn classify_get(reply: Result<GetReply, TransportError>, seq: u64) -> Outcome {
    match reply {
        Ok(GetReply {
            status: Status::Ok,
            value,
        }) => Outcome::Success(Some(value.unwrap_or_default())),
        Ok(GetReply {
            status: Status::NoKey,
            ..
        }) => Outcome::Absent,
        Ok(GetReply {
            status: Status::WrongLeader,
            ..
        }) => {
            debug!(target: "clerk", "get seq {} reached a non-leader", seq);
            Outcome::Recoverable
        }
        Err(e) => {
            debug!(target: "clerk", "get seq {} transport failure: {}", seq, e);
            Outcome::Recoverable
        }
    }
}

fn classify_put_append(reply: Result<PutAppendReply, TransportError>, seq: u64) -> Outcome {
    match reply {
        Ok(PutAppendReply { status: Status::Ok }) => Outcome::Success(None),
        Ok(PutAppendReply { status }) => {
            debug!(target: "clerk", "put_append seq {} answered {:?}", seq, status);
            Outcome::Recoverable
        }
        Err(e) => {
            debug!(target: "clerk", "put_append seq {} transport failure: {}", seq, e);
            Outcome::Recoverable
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    type Verdict = dyn Fn(usize, usize) -> Option<Status> + Send + Sync;

    // (server, call number) -> status, `None` drops the rpc
    #[derive(Clone)]
    struct Script {
        calls: Arc<Mutex<Vec<(usize, u64)>>>,
        verdict: Arc<Verdict>,
    }

    impl Script {
        fn new(verdict: impl Fn(usize, usize) -> Option<Status> + Send + Sync + 'static) -> Self {
            Self {
                calls: Arc::new(Mutex::new(vec![])),
                verdict: Arc::new(verdict),
            }
        }

        fn ends(&self, count: usize) -> Vec<MockEnd> {
            (0..count)
                .map(|index| MockEnd {
                    index,
                    script: self.clone(),
                })
                .collect()
        }

        fn calls(&self) -> Vec<(usize, u64)> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, index: usize, seq: u64) -> Option<Status> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                calls.push((index, seq));
                calls.len()
            };
            (self.verdict)(index, call)
        }
    }

    struct MockEnd {
        index: usize,
        script: Script,
    }

    impl ServerEnd for MockEnd {
        async fn get(&self, args: GetArgs) -> Result<GetReply, TransportError> {
            match self.script.record(self.index, args.seq) {
                Some(Status::Ok) => Ok(GetReply::ok(format!("from-{}", self.index))),
                Some(Status::NoKey) => Ok(GetReply::no_key()),
                Some(Status::WrongLeader) => Ok(GetReply::wrong_leader()),
                None => Err(TransportError::Disconnected),
            }
        }

        async fn put_append(&self, args: PutAppendArgs) -> Result<PutAppendReply, TransportError> {
            match self.script.record(self.index, args.seq) {
                Some(status) => Ok(PutAppendReply { status }),
                None => Err(TransportError::Disconnected),
            }
        }
    }

    fn leader_only(leader: usize) -> Script {
        Script::new(move |server, _| {
            if server == leader {
                Some(Status::Ok)
            } else {
                Some(Status::WrongLeader)
            }
        })
    }

    #[test]
    fn empty_server_list_is_rejected() {
        match Clerk::<MockEnd>::new(vec![]) {
            Err(ClerkError::NoServers) => {}
            _ => panic!("Expected NoServers"),
        }
    }

    #[tokio::test]
    async fn retries_reuse_the_same_sequence() {
        let script = leader_only(3);
        let clerk = Clerk::new(script.ends(4)).unwrap();

        clerk.put("k", "v").await;

        assert_eq!(script.calls(), vec![(0, 1), (1, 1), (2, 1), (3, 1)]);
        assert_eq!(clerk.leader_hint(), 3);
    }

    #[tokio::test]
    async fn each_operation_takes_a_fresh_sequence() {
        let script = leader_only(0);
        let clerk = Clerk::new(script.ends(3)).unwrap();

        clerk.put("a", "1").await;
        clerk.append("a", "2").await;
        assert_eq!(clerk.get("a").await, Some("from-0".to_string()));

        let seqs: Vec<u64> = script.calls().iter().map(|(_, seq)| *seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn failover_reaches_leader_within_server_count_attempts() {
        let count = 5;

        for leader in 0..count {
            for start in 0..count {
                let script = leader_only(leader);
                let session = Session::with_client_id(9);
                session.record_leader(start);
                let clerk =
                    Clerk::with_session(script.ends(count), session, RetryPolicy::default()).unwrap();

                clerk.put("k", "v").await;

                let calls = script.calls();
                assert!(calls.len() <= count);
                assert_eq!(calls.first().map(|c| c.0), Some(start));
                assert_eq!(calls.last().map(|c| c.0), Some(leader));
                assert_eq!(clerk.leader_hint(), leader);
            }
        }
    }

    #[tokio::test]
    async fn transport_failures_are_skipped() {
        let script = Script::new(|server, _| match server {
            0 => None,
            1 => Some(Status::WrongLeader),
            _ => Some(Status::NoKey),
        });
        let clerk = Clerk::new(script.ends(3)).unwrap();

        assert_eq!(clerk.get("missing").await, None);
        assert_eq!(clerk.leader_hint(), 2);
    }

    #[tokio::test]
    async fn no_key_on_put_append_is_not_definitive() {
        let script = Script::new(|server, _| match server {
            0 => Some(Status::NoKey),
            _ => Some(Status::Ok),
        });
        let clerk = Clerk::new(script.ends(2)).unwrap();

        clerk.append("k", "v").await;

        assert_eq!(script.calls().len(), 2);
        assert_eq!(clerk.leader_hint(), 1);
    }

    #[tokio::test]
    async fn keeps_rotating_until_a_server_answers() {
        // nobody answers for the first ten calls
        let script = Script::new(|server, call| {
            if call > 10 && server == 1 {
                Some(Status::Ok)
            } else {
                None
            }
        });
        let clerk = Clerk::new(script.ends(3)).unwrap();

        assert_eq!(clerk.get("k").await, Some("from-1".to_string()));

        let calls = script.calls();
        assert!(calls.len() > 10);
        assert!(calls.iter().all(|(_, seq)| *seq == 1));
    }

    #[tokio::test]
    async fn round_backoff_sleeps_between_rotations() {
        let script = Script::new(|server, call| {
            if call > 3 && server == 0 {
                Some(Status::Ok)
            } else {
                Some(Status::WrongLeader)
            }
        });
        let policy = RetryPolicy {
            round_backoff: Some(Duration::from_millis(30)),
        };
        let clerk = Clerk::with_policy(script.ends(3), policy).unwrap();

        let started = Instant::now();
        clerk.put("k", "v").await;

        assert_eq!(script.calls().len(), 4);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }
}
