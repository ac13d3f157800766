pub mod cluster;
pub mod state_machine;

use crate::clerk::message::{GetArgs, GetReply, PutAppendArgs, PutAppendReply, Request, Response, Status};
use crate::clerk::transport::TransportError;
use log::{info, warn};
use state_machine::KvStateMachine;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_stream::wrappers::TcpListenerStream;
use tokio_stream::StreamExt as _;

// a single replica standing in for a consensus group member: it answers
// WrongLeader unless told it leads, and applies commands directly
pub struct KvServer {
    id: usize,
    leader: AtomicBool,
    state: Mutex<KvStateMachine>,
}

impl KvServer {
    pub fn new(id: usize, leader: bool) -> Self {
        info!(target: "kv_server", "kv server {} starting, leader: {}", id, leader);
        Self {
            id,
            leader: AtomicBool::new(leader),
            state: Mutex::new(KvStateMachine::new()),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }

    pub fn set_leader(&self, leader: bool) {
        if self.leader.swap(leader, Ordering::SeqCst) != leader {
            info!(target: "kv_server", "kv server {} leader: {}", self.id, leader);
        }
    }

    pub fn get(&self, args: &GetArgs) -> GetReply {
        if !self.is_leader() {
            return GetReply::wrong_leader();
        }

        match self.state().get(&args.key) {
            Some(value) => GetReply::ok(value.clone()),
            None => GetReply::no_key(),
        }
    }

    pub fn put_append(&self, args: &PutAppendArgs) -> PutAppendReply {
        if !self.is_leader() {
            return PutAppendReply {
                status: Status::WrongLeader,
            };
        }

        // duplicates still succeed, the first application already happened
        self.state().apply(args);
        PutAppendReply { status: Status::Ok }
    }

    pub fn handle(&self, request: Request) -> Response {
        match request {
            Request::Get(args) => Response::Get(self.get(&args)),
            Request::PutAppend(args) => Response::PutAppend(self.put_append(&args)),
        }
    }

    /// Number of mutations that changed the store.
    pub fn applied_count(&self) -> usize {
        self.state().applied_count()
    }

    /// Reads the store directly, bypassing leadership.
    pub fn value(&self, key: &str) -> Option<String> {
        self.state().get(key).cloned()
    }

    fn state(&self) -> MutexGuard<'_, KvStateMachine> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Answers one RON request line per connection until the listener fails.
pub async fn serve(server: Arc<KvServer>, listener: TcpListener) -> Result<(), std::io::Error> {
    info!(target: "kv_server", "kv server {} listening on {}", server.id(), listener.local_addr()?);
    let mut listener = TcpListenerStream::new(listener);

    while let Some(socket) = listener.try_next().await? {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(&server, socket).await {
                warn!(target: "kv_server", "kv server {} dropped a connection: {}", server.id(), e);
            }
        });
    }

    Ok(())
}

async fn handle_connection(server: &KvServer, socket: TcpStream) -> Result<(), TransportError> {
    let (reader, mut writer) = socket.into_split();

    let mut line = String::new();
    if BufReader::new(reader).read_line(&mut line).await? == 0 {
        return Err(TransportError::Closed);
    }

    let request: Request = ron::from_str(line.trim_end())?;
    let mut reply = ron::to_string(&server.handle(request))?;
    reply.push('\n');

    writer.write_all(reply.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clerk::message::Op;

    fn put(key: &str, value: &str, seq: u64) -> PutAppendArgs {
        PutAppendArgs {
            key: key.into(),
            value: value.into(),
            op: Op::Put,
            client_id: 1,
            seq,
        }
    }

    fn get(key: &str) -> GetArgs {
        GetArgs {
            key: key.into(),
            client_id: 1,
            seq: 99,
        }
    }

    #[test]
    fn follower_refuses_everything() {
        let server = KvServer::new(0, false);

        assert_eq!(server.get(&get("k")).status, Status::WrongLeader);
        assert_eq!(server.put_append(&put("k", "v", 1)).status, Status::WrongLeader);
        assert_eq!(server.applied_count(), 0);
    }

    #[test]
    fn leader_answers_ok_and_no_key() {
        let server = KvServer::new(0, true);

        assert_eq!(server.get(&get("k")), GetReply::no_key());
        assert_eq!(server.put_append(&put("k", "v", 1)).status, Status::Ok);
        assert_eq!(server.get(&get("k")), GetReply::ok("v".into()));
    }

    #[test]
    fn duplicate_put_succeeds_without_reapplying() {
        let server = KvServer::new(0, true);

        assert_eq!(server.put_append(&put("k", "v", 1)).status, Status::Ok);
        assert_eq!(server.put_append(&put("k", "v", 1)).status, Status::Ok);
        assert_eq!(server.applied_count(), 1);
    }

    #[test]
    fn leadership_can_move() {
        let server = KvServer::new(3, true);
        server.set_leader(false);

        assert!(!server.is_leader());
        assert_eq!(server.get(&get("k")).status, Status::WrongLeader);
    }

    #[tokio::test]
    async fn malformed_request_drops_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(Arc::new(KvServer::new(0, true)), listener));

        let mut socket = TcpStream::connect(addr).await.unwrap();
        socket.write_all(b"not ron at all\n").await.unwrap();

        let mut reply = String::new();
        let read = BufReader::new(socket).read_line(&mut reply).await.unwrap();
        assert_eq!(read, 0);
    }
}
