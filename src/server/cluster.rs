use super::KvServer;
use crate::clerk::message::{GetArgs, GetReply, PutAppendArgs, PutAppendReply};
use crate::clerk::transport::{ServerEnd, TransportError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Server indexes in the order they were contacted.
pub type AttemptLog = Arc<Mutex<Vec<usize>>>;

/// In-process handle to a `KvServer`.
///
/// A disconnected end fails every call before it reaches the server. An
/// end with lost replies lets the server process the call and then drops
/// the answer.
#[derive(Clone)]
pub struct LocalEnd {
    index: usize,
    server: Arc<KvServer>,
    connected: Arc<AtomicBool>,
    lost_replies: Arc<AtomicUsize>,
    attempts: AttemptLog,
}

impl LocalEnd {
    fn send(&self) -> Result<(), TransportError> {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(self.index);

        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::Disconnected)
        }
    }

    fn receive<T>(&self, reply: T) -> Result<T, TransportError> {
        let lost = self
            .lost_replies
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));

        match lost {
            Ok(_) => Err(TransportError::Disconnected),
            Err(_) => Ok(reply),
        }
    }
}

impl ServerEnd for LocalEnd {
    async fn get(&self, args: GetArgs) -> Result<GetReply, TransportError> {
        tokio::task::yield_now().await;
        self.send()?;
        self.receive(self.server.get(&args))
    }

    async fn put_append(&self, args: PutAppendArgs) -> Result<PutAppendReply, TransportError> {
        tokio::task::yield_now().await;
        self.send()?;
        self.receive(self.server.put_append(&args))
    }
}

/// A set of in-process servers with exactly one leader and controllable
/// connectivity.
pub struct Cluster {
    servers: Vec<Arc<KvServer>>,
    connected: Vec<Arc<AtomicBool>>,
    lost_replies: Vec<Arc<AtomicUsize>>,
    attempts: AttemptLog,
}

impl Cluster {
    pub fn new(size: usize, leader: usize) -> Self {
        Self {
            servers: (0..size)
                .map(|id| Arc::new(KvServer::new(id, id == leader)))
                .collect(),
            connected: (0..size).map(|_| Arc::new(AtomicBool::new(true))).collect(),
            lost_replies: (0..size).map(|_| Arc::new(AtomicUsize::new(0))).collect(),
            attempts: Arc::new(Mutex::new(vec![])),
        }
    }

    pub fn size(&self) -> usize {
        self.servers.len()
    }

    pub fn ends(&self) -> Vec<LocalEnd> {
        (0..self.size())
            .map(|index| LocalEnd {
                index,
                server: Arc::clone(&self.servers[index]),
                connected: Arc::clone(&self.connected[index]),
                lost_replies: Arc::clone(&self.lost_replies[index]),
                attempts: Arc::clone(&self.attempts),
            })
            .collect()
    }

    pub fn server(&self, index: usize) -> &Arc<KvServer> {
        &self.servers[index]
    }

    pub fn set_leader(&self, leader: usize) {
        for (id, server) in self.servers.iter().enumerate() {
            server.set_leader(id == leader);
        }
    }

    pub fn disconnect(&self, index: usize) {
        self.connected[index].store(false, Ordering::SeqCst);
    }

    pub fn connect(&self, index: usize) {
        self.connected[index].store(true, Ordering::SeqCst);
    }

    /// Drops the next `count` replies of server `index` after it has
    /// processed the request.
    pub fn lose_replies(&self, index: usize, count: usize) {
        self.lost_replies[index].store(count, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> Vec<usize> {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear_attempts(&self) {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Mutations applied across all servers.
    pub fn applied_count(&self) -> usize {
        self.servers.iter().map(|s| s.applied_count()).sum()
    }
}
