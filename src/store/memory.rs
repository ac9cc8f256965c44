use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use super::{LeaseToken, SessionStore};
use crate::error::StoreError;
use crate::protocol::{GameRequest, MemberId};

#[derive(Debug)]
struct Lease {
    token: LeaseToken,
    expiry: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    leases: HashMap<String, Lease>,
    queues: HashMap<String, VecDeque<GameRequest>>,
    members: HashMap<String, Vec<MemberId>>,
}

/// Single-process store. Leases expire on the tokio clock, so paused-time
/// tests see expiry deterministically.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_leased(&self, session_id: &str) -> bool {
        let inner = self.inner.lock();
        inner
            .leases
            .get(session_id)
            .map_or(false, |lease| lease.expiry > Instant::now())
    }

    pub fn queue_len(&self, session_id: &str) -> usize {
        let inner = self.inner.lock();
        inner.queues.get(session_id).map_or(0, VecDeque::len)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn acquire_lease(
        &self,
        session_id: &str,
        ttl: Duration,
    ) -> Result<Option<LeaseToken>, StoreError> {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        match inner.leases.get(session_id) {
            Some(lease) if lease.expiry > now => Ok(None),
            _ => {
                let token = Uuid::new_v4().to_string();
                inner.leases.insert(
                    session_id.to_string(),
                    Lease {
                        token: token.clone(),
                        expiry: now + ttl,
                    },
                );
                Ok(Some(token))
            }
        }
    }

    async fn release_lease(&self, session_id: &str, token: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        let owned = inner
            .leases
            .get(session_id)
            .map_or(false, |lease| lease.token == token);
        if owned {
            inner.leases.remove(session_id);
        }
        Ok(owned)
    }

    async fn enqueue(&self, session_id: &str, request: &GameRequest) -> Result<(), StoreError> {
        self.inner
            .lock()
            .queues
            .entry(session_id.to_string())
            .or_default()
            .push_back(request.clone());
        Ok(())
    }

    async fn drain_queue(&self, session_id: &str) -> Result<Vec<GameRequest>, StoreError> {
        let mut inner = self.inner.lock();
        Ok(inner
            .queues
            .get_mut(session_id)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default())
    }

    async fn clear_queue(&self, session_id: &str) -> Result<(), StoreError> {
        self.inner.lock().queues.remove(session_id);
        Ok(())
    }

    async fn register_members(
        &self,
        session_id: &str,
        members: &[MemberId],
    ) -> Result<(), StoreError> {
        self.inner
            .lock()
            .members
            .insert(session_id.to_string(), members.to_vec());
        Ok(())
    }

    async fn load_members(&self, session_id: &str) -> Result<Option<Vec<MemberId>>, StoreError> {
        Ok(self.inner.lock().members.get(session_id).cloned())
    }

    async fn retire_session(&self, session_id: &str) -> Result<(), StoreError> {
        self.inner.lock().members.remove(session_id);
        Ok(())
    }
}
