pub mod memory;
pub mod redis_store;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::protocol::{GameRequest, MemberId};

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

/// Proof of lease ownership, handed out by `acquire_lease`. Only the holder
/// of the matching token can release the lease.
pub type LeaseToken = String;

/// Lease and durable request queue shared by every process that may try to
/// run a session. Also holds the member list the lobby registered.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Atomic set-if-absent with expiry. `Some(token)` means this caller owns
    /// the session until `release_lease` or expiry.
    async fn acquire_lease(
        &self,
        session_id: &str,
        ttl: Duration,
    ) -> Result<Option<LeaseToken>, StoreError>;

    /// Compare-and-delete: releases only if the lease still carries `token`.
    /// Returns `false` when it expired and someone else now holds it.
    async fn release_lease(&self, session_id: &str, token: &str) -> Result<bool, StoreError>;

    async fn enqueue(&self, session_id: &str, request: &GameRequest) -> Result<(), StoreError>;

    /// Reads every item queued right now and trims exactly those. Items
    /// pushed concurrently are left for the next drain.
    async fn drain_queue(&self, session_id: &str) -> Result<Vec<GameRequest>, StoreError>;

    async fn clear_queue(&self, session_id: &str) -> Result<(), StoreError>;

    async fn register_members(
        &self,
        session_id: &str,
        members: &[MemberId],
    ) -> Result<(), StoreError>;

    /// `None` for sessions never registered or already retired.
    async fn load_members(&self, session_id: &str) -> Result<Option<Vec<MemberId>>, StoreError>;

    /// Forget a finished session's members so it can no longer be joined or
    /// started again.
    async fn retire_session(&self, session_id: &str) -> Result<(), StoreError>;
}
