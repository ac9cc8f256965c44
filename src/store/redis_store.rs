use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::{info, warn};
use uuid::Uuid;

use super::{LeaseToken, SessionStore};
use crate::error::StoreError;
use crate::protocol::{GameRequest, MemberId};

const RELEASE_SCRIPT: &str = r#"
    if redis.call("GET", KEYS[1]) == ARGV[1] then
        return redis.call("DEL", KEYS[1])
    else
        return 0
    end
"#;

/// Redis-backed store shared by every server process.
///
/// * lease: `SET {prefix}/lock/{id} <uuid> NX PX ttl`, released by a script
///   that deletes the key only while it still holds the caller's uuid
/// * queue: `RPUSH` / `LRANGE 0 -1` + `LTRIM n -1` on `{prefix}/q/{id}`
/// * members: JSON list under `{prefix}/members/{id}`
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    prefix: String,
    /// Expiry refreshed on every enqueue, so items pushed after a session
    /// finished do not linger.
    queue_ttl: Option<Duration>,
}

impl RedisStore {
    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("Connected to redis at {}", url);
        Ok(Self {
            conn,
            prefix: prefix.into(),
            queue_ttl: None,
        })
    }

    pub fn with_queue_ttl(mut self, ttl: Duration) -> Self {
        self.queue_ttl = Some(ttl);
        self
    }

    fn lock_key(&self, session_id: &str) -> String {
        format!("{}/lock/{}", self.prefix, session_id)
    }

    fn queue_key(&self, session_id: &str) -> String {
        format!("{}/q/{}", self.prefix, session_id)
    }

    fn members_key(&self, session_id: &str) -> String {
        format!("{}/members/{}", self.prefix, session_id)
    }
}

#[async_trait]
impl SessionStore for RedisStore {
    async fn acquire_lease(
        &self,
        session_id: &str,
        ttl: Duration,
    ) -> Result<Option<LeaseToken>, StoreError> {
        let token = Uuid::new_v4().to_string();
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.lock_key(session_id))
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(reply.map(|_| token))
    }

    async fn release_lease(&self, session_id: &str, token: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let deleted: i32 = Script::new(RELEASE_SCRIPT)
            .key(self.lock_key(session_id))
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }

    async fn enqueue(&self, session_id: &str, request: &GameRequest) -> Result<(), StoreError> {
        let payload = serde_json::to_string(request)?;
        let key = self.queue_key(session_id);
        let mut conn = self.conn.clone();

        let mut pipe = redis::pipe();
        pipe.cmd("RPUSH").arg(&key).arg(payload).ignore();
        if let Some(ttl) = self.queue_ttl {
            pipe.cmd("PEXPIRE")
                .arg(&key)
                .arg(ttl.as_millis() as u64)
                .ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn drain_queue(&self, session_id: &str) -> Result<Vec<GameRequest>, StoreError> {
        let key = self.queue_key(session_id);
        let mut conn = self.conn.clone();

        let raw: Vec<String> = redis::cmd("LRANGE")
            .arg(&key)
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await?;
        if raw.is_empty() {
            return Ok(Vec::new());
        }

        // Only drop what was read; anything pushed meanwhile stays queued.
        redis::cmd("LTRIM")
            .arg(&key)
            .arg(raw.len())
            .arg(-1)
            .query_async::<_, ()>(&mut conn)
            .await?;

        let requests = raw
            .iter()
            .filter_map(|item| match serde_json::from_str::<GameRequest>(item) {
                Ok(request) => Some(request),
                Err(e) => {
                    warn!(session_id, "Dropping malformed queue item {}: {}", item, e);
                    None
                }
            })
            .collect();
        Ok(requests)
    }

    async fn clear_queue(&self, session_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(self.queue_key(session_id))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn register_members(
        &self,
        session_id: &str,
        members: &[MemberId],
    ) -> Result<(), StoreError> {
        let payload = serde_json::to_string(members)?;
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(self.members_key(session_id))
            .arg(payload)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn load_members(&self, session_id: &str) -> Result<Option<Vec<MemberId>>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.members_key(session_id))
            .query_async(&mut conn)
            .await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn retire_session(&self, session_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(self.members_key(session_id))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }
}
