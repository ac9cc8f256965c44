use std::sync::Arc;

use tracing::{error, info, warn};

use super::Session;
use crate::config::GameConfig;
use crate::error::SessionError;
use crate::network::gateway::ConnectionGateway;
use crate::protocol::{MemberId, ScoreEntry};
use crate::store::SessionStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Another execution holds the lease; nothing was done.
    Superseded,
    Finished { score: Vec<ScoreEntry> },
}

/// Run a session to completion if no other execution owns it.
///
/// Safe to call on every connect: all but the first caller see a held lease
/// and return [`SessionOutcome::Superseded`] straight away. The lease lasts a
/// little longer than the whole session so the owner never loses it midway.
/// Once the session ends it is retired in the store and cannot be joined or
/// started again.
pub async fn run_session(
    session_id: &str,
    members: &[MemberId],
    store: Arc<dyn SessionStore>,
    gateway: Arc<dyn ConnectionGateway>,
    config: Arc<GameConfig>,
) -> Result<SessionOutcome, SessionError> {
    let ttl = config.lease_ttl();
    let Some(token) = store.acquire_lease(session_id, ttl).await? else {
        info!(session_id, "Session already running elsewhere");
        return Ok(SessionOutcome::Superseded);
    };
    if config.exceeds_host_ceiling() {
        warn!(
            session_id,
            ttl_seconds = ttl.as_secs(),
            ceiling_seconds = ?config.host_execution_ceiling_seconds,
            "Session may outlive its host"
        );
    }
    info!(session_id, ttl_seconds = ttl.as_secs(), "Lease acquired");

    let outcome = match Session::new(session_id, members, config, gateway) {
        Ok(mut session) => {
            let score = session.run(store.as_ref()).await;
            Ok(SessionOutcome::Finished { score })
        }
        Err(e) => Err(e),
    };

    // Retire before freeing the lease so a late connect cannot restart the
    // game, and clear the queue so nothing lingers.
    if let Err(e) = store.retire_session(session_id).await {
        error!(session_id, "Cannot retire session: {}", e);
    }
    if let Err(e) = store.clear_queue(session_id).await {
        error!(session_id, "Cannot clear request queue: {}", e);
    }
    match store.release_lease(session_id, &token).await {
        Ok(true) => {}
        Ok(false) => warn!(session_id, "Lease expired before release; left to its new owner"),
        Err(e) => error!(session_id, "Cannot release lease: {}", e),
    }
    info!(session_id, "Session closed");
    outcome
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::Instant;

    use super::*;
    use crate::config::LeavePolicy;
    use crate::network::gateway::testing::RecordingGateway;
    use crate::protocol::{GameRequest, Pos, RequestBody, ServerMessage, Stage};
    use crate::store::MemoryStore;

    fn config() -> GameConfig {
        GameConfig {
            board_height: 5,
            board_width: 5,
            wait_seconds: 2,
            running_seconds: 5,
            elimination_min_age_seconds: 1,
            initial_energy: 100.0,
            ..GameConfig::default()
        }
    }

    fn members(ids: &[&str]) -> Vec<MemberId> {
        ids.iter().map(|m| m.to_string()).collect()
    }

    fn enter(connection_id: &str, member_id: &str) -> GameRequest {
        GameRequest::new(
            connection_id,
            RequestBody::Enter {
                member_id: member_id.to_string(),
            },
        )
    }

    struct Harness {
        store: Arc<MemoryStore>,
        gateway: Arc<RecordingGateway>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                store: Arc::new(MemoryStore::new()),
                gateway: Arc::new(RecordingGateway::default()),
            }
        }

        async fn push(&self, request: GameRequest) {
            self.store.enqueue("s1", &request).await.unwrap();
        }

        async fn run(&self, members: &[MemberId], config: GameConfig) -> SessionOutcome {
            run_session(
                "s1",
                members,
                self.store.clone(),
                self.gateway.clone(),
                Arc::new(config),
            )
            .await
            .unwrap()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn held_lease_means_superseded() {
        let h = Harness::new();
        h.store
            .acquire_lease("s1", Duration::from_secs(60))
            .await
            .unwrap();

        let outcome = h.run(&members(&["a"]), config()).await;
        assert_eq!(outcome, SessionOutcome::Superseded);
        assert!(h.gateway.pushed.lock().is_empty());
        // The other owner's lease is untouched.
        assert!(h.store.is_leased("s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn nobody_connects_ends_after_wait() {
        let h = Harness::new();
        let started = Instant::now();

        let outcome = h.run(&members(&["a", "b"]), config()).await;

        assert_eq!(outcome, SessionOutcome::Finished { score: Vec::new() });
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_secs(3));
        assert!(!h.store.is_leased("s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn finished_session_is_retired() {
        let h = Harness::new();
        h.store.register_members("s1", &members(&["a"])).await.unwrap();

        let outcome = h.run(&members(&["a"]), config()).await;

        assert!(matches!(outcome, SessionOutcome::Finished { .. }));
        assert!(h.store.load_members("s1").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lease_is_left_to_its_new_owner() {
        let h = Harness::new();
        // ceil(0.1 * 7s) = 1s: the lease lapses while Wait is still running.
        let config = GameConfig {
            lease_ttl_factor: 0.1,
            ..config()
        };

        let store = h.store.clone();
        let successor = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1_500)).await;
            store.acquire_lease("s1", Duration::from_secs(60)).await.unwrap()
        });

        let outcome = h.run(&members(&["a"]), config).await;
        assert!(matches!(outcome, SessionOutcome::Finished { .. }));
        assert!(successor.await.unwrap().is_some());
        assert!(h.store.is_leased("s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn too_many_members_is_an_error_and_frees_the_lease() {
        let h = Harness::new();
        let too_many: Vec<MemberId> = (0..7).map(|i| format!("m{}", i)).collect();
        let result = run_session(
            "s1",
            &too_many,
            h.store.clone(),
            h.gateway.clone(),
            Arc::new(GameConfig::default()),
        )
        .await;
        assert!(matches!(result, Err(SessionError::TooManyPlayers { .. })));
        assert!(!h.store.is_leased("s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn full_game_runs_to_end() {
        let h = Harness::new();
        h.push(enter("c1", "a")).await;
        h.push(enter("c2", "b")).await;
        h.push(GameRequest::new("c1", RequestBody::Load)).await;

        let store = h.store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1_500)).await;
            let request = GameRequest::new("c1", RequestBody::New(Pos::new(1, 0)));
            store.enqueue("s1", &request).await.unwrap();
        });

        let started = Instant::now();
        let outcome = h.run(&members(&["a", "b"]), config()).await;

        // Everyone connected in Wait, so the full Running stage played out.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(5));
        assert!(elapsed < Duration::from_secs(6));

        let SessionOutcome::Finished { score } = outcome else {
            panic!("session was superseded");
        };
        assert_eq!(score.len(), 2);
        assert_eq!((score[0].owner, score[0].tiles), (1, 2));
        assert_eq!((score[1].owner, score[1].tiles), (2, 1));

        let to_c1 = h.gateway.messages_for("c1");
        // 100 initial, about 1.5s of base productivity, minus 15 for the tile.
        assert!(to_c1
            .iter()
            .any(|m| matches!(m, ServerMessage::Energy { energy } if (85..=87).contains(energy))));
        assert!(matches!(to_c1.last(), Some(ServerMessage::End { .. })));

        let to_c2 = h.gateway.messages_for("c2");
        assert!(to_c2.iter().any(|m| matches!(
            m,
            ServerMessage::Changed { tiles }
                if tiles.iter().any(|t| (t.x, t.y, t.owner) == (1, 0, Some(1)))
        )));
        assert!(to_c2
            .iter()
            .any(|m| matches!(m, ServerMessage::Stage { stage: Stage::Running, .. })));

        assert!(h.gateway.was_dropped("c1"));
        assert!(h.gateway.was_dropped("c2"));
        assert!(!h.store.is_leased("s1"));
        assert_eq!(h.store.queue_len("s1"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn lone_player_is_eliminated_early() {
        let h = Harness::new();
        h.push(enter("c1", "a")).await;

        let started = Instant::now();
        let outcome = h.run(&members(&["a", "b"]), config()).await;

        // Wait runs out (b never shows), then elimination after the minimum age.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(3));
        assert!(elapsed < Duration::from_secs(4));
        let SessionOutcome::Finished { score } = outcome else {
            panic!("session was superseded");
        };
        assert_eq!(score.len(), 1);
        assert_eq!(score[0].owner, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn leaving_resets_territory_and_ends_game() {
        let h = Harness::new();
        h.push(enter("c1", "a")).await;
        h.push(enter("c2", "b")).await;

        let store = h.store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            store
                .enqueue("s1", &GameRequest::new("c2", RequestBody::Leave))
                .await
                .unwrap();
        });

        let started = Instant::now();
        let outcome = h.run(&members(&["a", "b"]), config()).await;
        assert!(started.elapsed() < Duration::from_secs(2));

        let SessionOutcome::Finished { score } = outcome else {
            panic!("session was superseded");
        };
        assert_eq!(score.len(), 1);
        assert!(h
            .gateway
            .messages_for("c1")
            .iter()
            .any(|m| matches!(m, ServerMessage::Leave { player } if player.index == 2)));
        // c2 already left; only c1 is closed at the end.
        assert!(h.gateway.was_dropped("c1"));
        assert!(!h.gateway.was_dropped("c2"));
    }

    #[tokio::test(start_paused = true)]
    async fn keeping_territory_lets_the_game_run_on() {
        let h = Harness::new();
        h.push(enter("c1", "a")).await;
        h.push(enter("c2", "b")).await;

        let store = h.store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            store
                .enqueue("s1", &GameRequest::new("c2", RequestBody::Leave))
                .await
                .unwrap();
        });

        let config = GameConfig {
            leave_policy: LeavePolicy::KeepTerritory,
            ..config()
        };
        let started = Instant::now();
        let outcome = h.run(&members(&["a", "b"]), config).await;

        // b's base stays on the board, so nobody is eliminated.
        assert!(started.elapsed() >= Duration::from_secs(5));
        let SessionOutcome::Finished { score } = outcome else {
            panic!("session was superseded");
        };
        assert_eq!(score.len(), 2);
        assert_eq!(score[1].owner, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn gameplay_in_wait_drops_the_sender() {
        let h = Harness::new();
        h.push(enter("c1", "a")).await;
        h.push(GameRequest::new("c1", RequestBody::New(Pos::new(0, 0))))
            .await;

        let outcome = h.run(&members(&["a"]), config()).await;

        assert!(h.gateway.was_dropped("c1"));
        assert_eq!(outcome, SessionOutcome::Finished { score: Vec::new() });
    }
}
