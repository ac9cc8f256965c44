pub mod actor;

use std::sync::Arc;

use futures_util::future::join_all;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{GameConfig, LeavePolicy};
use crate::error::SessionError;
use crate::game::board::Board;
use crate::game::player::Roster;
use crate::game::stage::Ticker;
use crate::network::broadcaster::DiffBroadcaster;
use crate::network::gateway::ConnectionGateway;
use crate::protocol::{
    Action, ConnectionId, GameRequest, LoadReply, MemberId, PlayerIndex, RequestBody,
    ScoreEntry, ServerMessage, Stage,
};
use crate::store::SessionStore;
use crate::systems::action::process_action;
use crate::systems::energy::energy_system;

pub use actor::{run_session, SessionOutcome};

/// One running game: the roster, the board and the stage clock.
///
/// Only the session loop touches this value, so the board needs no locking.
/// The board sits behind an `Arc` and is mutated copy-on-write, which lets
/// the broadcaster keep the last transmitted version without copying it.
pub struct Session {
    id: String,
    config: Arc<GameConfig>,
    roster: Roster,
    board: Arc<Board>,
    ticker: Ticker,
    tick: u64,
    last_tick: Instant,
    gateway: Arc<dyn ConnectionGateway>,
    broadcaster: DiffBroadcaster,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        members: &[MemberId],
        config: Arc<GameConfig>,
        gateway: Arc<dyn ConnectionGateway>,
    ) -> Result<Self, SessionError> {
        let id = id.into();
        let board = Arc::new(Board::new(config.board_height, config.board_width));

        let slots = (1..=config.max_players as PlayerIndex)
            .take_while(|index| board.base_slot(*index).is_some())
            .count();
        if members.len() > slots {
            return Err(SessionError::TooManyPlayers {
                members: members.len(),
                slots,
            });
        }

        let roster = Roster::new(members, config.initial_energy);
        let broadcaster = DiffBroadcaster::new(id.clone(), Arc::clone(&gateway), Arc::clone(&board));
        let ticker = Ticker::new(Stage::Wait, config.wait_duration());

        Ok(Self {
            id,
            config,
            roster,
            board,
            ticker,
            tick: 0,
            last_tick: Instant::now(),
            gateway,
            broadcaster,
        })
    }

    pub fn stage(&self) -> Stage {
        self.ticker.stage()
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    // ── Stage loop ──────────────────────────────────────────────────

    /// Runs Wait, Running (if anyone showed up) and End. Store failures end
    /// the game early; scoring and disconnects still happen.
    pub async fn run(&mut self, store: &dyn SessionStore) -> Vec<ScoreEntry> {
        if let Err(e) = self.run_stages(store).await {
            warn!(session_id = %self.id, "Session aborted early: {}", e);
        }
        self.finish().await
    }

    async fn run_stages(&mut self, store: &dyn SessionStore) -> Result<(), SessionError> {
        self.stage_wait(store).await?;
        if self.roster.connected_count() == 0 {
            info!(session_id = %self.id, "Nobody connected; skipping to end");
            return Ok(());
        }
        self.stage_running(store).await
    }

    async fn stage_wait(&mut self, store: &dyn SessionStore) -> Result<(), SessionError> {
        info!(session_id = %self.id, members = self.roster.players().len(), "Stage WAIT");
        self.ticker = Ticker::new(Stage::Wait, self.config.wait_duration());

        while self.ticker.is_alive() {
            self.poll(store).await?;
            if self.roster.all_connected() {
                break;
            }
            self.broadcast_stage_if_changed().await;
            tokio::time::sleep(self.config.loop_interval()).await;
        }
        Ok(())
    }

    async fn stage_running(&mut self, store: &dyn SessionStore) -> Result<(), SessionError> {
        info!(
            session_id = %self.id,
            connected = self.roster.connected_count(),
            "Stage RUNNING"
        );
        self.ticker = Ticker::new(Stage::Running, self.config.running_duration());
        self.place_bases();
        self.last_tick = Instant::now();

        while self.ticker.is_alive() {
            self.poll(store).await?;
            self.update_systems();
            self.broadcaster
                .broadcast(Arc::clone(&self.board), self.roster.connection_ids());

            let old_enough = self.ticker.elapsed() >= self.config.elimination_min_age();
            if old_enough && self.board.is_eliminated() {
                info!(session_id = %self.id, age = self.ticker.age(), "Elimination; ending early");
                break;
            }
            self.broadcast_stage_if_changed().await;
            tokio::time::sleep(self.config.loop_interval()).await;
        }
        Ok(())
    }

    /// Final broadcast and teardown. Returns the score that was sent.
    async fn finish(&mut self) -> Vec<ScoreEntry> {
        info!(session_id = %self.id, ticks = self.tick, "Stage END");
        self.ticker = Ticker::new(Stage::End, std::time::Duration::ZERO);
        self.broadcaster.wait_idle().await;

        let score = self.board.score();
        let recipients = self.roster.connection_ids();
        self.send_all(&recipients, &ServerMessage::End { score: score.clone() })
            .await;

        for connection_id in self.roster.detach_all() {
            if let Err(e) = self.gateway.drop_connection(&connection_id).await {
                warn!(session_id = %self.id, "Cannot drop connection {}: {}", connection_id, e);
            }
        }
        score
    }

    /// Drain the queue once and apply everything in it.
    async fn poll(&mut self, store: &dyn SessionStore) -> Result<(), SessionError> {
        self.tick += 1;
        let requests = store.drain_queue(&self.id).await?;
        if !requests.is_empty() {
            debug!(session_id = %self.id, tick = self.tick, "Processing {} requests", requests.len());
        }
        for request in requests {
            let connection_id = request.connection_id.clone();
            if let Err(e) = self.handle_request(request).await {
                warn!(session_id = %self.id, "Request from {} failed: {}", connection_id, e);
            }
        }
        Ok(())
    }

    fn update_systems(&mut self) {
        let now = Instant::now();
        let dt = now.duration_since(self.last_tick).as_secs_f64();
        self.last_tick = now;
        energy_system(&self.board, &mut self.roster, dt, self.config.base_energy_rate);
    }

    fn place_bases(&mut self) {
        let indices: Vec<PlayerIndex> = self.roster.connected().map(|p| p.index).collect();
        for index in indices {
            self.place_base(index);
        }
    }

    fn place_base(&mut self, index: PlayerIndex) {
        let placed = Arc::make_mut(&mut self.board).place_base(index);
        if let Some(player) = self.roster.get_mut(index) {
            player.based = true;
        }
        match placed {
            Some(pos) => debug!(session_id = %self.id, "Player {} starts at {:?}", index, pos),
            None => warn!(session_id = %self.id, "No free starting slot for player {}", index),
        }
    }

    async fn broadcast_stage_if_changed(&mut self) {
        let Some(age) = self.ticker.age_changed() else {
            return;
        };
        let stage = self.ticker.stage();
        // Energy differs per player, so each gets its own message.
        let messages: Vec<(ConnectionId, ServerMessage)> = self
            .roster
            .connected()
            .filter_map(|player| {
                let message = ServerMessage::Stage {
                    stage,
                    age,
                    energy: player.visible_energy(),
                };
                Some((player.connection_id.clone()?, message))
            })
            .collect();
        let results = join_all(
            messages
                .iter()
                .map(|(connection_id, message)| self.gateway.push(connection_id, message)),
        )
        .await;
        for ((connection_id, _), result) in messages.iter().zip(results) {
            if let Err(e) = result {
                warn!(session_id = %self.id, "Cannot send stage to {}: {}", connection_id, e);
            }
        }
    }

    // ── Requests ────────────────────────────────────────────────────

    pub async fn handle_request(&mut self, request: GameRequest) -> Result<(), SessionError> {
        let GameRequest {
            connection_id,
            body,
        } = request;
        match body {
            RequestBody::Enter { member_id } => self.on_enter(connection_id, &member_id).await,
            RequestBody::Leave => self.on_leave(&connection_id).await,
            RequestBody::Load => self.on_load(&connection_id).await,
            other => match other.action() {
                Some(action) => self.on_action(&connection_id, action).await,
                None => Ok(()),
            },
        }
    }

    async fn on_enter(&mut self, connection_id: ConnectionId, member_id: &str) -> Result<(), SessionError> {
        let Some((index, stale)) = self.roster.attach(member_id, connection_id.clone()) else {
            warn!(session_id = %self.id, "Unknown member {} on {}; dropping", member_id, connection_id);
            self.gateway.drop_connection(&connection_id).await?;
            return Ok(());
        };

        if let Some(stale) = stale.filter(|stale| *stale != connection_id) {
            info!(session_id = %self.id, "Player {} reconnected; closing {}", index, stale);
            if let Err(e) = self.gateway.drop_connection(&stale).await {
                debug!(session_id = %self.id, "Stale connection {} already gone: {}", stale, e);
            }
        }

        let Some(player) = self.roster.get(index).map(|p| p.info()) else {
            return Ok(());
        };
        info!(session_id = %self.id, "Player {} entered as {}", index, connection_id);
        let others: Vec<ConnectionId> = self
            .roster
            .connection_ids()
            .into_iter()
            .filter(|id| *id != connection_id)
            .collect();
        self.send_all(&others, &ServerMessage::Enter { player }).await;
        Ok(())
    }

    async fn on_leave(&mut self, connection_id: &str) -> Result<(), SessionError> {
        let Some(index) = self.roster.detach(connection_id) else {
            debug!(session_id = %self.id, "Leave from unknown connection {}", connection_id);
            return Ok(());
        };

        if self.config.leave_policy == LeavePolicy::ResetTerritory && self.board.owned_count(index) > 0 {
            let reset = Arc::make_mut(&mut self.board).reset_owned(index);
            info!(session_id = %self.id, "Player {} left; {} tiles back to neutral", index, reset);
        } else {
            info!(session_id = %self.id, "Player {} left", index);
        }

        if let Some(player) = self.roster.get(index).map(|p| p.info()) {
            let recipients = self.roster.connection_ids();
            self.send_all(&recipients, &ServerMessage::Leave { player }).await;
        }
        Ok(())
    }

    async fn on_load(&mut self, connection_id: &str) -> Result<(), SessionError> {
        let Some(index) = self.roster.index_of_connection(connection_id) else {
            debug!(session_id = %self.id, "Load from unknown connection {}", connection_id);
            return Ok(());
        };

        let late_joiner = self.stage() == Stage::Running
            && self.roster.get(index).map_or(false, |p| !p.based);
        if late_joiner {
            self.place_base(index);
        }

        if let Some(player) = self.roster.get_mut(index) {
            player.loaded = true;
        }
        let Some(player) = self.roster.get(index) else {
            return Ok(());
        };
        let reply = LoadReply {
            me: player.info(),
            players: self.roster.infos(),
            board: Board::clone(&self.broadcaster.last()),
            stage: self.ticker.stage(),
            age: self.ticker.age(),
            energy: player.visible_energy(),
            costs: self.config.costs.clone(),
        };
        self.gateway
            .push(connection_id, &ServerMessage::Load(Box::new(reply)))
            .await?;
        Ok(())
    }

    async fn on_action(&mut self, connection_id: &str, action: Action) -> Result<(), SessionError> {
        if self.roster.index_of_connection(connection_id).is_none() {
            debug!(session_id = %self.id, "Action from unknown connection {}", connection_id);
            return Ok(());
        }

        if self.stage() != Stage::Running {
            warn!(
                session_id = %self.id,
                "Gameplay request from {} during {:?}; dropping connection",
                connection_id,
                self.stage()
            );
            self.on_leave(connection_id).await?;
            self.gateway.drop_connection(connection_id).await?;
            return Ok(());
        }

        let Some(player) = self.roster.by_connection_mut(connection_id) else {
            return Ok(());
        };
        let index = player.index;
        let effect = match process_action(&mut self.board, player, action, &self.config.costs) {
            Ok(effect) => effect,
            Err(rejection) => {
                debug!(session_id = %self.id, "Player {} {:?} ignored: {}", index, action, rejection);
                return Ok(());
            }
        };
        let energy = player.visible_energy();

        self.gateway
            .push(connection_id, &ServerMessage::Energy { energy })
            .await?;
        if let Some(report) = effect.attack {
            debug!(session_id = %self.id, "Player {} attack {:?}", index, report);
            let recipients = self.roster.connection_ids();
            let message = ServerMessage::Attack {
                from: report.from,
                to: report.to,
                damage: report.damage,
            };
            self.send_all(&recipients, &message).await;
        }
        Ok(())
    }

    /// Fan a message out concurrently; one failing recipient never stops the
    /// others.
    async fn send_all(&self, recipients: &[ConnectionId], message: &ServerMessage) {
        let results = join_all(recipients.iter().map(|id| self.gateway.push(id, message))).await;
        for (id, result) in recipients.iter().zip(results) {
            if let Err(e) = result {
                warn!(session_id = %self.id, "Cannot send to {}: {}", id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::network::gateway::testing::RecordingGateway;
    use crate::protocol::{AttackTarget, Pos, TileSync};

    fn session(members: &[&str], config: GameConfig) -> (Session, Arc<RecordingGateway>) {
        let gateway = Arc::new(RecordingGateway::default());
        let members: Vec<MemberId> = members.iter().map(|m| m.to_string()).collect();
        let session = Session::new("s1", &members, Arc::new(config), gateway.clone()).unwrap();
        (session, gateway)
    }

    fn enter(connection_id: &str, member_id: &str) -> GameRequest {
        GameRequest::new(
            connection_id,
            RequestBody::Enter {
                member_id: member_id.to_string(),
            },
        )
    }

    fn running_config() -> GameConfig {
        GameConfig {
            board_height: 5,
            board_width: 5,
            initial_energy: 1_000.0,
            ..GameConfig::default()
        }
    }

    /// Put the session into Running with bases placed, as the loop would.
    fn start_running(session: &mut Session) {
        session.ticker = Ticker::new(Stage::Running, session.config.running_duration());
        session.place_bases();
    }

    async fn broadcast_and_settle(session: &Session) {
        session
            .broadcaster
            .broadcast(Arc::clone(&session.board), session.roster.connection_ids());
        session.broadcaster.wait_idle().await;
    }

    fn server_view(board: &Board) -> HashMap<Pos, TileSync> {
        board
            .iter()
            .filter_map(|(pos, _)| board.sync_of(pos).map(|sync| (pos, sync)))
            .collect()
    }

    /// The last load snapshot a client got, with every later diff applied.
    fn client_view(gateway: &RecordingGateway, connection_id: &str) -> HashMap<Pos, TileSync> {
        let messages = gateway.messages_for(connection_id);
        let start = messages
            .iter()
            .rposition(|m| matches!(m, ServerMessage::Load(_)))
            .expect("client never loaded");
        let mut view = match &messages[start] {
            ServerMessage::Load(reply) => server_view(&reply.board),
            _ => unreachable!(),
        };
        for message in &messages[start + 1..] {
            if let ServerMessage::Changed { tiles } = message {
                for tile in tiles {
                    view.insert(Pos::new(tile.x, tile.y), tile.clone());
                }
            }
        }
        view
    }

    #[test]
    fn rejects_more_members_than_slots() {
        let gateway = Arc::new(RecordingGateway::default());
        let members: Vec<MemberId> = (0..7).map(|i| format!("m{}", i)).collect();
        let result = Session::new("s", &members, Arc::new(GameConfig::default()), gateway);
        assert!(matches!(
            result,
            Err(SessionError::TooManyPlayers { members: 7, slots: 6 })
        ));
    }

    #[tokio::test]
    async fn enter_announces_newbie_to_others() {
        let (mut session, gateway) = session(&["a", "b"], running_config());
        session.handle_request(enter("c1", "a")).await.unwrap();
        session.handle_request(enter("c2", "b")).await.unwrap();

        let to_c1 = gateway.messages_for("c1");
        assert!(matches!(
            to_c1.as_slice(),
            [ServerMessage::Enter { player }] if player.index == 2
        ));
        assert!(gateway.messages_for("c2").is_empty());
    }

    #[tokio::test]
    async fn repeated_enter_keeps_the_live_connection() {
        let (mut session, gateway) = session(&["a"], running_config());
        session.handle_request(enter("c1", "a")).await.unwrap();
        session.handle_request(enter("c1", "a")).await.unwrap();
        assert!(!gateway.was_dropped("c1"));
        assert_eq!(session.roster().index_of_connection("c1"), Some(1));

        // A different connection for the same member replaces the old one.
        session.handle_request(enter("c2", "a")).await.unwrap();
        assert!(gateway.was_dropped("c1"));
        assert_eq!(session.roster().index_of_connection("c1"), None);
        assert_eq!(session.roster().index_of_connection("c2"), Some(1));
    }

    #[tokio::test]
    async fn load_snapshot_converges_with_later_diffs() {
        let (mut session, gateway) = session(&["a", "b", "c"], running_config());
        session.handle_request(enter("c1", "a")).await.unwrap();
        session.handle_request(enter("c2", "b")).await.unwrap();
        session.handle_request(enter("c3", "c")).await.unwrap();
        start_running(&mut session);
        broadcast_and_settle(&session).await;

        // (0,1) is captured and lost again within one tick, around c3's load.
        session
            .handle_request(GameRequest::new("c1", RequestBody::New(Pos::new(0, 1))))
            .await
            .unwrap();
        session
            .handle_request(GameRequest::new("c3", RequestBody::Load))
            .await
            .unwrap();
        session
            .handle_request(GameRequest::new("c1", RequestBody::Leave))
            .await
            .unwrap();
        broadcast_and_settle(&session).await;

        assert_eq!(session.board().get(Pos::new(0, 1)).unwrap().owner, None);
        assert_eq!(client_view(&gateway, "c3"), server_view(session.board()));
    }

    #[tokio::test]
    async fn unknown_member_is_dropped() {
        let (mut session, gateway) = session(&["a"], running_config());
        session.handle_request(enter("c1", "intruder")).await.unwrap();
        assert!(gateway.was_dropped("c1"));
        assert_eq!(session.roster().connected_count(), 0);
    }

    #[tokio::test]
    async fn gameplay_during_wait_drops_connection() {
        let (mut session, gateway) = session(&["a"], running_config());
        session.handle_request(enter("c1", "a")).await.unwrap();
        session
            .handle_request(GameRequest::new("c1", RequestBody::New(Pos::new(1, 0))))
            .await
            .unwrap();
        assert!(gateway.was_dropped("c1"));
        assert_eq!(session.roster().connected_count(), 0);
        assert!(session.board().owners().is_empty());
    }

    #[tokio::test]
    async fn load_replies_snapshot_with_costs() {
        let (mut session, gateway) = session(&["a", "b"], running_config());
        session.handle_request(enter("c1", "a")).await.unwrap();
        session
            .handle_request(GameRequest::new("c1", RequestBody::Load))
            .await
            .unwrap();

        match gateway.messages_for("c1").as_slice() {
            [ServerMessage::Load(reply)] => {
                assert_eq!(reply.me.index, 1);
                assert_eq!(reply.players.len(), 2);
                assert_eq!(reply.stage, Stage::Wait);
                assert_eq!(reply.energy, 1_000);
                assert_eq!(reply.costs, session.config.costs);
            }
            other => panic!("unexpected messages {:?}", other),
        }
        assert!(session.roster().get(1).unwrap().loaded);
    }

    #[tokio::test]
    async fn new_tile_action_deducts_and_reports_energy() {
        let (mut session, gateway) = session(&["a", "b"], running_config());
        session.handle_request(enter("c1", "a")).await.unwrap();
        session.handle_request(enter("c2", "b")).await.unwrap();
        start_running(&mut session);

        session
            .handle_request(GameRequest::new("c1", RequestBody::New(Pos::new(0, 1))))
            .await
            .unwrap();

        let tile = session.board().get(Pos::new(0, 1)).unwrap();
        assert_eq!(tile.owner, Some(1));
        assert_eq!(session.roster().get(1).unwrap().energy, 985.0);
        assert!(gateway
            .messages_for("c1")
            .iter()
            .any(|m| matches!(m, ServerMessage::Energy { energy: 985 })));
    }

    #[tokio::test]
    async fn out_of_range_attack_changes_nothing() {
        let (mut session, gateway) = session(&["a", "b"], running_config());
        session.handle_request(enter("c1", "a")).await.unwrap();
        session.handle_request(enter("c2", "b")).await.unwrap();
        start_running(&mut session);

        for _ in 0..3 {
            session
                .handle_request(GameRequest::new(
                    "c1",
                    RequestBody::AttackRangeUp(Pos::new(0, 0)),
                ))
                .await
                .unwrap();
        }
        let before = Board::clone(session.board());
        let energy = session.roster().get(1).unwrap().energy;
        session
            .handle_request(GameRequest::new(
                "c1",
                RequestBody::Attack(AttackTarget {
                    from: Pos::new(0, 0),
                    to: Pos::new(4, 4),
                }),
            ))
            .await
            .unwrap();

        assert_eq!(session.board().get(Pos::new(0, 0)).unwrap().value_map.attack_range, 4);
        assert_eq!(*session.board(), before);
        assert_eq!(session.roster().get(1).unwrap().energy, energy);
        assert!(!gateway
            .messages_for("c2")
            .iter()
            .any(|m| matches!(m, ServerMessage::Attack { .. })));
    }

    #[tokio::test]
    async fn leave_resets_territory_by_default() {
        let (mut session, gateway) = session(&["a", "b"], running_config());
        session.handle_request(enter("c1", "a")).await.unwrap();
        session.handle_request(enter("c2", "b")).await.unwrap();
        start_running(&mut session);

        session
            .handle_request(GameRequest::new("c2", RequestBody::Leave))
            .await
            .unwrap();
        assert_eq!(session.board().owned_count(2), 0);
        assert!(session.board().is_eliminated());
        assert!(gateway
            .messages_for("c1")
            .iter()
            .any(|m| matches!(m, ServerMessage::Leave { player } if player.index == 2)));
    }

    #[tokio::test]
    async fn keep_territory_allows_reconnect() {
        let config = GameConfig {
            leave_policy: LeavePolicy::KeepTerritory,
            ..running_config()
        };
        let (mut session, _gateway) = session(&["a", "b"], config);
        session.handle_request(enter("c1", "a")).await.unwrap();
        session.handle_request(enter("c2", "b")).await.unwrap();
        start_running(&mut session);

        session
            .handle_request(GameRequest::new("c2", RequestBody::Leave))
            .await
            .unwrap();
        assert_eq!(session.board().owned_count(2), 1);

        session.handle_request(enter("c3", "b")).await.unwrap();
        session
            .handle_request(GameRequest::new("c3", RequestBody::DefenceUp(Pos::new(4, 4))))
            .await
            .unwrap();
        assert_eq!(session.board().get(Pos::new(4, 4)).unwrap().value_map.defence, 3);
    }

    #[tokio::test]
    async fn late_joiner_gets_base_on_first_load() {
        let (mut session, _gateway) = session(&["a", "b"], running_config());
        session.handle_request(enter("c1", "a")).await.unwrap();
        start_running(&mut session);
        assert_eq!(session.board().owned_count(2), 0);

        session.handle_request(enter("c2", "b")).await.unwrap();
        session
            .handle_request(GameRequest::new("c2", RequestBody::Load))
            .await
            .unwrap();
        assert_eq!(session.board().owned_count(2), 1);

        // A second load does not hand out another tile.
        session.handle_request(GameRequest::new("c2", RequestBody::Load)).await.unwrap();
        assert_eq!(session.board().owned_count(2), 1);
    }

    #[tokio::test]
    async fn action_from_unregistered_connection_is_ignored() {
        let (mut session, gateway) = session(&["a"], running_config());
        start_running(&mut session);
        session
            .handle_request(GameRequest::new(
                "ghost",
                RequestBody::ProductivityUp(Pos::new(0, 0)),
            ))
            .await
            .unwrap();
        assert!(gateway.pushed.lock().is_empty());
        assert!(!gateway.was_dropped("ghost"));
    }
}
