use std::collections::HashMap;

use rand::seq::SliceRandom;

use crate::protocol::{ConnectionId, MemberId, PlayerIndex, PlayerInfo};

/// Display colours handed out without repetition.
pub const PALETTE: [&str; 10] = [
    "#CD6155", "#AF7AC5", "#5499C7", "#48C9B0", "#45B39D", "#52BE80", "#F4D03F", "#E67E22",
    "#DC7633", "#A6ACAF",
];

#[derive(Debug, Clone)]
pub struct Player {
    pub index: PlayerIndex,
    pub member_id: MemberId,
    pub color: String,
    pub connection_id: Option<ConnectionId>,
    /// Has received its first full snapshot.
    pub loaded: bool,
    pub energy: f64,
    /// Starting tile already handed out.
    pub based: bool,
}

impl Player {
    pub fn info(&self) -> PlayerInfo {
        PlayerInfo {
            index: self.index,
            color: self.color.clone(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection_id.is_some()
    }

    /// Energy as shown to clients.
    pub fn visible_energy(&self) -> u64 {
        self.energy.max(0.0).floor() as u64
    }
}

// ── Roster ──────────────────────────────────────────────────────────

/// Every registered player plus an index of live connections.
#[derive(Debug, Clone)]
pub struct Roster {
    players: Vec<Player>,
    connections: HashMap<ConnectionId, PlayerIndex>,
}

impl Roster {
    /// Registers members in order; indices start at 1. Colours are shuffled
    /// from [`PALETTE`] and wrap if there are more members than colours.
    pub fn new(members: &[MemberId], initial_energy: f64) -> Self {
        let mut colors: Vec<&str> = PALETTE.to_vec();
        colors.shuffle(&mut rand::thread_rng());

        let players = members
            .iter()
            .enumerate()
            .map(|(i, member_id)| Player {
                index: i as PlayerIndex + 1,
                member_id: member_id.clone(),
                color: colors[i % colors.len()].to_string(),
                connection_id: None,
                loaded: false,
                energy: initial_energy,
                based: false,
            })
            .collect();

        Self {
            players,
            connections: HashMap::new(),
        }
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn players_mut(&mut self) -> &mut [Player] {
        &mut self.players
    }

    pub fn infos(&self) -> Vec<PlayerInfo> {
        self.players.iter().map(Player::info).collect()
    }

    pub fn get(&self, index: PlayerIndex) -> Option<&Player> {
        self.players.iter().find(|p| p.index == index)
    }

    pub fn get_mut(&mut self, index: PlayerIndex) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.index == index)
    }

    pub fn index_of_connection(&self, connection_id: &str) -> Option<PlayerIndex> {
        self.connections.get(connection_id).copied()
    }

    pub fn by_connection_mut(&mut self, connection_id: &str) -> Option<&mut Player> {
        let index = self.index_of_connection(connection_id)?;
        self.get_mut(index)
    }

    pub fn connected_count(&self) -> usize {
        self.connections.len()
    }

    pub fn all_connected(&self) -> bool {
        !self.players.is_empty() && self.connections.len() == self.players.len()
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().cloned().collect()
    }

    pub fn connected(&self) -> impl Iterator<Item = &Player> + '_ {
        self.players.iter().filter(|p| p.is_connected())
    }

    /// Attach a connection to a registered member. Returns the player index
    /// and any stale connection that the new one replaced.
    pub fn attach(
        &mut self,
        member_id: &str,
        connection_id: ConnectionId,
    ) -> Option<(PlayerIndex, Option<ConnectionId>)> {
        let player = self.players.iter_mut().find(|p| p.member_id == member_id)?;
        let index = player.index;
        let stale = player.connection_id.replace(connection_id.clone());
        player.loaded = false;
        if let Some(stale) = &stale {
            self.connections.remove(stale);
        }
        self.connections.insert(connection_id, index);
        Some((index, stale))
    }

    /// Detach a connection; the player stays registered.
    pub fn detach(&mut self, connection_id: &str) -> Option<PlayerIndex> {
        let index = self.connections.remove(connection_id)?;
        if let Some(player) = self.get_mut(index) {
            player.connection_id = None;
            player.loaded = false;
        }
        Some(index)
    }

    /// Forget every connection (end of session).
    pub fn detach_all(&mut self) -> Vec<ConnectionId> {
        let ids: Vec<ConnectionId> = self.connections.drain().map(|(id, _)| id).collect();
        for player in &mut self.players {
            player.connection_id = None;
        }
        ids
    }
}
