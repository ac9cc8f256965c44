use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::protocol::{Attribute, PlayerIndex, Pos, ScoreEntry, TileSync, ValueMap};

// ── Tile ───────────────────────────────────────────────────────────

/// One board cell. An unowned tile always carries a zeroed value-map; the
/// constructors below are the only way tiles change ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tile {
    pub owner: Option<PlayerIndex>,
    pub value_map: ValueMap,
}

impl Tile {
    pub fn empty() -> Self {
        Tile {
            owner: None,
            value_map: ValueMap::ZERO,
        }
    }

    pub fn base(owner: PlayerIndex) -> Self {
        Tile {
            owner: Some(owner),
            value_map: ValueMap::BASE,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.owner.is_none()
    }

    pub fn is_owned_by(&self, player: PlayerIndex) -> bool {
        self.owner == Some(player)
    }
}

/// Result of resolving one attack against a defender tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttackResult {
    /// Defender survived with the given defence left.
    Damaged { remaining: u32 },
    /// Defender destroyed and taken over by the attacker.
    Conquered,
    /// Defender destroyed with no adjacent claimant.
    Razed,
}

// ── Board ──────────────────────────────────────────────────────────

/// Fixed-size rectangular grid stored row-major.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    height: usize,
    width: usize,
    tiles: Vec<Tile>,
}

impl Board {
    /// All cells unowned with a zero value-map.
    pub fn new(height: usize, width: usize) -> Self {
        Board {
            height,
            width,
            tiles: vec![Tile::empty(); height * width],
        }
    }

    pub fn in_bounds(&self, pos: Pos) -> bool {
        self.index_of(pos).is_some()
    }

    fn index_of(&self, pos: Pos) -> Option<usize> {
        let x = usize::try_from(pos.x).ok()?;
        let y = usize::try_from(pos.y).ok()?;
        (x < self.width && y < self.height).then_some(y * self.width + x)
    }

    pub fn get(&self, pos: Pos) -> Option<&Tile> {
        self.index_of(pos).map(|i| &self.tiles[i])
    }

    fn get_mut(&mut self, pos: Pos) -> Option<&mut Tile> {
        self.index_of(pos).map(move |i| &mut self.tiles[i])
    }

    /// Iterate every cell with its position.
    pub fn iter(&self) -> impl Iterator<Item = (Pos, &Tile)> + '_ {
        let width = self.width;
        self.tiles.iter().enumerate().map(move |(i, tile)| {
            let pos = Pos::new((i % width) as i32, (i / width) as i32);
            (pos, tile)
        })
    }

    // ── Placement ───────────────────────────────────────────────────

    /// Pre-allocated starting slot for a player index, if the board has one.
    pub fn base_slot(&self, player: PlayerIndex) -> Option<Pos> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        let max_x = self.width as i32 - 1;
        let max_y = self.height as i32 - 1;
        let pos = match player {
            1 => Pos::new(0, 0),
            2 => Pos::new(max_x, max_y),
            3 => Pos::new(0, max_y),
            4 => Pos::new(max_x, 0),
            5 => Pos::new(max_x / 2, 0),
            6 => Pos::new(max_x / 2, max_y),
            _ => return None,
        };
        Some(pos)
    }

    /// Give a player their starting tile. Returns the slot on success; fails
    /// when the index has no slot or the slot is already owned.
    pub fn place_base(&mut self, player: PlayerIndex) -> Option<Pos> {
        let pos = self.base_slot(player)?;
        let tile = self.get_mut(pos)?;
        if !tile.is_empty() {
            return None;
        }
        *tile = Tile::base(player);
        Some(pos)
    }

    /// Every tile owned by `player` decays to neutral. Returns how many.
    pub fn reset_owned(&mut self, player: PlayerIndex) -> usize {
        let mut reset = 0;
        for tile in self.tiles.iter_mut().filter(|t| t.is_owned_by(player)) {
            *tile = Tile::empty();
            reset += 1;
        }
        reset
    }

    // ── Mutations (callers validate first) ──────────────────────────

    /// Turn an unowned tile into a fresh base tile for `player`.
    pub fn capture(&mut self, pos: Pos, player: PlayerIndex) -> bool {
        match self.get_mut(pos) {
            Some(tile) if tile.is_empty() => {
                *tile = Tile::base(player);
                true
            }
            _ => false,
        }
    }

    /// Raise one attribute of a tile owned by `player` by one.
    pub fn upgrade(&mut self, pos: Pos, player: PlayerIndex, attribute: Attribute) -> bool {
        match self.get_mut(pos) {
            Some(tile) if tile.is_owned_by(player) => {
                *tile.value_map.get_mut(attribute) += 1;
                true
            }
            _ => false,
        }
    }

    /// Resolve `from` hitting `to`. The caller has already checked ownership
    /// and range; this only applies damage and the capture/raze rule.
    pub fn resolve_attack(&mut self, player: PlayerIndex, from: Pos, to: Pos) -> Option<AttackResult> {
        let damage = self.get(from)?.value_map.offence;
        let claimant = self.has_adjacent_owned(to, player);
        let defender = self.get_mut(to)?;

        if defender.value_map.defence > damage {
            defender.value_map.defence -= damage;
            return Some(AttackResult::Damaged {
                remaining: defender.value_map.defence,
            });
        }
        if claimant {
            *defender = Tile::base(player);
            Some(AttackResult::Conquered)
        } else {
            *defender = Tile::empty();
            Some(AttackResult::Razed)
        }
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub fn has_adjacent_owned(&self, pos: Pos, player: PlayerIndex) -> bool {
        pos.neighbours()
            .iter()
            .filter_map(|n| self.get(*n))
            .any(|t| t.is_owned_by(player))
    }

    pub fn owned_count(&self, player: PlayerIndex) -> usize {
        self.tiles.iter().filter(|t| t.is_owned_by(player)).count()
    }

    pub fn productivity_of(&self, player: PlayerIndex) -> u64 {
        self.tiles
            .iter()
            .filter(|t| t.is_owned_by(player))
            .map(|t| u64::from(t.value_map.productivity))
            .sum()
    }

    pub fn owners(&self) -> BTreeSet<PlayerIndex> {
        self.tiles.iter().filter_map(|t| t.owner).collect()
    }

    /// At most one player still owns anything.
    pub fn is_eliminated(&self) -> bool {
        self.owners().len() <= 1
    }

    /// Per-owner tile count and summed value-map, ordered by owner.
    pub fn score(&self) -> Vec<ScoreEntry> {
        let mut score: BTreeMap<PlayerIndex, ScoreEntry> = BTreeMap::new();
        for tile in &self.tiles {
            if let Some(owner) = tile.owner {
                let entry = score.entry(owner).or_insert(ScoreEntry {
                    owner,
                    tiles: 0,
                    power: 0,
                });
                entry.tiles += 1;
                entry.power += tile.value_map.total();
            }
        }
        score.into_values().collect()
    }

    pub fn sync_of(&self, pos: Pos) -> Option<TileSync> {
        self.get(pos).map(|tile| TileSync {
            x: pos.x,
            y: pos.y,
            owner: tile.owner,
            value_map: tile.value_map,
        })
    }

    /// Cells of `after` that differ from `self`. Boards of different size
    /// yield every cell of `after`.
    pub fn diff(&self, after: &Board) -> Vec<TileSync> {
        let same_shape = self.height == after.height && self.width == after.width;
        after
            .iter()
            .filter(|(pos, tile)| !same_shape || self.get(*pos) != Some(*tile))
            .map(|(pos, tile)| TileSync {
                x: pos.x,
                y: pos.y,
                owner: tile.owner,
                value_map: tile.value_map,
            })
            .collect()
    }
}
