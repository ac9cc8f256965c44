use serde::{Deserialize, Serialize};

use crate::protocol::TileActionKind;

// ── Cost definition ─────────────────────────────────────────────────

/// Linear price: `base + multiply × scale`, where the scale depends on the
/// action kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cost {
    pub base: u32,
    pub multiply: u32,
}

impl Cost {
    pub const fn new(base: u32, multiply: u32) -> Self {
        Self { base, multiply }
    }

    pub fn at(&self, scale: u64) -> f64 {
        f64::from(self.base) + f64::from(self.multiply) * scale as f64
    }
}

// ── Cost table ──────────────────────────────────────────────────────

/// Price list sent to clients with every snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostTable {
    pub new: Cost,
    pub defence_up: Cost,
    pub offence_up: Cost,
    pub productivity_up: Cost,
    pub attack_range_up: Cost,
    pub attack: Cost,
}

impl Default for CostTable {
    fn default() -> Self {
        Self {
            new: Cost::new(15, 0),
            defence_up: Cost::new(5, 0),
            offence_up: Cost::new(20, 1),
            productivity_up: Cost::new(10, 1),
            attack_range_up: Cost::new(25, 5),
            attack: Cost::new(4, 1),
        }
    }
}

impl CostTable {
    pub fn for_tile_action(&self, kind: TileActionKind) -> &Cost {
        match kind {
            TileActionKind::New => &self.new,
            TileActionKind::DefenceUp => &self.defence_up,
            TileActionKind::OffenceUp => &self.offence_up,
            TileActionKind::ProductivityUp => &self.productivity_up,
            TileActionKind::AttackRangeUp => &self.attack_range_up,
        }
    }

    /// Buying a tile scales with how many the requester already owns.
    pub fn new_tile(&self, owned_tiles: usize) -> f64 {
        self.new.at(owned_tiles as u64)
    }

    /// Upgrades scale with the attribute's current level above one.
    pub fn upgrade(&self, kind: TileActionKind, current_value: u32) -> f64 {
        self.for_tile_action(kind)
            .at(u64::from(current_value.saturating_sub(1)))
    }

    pub fn attack(&self, distance: u32, damage: u32) -> f64 {
        self.attack.at(u64::from(distance) * u64::from(damage))
    }
}
