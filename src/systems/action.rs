use std::sync::Arc;

use thiserror::Error;

use crate::game::board::{AttackResult, Board};
use crate::game::costs::CostTable;
use crate::game::player::Player;
use crate::protocol::{Action, Pos, TileActionKind};
use crate::systems::validator::BoardValidator;

/// Why an action had no effect. Never surfaced to the client.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum Rejection {
    #[error("illegal target")]
    Illegal,
    #[error("out of attack range ({distance} > {range})")]
    OutOfRange { distance: u32, range: u32 },
    #[error("not enough energy: need {cost}, have {energy}")]
    Unaffordable { cost: f64, energy: f64 },
}

/// What a successful action did, for the caller to report.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionEffect {
    pub cost: f64,
    pub changed: Vec<Pos>,
    pub attack: Option<AttackReport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttackReport {
    pub from: Pos,
    pub to: Pos,
    pub damage: u32,
    pub result: AttackResult,
}

/// Validates, prices, pays for and applies one gameplay action.
///
/// The board is copy-on-write: it is only cloned (via `Arc::make_mut`) once
/// the action is known to be legal and funded, so a rejected action leaves
/// both the board reference and the player's energy untouched.
pub fn process_action(
    board: &mut Arc<Board>,
    player: &mut Player,
    action: Action,
    costs: &CostTable,
) -> Result<ActionEffect, Rejection> {
    match action {
        Action::Tile { kind, pos } => process_tile_action(board, player, kind, pos, costs),
        Action::Attack { from, to } => process_attack(board, player, from, to, costs),
    }
}

fn charge(player: &mut Player, cost: f64) -> Result<(), Rejection> {
    if player.energy < cost {
        return Err(Rejection::Unaffordable {
            cost,
            energy: player.energy,
        });
    }
    player.energy -= cost;
    Ok(())
}

fn process_tile_action(
    board: &mut Arc<Board>,
    player: &mut Player,
    kind: TileActionKind,
    pos: Pos,
    costs: &CostTable,
) -> Result<ActionEffect, Rejection> {
    let me = player.index;
    let validator = BoardValidator::new(board);

    let cost = match kind.attribute() {
        None => {
            if !(validator.is_empty_tile(pos) && validator.is_nearby_my_tile(pos, me)) {
                return Err(Rejection::Illegal);
            }
            costs.new_tile(board.owned_count(me))
        }
        Some(attribute) => {
            if !validator.is_my_tile(pos, me) {
                return Err(Rejection::Illegal);
            }
            let current = board
                .get(pos)
                .map_or(0, |tile| tile.value_map.get(attribute));
            costs.upgrade(kind, current)
        }
    };

    charge(player, cost)?;

    let board = Arc::make_mut(board);
    match kind.attribute() {
        None => board.capture(pos, me),
        Some(attribute) => board.upgrade(pos, me, attribute),
    };

    Ok(ActionEffect {
        cost,
        changed: vec![pos],
        attack: None,
    })
}

fn process_attack(
    board: &mut Arc<Board>,
    player: &mut Player,
    from: Pos,
    to: Pos,
    costs: &CostTable,
) -> Result<ActionEffect, Rejection> {
    let me = player.index;
    let validator = BoardValidator::new(board);
    if !(validator.is_my_tile(from, me) && validator.is_enemy_tile(to, me)) {
        return Err(Rejection::Illegal);
    }

    let (range, damage) = match board.get(from) {
        Some(tile) => (tile.value_map.attack_range, tile.value_map.offence),
        None => return Err(Rejection::Illegal),
    };
    let distance = from.manhattan(&to);
    if distance > range {
        return Err(Rejection::OutOfRange { distance, range });
    }

    let cost = costs.attack(distance, damage);
    charge(player, cost)?;

    let result = Arc::make_mut(board)
        .resolve_attack(me, from, to)
        .ok_or(Rejection::Illegal)?;

    Ok(ActionEffect {
        cost,
        changed: vec![to],
        attack: Some(AttackReport {
            from,
            to,
            damage,
            result,
        }),
    })
}
