use crate::game::board::Board;
use crate::game::player::Roster;

/// Runs the energy system for a single tick.
///
/// Every connected player earns `dt × (base_rate + Σ productivity)` over the
/// tiles they own. Disconnected players do not accrue.
pub fn energy_system(board: &Board, roster: &mut Roster, dt: f64, base_rate: f64) {
    if dt <= 0.0 {
        return;
    }
    for player in roster.players_mut().iter_mut().filter(|p| p.is_connected()) {
        let productivity = board.productivity_of(player.index) as f64;
        player.energy += dt * (base_rate + productivity);
    }
}
