use crate::game::board::Board;
use crate::protocol::{PlayerIndex, Pos};

/// Read-only legality predicates over one board. Out-of-bounds positions
/// are never valid.
#[derive(Debug, Clone, Copy)]
pub struct BoardValidator<'a> {
    board: &'a Board,
}

impl<'a> BoardValidator<'a> {
    pub fn new(board: &'a Board) -> Self {
        Self { board }
    }

    pub fn is_my_tile(&self, pos: Pos, player: PlayerIndex) -> bool {
        self.board
            .get(pos)
            .map_or(false, |tile| tile.is_owned_by(player))
    }

    pub fn is_enemy_tile(&self, pos: Pos, player: PlayerIndex) -> bool {
        self.board
            .get(pos)
            .map_or(false, |tile| matches!(tile.owner, Some(owner) if owner != player))
    }

    pub fn is_empty_tile(&self, pos: Pos) -> bool {
        self.board.get(pos).map_or(false, |tile| tile.is_empty())
    }

    pub fn is_nearby_my_tile(&self, pos: Pos, player: PlayerIndex) -> bool {
        self.board.in_bounds(pos) && self.board.has_adjacent_owned(pos, player)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board() -> Board {
        let mut board = Board::new(3, 3);
        board.place_base(1); // (0,0)
        board.place_base(2); // (2,2)
        board
    }

    #[test]
    fn ownership_predicates() {
        let board = board();
        let v = BoardValidator::new(&board);
        assert!(v.is_my_tile(Pos::new(0, 0), 1));
        assert!(!v.is_my_tile(Pos::new(2, 2), 1));
        assert!(v.is_enemy_tile(Pos::new(2, 2), 1));
        assert!(!v.is_enemy_tile(Pos::new(0, 0), 1));
        assert!(!v.is_enemy_tile(Pos::new(1, 1), 1));
        assert!(v.is_empty_tile(Pos::new(1, 1)));
        assert!(!v.is_empty_tile(Pos::new(0, 0)));
    }

    #[test]
    fn nearby_is_four_directional() {
        let board = board();
        let v = BoardValidator::new(&board);
        assert!(v.is_nearby_my_tile(Pos::new(1, 0), 1));
        assert!(v.is_nearby_my_tile(Pos::new(0, 1), 1));
        assert!(!v.is_nearby_my_tile(Pos::new(1, 1), 1));
    }

    #[test]
    fn out_of_bounds_is_always_false() {
        let board = board();
        let v = BoardValidator::new(&board);
        for pos in [Pos::new(-1, 0), Pos::new(0, -1), Pos::new(3, 0), Pos::new(0, 3)] {
            assert!(!v.is_my_tile(pos, 1));
            assert!(!v.is_enemy_tile(pos, 1));
            assert!(!v.is_empty_tile(pos));
            assert!(!v.is_nearby_my_tile(pos, 1));
        }
    }
}
