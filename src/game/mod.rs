pub mod board;
pub mod costs;
pub mod player;
pub mod stage;
