pub mod config;
pub mod error;
pub mod game;
pub mod network;
pub mod protocol;
pub mod session;
pub mod store;
pub mod systems;
