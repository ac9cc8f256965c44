pub mod broadcaster;
pub mod gateway;
pub mod server;
