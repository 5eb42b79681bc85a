pub mod constants;
pub mod engine;
pub mod error;
pub mod game;
pub mod grid;
pub mod peer_sync;
pub mod room_code;
pub mod server_protocol;
pub mod server_utils;
pub mod session;
pub mod types;
