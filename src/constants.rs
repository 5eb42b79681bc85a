use crate::types::GridSize;

pub const MIN_PLAYERS: usize = 2;
pub const MAX_PLAYERS: usize = 8;
pub const ROOM_PLAYERS: usize = 2;

pub const INTERACTIVE_MAX_ITERATIONS: usize = 100;
pub const AUTHORITATIVE_MAX_ITERATIONS: usize = 1_000;

pub const ROOM_CODE_LEN: usize = 4;
pub const ROOM_CODE_ALPHABET: &str = "ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

pub const STALE_ROOM_MS: u64 = 10 * 60_000;
pub const SWEEP_INTERVAL_MS: u64 = 60_000;
pub const EXPIRED_CODE_MEMORY: usize = 64;

pub const DEFAULT_GRID_SIZE: GridSize = GridSize::Medium;

pub fn grid_dimensions(size: GridSize) -> (usize, usize) {
    match size {
        GridSize::Small => (6, 4),
        GridSize::Medium => (9, 6),
        GridSize::Large => (12, 8),
        GridSize::XLarge => (15, 10),
    }
}

pub fn clamp_player_count(value: usize) -> usize {
    value.clamp(MIN_PLAYERS, MAX_PLAYERS)
}
