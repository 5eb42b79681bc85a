use crate::constants::{clamp_player_count, DEFAULT_GRID_SIZE};
use crate::types::GridSize;

const MIN_STALE_SECS: u64 = 10;
const MIN_SWEEP_SECS: u64 = 1;

pub fn parse_grid_size_name(raw: &str) -> Option<GridSize> {
    GridSize::parse(&raw.trim().to_ascii_lowercase())
}

pub fn grid_size_or_default(value: Option<GridSize>) -> GridSize {
    value.unwrap_or(DEFAULT_GRID_SIZE)
}

pub fn normalize_player_count(value: Option<i64>) -> usize {
    let raw = value.unwrap_or(2).clamp(0, i64::from(u8::MAX));
    clamp_player_count(raw as usize)
}

pub fn normalize_stale_timeout_ms(secs: u64) -> u64 {
    secs.max(MIN_STALE_SECS).saturating_mul(1_000)
}

pub fn normalize_sweep_interval_ms(secs: u64) -> u64 {
    secs.max(MIN_SWEEP_SECS).saturating_mul(1_000)
}
