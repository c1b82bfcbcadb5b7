//! Time utilities for game simulation

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Default simulation rate
pub const SIMULATION_TPS: u32 = 60;

/// Fixed step for a given tick rate, in seconds
pub fn tick_delta(tick_rate_hz: u32) -> f32 {
    1.0 / tick_rate_hz.max(1) as f32
}

/// Wall-clock interval between ticks
pub fn tick_interval(tick_rate_hz: u32) -> Duration {
    Duration::from_micros(1_000_000 / tick_rate_hz.max(1) as u64)
}

/// Convert a duration into a whole number of ticks (at least one)
pub fn duration_to_ticks(duration: Duration, tick_rate_hz: u32) -> u32 {
    let ticks = (duration.as_secs_f64() * tick_rate_hz as f64).round() as u32;
    ticks.max(1)
}
