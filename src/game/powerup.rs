//! Power-up pads and the per-player boost meter

use serde::Serialize;

use super::physics::{BodyId, Vec2};

/// Upper bound of the boost meter
pub const BOOST_MAX: u32 = 100;
/// Boost granted by one pad pickup
pub const PAD_BOOST: u32 = 25;
/// Boost consumed by one boosted move
pub const BOOST_DRAIN: u32 = 10;

/// Boost meter clamped to `0..=BOOST_MAX`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoostMeter(u32);

impl BoostMeter {
    pub fn level(self) -> u32 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn charge(&mut self, amount: u32) {
        self.0 = self.0.saturating_add(amount).min(BOOST_MAX);
    }

    /// Spend one boost; returns false (and spends nothing) when empty
    pub fn drain(&mut self) -> bool {
        if self.is_empty() {
            return false;
        }
        self.0 = self.0.saturating_sub(BOOST_DRAIN);
        true
    }
}

/// A static pickup sensor
#[derive(Debug, Clone)]
pub struct Pad {
    pub body: BodyId,
    pub position: Vec2,
    taken: bool,
    cooldown_ticks: u32,
}

impl Pad {
    pub fn new(body: BodyId, position: Vec2) -> Self {
        Self {
            body,
            position,
            taken: false,
            cooldown_ticks: 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn is_taken(&self) -> bool {
        self.taken
    }

    /// Try to take the pad; fails while its cooldown is running
    pub fn claim(&mut self, cooldown_ticks: u32) -> bool {
        if self.taken {
            return false;
        }
        self.taken = true;
        self.cooldown_ticks = cooldown_ticks.max(1);
        true
    }

    /// Advance one tick; the pad becomes available once the cooldown runs out
    pub fn tick(&mut self) {
        if !self.taken {
            return;
        }
        self.cooldown_ticks = self.cooldown_ticks.saturating_sub(1);
        if self.cooldown_ticks == 0 {
            self.taken = false;
        }
    }

    pub fn state(&self) -> PadState {
        PadState {
            position: self.position,
            taken: self.taken,
        }
    }
}

/// Pad as seen by clients
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PadState {
    pub position: Vec2,
    pub taken: bool,
}
