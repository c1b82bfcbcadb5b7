//! Game simulation modules

pub mod r#match;
pub mod physics;
pub mod powerup;
pub mod snapshot;
pub mod world;

pub use r#match::{MatchLoop, MatchState};
pub use world::{MoveCommand, World};
