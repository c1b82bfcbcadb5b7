//! Rooms, team rosters and the registry that runs their matches

pub mod registry;
pub mod room;

pub use registry::RoomRegistry;
pub use room::RoomError;
