//! Room and simulation modules

pub mod intents;
pub mod quiz;
pub mod race;
pub mod room;
pub mod shooter;
pub mod simulation;
pub mod tower;

pub use room::{GameRoom, RoomHandle, RoomRegistry};
pub use simulation::{Simulation, TickCtx, TickOutput};
