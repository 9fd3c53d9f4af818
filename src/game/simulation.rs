//! The uniform tick contract every game type implements

use uuid::Uuid;

use crate::game::intents::TickIntents;
use crate::ws::protocol::{GameEvent, GameKind, GameOutcome, GameSnapshot, RoomOptions};

use super::quiz::QuizGame;
use super::race::RaceGame;
use super::shooter::ShooterGame;
use super::tower::TowerGame;

/// Per-tick context handed to the state machine. Wall-clock time flows in
/// through here so simulations stay deterministic under test.
#[derive(Debug, Clone, Copy)]
pub struct TickCtx {
    /// Room tick counter
    pub tick: u64,
    /// Fixed timestep in seconds for this game type
    pub dt: f32,
    /// Unix millis at the start of the tick
    pub now_ms: u64,
}

/// Result of one simulation step
pub struct TickOutput {
    pub snapshot: GameSnapshot,
    pub events: Vec<GameEvent>,
}

/// Identity a simulation needs when a slot is bound
#[derive(Debug, Clone)]
pub struct PlayerProfile {
    pub player_id: Uuid,
    pub name: String,
    pub color: String,
}

/// One pluggable state machine per game type. The instance is exclusively
/// owned by its room task; nothing here is shared or locked.
pub trait Simulation: Send {
    /// Spawn an entity for a newly bound slot (tick boundary only)
    fn handle_join(&mut self, profile: &PlayerProfile);

    /// Remove a player's entity and per-player state
    fn handle_leave(&mut self, player_id: Uuid);

    /// Ready flag from the lobby (quiz uses it, others ignore)
    fn handle_ready(&mut self, _player_id: Uuid, _ready: bool) {}

    /// Display reported its render surface while waiting
    fn set_world_size(&mut self, _width: f32, _height: f32) {}

    /// Transition out of the lobby; called once when the host starts
    fn start(&mut self, now_ms: u64);

    /// Advance one fixed step and produce a full snapshot
    fn tick(&mut self, ctx: TickCtx, intents: &TickIntents) -> TickOutput;

    /// Terminal outcome once the match is decided
    fn is_terminal(&self) -> Option<GameOutcome>;
}

/// Simulation cadence per game type. Shooter and race are physics-sensitive;
/// quiz and tower-defence are timer-driven and run far slower.
pub fn tick_rate_hz(kind: GameKind) -> u32 {
    match kind {
        GameKind::Shooter | GameKind::Race => 60,
        GameKind::Quiz | GameKind::TowerDefence => 8,
    }
}

/// Fixed timestep in seconds for a game type
pub fn tick_delta(kind: GameKind) -> f32 {
    1.0 / tick_rate_hz(kind) as f32
}

/// Select the state machine for a room. Chosen once at creation, never
/// switched at runtime.
pub fn build_simulation(kind: GameKind, options: &RoomOptions, seed: u64) -> Box<dyn Simulation> {
    match kind {
        GameKind::Shooter => Box::new(ShooterGame::new(options, seed)),
        GameKind::Race => Box::new(RaceGame::new(options)),
        GameKind::Quiz => Box::new(QuizGame::new(options, seed)),
        GameKind::TowerDefence => Box::new(TowerGame::new(options)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn physics_games_run_faster_than_timer_games() {
        assert_eq!(tick_rate_hz(GameKind::Shooter), 60);
        assert_eq!(tick_rate_hz(GameKind::Race), 60);
        assert_eq!(tick_rate_hz(GameKind::Quiz), 8);
        assert_eq!(tick_rate_hz(GameKind::TowerDefence), 8);
    }
}
