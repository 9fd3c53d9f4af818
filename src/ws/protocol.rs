//! WebSocket protocol message definitions
//! These are the wire types for display/controller communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Game types a room can host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameKind {
    /// Top-down arena shooter with bots and pickups
    Shooter,
    /// Checkpoint race on a closed track
    Race,
    /// Round-based quiz with latency-weighted scoring
    Quiz,
    /// Cooperative wave defence
    TowerDefence,
}

/// Room configuration supplied by the display on create_room
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomOptions {
    /// Maximum player slots (display not included unless it participates)
    #[serde(default = "default_max_players")]
    pub max_players: u32,
    /// Optional room password (plaintext on the wire, digest at rest)
    #[serde(default)]
    pub password: Option<String>,
    /// Whether the host plays with a slot of their own
    #[serde(default)]
    pub host_participates: bool,
    /// Display name for the host slot when participating
    #[serde(default)]
    pub host_name: Option<String>,
    /// World width in logical pixels (display may refine via screen_dimensions)
    #[serde(default = "default_world_width")]
    pub world_width: f32,
    /// World height in logical pixels
    #[serde(default = "default_world_height")]
    pub world_height: f32,
    /// Laps to finish a race
    #[serde(default = "default_laps")]
    pub laps: u32,
    /// Rounds in a quiz
    #[serde(default = "default_rounds")]
    pub rounds: u32,
    /// Waves in a tower-defence run
    #[serde(default = "default_waves")]
    pub waves: u32,
    /// Kill score that ends a shooter match
    #[serde(default = "default_target_score")]
    pub target_score: u32,
    /// Hard time limit for shooter/race matches (seconds)
    #[serde(default = "default_match_secs")]
    pub match_secs: u32,
}

fn default_max_players() -> u32 {
    8
}
fn default_world_width() -> f32 {
    1280.0
}
fn default_world_height() -> f32 {
    720.0
}
fn default_laps() -> u32 {
    3
}
fn default_rounds() -> u32 {
    8
}
fn default_waves() -> u32 {
    5
}
fn default_target_score() -> u32 {
    10
}
fn default_match_secs() -> u32 {
    180
}

impl Default for RoomOptions {
    fn default() -> Self {
        Self {
            max_players: default_max_players(),
            password: None,
            host_participates: false,
            host_name: None,
            world_width: default_world_width(),
            world_height: default_world_height(),
            laps: default_laps(),
            rounds: default_rounds(),
            waves: default_waves(),
            target_score: default_target_score(),
            match_secs: default_match_secs(),
        }
    }
}

/// Messages sent from clients to the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Display opens (or re-opens) a room
    CreateRoom {
        room_id: String,
        kind: GameKind,
        #[serde(default)]
        config: RoomOptions,
    },

    /// Display reports its render surface, refining world dimensions
    ScreenDimensions { width: f32, height: f32 },

    /// Display starts the match
    StartGame,

    /// Display closes the room explicitly
    CloseRoom,

    /// Controller joins a room; player_id rebinds a disconnected slot
    JoinRoom {
        room_id: String,
        player_name: String,
        #[serde(default)]
        password: Option<String>,
        #[serde(default)]
        player_id: Option<Uuid>,
    },

    /// Controller input for the current tick
    PlayerInput {
        /// Monotonic per-player sequence, stale values are dropped
        seq: u64,
        payload: IntentPayload,
    },

    /// Controller ready flag (quiz lobby)
    Ready { ready: bool },

    /// Controller leaves the room for good (no reconnect grace)
    LeaveRoom,

    /// Ping for latency measurement
    Ping { t: u64 },
}

/// Game-type-specific intent payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "game", rename_all = "snake_case")]
pub enum IntentPayload {
    /// Movement vector, aim vector and trigger state
    Shooter {
        move_x: f32,
        move_y: f32,
        aim_x: f32,
        aim_y: f32,
        fire: bool,
    },

    /// Accelerate (-1 reverse .. 1 forward) and turn (-1 left .. 1 right)
    Race { accelerate: f32, turn: f32 },

    /// Selected answer index for the live question
    Quiz { answer: u32 },

    /// One-shot build/upgrade command, consumed by the next tick
    TowerDefence { command: TowerCommand },
}

impl IntentPayload {
    /// The game type this payload belongs to
    pub fn kind(&self) -> GameKind {
        match self {
            IntentPayload::Shooter { .. } => GameKind::Shooter,
            IntentPayload::Race { .. } => GameKind::Race,
            IntentPayload::Quiz { .. } => GameKind::Quiz,
            IntentPayload::TowerDefence { .. } => GameKind::TowerDefence,
        }
    }
}

/// Tower-defence commands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TowerCommand {
    Build { tower: TowerKind, col: u32, row: u32 },
    Upgrade { tower_id: u32 },
}

/// Tower varieties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TowerKind {
    /// Single-target, high damage
    Cannon,
    /// Slows targets, low damage
    Frost,
}

/// Messages sent from the engine to bound sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Room is open; join_url is what the display renders as a QR code
    RoomCreated {
        room_id: String,
        kind: GameKind,
        join_url: String,
        max_players: u32,
    },

    /// Private join confirmation for a controller
    RoomJoined {
        room_id: String,
        kind: GameKind,
        player_id: Uuid,
        player_name: String,
        color: String,
        reconnected: bool,
    },

    /// A player slot was bound
    PlayerConnected { player: PlayerPublic },

    /// A disconnected player rebound within the grace window
    PlayerReconnected { player_id: Uuid },

    /// A session dropped; slot lingers until the grace window expires
    PlayerDisconnected { player_id: Uuid, removal_pending: bool },

    /// A slot was removed (explicit leave or grace expiry)
    PlayerLeft { player_id: Uuid },

    /// Match started
    GameStarted { tick: u64 },

    /// Authoritative state snapshot, sent every simulation tick
    GameState {
        tick: u64,
        state: GameSnapshot,
        events: Vec<GameEvent>,
    },

    /// Terminal result for the room
    GameOver { outcome: GameOutcome },

    /// Room is gone (display left, abandoned, or closed)
    RoomClosed { reason: String },

    /// Error for the offending session only, never broadcast
    Error { code: String, message: String },

    /// Pong response
    Pong { t: u64 },
}

/// Public player identity inside a room
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerPublic {
    pub player_id: Uuid,
    pub name: String,
    pub color: String,
}

/// Axis-aligned rectangle in world coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RectView {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Timed effect kinds (shooter)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    Shield,
    SpeedBoost,
}

/// Complete game state for one tick, self-contained per game type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "game", rename_all = "snake_case")]
pub enum GameSnapshot {
    Shooter(ShooterState),
    Race(RaceState),
    Quiz(QuizState),
    TowerDefence(TowerState),
}

/// Shooter snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShooterState {
    pub world_width: f32,
    pub world_height: f32,
    pub players: Vec<ShooterPlayerView>,
    pub bots: Vec<BotView>,
    pub bullets: Vec<BulletView>,
    pub obstacles: Vec<RectView>,
    pub pickups: Vec<PickupView>,
    /// Time left before the match ends on the clock
    pub remaining_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShooterPlayerView {
    pub player_id: Uuid,
    pub name: String,
    pub color: String,
    pub x: f32,
    pub y: f32,
    pub aim_x: f32,
    pub aim_y: f32,
    pub health: f32,
    pub alive: bool,
    pub score: u32,
    pub effects: Vec<EffectView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectView {
    pub kind: EffectKind,
    /// Unix millis when the effect expires
    pub ends_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotView {
    pub bot_id: u32,
    pub x: f32,
    pub y: f32,
    pub health: f32,
    pub chasing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulletView {
    pub bullet_id: u32,
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PickupView {
    pub pickup_id: u32,
    pub kind: EffectKind,
    pub x: f32,
    pub y: f32,
}

/// Race snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceState {
    pub world_width: f32,
    pub world_height: f32,
    pub players: Vec<RacerView>,
    pub checkpoints: Vec<CheckpointView>,
    pub barriers: Vec<RectView>,
    pub sand: Vec<RectView>,
    pub laps_total: u32,
    pub remaining_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RacerView {
    pub player_id: Uuid,
    pub name: String,
    pub color: String,
    pub x: f32,
    pub y: f32,
    pub heading: f32,
    pub speed: f32,
    pub lap: u32,
    pub next_checkpoint: u32,
    pub rank: u32,
    pub in_sand: bool,
    pub last_lap_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointView {
    pub index: u32,
    pub x: f32,
    pub y: f32,
    pub radius: f32,
}

/// Quiz snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizState {
    pub phase: QuizPhaseView,
    /// 1-based round counter, 0 before the first question
    pub round: u32,
    pub rounds_total: u32,
    pub question: Option<QuestionView>,
    pub countdown_ms: u64,
    pub players: Vec<QuizPlayerView>,
    /// Only present while revealing
    pub correct_answer: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuizPhaseView {
    Waiting,
    Asking,
    Revealing,
    Finished,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionView {
    pub prompt: String,
    pub answers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizPlayerView {
    pub player_id: Uuid,
    pub name: String,
    pub color: String,
    pub score: u32,
    pub ready: bool,
    pub answered: bool,
    /// Whether the locked answer was correct (revealing phase only)
    pub correct: Option<bool>,
}

/// Tower-defence snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TowerState {
    pub grid_cols: u32,
    pub grid_rows: u32,
    pub castle_health: i32,
    pub gold: u32,
    pub wave: u32,
    pub waves_total: u32,
    /// Millis until the next wave while between waves
    pub intermission_ms: Option<u64>,
    pub towers: Vec<TowerView>,
    pub mobs: Vec<MobView>,
    pub path: Vec<CellView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TowerView {
    pub tower_id: u32,
    pub kind: TowerKind,
    pub col: u32,
    pub row: u32,
    pub level: u32,
    pub cooldown_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MobView {
    pub mob_id: u32,
    pub x: f32,
    pub y: f32,
    pub health: f32,
    pub max_health: f32,
    pub slowed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellView {
    pub col: u32,
    pub row: u32,
}

/// Discrete events emitted alongside snapshots for one-shot presentation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum GameEvent {
    /// A player took damage (attacker None = environment/bot contact)
    PlayerHit {
        attacker_id: Option<Uuid>,
        target_id: Uuid,
        damage: f32,
    },

    /// A player died
    PlayerKilled {
        killer_id: Option<Uuid>,
        victim_id: Uuid,
    },

    /// A player respawned
    PlayerRespawned { player_id: Uuid },

    /// A bot died to a player's bullet
    BotKilled { bot_id: u32, killer_id: Uuid },

    /// A pickup was collected
    PickupTaken { player_id: Uuid, kind: EffectKind },

    /// A racer hit a barrier
    Collision { player_id: Uuid },

    /// An in-order checkpoint crossing
    CheckpointPassed { player_id: Uuid, checkpoint: u32 },

    /// A full lap was completed
    LapCompleted {
        player_id: Uuid,
        lap: u32,
        lap_ms: u64,
    },

    /// A quiz round opened
    RoundStarted { round: u32 },

    /// A quiz round closed and the answer was revealed
    RoundRevealed { round: u32, correct_answer: u32 },

    /// A player locked an answer (index withheld until reveal)
    PlayerAnswered { player_id: Uuid },

    /// A wave began spawning
    WaveStarted { wave: u32 },

    /// All mobs of a wave are dead or arrived
    WaveCleared { wave: u32 },

    /// A tower was placed
    TowerBuilt { tower_id: u32, player_id: Uuid },

    /// A tower was upgraded
    TowerUpgraded { tower_id: u32, level: u32 },

    /// A mob died to tower fire
    MobKilled { mob_id: u32, tower_id: u32 },

    /// A mob reached the castle
    CastleDamaged { damage: i32, health: i32 },
}

/// Terminal result payload, also consumed by downstream persistence/settlement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameOutcome {
    pub result: OutcomeResult,
    pub standings: Vec<StandingEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeResult {
    /// Match ran to a normal finish
    Completed,
    /// Cooperative loss (tower-defence castle fell)
    Failed,
    /// Room terminated abnormally (repeated simulation faults)
    Aborted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandingEntry {
    pub player_id: Uuid,
    pub name: String,
    pub score: i64,
    pub rank: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_msg_round_trips_tagged_json() {
        let msg = ClientMsg::PlayerInput {
            seq: 7,
            payload: IntentPayload::Shooter {
                move_x: 0.5,
                move_y: -0.5,
                aim_x: 1.0,
                aim_y: 0.0,
                fire: true,
            },
        };

        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"player_input\""));
        assert!(json.contains("\"game\":\"shooter\""));

        let back: ClientMsg = serde_json::from_str(&json).unwrap();
        match back {
            ClientMsg::PlayerInput { seq, payload } => {
                assert_eq!(seq, 7);
                assert_eq!(payload.kind(), GameKind::Shooter);
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn room_options_defaults_apply() {
        let msg: ClientMsg =
            serde_json::from_str(r#"{"type":"create_room","room_id":"R1","kind":"quiz"}"#).unwrap();

        match msg {
            ClientMsg::CreateRoom { config, .. } => {
                assert_eq!(config.max_players, 8);
                assert!(config.password.is_none());
                assert!(!config.host_participates);
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }
}
