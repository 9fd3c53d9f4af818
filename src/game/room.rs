//! Room lifecycle and the authoritative per-room tick loop
//!
//! Every room runs as its own tokio task. Session tasks never touch
//! simulation state directly: membership changes arrive over the command
//! channel and are applied at the tick boundary, inputs flow through the
//! intent register, and snapshots leave over the broadcast channel.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::interval;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::game::intents::{IntentLimits, IntentStore};
use crate::game::simulation::{
    build_simulation, tick_delta, tick_rate_hz, PlayerProfile, Simulation, TickCtx,
};
use crate::game::tower::{GRID_COLS, GRID_ROWS};
use crate::util::time::unix_millis;
use crate::ws::protocol::{
    GameKind, GameOutcome, OutcomeResult, PlayerPublic, RoomOptions, ServerMsg,
};

/// Client-chosen room identifier
pub type RoomId = String;

/// Colors assigned to slots by join order
const PLAYER_COLORS: [&str; 8] = [
    "#e6194b", "#3cb44b", "#4363d8", "#f58231", "#911eb4", "#46f0f0", "#f032e6", "#bcf60c",
];

const MAX_NAME_LEN: usize = 24;
const MAX_ROOM_ID_LEN: usize = 32;
const COMMAND_QUEUE_DEPTH: usize = 64;
const FRAME_QUEUE_DEPTH: usize = 256;

/// Room lifecycle status; transitions only ever move forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomStatus {
    Waiting,
    Playing,
    Finished,
}

/// Join failures, reported to the joining session only
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("room not found")]
    RoomNotFound,

    #[error("room is full")]
    RoomFull,

    #[error("wrong password")]
    WrongPassword,

    #[error("room is not accepting new players")]
    NotJoinable,

    #[error("that role is already bound")]
    RoleTaken,

    #[error("invalid player name")]
    NameInvalid,

    #[error("invalid room id")]
    RoomIdInvalid,
}

impl JoinError {
    /// Stable wire code for the error message
    pub fn code(&self) -> &'static str {
        match self {
            JoinError::RoomNotFound => "room_not_found",
            JoinError::RoomFull => "room_full",
            JoinError::WrongPassword => "wrong_password",
            JoinError::NotJoinable => "not_joinable",
            JoinError::RoleTaken => "role_taken",
            JoinError::NameInvalid => "invalid_name",
            JoinError::RoomIdInvalid => "invalid_room_id",
        }
    }
}

/// Slot liveness; a pending slot can be rebound until its deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Active,
    PendingRemoval { deadline_ms: u64 },
}

/// One player's seat in a room
#[derive(Debug, Clone)]
pub struct PlayerSlot {
    pub player_id: Uuid,
    pub name: String,
    pub color: String,
    pub status: SlotStatus,
}

impl PlayerSlot {
    fn profile(&self) -> PlayerProfile {
        PlayerProfile {
            player_id: self.player_id,
            name: self.name.clone(),
            color: self.color.clone(),
        }
    }
}

/// Successful controller bind
#[derive(Debug, Clone)]
pub struct JoinAck {
    pub room_id: RoomId,
    pub kind: GameKind,
    pub player_id: Uuid,
    pub player_name: String,
    pub color: String,
    pub reconnected: bool,
}

/// Successful display bind
#[derive(Debug, Clone)]
pub struct DisplayAck {
    pub room_id: RoomId,
    pub kind: GameKind,
    pub max_players: u32,
    /// The host's own slot when the room has host_participates set
    pub host_player_id: Option<Uuid>,
}

/// Commands queued by session tasks, drained at the tick boundary
pub enum RoomCommand {
    BindDisplay {
        reply: oneshot::Sender<Result<DisplayAck, JoinError>>,
    },
    DisplayClosed,
    Join {
        player_name: String,
        password: Option<String>,
        reconnect_id: Option<Uuid>,
        reply: oneshot::Sender<Result<JoinAck, JoinError>>,
    },
    Leave {
        player_id: Uuid,
    },
    Disconnect {
        player_id: Uuid,
    },
    Ready {
        player_id: Uuid,
        ready: bool,
    },
    Start,
    ScreenDimensions {
        width: f32,
        height: f32,
    },
    Close,
}

/// Handle to a running room, stored in the registry and cloned by sessions
#[derive(Clone)]
pub struct RoomHandle {
    pub room_id: RoomId,
    pub kind: GameKind,
    pub commands: mpsc::Sender<RoomCommand>,
    /// Pre-serialized frames; every session subscribes its own receiver
    pub frames: broadcast::Sender<Arc<str>>,
    pub intents: Arc<IntentStore>,
    /// Sessions currently bound (display + controllers), maintained by sessions
    pub bound_sessions: Arc<AtomicUsize>,
    /// Active (non-pending) slots, maintained by the room task
    pub player_count: Arc<AtomicUsize>,
}

/// Registry of all active rooms
pub struct RoomRegistry {
    config: Arc<Config>,
    rooms: DashMap<RoomId, RoomHandle>,
}

impl RoomRegistry {
    pub fn new(config: Arc<Config>) -> Arc<Self> {
        Arc::new(Self {
            config,
            rooms: DashMap::new(),
        })
    }

    /// Create a room or return the existing one. Duplicate create emissions
    /// from a reconnecting display must not reset a live room.
    pub fn create_or_get(
        self: &Arc<Self>,
        room_id: &str,
        kind: GameKind,
        options: RoomOptions,
    ) -> Result<(RoomHandle, bool), JoinError> {
        if !valid_room_id(room_id) {
            return Err(JoinError::RoomIdInvalid);
        }

        if let Some(existing) = self.rooms.get(room_id) {
            return Ok((existing.value().clone(), false));
        }

        let (room, handle) = GameRoom::new(
            room_id.to_string(),
            kind,
            options,
            Arc::clone(&self.config),
        );
        self.rooms.insert(room_id.to_string(), handle.clone());

        let registry = Arc::clone(self);
        let task_room_id = handle.room_id.clone();
        tokio::spawn(async move {
            room.run().await;
            registry.rooms.remove(&task_room_id);
            info!(room_id = %task_room_id, "Room removed from registry");
        });

        info!(room_id = %room_id, kind = ?kind, "Room created");
        Ok((handle, true))
    }

    pub fn get(&self, room_id: &str) -> Option<RoomHandle> {
        self.rooms.get(room_id).map(|r| r.value().clone())
    }

    pub fn active_rooms(&self) -> usize {
        self.rooms.len()
    }

    pub fn total_players(&self) -> usize {
        self.rooms
            .iter()
            .map(|r| r.value().player_count.load(Ordering::Relaxed))
            .sum()
    }
}

fn valid_room_id(room_id: &str) -> bool {
    !room_id.is_empty()
        && room_id.len() <= MAX_ROOM_ID_LEN
        && room_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// SHA-256 hex digest for room passwords; plaintext never stored
pub fn password_digest(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// Display session liveness from the room's perspective
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DisplayState {
    NeverAttached,
    Attached,
    Lost { since_ms: u64 },
}

/// The authoritative room: owns the simulation and all slot state
pub struct GameRoom {
    room_id: RoomId,
    kind: GameKind,
    options: RoomOptions,
    password_digest: Option<String>,
    config: Arc<Config>,

    status: RoomStatus,
    slots: Vec<PlayerSlot>,
    slots_created: u32,
    display: DisplayState,
    host_slot: Option<Uuid>,

    sim: Box<dyn Simulation>,
    tick: u64,
    consecutive_faults: u32,
    last_frame: Option<Arc<str>>,
    empty_since: Option<u64>,
    close_reason: Option<String>,

    commands: mpsc::Receiver<RoomCommand>,
    frames: broadcast::Sender<Arc<str>>,
    intents: Arc<IntentStore>,
    bound_sessions: Arc<AtomicUsize>,
    player_count: Arc<AtomicUsize>,
}

impl GameRoom {
    pub fn new(
        room_id: RoomId,
        kind: GameKind,
        options: RoomOptions,
        config: Arc<Config>,
    ) -> (Self, RoomHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (frame_tx, _) = broadcast::channel(FRAME_QUEUE_DEPTH);

        let intents = Arc::new(IntentStore::new(
            kind,
            IntentLimits {
                grid_cols: GRID_COLS,
                grid_rows: GRID_ROWS,
            },
        ));
        let bound_sessions = Arc::new(AtomicUsize::new(0));
        let player_count = Arc::new(AtomicUsize::new(0));

        let seed = rand::random::<u64>();
        let sim = build_simulation(kind, &options, seed);

        let handle = RoomHandle {
            room_id: room_id.clone(),
            kind,
            commands: command_tx,
            frames: frame_tx.clone(),
            intents: intents.clone(),
            bound_sessions: bound_sessions.clone(),
            player_count: player_count.clone(),
        };

        let password_digest = options
            .password
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(password_digest);

        let room = Self {
            room_id,
            kind,
            options,
            password_digest,
            config,
            status: RoomStatus::Waiting,
            slots: Vec::new(),
            slots_created: 0,
            display: DisplayState::NeverAttached,
            host_slot: None,
            sim,
            tick: 0,
            consecutive_faults: 0,
            last_frame: None,
            empty_since: None,
            close_reason: None,
            commands: command_rx,
            frames: frame_tx,
            intents,
            bound_sessions,
            player_count,
        };

        (room, handle)
    }

    /// Run the authoritative tick loop until the room closes
    pub async fn run(mut self) {
        info!(room_id = %self.room_id, kind = ?self.kind, "Room task started");

        let rate = tick_rate_hz(self.kind);
        let mut ticker = interval(Duration::from_micros(1_000_000 / rate as u64));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if !self.step(unix_millis()) {
                break;
            }
        }

        let reason = self
            .close_reason
            .take()
            .unwrap_or_else(|| "closed".to_string());
        self.publish(&ServerMsg::RoomClosed {
            reason: reason.clone(),
        });
        info!(room_id = %self.room_id, reason = %reason, "Room closed");
    }

    /// One loop iteration: membership first, then simulation, then lifecycle.
    /// Returns false when the room should shut down. Synchronous so the whole
    /// room behavior is testable without a clock.
    fn step(&mut self, now_ms: u64) -> bool {
        self.drain_commands(now_ms);
        self.expire_pending_slots(now_ms);

        if self.status == RoomStatus::Playing {
            if !self.simulate(now_ms) {
                return false;
            }
        }

        self.check_closure(now_ms)
    }

    fn drain_commands(&mut self, now_ms: u64) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                RoomCommand::BindDisplay { reply } => {
                    let result = self.bind_display(now_ms);
                    let _ = reply.send(result);
                }
                RoomCommand::DisplayClosed => {
                    if self.display == DisplayState::Attached {
                        self.display = DisplayState::Lost { since_ms: now_ms };
                        info!(room_id = %self.room_id, "Display lost, closure grace started");
                    }
                }
                RoomCommand::Join {
                    player_name,
                    password,
                    reconnect_id,
                    reply,
                } => {
                    let result = self.join(now_ms, player_name, password, reconnect_id);
                    let _ = reply.send(result);
                }
                RoomCommand::Leave { player_id } => self.remove_slot(player_id),
                RoomCommand::Disconnect { player_id } => self.mark_disconnected(now_ms, player_id),
                RoomCommand::Ready { player_id, ready } => {
                    self.sim.handle_ready(player_id, ready);
                }
                RoomCommand::Start => self.start_game(now_ms),
                RoomCommand::ScreenDimensions { width, height } => {
                    if self.status == RoomStatus::Waiting
                        && width.is_finite()
                        && height.is_finite()
                        && width > 0.0
                        && height > 0.0
                    {
                        self.options.world_width = width;
                        self.options.world_height = height;
                        self.sim.set_world_size(width, height);
                    }
                }
                RoomCommand::Close => {
                    self.close_reason = Some("closed by host".to_string());
                }
            }
        }
    }

    fn bind_display(&mut self, now_ms: u64) -> Result<DisplayAck, JoinError> {
        if self.display == DisplayState::Attached {
            return Err(JoinError::RoleTaken);
        }
        self.display = DisplayState::Attached;

        // A participating host gets a slot the moment the display binds
        if self.options.host_participates && self.host_slot.is_none() {
            let name = self
                .options
                .host_name
                .clone()
                .unwrap_or_else(|| "Host".to_string());
            if let Ok(ack) = self.insert_slot(now_ms, name) {
                self.host_slot = Some(ack.player_id);
            }
        }

        Ok(DisplayAck {
            room_id: self.room_id.clone(),
            kind: self.kind,
            max_players: self.options.max_players,
            host_player_id: self.host_slot,
        })
    }

    fn join(
        &mut self,
        now_ms: u64,
        player_name: String,
        password: Option<String>,
        reconnect_id: Option<Uuid>,
    ) -> Result<JoinAck, JoinError> {
        if let Some(player_id) = reconnect_id {
            if let Some(slot) = self.slots.iter_mut().find(|s| s.player_id == player_id) {
                match slot.status {
                    SlotStatus::PendingRemoval { .. } => {
                        slot.status = SlotStatus::Active;
                        let ack = JoinAck {
                            room_id: self.room_id.clone(),
                            kind: self.kind,
                            player_id: slot.player_id,
                            player_name: slot.name.clone(),
                            color: slot.color.clone(),
                            reconnected: true,
                        };
                        self.sync_player_count();
                        self.publish(&ServerMsg::PlayerReconnected { player_id });
                        info!(room_id = %self.room_id, player_id = %player_id, "Player reconnected");
                        return Ok(ack);
                    }
                    SlotStatus::Active => return Err(JoinError::RoleTaken),
                }
            }
            // Slot already expired; fall through to a fresh join
        }

        if self.status != RoomStatus::Waiting {
            return Err(JoinError::NotJoinable);
        }

        if let Some(digest) = &self.password_digest {
            let supplied = password.as_deref().unwrap_or_default();
            if password_digest(supplied) != *digest {
                return Err(JoinError::WrongPassword);
            }
        }

        self.insert_slot(now_ms, player_name)
    }

    fn insert_slot(&mut self, _now_ms: u64, player_name: String) -> Result<JoinAck, JoinError> {
        let name = player_name.trim().to_string();
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(JoinError::NameInvalid);
        }

        if self.slots.len() >= self.options.max_players as usize {
            return Err(JoinError::RoomFull);
        }

        let player_id = Uuid::new_v4();
        let color = PLAYER_COLORS[self.slots_created as usize % PLAYER_COLORS.len()].to_string();
        self.slots_created += 1;

        let slot = PlayerSlot {
            player_id,
            name: name.clone(),
            color: color.clone(),
            status: SlotStatus::Active,
        };
        self.intents.register_player(player_id);
        self.sim.handle_join(&slot.profile());
        self.publish(&ServerMsg::PlayerConnected {
            player: PlayerPublic {
                player_id,
                name: name.clone(),
                color: color.clone(),
            },
        });
        self.slots.push(slot);
        self.sync_player_count();

        info!(
            room_id = %self.room_id,
            player_id = %player_id,
            player_count = self.active_players(),
            "Player joined room"
        );

        Ok(JoinAck {
            room_id: self.room_id.clone(),
            kind: self.kind,
            player_id,
            player_name: name,
            color,
            reconnected: false,
        })
    }

    fn mark_disconnected(&mut self, now_ms: u64, player_id: Uuid) {
        let grace = self.config.reconnect_grace_ms;
        if let Some(slot) = self
            .slots
            .iter_mut()
            .find(|s| s.player_id == player_id && s.status == SlotStatus::Active)
        {
            slot.status = SlotStatus::PendingRemoval {
                deadline_ms: now_ms + grace,
            };
            self.sync_player_count();
            self.publish(&ServerMsg::PlayerDisconnected {
                player_id,
                removal_pending: true,
            });
            info!(room_id = %self.room_id, player_id = %player_id, "Player disconnected, grace started");
        }
    }

    fn remove_slot(&mut self, player_id: Uuid) {
        let before = self.slots.len();
        self.slots.retain(|s| s.player_id != player_id);
        if self.slots.len() == before {
            return;
        }
        self.intents.remove_player(player_id);
        self.sim.handle_leave(player_id);
        self.sync_player_count();
        self.publish(&ServerMsg::PlayerLeft { player_id });
        info!(room_id = %self.room_id, player_id = %player_id, "Player left room");
    }

    fn expire_pending_slots(&mut self, now_ms: u64) {
        let expired: Vec<Uuid> = self
            .slots
            .iter()
            .filter_map(|s| match s.status {
                SlotStatus::PendingRemoval { deadline_ms } if now_ms >= deadline_ms => {
                    Some(s.player_id)
                }
                _ => None,
            })
            .collect();
        for player_id in expired {
            self.remove_slot(player_id);
        }
    }

    fn start_game(&mut self, now_ms: u64) {
        if self.status != RoomStatus::Waiting {
            return;
        }
        if self.active_players() == 0 {
            return;
        }
        self.status = RoomStatus::Playing;
        self.sim.start(now_ms);
        self.publish(&ServerMsg::GameStarted { tick: self.tick });
        info!(room_id = %self.room_id, players = self.active_players(), "Game started");
    }

    /// Advance the simulation one tick. Returns false when the room must
    /// terminate (terminal outcome or repeated faults).
    fn simulate(&mut self, now_ms: u64) -> bool {
        self.tick += 1;
        let ctx = TickCtx {
            tick: self.tick,
            dt: tick_delta(self.kind),
            now_ms,
        };
        let intents = self.intents.drain_tick();

        let result = catch_unwind(AssertUnwindSafe(|| self.sim.tick(ctx, &intents)));

        match result {
            Ok(output) => {
                self.consecutive_faults = 0;
                let frame = self.publish(&ServerMsg::GameState {
                    tick: self.tick,
                    state: output.snapshot,
                    events: output.events,
                });
                self.last_frame = frame;

                if let Some(outcome) = self.sim.is_terminal() {
                    self.finish(outcome);
                    return false;
                }
                true
            }
            Err(_) => {
                self.consecutive_faults += 1;
                error!(
                    room_id = %self.room_id,
                    tick = self.tick,
                    faults = self.consecutive_faults,
                    "Simulation tick panicked"
                );

                if self.consecutive_faults >= self.config.max_consecutive_faults {
                    self.publish(&ServerMsg::Error {
                        code: "simulation_fault".to_string(),
                        message: "room terminated after repeated simulation faults".to_string(),
                    });
                    self.finish(GameOutcome {
                        result: OutcomeResult::Aborted,
                        standings: Vec::new(),
                    });
                    self.close_reason = Some("simulation fault".to_string());
                    return false;
                }

                // Repeat the last good snapshot so clients see a stall, not a gap
                if let Some(frame) = &self.last_frame {
                    let _ = self.frames.send(frame.clone());
                }
                true
            }
        }
    }

    fn finish(&mut self, outcome: GameOutcome) {
        self.status = RoomStatus::Finished;
        self.publish(&ServerMsg::GameOver { outcome });
        if self.close_reason.is_none() {
            self.close_reason = Some("finished".to_string());
        }
        info!(room_id = %self.room_id, tick = self.tick, "Game over");
    }

    /// Lifecycle checks that can end the room outside the simulation:
    /// explicit close, an abandoned display, or a long-empty room.
    fn check_closure(&mut self, now_ms: u64) -> bool {
        if self.close_reason.is_some() {
            return false;
        }

        if let DisplayState::Lost { since_ms } = self.display {
            if now_ms.saturating_sub(since_ms) >= self.config.reconnect_grace_ms {
                self.close_reason = Some("display left".to_string());
                return false;
            }
        }

        if self.bound_sessions.load(Ordering::Relaxed) == 0 {
            let since = *self.empty_since.get_or_insert(now_ms);
            if now_ms.saturating_sub(since) >= self.config.empty_room_grace_ms {
                self.close_reason = Some("abandoned".to_string());
                return false;
            }
        } else {
            self.empty_since = None;
        }

        true
    }

    fn active_players(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.status == SlotStatus::Active)
            .count()
    }

    fn sync_player_count(&self) {
        self.player_count
            .store(self.active_players(), Ordering::Relaxed);
    }

    /// Serialize once, fan out to every subscribed session. Returns the
    /// frame so snapshots can be replayed after a fault.
    fn publish(&self, msg: &ServerMsg) -> Option<Arc<str>> {
        match serde_json::to_string(msg) {
            Ok(json) => {
                let frame: Arc<str> = Arc::from(json);
                let _ = self.frames.send(frame.clone());
                Some(frame)
            }
            Err(e) => {
                warn!(room_id = %self.room_id, error = %e, "Failed to serialize frame");
                None
            }
        }
    }
}
