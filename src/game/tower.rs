//! Tower-defence simulation - wave economy, tower fire, castle health

use std::collections::HashMap;

use uuid::Uuid;

use crate::game::intents::TickIntents;
use crate::game::simulation::{PlayerProfile, Simulation, TickCtx, TickOutput};
use crate::ws::protocol::{
    CellView, GameEvent, GameOutcome, GameSnapshot, IntentPayload, MobView, OutcomeResult,
    RoomOptions, StandingEntry, TowerCommand, TowerKind, TowerState, TowerView,
};

pub const GRID_COLS: u32 = 16;
pub const GRID_ROWS: u32 = 9;

const STARTING_GOLD: u32 = 120;
const STARTING_CASTLE_HEALTH: i32 = 100;
const FIRST_WAVE_DELAY_MS: u64 = 5_000;
const INTERMISSION_MS: u64 = 8_000;
const SPAWN_INTERVAL_MS: u64 = 900;
const MOB_DAMAGE: i32 = 5;
const SLOW_FACTOR: f32 = 0.5;
const SLOW_DURATION_MS: u64 = 1_500;
const MAX_TOWER_LEVEL: u32 = 3;

#[derive(Debug, Clone, Copy)]
struct TowerStats {
    cost: u32,
    upgrade_cost: u32,
    damage: f32,
    range: f32,
    cooldown: f32,
    slows: bool,
}

impl TowerStats {
    fn for_kind(kind: TowerKind, level: u32) -> Self {
        let base = match kind {
            TowerKind::Cannon => Self {
                cost: 50,
                upgrade_cost: 40,
                damage: 20.0,
                range: 2.5,
                cooldown: 0.8,
                slows: false,
            },
            TowerKind::Frost => Self {
                cost: 40,
                upgrade_cost: 35,
                damage: 6.0,
                range: 2.2,
                cooldown: 1.0,
                slows: true,
            },
        };
        // Each level adds 60% damage and a little reach
        let scale = 1.0 + 0.6 * (level.saturating_sub(1)) as f32;
        Self {
            damage: base.damage * scale,
            range: base.range + 0.3 * (level.saturating_sub(1)) as f32,
            ..base
        }
    }
}

#[derive(Debug, Clone)]
struct Tower {
    id: u32,
    kind: TowerKind,
    col: u32,
    row: u32,
    level: u32,
    owner: Uuid,
    cooldown_remaining: f32,
}

#[derive(Debug, Clone)]
struct Mob {
    id: u32,
    health: f32,
    max_health: f32,
    speed: f32,
    /// Distance travelled along the route in cell units
    progress: f32,
    bounty: u32,
    slow_until: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WavePhase {
    /// Counting down to the next wave
    Intermission { until: u64 },
    /// Spawning and fighting the current wave
    Active,
    /// Run is decided
    Done,
}

/// Cooperative wave-defence state machine on a fixed serpentine route
pub struct TowerGame {
    waves_total: u32,
    wave: u32,
    phase: WavePhase,
    gold: u32,
    castle_health: i32,
    path: Vec<CellView>,

    towers: Vec<Tower>,
    mobs: Vec<Mob>,
    to_spawn: u32,
    next_spawn_at: u64,

    players: HashMap<Uuid, PlayerProfile>,
    /// Bounty credited to the owner of the killing tower
    scores: HashMap<Uuid, u32>,

    next_entity_id: u32,
    outcome: Option<GameOutcome>,
}

impl TowerGame {
    pub fn new(options: &RoomOptions) -> Self {
        Self {
            waves_total: options.waves.max(1),
            wave: 0,
            phase: WavePhase::Intermission { until: u64::MAX },
            gold: STARTING_GOLD,
            castle_health: STARTING_CASTLE_HEALTH,
            path: build_path(),
            towers: Vec::new(),
            mobs: Vec::new(),
            to_spawn: 0,
            next_spawn_at: 0,
            players: HashMap::new(),
            scores: HashMap::new(),
            next_entity_id: 1,
            outcome: None,
        }
    }

    fn alloc_id(&mut self) -> u32 {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        id
    }

    fn route_length(&self) -> f32 {
        (self.path.len() - 1) as f32
    }

    /// Interpolated position along the route in cell coordinates
    fn mob_position(&self, progress: f32) -> (f32, f32) {
        let clamped = progress.clamp(0.0, self.route_length());
        let index = (clamped.floor() as usize).min(self.path.len() - 2);
        let frac = clamped - index as f32;
        let a = self.path[index];
        let b = self.path[index + 1];
        (
            a.col as f32 + (b.col as f32 - a.col as f32) * frac,
            a.row as f32 + (b.row as f32 - a.row as f32) * frac,
        )
    }

    fn on_path(&self, col: u32, row: u32) -> bool {
        self.path.iter().any(|c| c.col == col && c.row == row)
    }

    fn occupied(&self, col: u32, row: u32) -> bool {
        self.towers.iter().any(|t| t.col == col && t.row == row)
    }

    fn apply_commands(&mut self, intents: &TickIntents, events: &mut Vec<GameEvent>) {
        for (player_id, intent) in intents {
            let IntentPayload::TowerDefence { command } = &intent.payload else {
                continue;
            };
            if !self.players.contains_key(player_id) {
                continue;
            }
            match command {
                TowerCommand::Build { tower, col, row } => {
                    let stats = TowerStats::for_kind(*tower, 1);
                    if *col >= GRID_COLS
                        || *row >= GRID_ROWS
                        || self.on_path(*col, *row)
                        || self.occupied(*col, *row)
                        || self.gold < stats.cost
                    {
                        continue; // invalid orders are dropped, gold untouched
                    }
                    self.gold -= stats.cost;
                    let id = self.alloc_id();
                    self.towers.push(Tower {
                        id,
                        kind: *tower,
                        col: *col,
                        row: *row,
                        level: 1,
                        owner: *player_id,
                        cooldown_remaining: 0.0,
                    });
                    events.push(GameEvent::TowerBuilt {
                        tower_id: id,
                        player_id: *player_id,
                    });
                }
                TowerCommand::Upgrade { tower_id } => {
                    let Some(tower) = self.towers.iter_mut().find(|t| t.id == *tower_id) else {
                        continue;
                    };
                    if tower.level >= MAX_TOWER_LEVEL {
                        continue;
                    }
                    let stats = TowerStats::for_kind(tower.kind, tower.level);
                    if self.gold < stats.upgrade_cost {
                        continue;
                    }
                    self.gold -= stats.upgrade_cost;
                    tower.level += 1;
                    events.push(GameEvent::TowerUpgraded {
                        tower_id: tower.id,
                        level: tower.level,
                    });
                }
            }
        }
    }

    fn advance_waves(&mut self, now_ms: u64, events: &mut Vec<GameEvent>) {
        match self.phase {
            WavePhase::Intermission { until } => {
                if now_ms >= until {
                    self.wave += 1;
                    self.to_spawn = 4 + 3 * self.wave;
                    self.next_spawn_at = now_ms;
                    self.phase = WavePhase::Active;
                    events.push(GameEvent::WaveStarted { wave: self.wave });
                }
            }
            WavePhase::Active => {
                if self.to_spawn > 0 && now_ms >= self.next_spawn_at {
                    let wave = self.wave;
                    let id = self.alloc_id();
                    let health = 30.0 * 1.25_f32.powi(wave as i32 - 1);
                    self.mobs.push(Mob {
                        id,
                        health,
                        max_health: health,
                        speed: 1.2 + 0.05 * wave as f32,
                        progress: 0.0,
                        bounty: 8 + 2 * wave,
                        slow_until: 0,
                    });
                    self.to_spawn -= 1;
                    self.next_spawn_at = now_ms + SPAWN_INTERVAL_MS;
                }

                if self.to_spawn == 0 && self.mobs.is_empty() {
                    events.push(GameEvent::WaveCleared { wave: self.wave });
                    if self.wave >= self.waves_total {
                        self.phase = WavePhase::Done;
                        self.outcome = Some(self.make_outcome(OutcomeResult::Completed));
                    } else {
                        self.phase = WavePhase::Intermission {
                            until: now_ms + INTERMISSION_MS,
                        };
                    }
                }
            }
            WavePhase::Done => {}
        }
    }

    fn advance_mobs(&mut self, dt: f32, now_ms: u64, events: &mut Vec<GameEvent>) {
        let route_len = self.route_length();
        let mut arrived: Vec<u32> = Vec::new();

        for mob in &mut self.mobs {
            let speed = if now_ms < mob.slow_until {
                mob.speed * SLOW_FACTOR
            } else {
                mob.speed
            };
            mob.progress += speed * dt;
            if mob.progress >= route_len {
                arrived.push(mob.id);
            }
        }

        for mob_id in arrived {
            self.mobs.retain(|m| m.id != mob_id);
            self.castle_health -= MOB_DAMAGE;
            events.push(GameEvent::CastleDamaged {
                damage: MOB_DAMAGE,
                health: self.castle_health,
            });
            if self.castle_health <= 0 && self.outcome.is_none() {
                self.phase = WavePhase::Done;
                self.outcome = Some(self.make_outcome(OutcomeResult::Failed));
            }
        }
    }

    fn fire_towers(&mut self, dt: f32, now_ms: u64, events: &mut Vec<GameEvent>) {
        let mob_positions: Vec<(u32, f32, f32, f32)> = self
            .mobs
            .iter()
            .map(|m| {
                let (x, y) = self.mob_position(m.progress);
                (m.id, x, y, m.progress)
            })
            .collect();

        let mut shots: Vec<(u32, u32)> = Vec::new(); // (tower_id, mob_id)
        for tower in &mut self.towers {
            tower.cooldown_remaining = (tower.cooldown_remaining - dt).max(0.0);
            if tower.cooldown_remaining > 0.0 {
                continue;
            }
            let stats = TowerStats::for_kind(tower.kind, tower.level);
            let tx = tower.col as f32 + 0.5;
            let ty = tower.row as f32 + 0.5;

            // Prefer the mob closest to the castle
            let target = mob_positions
                .iter()
                .filter(|(_, x, y, _)| {
                    let dx = x - tx;
                    let dy = y - ty;
                    (dx * dx + dy * dy).sqrt() <= stats.range
                })
                .max_by(|a, b| a.3.total_cmp(&b.3));

            if let Some((mob_id, _, _, _)) = target {
                shots.push((tower.id, *mob_id));
                tower.cooldown_remaining = stats.cooldown;
            }
        }

        for (tower_id, mob_id) in shots {
            let Some(tower) = self.towers.iter().find(|t| t.id == tower_id) else {
                continue;
            };
            let stats = TowerStats::for_kind(tower.kind, tower.level);
            let owner = tower.owner;
            let Some(mob) = self.mobs.iter_mut().find(|m| m.id == mob_id) else {
                continue;
            };
            mob.health -= stats.damage;
            if stats.slows {
                mob.slow_until = now_ms + SLOW_DURATION_MS;
            }
            if mob.health <= 0.0 {
                let bounty = mob.bounty;
                self.mobs.retain(|m| m.id != mob_id);
                self.gold += bounty;
                *self.scores.entry(owner).or_insert(0) += bounty;
                events.push(GameEvent::MobKilled { mob_id, tower_id });
            }
        }
    }

    fn make_outcome(&self, result: OutcomeResult) -> GameOutcome {
        let mut standings: Vec<StandingEntry> = self
            .players
            .values()
            .map(|p| StandingEntry {
                player_id: p.player_id,
                name: p.name.clone(),
                score: *self.scores.get(&p.player_id).unwrap_or(&0) as i64,
                rank: 0,
            })
            .collect();
        standings.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.name.cmp(&b.name)));
        for (i, entry) in standings.iter_mut().enumerate() {
            entry.rank = (i + 1) as u32;
        }
        GameOutcome { result, standings }
    }

    fn build_snapshot(&self, now_ms: u64) -> GameSnapshot {
        GameSnapshot::TowerDefence(TowerState {
            grid_cols: GRID_COLS,
            grid_rows: GRID_ROWS,
            castle_health: self.castle_health,
            gold: self.gold,
            wave: self.wave,
            waves_total: self.waves_total,
            intermission_ms: match self.phase {
                WavePhase::Intermission { until } if until != u64::MAX => {
                    Some(until.saturating_sub(now_ms))
                }
                _ => None,
            },
            towers: self
                .towers
                .iter()
                .map(|t| TowerView {
                    tower_id: t.id,
                    kind: t.kind,
                    col: t.col,
                    row: t.row,
                    level: t.level,
                    cooldown_ms: (t.cooldown_remaining * 1_000.0) as u64,
                })
                .collect(),
            mobs: self
                .mobs
                .iter()
                .map(|m| {
                    let (x, y) = self.mob_position(m.progress);
                    MobView {
                        mob_id: m.id,
                        x,
                        y,
                        health: m.health,
                        max_health: m.max_health,
                        slowed: now_ms < m.slow_until,
                    }
                })
                .collect(),
            path: self.path.clone(),
        })
    }
}

impl Simulation for TowerGame {
    fn handle_join(&mut self, profile: &PlayerProfile) {
        self.players.insert(profile.player_id, profile.clone());
    }

    fn handle_leave(&mut self, player_id: Uuid) {
        self.players.remove(&player_id);
        // Their towers keep defending; the run is cooperative
    }

    fn start(&mut self, now_ms: u64) {
        self.phase = WavePhase::Intermission {
            until: now_ms + FIRST_WAVE_DELAY_MS,
        };
    }

    fn tick(&mut self, ctx: TickCtx, intents: &TickIntents) -> TickOutput {
        let mut events = Vec::new();

        self.apply_commands(intents, &mut events);
        self.advance_waves(ctx.now_ms, &mut events);
        self.fire_towers(ctx.dt, ctx.now_ms, &mut events);
        self.advance_mobs(ctx.dt, ctx.now_ms, &mut events);

        TickOutput {
            snapshot: self.build_snapshot(ctx.now_ms),
            events,
        }
    }

    fn is_terminal(&self) -> Option<GameOutcome> {
        self.outcome.clone()
    }
}

/// Serpentine route across the grid; the last cell is the castle gate.
/// Towers may occupy any non-route cell.
fn build_path() -> Vec<CellView> {
    let mut path = Vec::new();
    for col in 0..GRID_COLS {
        path.push(CellView { col, row: 1 });
    }
    for row in 2..=4 {
        path.push(CellView {
            col: GRID_COLS - 1,
            row,
        });
    }
    for col in (0..GRID_COLS - 1).rev() {
        path.push(CellView { col, row: 4 });
    }
    for row in 5..=7 {
        path.push(CellView { col: 0, row });
    }
    for col in 1..GRID_COLS {
        path.push(CellView { col, row: 7 });
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::intents::StampedIntent;

    fn profile(name: &str) -> PlayerProfile {
        PlayerProfile {
            player_id: Uuid::new_v4(),
            name: name.to_string(),
            color: "#f58231".to_string(),
        }
    }

    fn ctx(now_ms: u64) -> TickCtx {
        TickCtx {
            tick: 0,
            dt: 0.125,
            now_ms,
        }
    }

    fn command(cmd: TowerCommand) -> StampedIntent {
        StampedIntent {
            seq: 1,
            payload: IntentPayload::TowerDefence { command: cmd },
            received_at: 0,
        }
    }

    fn new_game(waves: u32) -> TowerGame {
        TowerGame::new(&RoomOptions {
            waves,
            ..RoomOptions::default()
        })
    }

    #[test]
    fn build_deducts_gold_and_places_tower() {
        let mut game = new_game(5);
        let p = profile("builder");
        game.handle_join(&p);
        game.start(1_000);

        let mut intents = TickIntents::new();
        intents.insert(
            p.player_id,
            command(TowerCommand::Build {
                tower: TowerKind::Cannon,
                col: 3,
                row: 2,
            }),
        );
        let out = game.tick(ctx(1_125), &intents);

        assert_eq!(game.towers.len(), 1);
        assert_eq!(game.gold, STARTING_GOLD - 50);
        assert!(out
            .events
            .iter()
            .any(|e| matches!(e, GameEvent::TowerBuilt { .. })));
    }

    #[test]
    fn build_on_route_is_rejected() {
        let mut game = new_game(5);
        let p = profile("blocker");
        game.handle_join(&p);
        game.start(1_000);

        let mut intents = TickIntents::new();
        intents.insert(
            p.player_id,
            command(TowerCommand::Build {
                tower: TowerKind::Cannon,
                col: 5,
                row: 1, // row 1 is route
            }),
        );
        game.tick(ctx(1_125), &intents);

        assert!(game.towers.is_empty());
        assert_eq!(game.gold, STARTING_GOLD);
    }

    #[test]
    fn upgrade_costs_gold_and_raises_level() {
        let mut game = new_game(5);
        let p = profile("upgrader");
        game.handle_join(&p);
        game.start(1_000);

        let mut intents = TickIntents::new();
        intents.insert(
            p.player_id,
            command(TowerCommand::Build {
                tower: TowerKind::Frost,
                col: 3,
                row: 2,
            }),
        );
        game.tick(ctx(1_125), &intents);
        let tower_id = game.towers[0].id;

        let mut intents = TickIntents::new();
        intents.insert(p.player_id, command(TowerCommand::Upgrade { tower_id }));
        let out = game.tick(ctx(1_250), &intents);

        assert_eq!(game.towers[0].level, 2);
        assert_eq!(game.gold, STARTING_GOLD - 40 - 35);
        assert!(out
            .events
            .iter()
            .any(|e| matches!(e, GameEvent::TowerUpgraded { level: 2, .. })));
    }

    #[test]
    fn unobstructed_mobs_drain_castle_health_to_failure() {
        let mut game = new_game(1);
        let p = profile("watcher");
        game.handle_join(&p);
        game.start(0);

        // Hand-place a full wave at the castle gate, no towers built
        game.phase = WavePhase::Active;
        game.wave = 1;
        game.to_spawn = 0;
        let route_len = game.route_length();
        for _ in 0..20 {
            let id = game.alloc_id();
            game.mobs.push(Mob {
                id,
                health: 30.0,
                max_health: 30.0,
                speed: 1.2,
                progress: route_len - 0.01,
                bounty: 10,
                slow_until: 0,
            });
        }

        let mut last_health = game.castle_health;
        let mut now = 1_000;
        while game.outcome.is_none() && now < 60_000 {
            let out = game.tick(ctx(now), &TickIntents::new());
            for event in out.events {
                if let GameEvent::CastleDamaged { health, .. } = event {
                    assert!(health < last_health, "castle health must strictly decrease");
                    last_health = health;
                }
            }
            now += 125;
        }

        assert!(game.castle_health <= 0);
        let outcome = game.is_terminal().expect("run should have failed");
        assert_eq!(outcome.result, OutcomeResult::Failed);
    }

    #[test]
    fn cannon_clears_mobs_and_awards_bounty() {
        let mut game = new_game(1);
        let p = profile("gunner");
        game.handle_join(&p);
        game.start(0);

        game.towers.push(Tower {
            id: 900,
            kind: TowerKind::Cannon,
            col: 2,
            row: 2,
            level: 3,
            owner: p.player_id,
            cooldown_remaining: 0.0,
        });
        game.phase = WavePhase::Active;
        game.wave = 1;
        game.to_spawn = 0;
        game.mobs.push(Mob {
            id: 901,
            health: 30.0,
            max_health: 30.0,
            speed: 0.0, // pinned in range of the tower at (2,2)
            progress: 2.0,
            bounty: 10,
            slow_until: 0,
        });

        let gold_before = game.gold;
        let mut killed = false;
        for i in 0..40 {
            let out = game.tick(ctx(1_000 + i * 125), &TickIntents::new());
            if out
                .events
                .iter()
                .any(|e| matches!(e, GameEvent::MobKilled { mob_id: 901, .. }))
            {
                killed = true;
                break;
            }
        }

        assert!(killed, "tower in range should kill the pinned mob");
        assert_eq!(game.gold, gold_before + 10);
        assert_eq!(game.scores[&p.player_id], 10);
    }

    #[test]
    fn clearing_final_wave_completes_the_run() {
        let mut game = new_game(1);
        let p = profile("finisher");
        game.handle_join(&p);
        game.start(0);

        game.phase = WavePhase::Active;
        game.wave = 1;
        game.to_spawn = 0;
        // No mobs alive and nothing left to spawn -> wave cleared

        let out = game.tick(ctx(1_000), &TickIntents::new());

        assert!(out
            .events
            .iter()
            .any(|e| matches!(e, GameEvent::WaveCleared { wave: 1 })));
        let outcome = game.is_terminal().expect("run should be complete");
        assert_eq!(outcome.result, OutcomeResult::Completed);
    }
}
