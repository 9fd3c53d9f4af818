//! Race simulation - vehicle model, ordered checkpoints, laps, ranking

use std::collections::HashMap;

use uuid::Uuid;

use crate::game::intents::TickIntents;
use crate::game::simulation::{PlayerProfile, Simulation, TickCtx, TickOutput};
use crate::ws::protocol::{
    CheckpointView, GameEvent, GameOutcome, GameSnapshot, IntentPayload, OutcomeResult,
    RaceState, RacerView, RectView, RoomOptions, StandingEntry,
};

const ACCELERATION: f32 = 260.0;
const MAX_SPEED: f32 = 340.0;
const MAX_REVERSE: f32 = 80.0;
const DRAG: f32 = 0.985;
const TURN_RATE: f32 = 2.8;
const SAND_MAX_SPEED: f32 = 120.0;
const CAR_RADIUS: f32 = 14.0;
const CHECKPOINT_RADIUS: f32 = 70.0;
const BOUNCE_FACTOR: f32 = -0.3;
const COLLISION_EVENT_COOLDOWN: f32 = 0.5;

#[derive(Debug, Clone)]
struct Racer {
    profile: PlayerProfile,
    x: f32,
    y: f32,
    heading: f32,
    speed: f32,
    accelerate: f32,
    turn: f32,
    lap: u32,
    next_checkpoint: u32,
    /// Total in-order checkpoint crossings, the progress metric for ranking
    crossed_total: u32,
    /// Unix millis of the latest in-order crossing
    last_crossed_at: u64,
    lap_started_at: u64,
    last_lap_ms: Option<u64>,
    collision_cooldown: f32,
    in_sand: bool,
}

#[derive(Debug, Clone, Copy)]
struct Checkpoint {
    x: f32,
    y: f32,
    radius: f32,
}

/// Checkpoint race state machine on a ring track around a center island
pub struct RaceGame {
    world_width: f32,
    world_height: f32,
    laps_total: u32,
    match_ms: u64,
    started_at: Option<u64>,

    players: HashMap<Uuid, Racer>,
    checkpoints: Vec<Checkpoint>,
    island: RectView,
    sand: Vec<RectView>,
    join_order: u32,
    outcome: Option<GameOutcome>,
}

impl RaceGame {
    pub fn new(options: &RoomOptions) -> Self {
        let mut game = Self {
            world_width: options.world_width,
            world_height: options.world_height,
            laps_total: options.laps,
            match_ms: options.match_secs as u64 * 1_000,
            started_at: None,
            players: HashMap::new(),
            checkpoints: Vec::new(),
            island: RectView {
                x: 0.0,
                y: 0.0,
                width: 0.0,
                height: 0.0,
            },
            sand: Vec::new(),
            join_order: 0,
            outcome: None,
        };
        game.build_track();
        game
    }

    /// Ring track: outer walls are the world bounds, the island blocks the
    /// middle, four checkpoints sit at the lane midpoints. The final
    /// checkpoint doubles as the start/finish line.
    fn build_track(&mut self) {
        let w = self.world_width;
        let h = self.world_height;

        self.island = RectView {
            x: w * 0.28,
            y: h * 0.32,
            width: w * 0.44,
            height: h * 0.36,
        };

        self.checkpoints = vec![
            Checkpoint {
                x: w * 0.86,
                y: h * 0.5,
                radius: CHECKPOINT_RADIUS,
            },
            Checkpoint {
                x: w * 0.5,
                y: h * 0.14,
                radius: CHECKPOINT_RADIUS,
            },
            Checkpoint {
                x: w * 0.14,
                y: h * 0.5,
                radius: CHECKPOINT_RADIUS,
            },
            Checkpoint {
                x: w * 0.5,
                y: h * 0.86,
                radius: CHECKPOINT_RADIUS,
            },
        ];

        self.sand = vec![
            RectView {
                x: w * 0.05,
                y: h * 0.05,
                width: w * 0.16,
                height: h * 0.16,
            },
            RectView {
                x: w * 0.79,
                y: h * 0.79,
                width: w * 0.16,
                height: h * 0.16,
            },
        ];
    }

    /// Staggered grid slots behind the start/finish checkpoint, facing +x
    fn spawn_slot(&self, order: u32) -> (f32, f32) {
        let base_x = self.world_width * 0.42;
        let base_y = self.world_height * 0.86;
        let col = order % 2;
        let row = order / 2;
        (
            base_x - row as f32 * 40.0,
            base_y - 16.0 + col as f32 * 32.0,
        )
    }

    fn apply_intents(&mut self, intents: &TickIntents) {
        for (player_id, intent) in intents {
            let Some(racer) = self.players.get_mut(player_id) else {
                continue;
            };
            if let IntentPayload::Race { accelerate, turn } = intent.payload {
                racer.accelerate = accelerate;
                racer.turn = turn;
            }
        }
    }

    fn step_vehicles(&mut self, dt: f32, events: &mut Vec<GameEvent>) {
        let (w, h) = (self.world_width, self.world_height);
        let island = self.island;
        let sand = self.sand.clone();

        for racer in self.players.values_mut() {
            racer.collision_cooldown = (racer.collision_cooldown - dt).max(0.0);

            racer.speed += racer.accelerate * ACCELERATION * dt;
            racer.speed *= DRAG;
            racer.speed = racer.speed.clamp(-MAX_REVERSE, MAX_SPEED);

            racer.in_sand = sand
                .iter()
                .any(|s| point_in_rect(racer.x, racer.y, s));
            if racer.in_sand {
                racer.speed = racer.speed.clamp(-SAND_MAX_SPEED, SAND_MAX_SPEED);
            }

            // Steering authority grows with speed so a parked car cannot spin
            let steer_scale = (racer.speed / MAX_SPEED).clamp(-1.0, 1.0);
            racer.heading += racer.turn * TURN_RATE * steer_scale * dt;
            racer.heading = racer.heading.rem_euclid(std::f32::consts::TAU);

            let next_x = racer.x + racer.heading.cos() * racer.speed * dt;
            let next_y = racer.y + racer.heading.sin() * racer.speed * dt;

            let out_of_bounds = next_x < CAR_RADIUS
                || next_x > w - CAR_RADIUS
                || next_y < CAR_RADIUS
                || next_y > h - CAR_RADIUS;
            let hits_island = circle_rect_overlap(next_x, next_y, CAR_RADIUS, &island);

            if out_of_bounds || hits_island {
                racer.speed *= BOUNCE_FACTOR;
                if racer.collision_cooldown <= 0.0 {
                    events.push(GameEvent::Collision {
                        player_id: racer.profile.player_id,
                    });
                    racer.collision_cooldown = COLLISION_EVENT_COOLDOWN;
                }
            } else {
                racer.x = next_x;
                racer.y = next_y;
            }
        }
    }

    fn cross_checkpoints(&mut self, now_ms: u64, events: &mut Vec<GameEvent>) {
        let checkpoints = self.checkpoints.clone();
        let total = checkpoints.len() as u32;

        for racer in self.players.values_mut() {
            let next = racer.next_checkpoint;
            let cp = checkpoints[next as usize];
            let dx = racer.x - cp.x;
            let dy = racer.y - cp.y;
            if dx * dx + dy * dy > cp.radius * cp.radius {
                // Crossing any other checkpoint out of order is silently ignored
                continue;
            }

            racer.crossed_total += 1;
            racer.last_crossed_at = now_ms;
            events.push(GameEvent::CheckpointPassed {
                player_id: racer.profile.player_id,
                checkpoint: next,
            });

            if next + 1 == total {
                racer.lap += 1;
                racer.next_checkpoint = 0;
                let lap_ms = now_ms.saturating_sub(racer.lap_started_at);
                racer.last_lap_ms = Some(lap_ms);
                racer.lap_started_at = now_ms;
                events.push(GameEvent::LapCompleted {
                    player_id: racer.profile.player_id,
                    lap: racer.lap,
                    lap_ms,
                });
            } else {
                racer.next_checkpoint = next + 1;
            }
        }
    }

    /// Rank by laps, then checkpoint progress, then earliest arrival at the
    /// furthest checkpoint. Returns player ids best-first.
    fn ranking(&self) -> Vec<Uuid> {
        let mut rows: Vec<(&Racer, Uuid)> = self
            .players
            .values()
            .map(|r| (r, r.profile.player_id))
            .collect();
        rows.sort_by(|(a, _), (b, _)| {
            b.crossed_total
                .cmp(&a.crossed_total)
                .then_with(|| a.last_crossed_at.cmp(&b.last_crossed_at))
                .then_with(|| a.profile.name.cmp(&b.profile.name))
        });
        rows.into_iter().map(|(_, id)| id).collect()
    }

    fn check_terminal(&mut self, now_ms: u64) {
        if self.outcome.is_some() {
            return;
        }
        let finished = self.players.values().any(|r| r.lap >= self.laps_total);
        let timed_out = self
            .started_at
            .map(|t| now_ms.saturating_sub(t) >= self.match_ms)
            .unwrap_or(false);
        if finished || timed_out {
            let order = self.ranking();
            let standings = order
                .iter()
                .enumerate()
                .map(|(i, id)| {
                    let racer = &self.players[id];
                    StandingEntry {
                        player_id: *id,
                        name: racer.profile.name.clone(),
                        score: racer.crossed_total as i64,
                        rank: (i + 1) as u32,
                    }
                })
                .collect();
            self.outcome = Some(GameOutcome {
                result: OutcomeResult::Completed,
                standings,
            });
        }
    }

    fn build_snapshot(&self, now_ms: u64) -> GameSnapshot {
        let order = self.ranking();
        let rank_of = |id: Uuid| -> u32 {
            order
                .iter()
                .position(|x| *x == id)
                .map(|i| (i + 1) as u32)
                .unwrap_or(0)
        };

        GameSnapshot::Race(RaceState {
            world_width: self.world_width,
            world_height: self.world_height,
            players: self
                .players
                .values()
                .map(|r| RacerView {
                    player_id: r.profile.player_id,
                    name: r.profile.name.clone(),
                    color: r.profile.color.clone(),
                    x: r.x,
                    y: r.y,
                    heading: r.heading,
                    speed: r.speed,
                    lap: r.lap,
                    next_checkpoint: r.next_checkpoint,
                    rank: rank_of(r.profile.player_id),
                    in_sand: r.in_sand,
                    last_lap_ms: r.last_lap_ms,
                })
                .collect(),
            checkpoints: self
                .checkpoints
                .iter()
                .enumerate()
                .map(|(i, cp)| CheckpointView {
                    index: i as u32,
                    x: cp.x,
                    y: cp.y,
                    radius: cp.radius,
                })
                .collect(),
            barriers: vec![self.island],
            sand: self.sand.clone(),
            laps_total: self.laps_total,
            remaining_ms: match self.started_at {
                Some(t) => self.match_ms.saturating_sub(now_ms.saturating_sub(t)),
                None => self.match_ms,
            },
        })
    }
}

impl Simulation for RaceGame {
    fn handle_join(&mut self, profile: &PlayerProfile) {
        let (x, y) = self.spawn_slot(self.join_order);
        self.join_order += 1;
        self.players.insert(
            profile.player_id,
            Racer {
                profile: profile.clone(),
                x,
                y,
                heading: 0.0,
                speed: 0.0,
                accelerate: 0.0,
                turn: 0.0,
                lap: 0,
                next_checkpoint: 0,
                crossed_total: 0,
                last_crossed_at: 0,
                lap_started_at: 0,
                last_lap_ms: None,
                collision_cooldown: 0.0,
                in_sand: false,
            },
        );
    }

    fn handle_leave(&mut self, player_id: Uuid) {
        self.players.remove(&player_id);
    }

    fn set_world_size(&mut self, width: f32, height: f32) {
        self.world_width = width.max(320.0);
        self.world_height = height.max(240.0);
        self.build_track();
        let slots: Vec<Uuid> = self.players.keys().copied().collect();
        for (i, id) in slots.into_iter().enumerate() {
            let (x, y) = self.spawn_slot(i as u32);
            if let Some(racer) = self.players.get_mut(&id) {
                racer.x = x;
                racer.y = y;
            }
        }
    }

    fn start(&mut self, now_ms: u64) {
        self.started_at = Some(now_ms);
        for racer in self.players.values_mut() {
            racer.lap_started_at = now_ms;
        }
    }

    fn tick(&mut self, ctx: TickCtx, intents: &TickIntents) -> TickOutput {
        let mut events = Vec::new();

        self.apply_intents(intents);
        self.step_vehicles(ctx.dt, &mut events);
        self.cross_checkpoints(ctx.now_ms, &mut events);
        self.check_terminal(ctx.now_ms);

        TickOutput {
            snapshot: self.build_snapshot(ctx.now_ms),
            events,
        }
    }

    fn is_terminal(&self) -> Option<GameOutcome> {
        self.outcome.clone()
    }
}

fn point_in_rect(x: f32, y: f32, rect: &RectView) -> bool {
    x >= rect.x && x <= rect.x + rect.width && y >= rect.y && y <= rect.y + rect.height
}

fn circle_rect_overlap(cx: f32, cy: f32, radius: f32, rect: &RectView) -> bool {
    let nearest_x = cx.clamp(rect.x, rect.x + rect.width);
    let nearest_y = cy.clamp(rect.y, rect.y + rect.height);
    let dx = cx - nearest_x;
    let dy = cy - nearest_y;
    dx * dx + dy * dy <= radius * radius
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::intents::StampedIntent;

    fn profile(name: &str) -> PlayerProfile {
        PlayerProfile {
            player_id: Uuid::new_v4(),
            name: name.to_string(),
            color: "#3cb44b".to_string(),
        }
    }

    fn ctx(tick: u64, now_ms: u64) -> TickCtx {
        TickCtx {
            tick,
            dt: 1.0 / 60.0,
            now_ms,
        }
    }

    fn throttle(accelerate: f32, turn: f32) -> StampedIntent {
        StampedIntent {
            seq: 1,
            payload: IntentPayload::Race { accelerate, turn },
            received_at: 0,
        }
    }

    fn new_game() -> RaceGame {
        RaceGame::new(&RoomOptions::default())
    }

    /// Teleport a racer onto a checkpoint center
    fn put_on_checkpoint(game: &mut RaceGame, player_id: Uuid, index: usize) {
        let cp = game.checkpoints[index];
        let racer = game.players.get_mut(&player_id).unwrap();
        racer.x = cp.x;
        racer.y = cp.y;
    }

    #[test]
    fn accelerating_moves_the_car() {
        let mut game = new_game();
        let p = profile("driver");
        game.handle_join(&p);
        game.start(1_000);

        let start_x = game.players[&p.player_id].x;
        let mut intents = TickIntents::new();
        intents.insert(p.player_id, throttle(1.0, 0.0));

        for tick in 0..60 {
            game.tick(ctx(tick, 1_000 + tick * 16), &intents);
        }

        assert!(game.players[&p.player_id].x > start_x + 50.0);
    }

    #[test]
    fn out_of_order_checkpoint_is_ignored() {
        let mut game = new_game();
        let p = profile("skipper");
        game.handle_join(&p);
        game.start(1_000);

        // Standing on checkpoint 1 while 0 is still due must not count
        put_on_checkpoint(&mut game, p.player_id, 1);
        game.tick(ctx(0, 1_016), &TickIntents::new());
        assert_eq!(game.players[&p.player_id].next_checkpoint, 0);
        assert_eq!(game.players[&p.player_id].crossed_total, 0);

        put_on_checkpoint(&mut game, p.player_id, 0);
        game.tick(ctx(1, 1_032), &TickIntents::new());
        assert_eq!(game.players[&p.player_id].next_checkpoint, 1);
        assert_eq!(game.players[&p.player_id].crossed_total, 1);
    }

    #[test]
    fn ordered_crossings_complete_a_lap() {
        let mut game = new_game();
        let p = profile("lapper");
        game.handle_join(&p);
        game.start(1_000);

        let mut lap_event = None;
        for i in 0..game.checkpoints.len() {
            put_on_checkpoint(&mut game, p.player_id, i);
            let out = game.tick(ctx(i as u64, 1_000 + (i as u64 + 1) * 500), &TickIntents::new());
            for event in out.events {
                if let GameEvent::LapCompleted { lap, lap_ms, .. } = event {
                    lap_event = Some((lap, lap_ms));
                }
            }
        }

        assert_eq!(game.players[&p.player_id].lap, 1);
        assert_eq!(game.players[&p.player_id].next_checkpoint, 0);
        let (lap, lap_ms) = lap_event.expect("lap completion event");
        assert_eq!(lap, 1);
        assert!(lap_ms > 0);
    }

    #[test]
    fn rank_orders_by_progress_then_arrival() {
        let mut game = new_game();
        let fast = profile("fast");
        let slow = profile("slow");
        let tied = profile("tied");
        game.handle_join(&fast);
        game.handle_join(&slow);
        game.handle_join(&tied);
        game.start(1_000);

        // fast: two crossings; slow: one late crossing; tied: one early crossing
        {
            let r = game.players.get_mut(&fast.player_id).unwrap();
            r.crossed_total = 2;
            r.last_crossed_at = 4_000;
        }
        {
            let r = game.players.get_mut(&slow.player_id).unwrap();
            r.crossed_total = 1;
            r.last_crossed_at = 5_000;
        }
        {
            let r = game.players.get_mut(&tied.player_id).unwrap();
            r.crossed_total = 1;
            r.last_crossed_at = 2_000;
        }

        let order = game.ranking();
        assert_eq!(order[0], fast.player_id);
        assert_eq!(order[1], tied.player_id, "earlier arrival wins the tie");
        assert_eq!(order[2], slow.player_id);
    }

    #[test]
    fn sand_caps_speed() {
        let mut game = new_game();
        let p = profile("sandy");
        game.handle_join(&p);
        game.start(1_000);

        let sand = game.sand[0];
        {
            let racer = game.players.get_mut(&p.player_id).unwrap();
            racer.x = sand.x + sand.width / 2.0;
            racer.y = sand.y + sand.height / 2.0;
            racer.speed = MAX_SPEED;
        }

        let mut intents = TickIntents::new();
        intents.insert(p.player_id, throttle(1.0, 0.0));
        game.tick(ctx(0, 1_016), &intents);

        let racer = &game.players[&p.player_id];
        assert!(racer.in_sand);
        assert!(racer.speed <= SAND_MAX_SPEED);
    }

    #[test]
    fn finishing_laps_ends_the_race() {
        let mut game = new_game();
        let p = profile("winner");
        game.handle_join(&p);
        game.start(1_000);
        game.players.get_mut(&p.player_id).unwrap().lap = game.laps_total;

        game.tick(ctx(0, 2_000), &TickIntents::new());

        let outcome = game.is_terminal().expect("race should be over");
        assert_eq!(outcome.result, OutcomeResult::Completed);
        assert_eq!(outcome.standings[0].player_id, p.player_id);
    }
}
