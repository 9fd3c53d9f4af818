//! Arena shooter simulation - movement, bots, bullets, timed effects

use std::collections::HashMap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use uuid::Uuid;

use crate::game::intents::TickIntents;
use crate::game::simulation::{PlayerProfile, Simulation, TickCtx, TickOutput};
use crate::ws::protocol::{
    BotView, BulletView, EffectKind, EffectView, GameEvent, GameOutcome, GameSnapshot,
    IntentPayload, OutcomeResult, PickupView, RectView, RoomOptions, ShooterPlayerView,
    ShooterState, StandingEntry,
};

const PLAYER_SPEED: f32 = 220.0;
const PLAYER_RADIUS: f32 = 16.0;
const PLAYER_MAX_HEALTH: f32 = 100.0;
const SPEED_BOOST_MULT: f32 = 1.6;

const FIRE_COOLDOWN: f32 = 0.25;
const BULLET_SPEED: f32 = 500.0;
const BULLET_DAMAGE: f32 = 20.0;
const BULLET_LIFETIME: f32 = 1.5;
const BULLET_RADIUS: f32 = 4.0;

const RESPAWN_DELAY_MS: u64 = 3_000;
const SPAWN_SHIELD_MS: u64 = 2_000;
const SHIELD_PICKUP_MS: u64 = 5_000;
const SPEED_PICKUP_MS: u64 = 6_000;

const BOT_COUNT: usize = 3;
const BOT_PATROL_SPEED: f32 = 110.0;
const BOT_CHASE_SPEED: f32 = 165.0;
const BOT_MAX_HEALTH: f32 = 60.0;
const BOT_RADIUS: f32 = 18.0;
const BOT_SIGHT_RADIUS: f32 = 260.0;
const BOT_CONTACT_DAMAGE: f32 = 10.0;
const BOT_CONTACT_COOLDOWN: f32 = 1.0;
const BOT_RESPAWN_MS: u64 = 5_000;
const WAYPOINT_REACHED: f32 = 12.0;

const PICKUP_INTERVAL_MS: u64 = 8_000;
const PICKUP_RADIUS: f32 = 14.0;
const MAX_PICKUPS: usize = 3;

#[derive(Debug, Clone)]
struct ActiveEffect {
    kind: EffectKind,
    ends_at: u64,
}

#[derive(Debug, Clone)]
struct PlayerUnit {
    profile: PlayerProfile,
    x: f32,
    y: f32,
    aim_x: f32,
    aim_y: f32,
    move_x: f32,
    move_y: f32,
    fire: bool,
    health: f32,
    alive: bool,
    respawn_at: Option<u64>,
    fire_cooldown: f32,
    score: u32,
    effects: Vec<ActiveEffect>,
}

impl PlayerUnit {
    fn has_effect(&self, kind: EffectKind) -> bool {
        self.effects.iter().any(|e| e.kind == kind)
    }

    fn speed(&self) -> f32 {
        if self.has_effect(EffectKind::SpeedBoost) {
            PLAYER_SPEED * SPEED_BOOST_MULT
        } else {
            PLAYER_SPEED
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BotMode {
    Patrol,
    Chasing,
}

#[derive(Debug, Clone)]
struct Bot {
    id: u32,
    x: f32,
    y: f32,
    health: f32,
    mode: BotMode,
    waypoint: usize,
    contact_cooldown: f32,
    respawn_at: Option<u64>,
}

#[derive(Debug, Clone)]
struct Bullet {
    id: u32,
    owner: Uuid,
    x: f32,
    y: f32,
    vel_x: f32,
    vel_y: f32,
    ttl: f32,
}

#[derive(Debug, Clone)]
struct Pickup {
    id: u32,
    kind: EffectKind,
    x: f32,
    y: f32,
}

/// Arena shooter state machine
pub struct ShooterGame {
    world_width: f32,
    world_height: f32,
    target_score: u32,
    match_ms: u64,
    started_at: Option<u64>,

    players: HashMap<Uuid, PlayerUnit>,
    bots: Vec<Bot>,
    bullets: Vec<Bullet>,
    obstacles: Vec<RectView>,
    pickups: Vec<Pickup>,
    waypoints: Vec<(f32, f32)>,

    next_entity_id: u32,
    last_pickup_at: u64,
    rng: ChaCha8Rng,
    outcome: Option<GameOutcome>,
}

impl ShooterGame {
    pub fn new(options: &RoomOptions, seed: u64) -> Self {
        let mut game = Self {
            world_width: options.world_width,
            world_height: options.world_height,
            target_score: options.target_score,
            match_ms: options.match_secs as u64 * 1_000,
            started_at: None,
            players: HashMap::new(),
            bots: Vec::new(),
            bullets: Vec::new(),
            obstacles: Vec::new(),
            pickups: Vec::new(),
            waypoints: Vec::new(),
            next_entity_id: 1,
            last_pickup_at: 0,
            rng: ChaCha8Rng::seed_from_u64(seed),
            outcome: None,
        };
        game.build_arena();
        game.spawn_bots();
        game
    }

    fn alloc_id(&mut self) -> u32 {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        id
    }

    /// Obstacles and bot patrol routes scale with the world rectangle
    fn build_arena(&mut self) {
        let w = self.world_width;
        let h = self.world_height;

        self.obstacles = vec![
            RectView {
                x: w * 0.25,
                y: h * 0.3,
                width: w * 0.08,
                height: h * 0.4,
            },
            RectView {
                x: w * 0.67,
                y: h * 0.3,
                width: w * 0.08,
                height: h * 0.4,
            },
            RectView {
                x: w * 0.42,
                y: h * 0.45,
                width: w * 0.16,
                height: h * 0.1,
            },
        ];

        self.waypoints = vec![
            (w * 0.15, h * 0.15),
            (w * 0.85, h * 0.15),
            (w * 0.85, h * 0.85),
            (w * 0.15, h * 0.85),
        ];
    }

    fn spawn_bots(&mut self) {
        self.bots.clear();
        for i in 0..BOT_COUNT {
            let (x, y) = self.waypoints[i % self.waypoints.len()];
            let id = self.alloc_id();
            self.bots.push(Bot {
                id,
                x,
                y,
                health: BOT_MAX_HEALTH,
                mode: BotMode::Patrol,
                waypoint: (i + 1) % self.waypoints.len(),
                contact_cooldown: 0.0,
                respawn_at: None,
            });
        }
    }

    /// Random position clear of obstacles
    fn free_position(&mut self) -> (f32, f32) {
        for _ in 0..32 {
            let x = self.rng.gen_range(PLAYER_RADIUS..self.world_width - PLAYER_RADIUS);
            let y = self.rng.gen_range(PLAYER_RADIUS..self.world_height - PLAYER_RADIUS);
            if !self
                .obstacles
                .iter()
                .any(|o| circle_rect_overlap(x, y, PLAYER_RADIUS * 2.0, o))
            {
                return (x, y);
            }
        }
        (self.world_width / 2.0, self.world_height / 2.0)
    }

    fn apply_intents(&mut self, intents: &TickIntents) {
        for (player_id, intent) in intents {
            let Some(player) = self.players.get_mut(player_id) else {
                continue;
            };
            if let IntentPayload::Shooter {
                move_x,
                move_y,
                aim_x,
                aim_y,
                fire,
            } = intent.payload
            {
                player.move_x = move_x;
                player.move_y = move_y;
                player.aim_x = aim_x;
                player.aim_y = aim_y;
                player.fire = fire;
            }
        }
    }

    fn move_players(&mut self, dt: f32) {
        let obstacles = self.obstacles.clone();
        let (w, h) = (self.world_width, self.world_height);

        for player in self.players.values_mut() {
            if !player.alive {
                continue;
            }
            let speed = player.speed();
            let step_x = player.move_x * speed * dt;
            let step_y = player.move_y * speed * dt;

            // Axis-separated resolution so walls slide instead of stick
            let try_x = (player.x + step_x).clamp(PLAYER_RADIUS, w - PLAYER_RADIUS);
            if !obstacles
                .iter()
                .any(|o| circle_rect_overlap(try_x, player.y, PLAYER_RADIUS, o))
            {
                player.x = try_x;
            }
            let try_y = (player.y + step_y).clamp(PLAYER_RADIUS, h - PLAYER_RADIUS);
            if !obstacles
                .iter()
                .any(|o| circle_rect_overlap(player.x, try_y, PLAYER_RADIUS, o))
            {
                player.y = try_y;
            }
        }
    }

    fn fire_bullets(&mut self, dt: f32) {
        let mut spawned = Vec::new();
        for player in self.players.values_mut() {
            player.fire_cooldown = (player.fire_cooldown - dt).max(0.0);
            if !player.alive || !player.fire || player.fire_cooldown > 0.0 {
                continue;
            }
            let len = (player.aim_x * player.aim_x + player.aim_y * player.aim_y).sqrt();
            if len < 0.1 {
                continue;
            }
            let dir_x = player.aim_x / len;
            let dir_y = player.aim_y / len;
            spawned.push(Bullet {
                id: 0,
                owner: player.profile.player_id,
                x: player.x + dir_x * (PLAYER_RADIUS + BULLET_RADIUS + 1.0),
                y: player.y + dir_y * (PLAYER_RADIUS + BULLET_RADIUS + 1.0),
                vel_x: dir_x * BULLET_SPEED,
                vel_y: dir_y * BULLET_SPEED,
                ttl: BULLET_LIFETIME,
            });
            player.fire_cooldown = FIRE_COOLDOWN;
        }
        for mut bullet in spawned {
            bullet.id = self.alloc_id();
            self.bullets.push(bullet);
        }
    }

    fn advance_bullets(&mut self, dt: f32, now_ms: u64, events: &mut Vec<GameEvent>) {
        let (w, h) = (self.world_width, self.world_height);
        let obstacles = self.obstacles.clone();

        for bullet in &mut self.bullets {
            bullet.x += bullet.vel_x * dt;
            bullet.y += bullet.vel_y * dt;
            bullet.ttl -= dt;
            if bullet.x < 0.0 || bullet.x > w || bullet.y < 0.0 || bullet.y > h {
                bullet.ttl = 0.0;
            }
            if obstacles
                .iter()
                .any(|o| circle_rect_overlap(bullet.x, bullet.y, BULLET_RADIUS, o))
            {
                bullet.ttl = 0.0;
            }
        }
        self.bullets.retain(|b| b.ttl > 0.0);

        // Bullet vs player
        let mut hits: Vec<(u32, Uuid, Uuid)> = Vec::new();
        for bullet in &self.bullets {
            for player in self.players.values() {
                if !player.alive || player.profile.player_id == bullet.owner {
                    continue;
                }
                if dist(bullet.x, bullet.y, player.x, player.y) <= BULLET_RADIUS + PLAYER_RADIUS {
                    hits.push((bullet.id, bullet.owner, player.profile.player_id));
                    break;
                }
            }
        }
        for (bullet_id, shooter, target) in hits {
            self.bullets.retain(|b| b.id != bullet_id);
            let shielded = self
                .players
                .get(&target)
                .map(|p| p.has_effect(EffectKind::Shield))
                .unwrap_or(false);
            if shielded {
                continue;
            }
            let mut killed = false;
            if let Some(victim) = self.players.get_mut(&target) {
                victim.health = (victim.health - BULLET_DAMAGE).max(0.0);
                events.push(GameEvent::PlayerHit {
                    attacker_id: Some(shooter),
                    target_id: target,
                    damage: BULLET_DAMAGE,
                });
                if victim.health <= 0.0 {
                    victim.alive = false;
                    victim.respawn_at = Some(now_ms + RESPAWN_DELAY_MS);
                    killed = true;
                }
            }
            if killed {
                events.push(GameEvent::PlayerKilled {
                    killer_id: Some(shooter),
                    victim_id: target,
                });
                if let Some(killer) = self.players.get_mut(&shooter) {
                    killer.score += 1;
                }
            }
        }

        // Bullet vs bot
        let mut bot_hits: Vec<(u32, u32, Uuid)> = Vec::new();
        for bullet in &self.bullets {
            for bot in &self.bots {
                if bot.respawn_at.is_some() {
                    continue;
                }
                if dist(bullet.x, bullet.y, bot.x, bot.y) <= BULLET_RADIUS + BOT_RADIUS {
                    bot_hits.push((bullet.id, bot.id, bullet.owner));
                    break;
                }
            }
        }
        for (bullet_id, bot_id, shooter) in bot_hits {
            self.bullets.retain(|b| b.id != bullet_id);
            let Some(bot) = self.bots.iter_mut().find(|b| b.id == bot_id) else {
                continue;
            };
            bot.health -= BULLET_DAMAGE;
            if bot.health <= 0.0 {
                bot.respawn_at = Some(now_ms + BOT_RESPAWN_MS);
                events.push(GameEvent::BotKilled {
                    bot_id,
                    killer_id: shooter,
                });
                if let Some(killer) = self.players.get_mut(&shooter) {
                    killer.score += 1;
                }
            }
        }
    }

    fn advance_bots(&mut self, dt: f32, now_ms: u64, events: &mut Vec<GameEvent>) {
        let alive_players: Vec<(Uuid, f32, f32)> = self
            .players
            .values()
            .filter(|p| p.alive)
            .map(|p| (p.profile.player_id, p.x, p.y))
            .collect();

        let mut contacts: Vec<Uuid> = Vec::new();
        for bot in &mut self.bots {
            if let Some(at) = bot.respawn_at {
                if now_ms >= at {
                    bot.respawn_at = None;
                    bot.health = BOT_MAX_HEALTH;
                    bot.mode = BotMode::Patrol;
                    let (x, y) = self.waypoints[bot.waypoint];
                    bot.x = x;
                    bot.y = y;
                }
                continue;
            }

            bot.contact_cooldown = (bot.contact_cooldown - dt).max(0.0);

            let nearest = alive_players
                .iter()
                .map(|(id, x, y)| (*id, *x, *y, dist(bot.x, bot.y, *x, *y)))
                .min_by(|a, b| a.3.total_cmp(&b.3));

            let (target_x, target_y, speed) = match nearest {
                Some((_, px, py, d)) if d <= BOT_SIGHT_RADIUS => {
                    bot.mode = BotMode::Chasing;
                    (px, py, BOT_CHASE_SPEED)
                }
                _ => {
                    bot.mode = BotMode::Patrol;
                    let (wx, wy) = self.waypoints[bot.waypoint];
                    if dist(bot.x, bot.y, wx, wy) < WAYPOINT_REACHED {
                        bot.waypoint = (bot.waypoint + 1) % self.waypoints.len();
                    }
                    let (wx, wy) = self.waypoints[bot.waypoint];
                    (wx, wy, BOT_PATROL_SPEED)
                }
            };

            let dx = target_x - bot.x;
            let dy = target_y - bot.y;
            let d = (dx * dx + dy * dy).sqrt();
            if d > 1.0 {
                bot.x += dx / d * speed * dt;
                bot.y += dy / d * speed * dt;
            }

            if bot.contact_cooldown <= 0.0 {
                if let Some((pid, _, _, d)) = nearest {
                    if d <= BOT_RADIUS + PLAYER_RADIUS {
                        contacts.push(pid);
                        bot.contact_cooldown = BOT_CONTACT_COOLDOWN;
                    }
                }
            }
        }

        for target in contacts {
            let shielded = self
                .players
                .get(&target)
                .map(|p| p.has_effect(EffectKind::Shield))
                .unwrap_or(true);
            if shielded {
                continue;
            }
            let mut killed = false;
            if let Some(victim) = self.players.get_mut(&target) {
                victim.health = (victim.health - BOT_CONTACT_DAMAGE).max(0.0);
                events.push(GameEvent::PlayerHit {
                    attacker_id: None,
                    target_id: target,
                    damage: BOT_CONTACT_DAMAGE,
                });
                if victim.health <= 0.0 {
                    victim.alive = false;
                    victim.respawn_at = Some(now_ms + RESPAWN_DELAY_MS);
                    killed = true;
                }
            }
            if killed {
                events.push(GameEvent::PlayerKilled {
                    killer_id: None,
                    victim_id: target,
                });
            }
        }
    }

    fn update_effects_and_respawns(&mut self, now_ms: u64, events: &mut Vec<GameEvent>) {
        let mut respawned: Vec<Uuid> = Vec::new();
        for player in self.players.values_mut() {
            player.effects.retain(|e| e.ends_at > now_ms);
            if let Some(at) = player.respawn_at {
                if now_ms >= at {
                    respawned.push(player.profile.player_id);
                }
            }
        }
        for player_id in respawned {
            let (x, y) = self.free_position();
            if let Some(player) = self.players.get_mut(&player_id) {
                player.x = x;
                player.y = y;
                player.health = PLAYER_MAX_HEALTH;
                player.alive = true;
                player.respawn_at = None;
                player.effects.push(ActiveEffect {
                    kind: EffectKind::Shield,
                    ends_at: now_ms + SPAWN_SHIELD_MS,
                });
                events.push(GameEvent::PlayerRespawned { player_id });
            }
        }
    }

    fn update_pickups(&mut self, now_ms: u64, events: &mut Vec<GameEvent>) {
        if self.pickups.len() < MAX_PICKUPS
            && now_ms.saturating_sub(self.last_pickup_at) >= PICKUP_INTERVAL_MS
        {
            let kind = if self.rng.gen_bool(0.5) {
                EffectKind::Shield
            } else {
                EffectKind::SpeedBoost
            };
            let (x, y) = self.free_position();
            let id = self.alloc_id();
            self.pickups.push(Pickup { id, kind, x, y });
            self.last_pickup_at = now_ms;
        }

        let mut taken: Vec<(u32, Uuid, EffectKind)> = Vec::new();
        for pickup in &self.pickups {
            for player in self.players.values() {
                if player.alive
                    && dist(pickup.x, pickup.y, player.x, player.y)
                        <= PICKUP_RADIUS + PLAYER_RADIUS
                {
                    taken.push((pickup.id, player.profile.player_id, pickup.kind));
                    break;
                }
            }
        }
        for (pickup_id, player_id, kind) in taken {
            self.pickups.retain(|p| p.id != pickup_id);
            let duration = match kind {
                EffectKind::Shield => SHIELD_PICKUP_MS,
                EffectKind::SpeedBoost => SPEED_PICKUP_MS,
            };
            if let Some(player) = self.players.get_mut(&player_id) {
                player.effects.retain(|e| e.kind != kind);
                player.effects.push(ActiveEffect {
                    kind,
                    ends_at: now_ms + duration,
                });
                events.push(GameEvent::PickupTaken { player_id, kind });
            }
        }
    }

    fn check_terminal(&mut self, now_ms: u64) {
        if self.outcome.is_some() {
            return;
        }
        let score_reached = self.players.values().any(|p| p.score >= self.target_score);
        let timed_out = self
            .started_at
            .map(|t| now_ms.saturating_sub(t) >= self.match_ms)
            .unwrap_or(false);
        if score_reached || timed_out {
            self.outcome = Some(GameOutcome {
                result: OutcomeResult::Completed,
                standings: standings_by_score(
                    self.players
                        .values()
                        .map(|p| (p.profile.clone(), p.score as i64)),
                ),
            });
        }
    }

    fn remaining_ms(&self, now_ms: u64) -> u64 {
        match self.started_at {
            Some(t) => self.match_ms.saturating_sub(now_ms.saturating_sub(t)),
            None => self.match_ms,
        }
    }

    fn build_snapshot(&self, now_ms: u64) -> GameSnapshot {
        GameSnapshot::Shooter(ShooterState {
            world_width: self.world_width,
            world_height: self.world_height,
            players: self
                .players
                .values()
                .map(|p| ShooterPlayerView {
                    player_id: p.profile.player_id,
                    name: p.profile.name.clone(),
                    color: p.profile.color.clone(),
                    x: p.x,
                    y: p.y,
                    aim_x: p.aim_x,
                    aim_y: p.aim_y,
                    health: p.health,
                    alive: p.alive,
                    score: p.score,
                    effects: p
                        .effects
                        .iter()
                        .map(|e| EffectView {
                            kind: e.kind,
                            ends_at: e.ends_at,
                        })
                        .collect(),
                })
                .collect(),
            bots: self
                .bots
                .iter()
                .filter(|b| b.respawn_at.is_none())
                .map(|b| BotView {
                    bot_id: b.id,
                    x: b.x,
                    y: b.y,
                    health: b.health,
                    chasing: b.mode == BotMode::Chasing,
                })
                .collect(),
            bullets: self
                .bullets
                .iter()
                .map(|b| BulletView {
                    bullet_id: b.id,
                    x: b.x,
                    y: b.y,
                })
                .collect(),
            obstacles: self.obstacles.clone(),
            pickups: self
                .pickups
                .iter()
                .map(|p| PickupView {
                    pickup_id: p.id,
                    kind: p.kind,
                    x: p.x,
                    y: p.y,
                })
                .collect(),
            remaining_ms: self.remaining_ms(now_ms),
        })
    }
}

impl Simulation for ShooterGame {
    fn handle_join(&mut self, profile: &PlayerProfile) {
        let (x, y) = self.free_position();
        self.players.insert(
            profile.player_id,
            PlayerUnit {
                profile: profile.clone(),
                x,
                y,
                aim_x: 0.0,
                aim_y: 0.0,
                move_x: 0.0,
                move_y: 0.0,
                fire: false,
                health: PLAYER_MAX_HEALTH,
                alive: true,
                respawn_at: None,
                fire_cooldown: 0.0,
                score: 0,
                effects: Vec::new(),
            },
        );
    }

    fn handle_leave(&mut self, player_id: Uuid) {
        self.players.remove(&player_id);
        self.bullets.retain(|b| b.owner != player_id);
    }

    fn set_world_size(&mut self, width: f32, height: f32) {
        self.world_width = width.max(320.0);
        self.world_height = height.max(240.0);
        self.build_arena();
        self.spawn_bots();
        let positions: Vec<(Uuid, (f32, f32))> = self
            .players
            .keys()
            .copied()
            .collect::<Vec<_>>()
            .into_iter()
            .map(|id| (id, self.free_position()))
            .collect();
        for (id, (x, y)) in positions {
            if let Some(player) = self.players.get_mut(&id) {
                player.x = x;
                player.y = y;
            }
        }
    }

    fn start(&mut self, now_ms: u64) {
        self.started_at = Some(now_ms);
        self.last_pickup_at = now_ms;
        for player in self.players.values_mut() {
            player.effects.push(ActiveEffect {
                kind: EffectKind::Shield,
                ends_at: now_ms + SPAWN_SHIELD_MS,
            });
        }
    }

    fn tick(&mut self, ctx: TickCtx, intents: &TickIntents) -> TickOutput {
        let mut events = Vec::new();

        self.apply_intents(intents);
        self.move_players(ctx.dt);
        self.fire_bullets(ctx.dt);
        self.advance_bullets(ctx.dt, ctx.now_ms, &mut events);
        self.advance_bots(ctx.dt, ctx.now_ms, &mut events);
        self.update_effects_and_respawns(ctx.now_ms, &mut events);
        self.update_pickups(ctx.now_ms, &mut events);
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

/// Shared standings builder: score descending, rank is 1-based position
pub(super) fn standings_by_score(
    entries: impl Iterator<Item = (PlayerProfile, i64)>,
) -> Vec<StandingEntry> {
    let mut rows: Vec<(PlayerProfile, i64)> = entries.collect();
    rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.name.cmp(&b.0.name)));
    rows.into_iter()
        .enumerate()
        .map(|(i, (profile, score))| StandingEntry {
            player_id: profile.player_id,
            name: profile.name,
            score,
            rank: (i + 1) as u32,
        })
        .collect()
}

fn dist(x1: f32, y1: f32, x2: f32, y2: f32) -> f32 {
    let dx = x2 - x1;
    let dy = y2 - y1;
    (dx * dx + dy * dy).sqrt()
}

/// Circle vs axis-aligned rectangle overlap
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
            color: "#e6194b".to_string(),
        }
    }

    fn movement(move_x: f32, move_y: f32) -> IntentPayload {
        IntentPayload::Shooter {
            move_x,
            move_y,
            aim_x: 0.0,
            aim_y: 0.0,
            fire: false,
        }
    }

    fn ctx(tick: u64, now_ms: u64) -> TickCtx {
        TickCtx {
            tick,
            dt: 1.0 / 60.0,
            now_ms,
        }
    }

    fn new_game() -> ShooterGame {
        ShooterGame::new(&RoomOptions::default(), 42)
    }

    #[test]
    fn two_players_move_apart_from_spawn() {
        let mut game = new_game();
        let p1 = profile("ann");
        let p2 = profile("bob");
        game.handle_join(&p1);
        game.handle_join(&p2);
        game.start(1_000);

        let spawn1 = (game.players[&p1.player_id].x, game.players[&p1.player_id].y);
        let spawn2 = (game.players[&p2.player_id].x, game.players[&p2.player_id].y);

        let mut intents = TickIntents::new();
        intents.insert(
            p1.player_id,
            StampedIntent {
                seq: 1,
                payload: movement(1.0, 0.0),
                received_at: 1_000,
            },
        );
        intents.insert(
            p2.player_id,
            StampedIntent {
                seq: 1,
                payload: movement(0.0, 1.0),
                received_at: 1_000,
            },
        );

        for tick in 0..30 {
            game.tick(ctx(tick, 1_000 + tick * 16), &intents);
        }

        let pos1 = (game.players[&p1.player_id].x, game.players[&p1.player_id].y);
        let pos2 = (game.players[&p2.player_id].x, game.players[&p2.player_id].y);
        assert_ne!(pos1, spawn1);
        assert_ne!(pos2, spawn2);
        assert_ne!(pos1, pos2);
    }

    #[test]
    fn bullet_kill_scores_and_schedules_respawn() {
        let mut game = new_game();
        game.obstacles.clear();
        game.bots.clear();
        let shooter = profile("shooter");
        let target = profile("target");
        game.handle_join(&shooter);
        game.handle_join(&target);

        // Face the players at close range on an empty arena
        {
            let s = game.players.get_mut(&shooter.player_id).unwrap();
            s.x = 100.0;
            s.y = 100.0;
        }
        {
            let t = game.players.get_mut(&target.player_id).unwrap();
            t.x = 220.0;
            t.y = 100.0;
            t.health = BULLET_DAMAGE; // one hit kills
        }
        game.start(1_000);
        // Spawn shields would absorb the hit
        for p in game.players.values_mut() {
            p.effects.clear();
        }

        let mut intents = TickIntents::new();
        intents.insert(
            shooter.player_id,
            StampedIntent {
                seq: 1,
                payload: IntentPayload::Shooter {
                    move_x: 0.0,
                    move_y: 0.0,
                    aim_x: 1.0,
                    aim_y: 0.0,
                    fire: true,
                },
                received_at: 1_000,
            },
        );

        let mut killed = false;
        for tick in 0..60 {
            let out = game.tick(ctx(tick, 1_000 + tick * 16), &intents);
            if out.events.iter().any(|e| {
                matches!(e, GameEvent::PlayerKilled { victim_id, .. } if *victim_id == target.player_id)
            }) {
                killed = true;
                break;
            }
        }

        assert!(killed, "target should die within a second of fire");
        assert_eq!(game.players[&shooter.player_id].score, 1);
        assert!(game.players[&target.player_id].respawn_at.is_some());
    }

    #[test]
    fn shield_blocks_bullet_damage() {
        let mut game = new_game();
        game.obstacles.clear();
        game.bots.clear();
        let shooter = profile("shooter");
        let target = profile("target");
        game.handle_join(&shooter);
        game.handle_join(&target);
        {
            let s = game.players.get_mut(&shooter.player_id).unwrap();
            s.x = 100.0;
            s.y = 100.0;
        }
        {
            let t = game.players.get_mut(&target.player_id).unwrap();
            t.x = 220.0;
            t.y = 100.0;
            t.effects.push(ActiveEffect {
                kind: EffectKind::Shield,
                ends_at: u64::MAX,
            });
        }
        game.start(1_000);
        game.players
            .get_mut(&shooter.player_id)
            .unwrap()
            .effects
            .clear();

        let mut intents = TickIntents::new();
        intents.insert(
            shooter.player_id,
            StampedIntent {
                seq: 1,
                payload: IntentPayload::Shooter {
                    move_x: 0.0,
                    move_y: 0.0,
                    aim_x: 1.0,
                    aim_y: 0.0,
                    fire: true,
                },
                received_at: 1_000,
            },
        );

        for tick in 0..60 {
            game.tick(ctx(tick, 1_000 + tick * 16), &intents);
        }

        assert_eq!(game.players[&target.player_id].health, PLAYER_MAX_HEALTH);
    }

    #[test]
    fn obstacle_blocks_movement() {
        let mut game = new_game();
        game.bots.clear();
        let p = profile("runner");
        game.handle_join(&p);

        let wall = game.obstacles[0];
        {
            let unit = game.players.get_mut(&p.player_id).unwrap();
            unit.x = wall.x - PLAYER_RADIUS - 2.0;
            unit.y = wall.y + wall.height / 2.0;
        }
        game.start(1_000);

        let mut intents = TickIntents::new();
        intents.insert(
            p.player_id,
            StampedIntent {
                seq: 1,
                payload: movement(1.0, 0.0),
                received_at: 1_000,
            },
        );

        for tick in 0..120 {
            game.tick(ctx(tick, 1_000 + tick * 16), &intents);
        }

        let unit = &game.players[&p.player_id];
        assert!(
            unit.x < wall.x,
            "player pushed through the wall: {} >= {}",
            unit.x,
            wall.x
        );
    }

    #[test]
    fn timed_effects_expire() {
        let mut game = new_game();
        let p = profile("timed");
        game.handle_join(&p);
        game.start(1_000);

        // start() granted a spawn shield
        assert!(game.players[&p.player_id].has_effect(EffectKind::Shield));

        let intents = TickIntents::new();
        game.tick(ctx(0, 1_000 + SPAWN_SHIELD_MS + 1), &intents);

        assert!(!game.players[&p.player_id].has_effect(EffectKind::Shield));
    }

    #[test]
    fn match_timer_produces_standings() {
        let mut game = new_game();
        let p1 = profile("first");
        let p2 = profile("second");
        game.handle_join(&p1);
        game.handle_join(&p2);
        game.start(1_000);
        game.players.get_mut(&p1.player_id).unwrap().score = 4;
        game.players.get_mut(&p2.player_id).unwrap().score = 2;

        let intents = TickIntents::new();
        let end = 1_000 + game.match_ms + 1;
        game.tick(ctx(0, end), &intents);

        let outcome = game.is_terminal().expect("match should be over");
        assert_eq!(outcome.result, OutcomeResult::Completed);
        assert_eq!(outcome.standings[0].player_id, p1.player_id);
        assert_eq!(outcome.standings[0].rank, 1);
        assert_eq!(outcome.standings[1].player_id, p2.player_id);
    }
}
