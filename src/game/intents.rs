//! Per-player intent register - last-write-wins input ingestion
//!
//! Session tasks submit intents concurrently; the room task reads a
//! point-in-time copy once per tick. Intents are a register, never a queue:
//! burst input replaces, it does not accumulate.

use std::collections::HashMap;

use dashmap::DashMap;
use uuid::Uuid;

use crate::ws::protocol::{GameKind, IntentPayload, TowerCommand};

/// Tolerance for unit-vector magnitude checks
const UNIT_EPSILON: f32 = 0.001;

/// Answer index ceiling at ingestion; the live question bound is enforced
/// by the quiz machine at consumption time.
const MAX_ANSWER_INDEX: u32 = 8;

/// An accepted intent with its ordering stamp
#[derive(Debug, Clone)]
pub struct StampedIntent {
    pub seq: u64,
    pub payload: IntentPayload,
    pub received_at: u64,
}

/// Point-in-time view of every player's current intent, taken once per tick
pub type TickIntents = HashMap<Uuid, StampedIntent>;

/// Intent ingestion errors - dropped silently at the wire, logged at debug
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntentError {
    #[error("unknown player")]
    UnknownPlayer,

    #[error("stale sequence")]
    StaleSequence,

    #[error("payload does not match room game type")]
    Malformed,

    #[error("value out of range")]
    OutOfRange,
}

/// Validation bounds that depend on room configuration
#[derive(Debug, Clone, Copy)]
pub struct IntentLimits {
    pub grid_cols: u32,
    pub grid_rows: u32,
}

impl Default for IntentLimits {
    fn default() -> Self {
        Self {
            grid_cols: 16,
            grid_rows: 9,
        }
    }
}

/// Concurrent last-write-wins register, one slot per registered player
pub struct IntentStore {
    kind: GameKind,
    limits: IntentLimits,
    entries: DashMap<Uuid, Option<StampedIntent>>,
}

impl IntentStore {
    pub fn new(kind: GameKind, limits: IntentLimits) -> Self {
        Self {
            kind,
            limits,
            entries: DashMap::new(),
        }
    }

    /// Open a register slot for a joined player
    pub fn register_player(&self, player_id: Uuid) {
        self.entries.entry(player_id).or_insert(None);
    }

    /// Drop a player's slot (explicit leave or grace expiry)
    pub fn remove_player(&self, player_id: Uuid) {
        self.entries.remove(&player_id);
    }

    /// Validate and atomically replace the player's current intent
    pub fn submit(
        &self,
        player_id: Uuid,
        seq: u64,
        payload: IntentPayload,
        received_at: u64,
    ) -> Result<(), IntentError> {
        if payload.kind() != self.kind {
            return Err(IntentError::Malformed);
        }
        self.validate(&payload)?;

        let mut entry = self
            .entries
            .get_mut(&player_id)
            .ok_or(IntentError::UnknownPlayer)?;

        if let Some(current) = entry.as_ref() {
            if seq <= current.seq {
                return Err(IntentError::StaleSequence);
            }
        }

        *entry = Some(StampedIntent {
            seq,
            payload,
            received_at,
        });
        Ok(())
    }

    /// Take a point-in-time copy of all current intents.
    ///
    /// Held intents (movement, steering, answers) persist across ticks.
    /// Tower commands are one-shot: the consumed stamp is cleared so the
    /// same build order cannot apply twice. A newer command submitted
    /// mid-drain survives because the clear is sequence-guarded.
    pub fn drain_tick(&self) -> TickIntents {
        let mut out = TickIntents::new();
        for entry in self.entries.iter() {
            if let Some(intent) = entry.value() {
                out.insert(*entry.key(), intent.clone());
            }
        }

        if self.kind == GameKind::TowerDefence {
            for (player_id, consumed) in &out {
                if let Some(mut entry) = self.entries.get_mut(player_id) {
                    if entry.as_ref().map(|i| i.seq) == Some(consumed.seq) {
                        *entry = None;
                    }
                }
            }
        }

        out
    }

    fn validate(&self, payload: &IntentPayload) -> Result<(), IntentError> {
        match payload {
            IntentPayload::Shooter {
                move_x,
                move_y,
                aim_x,
                aim_y,
                ..
            } => {
                let values = [*move_x, *move_y, *aim_x, *aim_y];
                if values.iter().any(|v| !v.is_finite()) {
                    return Err(IntentError::OutOfRange);
                }
                if vec_len(*move_x, *move_y) > 1.0 + UNIT_EPSILON
                    || vec_len(*aim_x, *aim_y) > 1.0 + UNIT_EPSILON
                {
                    return Err(IntentError::OutOfRange);
                }
                Ok(())
            }
            IntentPayload::Race { accelerate, turn } => {
                if !accelerate.is_finite() || !turn.is_finite() {
                    return Err(IntentError::OutOfRange);
                }
                if accelerate.abs() > 1.0 + UNIT_EPSILON || turn.abs() > 1.0 + UNIT_EPSILON {
                    return Err(IntentError::OutOfRange);
                }
                Ok(())
            }
            IntentPayload::Quiz { answer } => {
                if *answer >= MAX_ANSWER_INDEX {
                    return Err(IntentError::OutOfRange);
                }
                Ok(())
            }
            IntentPayload::TowerDefence { command } => match command {
                TowerCommand::Build { col, row, .. } => {
                    if *col >= self.limits.grid_cols || *row >= self.limits.grid_rows {
                        return Err(IntentError::OutOfRange);
                    }
                    Ok(())
                }
                TowerCommand::Upgrade { .. } => Ok(()),
            },
        }
    }
}

fn vec_len(x: f32, y: f32) -> f32 {
    (x * x + y * y).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::protocol::TowerKind;

    fn shooter_payload(move_x: f32, move_y: f32) -> IntentPayload {
        IntentPayload::Shooter {
            move_x,
            move_y,
            aim_x: 0.0,
            aim_y: 0.0,
            fire: false,
        }
    }

    #[test]
    fn unknown_player_is_rejected() {
        let store = IntentStore::new(GameKind::Shooter, IntentLimits::default());
        let err = store
            .submit(Uuid::new_v4(), 1, shooter_payload(0.0, 0.0), 0)
            .unwrap_err();
        assert_eq!(err, IntentError::UnknownPlayer);
    }

    #[test]
    fn latest_intent_wins() {
        let store = IntentStore::new(GameKind::Shooter, IntentLimits::default());
        let player = Uuid::new_v4();
        store.register_player(player);

        store.submit(player, 1, shooter_payload(0.1, 0.0), 10).unwrap();
        store.submit(player, 2, shooter_payload(0.9, 0.0), 11).unwrap();

        let tick = store.drain_tick();
        let intent = tick.get(&player).unwrap();
        assert_eq!(intent.seq, 2);
        assert_eq!(intent.payload, shooter_payload(0.9, 0.0));
    }

    #[test]
    fn stale_sequence_keeps_previous_intent() {
        let store = IntentStore::new(GameKind::Shooter, IntentLimits::default());
        let player = Uuid::new_v4();
        store.register_player(player);

        store.submit(player, 5, shooter_payload(0.5, 0.5), 10).unwrap();
        let err = store
            .submit(player, 4, shooter_payload(-1.0, 0.0), 11)
            .unwrap_err();
        assert_eq!(err, IntentError::StaleSequence);

        let tick = store.drain_tick();
        assert_eq!(tick.get(&player).unwrap().seq, 5);
    }

    #[test]
    fn out_of_range_vector_keeps_previous_intent() {
        let store = IntentStore::new(GameKind::Shooter, IntentLimits::default());
        let player = Uuid::new_v4();
        store.register_player(player);

        store.submit(player, 1, shooter_payload(0.2, 0.2), 10).unwrap();
        let err = store
            .submit(player, 2, shooter_payload(5.0, 0.0), 11)
            .unwrap_err();
        assert_eq!(err, IntentError::OutOfRange);

        let tick = store.drain_tick();
        assert_eq!(tick.get(&player).unwrap().seq, 1);
    }

    #[test]
    fn non_finite_values_are_rejected() {
        let store = IntentStore::new(GameKind::Race, IntentLimits::default());
        let player = Uuid::new_v4();
        store.register_player(player);

        let err = store
            .submit(
                player,
                1,
                IntentPayload::Race {
                    accelerate: f32::NAN,
                    turn: 0.0,
                },
                10,
            )
            .unwrap_err();
        assert_eq!(err, IntentError::OutOfRange);
    }

    #[test]
    fn wrong_game_payload_is_malformed() {
        let store = IntentStore::new(GameKind::Quiz, IntentLimits::default());
        let player = Uuid::new_v4();
        store.register_player(player);

        let err = store
            .submit(player, 1, shooter_payload(0.0, 0.0), 10)
            .unwrap_err();
        assert_eq!(err, IntentError::Malformed);
    }

    #[test]
    fn tower_commands_are_consumed_once() {
        let store = IntentStore::new(GameKind::TowerDefence, IntentLimits::default());
        let player = Uuid::new_v4();
        store.register_player(player);

        store
            .submit(
                player,
                1,
                IntentPayload::TowerDefence {
                    command: TowerCommand::Build {
                        tower: TowerKind::Cannon,
                        col: 2,
                        row: 3,
                    },
                },
                10,
            )
            .unwrap();

        let first = store.drain_tick();
        assert!(first.contains_key(&player));

        let second = store.drain_tick();
        assert!(second.is_empty());
    }

    #[test]
    fn build_outside_grid_is_rejected() {
        let store = IntentStore::new(GameKind::TowerDefence, IntentLimits::default());
        let player = Uuid::new_v4();
        store.register_player(player);

        let err = store
            .submit(
                player,
                1,
                IntentPayload::TowerDefence {
                    command: TowerCommand::Build {
                        tower: TowerKind::Frost,
                        col: 99,
                        row: 0,
                    },
                },
                10,
            )
            .unwrap_err();
        assert_eq!(err, IntentError::OutOfRange);
    }

    #[test]
    fn held_intents_persist_across_ticks() {
        let store = IntentStore::new(GameKind::Race, IntentLimits::default());
        let player = Uuid::new_v4();
        store.register_player(player);

        store
            .submit(
                player,
                1,
                IntentPayload::Race {
                    accelerate: 1.0,
                    turn: 0.0,
                },
                10,
            )
            .unwrap();

        assert!(store.drain_tick().contains_key(&player));
        assert!(store.drain_tick().contains_key(&player));
    }
}
