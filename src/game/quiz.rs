//! Quiz simulation - round timers, answer locking, latency-weighted scoring

use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use uuid::Uuid;

use crate::game::intents::TickIntents;
use crate::game::simulation::{PlayerProfile, Simulation, TickCtx, TickOutput};
use crate::ws::protocol::{
    GameEvent, GameOutcome, GameSnapshot, IntentPayload, OutcomeResult, QuestionView,
    QuizPhaseView, QuizPlayerView, QuizState, RoomOptions,
};

use super::shooter::standings_by_score;

const ANSWER_MS: u64 = 15_000;
const REVEAL_MS: u64 = 4_000;
const BASE_SCORE: u32 = 100;
const TIME_BONUS_MAX: u32 = 100;

#[derive(Debug, Clone)]
struct Question {
    prompt: &'static str,
    answers: [&'static str; 4],
    correct: u32,
}

/// Built-in question bank, shuffled per room with the seeded rng
fn question_bank() -> Vec<Question> {
    vec![
        Question {
            prompt: "Which planet has the most moons?",
            answers: ["Mars", "Saturn", "Venus", "Mercury"],
            correct: 1,
        },
        Question {
            prompt: "What is the largest ocean on Earth?",
            answers: ["Atlantic", "Indian", "Pacific", "Arctic"],
            correct: 2,
        },
        Question {
            prompt: "How many bones does an adult human have?",
            answers: ["206", "186", "226", "246"],
            correct: 0,
        },
        Question {
            prompt: "Which element has the chemical symbol Au?",
            answers: ["Silver", "Copper", "Gold", "Aluminium"],
            correct: 2,
        },
        Question {
            prompt: "In which year did the first moon landing happen?",
            answers: ["1965", "1969", "1971", "1973"],
            correct: 1,
        },
        Question {
            prompt: "What is the fastest land animal?",
            answers: ["Lion", "Pronghorn", "Cheetah", "Greyhound"],
            correct: 2,
        },
        Question {
            prompt: "Which country invented tea bags?",
            answers: ["China", "India", "United Kingdom", "United States"],
            correct: 3,
        },
        Question {
            prompt: "What is the smallest prime number?",
            answers: ["0", "1", "2", "3"],
            correct: 2,
        },
        Question {
            prompt: "Which instrument has 47 strings?",
            answers: ["Harp", "Piano", "Cello", "Lute"],
            correct: 0,
        },
        Question {
            prompt: "What is the capital of Australia?",
            answers: ["Sydney", "Melbourne", "Canberra", "Perth"],
            correct: 2,
        },
        Question {
            prompt: "How many hearts does an octopus have?",
            answers: ["1", "2", "3", "4"],
            correct: 2,
        },
        Question {
            prompt: "Which gas makes up most of Earth's atmosphere?",
            answers: ["Oxygen", "Nitrogen", "Carbon dioxide", "Argon"],
            correct: 1,
        },
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Waiting,
    Asking { deadline: u64 },
    Revealing { deadline: u64 },
    Finished,
}

#[derive(Debug, Clone)]
struct AnswerLock {
    index: u32,
    /// Countdown remaining when the answer locked, the bonus basis
    remaining_ms: u64,
}

#[derive(Debug, Clone)]
struct QuizPlayer {
    profile: PlayerProfile,
    score: u32,
    ready: bool,
    answer: Option<AnswerLock>,
    last_correct: Option<bool>,
}

/// Round-based quiz state machine, timer-driven rather than physics-driven
pub struct QuizGame {
    rounds_total: u32,
    round: u32,
    phase: Phase,
    started: bool,
    questions: Vec<Question>,
    players: HashMap<Uuid, QuizPlayer>,
    outcome: Option<GameOutcome>,
}

impl QuizGame {
    pub fn new(options: &RoomOptions, seed: u64) -> Self {
        let mut questions = question_bank();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        questions.shuffle(&mut rng);
        let rounds_total = options.rounds.clamp(1, questions.len() as u32);

        Self {
            rounds_total,
            round: 0,
            phase: Phase::Waiting,
            started: false,
            questions,
            players: HashMap::new(),
            outcome: None,
        }
    }

    fn current_question(&self) -> Option<&Question> {
        if self.round == 0 {
            return None;
        }
        self.questions.get(self.round as usize - 1)
    }

    fn all_ready(&self) -> bool {
        !self.players.is_empty() && self.players.values().all(|p| p.ready)
    }

    fn all_answered(&self) -> bool {
        !self.players.is_empty() && self.players.values().all(|p| p.answer.is_some())
    }

    fn begin_round(&mut self, now_ms: u64, events: &mut Vec<GameEvent>) {
        self.round += 1;
        for player in self.players.values_mut() {
            player.answer = None;
            player.last_correct = None;
        }
        self.phase = Phase::Asking {
            deadline: now_ms + ANSWER_MS,
        };
        events.push(GameEvent::RoundStarted { round: self.round });
    }

    fn lock_answers(&mut self, intents: &TickIntents, deadline: u64, now_ms: u64, events: &mut Vec<GameEvent>) {
        let Some(question) = self.current_question().cloned() else {
            return;
        };
        for (player_id, intent) in intents {
            let IntentPayload::Quiz { answer } = intent.payload else {
                continue;
            };
            // The live question bounds the index; ingestion only shape-checks
            if answer >= question.answers.len() as u32 {
                continue;
            }
            let Some(player) = self.players.get_mut(player_id) else {
                continue;
            };
            if player.answer.is_some() {
                continue; // first lock wins the round
            }
            player.answer = Some(AnswerLock {
                index: answer,
                remaining_ms: deadline.saturating_sub(now_ms),
            });
            events.push(GameEvent::PlayerAnswered {
                player_id: *player_id,
            });
        }
    }

    /// Correct answers earn the base plus a bonus proportional to the
    /// countdown remaining at lock time, so faster beats slower.
    fn reveal(&mut self, now_ms: u64, events: &mut Vec<GameEvent>) {
        let Some(question) = self.current_question().cloned() else {
            return;
        };
        for player in self.players.values_mut() {
            let correct = player
                .answer
                .as_ref()
                .map(|lock| lock.index == question.correct)
                .unwrap_or(false); // unanswered counts as wrong
            player.last_correct = Some(correct);
            if correct {
                let remaining = player.answer.as_ref().map(|l| l.remaining_ms).unwrap_or(0);
                let bonus = (remaining * TIME_BONUS_MAX as u64 / ANSWER_MS) as u32;
                player.score += BASE_SCORE + bonus;
            }
        }
        events.push(GameEvent::RoundRevealed {
            round: self.round,
            correct_answer: question.correct,
        });
        self.phase = Phase::Revealing {
            deadline: now_ms + REVEAL_MS,
        };
    }

    fn finish(&mut self) {
        self.phase = Phase::Finished;
        self.outcome = Some(GameOutcome {
            result: OutcomeResult::Completed,
            standings: standings_by_score(
                self.players
                    .values()
                    .map(|p| (p.profile.clone(), p.score as i64)),
            ),
        });
    }

    fn build_snapshot(&self, now_ms: u64) -> GameSnapshot {
        let (phase_view, countdown_ms, show_question, correct_answer) = match self.phase {
            Phase::Waiting => (QuizPhaseView::Waiting, 0, false, None),
            Phase::Asking { deadline } => (
                QuizPhaseView::Asking,
                deadline.saturating_sub(now_ms),
                true,
                None,
            ),
            Phase::Revealing { deadline } => (
                QuizPhaseView::Revealing,
                deadline.saturating_sub(now_ms),
                true,
                self.current_question().map(|q| q.correct),
            ),
            Phase::Finished => (QuizPhaseView::Finished, 0, false, None),
        };

        GameSnapshot::Quiz(QuizState {
            phase: phase_view,
            round: self.round,
            rounds_total: self.rounds_total,
            question: if show_question {
                self.current_question().map(|q| QuestionView {
                    prompt: q.prompt.to_string(),
                    answers: q.answers.iter().map(|a| a.to_string()).collect(),
                })
            } else {
                None
            },
            countdown_ms,
            players: self
                .players
                .values()
                .map(|p| QuizPlayerView {
                    player_id: p.profile.player_id,
                    name: p.profile.name.clone(),
                    color: p.profile.color.clone(),
                    score: p.score,
                    ready: p.ready,
                    answered: p.answer.is_some(),
                    correct: p.last_correct,
                })
                .collect(),
            correct_answer,
        })
    }
}

impl Simulation for QuizGame {
    fn handle_join(&mut self, profile: &PlayerProfile) {
        self.players.insert(
            profile.player_id,
            QuizPlayer {
                profile: profile.clone(),
                score: 0,
                ready: false,
                answer: None,
                last_correct: None,
            },
        );
    }

    fn handle_leave(&mut self, player_id: Uuid) {
        self.players.remove(&player_id);
    }

    fn handle_ready(&mut self, player_id: Uuid, ready: bool) {
        if let Some(player) = self.players.get_mut(&player_id) {
            player.ready = ready;
        }
    }

    fn start(&mut self, _now_ms: u64) {
        // The first round still waits for every player's ready flag
        self.started = true;
    }

    fn tick(&mut self, ctx: TickCtx, intents: &TickIntents) -> TickOutput {
        let mut events = Vec::new();
        let now_ms = ctx.now_ms;

        match self.phase {
            Phase::Waiting => {
                if self.started && self.all_ready() {
                    self.begin_round(now_ms, &mut events);
                }
            }
            Phase::Asking { deadline } => {
                self.lock_answers(intents, deadline, now_ms, &mut events);
                // Expiry forces the transition whether or not everyone answered
                if self.all_answered() || now_ms >= deadline {
                    self.reveal(now_ms, &mut events);
                }
            }
            Phase::Revealing { deadline } => {
                if now_ms >= deadline {
                    if self.round >= self.rounds_total {
                        self.finish();
                    } else {
                        self.begin_round(now_ms, &mut events);
                    }
                }
            }
            Phase::Finished => {}
        }

        TickOutput {
            snapshot: self.build_snapshot(now_ms),
            events,
        }
    }

    fn is_terminal(&self) -> Option<GameOutcome> {
        self.outcome.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::intents::StampedIntent;

    fn profile(name: &str) -> PlayerProfile {
        PlayerProfile {
            player_id: Uuid::new_v4(),
            name: name.to_string(),
            color: "#4363d8".to_string(),
        }
    }

    fn ctx(now_ms: u64) -> TickCtx {
        TickCtx {
            tick: 0,
            dt: 0.125,
            now_ms,
        }
    }

    fn answer(index: u32) -> StampedIntent {
        StampedIntent {
            seq: 1,
            payload: IntentPayload::Quiz { answer: index },
            received_at: 0,
        }
    }

    fn ready_game(players: &[&PlayerProfile]) -> QuizGame {
        let mut game = QuizGame::new(&RoomOptions::default(), 7);
        for p in players {
            game.handle_join(p);
            game.handle_ready(p.player_id, true);
        }
        game.start(1_000);
        game
    }

    #[test]
    fn round_waits_for_all_ready() {
        let p1 = profile("ann");
        let p2 = profile("bob");
        let mut game = QuizGame::new(&RoomOptions::default(), 7);
        game.handle_join(&p1);
        game.handle_join(&p2);
        game.start(1_000);
        game.handle_ready(p1.player_id, true);

        game.tick(ctx(1_000), &TickIntents::new());
        assert_eq!(game.phase, Phase::Waiting);

        game.handle_ready(p2.player_id, true);
        let out = game.tick(ctx(1_125), &TickIntents::new());
        assert!(matches!(game.phase, Phase::Asking { .. }));
        assert!(out
            .events
            .iter()
            .any(|e| matches!(e, GameEvent::RoundStarted { round: 1 })));
    }

    #[test]
    fn faster_correct_answer_scores_strictly_more() {
        let p_fast = profile("fast");
        let p_slow = profile("slow");
        let mut game = ready_game(&[&p_fast, &p_slow]);

        game.tick(ctx(1_000), &TickIntents::new()); // opens round 1
        let correct = game.current_question().unwrap().correct;

        // Fast answers 1s in, slow answers 8s in
        let mut fast_intents = TickIntents::new();
        fast_intents.insert(p_fast.player_id, answer(correct));
        game.tick(ctx(2_000), &fast_intents);

        let mut slow_intents = TickIntents::new();
        slow_intents.insert(p_slow.player_id, answer(correct));
        game.tick(ctx(9_000), &slow_intents); // both answered -> reveal

        assert!(matches!(game.phase, Phase::Revealing { .. }));
        let fast_score = game.players[&p_fast.player_id].score;
        let slow_score = game.players[&p_slow.player_id].score;
        assert!(
            fast_score > slow_score,
            "fast {} should beat slow {}",
            fast_score,
            slow_score
        );
    }

    #[test]
    fn countdown_expiry_marks_unanswered_as_wrong() {
        let p1 = profile("quiet");
        let mut game = ready_game(&[&p1]);
        game.tick(ctx(1_000), &TickIntents::new());

        // No answers; jump past the deadline
        let out = game.tick(ctx(1_000 + ANSWER_MS + 1), &TickIntents::new());

        assert!(matches!(game.phase, Phase::Revealing { .. }));
        assert_eq!(game.players[&p1.player_id].last_correct, Some(false));
        assert_eq!(game.players[&p1.player_id].score, 0);
        assert!(out
            .events
            .iter()
            .any(|e| matches!(e, GameEvent::RoundRevealed { .. })));
    }

    #[test]
    fn first_answer_locks_for_the_round() {
        let p1 = profile("flip");
        let mut game = ready_game(&[&p1]);
        game.tick(ctx(1_000), &TickIntents::new());
        let correct = game.current_question().unwrap().correct;
        let wrong = (correct + 1) % 4;

        let mut intents = TickIntents::new();
        intents.insert(p1.player_id, answer(wrong));
        game.tick(ctx(2_000), &intents);

        // A later change of heart must not replace the locked answer
        let mut changed = TickIntents::new();
        changed.insert(p1.player_id, answer(correct));
        game.tick(ctx(3_000), &changed);

        assert_eq!(game.players[&p1.player_id].score, 0);
        assert_eq!(game.players[&p1.player_id].last_correct, Some(false));
    }

    #[test]
    fn answer_index_beyond_question_is_ignored() {
        let p1 = profile("oob");
        let mut game = ready_game(&[&p1]);
        game.tick(ctx(1_000), &TickIntents::new());

        let mut intents = TickIntents::new();
        intents.insert(p1.player_id, answer(7)); // bank questions have 4 answers
        game.tick(ctx(2_000), &intents);

        assert!(game.players[&p1.player_id].answer.is_none());
    }

    #[test]
    fn game_finishes_after_configured_rounds() {
        let p1 = profile("solo");
        let options = RoomOptions {
            rounds: 2,
            ..RoomOptions::default()
        };
        let mut game = QuizGame::new(&options, 7);
        game.handle_join(&p1);
        game.handle_ready(p1.player_id, true);
        game.start(1_000);

        let mut now = 1_000;
        game.tick(ctx(now), &TickIntents::new());
        for _ in 0..2 {
            now += ANSWER_MS + 1;
            game.tick(ctx(now), &TickIntents::new()); // reveal
            now += REVEAL_MS + 1;
            game.tick(ctx(now), &TickIntents::new()); // next round or finish
        }

        assert_eq!(game.phase, Phase::Finished);
        let outcome = game.is_terminal().expect("quiz should be over");
        assert_eq!(outcome.result, OutcomeResult::Completed);
        assert_eq!(outcome.standings.len(), 1);
    }
}
