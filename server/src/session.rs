//! Session state machine for one typing battle.
//!
//! All gameplay state lives behind one coarse lock and is mutated from two
//! places only: `join`, which runs on the admission path, and the single
//! action-consumer task spawned by [`Session::spawn`]. Every attack flows
//! through the buffered action channel into that one consumer, so damage
//! and word reassignment are strictly serialized and win detection can run
//! inline on the mutation path instead of polling.
//!
//! State change notifications leave through the event channel in emission
//! order; the session server fans them out to connected streams.

use crate::words::WordSource;
use log::{debug, info, warn};
use shared::PlayerSnapshot;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

pub type PlayerId = Uuid;

/// Pending actions the consumer can hold before submits start dropping.
const ACTION_BUFFER: usize = 64;

/// Player-originated intent, already decoded from the wire.
#[derive(Debug, Clone)]
pub enum Action {
    Attack {
        actor: PlayerId,
        text: String,
        target: PlayerId,
    },
}

/// Session-originated state change notification.
///
/// `WordAssigned` is private to the named player; everything else is
/// broadcast. Delivery order is emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    RoundStarting,
    WordAssigned { player: PlayerId, word: String },
    HealthChanged { player: PlayerId, health: i32 },
    PlayerJoined { player: PlayerSnapshot },
    GameOver { winner: String },
}

/// Round phase. Only ever advances forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RoundState {
    Lobby,
    Countdown,
    Active,
    Finished,
}

/// Per-player game state. Owned by the session; a player's record outlives
/// their connection, so a disconnected player stays targetable.
#[derive(Debug)]
pub struct PlayerRecord {
    pub id: PlayerId,
    pub name: String,
    pub health: i32,
    pub current_word: String,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Joins needed before the countdown starts. Also the admission cap.
    pub required_players: usize,
    pub initial_health: i32,
    pub countdown_ticks: u32,
    pub countdown_tick: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            required_players: 2,
            initial_health: shared::INITIAL_HEALTH,
            countdown_ticks: shared::COUNTDOWN_TICKS,
            countdown_tick: Duration::from_secs(1),
        }
    }
}

struct SessionState {
    players: HashMap<PlayerId, PlayerRecord>,
    /// Join order; used for roster snapshots and initial word assignment.
    player_order: Vec<PlayerId>,
    round_state: RoundState,
    joined_count: usize,
    words: Box<dyn WordSource>,
    events: mpsc::UnboundedSender<Event>,
    config: SessionConfig,
}

/// Handle to one in-progress game. Cheap to clone.
#[derive(Clone)]
pub struct Session {
    state: Arc<RwLock<SessionState>>,
    actions: mpsc::Sender<Action>,
}

impl Session {
    /// Creates the session and spawns its single action consumer.
    /// The returned receiver is the event stream; it must have exactly one
    /// consumer to preserve emission order.
    pub fn spawn(
        config: SessionConfig,
        words: Box<dyn WordSource>,
    ) -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (actions_tx, mut actions_rx) = mpsc::channel(ACTION_BUFFER);

        let state = Arc::new(RwLock::new(SessionState {
            players: HashMap::new(),
            player_order: Vec::new(),
            round_state: RoundState::Lobby,
            joined_count: 0,
            words,
            events: events_tx,
            config,
        }));

        let consumer_state = Arc::clone(&state);
        tokio::spawn(async move {
            while let Some(action) = actions_rx.recv().await {
                let mut state = consumer_state.write().await;
                if state.round_state != RoundState::Active {
                    debug!("dropping action outside active round: {:?}", action);
                    continue;
                }
                state.apply(action);
            }
        });

        (
            Session {
                state,
                actions: actions_tx,
            },
            events_rx,
        )
    }

    /// Registers a player under the caller-supplied id and returns the
    /// roster including them. Capacity is the caller's responsibility
    /// (registry admission); the join that reaches `required_players`
    /// kicks off the countdown, exactly once.
    pub async fn join(&self, id: PlayerId, name: &str) -> Vec<PlayerSnapshot> {
        let mut state = self.state.write().await;

        let word = state.words.next_word("");
        let initial_health = state.config.initial_health;
        state.players.insert(
            id,
            PlayerRecord {
                id,
                name: name.to_string(),
                health: initial_health,
                current_word: word,
            },
        );
        state.player_order.push(id);
        state.joined_count += 1;
        info!(
            "player {} ({}) joined [{}/{}]",
            name, id, state.joined_count, state.config.required_players
        );

        state.emit(Event::PlayerJoined {
            player: PlayerSnapshot {
                id,
                name: name.to_string(),
                health: state.config.initial_health,
            },
        });

        // Edge-triggered: exactly the join that fills the lobby, and only
        // while still in Lobby.
        if state.joined_count == state.config.required_players
            && state.round_state == RoundState::Lobby
        {
            state.round_state = RoundState::Countdown;
            state.emit(Event::RoundStarting);
            info!("lobby full, countdown started");
            self.spawn_countdown(&state.config);
        }

        state.roster()
    }

    /// Enqueues an action without blocking. Dropped silently when the
    /// buffer is full or the round is not active.
    pub fn submit(&self, action: Action) {
        if let Err(e) = self.actions.try_send(action) {
            debug!("action dropped: {}", e);
        }
    }

    /// Roster snapshot in join order.
    pub async fn roster(&self) -> Vec<PlayerSnapshot> {
        self.state.read().await.roster()
    }

    pub async fn round_state(&self) -> RoundState {
        self.state.read().await.round_state
    }

    fn spawn_countdown(&self, config: &SessionConfig) {
        let wait = config.countdown_tick * config.countdown_ticks;
        let state = Arc::clone(&self.state);

        tokio::spawn(async move {
            tokio::time::sleep(wait).await;

            let mut state = state.write().await;
            if state.round_state != RoundState::Countdown {
                return;
            }
            state.round_state = RoundState::Active;
            info!("round active");

            for id in state.player_order.clone() {
                if let Some(record) = state.players.get(&id) {
                    let word = record.current_word.clone();
                    state.emit(Event::WordAssigned { player: id, word });
                }
            }
        });
    }
}

impl SessionState {
    fn apply(&mut self, action: Action) {
        match action {
            Action::Attack {
                actor,
                text,
                target,
            } => self.apply_attack(actor, &text, target),
        }
    }

    fn apply_attack(&mut self, actor: PlayerId, text: &str, target: PlayerId) {
        let Some(record) = self.players.get(&actor) else {
            // Admission registers every player before it hands out a
            // token, so this indicates a broken invariant upstream.
            warn!("attack from unregistered player {}", actor);
            return;
        };

        // Wrong answers cost nothing and change nothing.
        if record.current_word != text {
            return;
        }

        let Some(target_record) = self.players.get_mut(&target) else {
            warn!("attack on unregistered target {}", target);
            return;
        };
        target_record.health -= 1;
        let health = target_record.health;
        let target_name = target_record.name.clone();

        let next_word = self.words.next_word(text);
        if let Some(actor_record) = self.players.get_mut(&actor) {
            actor_record.current_word = next_word.clone();
        }

        debug!("{}'s health is {}", target_name, health);
        self.emit(Event::HealthChanged {
            player: target,
            health,
        });
        self.emit(Event::WordAssigned {
            player: actor,
            word: next_word,
        });

        self.check_winner();
    }

    /// Runs after every health mutation. The last player at health >= 1
    /// wins; zero survivors finishes the round with no winner.
    fn check_winner(&mut self) {
        if self.round_state == RoundState::Finished {
            return;
        }

        let mut alive = self.players.values().filter(|p| p.health >= 1);
        match (alive.next(), alive.next()) {
            (Some(last), None) => {
                let winner = last.name.clone();
                self.round_state = RoundState::Finished;
                info!("{} wins", winner);
                self.emit(Event::GameOver { winner });
            }
            (None, _) => {
                self.round_state = RoundState::Finished;
                warn!("round finished with no players standing, no winner");
            }
            _ => {}
        }
    }

    fn roster(&self) -> Vec<PlayerSnapshot> {
        self.player_order
            .iter()
            .filter_map(|id| self.players.get(id))
            .map(|p| PlayerSnapshot {
                id: p.id,
                name: p.name.clone(),
                health: p.health,
            })
            .collect()
    }

    fn emit(&self, event: Event) {
        if self.events.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }
}
