//! Client-side view of the game: roster, target selection, and the
//! scrolling message log the terminal displays.
//!
//! Target selection is purely client-side. The player picks a mode
//! (random, or aim at the k-th opponent); the chosen opponent id is what
//! gets sent with each attack.

use rand::Rng;
use shared::PlayerSnapshot;
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

/// Maximum number of retained log lines.
pub const LOG_CAPACITY: usize = 100;

/// Target-selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Uniform pick from the opponent list, at the moment the mode is set.
    Random,
    /// Pin the k-th opponent in join order.
    Aim(usize),
}

/// A player-originated intent typed at the terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Attack { text: String },
    ModeChange { mode: Mode },
}

/// Parses one input line. `:random` and `:aim N` switch targeting mode;
/// anything else is a typed answer. Blank lines and malformed commands
/// yield nothing.
pub fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if let Some(rest) = line.strip_prefix(':') {
        let mut parts = rest.split_whitespace();
        return match parts.next() {
            Some("random") => Some(Command::ModeChange { mode: Mode::Random }),
            Some("aim") => parts
                .next()
                .and_then(|arg| arg.parse().ok())
                .map(|idx| Command::ModeChange {
                    mode: Mode::Aim(idx),
                }),
            _ => None,
        };
    }

    Some(Command::Attack {
        text: line.to_string(),
    })
}

pub struct ClientGameState {
    self_id: Uuid,
    players: HashMap<Uuid, PlayerSnapshot>,
    /// Opponent ids in join order. Self is never a target.
    opponents: Vec<Uuid>,
    target: Option<Uuid>,
    current_word: String,
    log: VecDeque<String>,
    finished: bool,
}

impl ClientGameState {
    /// Builds the state from the roster returned at admission.
    pub fn new(self_id: Uuid, roster: Vec<PlayerSnapshot>) -> Self {
        let mut players = HashMap::new();
        let mut opponents = Vec::new();

        for player in roster {
            if player.id != self_id {
                opponents.push(player.id);
            }
            players.insert(player.id, player);
        }

        Self {
            self_id,
            players,
            opponents,
            target: None,
            current_word: String::new(),
            log: VecDeque::new(),
            finished: false,
        }
    }

    /// Applies a targeting mode change. Out-of-range aims keep the
    /// previous target; with no opponents, nothing changes.
    pub fn set_mode(&mut self, mode: Mode) {
        match mode {
            Mode::Random => {
                if !self.opponents.is_empty() {
                    let idx = rand::thread_rng().gen_range(0..self.opponents.len());
                    self.target = Some(self.opponents[idx]);
                }
            }
            Mode::Aim(idx) => {
                if idx < self.opponents.len() {
                    self.target = Some(self.opponents[idx]);
                }
            }
        }
    }

    pub fn handle_join(&mut self, player: PlayerSnapshot) -> String {
        let line = format!("{} joined the game", player.name);
        // Our own join announcement can race the stream attach; players
        // already in the roster are never added twice.
        if player.id != self.self_id && !self.players.contains_key(&player.id) {
            self.opponents.push(player.id);
            self.players.insert(player.id, player);
        }
        self.push_log(line.clone());
        line
    }

    pub fn handle_start(&mut self) -> String {
        // Default to a random opponent so attacks work before the player
        // ever picks a mode.
        if self.target.is_none() {
            self.set_mode(Mode::Random);
        }
        let line = "round starting!".to_string();
        self.push_log(line.clone());
        line
    }

    pub fn handle_question(&mut self, text: String) -> String {
        let line = format!("type: {}", text);
        self.current_word = text;
        self.push_log(line.clone());
        line
    }

    pub fn handle_damage(&mut self, id: Uuid, health: i32) -> String {
        let name = match self.players.get_mut(&id) {
            Some(player) => {
                player.health = health;
                player.name.clone()
            }
            None => "unknown".to_string(),
        };
        let line = format!("{}'s health is {}", name, health);
        self.push_log(line.clone());
        line
    }

    pub fn handle_finish(&mut self, winner: &str) -> String {
        self.finished = true;
        let line = format!("Finish! {} Win!!", winner);
        self.push_log(line.clone());
        line
    }

    pub fn target(&self) -> Option<Uuid> {
        self.target
    }

    pub fn target_name(&self) -> Option<&str> {
        self.target
            .and_then(|id| self.players.get(&id))
            .map(|p| p.name.as_str())
    }

    pub fn current_word(&self) -> &str {
        &self.current_word
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn log_lines(&self) -> impl Iterator<Item = &str> {
        self.log.iter().map(String::as_str)
    }

    /// One line per player: health, a `>` marker on the current target,
    /// and a `(you)` tag on ourselves.
    pub fn status_lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.players.len());

        let mut ids: Vec<Uuid> = vec![self.self_id];
        ids.extend(&self.opponents);

        for id in ids {
            if let Some(player) = self.players.get(&id) {
                let marker = if Some(id) == self.target { ">" } else { " " };
                let you = if id == self.self_id { " (you)" } else { "" };
                lines.push(format!(
                    "{} {}{}: {}",
                    marker, player.name, you, player.health
                ));
            }
        }

        lines
    }

    fn push_log(&mut self, line: String) {
        if self.log.len() == LOG_CAPACITY {
            self.log.pop_front();
        }
        self.log.push_back(line);
    }
}
