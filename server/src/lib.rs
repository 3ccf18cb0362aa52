//! # Typing Battle Server Library
//!
//! Authoritative server for a real-time multiplayer word-typing battle.
//! Players connect over a persistent TCP stream, type the word shown to
//! them, and deal one point of damage to an opponent per correct answer;
//! the last player with positive health wins.
//!
//! ## Architecture
//!
//! The server is built around one shared game session and a strict
//! pipeline:
//!
//! ```text
//! inbound frame -> Action -> action channel -> single consumer task
//!     -> state mutation under the session lock -> Event
//!     -> event channel -> fan-out task -> outbound frames
//! ```
//!
//! Exactly one task consumes the action channel, so every attack and join
//! is processed in series and win detection can run inline after each
//! health change rather than polling under a read lock. Events are
//! delivered in emission order: single producer side, FIFO channel, single
//! fan-out consumer.
//!
//! ## Module Organization
//!
//! ### Session Module (`session`)
//! The round state machine (Lobby, Countdown, Active, Finished), player
//! records, the action consumer, and win detection.
//!
//! ### Registry Module (`registry`)
//! Maps admitted tokens to live stream handles and liveness timestamps.
//! Guarded by its own lock, separate from game state, so slow peers never
//! block the game. Removing a connection does not remove the player.
//!
//! ### Network Module (`network`)
//! The TCP accept loop, the Connect/Attach handshake, per-connection
//! reader and writer tasks, the event fan-out, and the idle reaper.
//!
//! ### Words Module (`words`)
//! The injected word source the session draws typing prompts from.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{ServerConfig, SessionServer};
//! use server::words::WordList;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = SessionServer::bind(
//!         "127.0.0.1:8743",
//!         ServerConfig::default(),
//!         Box::new(WordList::builtin()),
//!     )
//!     .await?;
//!
//!     server.run().await
//! }
//! ```

pub mod network;
pub mod registry;
pub mod session;
pub mod words;
