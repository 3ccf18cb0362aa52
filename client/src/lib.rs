//! Terminal client for the typing battle.
//!
//! Deliberately thin: the `game` module keeps the local roster, targeting
//! mode, and a bounded message log; the `network` module runs the
//! handshake and the frame/stdin select loop. All authority lives on the
//! server — the client only renders events and forwards typed answers.

pub mod game;
pub mod network;
