//! Wire protocol shared between the typing-battle server and client.
//!
//! Messages are serde enums serialized with bincode. Because the transport
//! is a TCP byte stream rather than datagrams, every packet travels inside
//! a frame: a big-endian `u32` length prefix followed by the bincode
//! payload. [`write_frame`] and [`read_frame`] implement that codec for any
//! async stream half.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

/// Health every player starts a match with.
pub const INITIAL_HEALTH: i32 = 15;

/// Number of countdown ticks between a full lobby and the active round.
pub const COUNTDOWN_TICKS: u32 = 5;

/// Upper bound on a single frame's payload. Anything larger is a corrupt
/// or hostile stream.
pub const MAX_FRAME_LEN: u32 = 64 * 1024;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    // Client -> server
    /// Admission request. Answered with `Connected` or `Disconnected`.
    Connect { name: String },
    /// Upgrades the connection into the player's duplex event stream.
    Attach { token: Uuid },
    /// Typed answer aimed at an opponent.
    Attack { text: String, target_id: Uuid },

    // Server -> client
    Connected {
        token: Uuid,
        players: Vec<PlayerSnapshot>,
    },
    Attached,
    /// Countdown has begun.
    Start,
    /// The word the receiving player must type next. Sent only to that
    /// player's stream, never broadcast.
    Question { text: String },
    Finish { winner: String },
    Join { player: PlayerSnapshot },
    Damage { id: Uuid, health: i32 },
    /// Terminal rejection or eviction, after which the stream closes.
    Disconnected { reason: String },
}

/// Roster entry as seen on the wire.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PlayerSnapshot {
    pub id: Uuid,
    pub name: String,
    pub health: i32,
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame of {0} bytes exceeds limit")]
    TooLarge(u32),
    #[error("encode error: {0}")]
    Encode(#[source] bincode::Error),
    #[error("decode error: {0}")]
    Decode(#[source] bincode::Error),
}

/// Writes one length-prefixed packet to the stream.
pub async fn write_frame<W>(writer: &mut W, packet: &Packet) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let payload = bincode::serialize(packet).map_err(FrameError::Encode)?;
    let len = payload.len() as u32;
    if len > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(len));
    }
    // One write per frame: a separate length write would sit unacked under
    // Nagle and stall the payload segment behind the peer's delayed ACK.
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&payload);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one length-prefixed packet from the stream. An EOF before the
/// length prefix surfaces as `Io(UnexpectedEof)`.
pub async fn read_frame<R>(reader: &mut R) -> Result<Packet, FrameError>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await?;
    if len > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(len));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    bincode::deserialize(&payload).map_err(FrameError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_serialization_connect() {
        let packet = Packet::Connect {
            name: "alice".to_string(),
        };
        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Packet::Connect { name } => assert_eq!(name, "alice"),
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn packet_serialization_attack() {
        let target_id = Uuid::new_v4();
        let packet = Packet::Attack {
            text: "orange".to_string(),
            target_id,
        };

        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Packet::Attack { text, target_id: t } => {
                assert_eq!(text, "orange");
                assert_eq!(t, target_id);
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn packet_serialization_connected_roster() {
        let players = vec![
            PlayerSnapshot {
                id: Uuid::new_v4(),
                name: "alice".to_string(),
                health: INITIAL_HEALTH,
            },
            PlayerSnapshot {
                id: Uuid::new_v4(),
                name: "bob".to_string(),
                health: 3,
            },
        ];
        let token = Uuid::new_v4();

        let packet = Packet::Connected {
            token,
            players: players.clone(),
        };

        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Packet::Connected {
                token: t,
                players: p,
            } => {
                assert_eq!(t, token);
                assert_eq!(p, players);
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn packet_serialization_damage_negative_health() {
        let id = Uuid::new_v4();
        let packet = Packet::Damage { id, health: -2 };

        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Packet::Damage { id: i, health } => {
                assert_eq!(i, id);
                assert_eq!(health, -2);
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[tokio::test]
    async fn frame_roundtrip() {
        let (mut a, mut b) = tokio::io::duplex(1024);

        let packet = Packet::Question {
            text: "apple".to_string(),
        };
        write_frame(&mut a, &packet).await.unwrap();

        let received = read_frame(&mut b).await.unwrap();
        match received {
            Packet::Question { text } => assert_eq!(text, "apple"),
            _ => panic!("Wrong packet type after frame roundtrip"),
        }
    }

    #[tokio::test]
    async fn frame_preserves_order() {
        let (mut a, mut b) = tokio::io::duplex(4096);

        for i in 0..10i32 {
            let packet = Packet::Damage {
                id: Uuid::nil(),
                health: i,
            };
            write_frame(&mut a, &packet).await.unwrap();
        }

        for i in 0..10i32 {
            match read_frame(&mut b).await.unwrap() {
                Packet::Damage { health, .. } => assert_eq!(health, i),
                _ => panic!("Wrong packet type"),
            }
        }
    }

    #[tokio::test]
    async fn frame_rejects_oversized_length() {
        let (mut a, mut b) = tokio::io::duplex(64);

        a.write_u32(MAX_FRAME_LEN + 1).await.unwrap();

        match read_frame(&mut b).await {
            Err(FrameError::TooLarge(len)) => assert_eq!(len, MAX_FRAME_LEN + 1),
            other => panic!("Expected TooLarge, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn frame_eof_is_io_error() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);

        match read_frame(&mut b).await {
            Err(FrameError::Io(e)) => {
                assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof)
            }
            other => panic!("Expected Io error, got {:?}", other),
        }
    }
}
