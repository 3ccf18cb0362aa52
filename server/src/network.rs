//! Session server: bridges TCP connections and the game session.
//!
//! Inbound frames become actions on the session's action channel; events
//! coming back out of the session are fanned out to every attached stream.
//! Each connection gets its own reader task and writer task with an
//! unbounded outbound queue in between, so one stalled peer cannot hold up
//! the fan-out loop or the game.

use crate::registry::{AdmitError, CloseReason, ConnectionRegistry};
use crate::session::{Action, Event, Session, SessionConfig};
use crate::words::WordSource;
use log::{debug, error, info, warn};
use shared::{read_frame, write_frame, FrameError, Packet, PlayerSnapshot};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, RwLock};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// How long a connection may stay silent before eviction.
    pub idle_timeout: Duration,
    /// How often the reaper sweeps for idle connections.
    pub reap_interval: Duration,
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(15 * 60),
            reap_interval: Duration::from_secs(60),
            session: SessionConfig::default(),
        }
    }
}

/// Orchestrator for one game session and its connections.
pub struct SessionServer {
    listener: TcpListener,
    registry: Arc<RwLock<ConnectionRegistry>>,
    session: Session,
    events: Option<mpsc::UnboundedReceiver<Event>>,
    config: ServerConfig,
}

impl SessionServer {
    pub async fn bind(
        addr: &str,
        config: ServerConfig,
        words: Box<dyn WordSource>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let (session, events) = Session::spawn(config.session.clone(), words);
        // Admission capacity is the session's player requirement.
        let registry = Arc::new(RwLock::new(ConnectionRegistry::new(
            config.session.required_players,
        )));

        Ok(SessionServer {
            listener,
            registry,
            session,
            events: Some(events),
            config,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Session handle, for inspection outside the network path.
    pub fn session(&self) -> Session {
        self.session.clone()
    }

    /// Accepts connections until the listener fails. Never returns in
    /// normal operation.
    pub async fn run(mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_fan_out();
        self.spawn_reaper();

        info!("Server started successfully");

        loop {
            let (stream, addr) = self.listener.accept().await?;
            debug!("accepted connection from {}", addr);

            let registry = Arc::clone(&self.registry);
            let session = self.session.clone();
            tokio::spawn(async move {
                if let Err(e) = serve_connection(stream, registry, session).await {
                    debug!("connection from {} closed: {}", addr, e);
                }
            });
        }
    }

    /// Spawns the single consumer of the session's event stream.
    fn spawn_fan_out(&mut self) {
        let Some(mut events) = self.events.take() else {
            return;
        };
        let registry = Arc::clone(&self.registry);

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                fan_out(&registry, event).await;
            }
            debug!("event stream closed, fan-out stopping");
        });
    }

    /// Spawns the idle-connection reaper.
    fn spawn_reaper(&self) {
        let registry = Arc::clone(&self.registry);
        let idle_timeout = self.config.idle_timeout;
        let mut interval = tokio::time::interval(self.config.reap_interval);

        tokio::spawn(async move {
            // The first tick fires immediately; skip it.
            interval.tick().await;

            loop {
                interval.tick().await;

                let idle = {
                    let mut registry = registry.write().await;
                    registry.take_idle(idle_timeout)
                };

                for (token, close_tx) in idle {
                    info!("evicting idle connection {}", token);
                    if close_tx.send(CloseReason::ClientTimeout).is_err() {
                        debug!("close signal for {} had no listener", token);
                    }
                }
            }
        });
    }
}

/// Delivers one event to the connections that should see it. `WordAssigned`
/// is private to the named player; everything else is broadcast. Failures
/// are logged and skipped.
async fn fan_out(registry: &Arc<RwLock<ConnectionRegistry>>, event: Event) {
    match event {
        Event::WordAssigned { player, word } => {
            let outbound = {
                let registry = registry.read().await;
                registry.outbound_for(player)
            };

            match outbound {
                Some(out) => {
                    if out.send(Packet::Question { text: word }).is_err() {
                        debug!("question for {} dropped, stream gone", player);
                    }
                }
                None => debug!("no active stream for {}", player),
            }
        }
        event => {
            let packet = match event {
                Event::RoundStarting => Packet::Start,
                Event::HealthChanged { player, health } => Packet::Damage { id: player, health },
                Event::PlayerJoined { player } => Packet::Join { player },
                Event::GameOver { winner } => Packet::Finish { winner },
                Event::WordAssigned { .. } => unreachable!("handled above"),
            };

            let targets = {
                let registry = registry.read().await;
                registry.attached()
            };

            for (token, out) in targets {
                if out.send(packet.clone()).is_err() {
                    debug!("broadcast to {} dropped, stream gone", token);
                }
            }
        }
    }
}

/// Handles one TCP connection from handshake to teardown.
///
/// The first frames must be `Connect` (admission) and/or `Attach` (stream
/// upgrade); a client may do both on one connection or use separate ones.
async fn serve_connection(
    stream: TcpStream,
    registry: Arc<RwLock<ConnectionRegistry>>,
    session: Session,
) -> Result<(), FrameError> {
    let (mut reader, mut writer) = stream.into_split();

    loop {
        match read_frame(&mut reader).await? {
            Packet::Connect { name } => {
                match admit(&registry, &session, &name).await {
                    Ok((token, players)) => {
                        write_frame(&mut writer, &Packet::Connected { token, players }).await?;
                    }
                    Err(e) => {
                        warn!("rejecting {}: {}", name, e);
                        write_frame(
                            &mut writer,
                            &Packet::Disconnected {
                                reason: e.to_string(),
                            },
                        )
                        .await?;
                        return Ok(());
                    }
                }
                // Fall through: the same connection may attach next.
            }
            Packet::Attach { token } => {
                return serve_stream(token, reader, writer, registry, session).await;
            }
            other => {
                warn!("unexpected packet during handshake: {:?}", other);
                return Ok(());
            }
        }
    }
}

/// Admission: reserve a slot in the registry, then register the player
/// with the session. Returns the roster including the new player.
async fn admit(
    registry: &Arc<RwLock<ConnectionRegistry>>,
    session: &Session,
    name: &str,
) -> Result<(Uuid, Vec<PlayerSnapshot>), AdmitError> {
    let token = {
        let mut registry = registry.write().await;
        registry.admit(name)?
    };

    let roster = session.join(token, name).await;
    info!("connected [Name: {}]", name);

    Ok((token, roster))
}

/// The attached phase: reader loop feeding the session, writer task
/// draining the outbound queue, close signal for evictions.
async fn serve_stream(
    token: Uuid,
    mut reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    registry: Arc<RwLock<ConnectionRegistry>>,
    session: Session,
) -> Result<(), FrameError> {
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Packet>();
    let (close_tx, mut close_rx) = oneshot::channel::<CloseReason>();

    {
        let mut registry = registry.write().await;
        if let Err(e) = registry.attach(token, out_tx, close_tx) {
            warn!("attach rejected for {}: {}", token, e);
            write_frame(
                &mut writer,
                &Packet::Disconnected {
                    reason: e.to_string(),
                },
            )
            .await?;
            return Ok(());
        }
    }

    write_frame(&mut writer, &Packet::Attached).await?;
    info!("stream attached for {}", token);

    let writer_task = tokio::spawn(async move {
        while let Some(packet) = out_rx.recv().await {
            if let Err(e) = write_frame(&mut writer, &packet).await {
                error!("failed to send to {}: {}", token, e);
                break;
            }
        }
    });

    let close_reason = loop {
        tokio::select! {
            frame = read_frame(&mut reader) => {
                match frame {
                    Ok(packet) => {
                        {
                            let mut registry = registry.write().await;
                            registry.touch(token);
                        }
                        match packet {
                            Packet::Attack { text, target_id } => {
                                session.submit(Action::Attack {
                                    actor: token,
                                    text,
                                    target: target_id,
                                });
                            }
                            other => {
                                warn!("unexpected packet on stream {}: {:?}", token, other);
                            }
                        }
                    }
                    Err(e) => {
                        debug!("receive error for {}: {}", token, e);
                        break None;
                    }
                }
            }
            reason = &mut close_rx => {
                break reason.ok();
            }
        }
    };

    // Evictions get a final notice through the queue before it closes.
    if let Some(reason) = close_reason {
        let outbound = {
            let registry = registry.read().await;
            registry.outbound_for(token)
        };
        if let Some(out) = outbound {
            let _ = out.send(Packet::Disconnected {
                reason: reason.to_string(),
            });
        }
    }

    // Dropping the registry's sender lets the writer drain and stop. The
    // player's record stays in the session.
    {
        let mut registry = registry.write().await;
        registry.detach(token);
    }
    let _ = writer_task.await;

    info!("{} - stream closed", token);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attach_with_channel(
        registry: &mut ConnectionRegistry,
        name: &str,
    ) -> (Uuid, mpsc::UnboundedReceiver<Packet>) {
        let token = registry.admit(name).unwrap();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (close_tx, _close_rx) = oneshot::channel();
        registry.attach(token, out_tx, close_tx).unwrap();
        (token, out_rx)
    }

    #[tokio::test]
    async fn word_assigned_is_delivered_privately() {
        let mut inner = ConnectionRegistry::new(2);
        let (a, mut rx_a) = attach_with_channel(&mut inner, "alice");
        let (_b, mut rx_b) = attach_with_channel(&mut inner, "bob");
        let registry = Arc::new(RwLock::new(inner));

        fan_out(
            &registry,
            Event::WordAssigned {
                player: a,
                word: "apple".to_string(),
            },
        )
        .await;

        match rx_a.try_recv().unwrap() {
            Packet::Question { text } => assert_eq!(text, "apple"),
            other => panic!("expected Question, got {:?}", other),
        }
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn other_events_are_broadcast_to_all_streams() {
        let mut inner = ConnectionRegistry::new(2);
        let (a, mut rx_a) = attach_with_channel(&mut inner, "alice");
        let (_b, mut rx_b) = attach_with_channel(&mut inner, "bob");
        let registry = Arc::new(RwLock::new(inner));

        fan_out(
            &registry,
            Event::HealthChanged {
                player: a,
                health: 3,
            },
        )
        .await;
        fan_out(
            &registry,
            Event::GameOver {
                winner: "bob".to_string(),
            },
        )
        .await;

        for rx in [&mut rx_a, &mut rx_b] {
            match rx.try_recv().unwrap() {
                Packet::Damage { id, health } => {
                    assert_eq!(id, a);
                    assert_eq!(health, 3);
                }
                other => panic!("expected Damage, got {:?}", other),
            }
            match rx.try_recv().unwrap() {
                Packet::Finish { winner } => assert_eq!(winner, "bob"),
                other => panic!("expected Finish, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn fan_out_skips_detached_streams() {
        let mut inner = ConnectionRegistry::new(2);
        let (a, mut rx_a) = attach_with_channel(&mut inner, "alice");
        let (b, rx_b) = attach_with_channel(&mut inner, "bob");
        drop(rx_b);
        inner.detach(b);
        let registry = Arc::new(RwLock::new(inner));

        fan_out(&registry, Event::RoundStarting).await;

        match rx_a.try_recv().unwrap() {
            Packet::Start => {}
            other => panic!("expected Start, got {:?}", other),
        }
        let _ = a;
    }

    #[test]
    fn default_config_matches_production_policy() {
        let config = ServerConfig::default();
        assert_eq!(config.idle_timeout, Duration::from_secs(900));
        assert_eq!(config.reap_interval, Duration::from_secs(60));
        assert_eq!(config.session.initial_health, shared::INITIAL_HEALTH);
    }
}
