//! Connection handling for the terminal client: the admission handshake,
//! the stream attach, and the select loop joining server frames with
//! typed input.

use crate::game::{parse_command, ClientGameState, Command};
use log::{error, info, warn};
use shared::{read_frame, write_frame, Packet};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

pub struct Client {
    state: ClientGameState,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
}

impl Client {
    /// Runs the Connect/Attach handshake against the server and returns a
    /// client ready to play. Rejections (server full, bad token) surface
    /// as errors with the server's reason.
    pub async fn connect(
        server_addr: &str,
        name: &str,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let stream = TcpStream::connect(server_addr).await?;
        let (mut reader, mut writer) = stream.into_split();

        write_frame(
            &mut writer,
            &Packet::Connect {
                name: name.to_string(),
            },
        )
        .await?;

        let (token, players) = match read_frame(&mut reader).await? {
            Packet::Connected { token, players } => (token, players),
            Packet::Disconnected { reason } => return Err(reason.into()),
            other => return Err(format!("unexpected reply to connect: {:?}", other).into()),
        };

        write_frame(&mut writer, &Packet::Attach { token }).await?;
        match read_frame(&mut reader).await? {
            Packet::Attached => {}
            Packet::Disconnected { reason } => return Err(reason.into()),
            other => return Err(format!("unexpected reply to attach: {:?}", other).into()),
        }

        info!("Connected! Player ID: {}", token);

        Ok(Client {
            state: ClientGameState::new(token, players),
            reader,
            writer,
        })
    }

    /// Plays until the server closes the stream or stdin ends.
    pub async fn run(mut self) -> Result<(), Box<dyn std::error::Error>> {
        let stdin = BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();

        println!("waiting for players...");
        println!("commands: ':aim N' to pin opponent N, ':random' to pick at random");

        loop {
            tokio::select! {
                frame = read_frame(&mut self.reader) => {
                    match frame {
                        Ok(packet) => {
                            if self.handle_packet(packet) {
                                break;
                            }
                        }
                        Err(e) => {
                            error!("connection lost: {}", e);
                            break;
                        }
                    }
                }
                line = lines.next_line() => {
                    match line? {
                        Some(line) => self.handle_line(&line).await?,
                        None => break,
                    }
                }
            }
        }

        Ok(())
    }

    /// Applies one server frame to the local state. Returns true when the
    /// stream is over.
    fn handle_packet(&mut self, packet: Packet) -> bool {
        match packet {
            Packet::Start => {
                println!("{}", self.state.handle_start());
            }
            Packet::Question { text } => {
                println!("{}", self.state.handle_question(text));
            }
            Packet::Damage { id, health } => {
                println!("{}", self.state.handle_damage(id, health));
                for line in self.state.status_lines() {
                    println!("{}", line);
                }
            }
            Packet::Join { player } => {
                println!("{}", self.state.handle_join(player));
            }
            Packet::Finish { winner } => {
                println!("{}", self.state.handle_finish(&winner));
                println!("Press ctrl+c to exit");
            }
            Packet::Disconnected { reason } => {
                warn!("disconnected by server: {}", reason);
                return true;
            }
            other => {
                warn!("unexpected packet: {:?}", other);
            }
        }
        false
    }

    async fn handle_line(&mut self, line: &str) -> Result<(), Box<dyn std::error::Error>> {
        let Some(command) = parse_command(line) else {
            return Ok(());
        };

        match command {
            Command::ModeChange { mode } => {
                self.state.set_mode(mode);
                match self.state.target_name() {
                    Some(name) => println!("targeting {}", name),
                    None => println!("no opponents to target yet"),
                }
            }
            Command::Attack { text } => {
                let Some(target_id) = self.state.target() else {
                    warn!("no target selected, answer dropped");
                    return Ok(());
                };
                write_frame(&mut self.writer, &Packet::Attack { text, target_id }).await?;
            }
        }

        Ok(())
    }
}
