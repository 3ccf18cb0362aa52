use clap::Parser;
use log::info;
use server::network::{ServerConfig, SessionServer};
use server::session::SessionConfig;
use server::words::WordList;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8743")]
    port: u16,

    /// Number of players in the game
    #[arg(short = 'n', long, default_value = "5")]
    players: usize,

    /// Word list file (one word per line); built-in list if omitted
    #[arg(short, long)]
    words: Option<PathBuf>,

    /// Idle timeout in seconds before a silent connection is evicted
    #[arg(long, default_value = "900")]
    idle_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let words = match &args.words {
        Some(path) => {
            info!("loading words from {}", path.display());
            WordList::from_file(path)?
        }
        None => WordList::builtin(),
    };

    let config = ServerConfig {
        idle_timeout: Duration::from_secs(args.idle_timeout),
        session: SessionConfig {
            required_players: args.players,
            ..SessionConfig::default()
        },
        ..ServerConfig::default()
    };

    let addr = format!("{}:{}", args.host, args.port);
    let server = SessionServer::bind(&addr, config, Box::new(words)).await?;

    server.run().await
}
