use clap::Parser;
use client::command::{Command, HELP};
use client::peer::Peer;
use client::session::ReconnectPolicy;
use log::{error, info};
use shared::persistence::{FileSnapshotStore, SnapshotStore, DEFAULT_SAVE_FILE};
use shared::DEFAULT_PORT;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Relay address to connect to
    #[arg(short = 's', long, default_value_t = format!("127.0.0.1:{}", DEFAULT_PORT))]
    server: String,

    /// File used when offline and by the `save` command
    #[arg(short = 'p', long, default_value = DEFAULT_SAVE_FILE)]
    save_path: PathBuf,

    /// Extra connection attempts before falling back to offline mode
    #[arg(short, long, default_value = "0")]
    retries: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let store = FileSnapshotStore::new(&args.save_path);
    let policy = ReconnectPolicy::with_retries(args.retries);

    info!("Connecting to relay at {}", args.server);
    let mut peer = Peer::start(&args.server, &store, &policy).await;
    println!("{} ({} tiles), type `help` for commands", peer.state(), peer.snapshot().await.len());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        match Command::parse(&line) {
            Ok(Command::Quit) => break,
            Ok(command) => run_command(&mut peer, &store, command).await,
            Err(e) => eprintln!("{}", e),
        }
    }

    if let Err(e) = peer.save(&store).await {
        error!("Failed to save grid to {}: {}", store.path().display(), e);
    }

    Ok(())
}

async fn run_command(peer: &mut Peer, store: &dyn SnapshotStore, command: Command) {
    match command {
        Command::Toggle(position) => match peer.toggle(position).await {
            Ok(true) => println!("{} on", position),
            Ok(false) => println!("{} off", position),
            Err(e) => eprintln!("{}", e),
        },
        Command::Set(position, enabled) => match peer.set_tile(position, enabled).await {
            Ok(true) => println!("{} {}", position, if enabled { "on" } else { "off" }),
            Ok(false) => println!("{} unchanged", position),
            Err(e) => eprintln!("{}", e),
        },
        Command::List => {
            let snapshot = peer.snapshot().await;
            for position in &snapshot.positions {
                println!("{}", position);
            }
            println!("{} tiles", snapshot.len());
        }
        Command::Status => {
            println!("{}, {} tiles", peer.state(), peer.snapshot().await.len());
        }
        Command::Save => match peer.save(store).await {
            Ok(()) => println!("saved"),
            Err(e) => eprintln!("save failed: {}", e),
        },
        Command::Help => println!("{}", HELP),
        Command::Quit => {}
    }
}
