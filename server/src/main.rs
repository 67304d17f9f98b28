use clap::Parser;
use log::{error, info, warn};
use server::autosave;
use server::relay::Relay;
use shared::persistence::{FileSnapshotStore, SnapshotStore, DEFAULT_SAVE_FILE};
use shared::{Snapshot, DEFAULT_PORT};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// File the grid is loaded from at startup and saved to
    #[arg(short, long, default_value = DEFAULT_SAVE_FILE)]
    save_path: PathBuf,

    /// Seconds between automatic saves (0 disables them)
    #[arg(short = 'i', long, default_value = "30")]
    save_interval: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let store = FileSnapshotStore::new(&args.save_path);

    let initial = match store.load() {
        Ok(Some(snapshot)) => {
            info!(
                "Loaded {} tiles from {}",
                snapshot.len(),
                store.path().display()
            );
            snapshot
        }
        Ok(None) => {
            info!("No saved grid at {}, starting empty", store.path().display());
            Snapshot::default()
        }
        Err(e) => {
            warn!("Ignoring unreadable save {}: {}", store.path().display(), e);
            Snapshot::default()
        }
    };

    let address = format!("{}:{}", args.host, args.port);
    let handle = Relay::bind(&address, initial).await?.spawn();

    let save_interval = (args.save_interval > 0).then(|| Duration::from_secs(args.save_interval));

    autosave::run_until(handle, &store, save_interval, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    })
    .await;

    Ok(())
}
