use clap::Parser;
use log::info;
use server::config::ServerConfig;
use server::network::Server;
use std::time::Duration;
use tokio::time::interval;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// IP address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// UDP port to listen on
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,

    /// Maximum number of connected clients
    #[arg(short, long, default_value = "32")]
    max_clients: usize,

    /// Don't tell clients when another client leaves
    #[arg(long)]
    no_departures: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        max_peers: args.max_clients,
        announce_departures: !args.no_departures,
        ..ServerConfig::default()
    };

    let mut server = Server::bind(config).await?;
    server.start()?;
    info!("Server running on {}, press Ctrl+C to stop", server.local_addr());

    let mut status = interval(Duration::from_secs(10));
    loop {
        tokio::select! {
            _ = status.tick() => {
                info!("{} peers connected", server.peer_count());
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    server.stop().await;
    Ok(())
}
