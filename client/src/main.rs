use clap::Parser;
use client::config::ClientConfig;
use client::movement::{CircleWalker, MovementFilter, DEFAULT_THRESHOLD};
use client::network::Client;
use log::{info, warn};
use std::time::{Duration, Instant};
use tokio::time::{interval, MissedTickBehavior};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1")]
    server: String,

    /// Server UDP port
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,

    /// Minimum movement before a new position is sent
    #[arg(short, long, default_value_t = DEFAULT_THRESHOLD)]
    threshold: f32,

    /// Radius of the circle the demo player walks
    #[arg(short, long, default_value = "10.0")]
    radius: f32,

    /// Angular speed in radians per second
    #[arg(long, default_value = "1.0")]
    speed: f32,
}

const FRAME_TIME: Duration = Duration::from_millis(16);
const REPORT_INTERVAL: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let mut client = Client::connect(&args.server, args.port, ClientConfig::default()).await?;
    client.start()?;
    info!("Walking a circle of radius {} as client {}", args.radius, client.local_id());

    let mut walker = CircleWalker::new(args.radius, args.speed);
    let mut filter = MovementFilter::new(args.threshold);

    let mut frames = interval(FRAME_TIME);
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_frame = Instant::now();
    let mut last_report = Instant::now();

    loop {
        tokio::select! {
            _ = frames.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, disconnecting...");
                break;
            }
        }

        if !client.is_connected() {
            warn!("Server went away");
            break;
        }

        let now = Instant::now();
        let position = walker.advance((now - last_frame).as_secs_f32());
        last_frame = now;

        if filter.should_send(position) {
            client.submit_position(position)?;
        }

        for line in client.take_chat() {
            info!("Chat from {}: {}", line.sender, line.text);
        }

        if last_report.elapsed() >= REPORT_INTERVAL {
            last_report = now;
            let others = client.snapshot();
            info!("{} other players visible", others.len());
            for (id, pos) in &others {
                info!("  player {} at ({:.2}, {:.2}, {:.2})", id, pos.x, pos.y, pos.z);
            }
            if let Some(rtt) = client.last_rtt() {
                info!("Round trip: {:?}", rtt);
            }
            client.ping()?;
        }
    }

    client.stop().await;
    Ok(())
}
