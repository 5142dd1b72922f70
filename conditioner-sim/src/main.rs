use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use stream_conditioner::{
    create_conditioner, ConditionerConfig, ConditionerMode, FpsRange, SimulatedTransport,
    StatsReporter, SystemClock, TokioTicker,
};
use tracing_subscriber::EnvFilter;

/// Conditioner simulator
///
/// - Streams into a simulated link with a fixed capacity
/// - Packets beyond the capacity are dropped at random
/// - Logs every bitrate and frame-rate decision of the chosen strategy
#[derive(Parser)]
#[command(name = "conditioner-sim")]
#[command(about = "Drive a stream conditioner against a simulated lossy link")]
struct Cli {
    /// Strategy: off, linear or stepped (overrides the config file)
    #[arg(short, long)]
    mode: Option<ConditionerMode>,

    /// Nominal stream bitrate in bits per second
    #[arg(short, long, default_value_t = 2_000_000)]
    bitrate: u32,

    /// Link capacity in bits per second
    #[arg(short, long, default_value_t = 1_200_000)]
    capacity: u32,

    /// Capacity during the middle third of the run, if the link degrades
    #[arg(long)]
    degraded_capacity: Option<u32>,

    /// Random loss independent of load, as a fraction of packets
    #[arg(long, default_value_t = 0.0)]
    base_loss: f64,

    /// Run time in seconds
    #[arg(short, long, default_value_t = 120)]
    duration: u64,

    /// Frame-rate ceiling (overrides the config file)
    #[arg(long)]
    max_fps: Option<u32>,

    /// Scale frame rate with bitrate
    #[arg(long)]
    adaptive_fps: bool,

    /// TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seed for the loss model
    #[arg(long)]
    seed: Option<u64>,
}

/// Link model tick
const LINK_TICK: Duration = Duration::from_millis(100);
const STATS_INTERVAL: Duration = Duration::from_secs(5);
const CONNECTION: u64 = 1;
const PACKET_BITS: u64 = 1200 * 8;
/// Audio packets per link tick (50 pkt/s)
const AUDIO_PACKETS_PER_TICK: u64 = 5;

/// Random loss model for one link
struct LossyLink {
    capacity: u32,
    base_loss: f64,
    rng: StdRng,
}

impl LossyLink {
    /// Share of packets dropped when sending at `bitrate`
    fn drop_probability(&self, bitrate: u32) -> f64 {
        let overload = if bitrate > self.capacity && bitrate > 0 {
            (bitrate - self.capacity) as f64 / bitrate as f64
        } else {
            0.0
        };
        (overload + self.base_loss).clamp(0.0, 1.0)
    }

    /// Push one tick of traffic at `bitrate` through the link
    fn carry(&mut self, transport: &SimulatedTransport, bitrate: u32) {
        let video_packets = bitrate as u64 * LINK_TICK.as_millis() as u64 / 1000 / PACKET_BITS;
        let probability = self.drop_probability(bitrate);

        let mut video_lost = 0;
        for _ in 0..video_packets {
            if self.rng.gen_bool(probability) {
                video_lost += 1;
            }
        }
        let mut audio_lost = 0;
        for _ in 0..AUDIO_PACKETS_PER_TICK {
            if self.rng.gen_bool(probability) {
                audio_lost += 1;
            }
        }

        transport.record_sent(CONNECTION, AUDIO_PACKETS_PER_TICK, video_packets, 0);
        transport.inject_loss(CONNECTION, audio_lost, video_lost, 0);
    }
}

fn load_config(cli: &Cli) -> Result<ConditionerConfig> {
    let mut config = match &cli.config {
        Some(path) => ConditionerConfig::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ConditionerConfig::default(),
    };
    if let Some(mode) = cli.mode {
        config.mode = mode;
    }
    if let Some(max_fps) = cli.max_fps {
        config.max_fps = max_fps;
    }
    if cli.adaptive_fps {
        config.adaptive_fps = true;
    }
    config.validate()?;
    Ok(config)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = load_config(&cli)?;
    tracing::info!(
        "Simulating {} conditioner: {} bps into a {} bps link for {}s",
        config.mode,
        cli.bitrate,
        cli.capacity,
        cli.duration
    );

    let transport = Arc::new(SimulatedTransport::with_fps_ranges([
        FpsRange::fixed(15),
        FpsRange::fixed(20),
        FpsRange::fixed(25),
        FpsRange::fixed(30),
    ]));
    transport.add_connection(CONNECTION);

    let mut conditioner = create_conditioner(
        config,
        Arc::new(SystemClock),
        Box::new(TokioTicker::current()?),
    );
    match conditioner.as_mut() {
        Some(handle) => handle.start(transport.clone(), cli.bitrate, [CONNECTION]),
        None => tracing::info!("Conditioning off, streaming at a fixed {} bps", cli.bitrate),
    }

    let mut link = LossyLink {
        capacity: cli.capacity,
        base_loss: cli.base_loss,
        rng: match cli.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        },
    };
    let mut reporter = StatsReporter::new("link");

    let run_time = Duration::from_secs(cli.duration);
    let degrade_from = run_time / 3;
    let degrade_until = run_time * 2 / 3;
    let started = tokio::time::Instant::now();

    let mut link_interval = tokio::time::interval(LINK_TICK);
    let mut stats_interval = tokio::time::interval(STATS_INTERVAL);
    let deadline = tokio::time::sleep(run_time);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                tracing::info!("Simulation finished");
                break;
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }

            _ = link_interval.tick() => {
                if let Some(degraded) = cli.degraded_capacity {
                    let elapsed = started.elapsed();
                    let capacity = if elapsed >= degrade_from && elapsed < degrade_until {
                        degraded
                    } else {
                        cli.capacity
                    };
                    if capacity != link.capacity {
                        tracing::info!("Link capacity {} -> {} bps", link.capacity, capacity);
                        link.capacity = capacity;
                    }
                }

                let bitrate = match &conditioner {
                    Some(handle) => handle.get_bitrate(),
                    None => cli.bitrate,
                };
                link.carry(&transport, bitrate);
            }

            _ = stats_interval.tick() => {
                if let Err(e) = reporter.report(transport.as_ref(), [CONNECTION]) {
                    tracing::warn!("Stats unavailable: {}", e);
                }
            }
        }
    }

    if let Some(handle) = conditioner.as_mut() {
        handle.stop();
    }
    reporter.report(transport.as_ref(), [CONNECTION])?;
    tracing::info!(
        "Issued {} bitrate and {} fps-range command(s)",
        transport.bitrate_commands().len(),
        transport.fps_commands().len()
    );
    Ok(())
}
