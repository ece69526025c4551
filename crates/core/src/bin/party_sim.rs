//! Watch party sync simulator
//!
//! Runs a host and several followers against the in-memory backend with
//! simulated players that drift at different rates, then reports how far
//! each follower ended up from the host.
//!
//! # Usage
//!
//! ```bash
//! cargo run -p watchparty-core --features cli --bin party_sim -- \
//!   --followers 4 \
//!   --duration-secs 30 \
//!   --start-at 120 \
//!   --late-join-secs 8
//!
//! # Override sync tunables from YAML
//! cargo run -p watchparty-core --features cli --bin party_sim -- --config ./party.yaml
//! ```

use anyhow::Context;
use clap::Parser;
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use watchparty_core::{
    Episode, EpisodeId, InMemoryPartyBackend, PartyBackend, PartyId, PlaybackCoordinator,
    SimulatedPlayer, UserId, VideoPlayer, WatchPartyConfig,
};

/// Watch party playback sync simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file (sync and vad sections)
    #[arg(short, long, env = "WATCHPARTY_CONFIG")]
    config: Option<PathBuf>,

    /// Number of followers
    #[arg(long, default_value_t = 3, env = "WATCHPARTY_FOLLOWERS")]
    followers: usize,

    /// Simulated wall time in seconds
    #[arg(long, default_value_t = 20)]
    duration_secs: u64,

    /// Host start position in seconds
    #[arg(long, default_value_t = 120)]
    start_at: u32,

    /// Delay before the last follower joins
    #[arg(long, default_value_t = 5)]
    late_join_secs: u64,

    /// Simulated seek latency in milliseconds
    #[arg(long, default_value_t = 150)]
    seek_latency_ms: u64,
}

struct Follower {
    name: String,
    player: Arc<SimulatedPlayer>,
    coordinator: PlaybackCoordinator,
    corrections: Arc<AtomicUsize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("invalid RUST_LOG filter")?;
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => WatchPartyConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => WatchPartyConfig::default(),
    };
    let seek_latency = Duration::from_millis(args.seek_latency_ms);

    let backend = Arc::new(InMemoryPartyBackend::new());
    for number in 1..=3 {
        backend.insert_episode(Episode {
            id: EpisodeId::new(format!("s1e{number}")),
            series_id: "demo".to_string(),
            season_number: 1,
            episode_number: number,
            title: format!("Episode {number}"),
        });
    }

    let host_id = UserId::new("host");
    let party = backend
        .create_party(&host_id, "Host", Some(EpisodeId::new("s1e1")))
        .await?;
    info!(party = %party.id, "Party created");

    let (host_player, host_events) = SimulatedPlayer::new(1.0, seek_latency);
    let host = PlaybackCoordinator::new(
        backend.clone(),
        party.id.clone(),
        host_id.clone(),
        host_player.clone(),
        config.sync.clone(),
    )
    .await?;
    host.spawn(host_events).await?;
    let _host_clock = host_player.start_clock();
    host_player.seek(args.start_at as f64);
    host_player.play()?;

    let early = args.followers.saturating_sub(1);
    let mut followers: Vec<Follower> = join_all((0..early).map(|i| {
        join_follower(backend.clone(), party.id.clone(), i, &config, seek_latency)
    }))
    .await
    .into_iter()
    .collect::<Result<_, _>>()?;

    if args.followers > 0 {
        tokio::time::sleep(Duration::from_secs(args.late_join_secs)).await;
        info!("Late follower joining");
        followers.push(
            join_follower(backend.clone(), party.id.clone(), early, &config, seek_latency).await?,
        );
    }

    let remaining = args.duration_secs.saturating_sub(args.late_join_secs);
    tokio::time::sleep(Duration::from_secs(remaining / 2)).await;

    info!("Host pauses");
    host_player.pause();
    tokio::time::sleep(Duration::from_secs(2)).await;
    info!("Host resumes");
    host_player.play()?;
    tokio::time::sleep(Duration::from_secs(remaining - remaining / 2)).await;

    let host_time = host_player.current_time();
    info!(time = host_time, "Host final position");
    for follower in &followers {
        let time = follower.player.current_time();
        let drift = (time - host_time).abs();
        let corrections = follower.corrections.load(Ordering::Relaxed);
        if drift > config.sync.drift_threshold_secs + 1.0 {
            warn!(follower = %follower.name, drift, corrections, "Follower out of sync");
        } else {
            info!(follower = %follower.name, time, drift, corrections, "Follower in sync");
        }
        follower.coordinator.shutdown();
    }
    host.shutdown();

    Ok(())
}

async fn join_follower(
    backend: Arc<InMemoryPartyBackend>,
    party_id: PartyId,
    index: usize,
    config: &WatchPartyConfig,
    seek_latency: Duration,
) -> anyhow::Result<Follower> {
    let name = format!("viewer-{index}");
    let user = UserId::new(name.clone());
    backend.join_party(&party_id, &user, &name).await?;

    // Alternate fast and slow clocks so corrections happen in both directions.
    let skew = 0.03 * (index / 2 + 1) as f64;
    let rate = if index % 2 == 0 { 1.0 + skew } else { 1.0 - skew };
    let (player, events) = SimulatedPlayer::new(rate, seek_latency);

    let coordinator = PlaybackCoordinator::new(
        backend,
        party_id,
        user,
        player.clone(),
        config.sync.clone(),
    )
    .await?;
    coordinator.spawn(events).await?;

    let corrections = Arc::new(AtomicUsize::new(0));
    let mut syncing = coordinator.syncing();
    let counter = corrections.clone();
    tokio::spawn(async move {
        while syncing.changed().await.is_ok() {
            if *syncing.borrow() {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }
    });

    let _clock = player.start_clock();
    player.mark_ready();
    info!(follower = %name, rate, "Follower joined");

    Ok(Follower {
        name,
        player,
        coordinator,
        corrections,
    })
}
