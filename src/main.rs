use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Context;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{error, info, trace, warn};
use tracing_subscriber::EnvFilter;

use ambit_server::config::ServerConfig;
use ambit_server::game::components::{Input, InputState, InputType, Position};
use ambit_server::game::registry::Entity;
use ambit_server::game::simulation::{log_status_change, Simulation};
use ambit_server::game::tick_clock::TickClock;
use ambit_server::metrics::{self, Metrics};
use ambit_server::net::protocol::ServerMessage;
use ambit_server::net::queue::MessageQueue;
use ambit_server::net::receiver::{spawn_receiver, RawFrame};
use ambit_server::net::replication::ReplicationConfig;
use ambit_server::net::sink::{ChannelSink, MessageSink};

/// Distance of spawned NPCs from the spawn point
const NPC_RING_RADIUS: f32 = 300.0;
/// Sprite drawn for NPCs
const NPC_SPRITE: u16 = 2;
/// Seconds between NPC heading changes
const NPC_WANDER_INTERVAL_S: u32 = 2;
/// Seconds between stats lines
const STATS_INTERVAL_S: u32 = 30;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Ambit Server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::load_or_default();
    config.validate()?;
    let replication = ReplicationConfig::load_or_default(config.replication_config.as_deref())?;
    info!(
        "Configuration loaded: {} Hz, AOI radius {}, cell size {}, {} NPCs",
        config.tick_rate, config.aoi_radius, config.locator_cell_size, config.npc_count
    );

    let metrics = Arc::new(Metrics::new());
    if config.metrics_port != 0 {
        let metrics_clone = metrics.clone();
        let port = config.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = metrics::start_metrics_server(metrics_clone, port).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    // Transport boundary: raw frames in, encoded frames out
    let (frame_tx, frame_rx) = crossbeam_channel::bounded::<RawFrame>(config.queue_capacity);
    let outbound = MessageQueue::<RawFrame>::new("outbound", config.queue_capacity);

    let sink = ChannelSink::new(outbound.producer(), metrics.clone());
    let mut sim = Simulation::new(&config, &replication, sink, metrics.clone());
    let receiver =
        spawn_receiver(frame_rx, sim.producers()).context("failed to start receive thread")?;

    let npcs = spawn_npcs(&mut sim, &config);
    let mut rng = StdRng::from_entropy();

    let mut clock = TickClock::from_rate(config.tick_rate);
    let mut ticker = interval(clock.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let wander_every = config.tick_rate * NPC_WANDER_INTERVAL_S;
    let stats_every = config.tick_rate * STATS_INTERVAL_S;
    let mut ticks_run: u32 = 0;

    let shutdown = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };
    tokio::pin!(shutdown);

    info!("Simulation started at {} Hz", config.tick_rate);
    let start = Instant::now();
    let mut last_wake = Instant::now();

    'run: loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break 'run;
            }
        }

        let now = Instant::now();
        clock.advance(now.duration_since(last_wake));
        last_wake = now;

        while clock.consume_tick() {
            if ticks_run % wander_every == 0 {
                wander(&mut sim, &npcs, &mut rng);
            }

            match sim.tick() {
                Ok(report) => {
                    if let Some(status) = report.status_change {
                        log_status_change(status, sim.performance());
                    }
                }
                Err(e) => {
                    error!("Stopping after fatal simulation error: {}", e);
                    break 'run;
                }
            }
            ticks_run = ticks_run.wrapping_add(1);

            if ticks_run % stats_every == 0 {
                info!(
                    "Sim: {}s, tick {}, {} clients, {} entities | Perf: {:?} ({:.1}%) | sent {} msgs",
                    start.elapsed().as_secs(),
                    sim.current_tick(),
                    sim.client_count(),
                    sim.registry().entity_count(),
                    sim.performance().status(),
                    sim.performance().budget_usage_percent(),
                    metrics.messages_sent.load(Ordering::Relaxed)
                );
            }
        }
        metrics
            .clock_stalls
            .store(clock.stall_count(), Ordering::Relaxed);

        deliver(&outbound);
    }

    // Closing the frame channel ends the receive loop
    drop(frame_tx);
    if receiver.join().is_err() {
        warn!("Receive thread panicked");
    }

    info!("Server stopped at tick {}", sim.current_tick());
    Ok(())
}

/// Place NPCs evenly on a ring around the spawn point
fn spawn_npcs<S: MessageSink<ServerMessage>>(sim: &mut Simulation<S>, config: &ServerConfig) -> Vec<Entity> {
    let count = config.npc_count;
    let center = config.spawn_point;
    (0..count)
        .map(|i| {
            let angle = i as f32 / count as f32 * std::f32::consts::TAU;
            let position = Position::new(
                center.x + angle.cos() * NPC_RING_RADIUS,
                center.y + angle.sin() * NPC_RING_RADIUS,
                center.z,
            );
            sim.spawn_dynamic_object(&format!("NPC {}", i), NPC_SPRITE, position)
        })
        .collect()
}

/// Give every NPC a new random heading, or stop it
fn wander<S: MessageSink<ServerMessage>>(sim: &mut Simulation<S>, npcs: &[Entity], rng: &mut StdRng) {
    const HEADINGS: [&[InputType]; 9] = [
        &[],
        &[InputType::Up],
        &[InputType::Down],
        &[InputType::Left],
        &[InputType::Right],
        &[InputType::Up, InputType::Left],
        &[InputType::Up, InputType::Right],
        &[InputType::Down, InputType::Left],
        &[InputType::Down, InputType::Right],
    ];

    for &npc in npcs {
        let heading = HEADINGS[rng.gen_range(0..HEADINGS.len())];
        let input = heading
            .iter()
            .fold(Input::default(), |acc, i| acc.with(*i, InputState::Pressed));
        sim.set_object_input(npc, input);
    }
}

/// Hand encoded frames to the transport
///
/// No socket transport is bundled; frames are drained so the queue never
/// saturates while running headless.
fn deliver(outbound: &MessageQueue<RawFrame>) {
    for frame in outbound.drain() {
        trace!("-> {}: {} bytes", frame.net_id, frame.payload.len());
    }
}
