//! Interest management benchmarks
//!
//! Measures a full server tick (movement, AOI, replication) and raw locator
//! queries at increasing entity counts.
//!
//! Run with: cargo bench --bench interest

use std::sync::Arc;

use ambit_server::config::ServerConfig;
use ambit_server::game::components::{BoundingBox, Input, InputState, InputType, Position};
use ambit_server::game::registry::Entity;
use ambit_server::game::simulation::Simulation;
use ambit_server::game::spatial::SpatialLocator;
use ambit_server::metrics::Metrics;
use ambit_server::net::receiver::{ConnectionEvent, InputChangeRequest};
use ambit_server::net::replication::ReplicationConfig;
use ambit_server::net::sink::RecordingSink;
use ambit_server::util::vec3::Vec3;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Side length of the square the entities are scattered over
const WORLD_SIZE: f32 = 4000.0;

const HEADINGS: [InputType; 4] = [InputType::Up, InputType::Down, InputType::Left, InputType::Right];

fn random_position(rng: &mut StdRng) -> Position {
    Position::new(
        rng.gen_range(-WORLD_SIZE / 2.0..WORLD_SIZE / 2.0),
        rng.gen_range(-WORLD_SIZE / 2.0..WORLD_SIZE / 2.0),
        0.0,
    )
}

fn random_input(rng: &mut StdRng) -> Input {
    Input::default().with(HEADINGS[rng.gen_range(0..HEADINGS.len())], InputState::Pressed)
}

/// A simulation with `count` entities, a quarter of them clients, all moving
fn create_simulation(count: usize) -> Simulation<RecordingSink> {
    let mut rng = StdRng::seed_from_u64(count as u64);
    let mut sim = Simulation::new(
        &ServerConfig::default(),
        &ReplicationConfig::default(),
        RecordingSink::new(),
        Arc::new(Metrics::new()),
    );

    let clients = count / 4;
    for i in 0..count - clients {
        let npc = sim.spawn_dynamic_object(&format!("NPC {}", i), 2, random_position(&mut rng));
        sim.set_object_input(npc, random_input(&mut rng));
    }

    let producers = sim.producers();
    for net_id in 0..clients as u32 {
        let _ = producers.connections.push(ConnectionEvent::Connected(net_id));
    }
    let _ = sim.tick();

    // Clients all spawn on one point; spread them out with held inputs
    let tick = sim.current_tick();
    for net_id in 0..clients as u32 {
        let _ = producers.inputs.push(InputChangeRequest {
            net_id,
            tick_num: tick,
            input: random_input(&mut rng),
        });
    }
    for _ in 0..30 {
        let _ = sim.tick();
    }
    sim.sink_mut().take();
    sim
}

fn bench_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick");
    group.sample_size(30);

    for count in [100, 500, 1000, 2000] {
        let mut sim = create_simulation(count);

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("full_pipeline", count), &count, |b, _| {
            b.iter(|| {
                let report = sim.tick();
                sim.sink_mut().take();
                black_box(report)
            });
        });
    }

    group.finish();
}

fn bench_locator_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("locator");

    for count in [100, 500, 1000, 2000] {
        let mut rng = StdRng::seed_from_u64(7);
        let mut locator = SpatialLocator::default();
        let model = BoundingBox::centered(8.0, 32.0);
        for i in 0..count as u32 {
            let position = random_position(&mut rng);
            locator.insert_or_update(Entity::new(i, 0), BoundingBox::model_to_world(&model, &position));
        }

        let mut out = Vec::new();
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("query_radius", count), &count, |b, _| {
            b.iter(|| {
                locator.query_radius_into(black_box(Vec3::ZERO), 400.0, &mut out);
                black_box(out.len())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_tick, bench_locator_query);
criterion_main!(benches);
