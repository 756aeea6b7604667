//! Server simulation: one fixed tick of the whole pipeline
//!
//! Order inside a tick:
//! connections -> tick sync -> input -> movement -> AOI -> replication -> tick++
//!
//! Everything runs on the caller's thread. The network side only ever
//! touches the inbound queues through [`ServerProducers`].

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::game::components::{
    BoundingBox, Collision, EntityType, Input, Interaction, Name, Position, PreviousPosition,
    Rotation, Sprite, Velocity,
};
use crate::game::constants::bounds::{OBJECT_HALF_EXTENT, OBJECT_HEIGHT};
use crate::game::error::SimulationError;
use crate::game::performance::{PerformanceMonitor, PerformanceStatus};
use crate::game::registry::{Entity, Registry};
use crate::game::spatial::SpatialLocator;
use crate::game::systems::connection::{ClientConnectionSystem, ClientIndex, ConnectionReport};
use crate::game::systems::input::{InputStats, InputSystem};
use crate::game::systems::movement;
use crate::game::tick_clock::{SharedTick, TickNum};
use crate::metrics::Metrics;
use crate::net::aoi::{AoiStats, AoiSystem};
use crate::net::protocol::{NetworkId, ServerMessage};
use crate::net::receiver::{ServerProducers, ServerQueues};
use crate::net::replication::{ReplicationConfig, ReplicationStats, ReplicationSystem};
use crate::net::sink::MessageSink;
use crate::net::tick_sync::{TickSync, TickSyncStats};

/// What one call to [`Simulation::tick`] did
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// Tick that was simulated (the counter has since moved on)
    pub tick: TickNum,
    pub connections: ConnectionReport,
    pub sync: TickSyncStats,
    pub input: InputStats,
    pub moved: usize,
    pub aoi: AoiStats,
    pub replication: ReplicationStats,
    pub duration: Duration,
    /// New performance status, when it changed this tick
    pub status_change: Option<PerformanceStatus>,
}

pub struct Simulation<S> {
    registry: Registry,
    locator: SpatialLocator,
    queues: ServerQueues,
    connections: ClientConnectionSystem,
    tick_sync: TickSync,
    inputs: InputSystem,
    aoi: AoiSystem,
    replication: ReplicationSystem,
    performance: PerformanceMonitor,
    tick: SharedTick,
    timestep: f32,
    metrics: Arc<Metrics>,
    sink: S,
}

impl<S: MessageSink<ServerMessage>> Simulation<S> {
    pub fn new(
        config: &ServerConfig,
        replication: &ReplicationConfig,
        sink: S,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            registry: Registry::new(),
            locator: SpatialLocator::new(config.locator_cell_size),
            queues: ServerQueues::new(config.queue_capacity),
            connections: ClientConnectionSystem::new(config.spawn_point),
            tick_sync: TickSync::new(),
            inputs: InputSystem::new(),
            aoi: AoiSystem::new(config.aoi_radius),
            replication: ReplicationSystem::new(replication),
            performance: PerformanceMonitor::new(config.tick_rate),
            tick: SharedTick::new(0),
            timestep: config.timestep(),
            metrics,
            sink,
        }
    }

    /// Producer handles for the receive thread and transport
    pub fn producers(&self) -> ServerProducers {
        self.queues.producers()
    }

    /// Run one tick
    ///
    /// A returned error means an invariant broke; the world is no longer
    /// trustworthy and the caller should stop ticking.
    pub fn tick(&mut self) -> Result<TickReport, SimulationError> {
        let start = Instant::now();
        let tick = self.tick.get();

        let result = self.run_systems(tick);
        let mut report = match result {
            Ok(report) => report,
            Err(e) => {
                error!("[tick {}] Simulation halted: {}", tick, e);
                return Err(e);
            }
        };

        self.tick.increment();

        report.duration = start.elapsed();
        report.status_change = self
            .performance
            .record_tick(report.duration, self.registry.entity_count());
        self.record_metrics(&report);

        Ok(report)
    }

    fn run_systems(&mut self, tick: TickNum) -> Result<TickReport, SimulationError> {
        let mut report = TickReport {
            tick,
            ..Default::default()
        };

        // 1. Connections
        report.connections = self.connections.process_events(
            self.queues.connections.drain(),
            &mut self.registry,
            &mut self.locator,
            &mut self.aoi,
            &mut self.sink,
            tick,
        )?;
        for &net_id in &report.connections.disconnected {
            self.tick_sync.forget(net_id);
            self.inputs.forget(net_id);
        }

        // 2. Tick sync, fed by heartbeats and input tick numbers alike
        let clients = self.connections.clients();
        let heartbeats = self
            .queues
            .heartbeats
            .drain()
            .into_iter()
            .filter(|h| known_client(clients, h.net_id, tick));
        report.sync = self.tick_sync.process_heartbeats(heartbeats, tick, &mut self.sink);

        let arrivals = self.queues.inputs.drain();
        for request in &arrivals {
            if !clients.contains_key(&request.net_id) {
                continue;
            }
            report.sync.observed += 1;
            if self
                .tick_sync
                .observe(request.net_id, request.tick_num, tick, &mut self.sink)
                .is_some()
            {
                report.sync.adjustments += 1;
            }
        }

        // 3. Input
        report.input = self
            .inputs
            .process_inputs(&mut self.registry, clients, arrivals, tick);

        // 4. Movement
        report.moved = movement::process_movements(&mut self.registry, &mut self.locator, self.timestep);

        // 5. Interest
        report.aoi = self
            .aoi
            .update_interest_lists(&mut self.registry, &self.locator, &mut self.sink, tick)?;

        // 6. Replication
        report.replication = self
            .replication
            .send_updates(&mut self.registry, &mut self.sink, tick)?;

        Ok(report)
    }

    fn record_metrics(&self, report: &TickReport) {
        let m = &self.metrics;
        m.record_tick_time(report.duration);
        m.record_performance(self.performance.status(), self.performance.budget_usage_percent());
        m.clients_connected
            .store(self.connections.client_count() as u64, Ordering::Relaxed);
        m.entities
            .store(self.registry.entity_count() as u64, Ordering::Relaxed);
        m.aoi_enters
            .fetch_add(report.aoi.enters as u64, Ordering::Relaxed);
        m.aoi_leaves
            .fetch_add(report.aoi.leaves as u64, Ordering::Relaxed);
        m.inputs_dropped
            .fetch_add(report.input.dropped as u64, Ordering::Relaxed);
        m.tick_adjustments
            .fetch_add(report.sync.adjustments as u64, Ordering::Relaxed);
    }

    /// Spawn a server-owned entity that moves by input like a client but
    /// observes nothing
    pub fn spawn_dynamic_object(&mut self, name: &str, sprite: u16, position: Position) -> Entity {
        let model_bounds = BoundingBox::centered(OBJECT_HALF_EXTENT, OBJECT_HEIGHT);
        let bounds = BoundingBox::model_to_world(&model_bounds, &position);

        let entity = self.registry.spawn();
        self.registry.positions.insert(entity, position);
        self.registry
            .previous_positions
            .insert(entity, PreviousPosition::from(position));
        self.registry.velocities.insert(entity, Velocity::default());
        self.registry.inputs.insert(entity, Input::default());
        self.registry.rotations.insert(entity, Rotation::default());
        self.registry.collisions.insert(entity, Collision { model_bounds });
        self.registry.bounding_boxes.insert(entity, bounds);
        self.registry.names.insert(
            entity,
            Name {
                name: name.to_string(),
            },
        );
        self.registry.sprites.insert(entity, Sprite { numeric_id: sprite });
        self.registry.interactions.insert(entity, Interaction::default());
        self.registry.entity_types.insert(entity, EntityType::DynamicObject);
        self.registry.position_changed.insert(entity, ());
        self.locator.insert_or_update(entity, bounds);

        debug!("[tick {}] Spawned {} '{}'", self.tick.get(), entity, name);
        entity
    }

    /// Remove a server-owned entity, telling every client that could see it
    ///
    /// Client entities are removed through their disconnect event instead.
    pub fn despawn(&mut self, entity: Entity) -> Result<bool, SimulationError> {
        if !self.registry.is_alive(entity) || self.registry.is_client(entity) {
            return Ok(false);
        }
        let tick = self.tick.get();
        self.aoi
            .remove_entity(&mut self.registry, &mut self.sink, entity, tick)?;
        self.locator.remove(entity);
        self.registry.despawn(entity);
        debug!("[tick {}] Despawned {}", tick, entity);
        Ok(true)
    }

    /// Drive a server-owned entity; clients steer through input requests
    pub fn set_object_input(&mut self, entity: Entity, input: Input) -> bool {
        if self.registry.is_client(entity) {
            return false;
        }
        self.registry.set_input(entity, input)
    }

    #[inline]
    pub fn current_tick(&self) -> TickNum {
        self.tick.get()
    }

    /// Cloneable handle on the tick counter, for log lines outside the loop
    pub fn shared_tick(&self) -> SharedTick {
        self.tick.clone()
    }

    pub fn client_entity(&self, net_id: NetworkId) -> Option<Entity> {
        self.connections.entity_for(net_id)
    }

    pub fn client_count(&self) -> usize {
        self.connections.client_count()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn locator(&self) -> &SpatialLocator {
        &self.locator
    }

    pub fn performance(&self) -> &PerformanceMonitor {
        &self.performance
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}

fn known_client(clients: &ClientIndex, net_id: NetworkId, tick: TickNum) -> bool {
    let known = clients.contains_key(&net_id);
    if !known {
        debug!("[tick {}] Heartbeat from unknown client {}", tick, net_id);
    }
    known
}

/// Log a status change the way the server loop reports it
pub fn log_status_change(status: PerformanceStatus, monitor: &PerformanceMonitor) {
    if status.within_budget() {
        info!("Performance: {}", monitor.status_message());
    } else {
        warn!("Performance: {}", monitor.status_message());
    }
}
