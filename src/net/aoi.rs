//! Area of Interest (AOI) system
//!
//! Keeps every client's `entities_in_aoi` list in step with the world and
//! announces each change to the client with an `EntityInit` or
//! `EntityDelete`.
//!
//! Runs in two phases each tick:
//!
//! 1. **Compute** (parallel, read-only): every entity that moved this tick
//!    diffs its radius query against what its observers currently know and
//!    emits [`AoiTransition`]s. Each (observer, subject) pair has exactly one
//!    authority: a moving client computes its own list, and a moving entity
//!    computes the reverse side for clients that did not move.
//! 2. **Apply** (sequential): transitions are sorted, deduplicated, sent,
//!    and committed to the lists. Any asymmetry found here is fatal.
//!
//! A list only changes once its `EntityInit`/`EntityDelete` was accepted by
//! the sink. A refused transition stays pending and is retried at the start
//! of the next update; until then its pair may be one-sided, and a later
//! transition that undoes it simply cancels it.

use rayon::prelude::*;
use smallvec::SmallVec;
use std::cell::RefCell;
use tracing::{debug, error, trace};

use crate::game::components::{BoundingBox, ClientSimData, Position};
use crate::game::error::SimulationError;
use crate::game::registry::{Entity, Registry};
use crate::game::spatial::SpatialLocator;
use crate::game::tick_clock::TickNum;
use crate::net::protocol::{EntityInit, NetworkId, ServerMessage};
use crate::net::sink::MessageSink;
use crate::util::vec3::Vec3;

// Thread-local reusable buffers to avoid per-mover allocations
thread_local! {
    /// Radius query results
    static QUERY_BUFFER: RefCell<Vec<Entity>> = RefCell::new(Vec::with_capacity(256));
    /// Radius query around where a non-client mover was last evaluated
    static PREVIOUS_BUFFER: RefCell<Vec<Entity>> = RefCell::new(Vec::with_capacity(64));
}

/// Transitions a single mover typically produces
type TransitionBatch = SmallVec<[AoiTransition; 8]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransitionKind {
    Leave,
    Enter,
}

/// One change to one client's AOI list
///
/// Ordered by observer, then leaves before enters, then subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AoiTransition {
    pub observer: Entity,
    pub kind: TransitionKind,
    pub subject: Entity,
}

impl AoiTransition {
    #[inline]
    fn same_pair(&self, other: &AoiTransition) -> bool {
        self.observer == other.observer && self.subject == other.subject
    }

    #[inline]
    fn enter(observer: Entity, subject: Entity) -> Self {
        Self {
            observer,
            kind: TransitionKind::Enter,
            subject,
        }
    }

    #[inline]
    fn leave(observer: Entity, subject: Entity) -> Self {
        Self {
            observer,
            kind: TransitionKind::Leave,
            subject,
        }
    }
}

/// Counts from one AOI update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AoiStats {
    pub movers: usize,
    pub enters: usize,
    pub leaves: usize,
    /// Transitions the sink refused, left pending for the next update
    pub deferred: usize,
}

/// A Delete for a despawned entity that the sink refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct UnsentDelete {
    observer: Entity,
    net_id: NetworkId,
    subject: Entity,
}

/// Elements of sorted `a` not in sorted `b`, appended to `out`
fn sorted_difference(a: &[Entity], b: &[Entity], out: &mut Vec<Entity>) {
    let (mut i, mut j) = (0, 0);
    while i < a.len() {
        if j >= b.len() || a[i] < b[j] {
            out.push(a[i]);
            i += 1;
        } else if a[i] > b[j] {
            j += 1;
        } else {
            i += 1;
            j += 1;
        }
    }
}

pub struct AoiSystem {
    radius: f32,
    /// Transitions computed but not yet committed because sending failed
    pending: Vec<AoiTransition>,
    unsent_deletes: Vec<UnsentDelete>,
}

impl AoiSystem {
    pub fn new(radius: f32) -> Self {
        Self {
            radius,
            pending: Vec::new(),
            unsent_deletes: Vec::new(),
        }
    }

    #[inline]
    pub fn radius(&self) -> f32 {
        self.radius
    }

    /// Transitions waiting to be sent, in retry order
    pub fn pending(&self) -> &[AoiTransition] {
        &self.pending
    }

    fn pending_for(&self, observer: Entity, subject: Entity) -> Option<TransitionKind> {
        self.pending
            .iter()
            .find(|p| p.observer == observer && p.subject == subject)
            .map(|p| p.kind)
    }

    /// Recompute interest for everything that moved, apply, and clear the
    /// position-changed tags
    pub fn update_interest_lists<S: MessageSink<ServerMessage>>(
        &mut self,
        registry: &mut Registry,
        locator: &SpatialLocator,
        sink: &mut S,
        tick: TickNum,
    ) -> Result<AoiStats, SimulationError> {
        let movers = registry.position_changed.sorted_entities();
        let mut stats = AoiStats {
            movers: movers.len(),
            ..Default::default()
        };

        self.retry_unsent(registry, sink, tick, &mut stats)?;

        let transitions = self.compute_transitions(registry, locator, &movers)?;
        for transition in transitions {
            if let Some(idx) = self.pending.iter().position(|p| p.same_pair(&transition)) {
                let pending = self.pending.remove(idx);
                if pending.kind != transition.kind {
                    cancel_pending(registry, transition, tick);
                    continue;
                }
            }
            self.apply(registry, sink, transition, tick, &mut stats)?;
        }

        registry.position_changed.clear();

        if stats.enters + stats.leaves + stats.deferred > 0 {
            debug!(
                "[tick {}] AOI: {} movers, {} enters, {} leaves, {} deferred",
                tick, stats.movers, stats.enters, stats.leaves, stats.deferred
            );
        }
        Ok(stats)
    }

    /// Resend what the sink refused last time, dropping what no longer applies
    fn retry_unsent<S: MessageSink<ServerMessage>>(
        &mut self,
        registry: &mut Registry,
        sink: &mut S,
        tick: TickNum,
        stats: &mut AoiStats,
    ) -> Result<(), SimulationError> {
        let deletes = std::mem::take(&mut self.unsent_deletes);
        for delete in deletes {
            let Some(client) = registry.clients.get(delete.observer) else {
                continue;
            };
            if client.net_id != delete.net_id {
                continue;
            }
            let message = ServerMessage::EntityDelete {
                tick_num: tick,
                entity: delete.subject,
            };
            if sink.send(delete.net_id, message).is_err() {
                self.unsent_deletes.push(delete);
            }
        }

        let pending = std::mem::take(&mut self.pending);
        for transition in pending {
            let Some(client) = registry.clients.get(transition.observer) else {
                continue;
            };
            let listed = client.entities_in_aoi.binary_search(&transition.subject).is_ok();
            let still_applies = match transition.kind {
                TransitionKind::Enter => registry.is_alive(transition.subject) && !listed,
                TransitionKind::Leave => listed,
            };
            if still_applies {
                self.apply(registry, sink, transition, tick, stats)?;
            } else {
                trace!("[tick {}] Dropping stale pending {:?}", tick, transition);
            }
        }
        Ok(())
    }

    /// Send one transition and commit it, or keep it pending
    fn apply<S: MessageSink<ServerMessage>>(
        &mut self,
        registry: &mut Registry,
        sink: &mut S,
        transition: AoiTransition,
        tick: TickNum,
        stats: &mut AoiStats,
    ) -> Result<(), SimulationError> {
        if apply_transition(registry, sink, transition, tick)? {
            match transition.kind {
                TransitionKind::Enter => stats.enters += 1,
                TransitionKind::Leave => stats.leaves += 1,
            }
        } else {
            stats.deferred += 1;
            self.pending.push(transition);
        }
        Ok(())
    }

    /// Phase one: the whole tick's transitions, sorted and deduplicated
    pub fn compute_transitions(
        &self,
        registry: &Registry,
        locator: &SpatialLocator,
        movers: &[Entity],
    ) -> Result<Vec<AoiTransition>, SimulationError> {
        let batches: Vec<TransitionBatch> = movers
            .par_iter()
            .map(|&mover| self.transitions_for_mover(registry, locator, mover))
            .collect::<Result<_, _>>()?;

        let mut transitions: Vec<AoiTransition> = batches.into_iter().flatten().collect();
        transitions.sort_unstable();
        transitions.dedup();
        Ok(transitions)
    }

    fn transitions_for_mover(
        &self,
        registry: &Registry,
        locator: &SpatialLocator,
        mover: Entity,
    ) -> Result<TransitionBatch, SimulationError> {
        let bounds = registry
            .bounding_boxes
            .get(mover)
            .ok_or_else(|| SimulationError::missing(mover, "BoundingBox"))?;

        QUERY_BUFFER.with(|buffer| {
            let mut nearby = buffer.borrow_mut();
            self.current_interest(locator, mover, bounds, &mut nearby);

            let mut batch = TransitionBatch::new();
            match registry.clients.get(mover) {
                Some(client) => client_mover_transitions(registry, mover, client, &nearby, &mut batch),
                None => {
                    let last_center = previous_center(registry, mover)?;
                    PREVIOUS_BUFFER.with(|previous| {
                        let mut previous = previous.borrow_mut();
                        locator.query_radius_into(last_center, self.radius, &mut previous);
                        object_mover_transitions(
                            registry,
                            mover,
                            &nearby,
                            &previous,
                            &self.pending,
                            &mut batch,
                        );
                    });
                }
            }
            Ok(batch)
        })
    }

    /// Everything within the radius of `entity`, excluding itself, sorted
    fn current_interest(
        &self,
        locator: &SpatialLocator,
        entity: Entity,
        bounds: &BoundingBox,
        out: &mut Vec<Entity>,
    ) {
        locator.query_radius_into(bounds.center(), self.radius, out);
        if let Ok(idx) = out.binary_search(&entity) {
            out.remove(idx);
        }
    }

    /// Tell every client that knows about `entity` that it is gone and drop
    /// it from their lists
    ///
    /// Call before despawning. For a client entity every client on its list
    /// must list it back, allowing only for pairs with a pending transition;
    /// anything else is fatal.
    pub fn remove_entity<S: MessageSink<ServerMessage>>(
        &mut self,
        registry: &mut Registry,
        sink: &mut S,
        entity: Entity,
        tick: TickNum,
    ) -> Result<usize, SimulationError> {
        // Which other clients should list `entity`: its own list says so,
        // unless a pending transition left the pair one-sided
        let check_symmetry = registry.is_client(entity);
        let mut expected = Vec::new();
        if let Some(departing) = registry.clients.get(entity) {
            let mut candidates: Vec<Entity> = departing.entities_in_aoi.clone();
            candidates.extend(self.pending.iter().filter_map(|p| {
                if p.observer == entity {
                    Some(p.subject)
                } else if p.subject == entity {
                    Some(p.observer)
                } else {
                    None
                }
            }));
            candidates.sort_unstable();
            candidates.dedup();

            for other in candidates {
                if !registry.is_client(other) {
                    continue;
                }
                let theirs = self.pending_for(other, entity);
                let ours = self.pending_for(entity, other);
                let lists_back = match (theirs, ours) {
                    (Some(kind), _) => kind == TransitionKind::Leave,
                    (None, Some(kind)) => kind == TransitionKind::Enter,
                    (None, None) => departing.entities_in_aoi.binary_search(&other).is_ok(),
                };
                if lists_back {
                    expected.push(other);
                }
            }
        }

        self.pending.retain(|p| p.observer != entity && p.subject != entity);
        self.unsent_deletes.retain(|d| d.observer != entity);

        let mut notified = Vec::new();
        for (observer, client) in registry.clients.iter_mut() {
            if observer == entity {
                continue;
            }
            let Ok(idx) = client.entities_in_aoi.binary_search(&entity) else {
                continue;
            };
            client.entities_in_aoi.remove(idx);
            client.entities_that_entered_aoi.retain(|e| *e != entity);
            notified.push(observer);

            let message = ServerMessage::EntityDelete { tick_num: tick, entity };
            if let Err(e) = sink.send(client.net_id, message) {
                debug!("[tick {}] Delete of {} for {} deferred: {}", tick, entity, observer, e);
                self.unsent_deletes.push(UnsentDelete {
                    observer,
                    net_id: client.net_id,
                    subject: entity,
                });
            }
        }
        notified.sort_unstable();

        if check_symmetry && expected != notified {
            let mut diff = Vec::new();
            sorted_difference(&expected, &notified, &mut diff);
            // `observer` should have listed `entity` but did not
            if let Some(&observer) = diff.first() {
                error!("[tick {}] AOI asymmetry removing {}: missing from {}", tick, entity, observer);
                return Err(SimulationError::MissingAoiEntry { observer, subject: entity });
            }
            // `observer` listed `entity`, but `entity` never listed it back
            sorted_difference(&notified, &expected, &mut diff);
            if let Some(&observer) = diff.first() {
                error!(
                    "[tick {}] AOI asymmetry removing {}: {} missing from its list",
                    tick, entity, observer
                );
                return Err(SimulationError::MissingAoiEntry { observer: entity, subject: observer });
            }
        }

        Ok(notified.len())
    }
}

impl Default for AoiSystem {
    fn default() -> Self {
        Self::new(crate::game::constants::aoi::AOI_RADIUS)
    }
}

/// A moving client recomputes its own list and the reverse side of every
/// client that stood still
fn client_mover_transitions(
    registry: &Registry,
    mover: Entity,
    client: &ClientSimData,
    current: &[Entity],
    batch: &mut TransitionBatch,
) {
    let mut diff = Vec::new();

    sorted_difference(&client.entities_in_aoi, current, &mut diff);
    for &left in &diff {
        batch.push(AoiTransition::leave(mover, left));
        if is_stationary_client(registry, left) {
            batch.push(AoiTransition::leave(left, mover));
        }
    }

    diff.clear();
    sorted_difference(current, &client.entities_in_aoi, &mut diff);
    for &entered in &diff {
        batch.push(AoiTransition::enter(mover, entered));
        if is_stationary_client(registry, entered) {
            batch.push(AoiTransition::enter(entered, mover));
        }
    }
}

/// A moving non-client updates the lists of clients that stood still;
/// moving clients pick it up in their own recomputation
///
/// `previous` holds everything near where the mover was last evaluated. A
/// stationary client can only list the mover if it is in there, or if a
/// pending transition left the pair one-sided.
fn object_mover_transitions(
    registry: &Registry,
    mover: Entity,
    current: &[Entity],
    previous: &[Entity],
    pending: &[AoiTransition],
    batch: &mut TransitionBatch,
) {
    let watchers_now: Vec<Entity> = current
        .iter()
        .copied()
        .filter(|e| is_stationary_client(registry, *e))
        .collect();

    let mut watchers_before: Vec<Entity> = previous
        .iter()
        .copied()
        .chain(pending.iter().filter(|p| p.subject == mover).map(|p| p.observer))
        .filter(|&observer| {
            is_stationary_client(registry, observer)
                && registry
                    .clients
                    .get(observer)
                    .is_some_and(|client| client.entities_in_aoi.binary_search(&mover).is_ok())
        })
        .collect();
    watchers_before.sort_unstable();
    watchers_before.dedup();

    let mut diff = Vec::new();
    sorted_difference(&watchers_before, &watchers_now, &mut diff);
    batch.extend(diff.iter().map(|&observer| AoiTransition::leave(observer, mover)));

    diff.clear();
    sorted_difference(&watchers_now, &watchers_before, &mut diff);
    batch.extend(diff.iter().map(|&observer| AoiTransition::enter(observer, mover)));
}

/// Bounding-box center at the mover's position before this tick's movement
fn previous_center(registry: &Registry, mover: Entity) -> Result<Vec3, SimulationError> {
    let previous = registry
        .previous_positions
        .get(mover)
        .ok_or_else(|| SimulationError::missing(mover, "PreviousPosition"))?;
    let collision = registry
        .collisions
        .get(mover)
        .ok_or_else(|| SimulationError::missing(mover, "Collision"))?;
    let position = Position::from(*previous);
    Ok(BoundingBox::model_to_world(&collision.model_bounds, &position).center())
}

#[inline]
fn is_stationary_client(registry: &Registry, entity: Entity) -> bool {
    registry.is_client(entity) && !registry.position_changed.contains(entity)
}

fn build_init(
    registry: &Registry,
    subject: Entity,
    tick: TickNum,
) -> Result<EntityInit, SimulationError> {
    Ok(EntityInit {
        tick_num: tick,
        entity: subject,
        name: registry
            .names
            .get(subject)
            .cloned()
            .ok_or_else(|| SimulationError::missing(subject, "Name"))?,
        sprite: registry
            .sprites
            .get(subject)
            .copied()
            .ok_or_else(|| SimulationError::missing(subject, "Sprite"))?,
        position: registry
            .positions
            .get(subject)
            .copied()
            .ok_or_else(|| SimulationError::missing(subject, "Position"))?,
        rotation: registry.rotations.get(subject).copied().unwrap_or_default(),
        interaction: registry.interactions.get(subject).cloned().unwrap_or_default(),
        entity_type: registry
            .entity_types
            .get(subject)
            .copied()
            .ok_or_else(|| SimulationError::missing(subject, "EntityType"))?,
    })
}

/// Phase two for one transition
///
/// Returns whether the message went out; the list only changes if it did.
fn apply_transition<S: MessageSink<ServerMessage>>(
    registry: &mut Registry,
    sink: &mut S,
    transition: AoiTransition,
    tick: TickNum,
) -> Result<bool, SimulationError> {
    let AoiTransition {
        observer,
        kind,
        subject,
    } = transition;

    let client = registry
        .clients
        .get(observer)
        .ok_or_else(|| SimulationError::missing(observer, "ClientSimData"))?;
    let net_id = client.net_id;
    let slot = client.entities_in_aoi.binary_search(&subject);
    match (kind, slot) {
        (TransitionKind::Enter, Ok(_)) => {
            error!("[tick {}] {} entered AOI of {} twice", tick, subject, observer);
            return Err(SimulationError::DuplicateAoiEntry { observer, subject });
        }
        (TransitionKind::Leave, Err(_)) => {
            error!("[tick {}] {} left AOI of {} but was never in it", tick, subject, observer);
            return Err(SimulationError::MissingAoiEntry { observer, subject });
        }
        _ => {}
    }

    let message = match kind {
        TransitionKind::Enter => ServerMessage::EntityInit(build_init(registry, subject, tick)?),
        TransitionKind::Leave => ServerMessage::EntityDelete {
            tick_num: tick,
            entity: subject,
        },
    };
    if let Err(e) = sink.send(net_id, message) {
        debug!("[tick {}] {:?} {} -> {} deferred: {}", tick, kind, subject, observer, e);
        return Ok(false);
    }

    let client = registry
        .clients
        .get_mut(observer)
        .ok_or_else(|| SimulationError::missing(observer, "ClientSimData"))?;
    match (kind, slot) {
        (TransitionKind::Enter, Err(idx)) => {
            client.entities_in_aoi.insert(idx, subject);
            client.entities_that_entered_aoi.push(subject);
        }
        (TransitionKind::Leave, Ok(idx)) => {
            client.entities_in_aoi.remove(idx);
        }
        _ => {}
    }

    trace!("[tick {}] {:?} {} -> {}", tick, kind, subject, observer);
    Ok(true)
}

/// A transition that undoes a pending, never-sent one
///
/// The client's view already matches, so nothing is sent. When the subject
/// comes back into view its state may have moved on while the client was
/// never told it left, so it gets a full update.
fn cancel_pending(registry: &mut Registry, transition: AoiTransition, tick: TickNum) {
    trace!(
        "[tick {}] {:?} cancels pending change for {} -> {}",
        tick, transition.kind, transition.subject, transition.observer
    );
    if transition.kind == TransitionKind::Enter {
        if let Some(client) = registry.clients.get_mut(transition.observer) {
            client.entities_that_entered_aoi.push(transition.subject);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::components::{Collision, EntityType, Name, PreviousPosition, Sprite};
    use crate::metrics::Metrics;
    use crate::net::protocol::decode;
    use crate::net::queue::MessageQueue;
    use crate::net::sink::{ChannelSink, RecordingSink};
    use std::sync::Arc;

    const RADIUS: f32 = 100.0;

    struct World {
        registry: Registry,
        locator: SpatialLocator,
        aoi: AoiSystem,
        sink: RecordingSink,
    }

    impl World {
        fn new() -> Self {
            Self {
                registry: Registry::new(),
                locator: SpatialLocator::new(32.0),
                aoi: AoiSystem::new(RADIUS),
                sink: RecordingSink::new(),
            }
        }

        fn spawn(&mut self, x: f32, y: f32, net_id: Option<u32>) -> Entity {
            let e = self.registry.spawn();
            self.registry.names.insert(e, Name { name: format!("e{}", e.index) });
            self.registry.sprites.insert(e, Sprite { numeric_id: 1 });
            self.registry.collisions.insert(
                e,
                Collision {
                    model_bounds: BoundingBox::centered(4.0, 8.0),
                },
            );
            let kind = match net_id {
                Some(net_id) => {
                    self.registry.clients.insert(e, ClientSimData::new(net_id));
                    EntityType::ClientEntity
                }
                None => EntityType::DynamicObject,
            };
            self.registry.entity_types.insert(e, kind);
            self.place(e, x, y);
            e
        }

        /// Teleport, the way a movement step would record it
        fn place(&mut self, e: Entity, x: f32, y: f32) {
            let position = Position::new(x, y, 0.0);
            let bounds = BoundingBox::model_to_world(&BoundingBox::centered(4.0, 8.0), &position);
            let previous = self.registry.positions.get(e).copied().unwrap_or(position);
            self.registry
                .previous_positions
                .insert(e, PreviousPosition::from(previous));
            self.registry.positions.insert(e, position);
            self.registry.bounding_boxes.insert(e, bounds);
            self.locator.insert_or_update(e, bounds);
            self.registry.position_changed.insert(e, ());
        }

        fn tick(&mut self) -> AoiStats {
            self.aoi
                .update_interest_lists(&mut self.registry, &self.locator, &mut self.sink, 1)
                .unwrap()
        }

        fn aoi_of(&self, e: Entity) -> Vec<Entity> {
            self.registry.clients.get(e).unwrap().entities_in_aoi.clone()
        }
    }

    #[test]
    fn test_sorted_difference() {
        let a = [Entity::new(1, 0), Entity::new(2, 0), Entity::new(4, 0)];
        let b = [Entity::new(2, 0), Entity::new(3, 0)];
        let mut out = Vec::new();
        sorted_difference(&a, &b, &mut out);
        assert_eq!(out, vec![Entity::new(1, 0), Entity::new(4, 0)]);
    }

    #[test]
    fn test_two_clients_enter_and_leave() {
        let mut world = World::new();
        let a = world.spawn(0.0, 0.0, Some(1));
        let b = world.spawn(50.0, 0.0, Some(2));

        let stats = world.tick();
        assert_eq!(stats.enters, 2);
        assert_eq!(world.aoi_of(a), vec![b]);
        assert_eq!(world.aoi_of(b), vec![a]);
        assert!(world.registry.position_changed.is_empty());

        let to_a: Vec<_> = world.sink.to(1).cloned().collect();
        assert!(matches!(&to_a[..], [ServerMessage::EntityInit(init)] if init.entity == b));

        world.sink.take();
        world.place(b, 500.0, 0.0);
        let stats = world.tick();
        assert_eq!(stats.leaves, 2);
        assert!(world.aoi_of(a).is_empty());
        assert!(world.aoi_of(b).is_empty());
        assert!(matches!(
            world.sink.to(1).next(),
            Some(ServerMessage::EntityDelete { entity, .. }) if *entity == b
        ));
        assert!(matches!(
            world.sink.to(2).next(),
            Some(ServerMessage::EntityDelete { entity, .. }) if *entity == a
        ));
    }

    #[test]
    fn test_stationary_client_sees_moving_object() {
        let mut world = World::new();
        let client = world.spawn(0.0, 0.0, Some(1));
        let object = world.spawn(300.0, 0.0, None);
        world.tick();
        assert!(world.aoi_of(client).is_empty());

        world.place(object, 60.0, 0.0);
        world.tick();
        assert_eq!(world.aoi_of(client), vec![object]);
        assert_eq!(
            world.registry.clients.get(client).unwrap().entities_that_entered_aoi,
            vec![object]
        );

        world.place(object, 60.0, 300.0);
        let stats = world.tick();
        assert_eq!(stats.leaves, 1);
        assert!(world.aoi_of(client).is_empty());
    }

    #[test]
    fn test_object_jump_updates_only_nearby_watchers() {
        let mut world = World::new();
        let west = world.spawn(-1000.0, 0.0, Some(1));
        let east = world.spawn(1000.0, 0.0, Some(2));
        let bystander = world.spawn(0.0, 1000.0, Some(3));
        let object = world.spawn(-950.0, 0.0, None);
        world.tick();
        assert_eq!(world.aoi_of(west), vec![object]);
        world.sink.take();

        world.place(object, 950.0, 0.0);
        let stats = world.tick();
        assert_eq!((stats.enters, stats.leaves), (1, 1));
        assert!(world.aoi_of(west).is_empty());
        assert_eq!(world.aoi_of(east), vec![object]);
        assert!(world.aoi_of(bystander).is_empty());
        assert_eq!(world.sink.to(3).count(), 0);
    }

    #[test]
    fn test_no_movers_no_messages() {
        let mut world = World::new();
        world.spawn(0.0, 0.0, Some(1));
        world.spawn(10.0, 0.0, Some(2));
        world.tick();
        world.sink.take();

        let stats = world.tick();
        assert_eq!(stats, AoiStats::default());
        assert!(world.sink.is_empty());
    }

    #[test]
    fn test_exact_radius_is_outside() {
        let mut world = World::new();
        let a = world.spawn(0.0, 0.0, Some(1));
        world.spawn(RADIUS, 0.0, Some(2));
        world.tick();
        assert!(world.aoi_of(a).is_empty());
    }

    #[test]
    fn test_both_moving_no_duplicates() {
        let mut world = World::new();
        let a = world.spawn(0.0, 0.0, Some(1));
        let b = world.spawn(500.0, 0.0, Some(2));
        world.tick();
        world.sink.take();

        world.place(a, 10.0, 0.0);
        world.place(b, 60.0, 0.0);
        world.tick();
        assert_eq!(world.sink.to(1).count(), 1);
        assert_eq!(world.sink.to(2).count(), 1);
        assert_eq!(world.aoi_of(a), vec![b]);
        assert_eq!(world.aoi_of(b), vec![a]);
    }

    #[test]
    fn test_asymmetric_list_is_fatal() {
        let mut world = World::new();
        let a = world.spawn(0.0, 0.0, Some(1));
        let b = world.spawn(50.0, 0.0, Some(2));
        world.tick();

        // Corrupt b's side, then move a away
        world.registry.clients.get_mut(b).unwrap().entities_in_aoi.clear();
        world.place(a, 500.0, 0.0);
        let result = world
            .aoi
            .update_interest_lists(&mut world.registry, &world.locator, &mut world.sink, 2);
        assert_eq!(
            result,
            Err(SimulationError::MissingAoiEntry { observer: b, subject: a })
        );
    }

    #[test]
    fn test_missing_name_is_fatal() {
        let mut world = World::new();
        world.spawn(0.0, 0.0, Some(1));
        let object = world.spawn(10.0, 0.0, None);
        world.registry.names.remove(object);

        let result = world
            .aoi
            .update_interest_lists(&mut world.registry, &world.locator, &mut world.sink, 1);
        assert_eq!(result, Err(SimulationError::missing(object, "Name")));
    }

    #[test]
    fn test_remove_entity_notifies_observers() {
        let mut world = World::new();
        let a = world.spawn(0.0, 0.0, Some(1));
        let b = world.spawn(20.0, 0.0, Some(2));
        let c = world.spawn(40.0, 0.0, Some(3));
        world.tick();
        world.sink.take();

        let notified = world
            .aoi
            .remove_entity(&mut world.registry, &mut world.sink, b, 5)
            .unwrap();
        assert_eq!(notified, 2);
        assert_eq!(world.aoi_of(a), vec![c]);
        assert_eq!(world.aoi_of(c), vec![a]);
        assert!(world.sink.to(2).next().is_none());
    }

    #[test]
    fn test_init_carries_entity_type() {
        let mut world = World::new();
        world.spawn(0.0, 0.0, Some(1));
        let other = world.spawn(30.0, 0.0, Some(2));
        let object = world.spawn(0.0, 30.0, None);
        world.tick();

        let kinds: Vec<(Entity, EntityType)> = world
            .sink
            .to(1)
            .filter_map(|m| match m {
                ServerMessage::EntityInit(init) => Some((init.entity, init.entity_type)),
                _ => None,
            })
            .collect();
        assert_eq!(
            kinds,
            vec![(other, EntityType::ClientEntity), (object, EntityType::DynamicObject)]
        );
    }

    #[test]
    fn test_saturated_sink_lists_only_what_was_sent() {
        let mut world = World::new();
        let client = world.spawn(0.0, 0.0, Some(1));
        let mut objects: Vec<Entity> = (1..=5)
            .map(|i| world.spawn(10.0 * i as f32, 0.0, None))
            .collect();
        objects.sort_unstable();

        let outbound = MessageQueue::new("outbound", 2);
        let mut sink = ChannelSink::new(outbound.producer(), Arc::new(Metrics::new()));
        let mut delivered = Vec::new();

        let mut tick = 1;
        loop {
            let stats = world
                .aoi
                .update_interest_lists(&mut world.registry, &world.locator, &mut sink, tick)
                .unwrap();
            for frame in outbound.drain() {
                match decode::<ServerMessage>(&frame.payload).unwrap() {
                    ServerMessage::EntityInit(init) => delivered.push(init.entity),
                    other => panic!("unexpected {:?}", other),
                }
            }
            assert!(stats.enters <= 2);

            // What the client was told and what the server believes always agree
            let mut told = delivered.clone();
            told.sort_unstable();
            assert_eq!(world.aoi_of(client), told);

            if world.aoi.pending().is_empty() {
                break;
            }
            tick += 1;
            assert!(tick < 10, "pending transitions never drained");
        }
        assert_eq!(tick, 3);
        assert_eq!(world.aoi_of(client), objects);
    }

    #[test]
    fn test_unsent_enter_cancelled_by_leave() {
        let mut world = World::new();
        let a = world.spawn(0.0, 0.0, Some(1));
        let b = world.spawn(50.0, 0.0, Some(2));
        world.sink.set_limit(Some(1));

        let stats = world.tick();
        assert_eq!((stats.enters, stats.deferred), (1, 1));
        assert_eq!(world.aoi_of(a), vec![b]);
        assert!(world.aoi_of(b).is_empty());
        assert_eq!(world.aoi.pending(), &[AoiTransition::enter(b, a)]);

        // Still saturated: the retry fails and a's leave is deferred too,
        // while b's leave undoes the enter it never received
        world.place(a, 500.0, 0.0);
        let stats = world.tick();
        assert_eq!(stats.deferred, 2);
        assert_eq!(world.aoi.pending(), &[AoiTransition::leave(a, b)]);
        assert_eq!(world.aoi_of(a), vec![b]);

        world.sink.set_limit(None);
        let stats = world.tick();
        assert_eq!(stats.leaves, 1);
        assert!(world.aoi.pending().is_empty());
        assert!(world.aoi_of(a).is_empty());
        assert!(world.aoi_of(b).is_empty());
        assert_eq!(world.sink.to(2).count(), 0);
        assert_eq!(world.sink.to(1).count(), 2);
    }

    #[test]
    fn test_remove_entity_allows_pending_one_sided_pair() {
        let mut world = World::new();
        let a = world.spawn(0.0, 0.0, Some(1));
        let b = world.spawn(50.0, 0.0, Some(2));
        world.sink.set_limit(Some(1));
        world.tick();
        world.sink.set_limit(None);

        let notified = world
            .aoi
            .remove_entity(&mut world.registry, &mut world.sink, a, 2)
            .unwrap();
        assert_eq!(notified, 0);
        assert!(world.aoi.pending().is_empty());
        assert!(world.aoi_of(b).is_empty());
    }

    #[test]
    fn test_remove_entity_detects_crossed_one_sided_entries() {
        let mut world = World::new();
        let d = world.spawn(0.0, 0.0, Some(1));
        let x = world.spawn(20.0, 0.0, Some(2));
        let y = world.spawn(0.0, 20.0, Some(3));
        world.tick();

        // d lists x but x forgot d; y lists d but d forgot y
        world.registry.clients.get_mut(d).unwrap().entities_in_aoi.retain(|e| *e != y);
        world.registry.clients.get_mut(x).unwrap().entities_in_aoi.retain(|e| *e != d);

        let result = world
            .aoi
            .remove_entity(&mut world.registry, &mut world.sink, d, 2);
        assert_eq!(
            result,
            Err(SimulationError::MissingAoiEntry { observer: x, subject: d })
        );
    }

    #[test]
    fn test_remove_entity_detects_unreturned_entry() {
        let mut world = World::new();
        let d = world.spawn(0.0, 0.0, Some(1));
        let y = world.spawn(0.0, 20.0, Some(2));
        world.tick();

        world.registry.clients.get_mut(d).unwrap().entities_in_aoi.clear();

        let result = world
            .aoi
            .remove_entity(&mut world.registry, &mut world.sink, d, 2);
        assert_eq!(
            result,
            Err(SimulationError::MissingAoiEntry { observer: d, subject: y })
        );
    }
}
