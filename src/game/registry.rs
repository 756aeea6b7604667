//! Sparse-set entity registry
//!
//! Entities are generational indices handed out by an [`EntityAllocator`].
//! Each component type lives in its own [`SparseSet`], so iteration over a
//! component touches only the entities that carry it. The registry owns no
//! behaviour beyond storage plus the two tracked mutation paths that feed
//! replication (`set_input`, `set_rotation`).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::game::components::{
    BoundingBox, ClientSimData, Collision, ComponentKind, ComponentMask, EntityType, Input,
    Interaction, Name, Position, PreviousPosition, Rotation, Sprite, Velocity,
};

// ============================================================================
// Entity
// ============================================================================

/// Opaque entity handle
///
/// Ordering is by index first, then generation. Interest lists and replication
/// batches rely on this ordering being total and stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entity {
    pub index: u32,
    pub generation: u32,
}

impl Entity {
    #[inline]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Hands out entity handles, reusing freed indices with a bumped generation
#[derive(Debug, Default)]
pub struct EntityAllocator {
    generations: Vec<u32>,
    alive: Vec<bool>,
    free: Vec<u32>,
}

impl EntityAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self) -> Entity {
        if let Some(index) = self.free.pop() {
            let i = index as usize;
            self.alive[i] = true;
            return Entity::new(index, self.generations[i]);
        }

        let index = self.generations.len() as u32;
        self.generations.push(0);
        self.alive.push(true);
        Entity::new(index, 0)
    }

    /// Release an entity. Returns false if it was already dead or stale.
    pub fn free(&mut self, entity: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        let i = entity.index as usize;
        self.alive[i] = false;
        self.generations[i] = self.generations[i].wrapping_add(1);
        self.free.push(entity.index);
        true
    }

    #[inline]
    pub fn is_alive(&self, entity: Entity) -> bool {
        let i = entity.index as usize;
        i < self.alive.len() && self.alive[i] && self.generations[i] == entity.generation
    }

    pub fn alive_count(&self) -> usize {
        self.alive.len() - self.free.len()
    }
}

// ============================================================================
// SparseSet
// ============================================================================

/// Component storage: sparse index table into densely packed data
#[derive(Debug, Clone)]
pub struct SparseSet<T> {
    sparse: Vec<Option<u32>>,
    entities: Vec<Entity>,
    data: Vec<T>,
}

impl<T> Default for SparseSet<T> {
    fn default() -> Self {
        Self {
            sparse: Vec::new(),
            entities: Vec::new(),
            data: Vec::new(),
        }
    }
}

impl<T> SparseSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn dense_index(&self, entity: Entity) -> Option<usize> {
        let dense = (*self.sparse.get(entity.index as usize)?)? as usize;
        (self.entities[dense] == entity).then_some(dense)
    }

    /// Insert or replace. Returns the previous value if there was one.
    pub fn insert(&mut self, entity: Entity, value: T) -> Option<T> {
        let slot = entity.index as usize;
        if slot >= self.sparse.len() {
            self.sparse.resize(slot + 1, None);
        }

        if let Some(dense) = self.sparse[slot] {
            let dense = dense as usize;
            // A stale generation in the same slot is overwritten
            self.entities[dense] = entity;
            return Some(std::mem::replace(&mut self.data[dense], value));
        }

        self.sparse[slot] = Some(self.data.len() as u32);
        self.entities.push(entity);
        self.data.push(value);
        None
    }

    pub fn remove(&mut self, entity: Entity) -> Option<T> {
        let dense = self.dense_index(entity)?;
        self.sparse[entity.index as usize] = None;

        let last = self.data.len() - 1;
        if dense != last {
            let moved = self.entities[last];
            self.sparse[moved.index as usize] = Some(dense as u32);
        }
        self.entities.swap_remove(dense);
        Some(self.data.swap_remove(dense))
    }

    #[inline]
    pub fn get(&self, entity: Entity) -> Option<&T> {
        self.dense_index(entity).map(|d| &self.data[d])
    }

    #[inline]
    pub fn get_mut(&mut self, entity: Entity) -> Option<&mut T> {
        self.dense_index(entity).map(move |d| &mut self.data[d])
    }

    #[inline]
    pub fn contains(&self, entity: Entity) -> bool {
        self.dense_index(entity).is_some()
    }

    /// Entities in storage order (not sorted)
    #[inline]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Entities sorted ascending; use where iteration order must be deterministic
    pub fn sorted_entities(&self) -> Vec<Entity> {
        let mut entities = self.entities.clone();
        entities.sort_unstable();
        entities
    }

    pub fn iter(&self) -> impl Iterator<Item = (Entity, &T)> {
        self.entities.iter().copied().zip(self.data.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Entity, &mut T)> {
        self.entities.iter().copied().zip(self.data.iter_mut())
    }

    pub fn clear(&mut self) {
        self.sparse.clear();
        self.entities.clear();
        self.data.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

// ============================================================================
// Registry
// ============================================================================

/// All component stores for one simulation
#[derive(Debug, Default)]
pub struct Registry {
    allocator: EntityAllocator,

    pub positions: SparseSet<Position>,
    pub previous_positions: SparseSet<PreviousPosition>,
    pub velocities: SparseSet<Velocity>,
    pub inputs: SparseSet<Input>,
    pub rotations: SparseSet<Rotation>,
    pub bounding_boxes: SparseSet<BoundingBox>,
    pub collisions: SparseSet<Collision>,
    pub names: SparseSet<Name>,
    pub sprites: SparseSet<Sprite>,
    pub interactions: SparseSet<Interaction>,
    pub entity_types: SparseSet<EntityType>,
    pub clients: SparseSet<ClientSimData>,

    /// PositionHasChanged; set by movement, cleared by the AOI system
    pub position_changed: SparseSet<()>,
    /// Observed component mutations this tick; cleared by replication
    pub observed_changes: SparseSet<ComponentMask>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(&mut self) -> Entity {
        self.allocator.allocate()
    }

    #[inline]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.allocator.is_alive(entity)
    }

    pub fn entity_count(&self) -> usize {
        self.allocator.alive_count()
    }

    /// Remove an entity and every component it owns
    ///
    /// Callers are responsible for AOI cleanup and locator removal first.
    pub fn despawn(&mut self, entity: Entity) -> bool {
        if !self.allocator.free(entity) {
            return false;
        }
        self.positions.remove(entity);
        self.previous_positions.remove(entity);
        self.velocities.remove(entity);
        self.inputs.remove(entity);
        self.rotations.remove(entity);
        self.bounding_boxes.remove(entity);
        self.collisions.remove(entity);
        self.names.remove(entity);
        self.sprites.remove(entity);
        self.interactions.remove(entity);
        self.entity_types.remove(entity);
        self.clients.remove(entity);
        self.position_changed.remove(entity);
        self.observed_changes.remove(entity);
        true
    }

    #[inline]
    pub fn is_client(&self, entity: Entity) -> bool {
        self.clients.contains(entity)
    }

    /// Mark an observed component as changed this tick
    pub fn mark_observed(&mut self, entity: Entity, kind: ComponentKind) {
        match self.observed_changes.get_mut(entity) {
            Some(mask) => mask.insert(kind),
            None => {
                let mut mask = ComponentMask::EMPTY;
                mask.insert(kind);
                self.observed_changes.insert(entity, mask);
            }
        }
    }

    /// Tracked input write. Returns true if the stored input changed.
    pub fn set_input(&mut self, entity: Entity, input: Input) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        if self.inputs.get(entity) == Some(&input) {
            return false;
        }
        self.inputs.insert(entity, input);
        self.mark_observed(entity, ComponentKind::Input);
        true
    }

    /// Tracked rotation write. Returns true if the stored rotation changed.
    pub fn set_rotation(&mut self, entity: Entity, rotation: Rotation) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        if self.rotations.get(entity) == Some(&rotation) {
            return false;
        }
        self.rotations.insert(entity, rotation);
        self.mark_observed(entity, ComponentKind::Rotation);
        true
    }
}
