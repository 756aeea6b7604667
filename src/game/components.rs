//! Component types stored in the entity registry
//!
//! Every type here is plain data. Behaviour lives in the systems that own
//! the mutation of each component.

use serde::{Deserialize, Serialize};

use crate::game::registry::Entity;
use crate::net::protocol::NetworkId;
use crate::util::vec3::Vec3;

/// Authoritative world-space location
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Position {
    #[inline]
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    #[inline]
    pub fn as_vec3(&self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }
}

impl From<Vec3> for Position {
    fn from(v: Vec3) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

/// Position as it was at the start of the current tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PreviousPosition {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl From<Position> for PreviousPosition {
    fn from(p: Position) -> Self {
        Self { x: p.x, y: p.y, z: p.z }
    }
}

impl From<PreviousPosition> for Position {
    fn from(p: PreviousPosition) -> Self {
        Self::new(p.x, p.y, p.z)
    }
}

impl PartialEq<PreviousPosition> for Position {
    fn eq(&self, other: &PreviousPosition) -> bool {
        self.x == other.x && self.y == other.y && self.z == other.z
    }
}

/// Current velocity (units/second)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Velocity {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Movement input directions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InputType {
    Up,
    Down,
    Left,
    Right,
    Ascend,
    Descend,
}

impl InputType {
    pub const COUNT: usize = 6;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputState {
    #[default]
    Released,
    Pressed,
}

/// Held input state for one entity on one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
    pub states: [InputState; InputType::COUNT],
}

impl Input {
    #[inline]
    pub fn is_pressed(&self, input: InputType) -> bool {
        self.states[input as usize] == InputState::Pressed
    }

    /// Builder-style helper, used by NPC wandering and tests
    pub fn with(mut self, input: InputType, state: InputState) -> Self {
        self.states[input as usize] = state;
        self
    }

    /// Set one direction, returning true if the state changed
    pub fn set(&mut self, input: InputType, state: InputState) -> bool {
        let slot = &mut self.states[input as usize];
        if *slot == state {
            return false;
        }
        *slot = state;
        true
    }

    /// Unnormalized axis intent in [-1, 1] per axis
    ///
    /// Opposing directions held together cancel out.
    pub fn axes(&self) -> Vec3 {
        let axis = |pos: InputType, neg: InputType| -> f32 {
            (self.is_pressed(pos) as i8 - self.is_pressed(neg) as i8) as f32
        };
        Vec3::new(
            axis(InputType::Right, InputType::Left),
            axis(InputType::Up, InputType::Down),
            axis(InputType::Ascend, InputType::Descend),
        )
    }
}

/// Eight-way facing on the ground plane
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    South,
    SouthWest,
    West,
    NorthWest,
    North,
    NorthEast,
    East,
    SouthEast,
}

/// Facing of an entity, derived from its last non-neutral input
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rotation {
    pub direction: Direction,
}

impl Rotation {
    /// Facing implied by an input, or None when no planar direction is held
    pub fn from_input(input: &Input) -> Option<Self> {
        let axes = input.axes();
        let direction = match (axes.x as i8, axes.y as i8) {
            (0, 1) => Direction::North,
            (1, 1) => Direction::NorthEast,
            (1, 0) => Direction::East,
            (1, -1) => Direction::SouthEast,
            (0, -1) => Direction::South,
            (-1, -1) => Direction::SouthWest,
            (-1, 0) => Direction::West,
            (-1, 1) => Direction::NorthWest,
            _ => return None,
        };
        Some(Self { direction })
    }
}

/// Axis-aligned box, either model-space (relative to the entity origin) or
/// world-space
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f32,
    pub max_x: f32,
    pub min_y: f32,
    pub max_y: f32,
    pub min_z: f32,
    pub max_z: f32,
}

impl BoundingBox {
    /// Box centered on the origin in X/Y, standing on Z = 0
    pub fn centered(half_extent: f32, height: f32) -> Self {
        Self {
            min_x: -half_extent,
            max_x: half_extent,
            min_y: -half_extent,
            max_y: half_extent,
            min_z: 0.0,
            max_z: height,
        }
    }

    /// Translate model-space bounds to world space at `position`
    pub fn model_to_world(model: &BoundingBox, position: &Position) -> Self {
        Self {
            min_x: model.min_x + position.x,
            max_x: model.max_x + position.x,
            min_y: model.min_y + position.y,
            max_y: model.max_y + position.y,
            min_z: model.min_z + position.z,
            max_z: model.max_z + position.z,
        }
    }

    pub fn center(&self) -> Vec3 {
        Vec3::new(
            self.min_x + (self.max_x - self.min_x) / 2.0,
            self.min_y + (self.max_y - self.min_y) / 2.0,
            self.min_z + (self.max_z - self.min_z) / 2.0,
        )
    }

    /// Strict overlap test; touching faces do not intersect
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x < other.max_x
            && self.max_x > other.min_x
            && self.min_y < other.max_y
            && self.max_y > other.min_y
            && self.min_z < other.max_z
            && self.max_z > other.min_z
    }
}

/// Model-space bounds template used to rebuild the world box after moving
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Collision {
    pub model_bounds: BoundingBox,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Name {
    pub name: String,
}

/// Reference to the sprite or animation set a client should draw
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sprite {
    pub numeric_id: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InteractionType {
    Use,
    Talk,
    Inspect,
    PickUp,
}

/// Interactions an entity offers to clients
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    pub supported: Vec<InteractionType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityType {
    ClientEntity,
    DynamicObject,
}

/// Per-client interest and replication bookkeeping
///
/// `entities_in_aoi` is sorted and duplicate-free at all times. It is the
/// record of what this client has been told exists, so it only changes in
/// lockstep with the Init/Delete messages sent to the client.
#[derive(Debug, Clone, Default)]
pub struct ClientSimData {
    pub net_id: NetworkId,
    pub entities_in_aoi: Vec<Entity>,
    /// Entities that entered this tick; drained by replication
    pub entities_that_entered_aoi: Vec<Entity>,
    /// Set when an input request arrived too late to apply
    pub input_was_dropped: bool,
}

impl ClientSimData {
    pub fn new(net_id: NetworkId) -> Self {
        Self {
            net_id,
            ..Default::default()
        }
    }
}

/// Replicable component kinds, as named in the replication config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentKind {
    Input,
    Position,
    Velocity,
    Rotation,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 4] = [
        ComponentKind::Input,
        ComponentKind::Position,
        ComponentKind::Velocity,
        ComponentKind::Rotation,
    ];

    #[inline]
    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// Small bitset of component kinds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ComponentMask(u8);

impl ComponentMask {
    pub const EMPTY: ComponentMask = ComponentMask(0);

    #[inline]
    pub fn insert(&mut self, kind: ComponentKind) {
        self.0 |= kind.bit();
    }

    #[inline]
    pub fn contains(&self, kind: ComponentKind) -> bool {
        self.0 & kind.bit() != 0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn union(self, other: ComponentMask) -> ComponentMask {
        ComponentMask(self.0 | other.0)
    }

    #[inline]
    pub fn intersection(self, other: ComponentMask) -> ComponentMask {
        ComponentMask(self.0 & other.0)
    }

    pub fn iter(self) -> impl Iterator<Item = ComponentKind> {
        ComponentKind::ALL.into_iter().filter(move |k| self.contains(*k))
    }
}

impl FromIterator<ComponentKind> for ComponentMask {
    fn from_iter<I: IntoIterator<Item = ComponentKind>>(iter: I) -> Self {
        let mut mask = ComponentMask::EMPTY;
        for kind in iter {
            mask.insert(kind);
        }
        mask
    }
}
