use crate::game::components::{
    BoundingBox, Input, Position, PreviousPosition, Rotation, Velocity,
};
use crate::game::constants::movement::{ACCELERATION, CLIMB_SPEED, RUN_SPEED};
use crate::game::registry::Registry;
use crate::game::spatial::SpatialLocator;
use crate::util::vec3::Vec3;

/// Velocity the held input asks for
///
/// Diagonal ground movement is normalized so it is no faster than straight.
pub fn target_velocity(input: &Input) -> Vec3 {
    let axes = input.axes();
    let planar = Vec3::new(axes.x, axes.y, 0.0).normalize() * RUN_SPEED;
    Vec3::new(planar.x, planar.y, axes.z * CLIMB_SPEED)
}

#[inline]
fn approach(current: f32, target: f32, max_delta: f32) -> f32 {
    if current < target {
        (current + max_delta).min(target)
    } else {
        (current - max_delta).max(target)
    }
}

/// Accelerate towards the input's target velocity, per axis
pub fn update_velocity(velocity: &mut Velocity, input: &Input, dt: f32) {
    let target = target_velocity(input);
    let max_delta = ACCELERATION * dt;
    velocity.x = approach(velocity.x, target.x, max_delta);
    velocity.y = approach(velocity.y, target.y, max_delta);
    velocity.z = approach(velocity.z, target.z, max_delta);
}

/// Integrate position from the (already updated) velocity
pub fn update_position(position: &mut Position, velocity: &Velocity, dt: f32) {
    position.x += velocity.x * dt;
    position.y += velocity.y * dt;
    position.z += velocity.z * dt;
}

/// One semi-implicit Euler step
///
/// Shared by the server simulation and client prediction; replay only
/// converges because both sides call exactly this.
pub fn step(position: &mut Position, velocity: &mut Velocity, input: &Input, dt: f32) {
    update_velocity(velocity, input, dt);
    update_position(position, velocity, dt);
}

/// Move every entity that has input, position, velocity and collision bounds
///
/// Entities are processed in ascending order. Returns how many moved.
pub fn process_movements(registry: &mut Registry, locator: &mut SpatialLocator, dt: f32) -> usize {
    let mut moved = 0;

    for entity in registry.inputs.sorted_entities() {
        let Some(input) = registry.inputs.get(entity).copied() else {
            continue;
        };
        let Some(model_bounds) = registry.collisions.get(entity).map(|c| c.model_bounds) else {
            continue;
        };
        let (Some(position), Some(velocity)) = (
            registry.positions.get_mut(entity),
            registry.velocities.get_mut(entity),
        ) else {
            continue;
        };

        let previous = *position;
        step(position, velocity, &input, dt);
        let position = *position;

        registry
            .previous_positions
            .insert(entity, PreviousPosition::from(previous));

        let bounds = BoundingBox::model_to_world(&model_bounds, &position);
        registry.bounding_boxes.insert(entity, bounds);
        locator.insert_or_update(entity, bounds);

        if let Some(rotation) = Rotation::from_input(&input) {
            registry.set_rotation(entity, rotation);
        }

        // Exact comparison; movement is input-quantized
        if position != previous {
            registry.position_changed.insert(entity, ());
            moved += 1;
        }
    }

    moved
}
