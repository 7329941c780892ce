//! Built-in component kinds, tags, systems and the default world.

use engine_component::{Component, ComponentKind};
use engine_ecs::{EntitySpec, SystemFn, World, WorldError};

/// Project metadata kind.
pub const PROJECT: &str = "Project";
/// 2D position kind.
pub const POSITION: &str = "Position";
/// 2D velocity kind, in units per second.
pub const VELOCITY: &str = "Velocity";

/// Tag carried by the project entity.
pub const PROJECT_TAG: &str = "Project Tag";
/// Id of the seeded project entity.
pub const PROJECT_ENTITY: &str = "Project";

/// Id of the built-in movement system.
pub const MOVEMENT: &str = "movement";

/// Register the built-in kinds and tags.
///
/// # Errors
///
/// Returns [`WorldError::Component`] if a kind is already registered.
pub fn register(world: &mut World) -> Result<(), WorldError> {
    world.register_kind(
        ComponentKind::new(PROJECT)
            .field("name", "New Project")
            .field("description", "A Brand New Project"),
    )?;
    world.register_kind(ComponentKind::new(POSITION).field("x", 0.0).field("y", 0.0))?;
    world.register_kind(
        ComponentKind::new(VELOCITY)
            .field("x", 0.0)
            .field("y", 0.0)
            .pooled(),
    )?;
    world.register_tag(PROJECT_TAG);
    Ok(())
}

/// Populate an empty world with the default project entity.
///
/// # Errors
///
/// Returns [`WorldError`] if the project entity cannot be created.
pub fn seed(world: &mut World) -> Result<(), WorldError> {
    world.create_entity(
        EntitySpec::new()
            .with_id(PROJECT_ENTITY)
            .component(Component::new(PROJECT))
            .tag(PROJECT_TAG),
    )?;
    Ok(())
}

/// Integrates `Velocity` into `Position` for every entity carrying both.
#[must_use]
pub fn movement() -> SystemFn {
    SystemFn::new(MOVEMENT, |ctx| {
        let dt = ctx.dt;
        for id in ctx.query(&[POSITION, VELOCITY], &[]) {
            let Some(entity) = ctx.entity(&id) else {
                continue;
            };
            let (Some(position), Some(velocity)) =
                (entity.component(POSITION), entity.component(VELOCITY))
            else {
                continue;
            };
            let (vx, vy) = (axis(velocity, "x"), axis(velocity, "y"));
            if vx == 0.0 && vy == 0.0 {
                continue;
            }
            let x = axis(position, "x") + vx * dt;
            let y = axis(position, "y") + vy * dt;
            ctx.set_field(&id, POSITION, "x", x)?;
            ctx.set_field(&id, POSITION, "y", y)?;
        }
        Ok(())
    })
}

fn axis(component: &Component, field: &str) -> f64 {
    component
        .get(field)
        .and_then(serde_json::Value::as_f64)
        .unwrap_or_default()
}
