//! World commands — the operations remote collaborators may invoke.
//!
//! Commands arrive as tagged JSON (`{"op": "create_entities", ...}`) and are
//! executed against a [`World`] with [`World::execute`].

use engine_component::EntityId;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::WorldError;
use crate::scheduler::SchedulerState;
use crate::store::EntitySpec;
use crate::world::{EntityUpdate, World};

/// A world operation addressed by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WorldCommand {
    /// Create entities in order.
    CreateEntities {
        /// Entities to create.
        entities: Vec<EntitySpec>,
    },
    /// Merge components into existing entities.
    UpdateEntities {
        /// Updates to apply.
        entities: Vec<EntityUpdate>,
    },
    /// Remove entities.
    RemoveEntities {
        /// Ids to remove.
        ids: Vec<EntityId>,
    },
    /// Enable systems.
    EnableSystems {
        /// System ids.
        ids: Vec<String>,
    },
    /// Disable systems.
    DisableSystems {
        /// System ids.
        ids: Vec<String>,
    },
    /// Start or resume the scheduler.
    Start,
    /// Pause the scheduler.
    Pause,
    /// Stop the scheduler.
    Stop,
}

/// Result of executing a [`WorldCommand`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CommandOutcome {
    /// Entities were created with these ids.
    Created {
        /// Ids of the new entities.
        ids: Vec<EntityId>,
    },
    /// The command completed.
    Done,
    /// The scheduler is now in this state.
    State {
        /// Scheduler state after the command.
        state: SchedulerState,
    },
}

impl World {
    /// Execute a command.
    ///
    /// # Errors
    ///
    /// Returns the error of the underlying world operation.
    pub fn execute(&mut self, command: WorldCommand) -> Result<CommandOutcome, WorldError> {
        debug!(?command, "executing world command");
        let outcome = match command {
            WorldCommand::CreateEntities { entities } => CommandOutcome::Created {
                ids: self.create_entities(entities)?,
            },
            WorldCommand::UpdateEntities { entities } => {
                self.update_entities(entities)?;
                CommandOutcome::Done
            }
            WorldCommand::RemoveEntities { ids } => {
                self.remove_entities(&ids)?;
                CommandOutcome::Done
            }
            WorldCommand::EnableSystems { ids } => {
                self.enable_systems(ids.as_slice())?;
                CommandOutcome::Done
            }
            WorldCommand::DisableSystems { ids } => {
                self.disable_systems(ids.as_slice())?;
                CommandOutcome::Done
            }
            WorldCommand::Start => {
                self.start();
                CommandOutcome::State {
                    state: self.state(),
                }
            }
            WorldCommand::Pause => {
                self.pause();
                CommandOutcome::State {
                    state: self.state(),
                }
            }
            WorldCommand::Stop => {
                self.stop();
                CommandOutcome::State {
                    state: self.state(),
                }
            }
        };
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use engine_component::ComponentKind;
    use serde_json::json;

    use super::*;
    use crate::system::SystemFn;

    #[test]
    fn test_command_wire_format() {
        let command: WorldCommand = serde_json::from_value(json!({
            "op": "create_entities",
            "entities": [{"id": "a", "components": [{"kind": "Position", "fields": {"x": 1}}]}]
        }))
        .unwrap();
        let WorldCommand::CreateEntities { entities } = &command else {
            panic!("unexpected command: {command:?}");
        };
        assert_eq!(entities[0].id, Some(EntityId::from("a")));

        let pause: WorldCommand = serde_json::from_value(json!({"op": "pause"})).unwrap();
        assert_eq!(pause, WorldCommand::Pause);
    }

    #[test]
    fn test_execute() {
        let mut world = World::new();
        world
            .register_kind(ComponentKind::new("Position").field("x", 0))
            .unwrap();
        world.add_system(SystemFn::new("s", |_| Ok(()))).unwrap();

        let outcome = world
            .execute(WorldCommand::CreateEntities {
                entities: vec![EntitySpec::new().with_id("a")],
            })
            .unwrap();
        assert_eq!(
            outcome,
            CommandOutcome::Created {
                ids: vec![EntityId::from("a")]
            }
        );

        world
            .execute(WorldCommand::DisableSystems {
                ids: vec!["s".into()],
            })
            .unwrap();
        assert_eq!(world.scheduler().is_enabled("s"), Some(false));

        assert_eq!(
            world.execute(WorldCommand::Start).unwrap(),
            CommandOutcome::State {
                state: SchedulerState::Running
            }
        );

        let err = world
            .execute(WorldCommand::RemoveEntities {
                ids: vec![EntityId::from("ghost")],
            })
            .unwrap_err();
        assert!(matches!(err, WorldError::UnknownEntity(_)));
    }
}
