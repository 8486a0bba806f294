//! Generator Engine: one entity per placed node instance, each cycling
//! Locked → Running → Ready → (Collect) → Running.
//!
//! Cycle timing lives here; everything economic (prices, output amounts,
//! speed) is resolved against content and the compiled modifier table at the
//! moment it is needed, never cached across frames.

use {
    bevy::{platform::collections::HashMap, prelude::*},
    states::GameState,
    system_schedule::SimSet,
};

pub mod systems;

/// Floor on the effective cycle duration. Speed multipliers compound, and
/// `base / speed` must never collapse to zero.
pub const MIN_CYCLE_SECONDS: f64 = 1e-4;

/// Which instance this entity embodies.
#[derive(Component, Debug, Clone)]
pub struct NodeRef {
    pub instance_id: String,
    pub node_id: String,
    pub zone_id: String,
}

/// Mutable per-instance state. Ownership flags and level are persisted via
/// facts; cycle progress is session-only and rebuilt at zero on load.
#[derive(Component, Debug, Clone, PartialEq)]
pub struct GeneratorState {
    pub owned: bool,
    pub enabled: bool,
    pub level: u32,
    pub automation_purchased: bool,
    pub automated: bool,
    pub ready: bool,
    /// Seconds into the current cycle, measured against `cycle_seconds`.
    pub elapsed: f64,
    /// Effective duration currently in force (base / speed, floored).
    pub cycle_seconds: f64,
}

impl GeneratorState {
    pub fn running(&self) -> bool {
        self.owned && self.enabled && !self.ready
    }

    /// 0..1 cycle completion ratio.
    pub fn progress(&self) -> f64 {
        if self.ready {
            1.0
        } else if self.cycle_seconds > 0.0 {
            (self.elapsed / self.cycle_seconds).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Re-times the cycle keeping the completion fraction, so a mid-cycle
    /// speed change neither refunds nor swallows progress.
    pub fn set_cycle_seconds(&mut self, new_seconds: f64) {
        if self.cycle_seconds == new_seconds {
            return;
        }
        let fraction = if self.cycle_seconds > 0.0 {
            self.elapsed / self.cycle_seconds
        } else {
            0.0
        };
        self.cycle_seconds = new_seconds;
        self.elapsed = fraction * new_seconds;
    }
}

/// O(1) lookup of generator entities by instance id.
#[derive(Resource, Default)]
pub struct GeneratorIndex {
    pub entities: HashMap<String, Entity>,
}

impl GeneratorIndex {
    pub fn entity(&self, instance_id: &str) -> Option<Entity> {
        self.entities.get(instance_id).copied()
    }
}

// --- Commands (observer events) ---

#[derive(Event)]
pub struct BuildGenerator {
    pub instance_id: String,
}

#[derive(Event)]
pub struct LevelUpGenerator {
    pub instance_id: String,
    /// Buy-N batch size; stops at the first unaffordable step.
    pub count: u32,
}

#[derive(Event)]
pub struct CollectGenerator {
    pub instance_id: String,
}

#[derive(Event)]
pub struct SetAutomation {
    pub instance_id: String,
    pub automated: bool,
}

// --- Notifications ---

#[derive(Event)]
pub struct GeneratorBuilt {
    pub instance_id: String,
    pub node_id: String,
}

/// Fired after every successful Build or LevelUp with the resulting level.
/// Milestone and unlock evaluation hang off this.
#[derive(Event)]
pub struct GeneratorLeveled {
    pub instance_id: String,
    pub node_id: String,
    pub level: u32,
    /// Levels actually bought in this batch (may be less than requested).
    pub purchased: u32,
}

#[derive(Event)]
pub struct GeneratorCollected {
    pub instance_id: String,
    pub outputs: Vec<(String, f64)>,
}

pub struct GeneratorsPlugin;

impl Plugin for GeneratorsPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<GeneratorIndex>()
            .add_systems(
                Update,
                systems::tick_generators
                    .in_set(SimSet::Tick)
                    .run_if(in_state(GameState::Running)),
            )
            .add_observer(systems::build_generator)
            .add_observer(systems::level_up_generator)
            .add_observer(systems::collect_generator)
            .add_observer(systems::set_automation)
            .add_observer(systems::on_game_loaded)
            .add_observer(systems::on_prestige_applied);
    }
}
