//! Unlock Evaluator: gates instance availability behind requirement graphs.
//!
//! Each unlock entry is a conjunction of requirements over generator and
//! upgrade facts. Satisfaction is edge-triggered: an entry fires exactly once,
//! when its last requirement flips true, and the unlock persists as a fact
//! from then on. Dangling requirement references are reported once and pin
//! their sensor false, so a broken entry can never fire.

use {
    bevy::{platform::collections::HashMap, prelude::*},
    catalogs::{ContentIndex, Requirement},
    generators::{GeneratorBuilt, GeneratorLeveled},
    save_load::{GameData, GameLoaded, PrestigeApplied, SaveScheduler},
    std::collections::HashSet,
    upgrades::UpgradePurchased,
};

/// Fired once per entry when its target instance becomes available.
#[derive(Event)]
pub struct InstanceUnlocked {
    pub instance_id: String,
}

struct BoardEntry {
    id: String,
    target_instance: String,
    requirements: Vec<Requirement>,
    /// One flag per requirement; a dangling requirement stays false forever.
    sensors: Vec<bool>,
    fired: bool,
}

/// Live requirement state for every unlock entry, plus a dependency-key
/// index so an observed event touches only the sensors listening to it.
#[derive(Resource, Default)]
pub struct UnlockBoard {
    entries: Vec<BoardEntry>,
    /// `owned:<instance>` / `level:<instance>` / `upgrade:<id>` → listeners.
    topics: HashMap<String, Vec<(usize, usize)>>,
    warned: HashSet<String>,
}

impl UnlockBoard {
    pub fn is_fired(&self, entry_id: &str) -> bool {
        self.entries.iter().any(|e| e.id == entry_id && e.fired)
    }
}

fn dependency_key(requirement: &Requirement) -> String {
    match requirement {
        Requirement::NodeOwned { instance_id } => format!("owned:{instance_id}"),
        Requirement::NodeLevelAtLeast { instance_id, .. } => format!("level:{instance_id}"),
        Requirement::UpgradePurchased { upgrade_id } => format!("upgrade:{upgrade_id}"),
    }
}

fn requirement_met(requirement: &Requirement, data: &GameData) -> bool {
    match requirement {
        Requirement::NodeOwned { instance_id } => {
            data.generator(instance_id).is_some_and(|g| g.owned)
        }
        Requirement::NodeLevelAtLeast {
            instance_id,
            min_level,
        } => data.generator(instance_id).is_some_and(|g| g.level >= *min_level),
        Requirement::UpgradePurchased { upgrade_id } => data.upgrade_rank(upgrade_id) > 0,
    }
}

/// True when the requirement's target exists in content. Checked at board
/// build; a miss is logged once and the sensor is left permanently false.
fn requirement_target_exists(requirement: &Requirement, index: &ContentIndex) -> bool {
    match requirement {
        Requirement::NodeOwned { instance_id }
        | Requirement::NodeLevelAtLeast { instance_id, .. } => {
            index.instances.contains_key(instance_id)
        }
        Requirement::UpgradePurchased { upgrade_id } => index.upgrades.contains_key(upgrade_id),
    }
}

/// Rebuilds the board from content + facts. Returns instance ids that became
/// available during the build (startup catch-up) so the caller can announce
/// them after the board resource is in place.
fn build_board(
    index: &ContentIndex,
    data: &mut GameData,
    saves: &mut SaveScheduler,
) -> (UnlockBoard, Vec<String>) {
    let mut board = UnlockBoard::default();
    let mut newly_unlocked = Vec::new();

    // Instances open from the start are unlocked unconditionally.
    for instance in index.instances.values() {
        if (instance.initial.enabled || instance.initial.level >= 1)
            && data.mark_unlocked(&instance.id, saves, true)
        {
            newly_unlocked.push(instance.id.clone());
        }
    }

    for entry in &index.unlocks {
        let entry_index = board.entries.len();
        let mut sensors = Vec::with_capacity(entry.requirements.len());
        for (sensor_index, requirement) in entry.requirements.iter().enumerate() {
            if !requirement_target_exists(requirement, index) {
                let cause = format!("{}:{}", entry.id, dependency_key(requirement));
                if board.warned.insert(cause) {
                    warn!(
                        entry = %entry.id,
                        requirement = %dependency_key(requirement),
                        "unlock requirement targets missing content, treating as never met"
                    );
                }
                sensors.push(false);
                continue;
            }
            board
                .topics
                .entry(dependency_key(requirement))
                .or_default()
                .push((entry_index, sensor_index));
            sensors.push(requirement_met(requirement, data));
        }
        board.entries.push(BoardEntry {
            id: entry.id.clone(),
            target_instance: entry.target_instance.clone(),
            requirements: entry.requirements.clone(),
            sensors,
            fired: data.is_unlocked(&entry.target_instance),
        });
    }

    // Entries already satisfied by loaded facts fire during the build.
    for entry in &mut board.entries {
        if !entry.fired && !entry.sensors.is_empty() && entry.sensors.iter().all(|met| *met) {
            entry.fired = true;
            if data.mark_unlocked(&entry.target_instance, saves, true) {
                newly_unlocked.push(entry.target_instance.clone());
            }
        }
    }

    (board, newly_unlocked)
}

/// Re-evaluates every sensor listening on `key` and fires entries whose
/// conjunction just became true.
fn refresh_key(
    board: &mut UnlockBoard,
    key: &str,
    data: &mut GameData,
    saves: &mut SaveScheduler,
    commands: &mut Commands,
) {
    let Some(listeners) = board.topics.get(key).cloned() else {
        return;
    };
    for (entry_index, sensor_index) in listeners {
        let entry = &mut board.entries[entry_index];
        entry.sensors[sensor_index] = requirement_met(&entry.requirements[sensor_index], data);
        if entry.fired || !entry.sensors.iter().all(|met| *met) {
            continue;
        }
        entry.fired = true;
        data.mark_unlocked(&entry.target_instance, saves, true);
        info!(entry = %entry.id, instance = %entry.target_instance, "instance unlocked");
        commands.trigger(InstanceUnlocked {
            instance_id: entry.target_instance.clone(),
        });
    }
}

pub fn on_generator_built(
    trigger: On<GeneratorBuilt>,
    mut commands: Commands,
    mut board: ResMut<UnlockBoard>,
    mut data: ResMut<GameData>,
    mut saves: ResMut<SaveScheduler>,
) {
    let key = format!("owned:{}", trigger.event().instance_id);
    refresh_key(&mut board, &key, &mut data, &mut saves, &mut commands);
}

pub fn on_generator_leveled(
    trigger: On<GeneratorLeveled>,
    mut commands: Commands,
    mut board: ResMut<UnlockBoard>,
    mut data: ResMut<GameData>,
    mut saves: ResMut<SaveScheduler>,
) {
    let key = format!("level:{}", trigger.event().instance_id);
    refresh_key(&mut board, &key, &mut data, &mut saves, &mut commands);
}

pub fn on_upgrade_purchased(
    trigger: On<UpgradePurchased>,
    mut commands: Commands,
    mut board: ResMut<UnlockBoard>,
    mut data: ResMut<GameData>,
    mut saves: ResMut<SaveScheduler>,
) {
    let key = format!("upgrade:{}", trigger.event().upgrade_id);
    refresh_key(&mut board, &key, &mut data, &mut saves, &mut commands);
}

fn rebuild_board(
    commands: &mut Commands,
    index: &ContentIndex,
    board: &mut UnlockBoard,
    data: &mut GameData,
    saves: &mut SaveScheduler,
) {
    let (fresh, newly_unlocked) = build_board(index, data, saves);
    *board = fresh;
    for instance_id in newly_unlocked {
        commands.trigger(InstanceUnlocked { instance_id });
    }
}

pub fn on_game_loaded(
    _trigger: On<GameLoaded>,
    mut commands: Commands,
    index: Res<ContentIndex>,
    mut board: ResMut<UnlockBoard>,
    mut data: ResMut<GameData>,
    mut saves: ResMut<SaveScheduler>,
) {
    rebuild_board(&mut commands, &index, &mut board, &mut data, &mut saves);
}

pub fn on_prestige_applied(
    _trigger: On<PrestigeApplied>,
    mut commands: Commands,
    index: Res<ContentIndex>,
    mut board: ResMut<UnlockBoard>,
    mut data: ResMut<GameData>,
    mut saves: ResMut<SaveScheduler>,
) {
    rebuild_board(&mut commands, &index, &mut board, &mut data, &mut saves);
}

pub struct UnlocksPlugin;

impl Plugin for UnlocksPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<UnlockBoard>()
            .add_observer(on_generator_built)
            .add_observer(on_generator_leveled)
            .add_observer(on_upgrade_purchased)
            .add_observer(on_game_loaded)
            .add_observer(on_prestige_applied);
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        catalogs::{
            AutomationPolicy, GameDefinition, InstanceInit, NodeDefinition, NodeInstance,
            OutputDef, ResourceDefinition, ResourceKind, UnlockEntry,
        },
        growth::PriceCurve,
        save_load::GeneratorFact,
    };

    fn definition() -> GameDefinition {
        GameDefinition {
            zones: vec!["orchard".into()],
            resources: vec![ResourceDefinition {
                id: "gold".into(),
                kind: ResourceKind::Soft,
                display_name: String::new(),
            }],
            nodes: vec![NodeDefinition {
                id: "apple".into(),
                base_cycle_seconds: 10.0,
                price_resource: "gold".into(),
                price: PriceCurve::Table(vec![10.0]),
                base_outputs: vec![OutputDef {
                    resource_id: "gold".into(),
                    amount: 1.0,
                }],
                automation: AutomationPolicy::Manual,
            }],
            instances: vec![
                NodeInstance {
                    id: "apple_1".into(),
                    node_id: "apple".into(),
                    zone_id: "orchard".into(),
                    initial: InstanceInit {
                        level: 0,
                        enabled: true,
                    },
                },
                NodeInstance {
                    id: "apple_2".into(),
                    node_id: "apple".into(),
                    zone_id: "orchard".into(),
                    initial: InstanceInit {
                        level: 0,
                        enabled: false,
                    },
                },
            ],
            unlocks: vec![UnlockEntry {
                id: "open_apple_2".into(),
                target_instance: "apple_2".into(),
                requirements: vec![
                    Requirement::NodeOwned {
                        instance_id: "apple_1".into(),
                    },
                    Requirement::NodeLevelAtLeast {
                        instance_id: "apple_1".into(),
                        min_level: 5,
                    },
                ],
            }],
            ..Default::default()
        }
    }

    #[derive(Resource, Default)]
    struct Announced(Vec<String>);

    fn app_with(definition: GameDefinition) -> App {
        let index = definition.index().unwrap();
        let data = GameData::defaults(&index, 100);
        let mut app = App::new();
        app.init_resource::<SaveScheduler>()
            .init_resource::<UnlockBoard>()
            .init_resource::<Announced>()
            .insert_resource(data)
            .insert_resource(index);
        app.add_observer(on_generator_built);
        app.add_observer(on_generator_leveled);
        app.add_observer(on_upgrade_purchased);
        app.add_observer(on_game_loaded);
        app.add_observer(on_prestige_applied);
        app.add_observer(
            |trigger: On<InstanceUnlocked>, mut seen: ResMut<Announced>| {
                seen.0.push(trigger.event().instance_id.clone());
            },
        );
        app.world_mut().trigger(GameLoaded);
        app.update();
        app
    }

    fn set_generator(app: &mut App, instance_id: &str, owned: bool, level: u32) {
        app.world_mut()
            .resource_scope(|world, mut data: Mut<GameData>| {
                let mut saves = world.resource_mut::<SaveScheduler>();
                data.set_generator(
                    GeneratorFact {
                        instance_id: instance_id.into(),
                        owned,
                        enabled: owned,
                        level,
                        automation_purchased: false,
                        automated: false,
                    },
                    &mut saves,
                    false,
                );
            });
    }

    #[test]
    fn initially_enabled_instances_unlock_at_startup() {
        let app = app_with(definition());
        let data = app.world().resource::<GameData>();
        assert!(data.is_unlocked("apple_1"));
        assert!(!data.is_unlocked("apple_2"));
        assert_eq!(app.world().resource::<Announced>().0, vec!["apple_1"]);
    }

    #[test]
    fn conjunction_fires_only_when_every_requirement_holds() {
        let mut app = app_with(definition());

        set_generator(&mut app, "apple_1", true, 1);
        app.world_mut().trigger(GeneratorBuilt {
            instance_id: "apple_1".into(),
            node_id: "apple".into(),
        });
        app.update();
        assert!(!app.world().resource::<GameData>().is_unlocked("apple_2"));

        set_generator(&mut app, "apple_1", true, 5);
        app.world_mut().trigger(GeneratorLeveled {
            instance_id: "apple_1".into(),
            node_id: "apple".into(),
            level: 5,
            purchased: 4,
        });
        app.update();
        assert!(app.world().resource::<GameData>().is_unlocked("apple_2"));
        assert!(app.world().resource::<UnlockBoard>().is_fired("open_apple_2"));
    }

    #[test]
    fn entries_fire_exactly_once() {
        let mut app = app_with(definition());
        set_generator(&mut app, "apple_1", true, 5);
        for level in [5, 6, 7] {
            app.world_mut().trigger(GeneratorLeveled {
                instance_id: "apple_1".into(),
                node_id: "apple".into(),
                level,
                purchased: 1,
            });
            app.update();
        }
        let announced = &app.world().resource::<Announced>().0;
        let fired_for_target = announced.iter().filter(|id| *id == "apple_2").count();
        assert_eq!(fired_for_target, 1);
    }

    #[test]
    fn loaded_facts_satisfying_an_entry_fire_during_board_build() {
        let mut app = app_with(definition());
        set_generator(&mut app, "apple_1", true, 7);

        app.world_mut().trigger(GameLoaded);
        app.update();
        assert!(app.world().resource::<GameData>().is_unlocked("apple_2"));
    }

    #[test]
    fn dangling_requirement_pins_the_entry_closed() {
        let mut definition = definition();
        definition.unlocks[0].requirements = vec![Requirement::UpgradePurchased {
            upgrade_id: "no_such_upgrade".into(),
        }];
        let mut app = app_with(definition);

        app.world_mut().trigger(UpgradePurchased {
            upgrade_id: "no_such_upgrade".into(),
            rank: 1,
        });
        app.update();
        assert!(!app.world().resource::<GameData>().is_unlocked("apple_2"));
    }

    #[test]
    fn prestige_rebuild_reopens_only_initial_instances() {
        let mut app = app_with(definition());
        set_generator(&mut app, "apple_1", true, 5);
        app.world_mut().trigger(GeneratorLeveled {
            instance_id: "apple_1".into(),
            node_id: "apple".into(),
            level: 5,
            purchased: 1,
        });
        app.update();
        assert!(app.world().resource::<GameData>().is_unlocked("apple_2"));

        // Prestige clears unlock facts and generator progress.
        app.world_mut()
            .resource_scope(|_, mut data: Mut<GameData>| {
                data.unlocked_instances.clear();
                data.generators.iter_mut().for_each(|g| {
                    g.owned = false;
                    g.level = 0;
                    g.enabled = false;
                });
            });
        app.world_mut().trigger(PrestigeApplied);
        app.update();

        let data = app.world().resource::<GameData>();
        assert!(data.is_unlocked("apple_1"));
        assert!(!data.is_unlocked("apple_2"));
    }
}
