//! Milestone Evaluator: fires level-threshold rewards exactly once.
//!
//! Every level change scans that node's milestones in sorted-id order; all
//! milestones crossed by one change register together and trigger a single
//! aggregator rebuild. Fired milestones are irreversible within a run, their
//! sources stay registered until a prestige reset clears the fact.

use {
    bevy::prelude::*,
    catalogs::ContentIndex,
    generators::GeneratorLeveled,
    modifiers::ModifierAggregator,
    save_load::{GameData, GameLoaded, PrestigeApplied, SaveScheduler},
    std::collections::HashSet,
};

#[derive(Event)]
pub struct MilestoneFired {
    pub milestone_id: String,
    pub node_id: String,
    pub at_level: u32,
}

fn source_key(node_id: &str, milestone_id: &str) -> String {
    format!("milestone:{node_id}:{milestone_id}")
}

/// Grants must all resolve to known modifiers; a partially valid milestone
/// never fires.
fn grants_valid(
    milestone: &catalogs::MilestoneDefinition,
    index: &ContentIndex,
    warned: &mut HashSet<String>,
) -> bool {
    let mut ok = true;
    for modifier_id in &milestone.grants {
        if !index.modifiers.contains_key(modifier_id) {
            if warned.insert(format!("{}:{modifier_id}", milestone.id)) {
                warn!(
                    milestone = %milestone.id,
                    modifier = %modifier_id,
                    "milestone grants an unknown modifier, skipping it"
                );
            }
            ok = false;
        }
    }
    ok
}

pub fn evaluate_milestones(
    trigger: On<GeneratorLeveled>,
    mut commands: Commands,
    index: Res<ContentIndex>,
    mut agg: ResMut<ModifierAggregator>,
    mut data: ResMut<GameData>,
    mut saves: ResMut<SaveScheduler>,
    mut warned: Local<HashSet<String>>,
) {
    let event = trigger.event();
    let mut fired_any = false;
    for milestone_id in index
        .milestones_by_node
        .get(&event.node_id)
        .into_iter()
        .flatten()
    {
        let Some(milestone) = index.milestones.get(milestone_id) else {
            continue;
        };
        if milestone.at_level > event.level || data.milestone_fired(&milestone.id) {
            continue;
        }
        if !grants_valid(milestone, &index, &mut warned) {
            continue;
        }
        data.mark_milestone_fired(&milestone.id, &mut saves, true);
        agg.register_source(
            &source_key(&milestone.node_id, &milestone.id),
            milestone.grants.clone(),
        );
        info!(
            milestone = %milestone.id,
            node = %milestone.node_id,
            at_level = milestone.at_level,
            "milestone fired"
        );
        commands.trigger(MilestoneFired {
            milestone_id: milestone.id.clone(),
            node_id: milestone.node_id.clone(),
            at_level: milestone.at_level,
        });
        fired_any = true;
    }
    if fired_any {
        // One rebuild covers every milestone crossed by this level change.
        agg.rebuild(&index, &format!("milestone:{}:{}", event.node_id, event.level));
    }
}

/// Restores sources for already-fired milestones after a load or prestige.
fn register_fired_sources(
    index: &ContentIndex,
    agg: &mut ModifierAggregator,
    data: &GameData,
    reason: &str,
) {
    let mut registered = false;
    for milestone_id in &data.fired_milestones {
        let Some(milestone) = index.milestones.get(milestone_id) else {
            continue;
        };
        agg.register_source(
            &source_key(&milestone.node_id, &milestone.id),
            milestone.grants.clone(),
        );
        registered = true;
    }
    if registered {
        agg.rebuild(index, reason);
    }
}

pub fn on_game_loaded(
    _trigger: On<GameLoaded>,
    index: Res<ContentIndex>,
    mut agg: ResMut<ModifierAggregator>,
    data: Res<GameData>,
) {
    register_fired_sources(&index, &mut agg, &data, "milestones:load");
}

pub fn on_prestige_applied(
    _trigger: On<PrestigeApplied>,
    index: Res<ContentIndex>,
    mut agg: ResMut<ModifierAggregator>,
    data: Res<GameData>,
) {
    register_fired_sources(&index, &mut agg, &data, "milestones:prestige");
}

pub struct MilestonesPlugin;

impl Plugin for MilestonesPlugin {
    fn build(&self, app: &mut App) {
        app.add_observer(evaluate_milestones)
            .add_observer(on_game_loaded)
            .add_observer(on_prestige_applied);
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        catalogs::{
            GameDefinition, InstanceInit, MilestoneDefinition, ModifierDefinition, ModifierOp,
            ModifierScope, NodeDefinition, NodeInstance, OutputDef, ResourceDefinition,
            ResourceKind, targets,
        },
        growth::PriceCurve,
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
                automation: catalogs::AutomationPolicy::Manual,
            }],
            instances: vec![NodeInstance {
                id: "apple_1".into(),
                node_id: "apple".into(),
                zone_id: "orchard".into(),
                initial: InstanceInit {
                    level: 0,
                    enabled: true,
                },
            }],
            modifiers: vec![ModifierDefinition {
                id: "apple_output_up".into(),
                source_tag: "milestone".into(),
                op: ModifierOp::Multiply,
                target: targets::NODE_OUTPUT.into(),
                scope: ModifierScope::Node("apple".into()),
                value: 2.0,
            }],
            milestones: vec![
                MilestoneDefinition {
                    id: "apple_10".into(),
                    node_id: "apple".into(),
                    at_level: 10,
                    grants: vec!["apple_output_up".into()],
                },
                MilestoneDefinition {
                    id: "apple_5".into(),
                    node_id: "apple".into(),
                    at_level: 5,
                    grants: vec!["apple_output_up".into()],
                },
            ],
            ..Default::default()
        }
    }

    fn app_with(definition: GameDefinition) -> App {
        let index = definition.index().unwrap();
        let data = GameData::defaults(&index, 100);
        let mut app = App::new();
        app.init_resource::<SaveScheduler>()
            .insert_resource(ModifierAggregator::default())
            .insert_resource(data)
            .insert_resource(index);
        app.add_observer(evaluate_milestones);
        app.add_observer(on_game_loaded);
        app.add_observer(on_prestige_applied);
        app.update();
        app
    }

    fn leveled(app: &mut App, level: u32) {
        app.world_mut().trigger(GeneratorLeveled {
            instance_id: "apple_1".into(),
            node_id: "apple".into(),
            level,
            purchased: 1,
        });
        app.update();
    }

    #[test]
    fn fires_every_crossed_milestone_with_one_rebuild() {
        let mut app = app_with(definition());
        leveled(&mut app, 12);

        let agg = app.world().resource::<ModifierAggregator>();
        assert!(agg.has_source("milestone:apple:apple_5"));
        assert!(agg.has_source("milestone:apple:apple_10"));
        assert_eq!(agg.rebuild_count, 1);
        assert_eq!(agg.last_reason, "milestone:apple:12");

        let data = app.world().resource::<GameData>();
        assert!(data.milestone_fired("apple_5"));
        assert!(data.milestone_fired("apple_10"));
    }

    #[test]
    fn below_threshold_fires_nothing() {
        let mut app = app_with(definition());
        leveled(&mut app, 4);
        let agg = app.world().resource::<ModifierAggregator>();
        assert_eq!(agg.rebuild_count, 0);
        assert!(!app.world().resource::<GameData>().milestone_fired("apple_5"));
    }

    #[test]
    fn fired_milestones_stay_fired() {
        let mut app = app_with(definition());
        leveled(&mut app, 5);
        assert_eq!(app.world().resource::<ModifierAggregator>().rebuild_count, 1);

        leveled(&mut app, 6);
        // Nothing new crossed, so no second rebuild.
        assert_eq!(app.world().resource::<ModifierAggregator>().rebuild_count, 1);
    }

    #[test]
    fn milestone_with_unknown_grant_is_skipped() {
        let mut definition = definition();
        definition.milestones[1].grants = vec!["no_such_modifier".into()];
        let mut app = app_with(definition);
        leveled(&mut app, 5);

        let agg = app.world().resource::<ModifierAggregator>();
        assert!(!agg.has_source("milestone:apple:apple_5"));
        assert!(!app.world().resource::<GameData>().milestone_fired("apple_5"));
    }

    #[test]
    fn load_restores_sources_for_fired_milestones() {
        let mut app = app_with(definition());
        leveled(&mut app, 5);

        // Fresh aggregator, as after a restart.
        app.insert_resource(ModifierAggregator::default());
        app.world_mut().trigger(GameLoaded);
        app.update();

        let agg = app.world().resource::<ModifierAggregator>();
        assert!(agg.has_source("milestone:apple:apple_5"));
        assert_eq!(agg.rebuild_count, 1);
    }
}
