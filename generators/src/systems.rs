use {
    crate::{
        BuildGenerator, CollectGenerator, GeneratorBuilt, GeneratorCollected, GeneratorIndex,
        GeneratorLeveled, GeneratorState, LevelUpGenerator, MIN_CYCLE_SECONDS, NodeRef,
        SetAutomation,
    },
    bevy::prelude::*,
    catalogs::{AutomationPolicy, ContentIndex, ModifierScope, NodeDefinition, TargetPath, targets},
    modifiers::ModifierAggregator,
    save_load::{GameData, GameLoaded, GeneratorFact, PrestigeApplied, SaveScheduler},
    wallet::{IncomeMultiplier, Wallet},
};

/// Scopes a generator's multipliers stack across, narrowest first.
fn scopes_for(node_id: &str, zone_id: &str) -> [ModifierScope; 3] {
    [
        ModifierScope::Node(node_id.to_string()),
        ModifierScope::Zone(zone_id.to_string()),
        ModifierScope::Global,
    ]
}

/// `base / speed`, floored so compounding speed multipliers cannot divide
/// the cycle away entirely.
pub fn effective_cycle_seconds(
    agg: &ModifierAggregator,
    node: &NodeDefinition,
    zone_id: &str,
) -> f64 {
    let speed = agg.stacked_multiplier(
        &TargetPath::of(targets::NODE_SPEED),
        &scopes_for(&node.id, zone_id),
    );
    let raw = node.base_cycle_seconds / speed;
    if raw.is_finite() {
        raw.max(MIN_CYCLE_SECONDS)
    } else {
        node.base_cycle_seconds
    }
}

fn fact_of(node_ref: &NodeRef, state: &GeneratorState) -> GeneratorFact {
    GeneratorFact {
        instance_id: node_ref.instance_id.clone(),
        owned: state.owned,
        enabled: state.enabled,
        level: state.level,
        automation_purchased: state.automation_purchased,
        automated: state.automated,
    }
}

/// Advances every running cycle; re-resolves the effective duration each
/// frame so a modifier rebuild takes hold within one tick, preserving the
/// completion fraction across the change.
pub fn tick_generators(
    time: Res<Time>,
    index: Res<ContentIndex>,
    agg: Res<ModifierAggregator>,
    mut commands: Commands,
    mut generators: Query<(&NodeRef, &mut GeneratorState)>,
) {
    let dt = time.delta_secs_f64();
    for (node_ref, mut state) in &mut generators {
        if !state.owned || !state.enabled {
            continue;
        }
        let Some(node) = index.node(&node_ref.node_id) else {
            continue;
        };
        state.set_cycle_seconds(effective_cycle_seconds(&agg, node, &node_ref.zone_id));
        if state.ready {
            if state.automated {
                commands.trigger(CollectGenerator {
                    instance_id: node_ref.instance_id.clone(),
                });
            }
            continue;
        }
        state.elapsed += dt;
        if state.elapsed >= state.cycle_seconds {
            state.elapsed = state.cycle_seconds;
            state.ready = true;
            if state.automated {
                // Same-tick collect: the command flushes before this frame's
                // reaction systems run.
                commands.trigger(CollectGenerator {
                    instance_id: node_ref.instance_id.clone(),
                });
            }
        }
    }
}

/// Locked → Owned. Spend happens before any state flips; an unaffordable or
/// still-locked build changes nothing.
pub fn build_generator(
    trigger: On<BuildGenerator>,
    mut commands: Commands,
    index: Res<ContentIndex>,
    map: Res<GeneratorIndex>,
    agg: Res<ModifierAggregator>,
    mut wallet: ResMut<Wallet>,
    mut data: ResMut<GameData>,
    mut saves: ResMut<SaveScheduler>,
    mut generators: Query<(&NodeRef, &mut GeneratorState)>,
) {
    let event = trigger.event();
    let Some(entity) = map.entity(&event.instance_id) else {
        warn!(instance = %event.instance_id, "build request for unknown instance");
        return;
    };
    let Ok((node_ref, mut state)) = generators.get_mut(entity) else {
        return;
    };
    if state.owned {
        debug!(instance = %event.instance_id, "already built");
        return;
    }
    if !data.is_unlocked(&node_ref.instance_id) {
        debug!(instance = %event.instance_id, "instance is still locked");
        return;
    }
    let Some(node) = index.node(&node_ref.node_id) else {
        return;
    };
    let price = node.price.price_for_level(1);
    if !wallet.try_spend(&node.price_resource, price) {
        debug!(instance = %event.instance_id, price, "cannot afford build");
        return;
    }
    state.owned = true;
    state.enabled = true;
    state.level = 1;
    state.ready = false;
    state.elapsed = 0.0;
    state.cycle_seconds = effective_cycle_seconds(&agg, node, &node_ref.zone_id);
    data.set_generator(fact_of(node_ref, &state), &mut saves, true);
    info!(instance = %node_ref.instance_id, node = %node_ref.node_id, price, "generator built");
    commands.trigger(GeneratorBuilt {
        instance_id: node_ref.instance_id.clone(),
        node_id: node_ref.node_id.clone(),
    });
    commands.trigger(GeneratorLeveled {
        instance_id: node_ref.instance_id.clone(),
        node_id: node_ref.node_id.clone(),
        level: 1,
        purchased: 1,
    });
}

/// Buy-N: linear walk, one affordability check and spend per level, stopping
/// at the first step the wallet cannot cover.
pub fn level_up_generator(
    trigger: On<LevelUpGenerator>,
    mut commands: Commands,
    index: Res<ContentIndex>,
    map: Res<GeneratorIndex>,
    mut wallet: ResMut<Wallet>,
    mut data: ResMut<GameData>,
    mut saves: ResMut<SaveScheduler>,
    mut generators: Query<(&NodeRef, &mut GeneratorState)>,
) {
    let event = trigger.event();
    let Some(entity) = map.entity(&event.instance_id) else {
        warn!(instance = %event.instance_id, "level-up request for unknown instance");
        return;
    };
    let Ok((node_ref, mut state)) = generators.get_mut(entity) else {
        return;
    };
    if !state.owned {
        debug!(instance = %event.instance_id, "cannot level an unbuilt generator");
        return;
    }
    let Some(node) = index.node(&node_ref.node_id) else {
        return;
    };
    let mut purchased = 0;
    for _ in 0..event.count.max(1) {
        let price = node.price.price_for_level(state.level + 1);
        if !wallet.try_spend(&node.price_resource, price) {
            break;
        }
        state.level += 1;
        purchased += 1;
    }
    if purchased == 0 {
        debug!(instance = %event.instance_id, level = state.level, "cannot afford next level");
        return;
    }
    data.set_generator(fact_of(node_ref, &state), &mut saves, true);
    debug!(instance = %node_ref.instance_id, level = state.level, purchased, "generator leveled");
    commands.trigger(GeneratorLeveled {
        instance_id: node_ref.instance_id.clone(),
        node_id: node_ref.node_id.clone(),
        level: state.level,
        purchased,
    });
}

/// Ready → Running. Output multipliers are resolved here, at collect time,
/// so a rebuild between Ready and Collect is honored.
pub fn collect_generator(
    trigger: On<CollectGenerator>,
    mut commands: Commands,
    index: Res<ContentIndex>,
    map: Res<GeneratorIndex>,
    agg: Res<ModifierAggregator>,
    income: Res<IncomeMultiplier>,
    mut wallet: ResMut<Wallet>,
    mut generators: Query<(&NodeRef, &mut GeneratorState)>,
) {
    let event = trigger.event();
    let Some(entity) = map.entity(&event.instance_id) else {
        warn!(instance = %event.instance_id, "collect request for unknown instance");
        return;
    };
    let Ok((node_ref, mut state)) = generators.get_mut(entity) else {
        return;
    };
    if !state.ready {
        debug!(instance = %event.instance_id, "collect while not ready, ignoring");
        return;
    }
    let Some(node) = index.node(&node_ref.node_id) else {
        return;
    };
    let scopes = scopes_for(&node.id, &node_ref.zone_id);
    let mut outputs = Vec::with_capacity(node.base_outputs.len());
    for output in &node.base_outputs {
        let resource = &output.resource_id;
        let output_mult = agg.stacked_multiplier(&TargetPath::of(targets::NODE_OUTPUT), &scopes)
            * agg.stacked_multiplier(
                &TargetPath::with_param(targets::NODE_OUTPUT, resource),
                &scopes,
            );
        let gain_mult = agg.multiplier(
            &TargetPath::with_param(targets::RESOURCE_GAIN, resource),
            &ModifierScope::Global,
        ) * agg.multiplier(
            &TargetPath::of(targets::RESOURCE_GAIN),
            &ModifierScope::Resource(resource.clone()),
        );
        let amount = output.amount * state.level as f64 * output_mult * gain_mult * income.0;
        if amount > 0.0 {
            wallet.earn(resource, amount);
            outputs.push((resource.clone(), amount));
        }
    }
    state.ready = false;
    state.elapsed = 0.0;
    trace!(instance = %node_ref.instance_id, ?outputs, "cycle collected");
    commands.trigger(GeneratorCollected {
        instance_id: node_ref.instance_id.clone(),
        outputs,
    });
}

/// Toggles automated collection on nodes whose content allows it. The first
/// enable counts as the automation purchase.
pub fn set_automation(
    trigger: On<SetAutomation>,
    index: Res<ContentIndex>,
    map: Res<GeneratorIndex>,
    mut data: ResMut<GameData>,
    mut saves: ResMut<SaveScheduler>,
    mut generators: Query<(&NodeRef, &mut GeneratorState)>,
) {
    let event = trigger.event();
    let Some(entity) = map.entity(&event.instance_id) else {
        warn!(instance = %event.instance_id, "automation request for unknown instance");
        return;
    };
    let Ok((node_ref, mut state)) = generators.get_mut(entity) else {
        return;
    };
    if !state.owned {
        debug!(instance = %event.instance_id, "cannot automate an unbuilt generator");
        return;
    }
    let Some(node) = index.node(&node_ref.node_id) else {
        return;
    };
    if node.automation != AutomationPolicy::Auto {
        debug!(instance = %event.instance_id, "node does not support automation");
        return;
    }
    if event.automated {
        state.automation_purchased = true;
    }
    state.automated = event.automated && state.automation_purchased;
    data.set_generator(fact_of(node_ref, &state), &mut saves, true);
}

pub fn on_game_loaded(
    _trigger: On<GameLoaded>,
    commands: Commands,
    index: Res<ContentIndex>,
    data: Res<GameData>,
    agg: Res<ModifierAggregator>,
    map: ResMut<GeneratorIndex>,
    existing: Query<Entity, With<NodeRef>>,
) {
    respawn_generators(commands, &index, &data, &agg, map, &existing);
}

pub fn on_prestige_applied(
    _trigger: On<PrestigeApplied>,
    commands: Commands,
    index: Res<ContentIndex>,
    data: Res<GameData>,
    agg: Res<ModifierAggregator>,
    map: ResMut<GeneratorIndex>,
    existing: Query<Entity, With<NodeRef>>,
) {
    respawn_generators(commands, &index, &data, &agg, map, &existing);
}

/// Rebuilds the entity set from facts: cycle progress always restarts at
/// zero, ownership/level/automation come from the snapshot.
fn respawn_generators(
    mut commands: Commands,
    index: &ContentIndex,
    data: &GameData,
    agg: &ModifierAggregator,
    mut map: ResMut<GeneratorIndex>,
    existing: &Query<Entity, With<NodeRef>>,
) {
    for entity in existing.iter() {
        commands.entity(entity).despawn();
    }
    map.entities.clear();
    for instance in index.instances.values() {
        let Some(node) = index.node(&instance.node_id) else {
            continue;
        };
        let fact = data
            .generator(&instance.id)
            .cloned()
            .unwrap_or_else(|| GeneratorFact::initial(instance));
        let state = GeneratorState {
            owned: fact.owned,
            enabled: fact.enabled,
            level: fact.level,
            automation_purchased: fact.automation_purchased,
            automated: fact.automated,
            ready: false,
            elapsed: 0.0,
            cycle_seconds: effective_cycle_seconds(agg, node, &instance.zone_id),
        };
        let entity = commands
            .spawn((
                NodeRef {
                    instance_id: instance.id.clone(),
                    node_id: instance.node_id.clone(),
                    zone_id: instance.zone_id.clone(),
                },
                state,
            ))
            .id();
        map.entities.insert(instance.id.clone(), entity);
    }
    debug!(count = map.entities.len(), "generator entities rebuilt from facts");
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        catalogs::{
            GameDefinition, InstanceInit, ModifierDefinition, ModifierOp, NodeInstance, OutputDef,
            ResourceDefinition, ResourceKind,
        },
        growth::PriceCurve,
        std::time::Duration,
    };

    fn orchard_definition() -> GameDefinition {
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
                price: PriceCurve::Table(vec![10.0, 10.0, 20.0, 40.0]),
                base_outputs: vec![OutputDef {
                    resource_id: "gold".into(),
                    amount: 1.0,
                }],
                automation: AutomationPolicy::Auto,
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
                id: "apple_haste".into(),
                source_tag: "test".into(),
                op: ModifierOp::Multiply,
                target: targets::NODE_SPEED.into(),
                scope: ModifierScope::Node("apple".into()),
                value: 2.0,
            }],
            ..Default::default()
        }
    }

    #[derive(Resource, Default)]
    struct LevelEvents(Vec<(u32, u32)>);

    fn sim_app(definition: GameDefinition, gold: f64) -> App {
        let index = definition.index().unwrap();
        let mut agg = ModifierAggregator::default();
        agg.rebuild(&index, "startup");
        let mut data = GameData::defaults(&index, 100);
        data.unlocked_instances.push("apple_1".into());

        let mut app = App::new();
        app.init_resource::<Time>()
            .init_resource::<IncomeMultiplier>()
            .init_resource::<SaveScheduler>()
            .init_resource::<GeneratorIndex>()
            .init_resource::<LevelEvents>()
            .insert_resource(data)
            .insert_resource(index)
            .insert_resource(agg)
            .insert_resource(Wallet::default());
        app.world_mut().resource_mut::<Wallet>().earn("gold", gold);
        app.add_systems(Update, tick_generators);
        app.add_observer(build_generator);
        app.add_observer(level_up_generator);
        app.add_observer(collect_generator);
        app.add_observer(set_automation);
        app.add_observer(on_game_loaded);
        app.add_observer(on_prestige_applied);
        app.add_observer(
            |trigger: On<GeneratorLeveled>, mut seen: ResMut<LevelEvents>| {
                seen.0.push((trigger.event().level, trigger.event().purchased));
            },
        );
        app.world_mut().trigger(GameLoaded);
        app.update();
        app
    }

    fn advance(app: &mut App, seconds: f32) {
        let mut time = app.world().resource::<Time>().clone();
        time.advance_by(Duration::from_secs_f32(seconds));
        app.insert_resource(time);
        app.update();
        // Zero the frame delta so later updates without an explicit advance
        // do not re-apply this one's delta.
        let mut time = app.world().resource::<Time>().clone();
        time.advance_by(Duration::ZERO);
        app.insert_resource(time);
    }

    fn state_of(app: &mut App, instance_id: &str) -> GeneratorState {
        let entity = app
            .world()
            .resource::<GeneratorIndex>()
            .entity(instance_id)
            .unwrap();
        app.world().get::<GeneratorState>(entity).unwrap().clone()
    }

    fn gold(app: &App) -> f64 {
        app.world().resource::<Wallet>().balance("gold")
    }

    #[test]
    fn build_spends_before_owning() {
        let mut app = sim_app(orchard_definition(), 10.0);
        app.world_mut().trigger(BuildGenerator {
            instance_id: "apple_1".into(),
        });
        app.update();

        let state = state_of(&mut app, "apple_1");
        assert!(state.owned);
        assert_eq!(state.level, 1);
        assert_eq!(gold(&app), 0.0);
        assert_eq!(
            app.world().resource::<LevelEvents>().0,
            vec![(1, 1)]
        );
        let fact = app.world().resource::<GameData>();
        assert!(fact.generator("apple_1").unwrap().owned);
    }

    #[test]
    fn unaffordable_build_changes_nothing() {
        let mut app = sim_app(orchard_definition(), 5.0);
        app.world_mut().trigger(BuildGenerator {
            instance_id: "apple_1".into(),
        });
        app.update();

        let state = state_of(&mut app, "apple_1");
        assert!(!state.owned);
        assert_eq!(state.level, 0);
        assert_eq!(gold(&app), 5.0);
    }

    #[test]
    fn locked_instance_refuses_build() {
        let mut definition = orchard_definition();
        definition.instances[0].initial.enabled = false;
        let mut app = sim_app(definition, 100.0);
        app.world_mut()
            .resource_mut::<GameData>()
            .unlocked_instances
            .clear();

        app.world_mut().trigger(BuildGenerator {
            instance_id: "apple_1".into(),
        });
        app.update();
        assert!(!state_of(&mut app, "apple_1").owned);
        assert_eq!(gold(&app), 100.0);
    }

    #[test]
    fn buy_n_stops_at_first_unaffordable_step() {
        // Levels 2 and 3 cost 10 + 20; level 4 at 40 is out of reach.
        let mut app = sim_app(orchard_definition(), 40.0);
        app.world_mut().trigger(BuildGenerator {
            instance_id: "apple_1".into(),
        });
        app.update();
        app.world_mut().trigger(LevelUpGenerator {
            instance_id: "apple_1".into(),
            count: 3,
        });
        app.update();

        let state = state_of(&mut app, "apple_1");
        assert_eq!(state.level, 3);
        assert_eq!(gold(&app), 0.0);
        assert_eq!(
            app.world().resource::<LevelEvents>().0,
            vec![(1, 1), (3, 2)]
        );
    }

    #[test]
    fn cycle_reaches_ready_and_collect_pays_out() {
        let mut app = sim_app(orchard_definition(), 10.0);
        app.world_mut().trigger(BuildGenerator {
            instance_id: "apple_1".into(),
        });
        app.update();

        for _ in 0..10 {
            advance(&mut app, 1.0);
        }
        assert!(state_of(&mut app, "apple_1").ready);

        app.world_mut().trigger(CollectGenerator {
            instance_id: "apple_1".into(),
        });
        app.update();

        let state = state_of(&mut app, "apple_1");
        assert!(!state.ready);
        assert_eq!(state.elapsed, 0.0);
        assert_eq!(gold(&app), 1.0);
        assert_eq!(
            app.world().resource::<Wallet>().lifetime_earned("gold"),
            11.0
        );
    }

    #[test]
    fn collect_while_running_is_a_no_op() {
        let mut app = sim_app(orchard_definition(), 10.0);
        app.world_mut().trigger(BuildGenerator {
            instance_id: "apple_1".into(),
        });
        app.update();
        advance(&mut app, 3.0);

        app.world_mut().trigger(CollectGenerator {
            instance_id: "apple_1".into(),
        });
        app.update();
        assert_eq!(gold(&app), 0.0);
        assert!(state_of(&mut app, "apple_1").elapsed > 0.0);
    }

    #[test]
    fn mid_cycle_speed_change_preserves_fraction_without_drift() {
        let mut app = sim_app(orchard_definition(), 10.0);
        app.world_mut().trigger(BuildGenerator {
            instance_id: "apple_1".into(),
        });
        app.update();
        advance(&mut app, 5.0);
        assert!((state_of(&mut app, "apple_1").progress() - 0.5).abs() < 1e-9);

        // Toggle the x2 speed modifier on and off several times; the
        // completion fraction must survive every retiming.
        for _ in 0..4 {
            app.world_mut().resource_scope(|world, mut agg: Mut<ModifierAggregator>| {
                let index = world.resource::<ContentIndex>();
                agg.register_source("buff:haste", vec!["apple_haste".into()]);
                agg.rebuild(index, "buff:haste");
            });
            advance(&mut app, 0.0);
            let state = state_of(&mut app, "apple_1");
            assert!((state.cycle_seconds - 5.0).abs() < 1e-9);
            assert!((state.progress() - 0.5).abs() < 1e-9);

            app.world_mut().resource_scope(|world, mut agg: Mut<ModifierAggregator>| {
                let index = world.resource::<ContentIndex>();
                agg.remove_source("buff:haste");
                agg.rebuild(index, "buff:haste");
            });
            advance(&mut app, 0.0);
            let state = state_of(&mut app, "apple_1");
            assert!((state.cycle_seconds - 10.0).abs() < 1e-9);
            assert!((state.progress() - 0.5).abs() < 1e-9);
        }
        assert!((state_of(&mut app, "apple_1").elapsed - 5.0).abs() < 1e-9);
    }

    #[test]
    fn effective_duration_is_floored() {
        let mut definition = orchard_definition();
        definition.modifiers[0].value = 1e12;
        let mut app = sim_app(definition, 10.0);
        app.world_mut().resource_scope(|world, mut agg: Mut<ModifierAggregator>| {
            let index = world.resource::<ContentIndex>();
            agg.register_source("buff:haste", vec!["apple_haste".into()]);
            agg.rebuild(index, "buff:haste");
        });
        app.world_mut().trigger(BuildGenerator {
            instance_id: "apple_1".into(),
        });
        app.update();
        let state = state_of(&mut app, "apple_1");
        assert_eq!(state.cycle_seconds, MIN_CYCLE_SECONDS);
    }

    #[test]
    fn automated_generator_collects_in_the_same_tick() {
        let mut app = sim_app(orchard_definition(), 10.0);
        app.world_mut().trigger(BuildGenerator {
            instance_id: "apple_1".into(),
        });
        app.update();
        app.world_mut().trigger(SetAutomation {
            instance_id: "apple_1".into(),
            automated: true,
        });
        app.update();

        advance(&mut app, 10.5);
        let state = state_of(&mut app, "apple_1");
        assert!(!state.ready, "automation must collect without external input");
        assert_eq!(state.elapsed, 0.0);
        assert_eq!(gold(&app), 1.0);
        assert!(state.automation_purchased);
    }

    #[test]
    fn manual_node_refuses_automation() {
        let mut definition = orchard_definition();
        definition.nodes[0].automation = AutomationPolicy::Manual;
        let mut app = sim_app(definition, 10.0);
        app.world_mut().trigger(BuildGenerator {
            instance_id: "apple_1".into(),
        });
        app.update();
        app.world_mut().trigger(SetAutomation {
            instance_id: "apple_1".into(),
            automated: true,
        });
        app.update();

        let state = state_of(&mut app, "apple_1");
        assert!(!state.automated);
        assert!(!state.automation_purchased);
    }

    #[test]
    fn income_multiplier_scales_collected_output() {
        let mut app = sim_app(orchard_definition(), 10.0);
        app.insert_resource(IncomeMultiplier(3.0));
        app.world_mut().trigger(BuildGenerator {
            instance_id: "apple_1".into(),
        });
        app.update();
        advance(&mut app, 10.0);
        app.world_mut().trigger(CollectGenerator {
            instance_id: "apple_1".into(),
        });
        app.update();
        assert_eq!(gold(&app), 3.0);
    }

    #[test]
    fn reload_restarts_cycle_progress_but_keeps_level() {
        let mut app = sim_app(orchard_definition(), 10.0);
        app.world_mut().trigger(BuildGenerator {
            instance_id: "apple_1".into(),
        });
        app.update();
        advance(&mut app, 7.0);

        app.world_mut().trigger(GameLoaded);
        app.update();
        let state = state_of(&mut app, "apple_1");
        assert!(state.owned);
        assert_eq!(state.level, 1);
        assert_eq!(state.elapsed, 0.0);
        assert!(!state.ready);
    }
}
