//! Upgrade shop: ranked one-off purchases whose effects live as modifier
//! sources, one source per rank so rank N stacks on top of 1..N-1.

use {
    bevy::prelude::*,
    catalogs::ContentIndex,
    growth::GrowthStrategy,
    modifiers::ModifierAggregator,
    save_load::{GameData, GameLoaded, PrestigeApplied, SaveScheduler},
    wallet::Wallet,
};

#[derive(Event)]
pub struct PurchaseUpgrade {
    pub upgrade_id: String,
}

/// Fired after a successful purchase with the new rank.
#[derive(Event)]
pub struct UpgradePurchased {
    pub upgrade_id: String,
    pub rank: u32,
}

fn source_key(upgrade_id: &str, rank: u32) -> String {
    format!("upgrade:{upgrade_id}:{rank}")
}

/// Cost of buying the next rank when `current_rank` ranks are held.
pub fn next_rank_cost(def: &catalogs::UpgradeDefinition, current_rank: u32) -> f64 {
    def.cost.calculate(current_rank)
}

pub fn purchase_upgrade(
    trigger: On<PurchaseUpgrade>,
    mut commands: Commands,
    index: Res<ContentIndex>,
    mut agg: ResMut<ModifierAggregator>,
    mut wallet: ResMut<Wallet>,
    mut data: ResMut<GameData>,
    mut saves: ResMut<SaveScheduler>,
) {
    let event = trigger.event();
    let Some(def) = index.upgrades.get(&event.upgrade_id) else {
        warn!(upgrade = %event.upgrade_id, "purchase request for unknown upgrade");
        return;
    };
    let rank = data.upgrade_rank(&def.id);
    if rank >= def.max_rank {
        debug!(upgrade = %def.id, rank, "upgrade already at max rank");
        return;
    }
    let cost = next_rank_cost(def, rank);
    if !wallet.try_spend(&def.cost_resource, cost) {
        debug!(upgrade = %def.id, cost, "cannot afford upgrade");
        return;
    }
    let rank = rank + 1;
    data.set_upgrade_rank(&def.id, rank, &mut saves, true);
    agg.register_source(&source_key(&def.id, rank), def.grants.clone());
    agg.rebuild(&index, &format!("upgrade:{}", def.id));
    info!(upgrade = %def.id, rank, cost, "upgrade purchased");
    commands.trigger(UpgradePurchased {
        upgrade_id: def.id.clone(),
        rank,
    });
}

/// Restores one source per held rank after a load or prestige.
fn register_held_ranks(
    index: &ContentIndex,
    agg: &mut ModifierAggregator,
    data: &GameData,
    reason: &str,
) {
    let mut registered = false;
    for fact in &data.upgrades {
        let Some(def) = index.upgrades.get(&fact.upgrade_id) else {
            continue;
        };
        for rank in 1..=fact.rank {
            agg.register_source(&source_key(&def.id, rank), def.grants.clone());
            registered = true;
        }
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
    register_held_ranks(&index, &mut agg, &data, "upgrades:load");
}

pub fn on_prestige_applied(
    _trigger: On<PrestigeApplied>,
    index: Res<ContentIndex>,
    mut agg: ResMut<ModifierAggregator>,
    data: Res<GameData>,
) {
    register_held_ranks(&index, &mut agg, &data, "upgrades:prestige");
}

pub struct UpgradesPlugin;

impl Plugin for UpgradesPlugin {
    fn build(&self, app: &mut App) {
        app.add_observer(purchase_upgrade)
            .add_observer(on_game_loaded)
            .add_observer(on_prestige_applied);
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        catalogs::{
            GameDefinition, ModifierDefinition, ModifierOp, ModifierScope, ResourceDefinition,
            ResourceKind, TargetPath, UpgradeDefinition, targets,
        },
        growth::{ExponentialGrowth, Growth},
    };

    fn definition() -> GameDefinition {
        GameDefinition {
            zones: vec!["orchard".into()],
            resources: vec![ResourceDefinition {
                id: "gold".into(),
                kind: ResourceKind::Soft,
                display_name: String::new(),
            }],
            modifiers: vec![ModifierDefinition {
                id: "gold_gain_up".into(),
                source_tag: "upgrade".into(),
                op: ModifierOp::Multiply,
                target: format!("{}[gold]", targets::RESOURCE_GAIN),
                scope: ModifierScope::Global,
                value: 1.5,
            }],
            upgrades: vec![UpgradeDefinition {
                id: "golden_touch".into(),
                cost_resource: "gold".into(),
                cost: Growth::Exponential(ExponentialGrowth {
                    base: 100.0,
                    factor: 10.0,
                }),
                max_rank: 2,
                grants: vec!["gold_gain_up".into()],
            }],
            ..Default::default()
        }
    }

    fn app_with(gold: f64) -> App {
        let index = definition().index().unwrap();
        let data = GameData::defaults(&index, 100);
        let mut app = App::new();
        app.init_resource::<SaveScheduler>()
            .insert_resource(ModifierAggregator::default())
            .insert_resource(data)
            .insert_resource(index)
            .insert_resource(Wallet::default());
        app.world_mut().resource_mut::<Wallet>().earn("gold", gold);
        app.add_observer(purchase_upgrade);
        app.add_observer(on_game_loaded);
        app.add_observer(on_prestige_applied);
        app.update();
        app
    }

    fn buy(app: &mut App) {
        app.world_mut().trigger(PurchaseUpgrade {
            upgrade_id: "golden_touch".into(),
        });
        app.update();
    }

    #[test]
    fn purchase_spends_registers_and_rebuilds() {
        let mut app = app_with(100.0);
        buy(&mut app);

        assert_eq!(app.world().resource::<Wallet>().balance("gold"), 0.0);
        assert_eq!(app.world().resource::<GameData>().upgrade_rank("golden_touch"), 1);
        let agg = app.world().resource::<ModifierAggregator>();
        assert!(agg.has_source("upgrade:golden_touch:1"));
        assert_eq!(agg.rebuild_count, 1);
        assert_eq!(
            agg.multiplier(
                &TargetPath::with_param(targets::RESOURCE_GAIN, "gold"),
                &ModifierScope::Global,
            ),
            1.5
        );
    }

    #[test]
    fn ranks_stack_multiplicatively() {
        let mut app = app_with(1100.0);
        buy(&mut app);
        buy(&mut app);

        assert_eq!(app.world().resource::<GameData>().upgrade_rank("golden_touch"), 2);
        let agg = app.world().resource::<ModifierAggregator>();
        assert!(agg.has_source("upgrade:golden_touch:1"));
        assert!(agg.has_source("upgrade:golden_touch:2"));
        assert_eq!(
            agg.multiplier(
                &TargetPath::with_param(targets::RESOURCE_GAIN, "gold"),
                &ModifierScope::Global,
            ),
            2.25
        );
    }

    #[test]
    fn max_rank_blocks_further_purchases() {
        let mut app = app_with(100_000.0);
        buy(&mut app);
        buy(&mut app);
        buy(&mut app);

        assert_eq!(app.world().resource::<GameData>().upgrade_rank("golden_touch"), 2);
        // Third attempt spent nothing: 100 + 1000 only.
        assert_eq!(app.world().resource::<Wallet>().balance("gold"), 98_900.0);
        assert_eq!(app.world().resource::<ModifierAggregator>().rebuild_count, 2);
    }

    #[test]
    fn unaffordable_purchase_is_reported_not_executed() {
        let mut app = app_with(99.0);
        buy(&mut app);
        assert_eq!(app.world().resource::<GameData>().upgrade_rank("golden_touch"), 0);
        assert_eq!(app.world().resource::<Wallet>().balance("gold"), 99.0);
        assert_eq!(app.world().resource::<ModifierAggregator>().rebuild_count, 0);
    }

    #[test]
    fn load_restores_one_source_per_held_rank() {
        let mut app = app_with(1100.0);
        buy(&mut app);
        buy(&mut app);

        app.insert_resource(ModifierAggregator::default());
        app.world_mut().trigger(GameLoaded);
        app.update();

        let agg = app.world().resource::<ModifierAggregator>();
        assert!(agg.has_source("upgrade:golden_touch:1"));
        assert!(agg.has_source("upgrade:golden_touch:2"));
        assert_eq!(agg.rebuild_count, 1);
    }
}
