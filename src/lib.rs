//! Composition root: wires every simulation crate into one plugin and runs
//! the load-reconcile-announce startup sequence.

use {
    bevy::prelude::*,
    buffs::{BuffClock, BuffsPlugin},
    catalogs::ContentIndex,
    generators::GeneratorsPlugin,
    milestones::MilestonesPlugin,
    modifiers::ModifiersPlugin,
    prestige::PrestigePlugin,
    save_load::{GameLoaded, SaveLoadPlugin, SaveScheduler, Snapshots, load_game_data, save_now},
    states::GameState,
    system_schedule::SimSet,
    unlocks::UnlocksPlugin,
    upgrades::UpgradesPlugin,
    wallet::{Wallet, WalletPlugin},
};

pub struct CorePlugin;

impl Plugin for CorePlugin {
    fn build(&self, app: &mut App) {
        app.init_state::<GameState>()
            .configure_sets(
                Update,
                (SimSet::Tick, SimSet::Reactions, SimSet::Persist).chain(),
            )
            // Reaction plugins before the generator engine, so their
            // load-time source registrations land before entities spawn.
            .add_plugins((
                WalletPlugin,
                ModifiersPlugin,
                SaveLoadPlugin,
                UpgradesPlugin,
                MilestonesPlugin,
                BuffsPlugin,
                UnlocksPlugin,
                GeneratorsPlugin,
                PrestigePlugin,
            ))
            .add_systems(Startup, begin_session);
    }
}

/// Loads and reconciles the snapshot, seeds the wallet from facts, flushes
/// corrections, then announces `GameLoaded` and enters `Running`.
fn begin_session(
    mut commands: Commands,
    index: Res<ContentIndex>,
    snapshots: Res<Snapshots>,
    clock: Res<BuffClock>,
    mut saves: ResMut<SaveScheduler>,
    mut wallet: ResMut<Wallet>,
    mut next: ResMut<NextState<GameState>>,
) {
    let outcome = load_game_data(&snapshots, &index, clock.now_unix);
    let mut data = outcome.data;

    for fact in &data.balances {
        wallet.balances.insert(fact.resource_id.clone(), fact.amount);
        wallet.lifetime.insert(fact.resource_id.clone(), fact.lifetime);
    }
    if outcome.offline_seconds > 0 {
        info!(offline_seconds = outcome.offline_seconds, "welcome back");
    }
    if outcome.dirty {
        save_now(&mut data, &mut saves, &snapshots);
    }

    commands.insert_resource(data);
    commands.trigger(GameLoaded);
    next.set(GameState::Running);
}
