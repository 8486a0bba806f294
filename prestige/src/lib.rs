//! Prestige Controller: converts lifetime earnings into meta currency and
//! performs the scoped reset.
//!
//! The reset path is deliberately heavy-handed: facts are reset first, then
//! the wallet is rebuilt from facts, every modifier source is dropped and
//! downstream crates re-derive their runtime state from the post-reset
//! snapshot via `PrestigeApplied`. The snapshot is flushed before the signal
//! goes out so a crash mid-rebuild cannot resurrect the pre-prestige run.

use {
    bevy::prelude::*,
    catalogs::{ContentIndex, PrestigeRule},
    modifiers::ModifierAggregator,
    save_load::{GameData, PrestigeApplied, SaveScheduler, Snapshots, apply_reset, save_now},
    states::GameState,
    system_schedule::SimSet,
    wallet::{IncomeMultiplier, Wallet},
};

#[derive(Event)]
pub struct PerformPrestige;

/// What a prestige would yield right now; refreshed whenever the wallet
/// changes so UI can bind to it directly.
#[derive(Resource, Default)]
pub struct PrestigeOutlook {
    pub preview_gain: f64,
    pub can_prestige: bool,
    pub meta_balance: f64,
}

/// `floor(max(0, sqrt(lifetime basis) × multiplier + offset))`, with any
/// non-finite intermediate collapsing to zero.
pub fn calculate_gain(rule: &PrestigeRule, lifetime_basis: f64) -> f64 {
    let raw = lifetime_basis.max(0.0).sqrt() * rule.multiplier + rule.offset;
    if raw.is_finite() && raw > 0.0 {
        raw.floor()
    } else {
        0.0
    }
}

fn income_for(rule: &PrestigeRule, meta_balance: f64) -> f64 {
    1.0 + meta_balance * rule.income_multiplier_per_point
}

pub fn refresh_outlook(
    index: Res<ContentIndex>,
    wallet: Res<Wallet>,
    mut outlook: ResMut<PrestigeOutlook>,
    mut income: ResMut<IncomeMultiplier>,
) {
    let Some(rule) = &index.prestige else {
        return;
    };
    if !wallet.is_changed() {
        return;
    }
    outlook.preview_gain = calculate_gain(rule, wallet.lifetime_earned(&rule.basis_resource));
    outlook.can_prestige = outlook.preview_gain > 0.0;
    outlook.meta_balance = wallet.balance(&rule.resource_id);
    income.0 = income_for(rule, outlook.meta_balance);
}

pub fn perform_prestige(
    _trigger: On<PerformPrestige>,
    mut commands: Commands,
    index: Res<ContentIndex>,
    mut wallet: ResMut<Wallet>,
    mut income: ResMut<IncomeMultiplier>,
    mut outlook: ResMut<PrestigeOutlook>,
    mut agg: ResMut<ModifierAggregator>,
    mut data: ResMut<GameData>,
    mut saves: ResMut<SaveScheduler>,
    snapshots: Res<Snapshots>,
) {
    let Some(rule) = index.prestige.clone() else {
        debug!("no prestige rule in content, ignoring");
        return;
    };
    let gain = calculate_gain(&rule, wallet.lifetime_earned(&rule.basis_resource));
    if gain <= 0.0 {
        debug!("prestige would gain nothing, ignoring");
        return;
    }

    wallet.earn(&rule.resource_id, gain);
    // Mirror the wallet into facts so the reset policies act on current
    // values, then rebuild the wallet from whatever survived.
    let resource_ids: Vec<String> = wallet.balances.keys().cloned().collect();
    for resource_id in resource_ids {
        let amount = wallet.balance(&resource_id);
        let lifetime = wallet.lifetime_earned(&resource_id);
        data.set_balance(&resource_id, amount, lifetime, &mut saves, false);
    }
    apply_reset(&mut data, &index, &rule.reset);
    *wallet = Wallet::default();
    for fact in &data.balances {
        wallet.balances.insert(fact.resource_id.clone(), fact.amount);
        wallet.lifetime.insert(fact.resource_id.clone(), fact.lifetime);
    }

    agg.clear_sources();
    agg.rebuild(&index, "prestige");

    outlook.meta_balance = wallet.balance(&rule.resource_id);
    outlook.preview_gain = calculate_gain(&rule, wallet.lifetime_earned(&rule.basis_resource));
    outlook.can_prestige = outlook.preview_gain > 0.0;
    income.0 = income_for(&rule, outlook.meta_balance);

    info!(gain, meta = outlook.meta_balance, "prestige performed");
    save_now(&mut data, &mut saves, &snapshots);
    commands.trigger(PrestigeApplied);
}

pub struct PrestigePlugin;

impl Plugin for PrestigePlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<PrestigeOutlook>()
            .add_systems(
                Update,
                refresh_outlook
                    .in_set(SimSet::Reactions)
                    .run_if(in_state(GameState::Running)),
            )
            .add_observer(perform_prestige);
    }
}
