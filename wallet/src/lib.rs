use {bevy::prelude::*, std::collections::HashMap};

/// Resource balances plus lifetime-earnings tracking.
///
/// Only the owning systems (generator engine on collect, upgrade shop and
/// generator purchases on spend, prestige on gain) mutate this; everything
/// else reads. Earn/spend go through the methods so lifetime totals and
/// validation stay consistent.
#[derive(Resource, Reflect, Default, Debug, Clone)]
#[reflect(Resource, Default)]
pub struct Wallet {
    pub balances: HashMap<String, f64>,
    pub lifetime: HashMap<String, f64>,
}

impl Wallet {
    pub fn balance(&self, resource_id: &str) -> f64 {
        self.balances.get(resource_id).copied().unwrap_or(0.0)
    }

    pub fn lifetime_earned(&self, resource_id: &str) -> f64 {
        self.lifetime.get(resource_id).copied().unwrap_or(0.0)
    }

    pub fn can_afford(&self, resource_id: &str, amount: f64) -> bool {
        self.balance(resource_id) >= amount
    }

    /// Adds to the balance and the lifetime total. Non-finite or
    /// non-positive amounts are ignored.
    pub fn earn(&mut self, resource_id: &str, amount: f64) {
        if !amount.is_finite() || amount <= 0.0 {
            return;
        }
        *self.balances.entry(resource_id.to_string()).or_insert(0.0) += amount;
        *self.lifetime.entry(resource_id.to_string()).or_insert(0.0) += amount;
    }

    /// Validated spend: false (and no mutation) when unaffordable.
    /// Insufficient funds is a precondition miss, never an error.
    pub fn try_spend(&mut self, resource_id: &str, amount: f64) -> bool {
        if !amount.is_finite() || amount < 0.0 {
            return false;
        }
        if !self.can_afford(resource_id, amount) {
            return false;
        }
        *self.balances.entry(resource_id.to_string()).or_insert(0.0) -= amount;
        true
    }
}

/// Permanent income multiplier applied to every resource gain; prestige
/// meta-upgrades feed it from the meta balance.
#[derive(Resource, Reflect, Debug, Clone, Copy)]
#[reflect(Resource)]
pub struct IncomeMultiplier(pub f64);

impl Default for IncomeMultiplier {
    fn default() -> Self {
        Self(1.0)
    }
}

pub struct WalletPlugin;

impl Plugin for WalletPlugin {
    fn build(&self, app: &mut App) {
        app.register_type::<Wallet>()
            .register_type::<IncomeMultiplier>()
            .init_resource::<Wallet>()
            .init_resource::<IncomeMultiplier>();
    }
}
