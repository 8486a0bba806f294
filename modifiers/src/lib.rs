//! The modifier aggregator: resolves every active modifier source into a
//! compiled value table keyed by (target path, scope).
//!
//! The table is a derived cache. It is rebuilt wholesale on every source
//! mutation (upgrade purchase, milestone fire, buff activate/expire,
//! prestige reset) and never persisted; readers always see either the old
//! table or the new one, never a half-built one. Rebuilds are O(active
//! modifiers), which stays in the tens for real content.

use {
    bevy::prelude::*,
    catalogs::{ContentIndex, ModifierOp, ModifierScope, TargetPath},
    std::collections::{HashMap, HashSet},
};

/// All active modifiers for one (target, scope) pair, folded into the fixed
/// precedence: adds summed, multiplies multiplied, `set` last-wins, clamps
/// in registration order.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledEffect {
    pub add_sum: f64,
    pub mul_product: f64,
    pub set_override: Option<f64>,
    pub clamps: Vec<(ModifierOp, f64)>,
}

impl Default for CompiledEffect {
    fn default() -> Self {
        Self {
            add_sum: 0.0,
            mul_product: 1.0,
            set_override: None,
            clamps: Vec::new(),
        }
    }
}

impl CompiledEffect {
    /// `clamp(set.unwrap_or((base + adds) * muls))`.
    pub fn apply(&self, base: f64) -> f64 {
        let mut value = (base + self.add_sum) * self.mul_product;
        if let Some(set) = self.set_override {
            value = set;
        }
        for (op, bound) in &self.clamps {
            value = match op {
                ModifierOp::ClampMin => value.max(*bound),
                ModifierOp::ClampMax => value.min(*bound),
                _ => value,
            };
        }
        value
    }
}

#[derive(Resource, Default, Debug)]
pub struct ModifierAggregator {
    /// Active sources in registration order; order is the tie-break for
    /// `set` conflicts and clamp application.
    sources: Vec<(String, Vec<String>)>,
    table: HashMap<(TargetPath, ModifierScope), CompiledEffect>,
    missing_warned: HashSet<String>,
    /// Rebuilds performed since startup; tests assert on deltas.
    pub rebuild_count: u64,
    pub last_reason: String,
}

impl ModifierAggregator {
    /// Registers (or replaces, keeping its order slot) a modifier source.
    /// The caller must follow up with [`Self::rebuild`] before yielding.
    pub fn register_source(&mut self, source_key: &str, modifier_ids: Vec<String>) {
        match self.sources.iter_mut().find(|(key, _)| key == source_key) {
            Some((_, ids)) => *ids = modifier_ids,
            None => self.sources.push((source_key.to_string(), modifier_ids)),
        }
    }

    pub fn remove_source(&mut self, source_key: &str) -> bool {
        let before = self.sources.len();
        self.sources.retain(|(key, _)| key != source_key);
        self.sources.len() != before
    }

    pub fn has_source(&self, source_key: &str) -> bool {
        self.sources.iter().any(|(key, _)| key == source_key)
    }

    pub fn clear_sources(&mut self) {
        self.sources.clear();
    }

    /// Full recomputation of the compiled table from the registered sources.
    ///
    /// Synchronous by contract: every caller that mutates the source set
    /// invokes this before returning, so the generator engine never reads
    /// stale state.
    pub fn rebuild(&mut self, index: &ContentIndex, reason: &str) {
        let mut table: HashMap<(TargetPath, ModifierScope), CompiledEffect> = HashMap::new();

        // Stable order: registration order, then modifier id within a source.
        for (source_key, ids) in &self.sources {
            let mut ids: Vec<&String> = ids.iter().collect();
            ids.sort();
            for id in ids {
                let (Some(def), Some(target)) = (index.modifiers.get(id), index.targets.get(id))
                else {
                    // Grant lists are validated at fire time; this is the
                    // second line of defense for saves that outlived content.
                    if self.missing_warned.insert(id.clone()) {
                        warn!(source = %source_key, modifier = %id, "skipping unknown modifier id");
                    }
                    continue;
                };
                let effect = table
                    .entry((target.clone(), def.scope.clone()))
                    .or_default();
                match def.op {
                    ModifierOp::Add => effect.add_sum += def.value,
                    ModifierOp::Multiply => effect.mul_product *= def.value,
                    // Later registration wins; the only well-defined
                    // tie-break for conflicting absolute overrides.
                    ModifierOp::Set => effect.set_override = Some(def.value),
                    ModifierOp::ClampMin | ModifierOp::ClampMax => {
                        effect.clamps.push((def.op, def.value));
                    }
                }
            }
        }

        self.table = table;
        self.rebuild_count += 1;
        self.last_reason = reason.to_string();
        debug!(%reason, sources = self.sources.len(), entries = self.table.len(), "rebuilt modifier table");
    }

    /// Compiled effect for an exact (target, scope) pair, if any modifiers
    /// touch it.
    pub fn resolve(&self, target: &TargetPath, scope: &ModifierScope) -> Option<&CompiledEffect> {
        self.table.get(&(target.clone(), scope.clone()))
    }

    /// Effective value for a base; identity is the base itself.
    pub fn value(&self, target: &TargetPath, scope: &ModifierScope, base: f64) -> f64 {
        match self.resolve(target, scope) {
            Some(effect) => effect.apply(base),
            None => base,
        }
    }

    /// Multiplicative identity resolution (empty pair → 1.0).
    pub fn multiplier(&self, target: &TargetPath, scope: &ModifierScope) -> f64 {
        self.value(target, scope, 1.0)
    }

    /// Additive identity resolution (empty pair → 0.0).
    pub fn additive(&self, target: &TargetPath, scope: &ModifierScope) -> f64 {
        self.value(target, scope, 0.0)
    }

    /// Product of the pair multipliers across several scopes; how the
    /// generator engine composes node-scoped and global effects.
    pub fn stacked_multiplier(&self, target: &TargetPath, scopes: &[ModifierScope]) -> f64 {
        scopes
            .iter()
            .map(|scope| self.multiplier(target, scope))
            .product()
    }
}

pub struct ModifiersPlugin;

impl Plugin for ModifiersPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<ModifierAggregator>();
    }
}
