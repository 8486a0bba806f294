//! The persisted fact aggregate and its mutators.
//!
//! Only irreducible facts are stored; cycle progress, compiled multipliers
//! and derived costs are rebuilt from facts + content on every load. Every
//! mutator is idempotent (unchanged value → no-op, no save trigger) and
//! takes an explicit `request_save` so callers can batch several mutations
//! ahead of one debounced write.

use {
    crate::SaveScheduler,
    bevy::prelude::*,
    catalogs::{BalancePolicy, ContentIndex, ResetScopes, ResourceKind},
    serde::{Deserialize, Serialize},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceFact {
    pub resource_id: String,
    pub amount: f64,
    pub lifetime: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorFact {
    pub instance_id: String,
    pub owned: bool,
    pub enabled: bool,
    pub level: u32,
    pub automation_purchased: bool,
    pub automated: bool,
}

impl GeneratorFact {
    /// Fresh fact for an instance per its content-declared initial state.
    pub fn initial(instance: &catalogs::NodeInstance) -> Self {
        let owned = instance.initial.level >= 1;
        Self {
            instance_id: instance.id.clone(),
            owned,
            enabled: owned || instance.initial.enabled,
            level: instance.initial.level,
            automation_purchased: false,
            automated: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradeFact {
    pub upgrade_id: String,
    pub rank: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveBuffFact {
    pub buff_id: String,
    pub expires_unix: i64,
}

#[derive(Resource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameData {
    pub balances: Vec<BalanceFact>,
    pub generators: Vec<GeneratorFact>,
    pub upgrades: Vec<UpgradeFact>,
    pub fired_milestones: Vec<String>,
    pub unlocked_instances: Vec<String>,
    pub active_buff: Option<ActiveBuffFact>,
    pub last_seen_unix: i64,
}

impl GameData {
    /// Defaults snapshot built from current content (first launch, or the
    /// generator/balance scopes of a prestige reset).
    pub fn defaults(index: &ContentIndex, now_unix: i64) -> Self {
        let mut data = Self {
            balances: index
                .resources
                .keys()
                .map(|id| BalanceFact {
                    resource_id: id.clone(),
                    amount: 0.0,
                    lifetime: 0.0,
                })
                .collect(),
            generators: index
                .instances
                .values()
                .map(GeneratorFact::initial)
                .collect(),
            upgrades: Vec::new(),
            fired_milestones: Vec::new(),
            unlocked_instances: Vec::new(),
            active_buff: None,
            last_seen_unix: now_unix.max(1),
        };
        data.sort_facts();
        data
    }

    pub fn balance(&self, resource_id: &str) -> Option<&BalanceFact> {
        self.balances.iter().find(|b| b.resource_id == resource_id)
    }

    pub fn generator(&self, instance_id: &str) -> Option<&GeneratorFact> {
        self.generators.iter().find(|g| g.instance_id == instance_id)
    }

    pub fn upgrade_rank(&self, upgrade_id: &str) -> u32 {
        self.upgrades
            .iter()
            .find(|u| u.upgrade_id == upgrade_id)
            .map(|u| u.rank)
            .unwrap_or(0)
    }

    pub fn milestone_fired(&self, milestone_id: &str) -> bool {
        self.fired_milestones.iter().any(|id| id == milestone_id)
    }

    pub fn is_unlocked(&self, instance_id: &str) -> bool {
        self.unlocked_instances.iter().any(|id| id == instance_id)
    }

    pub fn set_balance(
        &mut self,
        resource_id: &str,
        amount: f64,
        lifetime: f64,
        saves: &mut SaveScheduler,
        request_save: bool,
    ) -> bool {
        let changed = match self.balances.iter_mut().find(|b| b.resource_id == resource_id) {
            Some(fact) => {
                if fact.amount == amount && fact.lifetime == lifetime {
                    false
                } else {
                    fact.amount = amount;
                    fact.lifetime = lifetime;
                    true
                }
            }
            None => {
                self.balances.push(BalanceFact {
                    resource_id: resource_id.to_string(),
                    amount,
                    lifetime,
                });
                true
            }
        };
        if changed && request_save {
            saves.request_save();
        }
        changed
    }

    pub fn set_generator(
        &mut self,
        fact: GeneratorFact,
        saves: &mut SaveScheduler,
        request_save: bool,
    ) -> bool {
        let changed = match self
            .generators
            .iter_mut()
            .find(|g| g.instance_id == fact.instance_id)
        {
            Some(existing) => {
                if *existing == fact {
                    false
                } else {
                    *existing = fact;
                    true
                }
            }
            None => {
                self.generators.push(fact);
                true
            }
        };
        if changed && request_save {
            saves.request_save();
        }
        changed
    }

    pub fn set_upgrade_rank(
        &mut self,
        upgrade_id: &str,
        rank: u32,
        saves: &mut SaveScheduler,
        request_save: bool,
    ) -> bool {
        let changed = match self.upgrades.iter_mut().find(|u| u.upgrade_id == upgrade_id) {
            Some(fact) => {
                if fact.rank == rank {
                    false
                } else {
                    fact.rank = rank;
                    true
                }
            }
            None if rank > 0 => {
                self.upgrades.push(UpgradeFact {
                    upgrade_id: upgrade_id.to_string(),
                    rank,
                });
                true
            }
            None => false,
        };
        if changed && request_save {
            saves.request_save();
        }
        changed
    }

    pub fn mark_milestone_fired(
        &mut self,
        milestone_id: &str,
        saves: &mut SaveScheduler,
        request_save: bool,
    ) -> bool {
        if self.milestone_fired(milestone_id) {
            return false;
        }
        self.fired_milestones.push(milestone_id.to_string());
        if request_save {
            saves.request_save();
        }
        true
    }

    pub fn mark_unlocked(
        &mut self,
        instance_id: &str,
        saves: &mut SaveScheduler,
        request_save: bool,
    ) -> bool {
        if self.is_unlocked(instance_id) {
            return false;
        }
        self.unlocked_instances.push(instance_id.to_string());
        if request_save {
            saves.request_save();
        }
        true
    }

    pub fn set_active_buff(
        &mut self,
        buff: Option<ActiveBuffFact>,
        saves: &mut SaveScheduler,
        request_save: bool,
    ) -> bool {
        if self.active_buff == buff {
            return false;
        }
        self.active_buff = buff;
        if request_save {
            saves.request_save();
        }
        true
    }

    /// Stable ordering for deterministic snapshot diffs; applied on flush.
    pub fn sort_facts(&mut self) {
        self.balances.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
        self.generators.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        self.upgrades.sort_by(|a, b| a.upgrade_id.cmp(&b.upgrade_id));
        self.fired_milestones.sort();
        self.unlocked_instances.sort();
    }
}

/// Scoped reset invoked by the prestige controller. Fact categories rebuild
/// from defaults or clear per the rule; balances follow their kind's policy.
///
/// Panics on `BalancePolicy::Fraction`: the store cannot honor partial
/// preservation and refuses to guess.
pub fn apply_reset(data: &mut GameData, index: &ContentIndex, scopes: &ResetScopes) {
    for fact in &mut data.balances {
        let kind = index
            .resources
            .get(&fact.resource_id)
            .map(|r| r.kind)
            .unwrap_or(ResourceKind::Soft);
        let policy = match kind {
            ResourceKind::Soft => scopes.soft,
            ResourceKind::Hard => scopes.hard,
            ResourceKind::Meta => scopes.meta,
        };
        match policy {
            BalancePolicy::Zero => {
                fact.amount = 0.0;
                // The gain basis resets with the balance so repeated
                // prestiges never double-count.
                fact.lifetime = 0.0;
            }
            BalancePolicy::Preserve => {}
            BalancePolicy::Fraction(f) => {
                panic!("reset scope requested unsupported partial preservation ({f}) for {kind:?} resources");
            }
        }
    }

    if scopes.generators {
        data.generators = index.instances.values().map(GeneratorFact::initial).collect();
        data.generators.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
    }
    if scopes.upgrades {
        data.upgrades.clear();
    }
    if scopes.milestones {
        data.fired_milestones.clear();
    }
    if scopes.unlocks {
        data.unlocked_instances.clear();
    }
    if scopes.buff {
        data.active_buff = None;
    }
}
