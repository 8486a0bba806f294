//! Load-time reconciliation of a saved snapshot against current content.
//!
//! Facts referencing deleted content are dropped, duplicates collapse
//! first-wins, broken invariants are normalized; any of those marks the
//! merged result dirty so a corrective save reaches disk promptly. A
//! corrupted fact never propagates into the live simulation.

use {
    crate::{ActiveBuffFact, BalanceFact, GameData, GeneratorFact, UpgradeFact},
    bevy::prelude::*,
    catalogs::{ContentIndex, canon_id},
    std::collections::HashSet,
};

pub struct LoadOutcome {
    pub data: GameData,
    /// True when anything was dropped/normalized (or no save existed);
    /// the caller must flush immediately.
    pub dirty: bool,
    /// Derived from the clamped `last_seen_unix`; consuming it (offline
    /// earnings) is outside this core.
    pub offline_seconds: i64,
}

pub fn reconcile(loaded: GameData, index: &ContentIndex, now_unix: i64) -> LoadOutcome {
    let mut dirty = false;
    let mut data = GameData::default();

    let mut seen = HashSet::new();
    for fact in loaded.balances {
        let resource_id = canon_id(&fact.resource_id);
        if !index.resources.contains_key(&resource_id) {
            warn!(resource = %resource_id, "dropping balance for deleted resource");
            dirty = true;
            continue;
        }
        if !seen.insert(resource_id.clone()) {
            warn!(resource = %resource_id, "duplicate balance fact, keeping the first");
            dirty = true;
            continue;
        }
        data.balances.push(BalanceFact {
            resource_id,
            ..fact
        });
    }
    for id in index.resources.keys() {
        if !seen.contains(id) {
            data.balances.push(BalanceFact {
                resource_id: id.clone(),
                amount: 0.0,
                lifetime: 0.0,
            });
            dirty = true;
        }
    }

    let mut seen = HashSet::new();
    for fact in loaded.generators {
        let instance_id = canon_id(&fact.instance_id);
        if !index.instances.contains_key(&instance_id) {
            warn!(instance = %instance_id, "dropping state for deleted generator instance");
            dirty = true;
            continue;
        }
        if !seen.insert(instance_id.clone()) {
            warn!(instance = %instance_id, "duplicate generator fact, keeping the first");
            dirty = true;
            continue;
        }
        let mut fact = GeneratorFact {
            instance_id,
            ..fact
        };
        // Ownership/level invariants: owned ⇒ level ≥ 1, ¬owned ⇒ level = 0.
        if fact.owned && fact.level == 0 {
            warn!(instance = %fact.instance_id, "owned generator at level 0, normalizing to 1");
            fact.level = 1;
            dirty = true;
        }
        if !fact.owned && fact.level > 0 {
            warn!(instance = %fact.instance_id, level = fact.level, "unowned generator with a level, resetting");
            fact.level = 0;
            dirty = true;
        }
        if fact.owned && !fact.enabled {
            fact.enabled = true;
            dirty = true;
        }
        if fact.automation_purchased && !fact.owned {
            warn!(instance = %fact.instance_id, "automation on unowned generator, clearing");
            fact.automation_purchased = false;
            fact.automated = false;
            dirty = true;
        }
        if fact.automated && !fact.automation_purchased {
            fact.automated = false;
            dirty = true;
        }
        data.generators.push(fact);
    }
    for instance in index.instances.values() {
        if !seen.contains(&instance.id) {
            data.generators.push(GeneratorFact::initial(instance));
            dirty = true;
        }
    }

    let mut seen = HashSet::new();
    for fact in loaded.upgrades {
        let upgrade_id = canon_id(&fact.upgrade_id);
        let Some(def) = index.upgrades.get(&upgrade_id) else {
            warn!(upgrade = %upgrade_id, "dropping rank for deleted upgrade");
            dirty = true;
            continue;
        };
        if !seen.insert(upgrade_id.clone()) {
            warn!(upgrade = %upgrade_id, "duplicate upgrade fact, keeping the first");
            dirty = true;
            continue;
        }
        let mut fact = UpgradeFact {
            upgrade_id,
            ..fact
        };
        if fact.rank == 0 {
            // Rank 0 means absent.
            dirty = true;
            continue;
        }
        if fact.rank > def.max_rank {
            warn!(upgrade = %fact.upgrade_id, rank = fact.rank, max = def.max_rank, "clamping over-max upgrade rank");
            fact.rank = def.max_rank;
            dirty = true;
        }
        data.upgrades.push(fact);
    }

    let mut seen = HashSet::new();
    for id in loaded.fired_milestones {
        let id = canon_id(&id);
        if !index.milestones.contains_key(&id) {
            warn!(milestone = %id, "dropping fired marker for deleted milestone");
            dirty = true;
            continue;
        }
        if seen.insert(id.clone()) {
            data.fired_milestones.push(id);
        } else {
            dirty = true;
        }
    }

    let mut seen = HashSet::new();
    for id in loaded.unlocked_instances {
        let id = canon_id(&id);
        if !index.instances.contains_key(&id) {
            warn!(instance = %id, "dropping unlock for deleted instance");
            dirty = true;
            continue;
        }
        if seen.insert(id.clone()) {
            data.unlocked_instances.push(id);
        } else {
            dirty = true;
        }
    }

    data.active_buff = match loaded.active_buff {
        Some(fact) => {
            let buff_id = canon_id(&fact.buff_id);
            if index.buffs.contains_key(&buff_id) {
                Some(ActiveBuffFact { buff_id, ..fact })
            } else {
                warn!(buff = %buff_id, "dropping active buff for deleted definition");
                dirty = true;
                None
            }
        }
        None => None,
    };

    data.last_seen_unix = loaded.last_seen_unix;
    if data.last_seen_unix < 1 || data.last_seen_unix > now_unix {
        warn!(last_seen = data.last_seen_unix, "out-of-range last-seen timestamp, replacing with now");
        data.last_seen_unix = now_unix.max(1);
        dirty = true;
    }
    let offline_seconds = (now_unix - data.last_seen_unix).max(0);

    data.sort_facts();
    LoadOutcome {
        data,
        dirty,
        offline_seconds,
    }
}
