use {
    crate::{
        BuffDefinition, GameDefinition, MilestoneDefinition, ModifierDefinition, ModifierScope,
        NodeDefinition, NodeInstance, PrestigeRule, Requirement, ResourceDefinition, TargetPath,
        UnlockEntry, UpgradeDefinition, canon_id,
    },
    bevy::prelude::*,
    std::collections::HashMap,
    thiserror::Error,
};

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("duplicate {kind} id `{id}`")]
    DuplicateId { kind: &'static str, id: String },
    #[error("{referrer} references unknown {kind} `{id}`")]
    UnknownReference {
        referrer: String,
        kind: &'static str,
        id: String,
    },
    #[error("modifier `{modifier}` has malformed target `{raw}`: {why}")]
    BadTargetPath {
        modifier: String,
        raw: String,
        why: String,
    },
    #[error("node `{node}`: {why}")]
    InvalidNode { node: String, why: String },
    #[error("node `{node}` has an invalid price curve: {source}")]
    InvalidPriceCurve {
        node: String,
        #[source]
        source: growth::CurveError,
    },
    #[error("buff `{buff}` has non-positive duration {duration}")]
    InvalidBuffDuration { buff: String, duration: f64 },
    #[error("milestone `{milestone}` triggers at level 0 (levels start at 1)")]
    InvalidMilestoneLevel { milestone: String },
    #[error("prestige rule: {why}")]
    InvalidPrestige { why: String },
}

/// Indexed, canonical-keyed, cross-validated view over a [`GameDefinition`].
///
/// Building the index is the fail-loud half of the error split: anything
/// structurally dangling or malformed errors here, before the simulation
/// ever ticks. Grant lists (milestone/upgrade/buff → modifier) are the
/// exception and are re-checked defensively at fire time.
#[derive(Resource, Debug, Clone)]
pub struct ContentIndex {
    pub zones: Vec<String>,
    pub resources: HashMap<String, ResourceDefinition>,
    pub nodes: HashMap<String, NodeDefinition>,
    pub instances: HashMap<String, NodeInstance>,
    pub modifiers: HashMap<String, ModifierDefinition>,
    /// Modifier id → parsed target; populated for every modifier.
    pub targets: HashMap<String, TargetPath>,
    pub upgrades: HashMap<String, UpgradeDefinition>,
    pub buffs: HashMap<String, BuffDefinition>,
    pub milestones: HashMap<String, MilestoneDefinition>,
    /// Node id → milestone ids, sorted by id.
    pub milestones_by_node: HashMap<String, Vec<String>>,
    pub unlocks: Vec<UnlockEntry>,
    pub prestige: Option<PrestigeRule>,
}

impl GameDefinition {
    pub fn index(&self) -> Result<ContentIndex, ContentError> {
        let zones: Vec<String> = self.zones.iter().map(|z| canon_id(z)).collect();

        let mut resources = HashMap::new();
        for def in &self.resources {
            let mut def = def.clone();
            def.id = canon_id(&def.id);
            if resources.insert(def.id.clone(), def.clone()).is_some() {
                return Err(ContentError::DuplicateId {
                    kind: "resource",
                    id: def.id,
                });
            }
        }

        let require_resource =
            |referrer: &str, id: &str, resources: &HashMap<String, ResourceDefinition>| {
                let id = canon_id(id);
                if resources.contains_key(&id) {
                    Ok(id)
                } else {
                    Err(ContentError::UnknownReference {
                        referrer: referrer.to_string(),
                        kind: "resource",
                        id,
                    })
                }
            };

        let mut nodes = HashMap::new();
        for def in &self.nodes {
            let mut def = def.clone();
            def.id = canon_id(&def.id);
            if !(def.base_cycle_seconds > 0.0) {
                return Err(ContentError::InvalidNode {
                    node: def.id,
                    why: format!("non-positive base cycle {}", def.base_cycle_seconds),
                });
            }
            def.price.validate().map_err(|source| ContentError::InvalidPriceCurve {
                node: def.id.clone(),
                source,
            })?;
            def.price_resource =
                require_resource(&format!("node `{}`", def.id), &def.price_resource, &resources)?;
            for output in &mut def.base_outputs {
                output.resource_id = require_resource(
                    &format!("node `{}` output", def.id),
                    &output.resource_id,
                    &resources,
                )?;
            }
            if nodes.insert(def.id.clone(), def.clone()).is_some() {
                return Err(ContentError::DuplicateId {
                    kind: "node",
                    id: def.id,
                });
            }
        }

        let mut instances = HashMap::new();
        for inst in &self.instances {
            let mut inst = inst.clone();
            inst.id = canon_id(&inst.id);
            inst.node_id = canon_id(&inst.node_id);
            inst.zone_id = canon_id(&inst.zone_id);
            if !nodes.contains_key(&inst.node_id) {
                return Err(ContentError::UnknownReference {
                    referrer: format!("instance `{}`", inst.id),
                    kind: "node",
                    id: inst.node_id,
                });
            }
            if !zones.contains(&inst.zone_id) {
                return Err(ContentError::UnknownReference {
                    referrer: format!("instance `{}`", inst.id),
                    kind: "zone",
                    id: inst.zone_id,
                });
            }
            if instances.insert(inst.id.clone(), inst.clone()).is_some() {
                return Err(ContentError::DuplicateId {
                    kind: "instance",
                    id: inst.id,
                });
            }
        }

        let mut modifiers = HashMap::new();
        let mut targets = HashMap::new();
        for def in &self.modifiers {
            let mut def = def.clone();
            def.id = canon_id(&def.id);
            let target =
                TargetPath::parse(&def.target).map_err(|why| ContentError::BadTargetPath {
                    modifier: def.id.clone(),
                    raw: def.target.clone(),
                    why,
                })?;
            def.scope = match def.scope {
                ModifierScope::Global => ModifierScope::Global,
                ModifierScope::Zone(z) => {
                    let z = canon_id(&z);
                    if !zones.contains(&z) {
                        return Err(ContentError::UnknownReference {
                            referrer: format!("modifier `{}`", def.id),
                            kind: "zone",
                            id: z,
                        });
                    }
                    ModifierScope::Zone(z)
                }
                ModifierScope::Node(n) => {
                    let n = canon_id(&n);
                    if !nodes.contains_key(&n) {
                        return Err(ContentError::UnknownReference {
                            referrer: format!("modifier `{}`", def.id),
                            kind: "node",
                            id: n,
                        });
                    }
                    ModifierScope::Node(n)
                }
                ModifierScope::Resource(r) => ModifierScope::Resource(require_resource(
                    &format!("modifier `{}`", def.id),
                    &r,
                    &resources,
                )?),
            };
            if modifiers.insert(def.id.clone(), def.clone()).is_some() {
                return Err(ContentError::DuplicateId {
                    kind: "modifier",
                    id: def.id,
                });
            }
            targets.insert(def.id.clone(), target);
        }

        let mut upgrades = HashMap::new();
        for def in &self.upgrades {
            let mut def = def.clone();
            def.id = canon_id(&def.id);
            def.cost_resource = require_resource(
                &format!("upgrade `{}`", def.id),
                &def.cost_resource,
                &resources,
            )?;
            def.grants = def.grants.iter().map(|g| canon_id(g)).collect();
            if upgrades.insert(def.id.clone(), def.clone()).is_some() {
                return Err(ContentError::DuplicateId {
                    kind: "upgrade",
                    id: def.id,
                });
            }
        }

        let mut buffs = HashMap::new();
        for def in &self.buffs {
            let mut def = def.clone();
            def.id = canon_id(&def.id);
            if !(def.duration_seconds > 0.0) {
                return Err(ContentError::InvalidBuffDuration {
                    buff: def.id,
                    duration: def.duration_seconds,
                });
            }
            def.grants = def.grants.iter().map(|g| canon_id(g)).collect();
            if buffs.insert(def.id.clone(), def.clone()).is_some() {
                return Err(ContentError::DuplicateId {
                    kind: "buff",
                    id: def.id,
                });
            }
        }

        let mut milestones = HashMap::new();
        let mut milestones_by_node: HashMap<String, Vec<String>> = HashMap::new();
        for def in &self.milestones {
            let mut def = def.clone();
            def.id = canon_id(&def.id);
            def.node_id = canon_id(&def.node_id);
            if def.at_level == 0 {
                return Err(ContentError::InvalidMilestoneLevel { milestone: def.id });
            }
            if !nodes.contains_key(&def.node_id) {
                return Err(ContentError::UnknownReference {
                    referrer: format!("milestone `{}`", def.id),
                    kind: "node",
                    id: def.node_id,
                });
            }
            def.grants = def.grants.iter().map(|g| canon_id(g)).collect();
            milestones_by_node
                .entry(def.node_id.clone())
                .or_default()
                .push(def.id.clone());
            if milestones.insert(def.id.clone(), def.clone()).is_some() {
                return Err(ContentError::DuplicateId {
                    kind: "milestone",
                    id: def.id,
                });
            }
        }
        for ids in milestones_by_node.values_mut() {
            ids.sort();
        }

        let mut unlocks = Vec::new();
        for entry in &self.unlocks {
            let mut entry = entry.clone();
            entry.id = canon_id(&entry.id);
            entry.target_instance = canon_id(&entry.target_instance);
            if !instances.contains_key(&entry.target_instance) {
                return Err(ContentError::UnknownReference {
                    referrer: format!("unlock `{}`", entry.id),
                    kind: "instance",
                    id: entry.target_instance,
                });
            }
            // Requirement targets are deliberately NOT validated here: a
            // dangling requirement is reported once at board build and pins
            // the requirement false (fail-safe closed).
            entry.requirements = entry
                .requirements
                .iter()
                .map(|req| match req {
                    Requirement::NodeOwned { instance_id } => Requirement::NodeOwned {
                        instance_id: canon_id(instance_id),
                    },
                    Requirement::NodeLevelAtLeast {
                        instance_id,
                        min_level,
                    } => Requirement::NodeLevelAtLeast {
                        instance_id: canon_id(instance_id),
                        min_level: *min_level,
                    },
                    Requirement::UpgradePurchased { upgrade_id } => {
                        Requirement::UpgradePurchased {
                            upgrade_id: canon_id(upgrade_id),
                        }
                    }
                })
                .collect();
            unlocks.push(entry);
        }

        let prestige = match &self.prestige {
            None => None,
            Some(rule) => {
                let mut rule = rule.clone();
                rule.resource_id =
                    require_resource("prestige rule", &rule.resource_id, &resources)?;
                rule.basis_resource =
                    require_resource("prestige rule basis", &rule.basis_resource, &resources)?;
                if !rule.multiplier.is_finite() || !rule.offset.is_finite() {
                    return Err(ContentError::InvalidPrestige {
                        why: "multiplier/offset must be finite".into(),
                    });
                }
                Some(rule)
            }
        };

        Ok(ContentIndex {
            zones,
            resources,
            nodes,
            instances,
            modifiers,
            targets,
            upgrades,
            buffs,
            milestones,
            milestones_by_node,
            unlocks,
            prestige,
        })
    }
}

impl ContentIndex {
    pub fn node(&self, id: &str) -> Option<&NodeDefinition> {
        self.nodes.get(id)
    }

    pub fn instance(&self, id: &str) -> Option<&NodeInstance> {
        self.instances.get(id)
    }

    /// Milestones for a node, in id order.
    pub fn milestones_for(&self, node_id: &str) -> impl Iterator<Item = &MilestoneDefinition> {
        self.milestones_by_node
            .get(node_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.milestones.get(id))
    }

    pub fn node_of_instance(&self, instance_id: &str) -> Option<&NodeDefinition> {
        self.instances
            .get(instance_id)
            .and_then(|inst| self.nodes.get(&inst.node_id))
    }
}
