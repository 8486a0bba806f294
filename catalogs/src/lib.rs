//! Read-only content catalogs: the definition types the simulation consumes
//! and the indexed, validated views over them.
//!
//! Content arrives already schema-validated from the import layer; the index
//! still re-checks every cross-reference this core depends on and fails
//! loudly on anything dangling. Silent fallback on bad content hides economy
//! bugs that are expensive to diagnose later.

mod index;
mod target;

pub use index::*;
pub use target::*;

use {
    growth::{Growth, PriceCurve},
    serde::{Deserialize, Serialize},
};

/// Canonical form of any content/save id: trimmed, ASCII-lowercased.
/// Applied at the boundary only; everything internal stores canonical keys.
pub fn canon_id(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

/// Well-known modifier target bases.
pub mod targets {
    /// Per-cycle output of a node, parameterized by resource id.
    pub const NODE_OUTPUT: &str = "nodeOutput";
    /// Cycle speed of a node (duration = base / speed).
    pub const NODE_SPEED: &str = "nodeSpeed";
    /// All gain of a resource, wherever it comes from.
    pub const RESOURCE_GAIN: &str = "resourceGain";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Soft,
    Hard,
    Meta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDefinition {
    pub id: String,
    pub kind: ResourceKind,
    #[serde(default)]
    pub display_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutomationPolicy {
    Manual,
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputDef {
    pub resource_id: String,
    pub amount: f64,
}

/// A generator *type*: cycle timing, outputs, price curve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub id: String,
    pub base_cycle_seconds: f64,
    pub price_resource: String,
    pub price: PriceCurve,
    pub base_outputs: Vec<OutputDef>,
    #[serde(default = "default_automation")]
    pub automation: AutomationPolicy,
}

fn default_automation() -> AutomationPolicy {
    AutomationPolicy::Manual
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InstanceInit {
    pub level: u32,
    pub enabled: bool,
}

impl Default for InstanceInit {
    fn default() -> Self {
        Self {
            level: 0,
            enabled: false,
        }
    }
}

/// A placed generator referencing a [`NodeDefinition`]. Runtime state lives
/// in the generator engine, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInstance {
    pub id: String,
    pub node_id: String,
    pub zone_id: String,
    #[serde(default)]
    pub initial: InstanceInit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModifierOp {
    Add,
    Multiply,
    Set,
    ClampMin,
    ClampMax,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModifierScope {
    Global,
    Zone(String),
    Node(String),
    Resource(String),
}

/// A single declarative effect. `target` uses the bracket form
/// (`nodeOutput[gold]`) or the legacy dotted form (`nodeOutput.gold`);
/// parsing happens once at index-build time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModifierDefinition {
    pub id: String,
    #[serde(default)]
    pub source_tag: String,
    pub op: ModifierOp,
    pub target: String,
    #[serde(default = "default_scope")]
    pub scope: ModifierScope,
    pub value: f64,
}

fn default_scope() -> ModifierScope {
    ModifierScope::Global
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeDefinition {
    pub id: String,
    pub cost_resource: String,
    /// Cost of rank N+1 is the growth evaluated at N.
    pub cost: Growth,
    #[serde(default = "default_max_rank")]
    pub max_rank: u32,
    pub grants: Vec<String>,
}

fn default_max_rank() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilestoneDefinition {
    pub id: String,
    pub node_id: String,
    pub at_level: u32,
    pub grants: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuffDefinition {
    pub id: String,
    pub duration_seconds: f64,
    pub grants: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Requirement {
    NodeOwned {
        instance_id: String,
    },
    NodeLevelAtLeast {
        instance_id: String,
        min_level: u32,
    },
    UpgradePurchased {
        upgrade_id: String,
    },
}

/// Gates a node instance behind a conjunction of requirements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlockEntry {
    pub id: String,
    pub target_instance: String,
    pub requirements: Vec<Requirement>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BalancePolicy {
    Zero,
    Preserve,
    /// Declared in the schema but not honored by the store; requesting it
    /// panics rather than silently preserving or zeroing.
    Fraction(f64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetScopes {
    #[serde(default = "default_true")]
    pub generators: bool,
    #[serde(default = "default_true")]
    pub upgrades: bool,
    #[serde(default = "default_true")]
    pub milestones: bool,
    #[serde(default = "default_true")]
    pub buff: bool,
    #[serde(default = "default_true")]
    pub unlocks: bool,
    #[serde(default = "default_zero")]
    pub soft: BalancePolicy,
    #[serde(default = "default_preserve")]
    pub hard: BalancePolicy,
    #[serde(default = "default_preserve")]
    pub meta: BalancePolicy,
}

impl Default for ResetScopes {
    fn default() -> Self {
        Self {
            generators: true,
            upgrades: true,
            milestones: true,
            buff: true,
            unlocks: true,
            soft: BalancePolicy::Zero,
            hard: BalancePolicy::Preserve,
            meta: BalancePolicy::Preserve,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_zero() -> BalancePolicy {
    BalancePolicy::Zero
}
fn default_preserve() -> BalancePolicy {
    BalancePolicy::Preserve
}

/// Meta-progression rule: gain = floor(max(0, sqrt(lifetime(basis)) *
/// multiplier + offset)), plus a permanent income multiplier per point of
/// meta balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrestigeRule {
    pub resource_id: String,
    pub basis_resource: String,
    pub multiplier: f64,
    #[serde(default)]
    pub offset: f64,
    #[serde(default)]
    pub income_multiplier_per_point: f64,
    #[serde(default)]
    pub reset: ResetScopes,
}

/// The whole game definition as produced by the (external) content import.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GameDefinition {
    pub zones: Vec<String>,
    pub resources: Vec<ResourceDefinition>,
    pub nodes: Vec<NodeDefinition>,
    pub instances: Vec<NodeInstance>,
    #[serde(default)]
    pub modifiers: Vec<ModifierDefinition>,
    #[serde(default)]
    pub upgrades: Vec<UpgradeDefinition>,
    #[serde(default)]
    pub milestones: Vec<MilestoneDefinition>,
    #[serde(default)]
    pub buffs: Vec<BuffDefinition>,
    #[serde(default)]
    pub unlocks: Vec<UnlockEntry>,
    #[serde(default)]
    pub prestige: Option<PrestigeRule>,
}
