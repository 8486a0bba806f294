use bevy::prelude::*;

/// Ordering of the simulation pipeline within `Update`.
///
/// Tick-driven systems (cycle timing, buff countdown) run first, reactive
/// refreshes (prestige outlook, wallet mirroring) next, and the debounced
/// persistence write last so it sees every fact written this frame.
#[derive(SystemSet, Debug, Hash, PartialEq, Eq, Clone)]
pub enum SimSet {
    Tick,
    Reactions,
    Persist,
}
