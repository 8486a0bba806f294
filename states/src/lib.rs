use bevy::prelude::*;

#[derive(States, Default, Debug, Clone, PartialEq, Eq, Hash)]
pub enum GameState {
    /// Content is being indexed and the saved snapshot reconciled.
    #[default]
    Loading,
    /// Simulation is ticking.
    Running,
}
