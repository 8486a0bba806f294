//! Buff Controller: one timed modifier source at a time.
//!
//! Activation while another buff runs is ignored (no stacking, no queueing;
//! richer stacking modes are a content-level extension this core does not
//! attempt). Expiry is absolute wall-clock time, so a buff keeps burning
//! while the game is closed; the countdown is checked every tick and the
//! aggregator never serves an expired buff for more than one tick interval.

use {
    bevy::prelude::*,
    catalogs::ContentIndex,
    modifiers::ModifierAggregator,
    save_load::{ActiveBuffFact, GameData, GameLoaded, PrestigeApplied, SaveScheduler},
    states::GameState,
    system_schedule::SimSet,
};

#[derive(Event)]
pub struct ActivateBuff {
    pub buff_id: String,
}

#[derive(Event)]
pub struct BuffActivated {
    pub buff_id: String,
}

#[derive(Event)]
pub struct BuffExpired {
    pub buff_id: String,
}

/// Unix now, refreshed once per frame. Kept as a resource so tests can pin
/// the clock instead of reading the host's.
#[derive(Resource)]
pub struct BuffClock {
    pub now_unix: i64,
}

impl Default for BuffClock {
    fn default() -> Self {
        Self {
            now_unix: chrono::Utc::now().timestamp(),
        }
    }
}

/// Session countdown for the active buff. The persisted fact carries the
/// absolute expiry; this carries the live remainder.
#[derive(Resource, Default)]
pub struct ActiveBuff {
    pub buff_id: Option<String>,
    pub remaining_seconds: f64,
}

fn source_key(buff_id: &str) -> String {
    format!("buff:{buff_id}")
}

pub fn advance_clock(mut clock: ResMut<BuffClock>) {
    clock.now_unix = chrono::Utc::now().timestamp();
}

pub fn activate_buff(
    trigger: On<ActivateBuff>,
    mut commands: Commands,
    index: Res<ContentIndex>,
    clock: Res<BuffClock>,
    mut active: ResMut<ActiveBuff>,
    mut agg: ResMut<ModifierAggregator>,
    mut data: ResMut<GameData>,
    mut saves: ResMut<SaveScheduler>,
) {
    let event = trigger.event();
    if let Some(current) = &active.buff_id {
        debug!(active = %current, requested = %event.buff_id, "a buff is already running, ignoring");
        return;
    }
    let Some(def) = index.buffs.get(&event.buff_id) else {
        warn!(buff = %event.buff_id, "activation request for unknown buff");
        return;
    };
    active.buff_id = Some(def.id.clone());
    active.remaining_seconds = def.duration_seconds;
    data.set_active_buff(
        Some(ActiveBuffFact {
            buff_id: def.id.clone(),
            expires_unix: clock.now_unix + def.duration_seconds.ceil() as i64,
        }),
        &mut saves,
        true,
    );
    agg.register_source(&source_key(&def.id), def.grants.clone());
    agg.rebuild(&index, &format!("buff:{}:activate", def.id));
    info!(buff = %def.id, duration = def.duration_seconds, "buff activated");
    commands.trigger(BuffActivated {
        buff_id: def.id.clone(),
    });
}

/// Counts the active buff down and tears it out the tick it hits zero:
/// source removed, fact cleared, one rebuild.
pub fn tick_buff_expiry(
    time: Res<Time>,
    mut commands: Commands,
    index: Res<ContentIndex>,
    mut active: ResMut<ActiveBuff>,
    mut agg: ResMut<ModifierAggregator>,
    mut data: ResMut<GameData>,
    mut saves: ResMut<SaveScheduler>,
) {
    let Some(buff_id) = active.buff_id.clone() else {
        return;
    };
    active.remaining_seconds -= time.delta_secs_f64();
    if active.remaining_seconds > 0.0 {
        return;
    }
    active.buff_id = None;
    active.remaining_seconds = 0.0;
    data.set_active_buff(None, &mut saves, true);
    agg.remove_source(&source_key(&buff_id));
    agg.rebuild(&index, &format!("buff:{buff_id}:expire"));
    info!(buff = %buff_id, "buff expired");
    commands.trigger(BuffExpired { buff_id });
}

/// Restores the runtime countdown from the persisted fact; a buff that ran
/// out while the game was closed is cleared without ever registering.
fn hydrate_from_facts(
    index: &ContentIndex,
    clock: &BuffClock,
    active: &mut ActiveBuff,
    agg: &mut ModifierAggregator,
    data: &mut GameData,
    saves: &mut SaveScheduler,
) {
    active.buff_id = None;
    active.remaining_seconds = 0.0;
    let Some(fact) = data.active_buff.clone() else {
        return;
    };
    if clock.now_unix >= fact.expires_unix {
        debug!(buff = %fact.buff_id, "active buff expired while away, clearing");
        data.set_active_buff(None, saves, true);
        return;
    }
    let Some(def) = index.buffs.get(&fact.buff_id) else {
        return;
    };
    active.buff_id = Some(def.id.clone());
    active.remaining_seconds = (fact.expires_unix - clock.now_unix) as f64;
    agg.register_source(&source_key(&def.id), def.grants.clone());
    agg.rebuild(index, "buffs:load");
}

pub fn on_game_loaded(
    _trigger: On<GameLoaded>,
    index: Res<ContentIndex>,
    clock: Res<BuffClock>,
    mut active: ResMut<ActiveBuff>,
    mut agg: ResMut<ModifierAggregator>,
    mut data: ResMut<GameData>,
    mut saves: ResMut<SaveScheduler>,
) {
    hydrate_from_facts(&index, &clock, &mut active, &mut agg, &mut data, &mut saves);
}

pub fn on_prestige_applied(
    _trigger: On<PrestigeApplied>,
    index: Res<ContentIndex>,
    clock: Res<BuffClock>,
    mut active: ResMut<ActiveBuff>,
    mut agg: ResMut<ModifierAggregator>,
    mut data: ResMut<GameData>,
    mut saves: ResMut<SaveScheduler>,
) {
    hydrate_from_facts(&index, &clock, &mut active, &mut agg, &mut data, &mut saves);
}

pub struct BuffsPlugin;

impl Plugin for BuffsPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<BuffClock>()
            .init_resource::<ActiveBuff>()
            .add_systems(
                Update,
                (advance_clock, tick_buff_expiry)
                    .chain()
                    .in_set(SimSet::Tick)
                    .run_if(in_state(GameState::Running)),
            )
            .add_observer(activate_buff)
            .add_observer(on_game_loaded)
            .add_observer(on_prestige_applied);
    }
}
