//! Persistent store: owns the canonical fact snapshot and its write-back.
//!
//! Saves are debounced — bursts of `request_save` coalesce into one write a
//! quarter second after the last request — and a final flush runs on app
//! exit. Load reconciles the stored snapshot against current content before
//! anything else sees it. Disk failures are logged at the storage boundary
//! and retried on the next debounced cycle; the simulation never crashes on
//! a failed write.

mod facts;
mod reconcile;
mod store;

pub use facts::*;
pub use reconcile::*;
pub use store::*;

use {
    bevy::prelude::*,
    catalogs::ContentIndex,
    states::GameState,
    system_schedule::SimSet,
    wallet::Wallet,
};

/// Seconds a save request sits before the write happens; further requests
/// inside the window push it out.
pub const SAVE_DEBOUNCE_SECONDS: f32 = 0.25;

/// Fired once the reconciled snapshot is in place; runtime state (generator
/// entities, unlock board, modifier sources) derives itself from facts in
/// response.
#[derive(Event)]
pub struct GameLoaded;

/// Fired after a prestige's scoped reset; observers rebuild their runtime
/// state from the post-reset facts.
#[derive(Event)]
pub struct PrestigeApplied;

#[derive(Resource)]
pub struct SaveScheduler {
    timer: Timer,
    pending: bool,
    /// Completed writes; tests assert coalescing on this.
    pub writes: u64,
}

impl Default for SaveScheduler {
    fn default() -> Self {
        Self {
            timer: Timer::from_seconds(SAVE_DEBOUNCE_SECONDS, TimerMode::Once),
            pending: false,
            writes: 0,
        }
    }
}

impl SaveScheduler {
    /// Schedules a debounced write; repeated calls restart the window.
    pub fn request_save(&mut self) {
        self.pending = true;
        self.timer.reset();
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }
}

pub struct SaveLoadPlugin;

impl Plugin for SaveLoadPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<SaveScheduler>()
            .init_resource::<Snapshots>()
            .init_resource::<GameData>()
            .add_systems(
                Update,
                (
                    mirror_wallet.in_set(SimSet::Reactions),
                    flush_debounced_saves.in_set(SimSet::Persist),
                )
                    .run_if(in_state(GameState::Running)),
            )
            .add_systems(Last, final_flush);
    }
}

/// Loads and reconciles the snapshot; absent or unparseable blobs fall back
/// to a defaults snapshot built from content. A dirty outcome must be
/// flushed immediately by the caller.
pub fn load_game_data(snapshots: &Snapshots, index: &ContentIndex, now_unix: i64) -> LoadOutcome {
    let blob = match snapshots.0.load() {
        Ok(blob) => blob,
        Err(e) => {
            error!("failed to read snapshot: {e}");
            None
        }
    };
    match blob {
        None => {
            info!("no prior save, starting from content defaults");
            LoadOutcome {
                data: GameData::defaults(index, now_unix),
                dirty: true,
                offline_seconds: 0,
            }
        }
        Some(blob) => match ron::from_str::<GameData>(&blob) {
            Ok(loaded) => {
                let outcome = reconcile(loaded, index, now_unix);
                info!(
                    dirty = outcome.dirty,
                    offline_seconds = outcome.offline_seconds,
                    "snapshot reconciled"
                );
                outcome
            }
            Err(e) => {
                warn!("snapshot is unreadable ({e}), starting from content defaults");
                LoadOutcome {
                    data: GameData::defaults(index, now_unix),
                    dirty: true,
                    offline_seconds: 0,
                }
            }
        },
    }
}

/// Immediate flush: sorts fact lists into stable order and writes.
pub fn save_now(data: &mut GameData, scheduler: &mut SaveScheduler, snapshots: &Snapshots) {
    data.last_seen_unix = chrono::Utc::now().timestamp().max(1);
    data.sort_facts();
    let blob = match ron::to_string(&*data) {
        Ok(blob) => blob,
        Err(e) => {
            error!("failed to serialize snapshot: {e}");
            return;
        }
    };
    match snapshots.0.save(&blob) {
        Ok(()) => {
            scheduler.pending = false;
            scheduler.writes += 1;
            debug!(writes = scheduler.writes, "snapshot written");
        }
        Err(e) => {
            error!("failed to write snapshot, will retry: {e}");
            scheduler.request_save();
        }
    }
}

/// Runs the debounced write once the window elapses with no new requests.
pub fn flush_debounced_saves(
    time: Res<Time>,
    mut scheduler: ResMut<SaveScheduler>,
    mut data: ResMut<GameData>,
    snapshots: Res<Snapshots>,
) {
    if !scheduler.pending {
        return;
    }
    if scheduler.timer.tick(time.delta()).just_finished() {
        save_now(&mut data, &mut scheduler, &snapshots);
    }
}

/// Mirrors wallet balances into facts once per frame when they changed.
fn mirror_wallet(
    wallet: Res<Wallet>,
    mut data: ResMut<GameData>,
    mut scheduler: ResMut<SaveScheduler>,
) {
    if !wallet.is_changed() {
        return;
    }
    for (resource_id, amount) in wallet.balances.iter() {
        let lifetime = wallet.lifetime_earned(resource_id);
        data.set_balance(resource_id, *amount, lifetime, &mut scheduler, true);
    }
}

/// Durability on shutdown: flush anything pending when the app exits.
fn final_flush(
    mut exits: MessageReader<AppExit>,
    mut scheduler: ResMut<SaveScheduler>,
    mut data: ResMut<GameData>,
    snapshots: Res<Snapshots>,
) {
    if exits.read().next().is_some() && scheduler.pending {
        info!("flushing pending save on exit");
        save_now(&mut data, &mut scheduler, &snapshots);
    }
}
