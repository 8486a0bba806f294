use {
    bevy::{log::LogPlugin, prelude::*},
    catalogs::{ContentIndex, GameDefinition},
    emberworks::CorePlugin,
    save_load::{FileSnapshotStore, Snapshots},
    serde::Deserialize,
    std::{fs, path::PathBuf, sync::Arc},
};

/// Optional host-side settings, read from `emberworks.ron` next to the
/// binary. Missing file means defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AppSettings {
    save_path: Option<PathBuf>,
    log_filter: Option<String>,
}

impl AppSettings {
    fn load() -> Self {
        match fs::read_to_string("emberworks.ron") {
            Ok(raw) => match ron::from_str(&raw) {
                Ok(settings) => settings,
                Err(e) => {
                    eprintln!("emberworks.ron is unreadable ({e}), using defaults");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }
}

/// Malformed content is unplayable; refuse to start on any of it.
fn load_content(path: &str) -> ContentIndex {
    let raw = fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("cannot read game definition `{path}`: {e}"));
    let definition: GameDefinition =
        ron::from_str(&raw).unwrap_or_else(|e| panic!("game definition `{path}` is invalid: {e}"));
    definition
        .index()
        .unwrap_or_else(|e| panic!("game definition `{path}` failed validation: {e}"))
}

fn main() {
    let settings = AppSettings::load();
    let index = load_content("assets/definition.ron");
    let save_path = settings
        .save_path
        .unwrap_or_else(|| PathBuf::from("saves/profile.ron"));
    let filter = settings.log_filter.unwrap_or_else(|| {
        "error,\
            generators=debug,\
            milestones=info,\
            unlocks=info,\
            wallet=debug,\
            save_load=trace,\
            prestige=info"
            .into()
    });

    App::new()
        .add_plugins(DefaultPlugins.set(LogPlugin {
            filter,
            level: bevy::log::Level::TRACE,
            ..Default::default()
        }))
        .insert_resource(index)
        .insert_resource(Snapshots(Arc::new(FileSnapshotStore::new(save_path))))
        .add_plugins(CorePlugin)
        .add_systems(Startup, setup_camera)
        .run();
}

fn setup_camera(mut commands: Commands) {
    commands.spawn(Camera2d);
}
