use {
    bevy::prelude::*,
    std::{
        fs, io,
        path::{Path, PathBuf},
        sync::{
            Mutex,
            atomic::{AtomicBool, AtomicU64, Ordering},
        },
    },
};

/// The storage boundary: an opaque load/save of the snapshot blob.
/// Wire format and disk mechanics (atomic replace etc.) live behind this.
pub trait SnapshotStore: Send + Sync + 'static {
    fn load(&self) -> io::Result<Option<String>>;
    fn save(&self, blob: &str) -> io::Result<()>;
}

#[derive(Resource)]
pub struct Snapshots(pub std::sync::Arc<dyn SnapshotStore>);

impl Default for Snapshots {
    fn default() -> Self {
        Self(std::sync::Arc::new(MemorySnapshotStore::default()))
    }
}

/// RON blob on disk.
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self) -> io::Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn save(&self, blob: &str) -> io::Result<()> {
        if let Some(parent) = Path::new(&self.path).parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, blob)
    }
}

/// In-memory store for tests; counts writes and can fail on demand.
#[derive(Default)]
pub struct MemorySnapshotStore {
    blob: Mutex<Option<String>>,
    pub writes: AtomicU64,
    pub fail_writes: AtomicBool,
}

impl MemorySnapshotStore {
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn blob(&self) -> Option<String> {
        self.blob.lock().unwrap().clone()
    }

    pub fn preload(&self, blob: &str) {
        *self.blob.lock().unwrap() = Some(blob.to_string());
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self) -> io::Result<Option<String>> {
        Ok(self.blob.lock().unwrap().clone())
    }

    fn save(&self, blob: &str) -> io::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::other("simulated write failure"));
        }
        *self.blob.lock().unwrap() = Some(blob.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
