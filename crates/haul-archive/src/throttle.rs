//! Rate-limited checkpoint persistence.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use haul_fs::AtomicWriteOptions;
use tracing::{debug, warn};

use crate::Result;
use crate::checkpoint::{AfterSave, Checkpoint, SaveConsumer};

pub const DEFAULT_SAVE_INTERVAL: Duration = Duration::from_secs(1);

/// Bytes written between two save attempts of a [`ThrottledSaveConsumer`].
pub const DEFAULT_SAVE_THRESHOLD: u64 = 1024 * 1024;

type SaveFn<T> = Box<dyn FnMut(&T) -> Result<()> + Send>;

/// Persists state at most once per interval. Failed saves are logged and swallowed.
pub struct ThrottledWriter<T> {
    save: SaveFn<T>,
    interval: Duration,
    last_save: Option<Instant>,
}

impl<T> ThrottledWriter<T> {
    pub fn new(save: impl FnMut(&T) -> Result<()> + Send + 'static) -> Self {
        Self {
            save: Box::new(save),
            interval: DEFAULT_SAVE_INTERVAL,
            last_save: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Save `state` unless the last successful save was less than an interval ago.
    ///
    /// Returns whether the state was persisted.
    pub fn maybe_save(&mut self, state: &T, force: bool) -> bool {
        if !force && self.last_save.is_some_and(|at| at.elapsed() < self.interval) {
            return false;
        }

        match (self.save)(state) {
            Ok(()) => {
                self.last_save = Some(Instant::now());
                true
            }
            Err(err) => {
                warn!("could not save checkpoint: {err}");
                false
            }
        }
    }
}

/// [`SaveConsumer`] that saves through a [`ThrottledWriter`] every few megabytes and
/// stops the extraction once asked to.
pub struct ThrottledSaveConsumer {
    writer: ThrottledWriter<Checkpoint>,
    threshold: u64,
    pending: u64,
    stop: Arc<AtomicBool>,
}

impl ThrottledSaveConsumer {
    pub fn new(writer: ThrottledWriter<Checkpoint>, stop: Arc<AtomicBool>) -> Self {
        Self {
            writer,
            threshold: DEFAULT_SAVE_THRESHOLD,
            pending: 0,
            stop,
        }
    }

    /// Persist checkpoints to `file`.
    pub fn to_file(file: CheckpointFile, stop: Arc<AtomicBool>) -> Self {
        Self::new(ThrottledWriter::new(move |cp| file.save(cp)), stop)
    }

    pub fn with_threshold(mut self, bytes: u64) -> Self {
        self.threshold = bytes;
        self
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

impl SaveConsumer for ThrottledSaveConsumer {
    fn should_save(&mut self, bytes: u64) -> bool {
        self.pending = self.pending.saturating_add(bytes);
        self.pending >= self.threshold || self.stop_requested()
    }

    fn save(&mut self, checkpoint: &Checkpoint) -> Result<AfterSave> {
        let stop = self.stop_requested();
        if self.writer.maybe_save(checkpoint, stop) {
            self.pending = 0;
        }

        if stop {
            debug!(entry_index = checkpoint.entry_index, "stop requested, saved checkpoint");
            Ok(AfterSave::StopAfterSave)
        } else {
            Ok(AfterSave::Continue)
        }
    }
}

/// A checkpoint stored as JSON on disk.
#[derive(Clone, Debug)]
pub struct CheckpointFile {
    path: PathBuf,
}

impl CheckpointFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let json = serde_json::to_vec(checkpoint)?;
        haul_fs::atomic_write(&self.path, &json, AtomicWriteOptions::new().sync(true))?;
        Ok(())
    }

    /// Load the stored checkpoint, `None` when there is none.
    pub fn load(&self) -> Result<Option<Checkpoint>> {
        match haul_fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.io_kind() == Some(io::ErrorKind::NotFound) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn clear(&self) -> Result<()> {
        haul_fs::remove_all(&self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::Mutex;

    fn counting(saves: Arc<Mutex<Vec<i64>>>) -> ThrottledWriter<Checkpoint> {
        ThrottledWriter::new(move |cp: &Checkpoint| {
            saves.lock().unwrap().push(cp.entry_index);
            Ok(())
        })
    }

    fn checkpoint(entry_index: i64) -> Checkpoint {
        Checkpoint {
            entry_index,
            progress: 0.0,
        }
    }

    #[test]
    fn saves_at_most_once_per_interval() {
        let saves = Arc::new(Mutex::new(Vec::new()));
        let mut writer = counting(saves.clone()).with_interval(Duration::from_secs(3600));

        assert!(writer.maybe_save(&checkpoint(1), false));
        assert!(!writer.maybe_save(&checkpoint(2), false));
        assert!(writer.maybe_save(&checkpoint(3), true));
        assert_eq!(*saves.lock().unwrap(), vec![1, 3]);
    }

    #[test]
    fn zero_interval_always_saves() {
        let saves = Arc::new(Mutex::new(Vec::new()));
        let mut writer = counting(saves.clone()).with_interval(Duration::ZERO);
        for i in 0..3 {
            writer.maybe_save(&checkpoint(i), false);
        }
        assert_eq!(saves.lock().unwrap().len(), 3);
    }

    #[test]
    fn failures_are_swallowed_and_retried() {
        let attempts = Arc::new(Mutex::new(0));
        let counter = attempts.clone();
        let mut writer = ThrottledWriter::new(move |_: &Checkpoint| {
            *counter.lock().unwrap() += 1;
            Err(Error::Io(io::Error::other("disk full")))
        })
        .with_interval(Duration::from_secs(3600));

        assert!(!writer.maybe_save(&checkpoint(1), false));
        // a failed save does not start the interval
        assert!(!writer.maybe_save(&checkpoint(1), false));
        assert_eq!(*attempts.lock().unwrap(), 2);
    }

    #[test]
    fn consumer_threshold_and_stop() {
        let saves = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));
        let mut consumer =
            ThrottledSaveConsumer::new(counting(saves.clone()), stop.clone()).with_threshold(100);

        assert!(!consumer.should_save(60));
        assert!(consumer.should_save(60));
        assert_eq!(consumer.save(&checkpoint(2)).unwrap(), AfterSave::Continue);
        assert!(!consumer.should_save(10));

        stop.store(true, Ordering::Release);
        assert!(consumer.should_save(0));
        assert_eq!(
            consumer.save(&checkpoint(3)).unwrap(),
            AfterSave::StopAfterSave
        );
        assert_eq!(*saves.lock().unwrap(), vec![2, 3]);
    }

    #[test]
    fn checkpoint_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let file = CheckpointFile::new(dir.path().join("extract.json"));
        assert_eq!(file.load().unwrap(), None);

        let cp = Checkpoint {
            entry_index: 7,
            progress: 0.25,
        };
        file.save(&cp).unwrap();
        assert_eq!(file.load().unwrap(), Some(cp));

        file.clear().unwrap();
        assert_eq!(file.load().unwrap(), None);
    }

    #[test]
    fn corrupt_checkpoint_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = CheckpointFile::new(dir.path().join("extract.json"));
        std::fs::write(file.path(), "{not json").unwrap();
        assert!(matches!(file.load(), Err(Error::Checkpoint(_))));
    }
}
