//! Extraction through the [`NativeLibrary`], the decoder of last resort.
//!
//! This is the only extractor that can stop midway: after each regular file the save
//! consumer may persist a [`Checkpoint`] and ask to stop, and a later call to
//! [`NativeExtractor::resume`] with that checkpoint picks up at the next member.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::checkpoint::{
    AfterSave, Checkpoint, Features, NopSaveConsumer, ResumeSupport, SaveConsumer,
};
use crate::entry::{Entry, EntryKind, ExtractionResult, format_bytes};
use crate::error::{Error, Phase};
use crate::native::{MemberAction, MemberVisitor, NativeArchive, NativeItem, NativeLibrary, deps};
use crate::options::ExtractOptions;
use crate::sanitize::sanitize_path;
use crate::sink::{EntryWriter, Sink};
use crate::source::Source;
use crate::Result;

pub struct NativeExtractor<S: Source> {
    library: Option<Arc<NativeLibrary>>,
    archive: Option<Box<dyn NativeArchive>>,
    source: S,
    format: String,
    resume_support: ResumeSupport,
    save_consumer: Box<dyn SaveConsumer>,
    options: ExtractOptions,
}

impl<S: Source> NativeExtractor<S> {
    /// Open `source` with the library from `options`, or the shared one.
    ///
    /// Handlers registered for the file extension are tried first, then any handler
    /// whose signature matches. Executables that fail both get one more try as cabinets.
    pub fn new(mut source: S, options: ExtractOptions) -> Result<Self> {
        deps::ensure()?;

        let library = options.library.clone().unwrap_or_else(NativeLibrary::shared);
        let stat = source.stat()?;
        let hint = hint_for(&stat.name);

        let archive = match library.open_by_extension(&mut source, stat.size, &hint) {
            Ok(archive) => archive,
            Err(by_ext) => {
                debug!(name = %stat.name, "open by extension failed: {by_ext}");
                match library.open_by_signature(&mut source, stat.size, &hint) {
                    Ok(archive) => archive,
                    Err(by_sig) if hint == "exe" => {
                        debug!(name = %stat.name, "open by signature failed: {by_sig}");
                        library
                            .open_by_extension(&mut source, stat.size, "cab")
                            .map_err(|e| Error::open(&stat.name, e))?
                    }
                    Err(by_sig) => return Err(Error::open(stat.name, by_sig)),
                }
            }
        };

        let format = archive.format().to_string();
        // solid 7z blocks make every resumed run decode from the block start
        let resume_support = if format == "7z" {
            ResumeSupport::None
        } else {
            ResumeSupport::Entry
        };
        debug!(%format, %resume_support, "opened with native decoder");

        Ok(Self {
            library: Some(library),
            archive: Some(archive),
            source,
            format,
            resume_support,
            save_consumer: Box::new(NopSaveConsumer),
            options,
        })
    }

    /// Format reported by the handler that opened the input, e.g. `7z` or `PE`.
    pub fn format_name(&self) -> &str {
        &self.format
    }

    pub fn features(&self) -> Features {
        Features {
            name: "native".to_string(),
            resume_support: self.resume_support,
            preallocate: true,
            random_access: true,
        }
    }

    pub fn set_save_consumer(&mut self, consumer: Box<dyn SaveConsumer>) {
        self.save_consumer = consumer;
    }

    /// Empty once the extractor has been freed.
    pub fn entries(&self) -> Result<Vec<Entry>> {
        match &self.archive {
            Some(archive) => Ok(listing(archive.items())?.into_iter().flatten().collect()),
            None => Ok(Vec::new()),
        }
    }

    pub fn is_freed(&self) -> bool {
        self.archive.is_none()
    }

    /// Release the archive and the library handle. Safe to call more than once.
    pub fn free(&mut self) {
        if self.archive.take().is_some() {
            debug!(format = %self.format, "freed native archive");
        }
        self.library = None;
    }

    pub fn resume(
        &mut self,
        checkpoint: Option<Checkpoint>,
        sink: &mut dyn Sink,
    ) -> Result<ExtractionResult> {
        let Some(archive) = self.archive.as_mut() else {
            return Err(Error::Released);
        };

        let checkpoint = match checkpoint {
            Some(_) if self.resume_support == ResumeSupport::None => {
                warn!(format = %self.format, "format cannot resume, ignoring checkpoint");
                None
            }
            other => other,
        };

        let start = Instant::now();
        let baseline = match checkpoint {
            Some(checkpoint) => {
                info!("Resuming @ {:.1}%", checkpoint.progress * 100.0);
                checkpoint.progress.clamp(0.0, 1.0)
            }
            None => {
                info!("Starting fresh extraction");
                0.0
            }
        };
        let first = checkpoint.map_or(0, |c| usize::try_from(c.entry_index).unwrap_or(0));

        let entries = listing(archive.items())?;
        let total_bytes: u64 = entries
            .iter()
            .flatten()
            .map(|e| e.uncompressed_size.max(0) as u64)
            .sum();
        let pending: Vec<usize> = (first..entries.len()).collect();

        if pending.is_empty() {
            info!("Nothing to do! (all items extracted)");
        } else {
            if checkpoint.is_none() {
                info!("Pre-allocating {} on disk", format_bytes(total_bytes));
                let prealloc_start = Instant::now();
                for entry in entries.iter().flatten().filter(|e| e.is_file()) {
                    sink.preallocate(entry).map_err(|e| {
                        Error::extract(Phase::Preallocate, entry.canonical_path.clone(), e)
                    })?;
                }
                info!("Pre-allocated in {:?}", prealloc_start.elapsed());
            }

            let mut visitor = Destinations {
                sink: &mut *sink,
                entries: &entries,
                consumer: self.save_consumer.as_mut(),
                options: &self.options,
                baseline,
                progress: baseline,
                current: Current::Nothing,
                stopped: false,
                failure: None,
            };

            let outcome = archive.extract(&mut self.source, &pending, &mut visitor);
            if let Some(err) = visitor.failure.take() {
                return Err(err);
            }
            outcome.map_err(|e| Error::extract(Phase::Extract, self.format.clone(), e))?;

            if visitor.stopped {
                return Err(Error::StoppedForCheckpoint);
            }
        }

        self.options.report(1.0);
        let result = ExtractionResult::new(entries.into_iter().flatten().collect(), start.elapsed());
        info!("Extracted {}", result.stats());
        self.free();
        Ok(result)
    }
}

impl<S: Source> Drop for NativeExtractor<S> {
    fn drop(&mut self) {
        self.free();
    }
}

/// Last extension of `name`, lowercase and without the dot.
fn hint_for(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
        _ => String::new(),
    }
}

/// One slot per item so indices stay aligned; `None` for the archive root.
fn listing(items: &[NativeItem]) -> Result<Vec<Option<Entry>>> {
    items
        .iter()
        .map(|item| {
            let entry = entry_from(item)?;
            Ok((!entry.is_root()).then_some(entry))
        })
        .collect()
}

fn entry_from(item: &NativeItem) -> Result<Entry> {
    let (kind, mode) = item.attributes().decode();
    let entry = Entry::new(sanitize_path(&item.path)?, kind)
        .with_mode(mode)
        .with_size(item.size)
        .with_compressed_size(item.packed_size);

    Ok(match (&item.link_target, kind) {
        (Some(target), EntryKind::Symlink) => entry.with_link_target(target.replace('\\', "/")),
        _ => entry,
    })
}

/// Where the member being decoded is going.
enum Current {
    Nothing,
    File {
        writer: Box<dyn EntryWriter>,
        written: u64,
    },
    /// Symlink whose target is the member content.
    Link(Vec<u8>),
}

/// Routes decoded members to the sink and triggers checkpoints.
struct Destinations<'a> {
    sink: &'a mut dyn Sink,
    entries: &'a [Option<Entry>],
    consumer: &'a mut dyn SaveConsumer,
    options: &'a ExtractOptions,
    baseline: f64,
    progress: f64,
    current: Current,
    stopped: bool,
    /// The typed error behind the last `io::Error` handed to the backend.
    failure: Option<Error>,
}

impl<'a> Destinations<'a> {
    fn fail(&mut self, err: Error) -> io::Error {
        let io_err = io::Error::other(err.to_string());
        self.failure = Some(err);
        io_err
    }

    fn entry(&self, index: usize) -> Option<&'a Entry> {
        let entries: &'a [Option<Entry>] = self.entries;
        entries.get(index).and_then(Option::as_ref)
    }

    fn checkpoint(&mut self, index: usize, written: u64) {
        if !self.consumer.should_save(written) {
            return;
        }
        let checkpoint = Checkpoint {
            entry_index: i64::try_from(index + 1).unwrap_or(i64::MAX),
            progress: self.progress,
        };
        match self.consumer.save(&checkpoint) {
            Ok(AfterSave::Continue) => {}
            Ok(AfterSave::StopAfterSave) => {
                debug!(entry_index = checkpoint.entry_index, "stopping after checkpoint");
                self.stopped = true;
            }
            Err(err) => warn!("could not save checkpoint: {err}"),
        }
    }
}

impl MemberVisitor for Destinations<'_> {
    fn begin(&mut self, index: usize) -> io::Result<MemberAction> {
        if self.stopped {
            return Ok(MemberAction::Stop);
        }
        let Some(entry) = self.entry(index) else {
            return Ok(MemberAction::Skip);
        };

        let created = match entry.kind {
            EntryKind::Directory => self.sink.mkdir(entry).map(|()| MemberAction::Skip),
            EntryKind::Symlink => match &entry.link_target {
                Some(target) => self
                    .sink
                    .symlink(entry, target)
                    .map(|()| MemberAction::Skip),
                None => {
                    self.current = Current::Link(Vec::new());
                    Ok(MemberAction::Extract)
                }
            },
            EntryKind::File => self.sink.get_writer(entry).map(|writer| {
                self.current = Current::File { writer, written: 0 };
                MemberAction::Extract
            }),
        };
        created.map_err(|e| self.fail(e))
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        match &mut self.current {
            Current::File { writer, written } => {
                writer.write_all(data)?;
                *written += data.len() as u64;
            }
            Current::Link(buf) => buf.extend_from_slice(data),
            Current::Nothing => {}
        }
        Ok(())
    }

    fn finish(&mut self, index: usize) -> io::Result<()> {
        match std::mem::replace(&mut self.current, Current::Nothing) {
            Current::File { mut writer, written } => {
                writer.sync()?;
                drop(writer);
                self.checkpoint(index, written);
            }
            Current::Link(buf) => {
                if let Some(entry) = self.entry(index) {
                    let target = String::from_utf8_lossy(&buf).replace('\\', "/");
                    self.sink.symlink(entry, &target).map_err(|e| self.fail(e))?;
                }
            }
            Current::Nothing => {}
        }
        Ok(())
    }

    fn progress(&mut self, done: u64, total: u64) {
        if total == 0 {
            return;
        }
        let fraction = done as f64 / total as f64;
        self.progress = self.baseline + (1.0 - self.baseline) * fraction;
        self.options.report(self.progress);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{FormatHandler, ReadSeek};
    use crate::sink::FolderSink;
    use crate::source::MemorySource;
    use std::io::Read;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Serves a fixed list of members whose data is the path repeated `size` times.
    struct Scripted;

    struct ScriptedArchive(Vec<NativeItem>);

    fn file(path: &str, size: u64) -> NativeItem {
        NativeItem {
            path: path.into(),
            size,
            posix_attrib: Some(0o100644),
            ..Default::default()
        }
    }

    impl FormatHandler for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn extensions(&self) -> &[&str] {
            &["scr"]
        }

        fn matches_signature(&self, header: &[u8]) -> bool {
            header.starts_with(b"SCR")
        }

        fn open(
            &self,
            stream: &mut dyn ReadSeek,
            _size: u64,
            _hint: &str,
        ) -> io::Result<Box<dyn NativeArchive>> {
            let mut magic = [0u8; 3];
            stream.read_exact(&mut magic)?;
            if &magic != b"SCR" {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "not scripted"));
            }
            Ok(Box::new(ScriptedArchive(vec![
                NativeItem {
                    path: "data".into(),
                    is_dir: true,
                    ..Default::default()
                },
                file("data/a", 4),
                NativeItem {
                    path: "data/link".into(),
                    posix_attrib: Some(0o120777),
                    ..Default::default()
                },
                file("data/b", 4),
            ])))
        }
    }

    impl NativeArchive for ScriptedArchive {
        fn format(&self) -> &str {
            "scripted"
        }

        fn items(&self) -> &[NativeItem] {
            &self.0
        }

        fn extract(
            &mut self,
            _stream: &mut dyn ReadSeek,
            indices: &[usize],
            visitor: &mut dyn MemberVisitor,
        ) -> io::Result<()> {
            let total: u64 = indices.iter().map(|&i| self.0[i].size).sum();
            let mut done = 0;
            for &index in indices {
                let item = &self.0[index];
                match visitor.begin(index)? {
                    MemberAction::Stop => return Ok(()),
                    MemberAction::Skip => {}
                    MemberAction::Extract => {
                        let data = if item.size == 0 {
                            b"a".to_vec()
                        } else {
                            vec![b'x'; item.size as usize]
                        };
                        visitor.write(&data)?;
                    }
                }
                done += item.size;
                if total > 0 {
                    visitor.progress(done, total);
                }
                visitor.finish(index)?;
            }
            Ok(())
        }
    }

    fn options() -> ExtractOptions {
        ExtractOptions::new().library(Arc::new(NativeLibrary::new().register(Scripted)))
    }

    struct StopEveryFile(Arc<Mutex<Vec<Checkpoint>>>);

    impl SaveConsumer for StopEveryFile {
        fn should_save(&mut self, _bytes: u64) -> bool {
            true
        }

        fn save(&mut self, checkpoint: &Checkpoint) -> Result<AfterSave> {
            self.0.lock().unwrap().push(*checkpoint);
            Ok(AfterSave::StopAfterSave)
        }
    }

    #[test]
    fn stops_and_resumes_per_file() {
        let dir = tempdir().unwrap();
        let saved = Arc::new(Mutex::new(Vec::new()));
        let mut extractor =
            NativeExtractor::new(MemorySource::new("pack.scr", b"SCR".to_vec()), options())
                .unwrap();
        assert_eq!(extractor.format_name(), "scripted");
        assert!(extractor.features().resumable());
        extractor.set_save_consumer(Box::new(StopEveryFile(saved.clone())));

        let mut sink = FolderSink::new(dir.path());
        let err = extractor.resume(None, &mut sink).unwrap_err();
        assert!(err.is_stop());
        let first = *saved.lock().unwrap().last().unwrap();
        assert_eq!(first.entry_index, 2);
        assert!(dir.path().join("data/a").exists());

        let err = extractor.resume(Some(first), &mut sink).unwrap_err();
        assert!(err.is_stop());
        let second = *saved.lock().unwrap().last().unwrap();
        assert_eq!(second.entry_index, 4);
        assert!(second.progress >= first.progress);

        let result = extractor.resume(Some(second), &mut sink).unwrap();
        assert_eq!(result.entries.len(), 4);
        assert!(extractor.is_freed());
        #[cfg(unix)]
        assert_eq!(
            std::fs::read_link(dir.path().join("data/link")).unwrap(),
            std::path::Path::new("a")
        );
    }

    #[test]
    fn free_is_idempotent() {
        let mut extractor =
            NativeExtractor::new(MemorySource::new("pack.scr", b"SCR".to_vec()), options())
                .unwrap();
        assert_eq!(extractor.entries().unwrap().len(), 4);

        extractor.free();
        extractor.free();
        assert!(extractor.entries().unwrap().is_empty());

        let dir = tempdir().unwrap();
        let err = extractor
            .resume(None, &mut FolderSink::new(dir.path()))
            .unwrap_err();
        assert!(matches!(err, Error::Released));
    }

    #[test]
    fn falls_back_to_signature() {
        let extractor =
            NativeExtractor::new(MemorySource::new("pack.bin", b"SCR".to_vec()), options())
                .unwrap();
        assert_eq!(extractor.format_name(), "scripted");

        let err = NativeExtractor::new(MemorySource::new("pack.exe", b"MZ".to_vec()), options())
            .err()
            .unwrap();
        assert!(matches!(err, Error::OpenFailed { name, .. } if name == "pack.exe"));
    }

    #[test]
    fn extension_hint() {
        assert_eq!(hint_for("Setup.EXE"), "exe");
        assert_eq!(hint_for("game.tar.gz"), "gz");
        assert_eq!(hint_for(".hidden"), "");
        assert_eq!(hint_for("README"), "");
    }
}
