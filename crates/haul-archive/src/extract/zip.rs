use std::io::{self, Read};
use std::time::Instant;

use tracing::{debug, info};
use zip::ZipArchive;

use crate::checkpoint::{Checkpoint, Features};
use crate::entry::{DEFAULT_MODE, Entry, EntryKind, ExtractionResult};
use crate::error::{Error, Phase};
use crate::options::ExtractOptions;
use crate::sanitize::sanitize_path;
use crate::sink::Sink;
use crate::source::Source;
use crate::Result;

pub struct ZipExtractor<S: Source> {
    archive: ZipArchive<S>,
    options: ExtractOptions,
}

impl<S: Source> ZipExtractor<S> {
    /// Reads the central directory; fails with [`Error::OpenFailed`] if there is none.
    pub fn new(mut source: S, options: ExtractOptions) -> Result<Self> {
        let name = source.stat().map(|s| s.name).unwrap_or_default();
        source.rewind()?;
        let archive = ZipArchive::new(source).map_err(|e| Error::open(name, e))?;
        Ok(Self { archive, options })
    }

    pub fn features(&self) -> Features {
        Features {
            name: "zip".to_string(),
            preallocate: true,
            random_access: true,
            ..Features::default()
        }
    }

    pub fn entries(&mut self) -> Result<Vec<Entry>> {
        Ok(self.listing()?.into_iter().map(|(_, e)| e).collect())
    }

    /// Members paired with their central directory index.
    fn listing(&mut self) -> Result<Vec<(usize, Entry)>> {
        let mut listing = Vec::with_capacity(self.archive.len());
        for index in 0..self.archive.len() {
            let file = self
                .archive
                .by_index_raw(index)
                .map_err(|e| Error::extract(Phase::Extract, format!("zip member #{index}"), e))?;
            let entry = entry_from(&file)?;
            if !entry.is_root() {
                listing.push((index, entry));
            }
        }
        Ok(listing)
    }

    /// Extract every member in one pass. A checkpoint only turns off preallocation.
    pub fn resume(
        &mut self,
        checkpoint: Option<Checkpoint>,
        sink: &mut dyn Sink,
    ) -> Result<ExtractionResult> {
        if checkpoint.is_some() {
            debug!("zip extracts in a single pass, ignoring checkpoint");
        }

        let start = Instant::now();
        let listing = self.listing()?;

        // a resumed run finds its files already sized
        if checkpoint.is_none() {
            let prealloc_start = Instant::now();
            for (_, entry) in listing.iter().filter(|(_, e)| e.is_file()) {
                sink.preallocate(entry).map_err(|e| {
                    Error::extract(Phase::Preallocate, entry.canonical_path.clone(), e)
                })?;
            }
            debug!(elapsed = ?prealloc_start.elapsed(), "preallocated");
        }

        let total: u64 = listing
            .iter()
            .map(|(_, e)| e.uncompressed_size.max(0) as u64)
            .sum();
        let mut done = 0u64;

        for (index, entry) in &listing {
            let failed = |e: zip::result::ZipError| {
                Error::extract(Phase::Extract, entry.canonical_path.clone(), e)
            };
            match entry.kind {
                EntryKind::Directory => sink.mkdir(entry)?,
                EntryKind::Symlink => {
                    let mut target = String::new();
                    self.archive
                        .by_index(*index)
                        .map_err(failed)?
                        .read_to_string(&mut target)
                        .map_err(|e| {
                            Error::extract(Phase::Extract, entry.canonical_path.clone(), e)
                        })?;
                    sink.symlink(entry, &target.replace('\\', "/"))?;
                }
                EntryKind::File => {
                    let mut file = self.archive.by_index(*index).map_err(failed)?;
                    let mut writer = sink.get_writer(entry)?;
                    io::copy(&mut file, &mut writer)
                        .and_then(|_| writer.sync())
                        .map_err(|e| {
                            Error::extract(Phase::Extract, entry.canonical_path.clone(), e)
                        })?;
                }
            }

            done += entry.uncompressed_size.max(0) as u64;
            if total > 0 {
                self.options.report(done as f64 / total as f64);
            }
        }

        self.options.report(1.0);
        let result = ExtractionResult::new(
            listing.into_iter().map(|(_, e)| e).collect(),
            start.elapsed(),
        );
        info!("extracted {}", result.stats());
        Ok(result)
    }
}

fn entry_from<R: Read>(file: &zip::read::ZipFile<'_, R>) -> Result<Entry> {
    let path = sanitize_path(file.name())?;
    let kind = if file.is_dir() {
        EntryKind::Directory
    } else if file.is_symlink() {
        EntryKind::Symlink
    } else {
        EntryKind::File
    };

    Ok(Entry::new(path, kind)
        .with_mode(file.unix_mode().unwrap_or(DEFAULT_MODE))
        .with_size(file.size())
        .with_compressed_size(file.compressed_size()))
}
