use std::io::{self, Read};
use std::time::Instant;

use tracing::{debug, info};

use super::{Counter, CountingReader};
use crate::checkpoint::{Checkpoint, Features};
use crate::entry::{DEFAULT_MODE, Entry, EntryKind, ExtractionResult};
use crate::error::{Error, Phase};
use crate::format::TarCompression;
use crate::options::ExtractOptions;
use crate::sanitize::sanitize_path;
use crate::sink::Sink;
use crate::source::Source;
use crate::Result;

/// Forward-only tar reader, optionally behind a gzip or bzip2 decoder.
pub struct TarExtractor<S: Source> {
    source: S,
    compression: TarCompression,
    options: ExtractOptions,
}

impl<S: Source> TarExtractor<S> {
    pub fn new(source: S, compression: TarCompression, options: ExtractOptions) -> Self {
        Self {
            source,
            compression,
            options,
        }
    }

    pub fn features(&self) -> Features {
        Features {
            name: "tar".to_string(),
            ..Features::default()
        }
    }

    pub fn entries(&mut self) -> Result<Vec<Entry>> {
        self.walk(|_, _| Ok(()), |_| {})
    }

    /// Extract every entry. Tar cannot seek to a member, so a checkpoint only
    /// gets logged and the run starts over.
    pub fn resume(
        &mut self,
        checkpoint: Option<Checkpoint>,
        sink: &mut dyn Sink,
    ) -> Result<ExtractionResult> {
        if let Some(checkpoint) = checkpoint {
            info!(
                entry_index = checkpoint.entry_index,
                "tar cannot resume, starting from the first entry"
            );
        }

        let start = Instant::now();
        let total = self.source.stat()?.size;
        let options = self.options.clone();

        let entries = self.walk(
            |entry, data| match entry.kind {
                EntryKind::Directory => sink.mkdir(entry),
                EntryKind::Symlink => {
                    let target = entry.link_target.as_deref().unwrap_or_default();
                    sink.symlink(entry, target)
                }
                EntryKind::File => {
                    let mut writer = sink.get_writer(entry)?;
                    io::copy(data, &mut writer)
                        .and_then(|_| writer.sync())
                        .map_err(|e| {
                            Error::extract(Phase::Extract, entry.canonical_path.clone(), e)
                        })
                }
            },
            |consumed| {
                if total > 0 {
                    options.report(consumed as f64 / total as f64);
                }
            },
        )?;

        options.report(1.0);
        let result = ExtractionResult::new(entries, start.elapsed());
        info!("extracted {}", result.stats());
        Ok(result)
    }

    /// One pass over the archive from its first byte. `on_entry` sees every supported
    /// entry with its data; `on_progress` gets the compressed bytes consumed after each.
    fn walk<F, P>(&mut self, mut on_entry: F, mut on_progress: P) -> Result<Vec<Entry>>
    where
        F: FnMut(&Entry, &mut dyn Read) -> Result<()>,
        P: FnMut(u64),
    {
        self.source.rewind()?;
        let counter = Counter::default();
        let reader = CountingReader::new(&mut self.source, counter.clone());
        let mut archive = tar::Archive::new(self.compression.decoder(reader));

        let mut entries = Vec::new();
        let members = archive
            .entries()
            .map_err(|e| Error::extract(Phase::Extract, "reading tar stream", e))?;

        for member in members {
            let mut member =
                member.map_err(|e| Error::extract(Phase::Extract, "reading tar header", e))?;
            let Some(entry) = entry_from(&member)? else {
                continue;
            };
            if entry.is_root() {
                continue;
            }

            on_entry(&entry, &mut member)?;
            entries.push(entry);
            on_progress(counter.get());
        }

        Ok(entries)
    }
}

/// `None` for entry types that have no counterpart in a sink.
fn entry_from<R: Read>(member: &tar::Entry<'_, R>) -> Result<Option<Entry>> {
    let header = member.header();
    let entry_type = header.entry_type();
    let kind = if entry_type.is_dir() {
        EntryKind::Directory
    } else if entry_type.is_file() || entry_type.is_contiguous() {
        EntryKind::File
    } else if entry_type.is_symlink() {
        EntryKind::Symlink
    } else {
        debug!(?entry_type, "skipping tar entry");
        return Ok(None);
    };

    let raw = member
        .path()
        .map_err(|e| Error::extract(Phase::Extract, "decoding tar path", e))?;
    let path = sanitize_path(&raw.to_string_lossy())?;
    let mode = header.mode().unwrap_or(DEFAULT_MODE);

    let mut entry = Entry::new(path, kind)
        .with_mode(mode)
        .with_size(member.size());

    if kind == EntryKind::Symlink {
        let target = member
            .link_name()
            .map_err(|e| Error::extract(Phase::Extract, entry.canonical_path.clone(), e))?
            .ok_or_else(|| Error::UnsafePath {
                path: entry.canonical_path.clone(),
            })?;
        entry = entry.with_link_target(target.to_string_lossy().replace('\\', "/"));
    }

    Ok(Some(entry))
}
