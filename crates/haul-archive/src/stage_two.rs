//! Expansion of archives that were themselves extracted from an archive.

use std::path::Path;

use tracing::info;

use crate::entry::ExtractionResult;
use crate::error::{Error, StageTwoStep};
use crate::options::{ExtractOptions, ProbeParams};
use crate::probe::probe;
use crate::sanitize::{parent_prefix, sanitize_path};
use crate::sink::{FolderSink, Sink};
use crate::source::FileSource;
use crate::Result;

/// Extract each archive at `nested_paths` (relative to `install_folder`) next to
/// itself and append its entries, rebased onto the archive's directory, to `result`.
///
/// Stops at the first nested archive that fails and leaves `result` untouched in that
/// case. Files already written to disk by earlier archives stay in place.
pub fn expand(
    result: &mut ExtractionResult,
    install_folder: &Path,
    nested_paths: &[String],
) -> Result<()> {
    let mut expanded = ExtractionResult::default();
    for nested in nested_paths {
        let failed = |step: StageTwoStep| {
            move |source: Error| Error::StageTwoFailed {
                path: nested.clone(),
                step,
                source: Box::new(source),
            }
        };

        let canonical = sanitize_path(nested).map_err(failed(StageTwoStep::Open))?;
        let archive_path = install_folder.join(&canonical);
        let mut source = FileSource::open(&archive_path)
            .map_err(Error::from)
            .map_err(failed(StageTwoStep::Open))?;

        let archive = probe(&mut source, &ProbeParams::default())
            .map_err(failed(StageTwoStep::Probe))?;
        let mut extractor = archive
            .get_extractor(&mut source, ExtractOptions::default())
            .map_err(failed(StageTwoStep::GetExtractor))?;

        let destination = archive_path.parent().unwrap_or(install_folder);
        let mut sink = FolderSink::new(destination);
        let extracted = extractor
            .resume(None, &mut sink)
            .map_err(failed(StageTwoStep::Extract))?;
        sink.close().map_err(failed(StageTwoStep::CloseSink))?;

        let prefix = parent_prefix(&canonical);
        info!(
            path = %canonical,
            format = %archive.format_name,
            "expanded nested archive: {}",
            extracted.stats()
        );

        expanded.total_bytes += extracted.total_bytes;
        expanded.duration += extracted.duration;
        expanded
            .entries
            .extend(extracted.entries.into_iter().map(|mut entry| {
                entry.canonical_path = format!("{prefix}{}", entry.canonical_path);
                entry
            }));
    }

    result.total_bytes += expanded.total_bytes;
    result.duration += expanded.duration;
    result.entries.append(&mut expanded.entries);
    Ok(())
}
