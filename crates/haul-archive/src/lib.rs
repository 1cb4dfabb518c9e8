//! Archive format detection and resumable extraction.
//!
//! # Architecture
//!
//! - `probe.rs` - Strategy selection, blacklist and stage-two plans
//! - `format.rs` - Extension table and header sniffing
//! - `extract/` - Tar, zip and native extractors behind [`Extractor`]
//! - `native/` - Handler registry backing the native extractor (7z, PE, ELF)
//! - `checkpoint.rs` - Checkpoints and the save consumer protocol
//! - `throttle.rs` - Rate-limited checkpoint persistence
//! - `stage_two.rs` - Expansion of archives nested in an extracted tree
//! - `sanitize.rs` - Path canonicalization (zip-slip prevention)
//! - `source.rs`, `sink/` - Where bytes come from and where they land
//!
//! A typical run probes a [`Source`], builds the extractor for the detected strategy and
//! resumes it into a [`Sink`]:
//!
//! ```no_run
//! use haul_archive::{FileSource, FolderSink, ProbeParams, probe};
//!
//! # fn main() -> haul_archive::Result<()> {
//! let mut source = FileSource::open("game.tar.gz")?;
//! let info = probe(&mut source, &ProbeParams::new())?;
//! let mut extractor = info.get_extractor(&mut source, Default::default())?;
//! let result = extractor.resume(None, &mut FolderSink::new("out"))?;
//! println!("{}", result.stats());
//! # Ok(())
//! # }
//! ```

pub use checkpoint::{
    AfterSave, Checkpoint, Features, NopSaveConsumer, ResumeSupport, SaveConsumer,
};
pub use entry::{Entry, EntryKind, ExtractionResult};
pub use error::{Error, Phase, Result, StageTwoStep};
pub use extract::{Extractor, NativeExtractor, TarExtractor, ZipExtractor};
pub use format::Strategy;
pub use options::{ExtractOptions, InstallerHint, ProbeParams};
pub use probe::{ArchiveInfo, StageTwoPlan, StageTwoStrategy, probe};
pub use sanitize::sanitize_path;
pub use sink::{EntryWriter, FolderSink, FolderSinkOptions, Sink};
pub use source::{FileSource, MemorySource, Source, SourceStat};
pub use throttle::{CheckpointFile, ThrottledSaveConsumer, ThrottledWriter};

pub mod checkpoint;
pub mod entry;
mod error;
pub mod extract;
pub mod format;
pub mod native;
pub mod options;
mod probe;
mod sanitize;
pub mod sink;
pub mod source;
pub mod stage_two;
pub mod throttle;
