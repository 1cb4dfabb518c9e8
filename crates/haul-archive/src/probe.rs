//! Figuring out what an input is and whether it can be extracted.

use std::fmt;

use tracing::{info, warn};

use crate::checkpoint::Features;
use crate::entry::Entry;
use crate::error::Error;
use crate::extract::Extractor;
use crate::format::{Strategy, detect_from_reader, extension_of, strategy_for_extension};
use crate::options::{ExtractOptions, InstallerHint, ProbeParams};
use crate::source::Source;
use crate::Result;

/// Native formats that open fine but must never be treated as archives.
const REFUSED_FORMATS: &[&str] = &["ELF", "PE"];

const MOJOSETUP_MARKERS: &[&str] = &["scripts/mojosetup_init.lua", "scripts/mojosetup_init.luac"];
const MOJOSETUP_DATA_PREFIX: &str = "data/";
const NESTED_SUFFIXES: &[&str] = &[".tar.gz", ".tar.bz2", ".tar.xz", ".zip"];

/// What [`probe`] found out about an input.
#[derive(Clone, Debug, PartialEq)]
pub struct ArchiveInfo {
    pub strategy: Strategy,
    pub features: Features,
    /// Format the native decoder reported, or the strategy name.
    pub format_name: String,
    pub stage_two: Option<StageTwoPlan>,
}

impl ArchiveInfo {
    /// An extractor for this archive. `source` should be the input that was probed.
    pub fn get_extractor<S: Source>(
        &self,
        source: S,
        options: ExtractOptions,
    ) -> Result<Extractor<S>> {
        Extractor::new(self.strategy, source, options)
    }
}

impl fmt::Display for ArchiveInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (via {}), {}",
            self.format_name, self.strategy, self.features
        )?;
        if let Some(plan) = &self.stage_two {
            write!(
                f,
                ", stage two: {}, post-extract: [{}]",
                plan.strategy,
                plan.nested_paths.join(", ")
            )?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageTwoStrategy {
    /// Linux installers carrying their payload as archives under `data/`.
    MojoSetup,
}

impl fmt::Display for StageTwoStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MojoSetup => f.write_str("MojoSetup"),
        }
    }
}

/// Archives inside the archive that have to be expanded after the first extraction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageTwoPlan {
    pub strategy: StageTwoStrategy,
    /// Canonical paths of the nested archives, to pass to
    /// [`stage_two::expand`](crate::stage_two::expand).
    pub nested_paths: Vec<String>,
}

impl StageTwoPlan {
    /// Look for installer markers in an archive listing.
    pub fn detect(entries: &[Entry]) -> Option<Self> {
        entries
            .iter()
            .any(|e| MOJOSETUP_MARKERS.contains(&e.canonical_path.as_str()))
            .then(|| Self::mojosetup(entries))
    }

    fn mojosetup(entries: &[Entry]) -> Self {
        let nested_paths: Vec<String> = entries
            .iter()
            .filter(|e| e.is_file() && e.canonical_path.starts_with(MOJOSETUP_DATA_PREFIX))
            .filter(|e| {
                let lower = e.canonical_path.to_lowercase();
                NESTED_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix))
            })
            .map(|e| e.canonical_path.clone())
            .collect();

        info!(count = nested_paths.len(), "will apply stage-two strategy MojoSetup");
        Self {
            strategy: StageTwoStrategy::MojoSetup,
            nested_paths,
        }
    }
}

/// Determine the strategy for `source`, check that its extractor opens it, and gather
/// what the caller needs to decide on extraction. The source is rewound afterwards.
pub fn probe<S: Source>(source: &mut S, params: &ProbeParams) -> Result<ArchiveInfo> {
    let strategy = classify(source, params)?;

    let mut extractor = Extractor::new(strategy, &mut *source, params.options.clone())?;
    let features = extractor.features();
    let format_name = extractor
        .native_format()
        .map_or_else(|| strategy.to_string(), str::to_string);

    if REFUSED_FORMATS.contains(&format_name.as_str()) {
        drop(extractor);
        source.rewind()?;
        return Err(Error::RefusedFormat {
            format: format_name,
        });
    }

    // tar has no index, listing it would mean decoding the whole stream
    let stage_two = match strategy {
        Strategy::Zip | Strategy::SevenZipFamily => StageTwoPlan::detect(&extractor.entries()?),
        _ => None,
    };
    drop(extractor);
    source.rewind()?;

    Ok(ArchiveInfo {
        strategy,
        features,
        format_name,
        stage_two,
    })
}

fn classify<S: Source>(source: &mut S, params: &ProbeParams) -> Result<Strategy> {
    if params.hint == Some(InstallerHint::NativeLinux) {
        return Ok(Strategy::Zip);
    }

    let stat = match source.stat() {
        Ok(stat) => stat,
        Err(err) => {
            warn!("could not stat source, giving up: {err}");
            return Err(Error::UnrecognizedFormat {
                reason: format!("could not stat source: {err}"),
            });
        }
    };

    let ext = extension_of(&stat.name);
    if let Some(strategy) = strategy_for_extension(&ext) {
        return Ok(strategy);
    }

    warn!(name = %stat.name, "unfamiliar extension '{ext}', handing it to the native decoder");
    match detect_from_reader(source) {
        Ok(Some(sniffed)) => {
            info!(name = %stat.name, "header looks like {sniffed}, using that instead");
            Ok(sniffed)
        }
        Ok(None) => Ok(Strategy::SevenZipFamily),
        Err(err) => {
            warn!("could not sniff header: {err}");
            Ok(Strategy::SevenZipFamily)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryKind;
    use crate::source::{MemorySource, SourceStat};
    use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

    fn zip_of(files: &[&str]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for name in files {
            writer
                .start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(b"payload").unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn classifies_by_extension() {
        let mut source = MemorySource::new("bundle.zip", zip_of(&["a.txt"]));
        let info = probe(&mut source, &ProbeParams::new()).unwrap();
        assert_eq!(info.strategy, Strategy::Zip);
        assert_eq!(info.format_name, "zip");
        assert!(info.stage_two.is_none());
        assert_eq!(source.stream_position().unwrap(), 0);
        assert_eq!(
            info.to_string(),
            "zip (via zip), zip: resume=none +preallocate +randomaccess"
        );
    }

    #[test]
    fn sniffs_unfamiliar_extension() {
        let mut source = MemorySource::new("download.bin", zip_of(&["a.txt"]));
        let info = probe(&mut source, &ProbeParams::new()).unwrap();
        assert_eq!(info.strategy, Strategy::Zip);
    }

    #[test]
    fn native_linux_hint_forces_zip() {
        let mut source = MemorySource::new("game.sh", zip_of(&["a.txt"]));
        let params = ProbeParams::new().hint(InstallerHint::NativeLinux);
        assert_eq!(probe(&mut source, &params).unwrap().strategy, Strategy::Zip);
    }

    #[test]
    fn refuses_executables() {
        let mut source = MemorySource::new("tool.exe", crate::native::minimal_pe());
        let err = probe(&mut source, &ProbeParams::new()).unwrap_err();
        assert!(matches!(err, Error::RefusedFormat { format } if format == "PE"));
    }

    #[test]
    fn mojosetup_plan() {
        let data = zip_of(&[
            "scripts/mojosetup_init.luac",
            "data/game.tar.gz",
            "data/Extra.ZIP",
            "data/readme.txt",
            "other/skip.zip",
        ]);
        let mut source = MemorySource::new("game.sh", data);
        let params = ProbeParams::new().hint(InstallerHint::NativeLinux);
        let info = probe(&mut source, &params).unwrap();

        let plan = info.stage_two.clone().unwrap();
        assert_eq!(plan.strategy, StageTwoStrategy::MojoSetup);
        assert_eq!(plan.nested_paths, ["data/game.tar.gz", "data/Extra.ZIP"]);
        assert!(info.to_string().ends_with(
            "stage two: MojoSetup, post-extract: [data/game.tar.gz, data/Extra.ZIP]"
        ));
    }

    #[test]
    fn plan_needs_marker() {
        let entries = vec![Entry::new("data/game.zip", EntryKind::File)];
        assert!(StageTwoPlan::detect(&entries).is_none());
    }

    struct Unstattable(Cursor<Vec<u8>>);

    impl Read for Unstattable {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.0.read(buf)
        }
    }

    impl Seek for Unstattable {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.0.seek(pos)
        }
    }

    impl Source for Unstattable {
        fn stat(&self) -> io::Result<SourceStat> {
            Err(io::Error::other("gone"))
        }
    }

    #[test]
    fn stat_failure_is_unrecognized() {
        let mut source = Unstattable(Cursor::new(Vec::new()));
        let err = probe(&mut source, &ProbeParams::new()).unwrap_err();
        assert!(matches!(err, Error::UnrecognizedFormat { .. }));
    }
}
