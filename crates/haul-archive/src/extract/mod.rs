//! Per-format extractors behind one closed [`Extractor`] enum.
//!
//! Every extractor streams entries into a [`Sink`] in the archive's own member order.
//! Only the native one can stop at a checkpoint and resume later; the others accept a
//! checkpoint and start over.

mod native;
mod tar;
mod zip;

pub use self::native::NativeExtractor;
pub use self::tar::TarExtractor;
pub use self::zip::ZipExtractor;

use std::cell::Cell;
use std::io::{self, Read};
use std::rc::Rc;

use tracing::debug;

use crate::checkpoint::{Checkpoint, Features, SaveConsumer};
use crate::entry::{Entry, ExtractionResult};
use crate::error::Error;
use crate::format::{Strategy, TarCompression};
use crate::options::ExtractOptions;
use crate::sink::Sink;
use crate::source::Source;
use crate::Result;

pub enum Extractor<S: Source> {
    Tar(TarExtractor<S>),
    Zip(ZipExtractor<S>),
    Native(NativeExtractor<S>),
}

impl<S: Source> Extractor<S> {
    /// Build the extractor for `strategy`. Zip and native extractors read the archive's
    /// index here and fail early on inputs they cannot open.
    pub fn new(strategy: Strategy, source: S, options: ExtractOptions) -> Result<Self> {
        match strategy {
            Strategy::None => Err(Error::UnrecognizedFormat {
                reason: "no extraction strategy".to_string(),
            }),
            Strategy::Zip => Ok(Self::Zip(ZipExtractor::new(source, options)?)),
            Strategy::Tar | Strategy::TarGz | Strategy::TarBz2 | Strategy::TarXz => {
                let compression = strategy.tar_compression().unwrap_or(TarCompression::None);
                Ok(Self::Tar(TarExtractor::new(source, compression, options)))
            }
            Strategy::SevenZipFamily => Ok(Self::Native(NativeExtractor::new(source, options)?)),
        }
    }

    /// Extract into `sink`, starting from `checkpoint` when the extractor supports it.
    ///
    /// Returns [`Error::StoppedForCheckpoint`] when the save consumer asked to stop.
    pub fn resume(
        &mut self,
        checkpoint: Option<Checkpoint>,
        sink: &mut dyn Sink,
    ) -> Result<ExtractionResult> {
        match self {
            Self::Tar(tar) => tar.resume(checkpoint, sink),
            Self::Zip(zip) => zip.resume(checkpoint, sink),
            Self::Native(native) => native.resume(checkpoint, sink),
        }
    }

    pub fn entries(&mut self) -> Result<Vec<Entry>> {
        match self {
            Self::Tar(tar) => tar.entries(),
            Self::Zip(zip) => zip.entries(),
            Self::Native(native) => native.entries(),
        }
    }

    pub fn features(&self) -> Features {
        match self {
            Self::Tar(tar) => tar.features(),
            Self::Zip(zip) => zip.features(),
            Self::Native(native) => native.features(),
        }
    }

    /// Only the native extractor saves checkpoints; the others drop the consumer.
    pub fn set_save_consumer(&mut self, consumer: Box<dyn SaveConsumer>) {
        match self {
            Self::Native(native) => native.set_save_consumer(consumer),
            Self::Tar(_) | Self::Zip(_) => debug!("extractor does not checkpoint"),
        }
    }

    /// Format the native decoder identified, `None` for the built-in extractors.
    pub fn native_format(&self) -> Option<&str> {
        match self {
            Self::Native(native) => Some(native.format_name()),
            Self::Tar(_) | Self::Zip(_) => None,
        }
    }
}

/// Shared count of bytes pulled through a [`CountingReader`].
#[derive(Clone, Debug, Default)]
pub(crate) struct Counter(Rc<Cell<u64>>);

impl Counter {
    pub(crate) fn get(&self) -> u64 {
        self.0.get()
    }
}

/// Counts the bytes read, so progress can be measured on the compressed side of a decoder.
pub(crate) struct CountingReader<R> {
    inner: R,
    counter: Counter,
}

impl<R: Read> CountingReader<R> {
    pub(crate) fn new(inner: R, counter: Counter) -> Self {
        Self { inner, counter }
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        let cell = &self.counter.0;
        cell.set(cell.get() + n as u64);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    #[test]
    fn none_strategy_is_unrecognized() {
        let err = Extractor::new(
            Strategy::None,
            MemorySource::new("x", Vec::new()),
            ExtractOptions::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, Error::UnrecognizedFormat { .. }));
    }

    #[test]
    fn tar_strategies_build_tar_extractors() {
        let extractor = Extractor::new(
            Strategy::TarBz2,
            MemorySource::new("x.tar.bz2", Vec::new()),
            ExtractOptions::default(),
        )
        .unwrap();
        assert!(matches!(extractor, Extractor::Tar(_)));
        assert_eq!(extractor.features().name, "tar");
        assert_eq!(extractor.native_format(), None);
    }

    #[test]
    fn counting_reader() {
        let counter = Counter::default();
        let mut reader = CountingReader::new(&b"hello world"[..], counter.clone());
        let mut buf = [0u8; 5];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(counter.get(), 5);
        io::copy(&mut reader, &mut io::sink()).unwrap();
        assert_eq!(counter.get(), 11);
    }
}
