//! Extraction destinations.
//!
//! A [`Sink`] is a thin slice of the filesystem API (`mkdir`, `symlink`, open for write)
//! that extractors write to. [`FolderSink`] is the one that lands on disk.

mod folder;

pub use folder::{FolderSink, FolderSinkOptions};

use std::io::{self, Write};

use crate::Result;
use crate::entry::Entry;

/// A writer whose contents can be committed on demand.
///
/// Extractors call [`sync`](EntryWriter::sync) before saving a checkpoint.
pub trait EntryWriter: Write {
    fn sync(&mut self) -> io::Result<()>;
}

pub trait Sink {
    /// Create a directory and its parents.
    fn mkdir(&mut self, entry: &Entry) -> Result<()>;

    fn symlink(&mut self, entry: &Entry, target: &str) -> Result<()>;

    /// Open a writer for a regular file entry. The writer is closed when dropped.
    fn get_writer(&mut self, entry: &Entry) -> Result<Box<dyn EntryWriter>>;

    /// Reserve `entry.uncompressed_size` bytes for a file entry.
    fn preallocate(&mut self, entry: &Entry) -> Result<()>;

    /// Throw away everything extracted so far.
    fn nuke(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

impl<S: Sink + ?Sized> Sink for &mut S {
    fn mkdir(&mut self, entry: &Entry) -> Result<()> {
        (**self).mkdir(entry)
    }

    fn symlink(&mut self, entry: &Entry, target: &str) -> Result<()> {
        (**self).symlink(entry, target)
    }

    fn get_writer(&mut self, entry: &Entry) -> Result<Box<dyn EntryWriter>> {
        (**self).get_writer(entry)
    }

    fn preallocate(&mut self, entry: &Entry) -> Result<()> {
        (**self).preallocate(entry)
    }

    fn nuke(&mut self) -> Result<()> {
        (**self).nuke()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}
