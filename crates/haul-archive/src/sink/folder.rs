use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use haul_fs::{PermissionMode, RetryOptions};
use tracing::debug;

use super::{EntryWriter, Sink};
use crate::entry::{Entry, MODE_MASK};
use crate::error::Error;
use crate::Result;
use crate::sanitize::check_symlink_target;

#[derive(Clone, Copy, Debug, Default)]
pub struct FolderSinkOptions {
    contain_symlinks: bool,
    retry: RetryOptions,
}

impl FolderSinkOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse symlinks whose target points outside the destination.
    pub fn contain_symlinks(mut self, contain: bool) -> Self {
        self.contain_symlinks = contain;
        self
    }

    /// Retry policy for [`Sink::nuke`].
    pub fn retry(mut self, retry: RetryOptions) -> Self {
        self.retry = retry;
        self
    }
}

/// Extracts into a directory on the local filesystem.
#[derive(Clone, Debug)]
pub struct FolderSink {
    directory: PathBuf,
    options: FolderSinkOptions,
}

impl FolderSink {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self::with_options(directory, FolderSinkOptions::default())
    }

    pub fn with_options(directory: impl Into<PathBuf>, options: FolderSinkOptions) -> Self {
        Self {
            directory: directory.into(),
            options,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn dest_path(&self, entry: &Entry) -> PathBuf {
        self.directory.join(&entry.canonical_path)
    }

    /// Refuse entries whose parent directories include a symlink, which an earlier
    /// entry may have planted to point outside the destination.
    fn check_parents(&self, entry: &Entry) -> Result<()> {
        let mut parent = self.directory.clone();
        let mut walked = String::new();
        let mut components = entry.canonical_path.split('/').peekable();
        while let Some(component) = components.next() {
            if components.peek().is_none() {
                break;
            }
            parent.push(component);
            if !walked.is_empty() {
                walked.push('/');
            }
            walked.push_str(component);

            match fs::symlink_metadata(&parent) {
                Ok(metadata) if metadata.file_type().is_symlink() => {
                    return Err(Error::LinkedParent {
                        path: entry.canonical_path.clone(),
                        link: walked,
                    });
                }
                Ok(_) => {}
                // nothing further down exists yet
                Err(_) => break,
            }
        }
        Ok(())
    }

    fn create_file(&self, entry: &Entry) -> Result<(File, PathBuf)> {
        self.check_parents(entry)?;
        let path = self.dest_path(entry);
        if let Some(parent) = path.parent() {
            haul_fs::ensure_dir(parent)?;
        }

        // a file replacing a symlink must not write through it
        if fs::symlink_metadata(&path).is_ok_and(|m| m.file_type().is_symlink()) {
            haul_fs::remove_all(&path)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| haul_fs::Error::Write {
                path: path.clone(),
                source,
            })?;

        PermissionMode::custom(entry.mode | MODE_MASK).apply_to_path(&path)?;
        Ok((file, path))
    }
}

impl Sink for FolderSink {
    fn mkdir(&mut self, entry: &Entry) -> Result<()> {
        self.check_parents(entry)?;
        let path = self.dest_path(entry);
        match fs::symlink_metadata(&path) {
            Ok(metadata) if metadata.is_dir() => return Ok(()),
            Ok(_) => {
                debug!(path = %path.display(), "replacing non-directory with a directory");
                haul_fs::remove_all(&path)?;
            }
            Err(_) => {}
        }
        haul_fs::ensure_dir(&path)?;
        PermissionMode::Directory.apply_to_path(&path)?;
        Ok(())
    }

    fn symlink(&mut self, entry: &Entry, target: &str) -> Result<()> {
        if self.options.contain_symlinks {
            check_symlink_target(&entry.canonical_path, target)?;
        }

        if cfg!(windows) {
            // get_writer checks the parents
            let mut writer = self.get_writer(entry)?;
            writer.write_all(target.as_bytes())?;
            writer.flush()?;
            return Ok(());
        }

        self.check_parents(entry)?;
        haul_fs::replace_symlink(target, self.dest_path(entry))?;
        Ok(())
    }

    fn get_writer(&mut self, entry: &Entry) -> Result<Box<dyn EntryWriter>> {
        let (file, path) = self.create_file(entry)?;
        // drops stale bytes from a longer file this one replaces
        file.set_len(entry.uncompressed_size.max(0) as u64)
            .map_err(|source| haul_fs::Error::Write { path, source })?;
        Ok(Box::new(FileWriter { file }))
    }

    fn preallocate(&mut self, entry: &Entry) -> Result<()> {
        let (file, path) = self.create_file(entry)?;
        drop(file);
        haul_fs::preallocate(path, entry.uncompressed_size.max(0) as u64)?;
        Ok(())
    }

    fn nuke(&mut self) -> Result<()> {
        haul_fs::remove_all_with_retry(&self.directory, self.options.retry)?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

struct FileWriter {
    file: File,
}

impl Write for FileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl EntryWriter for FileWriter {
    fn sync(&mut self) -> io::Result<()> {
        self.file.sync_data()
    }
}
