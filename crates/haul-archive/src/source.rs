use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Name and size of an input stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceStat {
    pub name: String,
    pub size: u64,
}

/// Seekable archive input.
pub trait Source: Read + Seek {
    fn stat(&self) -> io::Result<SourceStat>;
}

impl<S: Source + ?Sized> Source for &mut S {
    fn stat(&self) -> io::Result<SourceStat> {
        (**self).stat()
    }
}

/// A local file.
#[derive(Debug)]
pub struct FileSource {
    file: File,
    path: PathBuf,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        Ok(Self {
            file: File::open(path)?,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Read for FileSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Seek for FileSource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

impl Source for FileSource {
    fn stat(&self) -> io::Result<SourceStat> {
        let metadata = self.file.metadata()?;
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(SourceStat {
            name,
            size: metadata.len(),
        })
    }
}

/// An in-memory buffer with a file name attached.
#[derive(Clone, Debug)]
pub struct MemorySource {
    name: String,
    cursor: Cursor<Vec<u8>>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            cursor: Cursor::new(data.into()),
        }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.cursor.into_inner()
    }
}

impl Read for MemorySource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl Seek for MemorySource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.cursor.seek(pos)
    }
}

impl Source for MemorySource {
    fn stat(&self) -> io::Result<SourceStat> {
        Ok(SourceStat {
            name: self.name.clone(),
            size: self.cursor.get_ref().len() as u64,
        })
    }
}
