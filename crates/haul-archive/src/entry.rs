use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Permission bits an extracted entry may keep.
pub const PERMISSION_BITS: u32 = 0o777;

/// Bits every extracted regular file gets on top of its own.
pub const MODE_MASK: u32 = 0o666;

/// Mode used when the archive records none.
pub const DEFAULT_MODE: u32 = 0o644;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Directory,
    File,
    Symlink,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Directory => "dir",
            Self::File => "file",
            Self::Symlink => "symlink",
        })
    }
}

/// One archive member.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub canonical_path: String,
    pub kind: EntryKind,
    pub uncompressed_size: i64,
    pub compressed_size: i64,
    pub mode: u32,
    /// Only set when the archive stores the target as metadata rather than as content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_target: Option<String>,
}

impl Entry {
    pub fn new(canonical_path: impl Into<String>, kind: EntryKind) -> Self {
        Self {
            canonical_path: canonical_path.into(),
            kind,
            uncompressed_size: 0,
            compressed_size: 0,
            mode: DEFAULT_MODE,
            link_target: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.uncompressed_size = clamp_size(size);
        self
    }

    pub fn with_compressed_size(mut self, size: u64) -> Self {
        self.compressed_size = clamp_size(size);
        self
    }

    /// Set the mode, keeping only [`PERMISSION_BITS`] bits and applying [`MODE_MASK`] to files.
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode & PERMISSION_BITS;
        if self.kind == EntryKind::File {
            self.mode |= MODE_MASK;
        }
        self
    }

    pub fn with_link_target(mut self, target: impl Into<String>) -> Self {
        self.link_target = Some(target.into());
        self
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == EntryKind::Symlink
    }

    pub fn is_executable(&self) -> bool {
        self.mode & 0o111 != 0
    }

    /// Tar archives often list `./` itself; there is nothing to create for it.
    pub(crate) fn is_root(&self) -> bool {
        self.canonical_path.is_empty()
    }
}

fn clamp_size(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}

const KIND_DIR: u32 = 0x4;
const KIND_FILE: u32 = 0x8;
const KIND_SYMLINK: u32 = 0xa;

/// Raw platform attributes a native archive member may expose.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Attributes {
    /// POSIX `st_mode`: type tag in bits 12..16, permissions in the low 9 bits.
    pub posix: Option<u32>,
    /// DOS/Windows attributes with the unix extension in the high word.
    pub windows: Option<u32>,
    pub is_dir: bool,
    pub has_link_target: bool,
}

impl Attributes {
    /// Reconstruct the entry kind and permission bits.
    ///
    /// Windows attributes win over POSIX ones; the explicit directory flag and a known
    /// link target override both. Unknown type tags are treated as files.
    pub fn decode(&self) -> (EntryKind, u32) {
        let mut tag = KIND_FILE;
        let mut mode = DEFAULT_MODE;

        if let Some(attr) = self.posix {
            tag = (attr & 0xf000) >> 12;
            mode = attr & PERMISSION_BITS;
        }

        if let Some(attr) = self.windows {
            tag = (attr & 0xf000_0000) >> 28;
            mode = ((attr & 0x01ff_0000) >> 16) & PERMISSION_BITS;
        }

        let mut kind = match tag {
            KIND_DIR => EntryKind::Directory,
            KIND_SYMLINK => EntryKind::Symlink,
            _ => EntryKind::File,
        };

        if self.is_dir {
            kind = EntryKind::Directory;
        } else if self.has_link_target {
            kind = EntryKind::Symlink;
        }

        (kind, mode)
    }
}

/// Everything a completed extraction produced.
#[derive(Clone, Debug, Default)]
pub struct ExtractionResult {
    pub entries: Vec<Entry>,
    pub total_bytes: i64,
    pub duration: Duration,
}

impl ExtractionResult {
    pub fn new(entries: Vec<Entry>, duration: Duration) -> Self {
        let total_bytes = entries.iter().map(|e| e.uncompressed_size).sum();
        Self {
            entries,
            total_bytes,
            duration,
        }
    }

    pub fn count(&self, kind: EntryKind) -> usize {
        self.entries.iter().filter(|e| e.kind == kind).count()
    }

    /// Human summary, e.g. `12.0 MiB (in 30 files, 4 dirs, 1 symlinks)`.
    pub fn stats(&self) -> String {
        format!(
            "{} (in {} files, {} dirs, {} symlinks)",
            format_bytes(self.total_bytes.max(0) as u64),
            self.count(EntryKind::File),
            self.count(EntryKind::Directory),
            self.count(EntryKind::Symlink),
        )
    }
}

pub(crate) fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
