//! Filesystem primitives used by extraction sinks and checkpoint stores.
//!
//! - atomic writes through a sibling temp file and rename
//! - symlink replacement (`symlinkat` on unix, `CreateSymbolicLinkW` on windows)
//! - preallocation of output files
//! - recursive removal with retry for platforms that hold files open

mod error;
pub mod permissions;

pub use error::{Error, Result};
pub use permissions::PermissionMode;

use std::fs;
use std::io;
use std::path::Path;
use std::thread;
use std::time::Duration;

use error::write_err;

#[cfg(unix)]
const DEFAULT_PERMISSIONS: u32 = 0o644;

#[cfg(not(unix))]
const DEFAULT_PERMISSIONS: u32 = 0;

#[derive(Clone, Copy, Debug)]
pub struct AtomicWriteOptions {
    permissions: u32,
    prefix:      &'static str,
    suffix:      &'static str,
    sync:        bool,
}

impl Default for AtomicWriteOptions {
    fn default() -> Self { Self::new() }
}

impl AtomicWriteOptions {
    pub fn new() -> Self {
        Self {
            permissions: DEFAULT_PERMISSIONS,
            prefix:      ".",
            suffix:      ".tmp",
            sync:        false,
        }
    }

    #[cfg(unix)]
    pub fn permissions(mut self, permissions: u32) -> Self {
        self.permissions = permissions;
        self
    }

    #[cfg(not(unix))]
    pub fn permissions(self, _permissions: u32) -> Self { self }

    pub fn prefix(mut self, prefix: &'static str) -> Self {
        self.prefix = prefix;
        self
    }

    pub fn suffix(mut self, suffix: &'static str) -> Self {
        self.suffix = suffix;
        self
    }

    /// Flush file contents to disk before the rename.
    pub fn sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    fn mode(&self) -> PermissionMode {
        if cfg!(unix) {
            PermissionMode::custom(self.permissions)
        } else {
            PermissionMode::Inherit
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RetryOptions {
    retry_count:    u32,
    retry_delay_ms: u64,
}

impl Default for RetryOptions {
    fn default() -> Self { Self::new() }
}

impl RetryOptions {
    pub fn new() -> Self {
        Self {
            retry_count:    16,
            retry_delay_ms: 8,
        }
    }

    pub fn retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count.max(1);
        self
    }

    pub fn retry_delay_ms(mut self, retry_delay_ms: u64) -> Self {
        self.retry_delay_ms = retry_delay_ms;
        self
    }

    pub fn get_retry_count(&self) -> u32 { self.retry_count }

    pub fn get_retry_delay_ms(&self) -> u64 { self.retry_delay_ms }
}

pub fn atomic_write(
    path: impl AsRef<Path>,
    content: &[u8],
    options: AtomicWriteOptions,
) -> Result<()> {
    let path = path.as_ref();
    let parent = path.parent().unwrap_or(Path::new(""));
    let file_name = path
        .file_name()
        .ok_or_else(|| Error::NoParent(path.to_path_buf()))?
        .to_string_lossy();
    let tmp_path = parent.join(format!("{}{}{}", options.prefix, file_name, options.suffix));

    {
        let mut file = fs::File::create(&tmp_path).map_err(write_err(&tmp_path))?;
        io::Write::write_all(&mut file, content).map_err(write_err(&tmp_path))?;
        if options.sync {
            file.sync_all().map_err(write_err(&tmp_path))?;
        }
    }

    options.mode().apply_to_path(&tmp_path)?;

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        Error::Write {
            path: path.to_path_buf(),
            source: e,
        }
    })
}

pub fn read(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let path = path.as_ref();
    fs::read(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Create `path` and all of its parents.
pub fn ensure_dir(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    fs::create_dir_all(path).map_err(write_err(path))
}

/// Remove whatever lives at `path`: a file, a symlink (not its target) or a whole tree.
///
/// A missing path is not an error.
pub fn remove_all(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(source) => {
            return Err(Error::Remove {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let res = if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };

    match res {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(Error::Remove {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// [`remove_all`], retried with a doubling delay while removal keeps failing.
pub fn remove_all_with_retry(path: impl AsRef<Path>, options: RetryOptions) -> Result<()> {
    let path = path.as_ref();
    let mut delay = options.get_retry_delay_ms();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match remove_all(path) {
            Ok(()) => return Ok(()),
            Err(Error::Remove { source, .. }) if attempt >= options.get_retry_count() => {
                return Err(Error::RetryLimitExceeded {
                    path: path.to_path_buf(),
                    attempts: attempt,
                    source,
                });
            }
            Err(Error::Remove { .. }) => {
                thread::sleep(Duration::from_millis(delay));
                delay = delay.saturating_mul(2);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Reserve `size` bytes for the file at `path`, creating it if needed.
///
/// Existing content is kept; the file is extended or truncated to exactly `size`.
pub fn preallocate(path: impl AsRef<Path>, size: u64) -> Result<()> {
    let path = path.as_ref();
    let file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(write_err(path))?;
    file.set_len(size).map_err(write_err(path))?;

    #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
    if size > 0 {
        // unsupported on some filesystems, `set_len` already sized the file
        if let Ok(len) = size.try_into() {
            let _ = nix::fcntl::posix_fallocate(&file, 0, len);
        }
    }

    Ok(())
}

/// Create a symlink at `link` pointing to `target`, replacing anything already at `link`.
pub fn replace_symlink(target: impl AsRef<Path>, link: impl AsRef<Path>) -> Result<()> {
    let target = target.as_ref();
    let link = link.as_ref();

    remove_all(link)?;
    if let Some(parent) = link.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_dir(parent)?;
    }

    create_symlink(target, link).map_err(|source| Error::Symlink {
        target: target.to_path_buf(),
        link: link.to_path_buf(),
        source,
    })
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    use nix::fcntl::AT_FDCWD;
    use nix::unistd::symlinkat;

    symlinkat(target, AT_FDCWD, link).map_err(io::Error::from)
}

#[cfg(windows)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    use std::os::windows::prelude::OsStrExt;
    use windows::Win32::Storage::FileSystem::{CreateSymbolicLinkW, SYMBOLIC_LINK_FLAGS};
    use windows::core::PCWSTR;

    const DIRECTORY: u32 = 0x1;
    const ALLOW_UNPRIVILEGED_CREATE: u32 = 0x2;

    let target_wide: Vec<u16> = target
        .as_os_str()
        .encode_wide()
        .chain(std::iter::once(0))
        .collect();
    let link_wide: Vec<u16> = link
        .as_os_str()
        .encode_wide()
        .chain(std::iter::once(0))
        .collect();

    let resolved = link.parent().map(|p| p.join(target));
    let mut flags = ALLOW_UNPRIVILEGED_CREATE;
    if resolved.is_some_and(|p| p.is_dir()) {
        flags |= DIRECTORY;
    }

    let created = unsafe {
        CreateSymbolicLinkW(
            PCWSTR::from_raw(link_wide.as_ptr()),
            PCWSTR::from_raw(target_wide.as_ptr()),
            SYMBOLIC_LINK_FLAGS(flags),
        )
    };

    if !created {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}
