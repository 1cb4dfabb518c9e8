use crate::{Error, Result};
use std::path::Path;

/// Permission modes applied to extracted files and directories.
///
/// Archive members carry unix mode bits; on windows the only thing that maps over is
/// the readonly attribute.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PermissionMode {
    /// Leave whatever the OS picked (umask on unix).
    #[default]
    Inherit,

    /// `0o755` on unix, writable on windows.
    Directory,

    /// Explicit unix mode bits.
    ///
    /// On windows a mode without any write bit sets the readonly attribute.
    Custom(u32),
}

impl PermissionMode {
    pub fn custom(unix_mode: u32) -> Self {
        Self::Custom(unix_mode)
    }

    /// Unix mode bits, if this mode has any.
    pub fn to_unix_mode(self) -> Option<u32> {
        match self {
            Self::Inherit => None,
            Self::Directory => Some(0o755),
            Self::Custom(mode) => Some(mode),
        }
    }

    pub fn is_executable(self) -> bool {
        self.to_unix_mode().is_some_and(|m| m & 0o111 != 0)
    }

    pub fn is_writable(self) -> bool {
        self.to_unix_mode().is_some_and(|m| m & 0o222 != 0)
    }

    /// Apply the mode to an existing file or directory.
    ///
    /// # Errors
    /// Fails if the path does not exist or its permissions cannot be changed.
    pub fn apply_to_path(self, path: &Path) -> Result<()> {
        let Some(mode) = self.to_unix_mode() else {
            return Ok(());
        };

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(
                |source| Error::Write {
                    path: path.to_path_buf(),
                    source,
                },
            )?;
        }

        #[cfg(windows)]
        {
            let mut perms = std::fs::metadata(path)
                .map_err(|source| Error::Write {
                    path: path.to_path_buf(),
                    source,
                })?
                .permissions();
            perms.set_readonly(mode & 0o222 == 0);
            std::fs::set_permissions(path, perms).map_err(|source| Error::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }

        Ok(())
    }
}

impl From<u32> for PermissionMode {
    fn from(mode: u32) -> Self {
        Self::custom(mode)
    }
}
