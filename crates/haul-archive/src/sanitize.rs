use crate::error::{Error, Result};

/// Canonical form of an archive entry path: archive-relative, forward slashes, no `.`
/// or empty segments, `..` resolved.
///
/// Paths that are absolute or climb above the archive root are rejected (zip-slip).
/// On windows, control characters are replaced with `_` since the filesystem refuses them.
pub fn sanitize_path(raw: &str) -> Result<String> {
    canonicalize(raw, cfg!(windows))
}

pub(crate) fn canonicalize(raw: &str, replace_control: bool) -> Result<String> {
    let unified = raw.replace('\\', "/");
    if is_absolute(&unified) {
        return Err(Error::UnsafePath {
            path: raw.to_string(),
        });
    }

    let mut parts: Vec<&str> = Vec::new();
    for part in unified.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(Error::UnsafePath {
                        path: raw.to_string(),
                    });
                }
            }
            _ => parts.push(part),
        }
    }

    let joined = parts.join("/");
    if replace_control {
        Ok(joined
            .chars()
            .map(|c| if (c as u32) < 32 { '_' } else { c })
            .collect())
    } else {
        Ok(joined)
    }
}

fn is_absolute(path: &str) -> bool {
    let bytes = path.as_bytes();
    path.starts_with('/') || (bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic())
}

/// Reject symlinks whose target resolves outside the archive root.
///
/// `link` is the canonical path of the symlink itself; relative targets are resolved
/// against its parent directory.
pub fn check_symlink_target(link: &str, target: &str) -> Result<()> {
    let escape = || Error::SymlinkEscape {
        link: link.to_string(),
        target: target.to_string(),
    };

    let unified = target.replace('\\', "/");
    if is_absolute(&unified) {
        return Err(escape());
    }

    let mut depth: Vec<&str> = link.split('/').filter(|p| !p.is_empty()).collect();
    depth.pop();
    for part in unified.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if depth.pop().is_none() {
                    return Err(escape());
                }
            }
            _ => depth.push(part),
        }
    }

    Ok(())
}

/// Directory part of a canonical path, with a trailing slash, or `""` at the root.
pub(crate) fn parent_prefix(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..=idx],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_path_sanitization() {
        assert_eq!(canonicalize("bin/tool", false).unwrap(), "bin/tool");
        assert_eq!(canonicalize("./bin//tool", false).unwrap(), "bin/tool");
        assert_eq!(canonicalize("dir/", false).unwrap(), "dir");
    }

    #[test]
    fn path_normalization() {
        let result = canonicalize("foo//bar\\baz/../qux", false).unwrap();
        assert_eq!(result, "foo/bar/qux");
    }

    #[test]
    fn root_entry_is_empty() {
        assert_eq!(canonicalize("./", false).unwrap(), "");
    }

    #[test]
    fn zip_slip_protection() {
        assert!(matches!(
            canonicalize("../etc/passwd", false),
            Err(Error::UnsafePath { .. })
        ));
        assert!(matches!(
            canonicalize("a/../../b", false),
            Err(Error::UnsafePath { .. })
        ));
        assert!(matches!(
            canonicalize("/etc/passwd", false),
            Err(Error::UnsafePath { .. })
        ));
        assert!(matches!(
            canonicalize("C:\\Windows\\system.ini", false),
            Err(Error::UnsafePath { .. })
        ));
    }

    #[test]
    fn control_characters_replaced_when_asked() {
        assert_eq!(canonicalize("a\u{1}b/c\td", true).unwrap(), "a_b/c_d");
        assert_eq!(canonicalize("a\u{1}b", false).unwrap(), "a\u{1}b");
    }

    #[test]
    fn symlink_target_sanitization() {
        assert!(check_symlink_target("lib/libfoo.so", "libfoo.so.1").is_ok());
        assert!(check_symlink_target("bin/mylink", "../lib/tool").is_ok());
        assert!(matches!(
            check_symlink_target("bin/mylink", "../../etc/passwd"),
            Err(Error::SymlinkEscape { .. })
        ));
        assert!(matches!(
            check_symlink_target("bin/mylink", "/etc/passwd"),
            Err(Error::SymlinkEscape { .. })
        ));
    }

    #[test]
    fn parent_prefix_of_paths() {
        assert_eq!(parent_prefix("sub/dir/installer.tar"), "sub/dir/");
        assert_eq!(parent_prefix("installer.tar"), "");
    }
}
