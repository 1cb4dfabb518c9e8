//! Provisioning of files the native library needs next to the executable.
//!
//! Every handler in [`NativeLibrary::standard`](super::NativeLibrary::standard) is compiled
//! in, so the standard spec is empty. Embedders shipping extra payloads describe them in a
//! [`DepSpec`] and call [`ensure_with`].

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use haul_fs::AtomicWriteOptions;
use once_cell::sync::{Lazy, OnceCell};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// Set to `1` to skip provisioning entirely.
pub const NO_DEPS_ENV: &str = "HAUL_NO_DEPS";

static NO_DEPS: Lazy<bool> = Lazy::new(|| std::env::var(NO_DEPS_ENV).is_ok_and(|v| v == "1"));

static ENSURED: OnceCell<()> = OnceCell::new();

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DepEntry {
    pub name: String,
    /// Lowercase hex SHA-256 of the expected content.
    pub sha256: String,
}

impl DepEntry {
    pub fn new(name: impl Into<String>, sha256: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sha256: sha256.into(),
        }
    }
}

/// Files to provision and the zip archives they can be healed from.
#[derive(Clone, Debug, Default)]
pub struct DepSpec {
    pub entries: Vec<DepEntry>,
    pub sources: Vec<PathBuf>,
}

impl DepSpec {
    /// Dependencies of the built-in handlers on this platform.
    pub fn standard() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Make sure the standard dependencies are in place. Runs at most once per process.
pub fn ensure() -> Result<()> {
    if *NO_DEPS {
        debug!("{NO_DEPS_ENV} set, not ensuring dependencies");
        return Ok(());
    }

    ENSURED
        .get_or_try_init(|| {
            let spec = DepSpec::standard();
            if spec.is_empty() {
                debug!(
                    os = std::env::consts::OS,
                    arch = std::env::consts::ARCH,
                    "no native dependencies"
                );
                return Ok(());
            }
            ensure_with(&spec, &exec_dir()?)
        })
        .map(|_| ())
}

fn exec_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe()?;
    exe.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| haul_fs::Error::NoParent(exe.clone()).into())
}

/// Check every entry of `spec` in `dir` and heal missing or mismatched ones.
pub fn ensure_with(spec: &DepSpec, dir: &Path) -> Result<()> {
    let mut missing: Vec<&DepEntry> = Vec::new();
    for entry in &spec.entries {
        let path = dir.join(&entry.name);
        match digest_file(&path) {
            Ok(digest) if digest == entry.sha256 => {
                debug!(name = %entry.name, "dependency ok");
            }
            Ok(digest) => {
                debug!(name = %entry.name, expected = %entry.sha256, actual = %digest, "dependency hash mismatch");
                missing.push(entry);
            }
            Err(err) => {
                debug!(name = %entry.name, "dependency unreadable: {err}");
                missing.push(entry);
            }
        }
    }

    if missing.is_empty() {
        return Ok(());
    }

    for source in &spec.sources {
        if missing.is_empty() {
            break;
        }
        match heal_from(source, dir, &missing) {
            Ok(healed) => missing.retain(|entry| !healed.contains(&entry.name)),
            Err(err) => warn!(source = %source.display(), "could not heal dependencies: {err}"),
        }
    }

    match missing.first() {
        Some(entry) => Err(Error::MissingDependency {
            name: entry.name.clone(),
        }),
        None => Ok(()),
    }
}

/// Write every entry of `wanted` found in the zip at `source`, returns the healed names.
fn heal_from(source: &Path, dir: &Path, wanted: &[&DepEntry]) -> io::Result<Vec<String>> {
    let mut archive = zip::ZipArchive::new(File::open(source)?)?;
    let mut healed = Vec::new();

    for entry in wanted {
        let mut data = Vec::new();
        match archive.by_name(&entry.name) {
            Ok(mut file) => file.read_to_end(&mut data)?,
            Err(_) => continue,
        };

        let digest = hex::encode(Sha256::digest(&data));
        if digest != entry.sha256 {
            warn!(name = %entry.name, source = %source.display(), "source carries a different version, skipping");
            continue;
        }

        haul_fs::atomic_write(
            dir.join(&entry.name),
            &data,
            AtomicWriteOptions::new().permissions(0o755),
        )
        .map_err(io::Error::other)?;
        info!(name = %entry.name, "provisioned dependency");
        healed.push(entry.name.clone());
    }

    Ok(healed)
}

fn digest_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
