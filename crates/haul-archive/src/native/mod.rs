//! The universal decoder's backend.
//!
//! A [`NativeLibrary`] is a registry of [`FormatHandler`]s. Opening an input asks the
//! handlers registered for its extension first, then every handler whose signature
//! matches the first bytes. An opened [`NativeArchive`] only holds metadata: extraction
//! borrows the input stream again and reports members through a [`MemberVisitor`].

mod cab;
pub mod deps;
mod exe;
mod sevenz;
mod window;

pub use cab::CabHandler;
#[cfg(test)]
pub(crate) use cab::cabinet_of;
pub use exe::{ElfHandler, PeHandler};
#[cfg(test)]
pub(crate) use exe::minimal_pe;
pub use sevenz::SevenZipHandler;

use std::io::{self, Read, Seek};
use std::sync::Arc;

use once_cell::sync::Lazy;
use tracing::debug;

use crate::entry::Attributes;

/// Bytes handed to [`FormatHandler::matches_signature`].
pub const SIGNATURE_LEN: usize = 4096;

pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek + ?Sized> ReadSeek for T {}

/// One member as the backend reports it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NativeItem {
    pub path: String,
    pub size: u64,
    pub packed_size: u64,
    pub posix_attrib: Option<u32>,
    pub attrib: Option<u32>,
    pub is_dir: bool,
    pub link_target: Option<String>,
}

impl NativeItem {
    pub fn attributes(&self) -> Attributes {
        Attributes {
            posix: self.posix_attrib,
            windows: self.attrib,
            is_dir: self.is_dir,
            has_link_target: self.link_target.is_some(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemberAction {
    /// Stream the member's data to [`MemberVisitor::write`].
    Extract,
    /// Decode the member without reporting it.
    Skip,
    /// Stop iterating; the remaining members are left alone.
    Stop,
}

/// Receives member data during [`NativeArchive::extract`].
///
/// Calls for one member always come as `begin`, any number of `write`s, then `finish`,
/// and members never interleave. The `progress` call covering a member comes before its
/// `finish`.
pub trait MemberVisitor {
    fn begin(&mut self, index: usize) -> io::Result<MemberAction>;

    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    fn finish(&mut self, index: usize) -> io::Result<()>;

    /// Uncompressed bytes processed so far out of `total` for this call.
    fn progress(&mut self, done: u64, total: u64);
}

/// An opened archive.
pub trait NativeArchive {
    /// Name of the format, e.g. `7z` or `PE`.
    fn format(&self) -> &str;

    fn items(&self) -> &[NativeItem];

    /// Decode the members at `indices`, which are sorted and deduplicated.
    fn extract(
        &mut self,
        stream: &mut dyn ReadSeek,
        indices: &[usize],
        visitor: &mut dyn MemberVisitor,
    ) -> io::Result<()>;
}

pub trait FormatHandler: Send + Sync {
    fn name(&self) -> &str;

    /// Lowercase extensions, without the dot, this handler should be tried for.
    fn extensions(&self) -> &[&str];

    fn matches_signature(&self, header: &[u8]) -> bool;

    /// `hint` is the extension the input was opened with, if any.
    fn open(
        &self,
        stream: &mut dyn ReadSeek,
        size: u64,
        hint: &str,
    ) -> io::Result<Box<dyn NativeArchive>>;
}

static SHARED: Lazy<Arc<NativeLibrary>> = Lazy::new(|| Arc::new(NativeLibrary::standard()));

/// Registry of format handlers.
#[derive(Default)]
pub struct NativeLibrary {
    handlers: Vec<Box<dyn FormatHandler>>,
}

impl NativeLibrary {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// 7z, PE, ELF and cab, in that order.
    pub fn standard() -> Self {
        Self::new()
            .register(SevenZipHandler)
            .register(PeHandler)
            .register(ElfHandler)
            .register(CabHandler)
    }

    /// The process-wide standard library.
    pub fn shared() -> Arc<Self> {
        Arc::clone(&SHARED)
    }

    pub fn register(mut self, handler: impl FormatHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn handler_names(&self) -> impl Iterator<Item = &str> {
        self.handlers.iter().map(|h| h.name())
    }

    /// Try every handler registered for `ext`, in registration order.
    pub fn open_by_extension(
        &self,
        stream: &mut dyn ReadSeek,
        size: u64,
        ext: &str,
    ) -> io::Result<Box<dyn NativeArchive>> {
        let candidates = self
            .handlers
            .iter()
            .filter(|h| h.extensions().contains(&ext));
        self.try_open(candidates, stream, size, ext)
            .ok_or_else(|| no_handler(format!("no handler opens '.{ext}' input")))?
    }

    /// Try every handler whose signature matches the head of `stream`.
    pub fn open_by_signature(
        &self,
        stream: &mut dyn ReadSeek,
        size: u64,
        hint: &str,
    ) -> io::Result<Box<dyn NativeArchive>> {
        stream.rewind()?;
        let mut header = Vec::with_capacity(SIGNATURE_LEN);
        Read::take(&mut *stream, SIGNATURE_LEN as u64).read_to_end(&mut header)?;

        let candidates = self
            .handlers
            .iter()
            .filter(|h| h.matches_signature(&header));
        self.try_open(candidates, stream, size, hint)
            .ok_or_else(|| no_handler("no handler recognizes the signature".to_string()))?
    }

    /// `None` when there were no candidates, otherwise the first success or the last error.
    fn try_open<'a>(
        &self,
        candidates: impl Iterator<Item = &'a Box<dyn FormatHandler>>,
        stream: &mut dyn ReadSeek,
        size: u64,
        hint: &str,
    ) -> Option<io::Result<Box<dyn NativeArchive>>> {
        let mut last = None;
        for handler in candidates {
            let attempt = match stream.rewind() {
                Ok(_) => handler.open(stream, size, hint),
                Err(err) => Err(err),
            };
            match attempt {
                Ok(archive) => return Some(Ok(archive)),
                Err(err) => {
                    debug!(handler = handler.name(), "open failed: {err}");
                    last = Some(Err(err));
                }
            }
        }
        last
    }
}

fn no_handler(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, msg)
}

const PUMP_BUF: usize = 32 * 1024;

/// Copy all of `reader` to the visitor. Returns the byte count.
pub fn pump(reader: &mut dyn Read, visitor: &mut dyn MemberVisitor) -> io::Result<u64> {
    let mut buf = vec![0u8; PUMP_BUF];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        visitor.write(&buf[..n])?;
        total += n as u64;
    }
}

/// Read `reader` to the end, discarding the data.
pub fn drain(reader: &mut dyn Read) -> io::Result<u64> {
    io::copy(reader, &mut io::sink())
}
