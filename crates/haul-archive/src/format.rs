use std::fmt;
use std::io::{self, Read, Seek};

/// Which extractor implementation handles an archive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Strategy {
    #[default]
    None,
    Zip,
    Tar,
    TarGz,
    TarBz2,
    TarXz,
    SevenZipFamily,
}

impl Strategy {
    /// Tar prefilter for the tar strategies.
    pub fn tar_compression(self) -> Option<TarCompression> {
        match self {
            Self::Tar => Some(TarCompression::None),
            Self::TarGz => Some(TarCompression::Gzip),
            Self::TarBz2 => Some(TarCompression::Bzip2),
            Self::TarXz => Some(TarCompression::Xz),
            _ => None,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Zip => "zip",
            Self::Tar => "tar",
            Self::TarGz => "tar.gz",
            Self::TarBz2 => "tar.bz2",
            Self::TarXz => "tar.xz",
            Self::SevenZipFamily => "7-zip",
        })
    }
}

/// Lowercase extension of `name` including the dot, compound for `.tar.*` names.
///
/// Returns `""` when the name has no extension.
pub fn extension_of(name: &str) -> String {
    let lower = name.to_lowercase();
    let base = lower.rsplit(['/', '\\']).next().unwrap_or(&lower);
    let Some(dot) = base.rfind('.') else {
        return String::new();
    };
    let ext = &base[dot..];
    if base[..dot].ends_with(".tar") {
        format!(".tar{ext}")
    } else {
        ext.to_string()
    }
}

/// Classify an archive by its file name.
///
/// Returns `None` for extensions outside the known table; the caller decides what to
/// fall back to.
pub fn strategy_for_extension(ext: &str) -> Option<Strategy> {
    match ext {
        ".zip" => Some(Strategy::Zip),
        ".tar" => Some(Strategy::Tar),
        ".tar.gz" => Some(Strategy::TarGz),
        ".tar.bz2" | ".tbz2" => Some(Strategy::TarBz2),
        ".tar.xz" | ".txz" => Some(Strategy::TarXz),
        ".7z" | ".rar" | ".dmg" | ".exe" => Some(Strategy::SevenZipFamily),
        _ => None,
    }
}

/// Compression codec wrapped around a tar stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TarCompression {
    None,
    Gzip,
    Bzip2,
    Xz,
}

impl TarCompression {
    /// Create a decoder for this compression codec.
    pub fn decoder<R: Read>(self, reader: R) -> Decoder<R> {
        match self {
            Self::None => Decoder::Passthrough(reader),
            Self::Gzip => Decoder::Gzip(Box::new(flate2::read::GzDecoder::new(reader))),
            Self::Bzip2 => Decoder::Bzip2(Box::new(bzip2::read::BzDecoder::new(reader))),
            Self::Xz => Decoder::Xz(Box::new(xz2::read::XzDecoder::new(reader))),
        }
    }
}

/// Decoder wrapper for tar decompression.
pub enum Decoder<R: Read> {
    Passthrough(R),
    Gzip(Box<flate2::read::GzDecoder<R>>),
    Bzip2(Box<bzip2::read::BzDecoder<R>>),
    Xz(Box<xz2::read::XzDecoder<R>>),
}

impl<R: Read> Read for Decoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Passthrough(r) => r.read(buf),
            Self::Gzip(d) => d.read(buf),
            Self::Bzip2(d) => d.read(buf),
            Self::Xz(d) => d.read(buf),
        }
    }
}

/// Bytes needed to see every signature [`detect_format`] knows about.
pub const SNIFF_LEN: usize = 512;

/// Guess a strategy from the first bytes of a stream.
///
/// Only formats the built-in extractors decode are recognized; a bare gzip, bzip2 or xz
/// stream is assumed to wrap a tar.
pub fn detect_format(data: &[u8]) -> Option<Strategy> {
    match data {
        [0x50, 0x4B, 0x03, 0x04, ..] | [0x50, 0x4B, 0x05, 0x06, ..] => Some(Strategy::Zip),
        [0x1F, 0x8B, ..] => Some(Strategy::TarGz),
        [b'B', b'Z', b'h', ..] => Some(Strategy::TarBz2),
        [0xFD, b'7', b'z', b'X', b'Z', 0x00, ..] => Some(Strategy::TarXz),
        _ => {
            if is_tar_header(data) {
                Some(Strategy::Tar)
            } else {
                None
            }
        }
    }
}

fn is_tar_header(data: &[u8]) -> bool {
    data.len() >= 263 && &data[257..262] == b"ustar"
}

/// Sniff the head of `reader` and rewind it.
pub fn detect_from_reader<R: Read + Seek>(reader: &mut R) -> io::Result<Option<Strategy>> {
    reader.rewind()?;
    let mut header = Vec::with_capacity(SNIFF_LEN);
    reader.by_ref().take(SNIFF_LEN as u64).read_to_end(&mut header)?;
    reader.rewind()?;
    Ok(detect_format(&header))
}
