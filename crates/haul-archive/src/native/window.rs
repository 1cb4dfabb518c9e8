//! Locating an archive embedded in a larger file and reading it in place.

use std::io::{self, Read, Seek, SeekFrom};

use super::ReadSeek;

const SCAN_CHUNK: usize = 64 * 1024;

/// Offset of the next `signature` at or after `from`.
pub(crate) fn find_signature(
    stream: &mut dyn ReadSeek,
    from: u64,
    signature: &[u8],
) -> io::Result<Option<u64>> {
    stream.seek(SeekFrom::Start(from))?;
    let mut buf = vec![0u8; SCAN_CHUNK + signature.len()];
    let mut carry = 0;
    let mut base = from;

    loop {
        let n = stream.read(&mut buf[carry..])?;
        if n == 0 {
            return Ok(None);
        }
        let filled = carry + n;
        if let Some(pos) = buf[..filled]
            .windows(signature.len())
            .position(|w| w == signature)
        {
            return Ok(Some(base + pos as u64));
        }

        let keep = filled.min(signature.len() - 1);
        buf.copy_within(filled - keep..filled, 0);
        base += (filled - keep) as u64;
        carry = keep;
    }
}

/// A window of `len` bytes starting at `start` in the underlying stream.
pub(crate) struct SubStream<'a> {
    inner: &'a mut dyn ReadSeek,
    start: u64,
    len: u64,
    pos: u64,
}

impl<'a> SubStream<'a> {
    pub(crate) fn new(inner: &'a mut dyn ReadSeek, start: u64, len: u64) -> io::Result<Self> {
        inner.seek(SeekFrom::Start(start))?;
        Ok(Self {
            inner,
            start,
            len,
            pos: 0,
        })
    }
}

impl Read for SubStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.len.saturating_sub(self.pos);
        if remaining == 0 {
            return Ok(0);
        }
        let max = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let n = self.inner.read(&mut buf[..max])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for SubStream<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(delta) => self.len.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        }
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before the start of the stream",
            )
        })?;

        self.inner.seek(SeekFrom::Start(self.start + target))?;
        self.pos = target;
        Ok(target)
    }
}
