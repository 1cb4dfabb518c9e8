use std::collections::{HashMap, HashSet};
use std::io::{self, Read};

use sevenz_rust::{Password, SevenZArchiveEntry, SevenZReader};
use tracing::debug;

use super::window::{SubStream, find_signature};
use super::{
    FormatHandler, MemberAction, MemberVisitor, NativeArchive, NativeItem, ReadSeek, drain, pump,
};

const SIGNATURE: &[u8] = &[b'7', b'z', 0xBC, 0xAF, 0x27, 0x1C];

/// 7z archives, including payloads appended to a self-extracting executable.
#[derive(Clone, Copy, Debug, Default)]
pub struct SevenZipHandler;

impl FormatHandler for SevenZipHandler {
    fn name(&self) -> &str {
        "7z"
    }

    fn extensions(&self) -> &[&str] {
        &["7z", "exe"]
    }

    fn matches_signature(&self, header: &[u8]) -> bool {
        header.starts_with(SIGNATURE)
    }

    fn open(
        &self,
        stream: &mut dyn ReadSeek,
        size: u64,
        hint: &str,
    ) -> io::Result<Box<dyn NativeArchive>> {
        let mut head = [0u8; 6];
        let starts_with_signature = match stream.read_exact(&mut head) {
            Ok(()) => head == SIGNATURE,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => false,
            Err(e) => return Err(e),
        };

        if starts_with_signature {
            return SevenZipArchive::open(stream, 0, size);
        }

        if hint != "exe" {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "not a 7z archive",
            ));
        }

        // self-extracting: the archive follows the executable stub
        let mut from = 1;
        while let Some(offset) = find_signature(stream, from, SIGNATURE)? {
            match SevenZipArchive::open(stream, offset, size) {
                Ok(archive) => {
                    debug!(offset, "found 7z payload in executable");
                    return Ok(archive);
                }
                Err(err) => debug!(offset, "not a 7z payload: {err}"),
            }
            from = offset + 1;
        }

        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "executable carries no 7z payload",
        ))
    }
}

struct SevenZipArchive {
    offset: u64,
    len: u64,
    items: Vec<NativeItem>,
}

impl SevenZipArchive {
    fn open(
        stream: &mut dyn ReadSeek,
        offset: u64,
        size: u64,
    ) -> io::Result<Box<dyn NativeArchive>> {
        let len = size.saturating_sub(offset);
        let reader = SevenZReader::new(SubStream::new(stream, offset, len)?, len, Password::empty())
            .map_err(to_io)?;
        let items = reader.archive().files.iter().map(item_from).collect();
        Ok(Box::new(Self { offset, len, items }))
    }
}

fn item_from(entry: &SevenZArchiveEntry) -> NativeItem {
    NativeItem {
        path: entry.name.clone(),
        size: entry.size,
        packed_size: entry.compressed_size,
        posix_attrib: None,
        attrib: entry
            .has_windows_attributes
            .then_some(entry.windows_attributes),
        is_dir: entry.is_directory,
        link_target: None,
    }
}

impl NativeArchive for SevenZipArchive {
    fn format(&self) -> &str {
        "7z"
    }

    fn items(&self) -> &[NativeItem] {
        &self.items
    }

    fn extract(
        &mut self,
        stream: &mut dyn ReadSeek,
        indices: &[usize],
        visitor: &mut dyn MemberVisitor,
    ) -> io::Result<()> {
        let wanted: HashSet<usize> = indices.iter().copied().collect();
        let total: u64 = indices
            .iter()
            .filter_map(|&i| self.items.get(i))
            .map(|item| item.size)
            .sum();

        let mut reader = SevenZReader::new(
            SubStream::new(stream, self.offset, self.len)?,
            self.len,
            Password::empty(),
        )
        .map_err(to_io)?;

        // members come grouped by solid block, not by index
        let index_of: HashMap<usize, usize> = reader
            .archive()
            .files
            .iter()
            .enumerate()
            .map(|(i, entry)| (entry as *const SevenZArchiveEntry as usize, i))
            .collect();

        let mut stopped = false;
        let mut done = 0u64;

        reader
            .for_each_entries(|entry, data| {
                if stopped {
                    return Ok(false);
                }

                let index = index_of
                    .get(&(entry as *const SevenZArchiveEntry as usize))
                    .copied();
                let Some(index) = index.filter(|i| wanted.contains(i)) else {
                    // solid blocks decode sequentially, skipped members still have to be read
                    drain(data)?;
                    return Ok(true);
                };

                let action = visitor.begin(index)?;
                match action {
                    MemberAction::Stop => {
                        stopped = true;
                        return Ok(false);
                    }
                    MemberAction::Skip => drain(data).map(|_| ())?,
                    MemberAction::Extract => pump(data, &mut *visitor).map(|_| ())?,
                }

                // checkpoints are taken on finish and must already count this member
                done += entry.size;
                if total > 0 {
                    visitor.progress(done, total);
                }
                if action == MemberAction::Extract {
                    visitor.finish(index)?;
                }
                Ok(true)
            })
            .map_err(to_io)
    }
}

fn to_io(err: sevenz_rust::Error) -> io::Error {
    match err {
        sevenz_rust::Error::Io(e, _) | sevenz_rust::Error::MaybeBadPassword(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other),
    }
}
